//! Probe client: logs in, downloads the map and reports what it received.

use clap::Parser;
use log::{debug, info, warn};
use server::codec::{PacketReader, PacketWriter};
use shared::{Block, ClientPacket, MapAssembler, ServerPacket, PROTOCOL_VERSION};
use std::collections::BTreeMap;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:25565")]
    server: String,
    /// Player name to log in with
    #[clap(short, long, default_value = "probe")]
    name: String,
    /// Verification key, needed unless the server skips name verification
    #[clap(short, long, default_value = "")]
    key: String,
    /// Chat line to send once the map has arrived
    #[clap(short, long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (read_half, write_half) = stream.into_split();
    let mut reader = PacketReader::new(read_half);
    let mut writer = PacketWriter::new(write_half);

    writer
        .send(&ClientPacket::Handshake {
            protocol_version: PROTOCOL_VERSION,
            name: args.name.clone(),
            verification_key: args.key.clone(),
            magic: 0,
        })
        .await?;

    let mut assembler = MapAssembler::new();
    let (width, height, length) = loop {
        match reader.read_frame::<ServerPacket>().await? {
            ServerPacket::Handshake {
                server_name,
                motd,
                permission,
                ..
            } => info!("Server \"{}\": {} (permission {:#x})", server_name, motd, permission),
            ServerPacket::MapBegin => info!("Receiving map..."),
            ServerPacket::MapChunk { data, percent } => {
                debug!("Chunk of {} bytes ({}%)", data.len(), percent);
                assembler.push_chunk(&data);
            }
            ServerPacket::MapEnd {
                width,
                height,
                length,
            } => break (width, height, length),
            ServerPacket::Kick { reason } => {
                warn!("Kicked: {}", reason);
                return Ok(());
            }
            other => debug!("Ignoring {:?}", other),
        }
    };

    let compressed = assembler.compressed_len();
    let blocks = assembler.finish()?;
    info!(
        "Map is {}x{}x{} ({} bytes compressed, {} cells)",
        width,
        length,
        height,
        compressed,
        blocks.len()
    );

    let mut counts = BTreeMap::new();
    for id in &blocks {
        *counts.entry(*id).or_insert(0usize) += 1;
    }
    for (id, count) in counts {
        match Block::from_id(id) {
            Some(block) => info!("  {:?}: {}", block, count),
            None => warn!("  unknown block {}: {}", id, count),
        }
    }

    if let Some(text) = args.message {
        writer.send(&ClientPacket::Message { unused: 0xFF, text }).await?;
    }

    // Print whatever else arrives until the server goes quiet
    while let Ok(packet) = reader.read_frame::<ServerPacket>().await {
        match packet {
            ServerPacket::Message { text, .. } => info!("Chat: {}", text),
            ServerPacket::Kick { reason } => {
                warn!("Kicked: {}", reason);
                break;
            }
            other => debug!("Received {:?}", other),
        }
    }
    Ok(())
}
