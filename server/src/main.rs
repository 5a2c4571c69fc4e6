use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::generator;
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Command line arguments. Anything given here overrides the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "25565")]
    port: u16,
    /// JSON configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Milliseconds between physics ticks
    #[clap(short, long)]
    tick_ms: Option<u64>,
    /// Map width in blocks
    #[clap(long)]
    width: Option<i16>,
    /// Map length in blocks
    #[clap(long)]
    length: Option<i16>,
    /// Map height in blocks
    #[clap(long)]
    height: Option<i16>,
    /// Accept players without checking their verification key
    #[clap(long)]
    no_verify: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(tick_ms) = self.tick_ms {
            config.tick_interval_ms = tick_ms;
        }
        if let Some(width) = self.width {
            config.map_width = width;
        }
        if let Some(length) = self.length {
            config.map_length = length;
        }
        if let Some(height) = self.height {
            config.map_height = height;
        }
        if self.no_verify {
            config.verify_names = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    args.apply(&mut config);

    let map = generator::flat(
        config.map_width as i32,
        config.map_length as i32,
        config.map_height as i32,
    )?;
    info!(
        "Generated {}x{}x{} flat map",
        map.width(),
        map.length(),
        map.height()
    );

    let server = Server::load(config, map)?;
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;

    let mut running = tokio::spawn(Arc::clone(&server).run(listener));

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut running => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown("Server is shutting down.").await;
            let _ = running.await;
        }
    }

    Ok(())
}
