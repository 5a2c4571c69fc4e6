//! Map transfer payload: a big-endian cell count followed by the raw block
//! array, gzip-compressed as a whole and then cut into 1024-byte chunks.

use crate::packet::{ServerPacket, CHUNK_SIZE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapTransferError {
    #[error("decompression failed: {0}")]
    Decompress(#[from] io::Error),
    #[error("payload shorter than its cell count prefix")]
    MissingHeader,
    #[error("cell count {declared} does not match payload of {actual} blocks")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Builds the compressed transfer payload for a block array.
pub fn compress_map(blocks: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&(blocks.len() as i32).to_be_bytes())?;
    encoder.write_all(blocks)?;
    encoder.finish()
}

/// Splits a compressed payload into chunk frames. Percent complete is computed
/// from the bytes sent before each chunk.
pub fn chunk_packets(compressed: &[u8]) -> impl Iterator<Item = ServerPacket> + '_ {
    let total = compressed.len() as u64;
    compressed
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(move |(index, chunk)| {
            let sent = (index * CHUNK_SIZE) as u64;
            ServerPacket::MapChunk {
                data: chunk.to_vec(),
                percent: (100 * sent / total) as u8,
            }
        })
}

/// Reassembles chunks on the receiving end.
#[derive(Debug, Default)]
pub struct MapAssembler {
    compressed: Vec<u8>,
}

impl MapAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, data: &[u8]) {
        self.compressed.extend_from_slice(data);
    }

    pub fn compressed_len(&self) -> usize {
        self.compressed.len()
    }

    /// Decompresses the collected payload and returns the raw block array.
    pub fn finish(self) -> Result<Vec<u8>, MapTransferError> {
        let mut payload = Vec::new();
        GzDecoder::new(self.compressed.as_slice()).read_to_end(&mut payload)?;
        if payload.len() < 4 {
            return Err(MapTransferError::MissingHeader);
        }
        let declared = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let blocks = payload.split_off(4);
        if declared < 0 || declared as usize != blocks.len() {
            return Err(MapTransferError::LengthMismatch {
                declared: declared.max(0) as usize,
                actual: blocks.len(),
            });
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_blocks(len: usize) -> Vec<u8> {
        // Cheap LCG so the payload does not compress to a single chunk.
        let mut state = 12345u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                ((state >> 16) % 50) as u8
            })
            .collect()
    }

    #[test]
    fn test_chunked_transfer_reproduces_blocks() {
        let blocks = noisy_blocks(64 * 64 * 32);
        let compressed = compress_map(&blocks).unwrap();
        assert!(compressed.len() > CHUNK_SIZE);

        let mut assembler = MapAssembler::new();
        for packet in chunk_packets(&compressed) {
            // go through the wire encoding, padding included
            let frame = packet.encode();
            match ServerPacket::decode_frame(&frame).unwrap() {
                ServerPacket::MapChunk { data, .. } => assembler.push_chunk(&data),
                other => panic!("Unexpected packet {:?}", other),
            }
        }
        assert_eq!(assembler.compressed_len(), compressed.len());
        assert_eq!(assembler.finish().unwrap(), blocks);
    }

    #[test]
    fn test_chunk_sizes_and_progress() {
        let compressed: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let chunks: Vec<ServerPacket> = chunk_packets(&compressed).collect();
        assert_eq!(chunks.len(), 3);

        let summary: Vec<(usize, u8)> = chunks
            .iter()
            .map(|packet| match packet {
                ServerPacket::MapChunk { data, percent } => (data.len(), *percent),
                other => panic!("Unexpected packet {:?}", other),
            })
            .collect();
        // 100 * 1024 / 2500 = 40.96, 100 * 2048 / 2500 = 81.92
        assert_eq!(summary, vec![(1024, 0), (1024, 40), (452, 81)]);
    }

    #[test]
    fn test_payload_header_is_big_endian_count() {
        let compressed = compress_map(&[1, 2, 3]).unwrap();
        let mut payload = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut payload)
            .unwrap();
        assert_eq!(payload, vec![0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_corrupt_payload_is_rejected() {
        let mut assembler = MapAssembler::new();
        assembler.push_chunk(&[1, 2, 3, 4]);
        assert!(matches!(
            assembler.finish(),
            Err(MapTransferError::Decompress(_))
        ));
    }
}
