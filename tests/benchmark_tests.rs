//! Performance benchmarks for critical server systems

use server::config::PhysicsConfig;
use server::generator;
use server::physics::PlantPhysics;
use server::trees::DefaultTreeGrower;
use shared::{chunk_packets, compress_map, Block, MapAssembler};
use std::sync::Arc;
use std::time::Instant;

/// Benchmarks physics ticks over a full-size map
#[test]
fn benchmark_physics_tick() {
    let map = generator::flat(128, 128, 64).unwrap();
    // Scatter some plants so the rules have work to do
    for i in 0..500 {
        let x = (i * 7) % 128;
        let y = (i * 13) % 128;
        let block = if i % 2 == 0 { Block::Sapling } else { Block::YellowFlower };
        map.set_block(None, x, y, 32, block);
    }
    let physics = PlantPhysics::attach(&map, PhysicsConfig::default(), Arc::new(DefaultTreeGrower));

    let iterations = 1_000u64;
    let start = Instant::now();

    for tick in 0..iterations {
        physics.tick(&map, tick);
    }

    let duration = start.elapsed();
    println!(
        "Physics tick: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // A tick must fit comfortably inside the 50ms tick interval
    assert!(duration.as_millis() / (iterations as u128) < 50);
}

/// Benchmarks shadow upkeep when many edits land in one column
#[test]
fn benchmark_column_edits() {
    let map = generator::flat(64, 64, 64).unwrap();
    let physics = PlantPhysics::attach(&map, PhysicsConfig::default(), Arc::new(DefaultTreeGrower));

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let z = 32 + (i % 32);
        let block = if i % 3 == 0 { Block::Air } else { Block::Stone };
        map.set_block(None, 10, 10, z, block);
    }

    let duration = start.elapsed();
    println!(
        "Column edits: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
    assert!(physics.shadow_height(10, 10).is_some());
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks compressing and reassembling a full-size map
#[test]
fn benchmark_map_transfer() {
    let map = generator::flat(128, 128, 64).unwrap();
    let raw = map.block_bytes();

    let start = Instant::now();
    let compressed = compress_map(&raw).unwrap();
    let mut assembler = MapAssembler::new();
    let mut chunks = 0;
    for packet in chunk_packets(&compressed) {
        if let shared::ServerPacket::MapChunk { data, .. } = packet {
            assembler.push_chunk(&data);
            chunks += 1;
        }
    }
    let restored = assembler.finish().unwrap();
    let duration = start.elapsed();

    println!(
        "Map transfer: {} bytes -> {} bytes in {} chunks, {:?}",
        raw.len(),
        compressed.len(),
        chunks,
        duration
    );
    assert_eq!(restored, raw);
    assert!(duration.as_millis() < 2_000);
}
