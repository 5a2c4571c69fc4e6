//! Tree growth for saplings.

use crate::map::Map;
use rand::{Rng, RngCore};
use shared::Block;

/// Grows a tree rooted at (x, y, z). Returns `false`, leaving the map
/// untouched, when there is no room.
pub trait TreeGrower: Send + Sync {
    fn grow(&self, map: &Map, rng: &mut dyn RngCore, x: i32, y: i32, z: i32) -> bool;
}

/// Log trunk of 4 to 6 blocks with a two-layer leaf canopy around its top and
/// a small cap above it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTreeGrower;

impl DefaultTreeGrower {
    fn layout(height: i32) -> Vec<(i32, i32, i32, Block)> {
        let mut cells = Vec::new();
        for dz in 0..height {
            cells.push((0, 0, dz, Block::Log));
        }
        for dz in height - 2..=height {
            let radius: i32 = if dz < height { 2 } else { 1 };
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dz < height && dx == 0 && dy == 0 {
                        continue;
                    }
                    // round the wide layers off
                    if radius == 2 && dx.abs() == 2 && dy.abs() == 2 {
                        continue;
                    }
                    cells.push((dx, dy, dz, Block::Leaves));
                }
            }
        }
        cells
    }
}

impl TreeGrower for DefaultTreeGrower {
    fn grow(&self, map: &Map, rng: &mut dyn RngCore, x: i32, y: i32, z: i32) -> bool {
        let height = rng.gen_range(4..=6);
        let cells = Self::layout(height);

        let fits = cells
            .iter()
            .all(|&(dx, dy, dz, _)| map.get_block(x + dx, y + dy, z + dz) == Some(Block::Air));
        if !fits {
            return false;
        }

        for (dx, dy, dz, block) in cells {
            map.set_block(None, x + dx, y + dy, z + dz, block);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layout_shape() {
        let cells = DefaultTreeGrower::layout(4);
        let count = |block: Block| cells.iter().filter(|c| c.3 == block).count();
        assert_eq!(count(Block::Log), 4);
        // two rounded 5x5 layers around the trunk, then a 3x3 cap
        assert_eq!(count(Block::Leaves), 2 * (25 - 4 - 1) + 9);
        assert!(cells.contains(&(-1, 1, 4, Block::Leaves)));
        assert!(!cells.contains(&(2, -2, 2, Block::Leaves)));
    }

    #[test]
    fn test_grows_in_open_space() {
        let map = Map::new(16, 16, 16).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(DefaultTreeGrower.grow(&map, &mut rng, 8, 8, 1));

        let logs = map
            .block_bytes()
            .iter()
            .filter(|&&b| b == Block::Log.id())
            .count() as i32;
        assert!((4..=6).contains(&logs));
        for z in 1..=logs {
            assert_eq!(map.get_block(8, 8, z), Some(Block::Log));
        }
        let top = logs;
        assert_eq!(map.get_block(9, 8, top), Some(Block::Leaves));
        assert_eq!(map.get_block(8, 8, top + 1), Some(Block::Leaves));
        assert_eq!(map.get_block(10, 10, top), Some(Block::Air));
    }

    #[test]
    fn test_fails_without_changes_when_blocked() {
        let map = Map::new(16, 16, 16).unwrap();
        map.set_block(None, 8, 8, 3, Block::Stone);
        let before = map.block_bytes();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!DefaultTreeGrower.grow(&map, &mut rng, 8, 8, 1));
        assert_eq!(map.block_bytes(), before);
    }

    #[test]
    fn test_fails_near_edges() {
        let map = Map::new(16, 16, 16).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!DefaultTreeGrower.grow(&map, &mut rng, 0, 8, 1));
        assert!(!DefaultTreeGrower.grow(&map, &mut rng, 8, 8, 12));
        assert!(map.block_bytes().iter().all(|&b| b == 0));
    }
}
