//! Flat world generator used when the server starts without a saved map.

use crate::map::{Map, MapError};
use shared::{Block, Position};

/// Builds a map with Dirt below the midline, a Grass surface on the midline
/// and Air above. Spawn is at the centre, standing on the grass.
pub fn flat(width: i32, length: i32, height: i32) -> Result<Map, MapError> {
    let volume = Map::checked_volume(width, length, height)?;
    let surface = height / 2 - 1;
    let layer = width as usize * length as usize;

    let mut raw = vec![Block::Air.id(); volume];
    if surface >= 0 {
        for z in 0..=surface as usize {
            let block = if z == surface as usize {
                Block::Grass
            } else {
                Block::Dirt
            };
            raw[z * layer..(z + 1) * layer].fill(block.id());
        }
    }

    let map = Map::from_raw(width, length, height, &raw)?;
    map.set_spawn(Position::from_block_coords(
        (width / 2) as i16,
        (length / 2) as i16,
        (surface + 1) as i16,
    ));
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_layers() {
        let map = flat(8, 6, 10).unwrap();
        assert_eq!(map.get_block(3, 3, 0), Some(Block::Dirt));
        assert_eq!(map.get_block(3, 3, 3), Some(Block::Dirt));
        assert_eq!(map.get_block(0, 5, 4), Some(Block::Grass));
        assert_eq!(map.get_block(7, 0, 5), Some(Block::Air));
        assert_eq!(map.get_block(7, 0, 9), Some(Block::Air));
    }

    #[test]
    fn test_spawn_stands_on_surface() {
        let map = flat(16, 16, 16).unwrap();
        let (x, y, z) = map.spawn().to_block_coords();
        assert_eq!((x, y), (8, 8));
        // feet in the first air block, eyes one block up
        assert_eq!(map.get_block(x as i32, y as i32, 7), Some(Block::Grass));
        assert_eq!(z, 9);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(flat(0, 4, 4).is_err());
        assert!(matches!(
            flat(2048, 16, 16),
            Err(MapError::InvalidDimensions { width: 2048, .. })
        ));
    }
}
