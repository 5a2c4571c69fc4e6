//! Player movement tracking.

use crate::map::Map;
use shared::{Position, UNITS_PER_BLOCK};

/// How far past the map edges, in blocks, a player may wander.
pub const MAX_OUTSIDE_BLOCKS: i32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Unchanged,
    /// Accepted; others should see the player at this position.
    Moved(Position),
    /// Refused; the player should be sent back here.
    Rejected(Position),
}

#[derive(Debug, Clone)]
pub struct MovementHandler {
    last_valid: Position,
}

impl MovementHandler {
    pub fn new(spawn: Position) -> Self {
        Self { last_valid: spawn }
    }

    pub fn last_valid(&self) -> Position {
        self.last_valid
    }

    pub fn reset(&mut self, position: Position) {
        self.last_valid = position;
    }

    fn within_limits(map: &Map, position: &Position) -> bool {
        let margin = MAX_OUTSIDE_BLOCKS * UNITS_PER_BLOCK as i32;
        let unit = UNITS_PER_BLOCK as i32;
        let inside = |value: i16, extent: i32| {
            let value = value as i32;
            value >= -margin && value <= extent * unit + margin
        };
        inside(position.x, map.width())
            && inside(position.y, map.length())
            && position.z as i32 >= -margin
    }

    pub fn process(&mut self, map: &Map, position: Position) -> Movement {
        if position == self.last_valid {
            return Movement::Unchanged;
        }
        if !Self::within_limits(map, &position) {
            return Movement::Rejected(self.last_valid);
        }
        self.last_valid = position;
        Movement::Moved(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_last_valid_position() {
        let map = Map::new(16, 16, 16).unwrap();
        let spawn = Position::from_block_coords(8, 8, 8);
        let mut handler = MovementHandler::new(spawn);
        assert_eq!(handler.process(&map, spawn), Movement::Unchanged);

        let step = Position::from_block_coords(9, 8, 8);
        assert_eq!(handler.process(&map, step), Movement::Moved(step));
        assert_eq!(handler.last_valid(), step);

        let mut turned = step;
        turned.r = 64;
        assert_eq!(handler.process(&map, turned), Movement::Moved(turned));
    }

    #[test]
    fn test_rejects_positions_far_outside() {
        let map = Map::new(16, 16, 16).unwrap();
        let spawn = Position::from_block_coords(8, 8, 8);
        let mut handler = MovementHandler::new(spawn);

        // just outside the edge is fine
        let edge = Position::from_block_coords(-2, 8, 8);
        assert_eq!(handler.process(&map, edge), Movement::Moved(edge));

        let far = Position::from_block_coords(100, 8, 8);
        assert_eq!(handler.process(&map, far), Movement::Rejected(edge));
        assert_eq!(handler.last_valid(), edge);
    }
}
