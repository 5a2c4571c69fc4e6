/// Fixed-point units per block along each axis.
pub const UNITS_PER_BLOCK: i16 = 32;

/// Entity position in fixed-point units, `z` being height, plus yaw (`r`) and
/// pitch (`l`) as byte angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub r: u8,
    pub l: u8,
}

impl Position {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self {
            x,
            y,
            z,
            r: 0,
            l: 0,
        }
    }

    /// Position of a player standing in block (x, y, z): centred horizontally,
    /// eyes above the feet.
    pub fn from_block_coords(x: i16, y: i16, z: i16) -> Self {
        Self::new(
            x * UNITS_PER_BLOCK + 16,
            y * UNITS_PER_BLOCK + 16,
            z * UNITS_PER_BLOCK + 51,
        )
    }

    /// Block column/row/level this position falls in.
    pub fn to_block_coords(&self) -> (i16, i16, i16) {
        (
            self.x.div_euclid(UNITS_PER_BLOCK),
            self.y.div_euclid(UNITS_PER_BLOCK),
            self.z.div_euclid(UNITS_PER_BLOCK),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_coords_roundtrip() {
        let position = Position::from_block_coords(10, 20, 5);
        assert_eq!(position.x, 336);
        assert_eq!(position.y, 656);
        assert_eq!(position.to_block_coords(), (10, 20, 6));
    }

    #[test]
    fn test_negative_coords_floor() {
        let position = Position::new(-1, -33, 0);
        assert_eq!(position.to_block_coords(), (-1, -2, 0));
    }
}
