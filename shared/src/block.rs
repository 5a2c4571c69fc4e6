use serde::{Deserialize, Serialize};

/// Every block type a grid cell can hold.
///
/// Ids 0..=49 are the classic set understood by every client. Ids 50..=65 are
/// the extended set; clients that did not negotiate them receive the
/// [`Block::fallback`] substitute instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Block {
    Air = 0,
    Stone = 1,
    Grass = 2,
    Dirt = 3,
    Cobble = 4,
    Plank = 5,
    Sapling = 6,
    Admincrete = 7,
    Water = 8,
    StillWater = 9,
    Lava = 10,
    StillLava = 11,
    Sand = 12,
    Gravel = 13,
    GoldOre = 14,
    IronOre = 15,
    Coal = 16,
    Log = 17,
    Leaves = 18,
    Sponge = 19,
    Glass = 20,
    Red = 21,
    Orange = 22,
    Yellow = 23,
    Lime = 24,
    Green = 25,
    Teal = 26,
    Aqua = 27,
    Cyan = 28,
    Blue = 29,
    Indigo = 30,
    Violet = 31,
    Magenta = 32,
    Pink = 33,
    Black = 34,
    Gray = 35,
    White = 36,
    YellowFlower = 37,
    RedFlower = 38,
    BrownMushroom = 39,
    RedMushroom = 40,
    Gold = 41,
    Iron = 42,
    DoubleSlab = 43,
    Slab = 44,
    Brick = 45,
    Tnt = 46,
    Books = 47,
    MossyCobble = 48,
    Obsidian = 49,
    CobbleSlab = 50,
    Rope = 51,
    Sandstone = 52,
    Snow = 53,
    Fire = 54,
    LightPink = 55,
    ForestGreen = 56,
    Brown = 57,
    DeepBlue = 58,
    Turquoise = 59,
    Ice = 60,
    CeramicTile = 61,
    Magma = 62,
    Pillar = 63,
    Crate = 64,
    StoneBrick = 65,
}

/// Highest id a client without extended blocks may place.
pub const MAX_LEGAL_BLOCK_TYPE: Block = Block::Obsidian;

/// Highest id a client with extended blocks may place.
pub const MAX_CUSTOM_BLOCK_TYPE: Block = Block::StoneBrick;

const ALL_BLOCKS: [Block; 66] = [
    Block::Air,
    Block::Stone,
    Block::Grass,
    Block::Dirt,
    Block::Cobble,
    Block::Plank,
    Block::Sapling,
    Block::Admincrete,
    Block::Water,
    Block::StillWater,
    Block::Lava,
    Block::StillLava,
    Block::Sand,
    Block::Gravel,
    Block::GoldOre,
    Block::IronOre,
    Block::Coal,
    Block::Log,
    Block::Leaves,
    Block::Sponge,
    Block::Glass,
    Block::Red,
    Block::Orange,
    Block::Yellow,
    Block::Lime,
    Block::Green,
    Block::Teal,
    Block::Aqua,
    Block::Cyan,
    Block::Blue,
    Block::Indigo,
    Block::Violet,
    Block::Magenta,
    Block::Pink,
    Block::Black,
    Block::Gray,
    Block::White,
    Block::YellowFlower,
    Block::RedFlower,
    Block::BrownMushroom,
    Block::RedMushroom,
    Block::Gold,
    Block::Iron,
    Block::DoubleSlab,
    Block::Slab,
    Block::Brick,
    Block::Tnt,
    Block::Books,
    Block::MossyCobble,
    Block::Obsidian,
    Block::CobbleSlab,
    Block::Rope,
    Block::Sandstone,
    Block::Snow,
    Block::Fire,
    Block::LightPink,
    Block::ForestGreen,
    Block::Brown,
    Block::DeepBlue,
    Block::Turquoise,
    Block::Ice,
    Block::CeramicTile,
    Block::Magma,
    Block::Pillar,
    Block::Crate,
    Block::StoneBrick,
];

impl Block {
    /// Looks up a block by its wire id. Returns `None` for unassigned ids.
    pub fn from_id(id: u8) -> Option<Block> {
        ALL_BLOCKS.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn is_custom(self) -> bool {
        self > MAX_LEGAL_BLOCK_TYPE
    }

    /// The classic block shown to clients that cannot display `self`.
    pub fn fallback(self) -> Block {
        match self {
            Block::CobbleSlab => Block::Slab,
            Block::Rope => Block::BrownMushroom,
            Block::Sandstone => Block::Sand,
            Block::Snow => Block::Air,
            Block::Fire => Block::Lava,
            Block::LightPink => Block::Pink,
            Block::ForestGreen => Block::Green,
            Block::Brown => Block::Dirt,
            Block::DeepBlue => Block::Blue,
            Block::Turquoise => Block::Cyan,
            Block::Ice => Block::Glass,
            Block::CeramicTile => Block::Iron,
            Block::Magma => Block::Obsidian,
            Block::Pillar => Block::White,
            Block::Crate => Block::Plank,
            Block::StoneBrick => Block::Stone,
            classic => classic,
        }
    }
}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id().cmp(&other.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_match_table_positions() {
        for id in 0..=MAX_CUSTOM_BLOCK_TYPE.id() {
            let block = Block::from_id(id).unwrap();
            assert_eq!(block.id(), id);
        }
        assert_eq!(Block::from_id(66), None);
        assert_eq!(Block::from_id(255), None);
    }

    #[test]
    fn test_fallbacks_are_classic() {
        for id in 0..=MAX_CUSTOM_BLOCK_TYPE.id() {
            let block = Block::from_id(id).unwrap();
            assert!(!block.fallback().is_custom(), "{:?} falls back to custom", block);
        }
        assert_eq!(Block::Stone.fallback(), Block::Stone);
        assert_eq!(Block::Fire.fallback(), Block::Lava);
    }

    #[test]
    fn test_custom_boundary() {
        assert!(!Block::Obsidian.is_custom());
        assert!(Block::CobbleSlab.is_custom());
    }

    #[test]
    fn test_block_names_deserialize() {
        let blocks: Vec<Block> = serde_json::from_str(r#"["Admincrete", "Obsidian"]"#).unwrap();
        assert_eq!(blocks, vec![Block::Admincrete, Block::Obsidian]);
    }
}
