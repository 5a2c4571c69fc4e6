//! Validation and application of client block edits.

use crate::config::ServerConfig;
use crate::map::Map;
use crate::spam::SpamLog;
use shared::{Block, Position, MAX_CUSTOM_BLOCK_TYPE, MAX_LEGAL_BLOCK_TYPE, UNITS_PER_BLOCK};
use std::time::Instant;
use thiserror::Error;

/// How far from the player, per axis, an edit may be, in position units.
pub const MAX_PLACEMENT_RANGE: i32 = 7 * UNITS_PER_BLOCK as i32;

/// Reason shown to a client kicked for a bad edit.
pub const HACKING_DETECTED: &str = "Hacking detected.";

/// Edits that end the session. The kick reason is always
/// [`HACKING_DETECTED`]; these messages go to the log.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EditViolation {
    #[error("tried to place an invalid block type ({0})")]
    InvalidBlock(u8),
    #[error("tried to place a block too far away")]
    TooFar,
    #[error("tried to place blocks too quickly")]
    TooFast,
    #[error("tried to place a restricted block type ({0:?})")]
    RestrictedPlacement(Block),
    #[error("tried to delete a restricted block type ({0:?})")]
    RestrictedDeletion(Block),
}

/// Per-session substitutions applied to placed blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementModes {
    /// Blue becomes Water.
    pub water: bool,
    /// Red becomes Lava.
    pub lava: bool,
    /// Stone becomes Admincrete.
    pub solid: bool,
    /// Dirt becomes Grass.
    pub grass: bool,
    /// Every click places, deletes included.
    pub painting: bool,
}

impl PlacementModes {
    pub fn substitute(&self, block: Block) -> Block {
        match block {
            Block::Blue if self.water => Block::Water,
            Block::Red if self.lava => Block::Lava,
            Block::Stone if self.solid => Block::Admincrete,
            Block::Dirt if self.grass => Block::Grass,
            other => other,
        }
    }
}

/// A SetBlock frame from a client, coordinates in map order (z is height).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRequest {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub deleting: bool,
    pub raw_block: u8,
}

/// What the editing session sees about its own edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Out of range; nothing happened.
    Ignored,
    /// The edit was applied. `echo` holds the authoritative block when the
    /// client has to be told about it.
    Applied { echo: Option<Block> },
}

/// Everything about the editing session the policy needs to know.
pub struct Editor<'a> {
    pub config: &'a ServerConfig,
    pub slot: Option<u8>,
    pub is_op: bool,
    pub uses_custom_blocks: bool,
    pub modes: PlacementModes,
    pub position: Position,
}

impl Editor<'_> {
    fn max_block(&self) -> Block {
        if self.uses_custom_blocks {
            MAX_CUSTOM_BLOCK_TYPE
        } else {
            MAX_LEGAL_BLOCK_TYPE
        }
    }

    fn out_of_reach(&self, request: &EditRequest) -> bool {
        let far = |block: i16, units: i16| {
            (block as i32 * UNITS_PER_BLOCK as i32 - units as i32).abs() > MAX_PLACEMENT_RANGE
        };
        far(request.x, self.position.x)
            || far(request.y, self.position.y)
            || far(request.z, self.position.z)
    }

    fn may_place(&self, block: Block) -> bool {
        match block {
            Block::Water | Block::StillWater => self.config.can_use_water(self.is_op),
            Block::Lava | Block::StillLava => self.config.can_use_lava(self.is_op),
            Block::Grass => self.config.can_use_grass(self.is_op),
            Block::Admincrete => self.config.can_use_solid(self.is_op),
            _ => true,
        }
    }

    fn may_delete(&self, block: Block) -> bool {
        !self.config.protected_blocks.contains(&block) || self.config.can_use_solid(self.is_op)
    }

    /// Checks an edit in order (block id, bounds, distance, rate, permission,
    /// protection) and applies it to `map`.
    pub fn apply(
        &self,
        map: &Map,
        spam: &mut SpamLog,
        now: Instant,
        request: EditRequest,
    ) -> Result<EditOutcome, EditViolation> {
        let requested = Block::from_id(request.raw_block)
            .filter(|block| *block <= self.max_block())
            .ok_or(EditViolation::InvalidBlock(request.raw_block))?;

        let deleting = request.deleting && !self.modes.painting;
        let mut block = if deleting { Block::Air } else { requested };

        let (x, y, z) = (request.x as i32, request.y as i32, request.z as i32);
        if !map.in_bounds(x, y, z) {
            return Ok(EditOutcome::Ignored);
        }

        if self.config.limits_click_distance(self.is_op) && self.out_of_reach(&request) {
            return Err(EditViolation::TooFar);
        }

        if self.config.limits_click_rate(self.is_op) && spam.is_spam(now) {
            return Err(EditViolation::TooFast);
        }

        block = self.modes.substitute(block);
        if !self.may_place(block) {
            return Err(EditViolation::RestrictedPlacement(block));
        }

        let old = map.get_block(x, y, z).unwrap_or(Block::Air);
        if !self.may_delete(old) {
            return Err(EditViolation::RestrictedDeletion(old));
        }

        map.set_block(self.slot, x, y, z, block);

        let placed = map.get_block(x, y, z).unwrap_or(block);
        let echo = if self.modes.painting || (!deleting && placed.id() != request.raw_block) {
            Some(placed)
        } else {
            None
        };
        Ok(EditOutcome::Applied { echo })
    }
}
