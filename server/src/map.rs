//! The shared block grid.
//!
//! A `Map` is owned by the server and shared through `Arc`. Every edit goes
//! through [`Map::set_block`], which serialises edits on an internal lock and
//! notifies the registered [`BlockListener`]s (shadow tracking, broadcast to
//! sessions) before returning. Readers never see a torn cell.

use parking_lot::{Mutex, RwLock};
use shared::{Block, Position, UNITS_PER_BLOCK};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

/// Largest extent on any axis. Positions are `i16` fixed-point, so a player
/// standing on the far edge must still fit.
pub const MAX_DIMENSION: i32 = ((i16::MAX - 51) / UNITS_PER_BLOCK) as i32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("invalid map dimensions {width}x{length}x{height}")]
    InvalidDimensions { width: i32, length: i32, height: i32 },
    #[error("block array holds {actual} cells, expected {expected}")]
    VolumeMismatch { expected: usize, actual: usize },
    #[error("unknown block id {id} at index {index}")]
    InvalidBlock { index: usize, id: u8 },
}

/// One applied edit, as seen by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub old: Block,
    pub new: Block,
    /// Slot id of the session that made the edit, `None` for server edits.
    pub origin: Option<u8>,
}

/// Hook invoked after every applied edit. Implementations must not edit the
/// map from inside the callback.
pub trait BlockListener: Send + Sync {
    fn on_block_changed(&self, map: &Map, change: &BlockChange);
}

pub struct Map {
    id: u64,
    width: i32,
    length: i32,
    height: i32,
    spawn: RwLock<Position>,
    blocks: RwLock<Vec<Block>>,
    edit_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn BlockListener>>>,
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("length", &self.length)
            .field("height", &self.height)
            .finish()
    }
}

impl Map {
    /// Creates an all-air map. `width` and `length` are the horizontal extents
    /// (x, y), `height` is vertical (z).
    pub fn new(width: i32, length: i32, height: i32) -> Result<Self, MapError> {
        let volume = Self::checked_volume(width, length, height)?;
        Ok(Self::with_blocks(width, length, height, vec![Block::Air; volume]))
    }

    /// Wraps a raw block array in grid order.
    pub fn from_raw(width: i32, length: i32, height: i32, raw: &[u8]) -> Result<Self, MapError> {
        let volume = Self::checked_volume(width, length, height)?;
        if raw.len() != volume {
            return Err(MapError::VolumeMismatch {
                expected: volume,
                actual: raw.len(),
            });
        }
        let blocks = raw
            .iter()
            .enumerate()
            .map(|(index, &id)| Block::from_id(id).ok_or(MapError::InvalidBlock { index, id }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_blocks(width, length, height, blocks))
    }

    /// Cell count of a map with these extents, or an error when any extent is
    /// outside `1..=MAX_DIMENSION`.
    pub fn checked_volume(width: i32, length: i32, height: i32) -> Result<usize, MapError> {
        let valid = |d: i32| d > 0 && d <= MAX_DIMENSION;
        if !valid(width) || !valid(length) || !valid(height) {
            return Err(MapError::InvalidDimensions {
                width,
                length,
                height,
            });
        }
        let volume = width as usize * length as usize * height as usize;
        if volume > i32::MAX as usize {
            return Err(MapError::InvalidDimensions {
                width,
                length,
                height,
            });
        }
        Ok(volume)
    }

    fn with_blocks(width: i32, length: i32, height: i32, blocks: Vec<Block>) -> Self {
        Self {
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            width,
            length,
            height,
            spawn: RwLock::new(Position::from_block_coords(
                (width / 2) as i16,
                (length / 2) as i16,
                (height / 2) as i16,
            )),
            blocks: RwLock::new(blocks),
            edit_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn volume(&self) -> usize {
        self.width as usize * self.length as usize * self.height as usize
    }

    pub fn spawn(&self) -> Position {
        *self.spawn.read()
    }

    pub fn set_spawn(&self, spawn: Position) {
        *self.spawn.write() = spawn;
    }

    pub fn add_listener(&self, listener: Arc<dyn BlockListener>) {
        self.listeners.write().push(listener);
    }

    pub fn in_bounds(&self, x: i32, y: i32, z: i32) -> bool {
        x >= 0 && y >= 0 && z >= 0 && x < self.width && y < self.length && z < self.height
    }

    /// Linear index of a cell; `None` when out of range.
    pub fn index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if !self.in_bounds(x, y, z) {
            return None;
        }
        Some(((z * self.length + y) * self.width + x) as usize)
    }

    /// Inverse of [`Map::index`].
    pub fn coords(&self, index: usize) -> (i32, i32, i32) {
        let index = index as i32;
        let x = index % self.width;
        let y = (index / self.width) % self.length;
        let z = index / (self.width * self.length);
        (x, y, z)
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Option<Block> {
        let index = self.index(x, y, z)?;
        Some(self.blocks.read()[index])
    }

    pub fn block_at(&self, index: usize) -> Option<Block> {
        self.blocks.read().get(index).copied()
    }

    /// Applies an edit and notifies listeners. Returns `false` when the
    /// coordinates are out of range or the cell already holds `block`.
    pub fn set_block(&self, origin: Option<u8>, x: i32, y: i32, z: i32, block: Block) -> bool {
        let _edit = self.edit_lock.lock();
        let Some(old) = self.replace(x, y, z, block) else {
            return false;
        };
        let change = BlockChange {
            x,
            y,
            z,
            old,
            new: block,
            origin,
        };
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_block_changed(self, &change);
        }
        true
    }

    /// Applies an edit without notifying anyone.
    pub fn set_block_silent(&self, x: i32, y: i32, z: i32, block: Block) -> bool {
        let _edit = self.edit_lock.lock();
        self.replace(x, y, z, block).is_some()
    }

    fn replace(&self, x: i32, y: i32, z: i32, block: Block) -> Option<Block> {
        let index = self.index(x, y, z)?;
        let mut blocks = self.blocks.write();
        let old = blocks[index];
        if old == block {
            return None;
        }
        blocks[index] = block;
        Some(old)
    }

    /// Snapshot of the block array as wire bytes.
    pub fn block_bytes(&self) -> Vec<u8> {
        self.blocks.read().iter().map(|block| block.id()).collect()
    }

    /// Snapshot with extended blocks replaced by their classic fallbacks.
    pub fn fallback_bytes(&self) -> Vec<u8> {
        self.blocks
            .read()
            .iter()
            .map(|block| block.fallback().id())
            .collect()
    }
}
