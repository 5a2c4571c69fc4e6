//! Tick-driven plant physics.
//!
//! Each tick visits every `TRAVERSE_STEP`-th cell of the map, starting from a
//! phase taken from a shuffled permutation of `0..TRAVERSE_STEP`. The
//! permutation is regenerated whenever the tick counter enters a new aligned
//! window `[k * TRAVERSE_STEP, (k + 1) * TRAVERSE_STEP)`, so every cell is
//! visited exactly once per window.
//!
//! Plant rules consult a per-column shadow table that is kept current from
//! map edit notifications. A cell is lit when the column's shadow height is
//! at or below it.

use crate::config::PhysicsConfig;
use crate::map::{BlockChange, BlockListener, Map};
use crate::trees::TreeGrower;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::Block;
use std::sync::Arc;

/// Stride between cells visited in one tick, and the length of a full pass.
pub const TRAVERSE_STEP: usize = 200;

/// Whether `block` stops light from reaching the cells below it.
pub fn casts_shadow(block: Block) -> bool {
    !matches!(
        block,
        Block::Air
            | Block::Glass
            | Block::Leaves
            | Block::YellowFlower
            | Block::RedFlower
            | Block::BrownMushroom
            | Block::RedMushroom
            | Block::Sapling
            | Block::Rope
            | Block::Fire
    )
}

/// Shuffled start phases, one per tick of the current window.
#[derive(Debug, Clone)]
pub struct TraversalPattern {
    phases: Vec<usize>,
    window: Option<u64>,
}

impl Default for TraversalPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl TraversalPattern {
    pub fn new() -> Self {
        Self {
            phases: (0..TRAVERSE_STEP).collect(),
            window: None,
        }
    }

    /// Start phase for `tick`, reshuffling first if `tick` opened a new window.
    pub fn phase<R: Rng + ?Sized>(&mut self, tick: u64, rng: &mut R) -> usize {
        let window = tick / TRAVERSE_STEP as u64;
        if self.window != Some(window) {
            self.phases.shuffle(rng);
            self.window = Some(window);
        }
        self.phases[(tick % TRAVERSE_STEP as u64) as usize]
    }
}

/// Lowest lit z per (x, y) column.
#[derive(Debug, Clone)]
pub struct ShadowTable {
    width: i32,
    length: i32,
    heights: Vec<i32>,
}

impl ShadowTable {
    /// Scans every column of `map` from the top.
    pub fn build(map: &Map) -> Self {
        let mut table = Self {
            width: map.width(),
            length: map.length(),
            heights: vec![0; map.width() as usize * map.length() as usize],
        };
        for y in 0..map.length() {
            for x in 0..map.width() {
                table.update(map, x, y, map.height() - 1);
            }
        }
        table
    }

    fn slot(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.length {
            return None;
        }
        Some((y * self.width + x) as usize)
    }

    pub fn height(&self, x: i32, y: i32) -> Option<i32> {
        self.slot(x, y).map(|slot| self.heights[slot])
    }

    pub fn is_lit(&self, x: i32, y: i32, z: i32) -> bool {
        self.height(x, y).is_some_and(|shadow| shadow <= z)
    }

    /// Recomputes a column after an edit at `top_z`. Edits below the current
    /// shadow cannot change it.
    pub fn update(&mut self, map: &Map, x: i32, y: i32, top_z: i32) {
        let Some(slot) = self.slot(x, y) else {
            return;
        };
        if top_z < self.heights[slot] {
            return;
        }
        self.heights[slot] = (0..=top_z)
            .rev()
            .find(|&z| map.get_block(x, y, z).is_some_and(casts_shadow))
            .unwrap_or(0);
    }
}

struct TickState {
    rng: StdRng,
    pattern: TraversalPattern,
}

/// The plant simulation for one map. Register it as a listener on that map
/// (see [`PlantPhysics::attach`]) so the shadow table follows edits.
pub struct PlantPhysics {
    config: PhysicsConfig,
    trees: Arc<dyn TreeGrower>,
    state: Mutex<TickState>,
    // never held across a map edit, the edit calls back into on_block_changed
    shadows: Mutex<ShadowTable>,
}

impl PlantPhysics {
    pub fn new(map: &Map, config: PhysicsConfig, trees: Arc<dyn TreeGrower>) -> Self {
        Self::with_rng(map, config, trees, StdRng::from_entropy())
    }

    pub fn with_seed(
        map: &Map,
        config: PhysicsConfig,
        trees: Arc<dyn TreeGrower>,
        seed: u64,
    ) -> Self {
        Self::with_rng(map, config, trees, StdRng::seed_from_u64(seed))
    }

    fn with_rng(map: &Map, config: PhysicsConfig, trees: Arc<dyn TreeGrower>, rng: StdRng) -> Self {
        Self {
            config,
            trees,
            state: Mutex::new(TickState {
                rng,
                pattern: TraversalPattern::new(),
            }),
            shadows: Mutex::new(ShadowTable::build(map)),
        }
    }

    /// Builds the physics for `map` and registers it for edit notifications.
    pub fn attach(map: &Map, config: PhysicsConfig, trees: Arc<dyn TreeGrower>) -> Arc<Self> {
        let physics = Arc::new(Self::new(map, config, trees));
        map.add_listener(physics.clone());
        physics
    }

    pub fn is_lit(&self, x: i32, y: i32, z: i32) -> bool {
        self.shadows.lock().is_lit(x, y, z)
    }

    pub fn shadow_height(&self, x: i32, y: i32) -> Option<i32> {
        self.shadows.lock().height(x, y)
    }

    /// Runs one simulation step over `map`.
    pub fn tick(&self, map: &Map, tick: u64) {
        let mut state = self.state.lock();
        let TickState { rng, pattern } = &mut *state;
        let phase = pattern.phase(tick, rng);

        for index in (phase..map.volume()).step_by(TRAVERSE_STEP) {
            let Some(block) = map.block_at(index) else {
                break;
            };
            let (x, y, z) = map.coords(index);
            match block {
                Block::Grass => self.trigger_grass(map, rng, x, y, z),
                Block::YellowFlower | Block::RedFlower => self.trigger_flower(map, x, y, z),
                Block::BrownMushroom | Block::RedMushroom => self.trigger_mushroom(map, x, y, z),
                Block::Sapling => self.trigger_sapling(map, rng, x, y, z),
                _ => {}
            }
        }
    }

    fn trigger_mushroom(&self, map: &Map, x: i32, y: i32, z: i32) {
        if !self.config.plants {
            return;
        }
        let under = map.get_block(x, y, z - 1);
        let on_rock = matches!(under, Some(Block::Stone | Block::Gravel | Block::Cobble));
        if !on_rock || self.is_lit(x, y, z) {
            map.set_block(None, x, y, z, Block::Air);
        }
    }

    fn on_soil_in_light(&self, map: &Map, x: i32, y: i32, z: i32) -> bool {
        let under = map.get_block(x, y, z - 1);
        matches!(under, Some(Block::Grass | Block::Dirt)) && self.is_lit(x, y, z)
    }

    fn trigger_flower(&self, map: &Map, x: i32, y: i32, z: i32) {
        if !self.config.plants {
            return;
        }
        if !self.on_soil_in_light(map, x, y, z) {
            map.set_block(None, x, y, z, Block::Air);
        }
    }

    fn trigger_grass(&self, map: &Map, rng: &mut StdRng, x: i32, y: i32, z: i32) {
        if !self.config.grass {
            return;
        }
        if rng.gen_range(0..4) != 0 {
            return;
        }
        if !self.is_lit(x, y, z) {
            map.set_block(None, x, y, z, Block::Dirt);
            return;
        }
        for _ in 0..4 {
            let x2 = rng.gen_range(x - 1..=x + 1);
            let y2 = rng.gen_range(y - 1..=y + 1);
            let z2 = rng.gen_range(z - 2..=z + 2);
            if map.in_bounds(x2, y2, z2)
                && self.is_lit(x2, y2, z2)
                && map.get_block(x2, y2, z2) == Some(Block::Dirt)
            {
                map.set_block(None, x2, y2, z2, Block::Grass);
                return;
            }
        }
    }

    fn trigger_sapling(&self, map: &Map, rng: &mut StdRng, x: i32, y: i32, z: i32) {
        if !self.config.plants {
            return;
        }
        if !self.on_soil_in_light(map, x, y, z) {
            map.set_block(None, x, y, z, Block::Air);
            return;
        }
        if self.config.trees && rng.gen_range(0..5) == 0 {
            map.set_block_silent(x, y, z, Block::Air);
            if !self.trees.grow(map, rng, x, y, z) {
                map.set_block_silent(x, y, z, Block::Sapling);
            }
        }
    }
}

impl BlockListener for PlantPhysics {
    fn on_block_changed(&self, map: &Map, change: &BlockChange) {
        self.shadows.lock().update(map, change.x, change.y, change.z);
    }
}
