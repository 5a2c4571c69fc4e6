//! Server configuration.
//!
//! Every field has a default, so a JSON file only needs to mention the
//! settings it changes. Command-line flags in `main.rs` override the file.

use serde::Deserialize;
use shared::Block;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Feature toggles read by the plant physics on every rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub plants: bool,
    pub grass: bool,
    pub trees: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            plants: true,
            grass: true,
            trees: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_name: String,
    pub motd: String,
    pub max_players: usize,

    pub verify_names: bool,
    pub use_whitelist: bool,
    pub ops_file: Option<PathBuf>,
    pub whitelist_file: Option<PathBuf>,

    pub reveal_ops: bool,
    pub op_color: String,

    /// Serve extended block types to clients whose handshake advertises
    /// protocol extensions. Other clients always get classic fallbacks.
    pub custom_blocks: bool,

    pub limit_click_distance: bool,
    pub op_limit_click_distance: bool,
    pub limit_click_rate: bool,
    pub op_limit_click_rate: bool,
    pub limit_chat_rate: bool,
    pub op_limit_chat_rate: bool,

    pub allow_water_blocks: bool,
    pub op_allow_water_blocks: bool,
    pub allow_lava_blocks: bool,
    pub op_allow_lava_blocks: bool,
    pub allow_grass_blocks: bool,
    pub op_allow_grass_blocks: bool,
    pub allow_solid_blocks: bool,
    pub op_allow_solid_blocks: bool,

    /// Block types only sessions allowed to use solid blocks may delete.
    pub protected_blocks: Vec<Block>,

    pub physics: PhysicsConfig,
    pub tick_interval_ms: u64,

    pub map_width: i16,
    pub map_length: i16,
    pub map_height: i16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "Block Grid Server".to_string(),
            motd: "Welcome to the server!".to_string(),
            max_players: 20,
            verify_names: true,
            use_whitelist: false,
            ops_file: None,
            whitelist_file: None,
            reveal_ops: true,
            op_color: "&C".to_string(),
            custom_blocks: false,
            limit_click_distance: true,
            op_limit_click_distance: false,
            limit_click_rate: true,
            op_limit_click_rate: false,
            limit_chat_rate: true,
            op_limit_chat_rate: false,
            allow_water_blocks: false,
            op_allow_water_blocks: true,
            allow_lava_blocks: false,
            op_allow_lava_blocks: true,
            allow_grass_blocks: false,
            op_allow_grass_blocks: true,
            allow_solid_blocks: false,
            op_allow_solid_blocks: true,
            protected_blocks: vec![Block::Admincrete],
            physics: PhysicsConfig::default(),
            tick_interval_ms: 50,
            map_width: 128,
            map_length: 128,
            map_height: 64,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn can_use_water(&self, is_op: bool) -> bool {
        self.allow_water_blocks || (self.op_allow_water_blocks && is_op)
    }

    pub fn can_use_lava(&self, is_op: bool) -> bool {
        self.allow_lava_blocks || (self.op_allow_lava_blocks && is_op)
    }

    pub fn can_use_grass(&self, is_op: bool) -> bool {
        self.allow_grass_blocks || (self.op_allow_grass_blocks && is_op)
    }

    pub fn can_use_solid(&self, is_op: bool) -> bool {
        self.allow_solid_blocks || (self.op_allow_solid_blocks && is_op)
    }

    pub fn limits_click_distance(&self, is_op: bool) -> bool {
        if is_op {
            self.op_limit_click_distance
        } else {
            self.limit_click_distance
        }
    }

    pub fn limits_click_rate(&self, is_op: bool) -> bool {
        if is_op {
            self.op_limit_click_rate
        } else {
            self.limit_click_rate
        }
    }

    pub fn limits_chat_rate(&self, is_op: bool) -> bool {
        if is_op {
            self.op_limit_chat_rate
        } else {
            self.limit_chat_rate
        }
    }
}
