//! Server configuration.
//!
//! Loaded from a JSON file with `--config`, then overridden by CLI flags.
//! Every field is optional in the file; missing ones take their defaults.
//!
//! ```json
//! { "port": 7777, "tick_rate": 30, "width": 48, "height": 32 }
//! ```

use std::path::Path;
use std::time::Duration;

use mazenet_protocol::MapData;
use mazenet_tick::TickConfig;
use mazenet_world::WorldConfig;
use serde::{Deserialize, Serialize};

use crate::MazenetError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub bind: String,
    pub port: u16,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Map size in cells.
    pub width: u32,
    pub height: u32,
    /// How long a disconnected player's corpse stays, milliseconds.
    pub corpse_decay_ms: u64,
    /// How long a new connection may take to send its handshake,
    /// milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 7777,
            tick_rate: TickConfig::DEFAULT_TICK_RATE_HZ,
            width: 32,
            height: 24,
            corpse_decay_ms: 5_000,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Smallest map side: a wall on each edge and one floor cell between.
    pub const MIN_MAP_SIDE: u32 = 3;
    pub const MAX_MAP_SIDE: u32 = 1024;

    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MazenetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MazenetError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| MazenetError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `bind:port`, as handed to the transport.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn corpse_decay(&self) -> Duration {
        Duration::from_millis(self.corpse_decay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Checks the settings that can't be used as given.
    ///
    /// # Errors
    /// [`MazenetError::InvalidConfig`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), MazenetError> {
        let range = Self::MIN_MAP_SIDE..=Self::MAX_MAP_SIDE;
        if !range.contains(&self.width) || !range.contains(&self.height) {
            return Err(MazenetError::InvalidConfig(format!(
                "map size {}x{} outside {}..={} per side",
                self.width,
                self.height,
                Self::MIN_MAP_SIDE,
                Self::MAX_MAP_SIDE
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(MazenetError::InvalidConfig(
                "handshake timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The built-in map: a walled rectangle of the configured size.
    pub fn map(&self) -> MapData {
        MapData::walled(self.width, self.height)
    }

    pub fn world_config(&self) -> WorldConfig {
        WorldConfig::default()
            .with_tick_rate(self.tick_rate)
            .with_corpse_decay(self.corpse_decay())
            .with_map(self.map())
    }
}
