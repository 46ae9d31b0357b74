//! Simulation configuration.

use std::time::Duration;

use mazenet_protocol::MapData;
use mazenet_tick::TickConfig;

#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Scheduler settings for the simulation loop.
    pub tick: TickConfig,
    /// How long a dead entity stays in the world before removal.
    pub corpse_decay: Duration,
    /// Starting health of a spawned player.
    pub player_health: u32,
    /// The maze every player walks in.
    pub map: MapData,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
            corpse_decay: Duration::from_secs(5),
            player_health: 3,
            map: MapData::walled(32, 24),
        }
    }
}

impl WorldConfig {
    pub fn with_map(mut self, map: MapData) -> Self {
        self.map = map;
        self
    }

    pub fn with_tick_rate(mut self, tick_rate_hz: u32) -> Self {
        self.tick.tick_rate_hz = tick_rate_hz;
        self
    }

    pub fn with_corpse_decay(mut self, decay: Duration) -> Self {
        self.corpse_decay = decay;
        self
    }
}
