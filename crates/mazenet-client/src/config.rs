//! Client configuration.

use std::time::Duration;

/// Clock synchronization settings. Times are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// A new offset estimate replaces the current one only if the two
    /// differ by more than this.
    pub correction_threshold_ms: i64,
    /// How far behind the estimated server time rendering runs.
    pub render_lead_ms: i64,
    /// Render time between two pings once synced.
    pub ping_interval_ms: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            correction_threshold_ms: 15,
            render_lead_ms: 200,
            ping_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub clock: ClockConfig,
    /// Minimum time between two moves in the same direction.
    pub move_interval: Duration,
    /// Period of the client's clock tick.
    pub tick_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            move_interval: Duration::from_millis(150),
            tick_interval: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn with_move_interval(mut self, interval: Duration) -> Self {
        self.move_interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }
}
