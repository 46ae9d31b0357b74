//! Millisecond monotonic clock shared by both roles.

use std::time::Instant;

/// Milliseconds elapsed since an origin instant.
///
/// The server's clock starts with the server; every timestamp on the wire
/// is a reading of it. Clients keep their own, unrelated, instance and map
/// between the two through the clock offset.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(origin: Instant) -> Self {
        Self { origin }
    }

    pub fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
