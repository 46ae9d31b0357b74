//! Client-side movement rate limiting.

use std::time::Duration;

use mazenet_protocol::Direction;

/// Decides whether a held direction key produces a move intent.
///
/// A new direction always moves. Holding the same direction moves again
/// only once `interval` has passed since the last move.
#[derive(Debug, Clone)]
pub struct MoveLimiter {
    interval_ms: u64,
    last: Option<(Direction, u64)>,
}

impl MoveLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last: None,
        }
    }

    /// Returns `true` and records the move if it may be sent at
    /// `local_now` (milliseconds).
    pub fn try_move(&mut self, direction: Direction, local_now: u64) -> bool {
        let allowed = match self.last {
            None => true,
            Some((last_dir, _)) if last_dir != direction => true,
            Some((_, at)) => local_now.saturating_sub(at) >= self.interval_ms,
        };
        if allowed {
            self.last = Some((direction, local_now));
        }
        allowed
    }

    /// Forgets the last move, as when the key is released.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
