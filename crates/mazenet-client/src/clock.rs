//! Client-side clock synchronization.
//!
//! The client and server each run their own monotonic millisecond clock.
//! The synchronizer keeps a single signed offset between them:
//!
//! ```text
//! server_time = local_time - offset
//! ```
//!
//! The offset is seeded from the welcome `ServerTime` message and refined
//! by `ClockPing` round trips. A round trip's estimate assumes the reply
//! spent half the round trip on the wire:
//!
//! ```text
//! message_time = observed_time + rtt / 2
//! predicted    = local_now - message_time
//! ```
//!
//! Estimates are never averaged. A new estimate replaces the offset only
//! when it differs from it by more than the correction threshold, so the
//! render clock doesn't jitter by a few milliseconds on every reply.

use std::collections::VecDeque;

use mazenet_protocol::ClockPing;

use crate::ClockConfig;

/// Pings remembered while waiting for their reply.
const MAX_IN_FLIGHT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// No offset yet; no server or render time available.
    Unsynced,
    Synced,
}

#[derive(Debug)]
pub struct ClockSynchronizer {
    config: ClockConfig,
    offset: Option<i64>,
    /// Render time at which the next ping is due, once synced.
    next_ping_at: Option<i64>,
    /// Local time of the last ping sent while unsynced.
    last_unsynced_ping: Option<u64>,
    /// `(sent_time, local send time)` of unanswered pings.
    in_flight: VecDeque<(u64, u64)>,
    corrections: u64,
}

impl ClockSynchronizer {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            offset: None,
            next_ping_at: None,
            last_unsynced_ping: None,
            in_flight: VecDeque::with_capacity(MAX_IN_FLIGHT),
            corrections: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        match self.offset {
            Some(_) => ClockState::Synced,
            None => ClockState::Unsynced,
        }
    }

    /// Current offset in milliseconds (`local - server`).
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Times the offset was replaced after the first sync.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn server_time(&self, local_now: u64) -> Option<i64> {
        self.offset.map(|offset| local_now as i64 - offset)
    }

    pub fn render_time(&self, local_now: u64) -> Option<i64> {
        self.server_time(local_now)
            .map(|t| t - self.config.render_lead_ms)
    }

    /// Advances the synchronizer. Returns a ping when one is due.
    ///
    /// Unsynced, a ping goes out at the first tick and then once per ping
    /// interval of local time. Synced, pings follow render time.
    pub fn on_tick(&mut self, local_now: u64) -> Option<ClockPing> {
        match self.render_time(local_now) {
            None => {
                let due = self.last_unsynced_ping.is_none_or(|last| {
                    local_now.saturating_sub(last) as i64 >= self.config.ping_interval_ms
                });
                if !due {
                    return None;
                }
                self.last_unsynced_ping = Some(local_now);
                Some(self.send_ping(local_now))
            }
            Some(render) => {
                if self.next_ping_at.is_some_and(|next| render < next) {
                    return None;
                }
                self.next_ping_at = Some(render + self.config.ping_interval_ms);
                Some(self.send_ping(local_now))
            }
        }
    }

    /// Builds a ping carrying the current server-time estimate in both
    /// fields, and remembers when it left.
    pub fn send_ping(&mut self, local_now: u64) -> ClockPing {
        let estimate = self
            .server_time(local_now)
            .unwrap_or(local_now as i64)
            .max(0) as u64;
        if self.in_flight.len() == MAX_IN_FLIGHT {
            self.in_flight.pop_front();
        }
        self.in_flight.push_back((estimate, local_now));
        ClockPing {
            sent_time: estimate,
            observed_time: estimate,
        }
    }

    /// Folds a ping reply into the offset. Returns `true` if the offset
    /// changed.
    ///
    /// Replies the server never stamped (`observed_time == sent_time`) and
    /// replies to pings this synchronizer doesn't remember are ignored.
    pub fn on_clock_reply(&mut self, local_now: u64, reply: &ClockPing) -> bool {
        if reply.observed_time == reply.sent_time {
            return false;
        }
        let Some(index) = self
            .in_flight
            .iter()
            .position(|(sent, _)| *sent == reply.sent_time)
        else {
            tracing::debug!(sent_time = reply.sent_time, "reply to unknown ping ignored");
            return false;
        };
        let Some((_, local_sent)) = self.in_flight.remove(index) else {
            return false;
        };

        let rtt = local_now.saturating_sub(local_sent);
        let message_time = reply.observed_time as i64 + (rtt / 2) as i64;
        let predicted = local_now as i64 - message_time;
        self.apply(predicted)
    }

    /// Seeds (or corrects) the offset from a one-way server timestamp.
    pub fn on_server_time(&mut self, local_now: u64, server_time: u64) -> bool {
        self.apply(local_now as i64 - server_time as i64)
    }

    fn apply(&mut self, predicted: i64) -> bool {
        match self.offset {
            None => {
                self.offset = Some(predicted);
                tracing::debug!(offset_ms = predicted, "clock synced");
                true
            }
            Some(current) if (predicted - current).abs() > self.config.correction_threshold_ms => {
                self.offset = Some(predicted);
                self.corrections += 1;
                tracing::debug!(
                    from_ms = current,
                    to_ms = predicted,
                    "clock offset corrected"
                );
                true
            }
            Some(_) => false,
        }
    }
}
