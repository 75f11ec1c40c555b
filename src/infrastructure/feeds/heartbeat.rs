//! Heartbeat Liveness
//!
//! Ping/pong supervision for upstream feeds that stay silent between
//! market events. The connection loop owns the ping timer; this module
//! only tracks whether the upstream is still answering, so the check
//! needs no extra task or channel.

use std::time::{Duration, Instant};

/// Heartbeat timing for one upstream connection.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between outgoing pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the connection is declared dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks when the upstream was last heard from.
///
/// Any inbound frame counts as an answer; a dedicated pong is not
/// required. `is_stale` only reports true while a ping is outstanding,
/// so a feed that is quiet but was never pinged is not torn down.
#[derive(Debug)]
pub struct Liveness {
    last_heard: Instant,
    awaiting_pong: bool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Fresh tracker for a new connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_heard: Instant::now(),
            awaiting_pong: false,
        }
    }

    /// Record inbound traffic from the upstream.
    pub fn record_activity(&mut self) {
        self.last_heard = Instant::now();
        self.awaiting_pong = false;
    }

    /// Note that a ping went out and an answer is now owed.
    pub fn note_ping(&mut self) {
        self.awaiting_pong = true;
    }

    /// Whether an owed answer is overdue.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.awaiting_pong && self.last_heard.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overdue(by: Duration) -> Liveness {
        Liveness {
            last_heard: Instant::now()
                .checked_sub(by)
                .expect("instant in the past"),
            awaiting_pong: true,
        }
    }

    #[test]
    fn fresh_tracker_is_not_stale() {
        let liveness = Liveness::new();
        assert!(!liveness.is_stale(Duration::ZERO));
    }

    #[test]
    fn silence_without_outstanding_ping_is_not_stale() {
        let mut liveness = overdue(Duration::from_secs(60));
        liveness.awaiting_pong = false;
        assert!(!liveness.is_stale(Duration::from_secs(30)));
    }

    #[test]
    fn overdue_pong_is_stale() {
        let liveness = overdue(Duration::from_secs(60));
        assert!(liveness.is_stale(Duration::from_secs(30)));
        assert!(!liveness.is_stale(Duration::from_secs(120)));
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let mut liveness = overdue(Duration::from_secs(60));
        liveness.record_activity();
        assert!(!liveness.is_stale(Duration::from_secs(30)));

        liveness.note_ping();
        assert!(!liveness.is_stale(Duration::from_secs(30)));
    }
}
