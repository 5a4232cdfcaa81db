use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Peer is alive, send a probe.
    Probe,
    /// Peer has been silent past the timeout.
    Expired { silent_for: Duration },
}

/// Tracks the last inbound activity on a connection.
#[derive(Debug, Clone)]
pub struct Liveness {
    timeout: Duration,
    last_activity: Instant,
}

impl Liveness {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_activity: now,
        }
    }

    /// Record inbound activity. Never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn check(&self, now: Instant) -> Pulse {
        let silent_for = self.silent_for(now);
        if silent_for > self.timeout {
            Pulse::Expired { silent_for }
        } else {
            Pulse::Probe
        }
    }
}
