use std::time::Duration;

/// Timing and limits shared by both roles.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How often each side probes a live connection.
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is presumed dead.
    pub liveness_timeout: Duration,
    /// Pause between client reconnect attempts.
    pub reconnect_delay: Duration,
    /// Transient failures tolerated before a download gives up.
    pub max_reconnects: u32,
    /// Consecutive repair rounds without a new chunk before giving up.
    pub max_stalled_rounds: u32,
    /// Largest file a client will allocate a buffer for.
    pub max_file_size: u64,
    /// Request the file as soon as it is announced.
    pub auto_start: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            max_reconnects: 5,
            max_stalled_rounds: 8,
            max_file_size: 2 * 1024 * 1024 * 1024,
            auto_start: true,
        }
    }
}
