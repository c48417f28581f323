use std::time::Duration;

/// Largest datagram a channel carries in one send or one receive.
pub const MAX_FRAME_SIZE: usize = 2048;

/// Controls receive thread behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Receive threads are named `<prefix>-<channel>`.
    pub receive_thread_name: String,
    /// Stack size for receive threads; `None` keeps the platform default.
    pub receive_thread_stack_size: Option<usize>,
    /// Pause after a failed read before reading again. Zero retries at once.
    pub read_error_backoff: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_thread_name: "iccom-rx".to_string(),
            receive_thread_stack_size: None,
            read_error_backoff: Duration::ZERO,
        }
    }
}
