//! Configuration for the streaming core.

use std::time::Duration;

/// Tunables of one streaming session.
///
/// The defaults are wire-visible behavior; tests shrink them to keep
/// timing-sensitive assertions fast.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long the stream may be quiet before an empty keepalive frame
    /// is emitted.
    pub heartbeat_interval: Duration,

    /// How long file content is batched before a partial frame is
    /// flushed.
    pub batch_window: Duration,

    /// Maximum payload bytes in a single frame.
    pub max_frame_size: usize,

    /// Capacity of the bounded frame channel between producer and the
    /// serve loop.
    pub frame_channel_capacity: usize,

    /// How often the directory is re-listed while waiting for the next
    /// rotated log segment.
    pub next_log_check: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            batch_window: Duration::from_millis(200),
            max_frame_size: 64 * 1024,
            frame_channel_capacity: 32,
            next_log_check: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    /// Sets the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the batch window.
    #[must_use]
    pub const fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the next-log poll interval.
    #[must_use]
    pub const fn with_next_log_check(mut self, interval: Duration) -> Self {
        self.next_log_check = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_behavior() {
        let config = StreamConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.batch_window, Duration::from_millis(200));
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert_eq!(config.frame_channel_capacity, 32);
        assert_eq!(config.next_log_check, Duration::from_millis(100));
    }

    #[test]
    fn builders_override_fields() {
        let config = StreamConfig::default()
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_batch_window(Duration::from_millis(10))
            .with_max_frame_size(128)
            .with_next_log_check(Duration::from_millis(5));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(config.batch_window, Duration::from_millis(10));
        assert_eq!(config.max_frame_size, 128);
        assert_eq!(config.next_log_check, Duration::from_millis(5));
    }
}
