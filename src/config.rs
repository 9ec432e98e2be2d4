//! Configuration types for sources, sinks and the bridge.

use std::time::Duration;

/// Environment variable naming the capture device when none is given.
pub const INPUT_DEVICE_ENV: &str = "AUDIO_RELAY_INPUT_DEVICE";

/// Environment variable naming the playback device when none is given.
pub const OUTPUT_DEVICE_ENV: &str = "AUDIO_RELAY_OUTPUT_DEVICE";

/// Which physical device a capture or playback stream should open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// The platform's default device for the direction.
    #[default]
    SystemDefault,
    /// A device matched by name.
    ByName(String),
}

impl DeviceSelection {
    /// Selects a device by name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self::ByName(name.into())
    }

    /// Resolves an optional explicit choice for capture.
    ///
    /// An explicit name wins, then [`INPUT_DEVICE_ENV`], then the system default.
    pub fn input(explicit: Option<&str>) -> Self {
        Self::resolve(explicit, std::env::var(INPUT_DEVICE_ENV).ok())
    }

    /// Resolves an optional explicit choice for playback.
    ///
    /// An explicit name wins, then [`OUTPUT_DEVICE_ENV`], then the system default.
    pub fn output(explicit: Option<&str>) -> Self {
        Self::resolve(explicit, std::env::var(OUTPUT_DEVICE_ENV).ok())
    }

    fn resolve(explicit: Option<&str>, env: Option<String>) -> Self {
        match explicit {
            Some(name) => Self::by_name(name),
            None => match env {
                Some(name) if !name.trim().is_empty() => Self::ByName(name.trim().to_string()),
                _ => Self::SystemDefault,
            },
        }
    }
}

/// Tunables shared by sources, sinks and the scheduler bridge.
///
/// Use [`StreamConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use audio_relay::StreamConfig;
/// use std::time::Duration;
///
/// let config = StreamConfig {
///     buffer_capacity: 8,
///     push_timeout: Duration::from_millis(50),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Frames per chunk produced by capture and TCP sources.
    ///
    /// Default: 1024
    pub chunk_frames: usize,

    /// Maximum chunks queued in a sink's buffer.
    ///
    /// Default: 32
    pub buffer_capacity: usize,

    /// How long a push may wait under `DropAfter` before the chunk is dropped.
    ///
    /// Default: 20ms
    pub push_timeout: Duration,

    /// How long a real-time callback waits for a bridged delivery to finish.
    ///
    /// Default: 10ms
    pub bridge_wait: Duration,

    /// Jobs the scheduler bridge can hold before rejecting submissions.
    ///
    /// Default: 16
    pub bridge_queue_depth: usize,

    /// How long `stop()` lets in-flight work drain before aborting it.
    ///
    /// Default: 1s
    pub shutdown_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            buffer_capacity: 32,
            push_timeout: Duration::from_millis(20),
            bridge_wait: Duration::from_millis(10),
            bridge_queue_depth: 16,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.chunk_frames, 1024);
        assert_eq!(config.buffer_capacity, 32);
        assert_eq!(config.push_timeout, Duration::from_millis(20));
        assert_eq!(config.bridge_wait, Duration::from_millis(10));
        assert_eq!(config.bridge_queue_depth, 16);
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_explicit_device_wins() {
        let sel = DeviceSelection::resolve(Some("USB Mic"), Some("Other".into()));
        assert_eq!(sel, DeviceSelection::by_name("USB Mic"));
    }

    #[test]
    fn test_env_device_used_when_no_explicit() {
        let sel = DeviceSelection::resolve(None, Some(" Headset ".into()));
        assert_eq!(sel, DeviceSelection::by_name("Headset"));
    }

    #[test]
    fn test_blank_env_falls_back_to_default() {
        assert_eq!(
            DeviceSelection::resolve(None, Some("  ".into())),
            DeviceSelection::SystemDefault
        );
        assert_eq!(DeviceSelection::resolve(None, None), DeviceSelection::SystemDefault);
    }
}
