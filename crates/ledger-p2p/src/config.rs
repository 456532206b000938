//! Peer configuration.

use crate::error::{PeerError, PeerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of inbound payloads buffered per channel.
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;

/// Largest accepted dispatch queue capacity. Larger values exceed what a
/// bounded tokio channel can hold.
pub const MAX_DISPATCH_QUEUE_CAPACITY: usize = 1 << 20;

/// Default interval between metrics reports, in seconds.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;

/// Default bound on waiting for channel processors during stop, in
/// milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Per-peer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Inbound payloads buffered per channel before the receive path blocks.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    /// Seconds between pending-send gauge updates.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    /// Milliseconds to wait for processors to exit after the quit signal.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_dispatch_queue_capacity() -> usize {
    DEFAULT_DISPATCH_QUEUE_CAPACITY
}

fn default_metrics_interval_secs() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECS
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

impl PeerConfig {
    /// Parse a `[peer]`-style TOML fragment. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> PeerResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PeerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the peer cannot run with.
    pub fn validate(&self) -> PeerResult<()> {
        if self.dispatch_queue_capacity == 0 {
            return Err(PeerError::InvalidConfig(
                "dispatch_queue_capacity must be at least 1".into(),
            ));
        }
        if self.dispatch_queue_capacity > MAX_DISPATCH_QUEUE_CAPACITY {
            return Err(PeerError::InvalidConfig(format!(
                "dispatch_queue_capacity must be at most {}",
                MAX_DISPATCH_QUEUE_CAPACITY
            )));
        }
        if self.metrics_interval_secs == 0 {
            return Err(PeerError::InvalidConfig(
                "metrics_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.dispatch_queue_capacity, 256);
        assert_eq!(config.metrics_interval(), Duration::from_secs(10));
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = PeerConfig::from_toml_str("dispatch_queue_capacity = 16").unwrap();
        assert_eq!(config.dispatch_queue_capacity, 16);
        assert_eq!(config.metrics_interval_secs, DEFAULT_METRICS_INTERVAL_SECS);
        assert_eq!(config.stop_timeout_ms, DEFAULT_STOP_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PeerConfig::from_toml_str("dispatch_queue_capacity = 0"),
            Err(PeerError::InvalidConfig(_))
        ));
        assert!(matches!(
            PeerConfig::from_toml_str("metrics_interval_secs = 0"),
            Err(PeerError::InvalidConfig(_))
        ));
        assert!(matches!(
            PeerConfig::from_toml_str("dispatch_queue_capacity = \"lots\""),
            Err(PeerError::InvalidConfig(_))
        ));
        assert!(matches!(
            PeerConfig::from_toml_str("dispatch_queue_capacity = 1048577"),
            Err(PeerError::InvalidConfig(_))
        ));
        let huge = PeerConfig {
            dispatch_queue_capacity: usize::MAX,
            ..PeerConfig::default()
        };
        assert!(matches!(huge.validate(), Err(PeerError::InvalidConfig(_))));
    }

    #[test]
    fn test_max_capacity_accepted() {
        let config = PeerConfig {
            dispatch_queue_capacity: MAX_DISPATCH_QUEUE_CAPACITY,
            ..PeerConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
