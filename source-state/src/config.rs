//! Configuration for the synchronization engine

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Configuration for [`crate::SyncEngine`]
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval at which the position estimate is republished while playing
    /// Default: 100 milliseconds
    pub tick_interval: Duration,

    /// How long a seek counts as "playing" without other confirmation
    /// Default: 10 seconds
    pub seek_grace_window: Duration,

    /// How long a playing flag in a metadata update counts as "playing"
    /// Default: 3 seconds
    pub playing_signal_window: Duration,

    /// How long the published position may stay unchanged while playing
    /// before the tick is considered stalled
    /// Default: 2 seconds
    pub stall_threshold: Duration,

    /// Consecutive tick restarts before the source is reported unresponsive
    /// Default: 3
    pub max_drift_restarts: u32,

    /// How long a source switch may stay unconfirmed
    /// Default: 15 seconds
    pub transition_timeout: Duration,

    /// Pull full state when an event conflicts with the local state machine
    /// Default: true
    pub resync_on_conflict: bool,

    /// Minimum spacing between conflict-triggered resyncs
    /// Default: 1 second
    pub resync_cooldown: Duration,

    /// Number of diagnostics retained
    /// Default: 32
    pub diagnostics_capacity: usize,

    /// Buffer size of the change broadcast channel
    /// Default: 256
    pub change_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            seek_grace_window: Duration::from_secs(10),
            playing_signal_window: Duration::from_secs(3),
            stall_threshold: Duration::from_secs(2),
            max_drift_restarts: 3,
            transition_timeout: Duration::from_secs(15),
            resync_on_conflict: true,
            resync_cooldown: Duration::from_secs(1),
            diagnostics_capacity: 32,
            change_buffer: 256,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighter cadence for foreground UIs
    pub fn responsive() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            stall_threshold: Duration::from_secs(1),
            transition_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Slower cadence for background or battery-constrained hosts
    pub fn low_power() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            stall_threshold: Duration::from_secs(5),
            change_buffer: 64,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(SyncError::Configuration(
                "Tick interval must be greater than 0".to_string(),
            ));
        }

        if self.stall_threshold <= self.tick_interval {
            return Err(SyncError::Configuration(
                "Stall threshold must be longer than the tick interval".to_string(),
            ));
        }

        if self.transition_timeout.is_zero() {
            return Err(SyncError::Configuration(
                "Transition timeout must be greater than 0".to_string(),
            ));
        }

        if self.diagnostics_capacity == 0 {
            return Err(SyncError::Configuration(
                "Diagnostics capacity must be greater than 0".to_string(),
            ));
        }

        if self.change_buffer == 0 {
            return Err(SyncError::Configuration(
                "Change buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = timeout;
        self
    }

    pub fn with_resync_on_conflict(mut self, enabled: bool) -> Self {
        self.resync_on_conflict = enabled;
        self
    }

    pub fn with_resync_cooldown(mut self, cooldown: Duration) -> Self {
        self.resync_cooldown = cooldown;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.seek_grace_window, Duration::from_secs(10));
        assert!(config.resync_on_conflict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SyncConfig::responsive().validate().is_ok());
        assert!(SyncConfig::low_power().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = SyncConfig::default().with_tick_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SyncConfig {
            stall_threshold: Duration::from_millis(100),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            diagnostics_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::Configuration(_))
        ));
    }
}
