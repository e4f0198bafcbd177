//! Monitor configuration loading

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conversion monitor configuration
///
/// Defaults carry the production tuning; a TOML file can override any subset
/// of fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Enable conversion tracking (default: true)
    pub enabled: bool,

    /// Maximum firing attempts per conversion (default: 3)
    pub max_retries: u32,

    /// Base backoff between failed firing attempts in milliseconds
    /// (default: 2000ms, scaled linearly by attempt index)
    pub retry_delay_ms: u64,

    /// Delay before post-fire validation runs (default: 2000ms)
    pub validation_delay_ms: u64,

    /// Deadline after which an unvalidated attempt is flagged stale
    /// (default: 30000ms)
    pub validation_timeout_ms: u64,

    /// Periodic accuracy check interval in seconds (default: hourly)
    pub accuracy_check_interval_secs: u64,

    /// Window compared against actual bookings during accuracy checks
    /// (default: 3600s)
    pub accuracy_window_secs: u64,

    /// Accuracy below this ratio raises a low-accuracy alert (default: 0.95)
    pub accuracy_threshold: f64,

    /// Booking-flow event bus channel capacity (default: 256)
    pub event_bus_capacity: usize,

    /// Terminal attempts beyond this count are pruned oldest-first
    /// (default: 10000)
    pub max_stored_attempts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_delay_ms: 2000,
            validation_delay_ms: 2000,
            validation_timeout_ms: 30_000,
            accuracy_check_interval_secs: 3600,
            accuracy_window_secs: 3600,
            accuracy_threshold: 0.95,
            event_bus_capacity: 256,
            max_stored_attempts: 10_000,
        }
    }
}

impl MonitorConfig {
    /// Base backoff duration between failed firing attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay before the post-fire validation pass
    pub fn validation_delay(&self) -> Duration {
        Duration::from_millis(self.validation_delay_ms)
    }

    /// Validation staleness deadline
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// fields the file omits
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        if config.max_retries == 0 {
            return Err(Error::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.accuracy_threshold) {
            return Err(Error::Config(format!(
                "accuracy_threshold must be within 0.0..=1.0, got {}",
                config.accuracy_threshold
            )));
        }

        tracing::debug!(path = %path.display(), "Loaded monitor configuration");
        Ok(config)
    }
}
