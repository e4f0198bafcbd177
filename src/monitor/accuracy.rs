//! Accuracy accounting and the periodic accuracy check service

use crate::monitor::alerts::{Alert, AlertKind};
use crate::monitor::attempt::AttemptStatus;
use crate::monitor::ConversionMonitor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Running counters plus the latest accuracy verdict
///
/// Counter semantics: `total_attempts` covers every registered attempt,
/// including precondition rejections. `successful_firings` counts attempts
/// that reached `validated`, not merely `fired`. `validation_errors` counts
/// pre-validation rejections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    pub total_attempts: u64,
    pub successful_firings: u64,
    pub failed_firings: u64,
    pub validation_errors: u64,
    pub last_accuracy_check: DateTime<Utc>,
    pub current_accuracy: f64,
}

impl Default for AccuracyMetrics {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            successful_firings: 0,
            failed_firings: 0,
            validation_errors: 0,
            last_accuracy_check: Utc::now(),
            current_accuracy: 1.0,
        }
    }
}

impl ConversionMonitor {
    /// Spawn the periodic accuracy check service
    ///
    /// Idempotent; a second call is a no-op. Does nothing when the monitor is
    /// disabled. The spawned task runs for the life of the process.
    pub fn start(self: &Arc<Self>) {
        if !self.config().enabled {
            info!("Conversion monitor disabled; accuracy service not started");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Accuracy service already running");
            return;
        }

        info!(
            interval_secs = self.config().accuracy_check_interval_secs,
            "Starting accuracy check service"
        );

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(
                monitor.config().accuracy_check_interval_secs,
            ));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; consume it so the first check
            // runs one full interval after startup.
            timer.tick().await;

            loop {
                timer.tick().await;
                monitor.run_accuracy_check().await;
            }
        });
    }

    /// Compare validated attempts in the recent window against bookings the
    /// flow actually completed, updating metrics and alerting when accuracy
    /// falls below the threshold
    ///
    /// Best-effort: an unavailable booking count warns and skips the cycle
    /// without touching the metrics.
    pub async fn run_accuracy_check(&self) {
        let window = chrono::Duration::seconds(self.config().accuracy_window_secs as i64);
        let window_start = Utc::now() - window;

        let validated = {
            let attempts = self.attempts.read().await;
            attempts
                .iter()
                .filter(|a| a.status == AttemptStatus::Validated && a.timestamp >= window_start)
                .count() as u64
        };

        let actual = match self.booking.completed_bookings_since(window_start).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Accuracy check skipped: booking count unavailable");
                return;
            }
        };

        // No completed bookings means nothing could have been missed.
        let accuracy = if actual == 0 {
            1.0
        } else {
            (validated as f64 / actual as f64).min(1.0)
        };

        {
            let mut metrics = self.metrics.write().await;
            metrics.current_accuracy = accuracy;
            metrics.last_accuracy_check = Utc::now();
        }

        debug!(validated, actual, accuracy, "Accuracy check complete");

        let threshold = self.config().accuracy_threshold;
        if accuracy < threshold {
            warn!(
                accuracy,
                threshold, validated, actual, "Conversion tracking accuracy below threshold"
            );
            let alert = Alert {
                kind: AlertKind::LowAccuracy,
                message: format!(
                    "Conversion tracking accuracy {:.3} below threshold {:.2}",
                    accuracy, threshold
                ),
                accuracy,
                actual_bookings: actual,
                validated_conversions: validated,
                timestamp: Utc::now(),
            };
            self.alerts.read().await.dispatch(&alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_clean() {
        let metrics = AccuracyMetrics::default();
        assert_eq!(metrics.total_attempts, 0);
        assert_eq!(metrics.successful_firings, 0);
        assert_eq!(metrics.failed_firings, 0);
        assert_eq!(metrics.validation_errors, 0);
        assert_eq!(metrics.current_accuracy, 1.0);
    }
}
