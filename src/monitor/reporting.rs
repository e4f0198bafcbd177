//! Read-only diagnostic reporting over the attempt and validation stores

use crate::error::Result;
use crate::monitor::accuracy::AccuracyMetrics;
use crate::monitor::attempt::{AttemptStatus, ConversionAttempt};
use crate::monitor::ConversionMonitor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const RECENT_ERROR_LIMIT: usize = 20;

/// Errors recorded against one attempt, for the diagnostic report
#[derive(Debug, Clone, Serialize)]
pub struct AttemptErrorSummary {
    pub attempt_id: String,
    pub event: String,
    pub status: AttemptStatus,
    pub errors: Vec<String>,
}

/// Point-in-time snapshot of monitor internals for troubleshooting
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub metrics: AccuracyMetrics,
    /// Attempt count per lifecycle status
    pub status_counts: BTreeMap<String, usize>,
    pub active_attempts: usize,
    pub stored_validations: usize,
    /// Most recent attempts carrying errors, newest first
    pub recent_errors: Vec<AttemptErrorSummary>,
}

/// One on-demand comparison of tracked conversions against actual bookings
#[derive(Debug, Clone, Serialize)]
pub struct TrackingComparison {
    pub window_start: DateTime<Utc>,
    pub actual_bookings: u64,
    pub validated_conversions: u64,
    /// Bookings completed without a validated conversion in the window
    pub missing_conversions: u64,
    pub accuracy: f64,
    pub generated_at: DateTime<Utc>,
}

impl ConversionMonitor {
    /// Assemble a diagnostic snapshot; purely observational, touches nothing
    pub async fn diagnostic_report(&self) -> DiagnosticReport {
        let (status_counts, active_attempts, recent_errors) = {
            let attempts = self.attempts.read().await;
            let mut errored: Vec<&ConversionAttempt> =
                attempts.iter().filter(|a| !a.errors.is_empty()).collect();
            errored.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
            let recent = errored
                .into_iter()
                .take(RECENT_ERROR_LIMIT)
                .map(|a| AttemptErrorSummary {
                    attempt_id: a.id.clone(),
                    event: a.event.clone(),
                    status: a.status,
                    errors: a.errors.clone(),
                })
                .collect();
            (attempts.status_counts(), attempts.len(), recent)
        };
        let stored_validations = self.validations.read().await.len();
        let metrics = self.metrics.read().await.clone();

        DiagnosticReport {
            generated_at: Utc::now(),
            metrics,
            status_counts,
            active_attempts,
            stored_validations,
            recent_errors,
        }
    }

    /// Compare validated conversions against bookings the flow actually
    /// completed over the given window
    ///
    /// Unlike the periodic accuracy check this surfaces the booking-count
    /// error to the caller and leaves the stored metrics untouched.
    pub async fn compare_actual_vs_tracked(
        &self,
        window: chrono::Duration,
    ) -> Result<TrackingComparison> {
        let window_start = Utc::now() - window;
        let actual = self.booking.completed_bookings_since(window_start).await?;

        let validated = {
            let attempts = self.attempts.read().await;
            attempts
                .iter()
                .filter(|a| a.status == AttemptStatus::Validated && a.timestamp >= window_start)
                .count() as u64
        };

        let accuracy = if actual == 0 {
            1.0
        } else {
            (validated as f64 / actual as f64).min(1.0)
        };

        Ok(TrackingComparison {
            window_start,
            actual_bookings: actual,
            validated_conversions: validated,
            missing_conversions: actual.saturating_sub(validated),
            accuracy,
            generated_at: Utc::now(),
        })
    }
}
