//! Conversion monitor orchestrator
//!
//! Tracks each conversion as an attempt record through a small state machine:
//! pre-validation, firing with retry/backoff, asynchronous post-fire
//! validation with a staleness deadline, accuracy accounting and alerting.
//! Tracking is observability, not a transactional dependency: no failure in
//! here ever propagates to the booking flow being measured.

pub mod accuracy;
pub mod alerts;
pub mod attempt;
pub mod bridge;
pub mod reporting;
pub mod validation;

use crate::collaborators::{BookingState, EnhancedConversion, TagDelivery};
use crate::config::MonitorConfig;
use crate::events::{Consent, ConversionData, ConversionEvent};
use accuracy::AccuracyMetrics;
use alerts::{Alert, AlertCallbackId, AlertRegistry};
use attempt::{AttemptStatus, AttemptStore, ConversionAttempt};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use validation::ValidationResult;

/// Result of one tracking call
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub success: bool,
    /// `None` only when the monitor is disabled and nothing was registered
    pub attempt_id: Option<String>,
    pub errors: Vec<String>,
}

/// Read-only snapshot of monitor state; everything is copied, nothing
/// references internal collections
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MonitoringStatus {
    pub initialized: bool,
    pub enabled: bool,
    pub metrics: AccuracyMetrics,
    pub active_attempts: usize,
    pub stored_validations: usize,
    pub alert_callbacks: usize,
}

/// Internal outcome of the firing loop
struct FireResult {
    success: bool,
    retries_used: u32,
    errors: Vec<String>,
}

/// Process-wide conversion monitor
///
/// Built once by the host's composition root with its collaborators injected;
/// shared as an `Arc`. `start()` spawns the periodic accuracy service.
///
/// Lock ordering where multiple stores are touched: attempts, then
/// validations, then metrics, then alerts.
pub struct ConversionMonitor {
    config: MonitorConfig,
    tag: Arc<dyn TagDelivery>,
    enhanced: Arc<dyn EnhancedConversion>,
    booking: Arc<dyn BookingState>,
    attempts: RwLock<AttemptStore>,
    validations: RwLock<HashMap<String, ValidationResult>>,
    metrics: RwLock<AccuracyMetrics>,
    alerts: RwLock<AlertRegistry>,
    initialized: bool,
    started: AtomicBool,
}

impl ConversionMonitor {
    pub fn new(
        config: MonitorConfig,
        tag: Arc<dyn TagDelivery>,
        enhanced: Arc<dyn EnhancedConversion>,
        booking: Arc<dyn BookingState>,
    ) -> Arc<Self> {
        info!(
            enabled = config.enabled,
            max_retries = config.max_retries,
            "Conversion monitor initialized"
        );
        Arc::new(Self {
            config,
            tag,
            enhanced,
            booking,
            attempts: RwLock::new(AttemptStore::default()),
            validations: RwLock::new(HashMap::new()),
            metrics: RwLock::new(AccuracyMetrics::default()),
            alerts: RwLock::new(AlertRegistry::default()),
            initialized: true,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Track one conversion attempt: register, pre-validate, fire with retry,
    /// schedule post-fire validation
    ///
    /// Returns as soon as firing settles; validation runs asynchronously.
    /// Every call registers an attempt and counts toward `total_attempts`,
    /// including precondition failures.
    pub async fn track_conversion(self: &Arc<Self>, data: ConversionData) -> TrackOutcome {
        if !self.config.enabled {
            debug!("Monitor disabled; passing conversion through untracked");
            return TrackOutcome {
                success: true,
                attempt_id: None,
                errors: Vec::new(),
            };
        }

        let event = data.event();
        let attempt = ConversionAttempt::new(event.as_str(), Some(data.clone()));
        let attempt_id = attempt.id.clone();
        self.register_attempt(attempt).await;

        debug!(attempt_id = %attempt_id, event = %event, "Tracking conversion attempt");

        let precondition_errors = data.precondition_errors();
        if !precondition_errors.is_empty() {
            warn!(
                attempt_id = %attempt_id,
                event = %event,
                errors = ?precondition_errors,
                "Conversion failed pre-validation"
            );
            self.reject_attempt(&attempt_id, &precondition_errors).await;
            return TrackOutcome {
                success: false,
                attempt_id: Some(attempt_id),
                errors: precondition_errors,
            };
        }

        // Firing runs in its own task so a panicking collaborator surfaces as
        // a join error instead of unwinding into the caller.
        let fire_task = {
            let monitor = Arc::clone(self);
            let data = data.clone();
            let id = attempt_id.clone();
            tokio::spawn(async move { monitor.fire_with_retry(&data, &id).await })
        };

        match fire_task.await {
            Ok(outcome) if outcome.success => {
                {
                    let mut attempts = self.attempts.write().await;
                    if let Some(attempt) = attempts.get_mut(&attempt_id) {
                        attempt.transition(AttemptStatus::Fired);
                    }
                }
                info!(
                    attempt_id = %attempt_id,
                    event = %event,
                    retries = outcome.retries_used,
                    "Conversion fired; validation scheduled"
                );
                self.schedule_validation(attempt_id.clone());
                TrackOutcome {
                    success: true,
                    attempt_id: Some(attempt_id),
                    errors: Vec::new(),
                }
            }
            Ok(outcome) => {
                warn!(
                    attempt_id = %attempt_id,
                    event = %event,
                    errors = ?outcome.errors,
                    "Conversion firing failed"
                );
                {
                    let mut attempts = self.attempts.write().await;
                    if let Some(attempt) = attempts.get_mut(&attempt_id) {
                        for e in &outcome.errors {
                            attempt.record_error(e.clone());
                        }
                        attempt.transition(AttemptStatus::FiringFailed);
                    }
                }
                self.metrics.write().await.failed_firings += 1;
                TrackOutcome {
                    success: false,
                    attempt_id: Some(attempt_id),
                    errors: outcome.errors,
                }
            }
            Err(join_error) => {
                let message = format!("Unexpected tracking failure: {}", join_error);
                error!(attempt_id = %attempt_id, event = %event, "{}", message);
                {
                    let mut attempts = self.attempts.write().await;
                    if let Some(attempt) = attempts.get_mut(&attempt_id) {
                        attempt.record_error(message.clone());
                        attempt.transition(AttemptStatus::Error);
                    }
                }
                self.metrics.write().await.failed_firings += 1;
                TrackOutcome {
                    success: false,
                    attempt_id: Some(attempt_id),
                    errors: vec![message],
                }
            }
        }
    }

    /// Track an untyped conversion payload (booking-flow bridge path)
    ///
    /// Payloads naming an unrecognized event kind are still registered and
    /// counted; they terminate at `validation_failed` without firing.
    pub async fn track_raw(self: &Arc<Self>, payload: serde_json::Value) -> TrackOutcome {
        if !self.config.enabled {
            return TrackOutcome {
                success: true,
                attempt_id: None,
                errors: Vec::new(),
            };
        }

        match serde_json::from_value::<ConversionData>(payload.clone()) {
            Ok(data) => self.track_conversion(data).await,
            Err(parse_err) => {
                let name = payload
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<missing>")
                    .to_string();
                let message = if ConversionEvent::parse(&name).is_some() {
                    format!("Malformed conversion payload: {}", parse_err)
                } else {
                    format!("Invalid event type: {}", name)
                };
                warn!(event = %name, "{}", message);

                let attempt = ConversionAttempt::new(name, None);
                let attempt_id = attempt.id.clone();
                self.register_attempt(attempt).await;
                self.reject_attempt(&attempt_id, std::slice::from_ref(&message))
                    .await;
                TrackOutcome {
                    success: false,
                    attempt_id: Some(attempt_id),
                    errors: vec![message],
                }
            }
        }
    }

    /// Run the three post-fire validation checks for an attempt and record
    /// the verdict
    ///
    /// Idempotent: once an attempt carries a validation result, later calls
    /// return the stored result. Unknown attempt ids yield an all-invalid
    /// result, never an error.
    pub async fn validate_conversion_firing(&self, attempt_id: &str) -> ValidationResult {
        // Snapshot under a read lock; collaborator calls run without holding it.
        let snapshot = {
            let attempts = self.attempts.read().await;
            attempts
                .get(attempt_id)
                .map(|a| (a.event.clone(), a.data.clone(), a.validation_result.clone()))
        };

        let (event_name, data, existing) = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                debug!(attempt_id = %attempt_id, "Validation requested for unknown attempt");
                return ValidationResult::invalid("Conversion attempt not found");
            }
        };

        if let Some(result) = existing {
            debug!(attempt_id = %attempt_id, "Attempt already validated; returning stored result");
            return result;
        }

        let result = match ConversionEvent::parse(&event_name) {
            Some(event) => {
                let gtm = validation::check_tag_firing(self.tag.as_ref(), event).await;
                let booking = validation::check_booking_state(self.booking.as_ref(), event).await;
                let enhanced =
                    validation::check_enhanced(self.enhanced.as_ref(), data.as_ref()).await;
                ValidationResult::combine(gtm, booking, enhanced)
            }
            None => ValidationResult::invalid(format!("Invalid event type: {}", event_name)),
        };

        self.record_validation(attempt_id, result.clone()).await;
        result
    }

    /// Register an alert callback; returns the handle used for removal
    pub async fn add_alert_callback(
        &self,
        callback: impl Fn(&Alert) + Send + Sync + 'static,
    ) -> AlertCallbackId {
        self.alerts.write().await.add(callback)
    }

    /// Remove a previously registered alert callback
    pub async fn remove_alert_callback(&self, id: AlertCallbackId) -> bool {
        self.alerts.write().await.remove(id)
    }

    /// Read-only snapshot of monitor state
    pub async fn monitoring_status(&self) -> MonitoringStatus {
        let active_attempts = self.attempts.read().await.len();
        let stored_validations = self.validations.read().await.len();
        let metrics = self.metrics.read().await.clone();
        let alert_callbacks = self.alerts.read().await.len();

        MonitoringStatus {
            initialized: self.initialized,
            enabled: self.config.enabled,
            metrics,
            active_attempts,
            stored_validations,
            alert_callbacks,
        }
    }

    /// Copy of one attempt record, if present
    pub async fn attempt_snapshot(&self, attempt_id: &str) -> Option<ConversionAttempt> {
        self.attempts.read().await.get(attempt_id).cloned()
    }

    async fn register_attempt(&self, attempt: ConversionAttempt) {
        {
            let mut attempts = self.attempts.write().await;
            attempts.insert(attempt);
            let pruned = attempts.prune_terminal(self.config.max_stored_attempts);
            if !pruned.is_empty() {
                debug!(count = pruned.len(), "Pruned oldest terminal attempts");
                let mut validations = self.validations.write().await;
                for id in &pruned {
                    validations.remove(id);
                }
            }
        }
        self.metrics.write().await.total_attempts += 1;
    }

    async fn reject_attempt(&self, attempt_id: &str, errors: &[String]) {
        {
            let mut attempts = self.attempts.write().await;
            if let Some(attempt) = attempts.get_mut(attempt_id) {
                for e in errors {
                    attempt.record_error(e.clone());
                }
                attempt.transition(AttemptStatus::ValidationFailed);
            }
        }
        self.metrics.write().await.validation_errors += 1;
    }

    /// Fire a conversion, retrying with linear backoff
    ///
    /// The retry index is recorded on the attempt before each firing. The
    /// first truthy result short-circuits; a collaborator error on the final
    /// attempt carries that message, an exhausted budget without one reports
    /// all retries failed.
    async fn fire_with_retry(&self, data: &ConversionData, attempt_id: &str) -> FireResult {
        let max_retries = self.config.max_retries.max(1);

        for retry in 0..max_retries {
            {
                let mut attempts = self.attempts.write().await;
                if let Some(attempt) = attempts.get_mut(attempt_id) {
                    attempt.retry_count = retry;
                }
            }

            match self.fire_once(data).await {
                Ok(true) => {
                    debug!(attempt_id = %attempt_id, retry, "Conversion tag delivered");
                    return FireResult {
                        success: true,
                        retries_used: retry,
                        errors: Vec::new(),
                    };
                }
                Ok(false) => {
                    debug!(attempt_id = %attempt_id, retry, "Tag delivery reported no result");
                }
                Err(e) => {
                    warn!(
                        attempt_id = %attempt_id,
                        retry,
                        error = %e,
                        "Conversion firing attempt failed"
                    );
                    if retry + 1 == max_retries {
                        return FireResult {
                            success: false,
                            retries_used: retry,
                            errors: vec![e.to_string()],
                        };
                    }
                }
            }

            if retry + 1 < max_retries {
                let backoff = self.config.retry_delay() * (retry + 1);
                debug!(
                    attempt_id = %attempt_id,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backing off before retry"
                );
                sleep(backoff).await;
            }
        }

        FireResult {
            success: false,
            retries_used: max_retries - 1,
            errors: vec!["All retry attempts failed".to_string()],
        }
    }

    /// One firing: purchases carrying user data go through the enhanced path
    /// when it yields a payload, everything else through plain tag delivery
    async fn fire_once(&self, data: &ConversionData) -> crate::Result<bool> {
        if let ConversionData::Purchase {
            user_data: Some(user_data),
            ..
        } = data
        {
            let consent = Consent::granted();
            if let Some(payload) = self
                .enhanced
                .prepare_enhanced_conversion(data, user_data, &consent)
                .await?
            {
                return self.enhanced.track_enhanced_conversion(&payload).await;
            }
            debug!("No enhanced payload produced; falling back to plain tag delivery");
        }

        self.tag.track_conversion(data.event(), data).await
    }

    /// Schedule the two independent post-fire timers: the validation pass and
    /// the staleness deadline
    fn schedule_validation(self: &Arc<Self>, attempt_id: String) {
        let delay = self.config.validation_delay();
        let timeout = self.config.validation_timeout();

        let monitor = Arc::clone(self);
        let id = attempt_id.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            monitor.validate_conversion_firing(&id).await;
        });

        // Safety net only: flags staleness, never cancels in-flight validation.
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            sleep(timeout).await;
            monitor.flag_validation_timeout(&attempt_id).await;
        });
    }

    async fn flag_validation_timeout(&self, attempt_id: &str) {
        let mut attempts = self.attempts.write().await;
        if let Some(attempt) = attempts.get_mut(attempt_id) {
            // Status is read here, not at schedule time; once validated this
            // becomes a no-op.
            if attempt.status == AttemptStatus::Fired {
                warn!(
                    attempt_id = %attempt_id,
                    timeout_ms = self.config.validation_timeout_ms,
                    "Conversion validation timed out"
                );
                attempt.record_error(format!(
                    "Conversion validation timed out after {}ms",
                    self.config.validation_timeout_ms
                ));
                attempt.transition(AttemptStatus::ValidationTimeout);
            }
        }
    }

    async fn record_validation(&self, attempt_id: &str, result: ValidationResult) {
        let mut became_valid = false;
        {
            let mut attempts = self.attempts.write().await;
            if let Some(attempt) = attempts.get_mut(attempt_id) {
                if attempt.validation_result.is_none() {
                    attempt.validation_result = Some(result.clone());
                    if result.is_valid {
                        if attempt.transition(AttemptStatus::Validated) {
                            became_valid = true;
                        }
                        debug!(attempt_id = %attempt_id, "Conversion validated");
                    } else if !attempt.status.is_terminal() {
                        for e in &result.overall_errors {
                            attempt.record_error(e.clone());
                        }
                        attempt.transition(AttemptStatus::ValidationFailed);
                        warn!(
                            attempt_id = %attempt_id,
                            errors = ?result.overall_errors,
                            "Conversion validation failed"
                        );
                    }
                }
            }
        }
        self.validations
            .write()
            .await
            .insert(attempt_id.to_string(), result);
        if became_valid {
            self.metrics.write().await.successful_firings += 1;
        }
    }
}
