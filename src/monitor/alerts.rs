//! Alert callback registry
//!
//! Callbacks are invoked in registration order. A panicking callback is
//! isolated so the remaining callbacks still run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Alert categories emitted by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Tracked-and-validated conversions fell below the accuracy threshold
    /// against actual bookings
    LowAccuracy,
}

/// Alert delivered to registered callbacks
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// Accuracy ratio at the time of the alert
    pub accuracy: f64,
    /// Actual completed bookings in the checked window
    pub actual_bookings: u64,
    /// Validated conversions in the checked window
    pub validated_conversions: u64,
    pub timestamp: DateTime<Utc>,
}

/// Handle returned by callback registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertCallbackId(u64);

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Ordered collection of alert callbacks
#[derive(Default)]
pub struct AlertRegistry {
    next_id: u64,
    callbacks: Vec<(AlertCallbackId, AlertCallback)>,
}

impl AlertRegistry {
    pub fn add(&mut self, callback: impl Fn(&Alert) + Send + Sync + 'static) -> AlertCallbackId {
        let id = AlertCallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback; returns false when the id is unknown
    pub fn remove(&mut self, id: AlertCallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cb_id, _)| *cb_id != id);
        self.callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke every registered callback, isolating per-callback panics
    pub fn dispatch(&self, alert: &Alert) {
        for (id, callback) in &self.callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                warn!(
                    callback_id = id.0,
                    kind = ?alert.kind,
                    "Alert callback panicked; continuing with remaining callbacks"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_alert() -> Alert {
        Alert {
            kind: AlertKind::LowAccuracy,
            message: "accuracy below threshold".to_string(),
            accuracy: 0.5,
            actual_bookings: 10,
            validated_conversions: 5,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = AlertRegistry::default();
        let id = registry.add(|_| {});
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(registry.is_empty());
        // Second removal of the same id is a no-op
        assert!(!registry.remove(id));
    }

    #[test]
    fn test_dispatch_reaches_all_callbacks() {
        let mut registry = AlertRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            registry.add(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.dispatch(&test_alert());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let mut registry = AlertRegistry::default();
        let reached = Arc::new(AtomicUsize::new(0));

        registry.add(|_| panic!("callback blew up"));
        {
            let reached = Arc::clone(&reached);
            registry.add(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.dispatch(&test_alert());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
