//! Conversion attempt records and the in-memory attempt store

use crate::events::ConversionData;
use crate::monitor::validation::ValidationResult;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::warn;

/// Attempt lifecycle status
///
/// Success path: `Pending → Fired → Validated`. Failure paths terminate at
/// `ValidationFailed` (pre- or post-fire), `FiringFailed`, `ValidationTimeout`
/// or `Error`. Transitions are monotonic; nothing returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Fired,
    Validated,
    ValidationFailed,
    FiringFailed,
    ValidationTimeout,
    Error,
}

impl AttemptStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending | AttemptStatus::Fired)
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (Pending, Fired)
                | (Pending, ValidationFailed)
                | (Pending, FiringFailed)
                | (Pending, Error)
                | (Fired, Validated)
                | (Fired, ValidationFailed)
                | (Fired, ValidationTimeout)
                | (Fired, Error)
        )
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Fired => "fired",
            AttemptStatus::Validated => "validated",
            AttemptStatus::ValidationFailed => "validation_failed",
            AttemptStatus::FiringFailed => "firing_failed",
            AttemptStatus::ValidationTimeout => "validation_timeout",
            AttemptStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Generate a process-unique attempt id: creation millis plus a random
/// alphanumeric suffix
pub fn new_attempt_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("conv_{}_{}", millis, suffix)
}

/// One tracked instance of trying to fire and confirm a conversion
///
/// Owned exclusively by the monitor; callers only ever see copies.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionAttempt {
    pub id: String,
    /// Event name as received; unrecognized names survive here so rejected
    /// payloads can still be accounted for
    pub event: String,
    /// Defensive copy of the input; `None` only for raw payloads rejected
    /// before typing
    pub data: Option<ConversionData>,
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub validation_result: Option<ValidationResult>,
    pub retry_count: u32,
    /// Append-only, never cleared
    pub errors: Vec<String>,
}

impl ConversionAttempt {
    pub fn new(event: impl Into<String>, data: Option<ConversionData>) -> Self {
        Self {
            id: new_attempt_id(),
            event: event.into(),
            data,
            timestamp: Utc::now(),
            status: AttemptStatus::Pending,
            validation_result: None,
            retry_count: 0,
            errors: Vec::new(),
        }
    }

    /// Apply a status transition, refusing illegal ones
    ///
    /// Returns true when the transition was applied. Illegal transitions are
    /// logged at warn and leave the attempt untouched.
    pub fn transition(&mut self, next: AttemptStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            warn!(
                attempt_id = %self.id,
                from = %self.status,
                to = %next,
                "Refusing illegal attempt status transition"
            );
            false
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// In-memory ledger of in-flight and completed tracking attempts
///
/// Insertion order is kept so terminal attempts can be pruned oldest-first
/// once the store exceeds its cap; in-flight attempts are never evicted.
#[derive(Default)]
pub struct AttemptStore {
    attempts: HashMap<String, ConversionAttempt>,
    order: VecDeque<String>,
}

impl AttemptStore {
    pub fn insert(&mut self, attempt: ConversionAttempt) {
        self.order.push_back(attempt.id.clone());
        self.attempts.insert(attempt.id.clone(), attempt);
    }

    pub fn get(&self, id: &str) -> Option<&ConversionAttempt> {
        self.attempts.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ConversionAttempt> {
        self.attempts.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversionAttempt> {
        self.attempts.values()
    }

    /// Histogram of attempt statuses, for diagnostics
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for attempt in self.attempts.values() {
            *counts.entry(attempt.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Evict the oldest terminal attempts until the store is within `cap`
    ///
    /// Returns the ids of pruned attempts so associated validation results can
    /// be dropped alongside.
    pub fn prune_terminal(&mut self, cap: usize) -> Vec<String> {
        let mut pruned = Vec::new();
        if self.attempts.len() <= cap {
            return pruned;
        }

        let mut kept = VecDeque::with_capacity(self.order.len());
        while let Some(id) = self.order.pop_front() {
            let over_cap = self.attempts.len() > cap;
            let terminal = self
                .attempts
                .get(&id)
                .map(|a| a.status.is_terminal())
                .unwrap_or(false);
            if over_cap && terminal {
                self.attempts.remove(&id);
                pruned.push(id);
            } else {
                kept.push_back(id);
            }
        }
        self.order = kept;
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_ids_are_unique() {
        let a = new_attempt_id();
        let b = new_attempt_id();
        assert_ne!(a, b);
        assert!(a.starts_with("conv_"));
    }

    #[test]
    fn test_success_path_transitions() {
        let mut attempt = ConversionAttempt::new("purchase", None);
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert!(attempt.transition(AttemptStatus::Fired));
        assert!(attempt.transition(AttemptStatus::Validated));
        assert!(attempt.status.is_terminal());
    }

    #[test]
    fn test_no_transition_back_to_pending() {
        let mut attempt = ConversionAttempt::new("purchase", None);
        attempt.transition(AttemptStatus::Fired);
        assert!(!attempt.transition(AttemptStatus::Pending));
        assert_eq!(attempt.status, AttemptStatus::Fired);
    }

    #[test]
    fn test_terminal_statuses_are_frozen() {
        let mut attempt = ConversionAttempt::new("view_item", None);
        attempt.transition(AttemptStatus::ValidationFailed);
        assert!(!attempt.transition(AttemptStatus::Fired));
        assert!(!attempt.transition(AttemptStatus::Validated));
        assert_eq!(attempt.status, AttemptStatus::ValidationFailed);
    }

    #[test]
    fn test_fired_can_fail_validation_or_time_out() {
        assert!(AttemptStatus::Fired.can_transition_to(AttemptStatus::ValidationFailed));
        assert!(AttemptStatus::Fired.can_transition_to(AttemptStatus::ValidationTimeout));
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Validated));
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::ValidationTimeout));
    }

    #[test]
    fn test_errors_are_append_only() {
        let mut attempt = ConversionAttempt::new("purchase", None);
        attempt.record_error("first");
        attempt.record_error("second");
        assert_eq!(attempt.errors, vec!["first", "second"]);
    }

    #[test]
    fn test_prune_keeps_in_flight_attempts() {
        let mut store = AttemptStore::default();
        for i in 0..5 {
            let mut attempt = ConversionAttempt::new("purchase", None);
            attempt.id = format!("a{}", i);
            if i < 3 {
                attempt.transition(AttemptStatus::FiringFailed);
            }
            store.insert(attempt);
        }

        // Cap of 3: the two oldest terminal attempts go, in-flight ones stay
        let pruned = store.prune_terminal(3);
        assert_eq!(pruned, vec!["a0".to_string(), "a1".to_string()]);
        assert_eq!(store.len(), 3);
        assert!(store.get("a3").is_some());
        assert!(store.get("a4").is_some());
    }

    #[test]
    fn test_prune_noop_under_cap() {
        let mut store = AttemptStore::default();
        store.insert(ConversionAttempt::new("purchase", None));
        assert!(store.prune_terminal(10).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_status_counts() {
        let mut store = AttemptStore::default();
        let mut a = ConversionAttempt::new("purchase", None);
        a.transition(AttemptStatus::Fired);
        store.insert(a);
        store.insert(ConversionAttempt::new("view_item", None));

        let counts = store.status_counts();
        assert_eq!(counts.get("fired"), Some(&1));
        assert_eq!(counts.get("pending"), Some(&1));
    }
}
