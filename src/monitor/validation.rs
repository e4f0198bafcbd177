//! Post-fire validation results and the three sub-validation checks
//!
//! A fired conversion is confirmed by asking three independent sources: the
//! tag container (did the tag fire), the booking flow (does its own state
//! agree), and the enhanced-conversion service (was the purchase privacy
//! compliant). The overall verdict is the AND of the three; collaborator
//! failures are folded into invalid sub-results, never propagated.

use crate::collaborators::{BookingState, EnhancedConversion, TagDelivery};
use crate::events::{Consent, ConversionData, ConversionEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Outcome of a single sub-validation
#[derive(Debug, Clone, Serialize)]
pub struct SubValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Explanatory note for no-op passes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SubValidation {
    pub fn pass() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            note: None,
        }
    }

    pub fn pass_with_note(note: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            note: Some(note.into()),
        }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            note: None,
        }
    }
}

/// Combined verdict for one conversion attempt, created at most once per
/// attempt
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    /// AND of the three sub-validations
    pub is_valid: bool,
    pub gtm_validation: SubValidation,
    pub booking_validation: SubValidation,
    pub enhanced_validation: SubValidation,
    /// Union of all sub-validation errors
    pub overall_errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    /// Combine three sub-validations into an overall verdict
    pub fn combine(
        gtm: SubValidation,
        booking: SubValidation,
        enhanced: SubValidation,
    ) -> Self {
        let is_valid = gtm.is_valid && booking.is_valid && enhanced.is_valid;
        let mut overall_errors = Vec::new();
        overall_errors.extend(gtm.errors.iter().cloned());
        overall_errors.extend(booking.errors.iter().cloned());
        overall_errors.extend(enhanced.errors.iter().cloned());

        Self {
            is_valid,
            gtm_validation: gtm,
            booking_validation: booking,
            enhanced_validation: enhanced,
            overall_errors,
            timestamp: Utc::now(),
        }
    }

    /// All-invalid result carrying a single overall error message
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            gtm_validation: SubValidation::fail(Vec::new()),
            booking_validation: SubValidation::fail(Vec::new()),
            enhanced_validation: SubValidation::fail(Vec::new()),
            overall_errors: vec![message.into()],
            timestamp: Utc::now(),
        }
    }
}

/// Tag-firing validation: trust the container's boolean answer for the
/// `${event}_conversion` tag, guarded by its initialization flag
pub(crate) async fn check_tag_firing(
    tag: &dyn TagDelivery,
    event: ConversionEvent,
) -> SubValidation {
    let status = tag.get_status().await;
    if !status.is_initialized {
        return SubValidation::fail(vec!["GTM not initialized".to_string()]);
    }

    let tag_name = event.tag_name();
    match tag.validate_tag_firing(&tag_name).await {
        Ok(true) => SubValidation::pass(),
        Ok(false) => SubValidation::fail(vec![format!(
            "Tag {} did not validate as fired",
            tag_name
        )]),
        Err(e) => SubValidation::fail(vec![format!("Tag firing validation error: {}", e)]),
    }
}

/// Booking-flow-state validation: the conversion must be recorded as tracked
/// in the active booking state, except view_item, which is inherently not
/// "tracked" state in the booking flow
pub(crate) async fn check_booking_state(
    booking: &dyn BookingState,
    event: ConversionEvent,
) -> SubValidation {
    if booking.current_booking_state().await.is_none() {
        return SubValidation::fail(vec!["No active booking state".to_string()]);
    }

    if event == ConversionEvent::ViewItem {
        return SubValidation::pass_with_note("view_item exempt from booking-state check");
    }

    if booking.is_conversion_tracked(event).await {
        SubValidation::pass()
    } else {
        SubValidation::fail(vec![format!(
            "Conversion {} not recorded in booking flow state",
            event
        )])
    }
}

/// Enhanced-conversion validation: a no-op pass unless the attempt is a
/// purchase carrying user data and the feature is enabled, in which case the
/// collaborator's privacy-compliance verdict is mirrored
pub(crate) async fn check_enhanced(
    enhanced: &dyn EnhancedConversion,
    data: Option<&ConversionData>,
) -> SubValidation {
    let user_data = match data.and_then(|d| d.user_data()) {
        Some(user_data) => user_data,
        None => {
            return SubValidation::pass_with_note(
                "enhanced conversion not applicable (no user data)",
            )
        }
    };

    let status = enhanced.get_status().await;
    if !status.is_enabled {
        return SubValidation::pass_with_note("enhanced conversions disabled");
    }

    debug!("Checking enhanced-conversion privacy compliance");
    match enhanced
        .validate_privacy_compliance(user_data, &Consent::granted())
        .await
    {
        Ok(compliance) if compliance.is_compliant => SubValidation::pass(),
        Ok(compliance) => SubValidation::fail(compliance.errors),
        Err(e) => SubValidation::fail(vec![format!("Privacy compliance check error: {}", e)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_requires_all_three() {
        let result = ValidationResult::combine(
            SubValidation::pass(),
            SubValidation::fail(vec!["booking mismatch".to_string()]),
            SubValidation::pass(),
        );
        assert!(!result.is_valid);
        assert_eq!(result.overall_errors, vec!["booking mismatch"]);

        let all_pass = ValidationResult::combine(
            SubValidation::pass(),
            SubValidation::pass(),
            SubValidation::pass_with_note("n/a"),
        );
        assert!(all_pass.is_valid);
        assert!(all_pass.overall_errors.is_empty());
    }

    #[test]
    fn test_overall_errors_union_preserves_order() {
        let result = ValidationResult::combine(
            SubValidation::fail(vec!["gtm down".to_string()]),
            SubValidation::fail(vec!["no state".to_string()]),
            SubValidation::fail(vec!["not compliant".to_string()]),
        );
        assert_eq!(
            result.overall_errors,
            vec!["gtm down", "no state", "not compliant"]
        );
    }

    #[test]
    fn test_invalid_constructor() {
        let result = ValidationResult::invalid("Conversion attempt not found");
        assert!(!result.is_valid);
        assert!(!result.gtm_validation.is_valid);
        assert!(!result.booking_validation.is_valid);
        assert!(!result.enhanced_validation.is_valid);
        assert_eq!(result.overall_errors, vec!["Conversion attempt not found"]);
    }
}
