//! External collaborator interfaces
//!
//! The monitor observes the booking flow; it never owns it. These traits are
//! the seams where the host application injects its tag-manager client,
//! enhanced-conversion service and booking-flow state access.

use crate::error::Result;
use crate::events::{Consent, ConversionData, ConversionEvent, UserData};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Tag-delivery collaborator status snapshot
#[derive(Debug, Clone, Default)]
pub struct TagDeliveryStatus {
    pub is_initialized: bool,
    pub container_id: Option<String>,
}

/// Enhanced-conversion collaborator status snapshot
#[derive(Debug, Clone, Default)]
pub struct EnhancedConversionStatus {
    pub is_enabled: bool,
}

/// Verdict of a privacy-compliance check on hashed user data
#[derive(Debug, Clone)]
pub struct PrivacyCompliance {
    pub is_compliant: bool,
    pub errors: Vec<String>,
}

/// Opaque view of the active booking-flow state
#[derive(Debug, Clone)]
pub struct BookingFlowState {
    pub booking_id: Option<String>,
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Fires conversion tags and reports whether a given tag validated as fired
#[async_trait]
pub trait TagDelivery: Send + Sync {
    /// Current collaborator status
    async fn get_status(&self) -> TagDeliveryStatus;

    /// Fire a conversion tag. `Ok(true)` on confirmed delivery; `Ok(false)`
    /// when the container accepted the call but reported nothing.
    async fn track_conversion(
        &self,
        event: ConversionEvent,
        data: &ConversionData,
    ) -> Result<bool>;

    /// Ask the container whether the named tag fired
    async fn validate_tag_firing(&self, tag_name: &str) -> Result<bool>;
}

/// Prepares and sends privacy-checked purchase conversions with hashed user
/// data
#[async_trait]
pub trait EnhancedConversion: Send + Sync {
    async fn get_status(&self) -> EnhancedConversionStatus;

    /// Build an enhanced-conversion payload. `Ok(None)` means no payload could
    /// be produced and the caller should fall back to plain tag delivery.
    async fn prepare_enhanced_conversion(
        &self,
        data: &ConversionData,
        user_data: &UserData,
        consent: &Consent,
    ) -> Result<Option<serde_json::Value>>;

    /// Send a prepared enhanced-conversion payload
    async fn track_enhanced_conversion(&self, payload: &serde_json::Value) -> Result<bool>;

    /// Check hashed user data against the privacy-compliance rules
    async fn validate_privacy_compliance(
        &self,
        user_data: &UserData,
        consent: &Consent,
    ) -> Result<PrivacyCompliance>;
}

/// Query access to the booking flow's own view of what it tracked
#[async_trait]
pub trait BookingState: Send + Sync {
    /// Active booking state, if a flow is in progress
    async fn current_booking_state(&self) -> Option<BookingFlowState>;

    /// Whether the booking flow recorded this conversion kind as tracked
    async fn is_conversion_tracked(&self, event: ConversionEvent) -> bool;

    /// Count of bookings actually completed since the given instant, used by
    /// the periodic accuracy check
    async fn completed_bookings_since(&self, since: DateTime<Utc>) -> Result<u64>;
}
