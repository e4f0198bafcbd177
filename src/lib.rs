//! Conversion tracking reliability layer
//!
//! Sits between a tour-booking flow and its advertising-conversion
//! collaborators, turning fire-and-forget tag calls into tracked attempts:
//! pre-validation, firing with retry and backoff, asynchronous post-fire
//! validation against three independent sources, accuracy accounting against
//! actual bookings, and alert callbacks when accuracy degrades.
//!
//! The monitor observes the flow it measures and never blocks it; no tracking
//! failure propagates to the booking path.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;

pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use events::{
    BookingEventBus, BookingFlowEvent, Consent, ConversionData, ConversionEvent, ConversionItem,
    UserData,
};
pub use monitor::accuracy::AccuracyMetrics;
pub use monitor::alerts::{Alert, AlertCallbackId, AlertKind};
pub use monitor::attempt::{AttemptStatus, ConversionAttempt};
pub use monitor::bridge::run_booking_event_bridge;
pub use monitor::reporting::{DiagnosticReport, TrackingComparison};
pub use monitor::validation::{SubValidation, ValidationResult};
pub use monitor::{ConversionMonitor, MonitoringStatus, TrackOutcome};
