//! Conversion payload types and the booking-flow event bus
//!
//! Conversion payloads are a tagged union keyed by `event`, one variant per
//! recognized conversion kind. Recognized fields stay optional so malformed
//! inbound payloads remain representable: pre-validation rejects them, because
//! rejected payloads must still be registered and counted. Fields the variants
//! do not name are captured in a flattened extension map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Recognized conversion kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionEvent {
    /// Tour detail page viewed
    ViewItem,
    /// Checkout flow entered
    BeginCheckout,
    /// Payment details submitted
    AddPaymentInfo,
    /// Booking paid for
    Purchase,
}

impl ConversionEvent {
    /// Canonical snake_case event name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionEvent::ViewItem => "view_item",
            ConversionEvent::BeginCheckout => "begin_checkout",
            ConversionEvent::AddPaymentInfo => "add_payment_info",
            ConversionEvent::Purchase => "purchase",
        }
    }

    /// Parse a canonical event name; `None` for unrecognized kinds
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "view_item" => Some(ConversionEvent::ViewItem),
            "begin_checkout" => Some(ConversionEvent::BeginCheckout),
            "add_payment_info" => Some(ConversionEvent::AddPaymentInfo),
            "purchase" => Some(ConversionEvent::Purchase),
            _ => None,
        }
    }

    /// Tag name queried during post-fire validation
    pub fn tag_name(&self) -> String {
        format!("{}_conversion", self.as_str())
    }
}

impl std::fmt::Display for ConversionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open-ended bag of extra payload fields
pub type ExtensionMap = BTreeMap<String, serde_json::Value>;

/// Line item attached to view/checkout/purchase payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionItem {
    /// Item identifier (accepts the ad-platform `item_id` spelling)
    #[serde(alias = "item_id")]
    pub id: String,
    /// Display name (accepts the ad-platform `item_name` spelling)
    #[serde(alias = "item_name")]
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

/// Optional contact fields used for enhanced conversions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Consent posture forwarded to the enhanced-conversion collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub analytics: bool,
    pub ad_storage: bool,
}

impl Consent {
    /// Default monitoring posture: consent is determined upstream, before the
    /// monitor ever sees a purchase
    pub fn granted() -> Self {
        Self {
            analytics: true,
            ad_storage: true,
        }
    }
}

/// Conversion payload, tagged by event kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversionData {
    ViewItem {
        #[serde(default)]
        items: Vec<ConversionItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booking_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(flatten)]
        extra: ExtensionMap,
    },
    BeginCheckout {
        #[serde(default)]
        items: Vec<ConversionItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booking_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(flatten)]
        extra: ExtensionMap,
    },
    AddPaymentInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booking_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(flatten)]
        extra: ExtensionMap,
    },
    Purchase {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booking_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        items: Vec<ConversionItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_data: Option<UserData>,
        #[serde(flatten)]
        extra: ExtensionMap,
    },
}

impl ConversionData {
    /// Event kind this payload carries
    pub fn event(&self) -> ConversionEvent {
        match self {
            ConversionData::ViewItem { .. } => ConversionEvent::ViewItem,
            ConversionData::BeginCheckout { .. } => ConversionEvent::BeginCheckout,
            ConversionData::AddPaymentInfo { .. } => ConversionEvent::AddPaymentInfo,
            ConversionData::Purchase { .. } => ConversionEvent::Purchase,
        }
    }

    /// Contact fields, present only on purchases
    pub fn user_data(&self) -> Option<&UserData> {
        match self {
            ConversionData::Purchase { user_data, .. } => user_data.as_ref(),
            _ => None,
        }
    }

    /// Mutable access to the extension map
    pub fn extension_mut(&mut self) -> &mut ExtensionMap {
        match self {
            ConversionData::ViewItem { extra, .. }
            | ConversionData::BeginCheckout { extra, .. }
            | ConversionData::AddPaymentInfo { extra, .. }
            | ConversionData::Purchase { extra, .. } => extra,
        }
    }

    /// Event-specific preconditions, checked before any firing
    ///
    /// Purchases need a non-empty transaction id and a positive value;
    /// view/checkout events need at least one item. An empty vec means the
    /// payload may be fired.
    pub fn precondition_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            ConversionData::Purchase {
                transaction_id,
                value,
                ..
            } => {
                match transaction_id {
                    Some(id) if !id.trim().is_empty() => {}
                    _ => errors.push("Missing transaction_id for purchase event".to_string()),
                }
                match value {
                    Some(v) if *v > 0.0 => {}
                    _ => errors.push("Purchase value must be greater than zero".to_string()),
                }
            }
            ConversionData::ViewItem { items, .. } => {
                if items.is_empty() {
                    errors.push("Missing items for view_item event".to_string());
                }
            }
            ConversionData::BeginCheckout { items, .. } => {
                if items.is_empty() {
                    errors.push("Missing items for begin_checkout event".to_string());
                }
            }
            ConversionData::AddPaymentInfo { .. } => {}
        }
        errors
    }
}

/// Named lifecycle event emitted by the booking flow
///
/// Names ending in `_tracked` whose stripped prefix is a recognized conversion
/// kind trigger automatic tracking via the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingFlowEvent {
    pub name: String,
    pub data: serde_json::Value,
}

/// Broadcast bus carrying booking-flow lifecycle events
///
/// Uses tokio::broadcast internally: non-blocking publish, multiple concurrent
/// subscribers, automatic cleanup when subscribers drop, lagged-message
/// detection for slow subscribers.
#[derive(Clone)]
pub struct BookingEventBus {
    tx: broadcast::Sender<BookingFlowEvent>,
    capacity: usize,
}

impl BookingEventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future booking-flow events
    pub fn subscribe(&self) -> broadcast::Receiver<BookingFlowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BookingFlowEvent,
    ) -> Result<usize, broadcast::error::SendError<BookingFlowEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BookingFlowEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_name_round_trip() {
        for event in [
            ConversionEvent::ViewItem,
            ConversionEvent::BeginCheckout,
            ConversionEvent::AddPaymentInfo,
            ConversionEvent::Purchase,
        ] {
            assert_eq!(ConversionEvent::parse(event.as_str()), Some(event));
        }
        assert_eq!(ConversionEvent::parse("page_view"), None);
    }

    #[test]
    fn test_tag_name_derivation() {
        assert_eq!(ConversionEvent::Purchase.tag_name(), "purchase_conversion");
        assert_eq!(ConversionEvent::ViewItem.tag_name(), "view_item_conversion");
    }

    #[test]
    fn test_deserialize_view_item_with_item_aliases() {
        let data: ConversionData = serde_json::from_value(json!({
            "event": "view_item",
            "items": [{"item_id": "t1", "item_name": "Morning Tour", "price": 8000.0, "quantity": 1}]
        }))
        .expect("should deserialize");

        assert_eq!(data.event(), ConversionEvent::ViewItem);
        match &data {
            ConversionData::ViewItem { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, "t1");
                assert_eq!(items[0].name, "Morning Tour");
            }
            _ => panic!("wrong variant"),
        }
        assert!(data.precondition_errors().is_empty());
    }

    #[test]
    fn test_extra_fields_land_in_extension_map() {
        let data: ConversionData = serde_json::from_value(json!({
            "event": "purchase",
            "transaction_id": "tx_1",
            "value": 13000.0,
            "source": "booking_flow",
            "campaign": "summer"
        }))
        .expect("should deserialize");

        match &data {
            ConversionData::Purchase { extra, .. } => {
                assert_eq!(extra.get("source"), Some(&json!("booking_flow")));
                assert_eq!(extra.get("campaign"), Some(&json!("summer")));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_event_kind_fails_deserialization() {
        let result: Result<ConversionData, _> =
            serde_json::from_value(json!({"event": "page_view"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_purchase_preconditions() {
        let missing_txn: ConversionData = serde_json::from_value(json!({
            "event": "purchase",
            "value": 13000.0
        }))
        .expect("should deserialize");
        let errors = missing_txn.precondition_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("transaction_id"));

        let zero_value: ConversionData = serde_json::from_value(json!({
            "event": "purchase",
            "transaction_id": "tx_1",
            "value": 0.0
        }))
        .expect("should deserialize");
        assert_eq!(zero_value.precondition_errors().len(), 1);

        let valid: ConversionData = serde_json::from_value(json!({
            "event": "purchase",
            "transaction_id": "tx_1",
            "value": 13000.0
        }))
        .expect("should deserialize");
        assert!(valid.precondition_errors().is_empty());
    }

    #[test]
    fn test_checkout_requires_items() {
        let empty: ConversionData =
            serde_json::from_value(json!({"event": "begin_checkout"})).expect("should deserialize");
        assert_eq!(empty.precondition_errors().len(), 1);

        // add_payment_info has no event-specific preconditions
        let payment: ConversionData =
            serde_json::from_value(json!({"event": "add_payment_info"}))
                .expect("should deserialize");
        assert!(payment.precondition_errors().is_empty());
    }

    #[test]
    fn test_booking_event_bus_emit_and_subscribe() {
        let bus = BookingEventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(BookingFlowEvent {
            name: "purchase_tracked".to_string(),
            data: json!({"transaction_id": "tx_1"}),
        })
        .expect("emit should succeed");

        let received = rx.try_recv().expect("should receive event");
        assert_eq!(received.name, "purchase_tracked");
    }

    #[test]
    fn test_booking_event_bus_emit_lossy_without_subscribers() {
        let bus = BookingEventBus::new(4);
        // No subscribers; must not panic
        bus.emit_lossy(BookingFlowEvent {
            name: "view_item_tracked".to_string(),
            data: json!({}),
        });
        assert_eq!(bus.capacity(), 4);
    }
}
