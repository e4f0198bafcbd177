//! Booking-flow event bridge
//!
//! Subscribes to the booking event bus and turns `*_tracked` lifecycle events
//! into conversion tracking calls, decoupling the booking flow from the
//! monitor: the flow emits events and never waits on tracking.

use crate::events::{BookingFlowEvent, ConversionEvent};
use crate::monitor::ConversionMonitor;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Consume booking-flow events until the bus closes
///
/// Spawn this on the runtime after subscribing. Lagged receivers warn and keep
/// going; a closed bus ends the task.
pub async fn run_booking_event_bridge(
    monitor: Arc<ConversionMonitor>,
    mut rx: broadcast::Receiver<BookingFlowEvent>,
) {
    debug!("Booking event bridge started");
    loop {
        match rx.recv().await {
            Ok(event) => handle_booking_event(&monitor, event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Booking event bridge lagged; missed events are dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Booking event sender dropped, shutting down bridge");
                break;
            }
        }
    }
    debug!("Booking event bridge stopped");
}

async fn handle_booking_event(monitor: &Arc<ConversionMonitor>, event: BookingFlowEvent) {
    let Some(prefix) = event.name.strip_suffix("_tracked") else {
        debug!(name = %event.name, "Ignoring non-tracking booking event");
        return;
    };
    if ConversionEvent::parse(prefix).is_none() {
        warn!(name = %event.name, "Booking event names an unrecognized conversion kind");
        return;
    }

    let payload = conversion_payload(prefix, event.data);
    let outcome = monitor.track_raw(payload).await;
    if !outcome.success {
        warn!(
            event = prefix,
            attempt_id = ?outcome.attempt_id,
            errors = ?outcome.errors,
            "Booking-flow conversion tracking failed"
        );
    }
}

/// Build the raw conversion payload: the event data tagged with its kind and
/// provenance
fn conversion_payload(event: &str, data: Value) -> Value {
    let mut map = match data {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            // Non-object event data is kept rather than dropped.
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    map.insert("event".to_string(), json!(event));
    map.insert("source".to_string(), json!("booking_flow"));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging_preserves_event_data() {
        let payload = conversion_payload(
            "purchase",
            json!({"transaction_id": "tx_1", "value": 13000.0}),
        );
        assert_eq!(payload["event"], "purchase");
        assert_eq!(payload["source"], "booking_flow");
        assert_eq!(payload["transaction_id"], "tx_1");
    }

    #[test]
    fn test_payload_from_null_data() {
        let payload = conversion_payload("add_payment_info", Value::Null);
        assert_eq!(payload["event"], "add_payment_info");
        assert_eq!(payload["source"], "booking_flow");
    }

    #[test]
    fn test_non_object_data_is_wrapped() {
        let payload = conversion_payload("view_item", json!("tour-42"));
        assert_eq!(payload["payload"], "tour-42");
        assert_eq!(payload["event"], "view_item");
    }
}
