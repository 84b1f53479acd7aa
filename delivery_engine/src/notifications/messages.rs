use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::db_types::{Money, OrderId, OrderStatusType, PaymentStatusType, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    OrderStatusUpdate,
    DeliveryTimeUpdate,
    DeliveryLocationUpdate,
    PaymentUpdate,
    OrderCancelled,
    RefundProcessed,
    Pong,
    Error,
}

/// Who a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NotificationTarget {
    User(UserId),
    Role(Role),
    All,
}

/// A message pushed down a live connection. On the wire it is a flat JSON object:
///
/// ```json
/// {"type": "order_status_update", "order_id": 12, "old_status": "PENDING", "new_status": "CONFIRMED",
///  "timestamp": "2024-06-01T12:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(kind: MessageKind, order_id: Option<OrderId>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other);
                map
            },
        };
        Self { kind, order_id, data, timestamp: Utc::now() }
    }

    pub fn order_status_update(order_id: OrderId, old: OrderStatusType, new: OrderStatusType) -> Self {
        Self::new(MessageKind::OrderStatusUpdate, Some(order_id), json!({ "old_status": old, "new_status": new }))
    }

    pub fn order_cancelled(order_id: OrderId, reason: Option<&str>) -> Self {
        Self::new(
            MessageKind::OrderCancelled,
            Some(order_id),
            json!({ "status": OrderStatusType::Cancelled, "reason": reason }),
        )
    }

    pub fn delivery_time_update(order_id: OrderId, estimated_delivery_time: DateTime<Utc>) -> Self {
        Self::new(
            MessageKind::DeliveryTimeUpdate,
            Some(order_id),
            json!({ "estimated_delivery_time": estimated_delivery_time }),
        )
    }

    pub fn delivery_location_update(order_id: OrderId, partner_id: UserId, latitude: f64, longitude: f64) -> Self {
        Self::new(
            MessageKind::DeliveryLocationUpdate,
            Some(order_id),
            json!({ "delivery_partner_id": partner_id, "latitude": latitude, "longitude": longitude }),
        )
    }

    pub fn payment_update(order_id: OrderId, status: PaymentStatusType, failure_reason: Option<&str>) -> Self {
        Self::new(
            MessageKind::PaymentUpdate,
            Some(order_id),
            json!({ "payment_status": status, "failure_reason": failure_reason }),
        )
    }

    pub fn refund_processed(order_id: OrderId, refund_amount: Money) -> Self {
        Self::new(
            MessageKind::RefundProcessed,
            Some(order_id),
            json!({ "refund_amount": refund_amount, "display_amount": refund_amount.to_string() }),
        )
    }

    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, None, Value::Null)
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(MessageKind::Error, None, json!({ "message": message.into() }))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"type":"error","message":"{e}"}}"#))
    }
}
