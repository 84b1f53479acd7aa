use delivery_engine::{
    db_types::{Money, OrderId, OrderStatusType, PaymentMethod, UserId},
    order_objects::LocationUpdate,
};
use serde::{Deserialize, Serialize};

/// The reply to any request that was handed to the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeParams {
    pub status: OrderStatusType,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Delivery partners claim orders for themselves. Admins name the partner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignParams {
    #[serde(default)]
    pub delivery_partner_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentParams {
    pub order_id: OrderId,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Omitting `amount` refunds the full payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundParams {
    #[serde(default)]
    pub amount: Option<Money>,
}

/// Messages a client may send over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    LocationUpdate(LocationUpdate),
    OrderUpdate { order_id: OrderId, status: OrderStatusType },
}
