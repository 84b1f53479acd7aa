use serde::Serialize;

use crate::db_types::Payment;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentIntentResponse {
    pub payment: Payment,
    pub client_secret: String,
}

/// What happened to a webhook event. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event moved the payment forward.
    Applied,
    /// The payment was already at (or past) the reported status.
    AlreadyConverged,
    /// This event id was processed before.
    Duplicate,
    /// Not an event type the engine acts on.
    Ignored,
    /// No payment carries the event's provider reference (yet). Polling settles the payment once it exists.
    UnknownPayment,
}
