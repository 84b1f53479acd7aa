use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{Money, OrderId, PaymentMethod};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, rate limits, 5xx. Worth retrying later.
    #[error("Payment provider is temporarily unavailable: {0}")]
    Transient(String),
    /// The provider gave a definite "no".
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),
    #[error("Webhook signature verification failed: {0}")]
    InvalidSignature(String),
    #[error("Could not parse provider event: {0}")]
    MalformedEvent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIntent {
    pub provider_reference: String,
    /// Handed to the client so it can complete the payment with the provider.
    pub client_secret: String,
}

/// The provider's view of a payment intent. `status` is the provider's raw status string.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIntentStatus {
    pub provider_reference: String,
    pub status: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRefund {
    pub refund_reference: String,
    pub status: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Processing,
    Canceled,
    /// Any event type the engine does not act on. Acknowledged and ignored.
    Other,
}

impl PaymentEventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::Succeeded,
            "payment_intent.payment_failed" => Self::Failed,
            "payment_intent.processing" => Self::Processing,
            "payment_intent.canceled" => Self::Canceled,
            _ => Self::Other,
        }
    }
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub kind: PaymentEventKind,
    /// The intent this event is about, with the status it reports. Absent for events that are not about an intent.
    pub intent: Option<ProviderIntentStatus>,
    /// The internal order id, carried in the intent metadata.
    pub order_id: Option<OrderId>,
}

/// A payment provider such as Stripe.
#[async_trait]
pub trait PaymentProvider: Send + Sync + 'static {
    /// Creates a provider-side payment intent. Implementations should be idempotent per order, so that a retried call
    /// does not create a second intent.
    async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, ProviderError>;

    async fn fetch_intent_status(&self, provider_reference: &str) -> Result<ProviderIntentStatus, ProviderError>;

    async fn refund(&self, provider_reference: &str, amount: Money) -> Result<ProviderRefund, ProviderError>;

    /// Checks the signature of a raw webhook body and parses it. Nothing must be mutated before this succeeds.
    fn verify_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, ProviderError>;
}
