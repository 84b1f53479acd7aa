//! [`PaymentProvider`] backed by Stripe payment intents.
//!
//! Every intent is tagged with the internal order id in its metadata, and created with an idempotency key derived from
//! the order, so a retried create returns the same intent instead of opening a second one.
use async_trait::async_trait;
use chrono::Utc;
use delivery_engine::{
    db_types::{Money, OrderId},
    gateway::{
        CreatedIntent,
        IntentRequest,
        PaymentEvent,
        PaymentEventKind,
        PaymentProvider,
        ProviderError,
        ProviderIntentStatus,
        ProviderRefund,
    },
};
use log::*;
use stripe_tools::{
    verify_signature,
    NewPaymentIntent,
    PaymentIntent,
    StripeApi,
    StripeApiError,
    StripeConfig,
    StripeEvent,
};

/// Wallet payments are card payments as far as Stripe is concerned.
const PAYMENT_METHOD_TYPE: &str = "card";
const ORDER_ID_KEY: &str = "order_id";

#[derive(Clone)]
pub struct StripePaymentProvider {
    api: StripeApi,
}

impl StripePaymentProvider {
    pub fn new(config: StripeConfig) -> Result<Self, StripeApiError> {
        let api = StripeApi::new(config)?;
        Ok(Self { api })
    }
}

fn provider_error(e: StripeApiError) -> ProviderError {
    if e.is_transient() {
        ProviderError::Transient(e.to_string())
    } else {
        ProviderError::Rejected(e.to_string())
    }
}

fn intent_status(intent: &PaymentIntent) -> ProviderIntentStatus {
    ProviderIntentStatus {
        provider_reference: intent.id.clone(),
        status: intent.status.clone(),
        last_error: intent.failure_message(),
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentProvider {
    async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, ProviderError> {
        let order_id = request.order_id.value();
        let params = NewPaymentIntent {
            amount: request.amount.value(),
            currency: request.currency.clone(),
            payment_method_type: PAYMENT_METHOD_TYPE.to_string(),
            metadata: vec![
                (ORDER_ID_KEY.to_string(), order_id.to_string()),
                ("payment_method".to_string(), request.method.to_string()),
            ],
            idempotency_key: format!("order-{order_id}-intent"),
        };
        let intent = self.api.create_payment_intent(&params).await.map_err(provider_error)?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            warn!("💳️ Stripe returned intent {} without a client secret", intent.id);
            ProviderError::Rejected(format!("Intent {} has no client secret", intent.id))
        })?;
        Ok(CreatedIntent { provider_reference: intent.id, client_secret })
    }

    async fn fetch_intent_status(&self, provider_reference: &str) -> Result<ProviderIntentStatus, ProviderError> {
        let intent = self.api.get_payment_intent(provider_reference).await.map_err(provider_error)?;
        Ok(intent_status(&intent))
    }

    async fn refund(&self, provider_reference: &str, amount: Money) -> Result<ProviderRefund, ProviderError> {
        let refund = self.api.create_refund(provider_reference, amount.value()).await.map_err(provider_error)?;
        Ok(ProviderRefund { refund_reference: refund.id, status: refund.status, amount: Money::from(refund.amount) })
    }

    fn verify_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, ProviderError> {
        let config = self.api.config();
        let secret = config.webhook_secret.reveal();
        verify_signature(secret, signature, payload, config.webhook_tolerance, Utc::now().timestamp())
            .map_err(|e| ProviderError::InvalidSignature(e.to_string()))?;
        let event = serde_json::from_slice::<StripeEvent>(payload)
            .map_err(|e| ProviderError::MalformedEvent(e.to_string()))?;
        let intent = event.payment_intent();
        let order_id = intent
            .as_ref()
            .and_then(|i| i.metadata.get(ORDER_ID_KEY))
            .and_then(|s| s.parse::<i64>().ok())
            .map(OrderId::from);
        trace!("💳️ Verified Stripe event {} ({})", event.id, event.event_type);
        Ok(PaymentEvent {
            kind: PaymentEventKind::from_event_type(&event.event_type),
            event_id: event.id,
            event_type: event.event_type,
            intent: intent.as_ref().map(intent_status),
            order_id,
        })
    }
}
