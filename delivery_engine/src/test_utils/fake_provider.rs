//! A scriptable, in-memory [`PaymentProvider`].
//!
//! Webhook bodies use the same shape as the real provider (`{"id", "type", "data": {"object": {...}}}`), and are
//! accepted only with the signature [`FakePaymentProvider::SIGNATURE`].
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
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

#[derive(Debug, Clone)]
struct FakeIntent {
    status: String,
    last_error: Option<String>,
}

#[derive(Default)]
pub struct FakePaymentProvider {
    intents: Mutex<HashMap<String, FakeIntent>>,
    fail_creates: AtomicBool,
    fail_status_checks: AtomicBool,
    fail_refunds: AtomicBool,
    refund_calls: AtomicUsize,
}

impl FakePaymentProvider {
    pub const SIGNATURE: &'static str = "t=1,v1=fake";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status_checks(&self, fail: bool) {
        self.fail_status_checks.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Sets what the provider will report for an intent from now on.
    pub fn set_status(&self, provider_reference: &str, status: &str, last_error: Option<&str>) {
        let mut intents = self.intents.lock().expect("fake provider lock poisoned");
        intents.insert(provider_reference.to_string(), FakeIntent {
            status: status.to_string(),
            last_error: last_error.map(String::from),
        });
    }

    /// A webhook body for `event_type` about the given intent.
    pub fn event_payload(
        event_id: &str,
        event_type: &str,
        provider_reference: &str,
        status: &str,
        last_error: Option<&str>,
    ) -> Vec<u8> {
        let last_payment_error = last_error.map(|m| json!({ "message": m }));
        json!({
            "id": event_id,
            "type": event_type,
            "data": { "object": {
                "id": provider_reference,
                "object": "payment_intent",
                "status": status,
                "last_payment_error": last_payment_error,
            }}
        })
        .to_string()
        .into_bytes()
    }

    pub fn succeeded_payload(event_id: &str, provider_reference: &str) -> Vec<u8> {
        Self::event_payload(event_id, "payment_intent.succeeded", provider_reference, "succeeded", None)
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, ProviderError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("provider is down".into()));
        }
        let provider_reference = format!("pi_fake_{}", request.order_id.value());
        self.set_status(&provider_reference, "requires_payment_method", None);
        Ok(CreatedIntent { client_secret: format!("{provider_reference}_secret"), provider_reference })
    }

    async fn fetch_intent_status(&self, provider_reference: &str) -> Result<ProviderIntentStatus, ProviderError> {
        if self.fail_status_checks.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("provider is down".into()));
        }
        let intents = self.intents.lock().expect("fake provider lock poisoned");
        let intent = intents
            .get(provider_reference)
            .ok_or_else(|| ProviderError::Rejected(format!("No such payment_intent: {provider_reference}")))?;
        Ok(ProviderIntentStatus {
            provider_reference: provider_reference.to_string(),
            status: intent.status.clone(),
            last_error: intent.last_error.clone(),
        })
    }

    async fn refund(&self, provider_reference: &str, amount: Money) -> Result<ProviderRefund, ProviderError> {
        let n = self.refund_calls.fetch_add(1, Ordering::SeqCst);
        // A real provider call suspends. Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("charge already refunded".into()));
        }
        let refund_reference = format!("re_fake_{provider_reference}_{n}");
        Ok(ProviderRefund { refund_reference, status: "succeeded".into(), amount })
    }

    fn verify_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, ProviderError> {
        if signature != Self::SIGNATURE {
            return Err(ProviderError::InvalidSignature("signature mismatch".into()));
        }
        let v: Value = serde_json::from_slice(payload).map_err(|e| ProviderError::MalformedEvent(e.to_string()))?;
        let event_id = v["id"].as_str().ok_or_else(|| ProviderError::MalformedEvent("missing id".into()))?;
        let event_type = v["type"].as_str().ok_or_else(|| ProviderError::MalformedEvent("missing type".into()))?;
        let object = &v["data"]["object"];
        let intent = object["id"].as_str().map(|id| ProviderIntentStatus {
            provider_reference: id.to_string(),
            status: object["status"].as_str().unwrap_or_default().to_string(),
            last_error: object["last_payment_error"]["message"].as_str().map(String::from),
        });
        let order_id = object["metadata"]["order_id"].as_str().and_then(|s| s.parse::<i64>().ok()).map(OrderId::from);
        Ok(PaymentEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            kind: PaymentEventKind::from_event_type(event_type),
            intent,
            order_id,
        })
    }
}
