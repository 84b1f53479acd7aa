use async_trait::async_trait;
use delivery_engine::{
    db_types::Money,
    gateway::{
        CreatedIntent,
        IntentRequest,
        PaymentEvent,
        PaymentProvider,
        ProviderError,
        ProviderIntentStatus,
        ProviderRefund,
    },
};
use mockall::mock;

mock! {
    pub Provider {}
    #[async_trait]
    impl PaymentProvider for Provider {
        async fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, ProviderError>;
        async fn fetch_intent_status(&self, provider_reference: &str) -> Result<ProviderIntentStatus, ProviderError>;
        async fn refund(&self, provider_reference: &str, amount: Money) -> Result<ProviderRefund, ProviderError>;
        fn verify_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, ProviderError>;
    }
}
