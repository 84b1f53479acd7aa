//! The boundary to the external payment provider.
//!
//! The engine never talks to a provider directly. It talks to a [`PaymentProvider`], and every provider status it
//! sees is funnelled through [`map_provider_status`], so the webhook and polling paths always agree.
mod provider;
mod status;

pub use provider::{
    CreatedIntent,
    IntentRequest,
    PaymentEvent,
    PaymentEventKind,
    PaymentProvider,
    ProviderError,
    ProviderIntentStatus,
    ProviderRefund,
};
pub use status::map_provider_status;
