mod api;
mod config;
mod data_objects;
mod error;
mod webhook;

pub use api::StripeApi;
pub use config::StripeConfig;
pub use data_objects::{LastPaymentError, NewPaymentIntent, PaymentIntent, Refund, StripeEvent, StripeEventData};
pub use error::StripeApiError;
pub use webhook::{sign_payload, verify_signature, SIGNATURE_HEADER};
