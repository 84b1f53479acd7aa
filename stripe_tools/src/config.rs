use delivery_common::Secret;
use log::*;

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub api_url: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Maximum age, in seconds, of a signed webhook before it is rejected.
    pub webhook_tolerance: i64,
}

impl StripeConfig {
    pub fn new_from_env_or_default() -> Self {
        let api_url = std::env::var("FDS_STRIPE_API_URL").unwrap_or_else(|_| {
            info!("💳️ FDS_STRIPE_API_URL not set, using https://api.stripe.com");
            "https://api.stripe.com".to_string()
        });
        let secret_key = Secret::new(std::env::var("FDS_STRIPE_SECRET_KEY").unwrap_or_else(|_| {
            warn!("💳️ FDS_STRIPE_SECRET_KEY not set, using (probably useless) default");
            "sk_test_00000000000000".to_string()
        }));
        let webhook_secret = Secret::new(std::env::var("FDS_STRIPE_WEBHOOK_SECRET").unwrap_or_else(|_| {
            warn!("💳️ FDS_STRIPE_WEBHOOK_SECRET not set, using (probably useless) default");
            "whsec_00000000000000".to_string()
        }));
        let webhook_tolerance = std::env::var("FDS_WEBHOOK_TOLERANCE")
            .ok()
            .and_then(|s| {
                s.parse::<i64>()
                    .map_err(|e| warn!("💳️ Invalid FDS_WEBHOOK_TOLERANCE value '{s}': {e}. Using the default."))
                    .ok()
            })
            .unwrap_or(300);
        Self { api_url, secret_key, webhook_secret, webhook_tolerance }
    }
}
