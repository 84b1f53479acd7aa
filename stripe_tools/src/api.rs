use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
    Method,
};
use serde::de::DeserializeOwned;

use crate::{
    config::StripeConfig,
    data_objects::{NewPaymentIntent, PaymentIntent, Refund},
    StripeApiError,
};

#[derive(Clone)]
pub struct StripeApi {
    config: StripeConfig,
    client: Arc<Client>,
}

impl StripeApi {
    pub fn new(config: StripeConfig) -> Result<Self, StripeApiError> {
        let mut headers = HeaderMap::with_capacity(1);
        let val = HeaderValue::from_str(format!("Bearer {}", config.secret_key.reveal()).as_str())
            .map_err(|e| StripeApiError::Initialization(e.to_string()))?;
        headers.insert(AUTHORIZATION, val);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StripeApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.config.api_url.trim_end_matches('/'))
    }

    /// Sends a form-encoded request to the Stripe API and deserializes the JSON response.
    pub async fn rest_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, StripeApiError> {
        let url = self.url(path);
        trace!("💳️ Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url);
        if !form.is_empty() {
            req = req.form(form);
        }
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        let response = req.send().await.map_err(|e| StripeApiError::RestRequestError(e.to_string()))?;
        if response.status().is_success() {
            trace!("💳️ REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| StripeApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| StripeApiError::RestResponseError(e.to_string()))?;
            Err(StripeApiError::QueryError { status, message })
        }
    }

    pub async fn create_payment_intent(&self, intent: &NewPaymentIntent) -> Result<PaymentIntent, StripeApiError> {
        debug!("💳️ Creating payment intent for {} {}", intent.amount, intent.currency);
        let result = self
            .rest_query::<PaymentIntent>(
                Method::POST,
                "/payment_intents",
                &intent.form_params(),
                Some(intent.idempotency_key.as_str()),
            )
            .await?;
        info!("💳️ Created payment intent {}", result.id);
        Ok(result)
    }

    pub async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, StripeApiError> {
        let path = format!("/payment_intents/{intent_id}");
        debug!("💳️ Fetching payment intent {intent_id}");
        self.rest_query::<PaymentIntent>(Method::GET, &path, &[], None).await
    }

    pub async fn create_refund(&self, intent_id: &str, amount: i64) -> Result<Refund, StripeApiError> {
        let form = vec![("payment_intent".to_string(), intent_id.to_string()), ("amount".to_string(), amount.to_string())];
        let key = format!("refund-{intent_id}-{amount}");
        debug!("💳️ Requesting refund of {amount} for {intent_id}");
        let result = self.rest_query::<Refund>(Method::POST, "/refunds", &form, Some(key.as_str())).await?;
        info!("💳️ Refund {} for {intent_id} is {}", result.id, result.status);
        Ok(result)
    }
}
