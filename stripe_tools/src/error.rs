use thiserror::Error;

#[derive(Debug, Error)]
pub enum StripeApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Could not reach the Stripe API: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Webhook signature header is malformed: {0}")]
    MalformedSignature(String),
    #[error("Webhook signature does not match the payload")]
    SignatureMismatch,
    #[error("Webhook timestamp is outside the tolerance window ({0}s)")]
    TimestampOutOfTolerance(i64),
}

impl StripeApiError {
    /// Network failures, rate limiting and 5xx responses are worth retrying. Everything else is a definite answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RestRequestError(_) => true,
            Self::QueryError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
