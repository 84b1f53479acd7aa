use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use delivery_engine::{OrderFlowError, PaymentFlowError};
use log::error;
use serde_json::json;
use thiserror::Error;

/// Seconds a client is asked to wait before retrying after a 503.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("Could not read query string: {0}")]
    InvalidRequestQuery(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Caller identity is missing or invalid. {0}")]
    Unauthenticated(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error(transparent)]
    OrderFlow(#[from] OrderFlowError),
    #[error(transparent)]
    PaymentFlow(#[from] PaymentFlowError),
}

impl ServerError {
    /// The machine-readable `error` field of the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitializeError(_) => "initialization_error",
            Self::BackendError(_) => "backend_error",
            Self::InvalidRequestBody(_) => "invalid_request_body",
            Self::InvalidRequestPath(_) => "invalid_request_path",
            Self::InvalidRequestQuery(_) => "invalid_request_query",
            Self::IOError(_) => "io_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::Unspecified(_) => "unspecified",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InsufficientPermissions(_) => "forbidden",
            Self::NoRecordFound(_) => "not_found",
            Self::OrderFlow(e) => e.kind(),
            Self::PaymentFlow(e) => e.kind(),
        }
    }
}

fn order_flow_status(e: &OrderFlowError) -> StatusCode {
    use OrderFlowError::*;
    match e {
        OrderNotFound(_) | RestaurantNotFound(_) => StatusCode::NOT_FOUND,
        InvalidTransition { .. } => StatusCode::CONFLICT,
        ConcurrentModification(_) => StatusCode::CONFLICT,
        ActorNotPermitted { .. } => StatusCode::FORBIDDEN,
        PartnerAlreadyAssigned(_) | NotReadyForPickup(_) | NoDeliveryPartner(_) => StatusCode::CONFLICT,
        BelowMinimumOrder { .. } | ValidationError(_) => StatusCode::BAD_REQUEST,
        DatabaseError(_) | QueueError(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn payment_flow_status(e: &PaymentFlowError) -> StatusCode {
    use PaymentFlowError::*;
    match e {
        PaymentNotFound(_) | OrderNotFound(_) => StatusCode::NOT_FOUND,
        NotOrderOwner(_) => StatusCode::FORBIDDEN,
        PaymentAlreadyExists(_) | OrderNotPayable(..) | InvalidPaymentState(..) => StatusCode::CONFLICT,
        RefundInProgress(_) => StatusCode::CONFLICT,
        ConcurrentModification(_) => StatusCode::CONFLICT,
        UnsupportedMethod | InvalidRefundAmount { .. } => StatusCode::BAD_REQUEST,
        InvalidSignature(_) | MalformedEvent(_) => StatusCode::BAD_REQUEST,
        PaymentCreationFailed(_) | RefundFailed(_) | ProviderRejected(_) => StatusCode::BAD_GATEWAY,
        ProviderUnavailable(_) | DatabaseError(_) | QueueError(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestQuery(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OrderFlow(e) => order_flow_status(e),
            Self::PaymentFlow(e) => payment_flow_status(e),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut builder = HttpResponse::build(status);
        builder.insert_header(ContentType::json());
        let message = if status == StatusCode::SERVICE_UNAVAILABLE {
            error!("💻️ Temporary failure: {self}");
            builder.insert_header(("Retry-After", RETRY_AFTER_SECS));
            format!("{self}. This is temporary, please retry.")
        } else if status == StatusCode::CONFLICT && self.kind() == "concurrent_modification" {
            format!("{self}. Please retry.")
        } else {
            self.to_string()
        };
        builder.body(json!({ "error": self.kind(), "message": message }).to_string())
    }
}
