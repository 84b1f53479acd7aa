use thiserror::Error;

use crate::{
    db::traits::StoreError,
    db_types::{Actor, Money, OrderId, OrderStatusType, PaymentId, PaymentStatusType, RestaurantId},
    gateway::ProviderError,
    queue::{JobError, QueueError},
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderFlowError {
    #[error("Order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("Restaurant {0} does not exist or is not accepting orders")]
    RestaurantNotFound(RestaurantId),
    #[error("Cannot move an order from {from} to {to}")]
    InvalidTransition { from: OrderStatusType, to: OrderStatusType },
    #[error("Order {0} was modified concurrently. Reload it and try again")]
    ConcurrentModification(OrderId),
    #[error("{actor} may not perform this action on order {order_id}")]
    ActorNotPermitted { actor: Actor, order_id: OrderId },
    #[error("Order {0} already has a delivery partner")]
    PartnerAlreadyAssigned(OrderId),
    #[error("Order {0} is not ready for pickup")]
    NotReadyForPickup(OrderId),
    #[error("Order {0} has no delivery partner assigned")]
    NoDeliveryPartner(OrderId),
    #[error("The order subtotal of {subtotal} is below the restaurant minimum of {minimum}")]
    BelowMinimumOrder { subtotal: Money, minimum: Money },
    #[error("Invalid order: {0}")]
    ValidationError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Could not enqueue follow-up work: {0}")]
    QueueError(String),
}

impl OrderFlowError {
    /// A stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderNotFound(_) => "order_not_found",
            Self::RestaurantNotFound(_) => "restaurant_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::ActorNotPermitted { .. } => "forbidden",
            Self::PartnerAlreadyAssigned(_) => "partner_already_assigned",
            Self::NotReadyForPickup(_) => "not_ready_for_pickup",
            Self::NoDeliveryPartner(_) => "no_delivery_partner",
            Self::BelowMinimumOrder { .. } => "below_minimum_order",
            Self::ValidationError(_) => "validation_error",
            Self::DatabaseError(_) => "database_error",
            Self::QueueError(_) => "queue_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_) | Self::DatabaseError(_) | Self::QueueError(_))
    }
}

impl From<StoreError> for OrderFlowError {
    fn from(e: StoreError) -> Self {
        Self::DatabaseError(e.to_string())
    }
}

impl From<QueueError> for OrderFlowError {
    fn from(e: QueueError) -> Self {
        Self::QueueError(e.to_string())
    }
}

impl From<OrderFlowError> for JobError {
    fn from(e: OrderFlowError) -> Self {
        if e.is_transient() {
            JobError::Retryable(e.to_string())
        } else {
            JobError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PaymentFlowError {
    #[error("Payment {0} does not exist")]
    PaymentNotFound(PaymentId),
    #[error("Order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("Order {0} does not belong to the requesting customer")]
    NotOrderOwner(OrderId),
    #[error("Order {0} already has a payment")]
    PaymentAlreadyExists(OrderId),
    #[error("Order {0} cannot be paid for in its current state ({1})")]
    OrderNotPayable(OrderId, OrderStatusType),
    #[error("Cash on delivery does not use online payment")]
    UnsupportedMethod,
    #[error("Could not create the payment: {0}")]
    PaymentCreationFailed(String),
    #[error("Could not refund the payment: {0}")]
    RefundFailed(String),
    #[error("A refund of payment {0} is already under way")]
    RefundInProgress(PaymentId),
    #[error("Payment {0} is {1}, which does not allow this operation")]
    InvalidPaymentState(PaymentId, PaymentStatusType),
    #[error("Refund amount {amount} must be positive and no more than {available}")]
    InvalidRefundAmount { amount: Money, available: Money },
    #[error("Payment {0} was modified concurrently. Try again")]
    ConcurrentModification(PaymentId),
    #[error("Webhook signature is invalid: {0}")]
    InvalidSignature(String),
    #[error("Webhook payload is malformed: {0}")]
    MalformedEvent(String),
    #[error("The payment provider is unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("The payment provider rejected the request: {0}")]
    ProviderRejected(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Could not enqueue follow-up work: {0}")]
    QueueError(String),
}

impl PaymentFlowError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::NotOrderOwner(_) => "forbidden",
            Self::PaymentAlreadyExists(_) => "payment_already_exists",
            Self::OrderNotPayable(..) => "order_not_payable",
            Self::UnsupportedMethod => "unsupported_payment_method",
            Self::PaymentCreationFailed(_) => "payment_creation_failed",
            Self::RefundFailed(_) => "refund_failed",
            Self::RefundInProgress(_) => "refund_in_progress",
            Self::InvalidPaymentState(..) => "invalid_payment_state",
            Self::InvalidRefundAmount { .. } => "invalid_refund_amount",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::MalformedEvent(_) => "malformed_event",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::DatabaseError(_) => "database_error",
            Self::QueueError(_) => "queue_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification(_) |
                Self::ProviderUnavailable(_) |
                Self::DatabaseError(_) |
                Self::QueueError(_)
        )
    }
}

impl From<StoreError> for PaymentFlowError {
    fn from(e: StoreError) -> Self {
        Self::DatabaseError(e.to_string())
    }
}

impl From<QueueError> for PaymentFlowError {
    fn from(e: QueueError) -> Self {
        Self::QueueError(e.to_string())
    }
}

impl From<ProviderError> for PaymentFlowError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(s) => Self::ProviderUnavailable(s),
            ProviderError::Rejected(s) => Self::ProviderRejected(s),
            ProviderError::InvalidSignature(s) => Self::InvalidSignature(s),
            ProviderError::MalformedEvent(s) => Self::MalformedEvent(s),
        }
    }
}

impl From<PaymentFlowError> for JobError {
    fn from(e: PaymentFlowError) -> Self {
        if e.is_transient() {
            JobError::Retryable(e.to_string())
        } else {
            JobError::Fatal(e.to_string())
        }
    }
}
