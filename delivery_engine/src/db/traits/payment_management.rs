use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;
use crate::db_types::{NewPayment, OrderId, Payment, PaymentId, PaymentUpdate, UserId};

#[async_trait]
pub trait PaymentManagement {
    /// Stores a new payment in `PENDING`. An order has at most one payment, so a second insert for the same order
    /// (or the same provider reference) fails with [`StoreError::AlreadyExists`].
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    async fn fetch_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>, StoreError>;

    async fn fetch_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError>;

    async fn fetch_payment_by_reference(&self, provider_reference: &str) -> Result<Option<Payment>, StoreError>;

    /// Payments for every order placed by `customer_id`, newest first.
    async fn fetch_payments_for_customer(&self, customer_id: UserId) -> Result<Vec<Payment>, StoreError>;

    /// Versioned update, with the same contract as
    /// [`OrderManagement::update_order`](crate::db::traits::OrderManagement::update_order).
    async fn update_payment(
        &self,
        payment_id: PaymentId,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Payment, StoreError>;

    /// Payments in `PENDING` or `PROCESSING` that were created before `created_before`.
    async fn fetch_unsettled_payments(&self, created_before: DateTime<Utc>) -> Result<Vec<Payment>, StoreError>;

    /// Records that a provider event has been seen. Returns `false` if it had already been recorded.
    async fn record_webhook_event(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Removes a recorded event so that a redelivery is processed again. Used when processing fails after the event
    /// was recorded.
    async fn forget_webhook_event(&self, event_id: &str) -> Result<(), StoreError>;

    /// Deletes event records older than `before`, returning how many were removed.
    async fn prune_webhook_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
