use std::{fmt::Debug, sync::Arc};

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db::traits::{DeliveryDatabase, StoreError},
    db_types::{
        Actor,
        Money,
        NewPayment,
        OrderId,
        OrderStatusType,
        Payment,
        PaymentId,
        PaymentMethod,
        PaymentStatusType,
        PaymentUpdate,
        UserId,
    },
    flow_api::{
        errors::PaymentFlowError,
        payment_objects::{PaymentIntentResponse, WebhookOutcome},
    },
    gateway::{map_provider_status, IntentRequest, PaymentEvent, PaymentEventKind, PaymentProvider},
    notifications::{NotificationMessage, NotificationTarget},
    queue::{Job, JobProducer},
};

/// How many times a reconciliation re-reads the payment after losing a version race before giving up.
const CONVERGENCE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PaymentFlowConfig {
    pub currency: String,
    /// Payments younger than this are left to the webhook. Older unsettled ones are polled.
    pub grace_period: Duration,
    /// Processed webhook event ids are remembered for this long.
    pub event_retention: Duration,
    /// A refund claim older than this is treated as abandoned and may be taken over.
    pub refund_claim_timeout: Duration,
}

impl Default for PaymentFlowConfig {
    fn default() -> Self {
        Self {
            currency: delivery_common::DEFAULT_CURRENCY_CODE.to_string(),
            grace_period: Duration::minutes(5),
            event_retention: Duration::days(7),
            refund_claim_timeout: Duration::minutes(10),
        }
    }
}

/// `PaymentFlowApi` keeps internal payments in step with the provider.
///
/// Webhooks and the periodic poll both end in [`Self::apply_provider_status`]. A status is written only while the
/// payment is still open (`PENDING` or `PROCESSING`), and only the writer that wins the version check enqueues the
/// follow-up order transition. So however many signals arrive, in whatever order, the order sees one transition.
pub struct PaymentFlowApi<B, P> {
    db: B,
    provider: Arc<P>,
    jobs: JobProducer,
    config: PaymentFlowConfig,
}

impl<B, P> Debug for PaymentFlowApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi ({})", self.config.currency)
    }
}

impl<B, P> PaymentFlowApi<B, P> {
    pub fn new(db: B, provider: Arc<P>, jobs: JobProducer, config: PaymentFlowConfig) -> Self {
        Self { db, provider, jobs, config }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

impl<B, P> PaymentFlowApi<B, P>
where
    B: DeliveryDatabase,
    P: PaymentProvider,
{
    /// Opens a provider payment intent for a `PENDING` order and records the payment.
    ///
    /// If the provider call fails, no payment row is written.
    pub async fn create_intent(
        &self,
        customer_id: UserId,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<PaymentIntentResponse, PaymentFlowError> {
        let order = self.db.fetch_order(order_id).await?.ok_or(PaymentFlowError::OrderNotFound(order_id))?;
        if order.customer_id != customer_id {
            return Err(PaymentFlowError::NotOrderOwner(order_id));
        }
        if !method.is_online() {
            return Err(PaymentFlowError::UnsupportedMethod);
        }
        if order.status != OrderStatusType::Pending {
            return Err(PaymentFlowError::OrderNotPayable(order_id, order.status));
        }
        if self.db.fetch_payment_for_order(order_id).await?.is_some() {
            return Err(PaymentFlowError::PaymentAlreadyExists(order_id));
        }
        let request =
            IntentRequest { order_id, amount: order.total_amount, currency: self.config.currency.clone(), method };
        let intent = self.provider.create_intent(&request).await.map_err(|e| {
            warn!("💳️ Could not create a payment intent for {order_id}: {e}");
            PaymentFlowError::PaymentCreationFailed(e.to_string())
        })?;
        let new_payment = NewPayment {
            order_id,
            provider_reference: intent.provider_reference,
            amount: order.total_amount,
            currency: self.config.currency.clone(),
            method,
        };
        let payment = self.db.insert_payment(new_payment).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => PaymentFlowError::PaymentAlreadyExists(order_id),
            e => e.into(),
        })?;
        info!("💳️ {} created for {order_id} ({} {})", payment.id, payment.amount, payment.currency);
        Ok(PaymentIntentResponse { payment, client_secret: intent.client_secret })
    }

    pub async fn fetch_payment(&self, payment_id: PaymentId) -> Result<Payment, PaymentFlowError> {
        self.db.fetch_payment(payment_id).await?.ok_or(PaymentFlowError::PaymentNotFound(payment_id))
    }

    /// The customer's payments, newest first.
    pub async fn list_customer_payments(&self, customer_id: UserId) -> Result<Vec<Payment>, PaymentFlowError> {
        Ok(self.db.fetch_payments_for_customer(customer_id).await?)
    }

    /// Queues an immediate provider check for one payment, on behalf of the customer who owns it (or staff).
    /// Returns the job id.
    pub async fn request_payment_sync(&self, actor: Actor, payment_id: PaymentId) -> Result<u64, PaymentFlowError> {
        let payment = self.fetch_payment(payment_id).await?;
        let allowed = match actor {
            Actor::Admin(_) | Actor::System => true,
            Actor::Customer(id) => {
                let order_id = payment.order_id;
                let order = self.db.fetch_order(order_id).await?.ok_or(PaymentFlowError::OrderNotFound(order_id))?;
                order.customer_id == id
            },
            _ => false,
        };
        if !allowed {
            return Err(PaymentFlowError::NotOrderOwner(payment.order_id));
        }
        let id = self.jobs.enqueue(Job::ProcessPayment { payment_id })?;
        debug!("💳️ Sync of {payment_id} requested by {actor}, queued as job {id}");
        Ok(id)
    }

    /// Verifies and applies a raw provider webhook.
    ///
    /// The signature is checked before anything else happens. A bad signature is rejected without touching storage.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome, PaymentFlowError> {
        let event = self.provider.verify_event(payload, signature).map_err(|e| {
            warn!("💳️ Rejecting webhook: {e}");
            PaymentFlowError::from(e)
        })?;
        self.handle_webhook_event(event).await
    }

    /// Applies a verified webhook event at most once per event id.
    ///
    /// The event id is recorded before processing. If processing fails, the record is removed again so the provider's
    /// redelivery is not mistaken for a duplicate.
    pub async fn handle_webhook_event(&self, event: PaymentEvent) -> Result<WebhookOutcome, PaymentFlowError> {
        if !self.db.record_webhook_event(&event.event_id).await? {
            debug!("💳️ Webhook event {} has been seen before", event.event_id);
            return Ok(WebhookOutcome::Duplicate);
        }
        match self.process_event(&event).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("💳️ Webhook event {} ({}) failed: {e}", event.event_id, event.event_type);
                if let Err(forget_err) = self.db.forget_webhook_event(&event.event_id).await {
                    error!("💳️ Could not release webhook event {}: {forget_err}", event.event_id);
                }
                Err(e)
            },
        }
    }

    async fn process_event(&self, event: &PaymentEvent) -> Result<WebhookOutcome, PaymentFlowError> {
        let intent = match (&event.kind, &event.intent) {
            (PaymentEventKind::Other, _) | (_, None) => {
                trace!("💳️ Ignoring webhook event {} of type {}", event.event_id, event.event_type);
                return Ok(WebhookOutcome::Ignored);
            },
            (_, Some(intent)) => intent,
        };
        let Some(payment) = self.db.fetch_payment_by_reference(&intent.provider_reference).await? else {
            info!(
                "💳️ Webhook {} refers to unknown provider reference {}. Leaving it to the poller",
                event.event_id, intent.provider_reference
            );
            return Ok(WebhookOutcome::UnknownPayment);
        };
        let status = map_provider_status(&intent.status, intent.last_error.as_deref());
        debug!("💳️ Webhook {} reports {} for {}", event.event_id, status, payment.id);
        let applied = self.apply_provider_status(payment, status, intent.last_error.clone()).await?;
        Ok(if applied { WebhookOutcome::Applied } else { WebhookOutcome::AlreadyConverged })
    }

    /// The convergence rule. Writes `status` only if the stored payment is still open and `status` moves it forward,
    /// retrying on lost version races. Returns `true` if this call made the change.
    pub async fn apply_provider_status(
        &self,
        mut payment: Payment,
        status: PaymentStatusType,
        failure_reason: Option<String>,
    ) -> Result<bool, PaymentFlowError> {
        for _ in 0..CONVERGENCE_ATTEMPTS {
            if !status.is_advance_from(payment.status) {
                trace!("💳️ {} is already {}. Ignoring {status}", payment.id, payment.status);
                return Ok(false);
            }
            let reason = if status == PaymentStatusType::Failed { failure_reason.clone() } else { None };
            let update = PaymentUpdate::default().with_status(status).with_failure_reason(reason);
            match self.db.update_payment(payment.id, payment.version, update).await {
                Ok(updated) => {
                    info!("💳️ {} moved {} -> {}", updated.id, payment.status, updated.status);
                    self.enqueue_follow_ups(&updated).await?;
                    return Ok(true);
                },
                Err(StoreError::VersionConflict { .. }) => {
                    debug!("💳️ {} changed underneath us. Re-reading", payment.id);
                    payment = self.fetch_payment(payment.id).await?;
                },
                Err(StoreError::NotFound) => return Err(PaymentFlowError::PaymentNotFound(payment.id)),
                Err(e) => return Err(e.into()),
            }
        }
        Err(PaymentFlowError::ConcurrentModification(payment.id))
    }

    async fn enqueue_follow_ups(&self, payment: &Payment) -> Result<(), PaymentFlowError> {
        let order_id = payment.order_id;
        let order = self.db.fetch_order(order_id).await?.ok_or(PaymentFlowError::OrderNotFound(order_id))?;
        let order_job = |target: OrderStatusType, reason: Option<String>| Job::UpdateOrderStatus {
            order_id: order.id,
            target_status: target,
            reason,
            payment_status: Some(payment.status),
            requested_by: Actor::System,
        };
        let mut jobs = Vec::with_capacity(2);
        match payment.status {
            PaymentStatusType::Completed => jobs.push(order_job(OrderStatusType::Confirmed, None)),
            PaymentStatusType::Failed => {
                let reason = match &payment.failure_reason {
                    Some(r) => format!("payment failed: {r}"),
                    None => "payment failed".to_string(),
                };
                jobs.push(order_job(OrderStatusType::Cancelled, Some(reason)));
            },
            PaymentStatusType::Cancelled => {
                jobs.push(order_job(OrderStatusType::Cancelled, Some("payment cancelled".into())))
            },
            PaymentStatusType::Pending | PaymentStatusType::Processing | PaymentStatusType::Refunded => {},
        }
        jobs.push(Job::notify(
            NotificationTarget::User(order.customer_id),
            NotificationMessage::payment_update(order.id, payment.status, payment.failure_reason.as_deref()),
        ));
        self.jobs.enqueue_all(jobs)?;
        Ok(())
    }

    /// Asks the provider for the current status of one payment and applies it. Settled payments are left alone.
    pub async fn process_payment(&self, payment_id: PaymentId) -> Result<bool, PaymentFlowError> {
        let payment = self.fetch_payment(payment_id).await?;
        if payment.status.is_settled() {
            trace!("💳️ {payment_id} is settled ({}). Nothing to poll", payment.status);
            return Ok(false);
        }
        let remote = self.provider.fetch_intent_status(&payment.provider_reference).await?;
        let status = map_provider_status(&remote.status, remote.last_error.as_deref());
        self.apply_provider_status(payment, status, remote.last_error).await
    }

    /// Queues a `process_payment` job for every unsettled payment older than the grace period, and forgets webhook
    /// event ids past their retention. Returns the number of payments queued.
    pub async fn poll_pending_payments(&self) -> Result<usize, PaymentFlowError> {
        let now = Utc::now();
        let unsettled = self.db.fetch_unsettled_payments(now - self.config.grace_period).await?;
        let count = unsettled.len();
        self.jobs.enqueue_all(unsettled.into_iter().map(|p| Job::ProcessPayment { payment_id: p.id }))?;
        let pruned = self.db.prune_webhook_events(now - self.config.event_retention).await?;
        if count > 0 || pruned > 0 {
            debug!("💳️ {count} unsettled payments queued for polling. {pruned} old webhook events forgotten");
        }
        Ok(count)
    }

    /// Refunds all or part of a completed payment.
    ///
    /// The refund amount is first claimed on the payment with a versioned write, so of two concurrent requests only
    /// one ever reaches the provider. The other fails with [`PaymentFlowError::RefundInProgress`]. Once the provider
    /// accepts, the payment is marked `REFUNDED` and the order (if it is not already terminal) is queued for the
    /// `REFUNDED` transition. If the provider refuses, the claim is released.
    pub async fn process_refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Money>,
    ) -> Result<Payment, PaymentFlowError> {
        let payment = self.fetch_payment(payment_id).await?;
        if payment.status != PaymentStatusType::Completed {
            return Err(PaymentFlowError::InvalidPaymentState(payment_id, payment.status));
        }
        let amount = amount.unwrap_or(payment.amount);
        if amount <= Money::from(0) || amount > payment.amount {
            return Err(PaymentFlowError::InvalidRefundAmount { amount, available: payment.amount });
        }
        let claim_is_live = !payment.refund_amount.is_zero() &&
            Utc::now() - payment.updated_at < self.config.refund_claim_timeout;
        if claim_is_live {
            debug!("💳️ {payment_id} already has a refund of {} under way", payment.refund_amount);
            return Err(PaymentFlowError::RefundInProgress(payment_id));
        }
        let claimed = self
            .db
            .update_payment(payment_id, payment.version, PaymentUpdate::default().with_refund_claim(amount))
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict { .. } => PaymentFlowError::RefundInProgress(payment_id),
                StoreError::NotFound => PaymentFlowError::PaymentNotFound(payment_id),
                e => e.into(),
            })?;
        trace!("💳️ Refund of {amount} claimed on {payment_id} at version {}", claimed.version);
        let refund = match self.provider.refund(&claimed.provider_reference, amount).await {
            Ok(r) if matches!(r.status.as_str(), "succeeded" | "pending") => r,
            Ok(r) => {
                let reason = format!("refund {} is {}", r.refund_reference, r.status);
                return Err(self.release_refund_claim(&claimed, reason).await);
            },
            Err(e) => {
                warn!("💳️ Refund of {amount} on {payment_id} failed: {e}");
                return Err(self.release_refund_claim(&claimed, e.to_string()).await);
            },
        };
        let update = PaymentUpdate::default().with_status(PaymentStatusType::Refunded).with_refund(amount, Utc::now());
        match self.db.update_payment(payment_id, claimed.version, update).await {
            Ok(updated) => {
                info!("💳️ {payment_id} refunded {amount} (provider refund {})", refund.refund_reference);
                self.enqueue_refund_follow_ups(&updated).await?;
                Ok(updated)
            },
            Err(StoreError::VersionConflict { .. }) => {
                error!(
                    "💳️ {payment_id} changed while provider refund {} was in flight. It needs a manual check",
                    refund.refund_reference
                );
                Err(PaymentFlowError::ConcurrentModification(payment_id))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Clears a refund claim after the provider refused it, and returns the error to report.
    async fn release_refund_claim(&self, claimed: &Payment, reason: String) -> PaymentFlowError {
        let release = PaymentUpdate::default().with_refund_claim(Money::default());
        if let Err(e) = self.db.update_payment(claimed.id, claimed.version, release).await {
            error!("💳️ Could not release the refund claim on {}: {e}", claimed.id);
        }
        PaymentFlowError::RefundFailed(reason)
    }

    async fn enqueue_refund_follow_ups(&self, payment: &Payment) -> Result<(), PaymentFlowError> {
        let order_id = payment.order_id;
        let order = self.db.fetch_order(order_id).await?.ok_or(PaymentFlowError::OrderNotFound(order_id))?;
        let mut jobs = Vec::with_capacity(2);
        if order.status.can_refund() {
            jobs.push(Job::UpdateOrderStatus {
                order_id: order.id,
                target_status: OrderStatusType::Refunded,
                reason: Some("refunded".into()),
                payment_status: Some(PaymentStatusType::Refunded),
                requested_by: Actor::System,
            });
        }
        jobs.push(Job::notify(
            NotificationTarget::User(order.customer_id),
            NotificationMessage::refund_processed(order.id, payment.refund_amount),
        ));
        self.jobs.enqueue_all(jobs)?;
        Ok(())
    }
}
