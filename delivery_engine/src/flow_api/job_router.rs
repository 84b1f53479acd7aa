use std::sync::Arc;

use async_trait::async_trait;
use log::*;

use crate::{
    db::traits::DeliveryDatabase,
    flow_api::{order_flow_api::OrderFlowApi, payment_flow_api::PaymentFlowApi},
    gateway::PaymentProvider,
    notifications::NotificationDispatcher,
    queue::{Job, JobError, JobHandler},
};

/// Routes every [`Job`] to the API that owns it. This is the only [`JobHandler`] the server runs.
pub struct JobRouter<B, P> {
    orders: Arc<OrderFlowApi<B>>,
    payments: Arc<PaymentFlowApi<B, P>>,
    dispatcher: NotificationDispatcher,
}

impl<B, P> JobRouter<B, P> {
    pub fn new(
        orders: Arc<OrderFlowApi<B>>,
        payments: Arc<PaymentFlowApi<B, P>>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self { orders, payments, dispatcher }
    }
}

#[async_trait]
impl<B, P> JobHandler for JobRouter<B, P>
where
    B: DeliveryDatabase,
    P: PaymentProvider,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match job {
            Job::UpdateOrderStatus { order_id, target_status, reason, payment_status, requested_by } => {
                self.orders
                    .apply_status_job(*order_id, *target_status, reason.clone(), *payment_status, *requested_by)
                    .await?;
            },
            Job::CalculateEstimatedDelivery { order_id } => {
                self.orders.calculate_estimated_delivery(*order_id).await?;
            },
            Job::ProcessPayment { payment_id } => {
                self.payments.process_payment(*payment_id).await?;
            },
            Job::CheckPendingPayments {} => {
                self.payments.poll_pending_payments().await?;
            },
            Job::AutoCancelUnpaidOrders {} => {
                let report = self.orders.auto_cancel_unpaid_orders().await?;
                trace!("📬️ Unpaid-order sweep: {} cancelled, {} skipped", report.cancelled.len(), report.skipped.len());
            },
            Job::DispatchNotification { target, message } => {
                self.dispatcher.dispatch(target, message).await;
            },
        }
        Ok(())
    }
}
