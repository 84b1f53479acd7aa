use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Actor, OrderId, OrderStatusType, PaymentId, PaymentStatusType},
    notifications::{NotificationMessage, NotificationTarget},
};

/// Every kind of background work, with its payload. On the wire a job is `{"job": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", content = "payload", rename_all = "snake_case")]
pub enum Job {
    UpdateOrderStatus {
        order_id: OrderId,
        target_status: OrderStatusType,
        #[serde(default)]
        reason: Option<String>,
        /// Mirrors the payment's new status onto the order in the same write.
        #[serde(default)]
        payment_status: Option<PaymentStatusType>,
        #[serde(default)]
        requested_by: Actor,
    },
    CalculateEstimatedDelivery {
        order_id: OrderId,
    },
    ProcessPayment {
        payment_id: PaymentId,
    },
    CheckPendingPayments {},
    AutoCancelUnpaidOrders {},
    DispatchNotification {
        target: NotificationTarget,
        message: NotificationMessage,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::UpdateOrderStatus { .. } => "update_order_status",
            Job::CalculateEstimatedDelivery { .. } => "calculate_estimated_delivery",
            Job::ProcessPayment { .. } => "process_payment",
            Job::CheckPendingPayments {} => "check_pending_payments",
            Job::AutoCancelUnpaidOrders {} => "auto_cancel_unpaid_orders",
            Job::DispatchNotification { .. } => "dispatch_notification",
        }
    }

    pub fn update_order_status(order_id: OrderId, target_status: OrderStatusType) -> Self {
        Job::UpdateOrderStatus { order_id, target_status, reason: None, payment_status: None, requested_by: Actor::System }
    }

    pub fn notify(target: NotificationTarget, message: NotificationMessage) -> Self {
        Job::DispatchNotification { target, message }
    }
}
