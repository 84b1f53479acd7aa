use std::sync::Arc;

use log::*;
use serde::Serialize;

use super::{ConnectionRegistry, DeliveryError, NotificationMessage, NotificationTarget};
use crate::db_types::UserId;

/// The outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<UserId>,
    /// Users whose connection failed during the send and was removed.
    pub evicted: Vec<UserId>,
    pub not_connected: Vec<UserId>,
}

impl DispatchReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

/// Delivers notifications through the [`ConnectionRegistry`]. Stateless apart from the shared registry.
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Delivers `message` to `target`. Nobody being connected is not an error; nor is a failed send, which only evicts
    /// the stale connection.
    pub async fn dispatch(&self, target: &NotificationTarget, message: &NotificationMessage) -> DispatchReport {
        let report = match target {
            NotificationTarget::User(user_id) => {
                let mut report = DispatchReport::default();
                match self.registry.send_to_user(*user_id, message).await {
                    Ok(()) => report.delivered.push(*user_id),
                    Err(DeliveryError::NotConnected(id)) => report.not_connected.push(id),
                    Err(DeliveryError::ChannelClosed(id)) => report.evicted.push(id),
                }
                report
            },
            NotificationTarget::Role(role) => self.registry.send_to_role(*role, message).await,
            NotificationTarget::All => self.registry.send_to_all(message).await,
        };
        trace!(
            "📡️ {:?} for {target:?}: {} delivered, {} evicted, {} offline",
            message.kind,
            report.delivered.len(),
            report.evicted.len(),
            report.not_connected.len()
        );
        report
    }
}
