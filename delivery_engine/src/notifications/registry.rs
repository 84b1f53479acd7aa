use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use log::*;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use super::{DispatchReport, NotificationMessage};
use crate::db_types::{Role, UserId};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{0} has no live connection")]
    NotConnected(UserId),
    #[error("The connection for {0} is closed")]
    ChannelClosed(UserId),
}

/// The sending half of one live connection. Each handle gets a process-unique id so that a connection task can
/// tell whether it is still the registered one when it shuts down.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed), sender }
    }

    /// Creates a handle together with the receiving end that the connection task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, payload: String) -> Result<(), ()> {
        self.sender.send(payload).map_err(|_| ())
    }
}

struct Entry {
    role: Role,
    handle: ConnectionHandle,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<UserId, Entry>,
    roles: HashMap<Role, HashSet<UserId>>,
}

impl RegistryState {
    fn remove(&mut self, user_id: UserId) -> Option<Entry> {
        let entry = self.connections.remove(&user_id)?;
        if let Some(members) = self.roles.get_mut(&entry.role) {
            members.remove(&user_id);
        }
        Some(entry)
    }
}

/// Who is connected right now, and how to reach them.
///
/// Invariant: at most one live handle per user. Every public method takes the internal lock once, so each one is
/// atomic with respect to the others and callers need no locking of their own.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` as the live connection for `user_id`, replacing any previous one. The superseded handle is
    /// returned and is never written to by the registry again.
    pub async fn register(&self, user_id: UserId, role: Role, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut state = self.state.write().await;
        let previous = state.remove(user_id);
        state.roles.entry(role).or_default().insert(user_id);
        state.connections.insert(user_id, Entry { role, handle });
        match &previous {
            Some(p) => debug!("📡️ {user_id} reconnected as {role}; connection #{} superseded", p.handle.id),
            None => debug!("📡️ {user_id} connected as {role}"),
        }
        previous.map(|e| e.handle)
    }

    /// Removes the user's connection and role membership.
    pub async fn unregister(&self, user_id: UserId, role: Role) {
        let mut state = self.state.write().await;
        state.remove(user_id);
        if let Some(members) = state.roles.get_mut(&role) {
            members.remove(&user_id);
        }
        debug!("📡️ {user_id} disconnected");
    }

    /// Unregisters the user only if `connection_id` is still their current connection. A connection task calls this
    /// on exit so that it cannot remove the connection that replaced it.
    pub async fn release(&self, user_id: UserId, connection_id: u64) -> bool {
        let mut state = self.state.write().await;
        let is_current = state.connections.get(&user_id).map(|e| e.handle.id == connection_id).unwrap_or(false);
        if is_current {
            state.remove(user_id);
            debug!("📡️ {user_id} released connection #{connection_id}");
        }
        is_current
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.state.read().await.connections.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn role_members(&self, role: Role) -> Vec<UserId> {
        let state = self.state.read().await;
        let mut members = state.roles.get(&role).map(|m| m.iter().copied().collect::<Vec<_>>()).unwrap_or_default();
        members.sort();
        members
    }

    /// Sends to a single user. A failed send evicts the connection at once and is reported, never retried.
    pub async fn send_to_user(&self, user_id: UserId, message: &NotificationMessage) -> Result<(), DeliveryError> {
        self.send_payload(user_id, message.to_json()).await
    }

    async fn send_payload(&self, user_id: UserId, payload: String) -> Result<(), DeliveryError> {
        let failed_handle = {
            let state = self.state.read().await;
            let entry = state.connections.get(&user_id).ok_or(DeliveryError::NotConnected(user_id))?;
            match entry.handle.send(payload) {
                Ok(()) => return Ok(()),
                Err(()) => entry.handle.id,
            }
        };
        if self.release(user_id, failed_handle).await {
            info!("📡️ Evicted stale connection #{failed_handle} for {user_id}");
        }
        Err(DeliveryError::ChannelClosed(user_id))
    }

    /// Sends to every connected member of `role`. Failures are evicted and collected; they never stop the
    /// broadcast.
    pub async fn send_to_role(&self, role: Role, message: &NotificationMessage) -> DispatchReport {
        let members = self.role_members(role).await;
        self.send_to_many(members, message).await
    }

    pub async fn send_to_all(&self, message: &NotificationMessage) -> DispatchReport {
        let mut users = self.state.read().await.connections.keys().copied().collect::<Vec<_>>();
        users.sort();
        self.send_to_many(users, message).await
    }

    async fn send_to_many(&self, users: Vec<UserId>, message: &NotificationMessage) -> DispatchReport {
        let payload = message.to_json();
        let mut report = DispatchReport::default();
        for user_id in users {
            match self.send_payload(user_id, payload.clone()).await {
                Ok(()) => report.delivered.push(user_id),
                Err(DeliveryError::NotConnected(id)) => report.not_connected.push(id),
                Err(DeliveryError::ChannelClosed(id)) => report.evicted.push(id),
            }
        }
        report
    }
}
