//! The real-time channel.
//!
//! Each websocket belongs to one caller and is registered in the [`ConnectionRegistry`] under their user id and role.
//! Notifications arrive through the connection's channel and are written to the socket as JSON text frames.
//!
//! Clients may send:
//! * `{"type": "ping"}`, answered with a `pong`.
//! * `{"type": "location_update", "order_id", "latitude", "longitude", "timestamp"}` (delivery partners only), relayed
//!   to the order's customer.
//! * `{"type": "order_update", "order_id", "status"}` (restaurant owners only), queued as an order status change after
//!   checking that the caller owns the order's restaurant.
//!
//! Anything the server cannot act on is answered with an `error` message. The connection stays open.
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use delivery_engine::{
    db_types::Role,
    notifications::{ConnectionHandle, ConnectionRegistry, NotificationMessage},
    DeliveryDatabase,
    OrderFlowApi,
};
use futures::StreamExt;
use log::*;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{data_objects::ClientMessage, identity::Identity};

pub async fn websocket<B: DeliveryDatabase>(
    req: HttpRequest,
    body: web::Payload,
    identity: Identity,
    orders: web::Data<OrderFlowApi<B>>,
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let (handle, outbound) = ConnectionHandle::channel();
    let connection_id = handle.id();
    if registry.register(identity.user_id, identity.role, handle).await.is_some() {
        debug!("📡️ {} reconnected. Their previous connection was replaced", identity.user_id);
    }
    info!("📡️ {} {} connected (connection {connection_id})", identity.role, identity.user_id);
    let connection = Connection {
        identity,
        connection_id,
        orders: orders.into_inner(),
        registry: registry.into_inner(),
    };
    actix_web::rt::spawn(connection.run(session, stream, outbound));
    Ok(response)
}

struct Connection<B> {
    identity: Identity,
    connection_id: u64,
    orders: Arc<OrderFlowApi<B>>,
    registry: Arc<ConnectionRegistry>,
}

impl<B: DeliveryDatabase> Connection<B> {
    async fn run(self, mut session: Session, mut stream: MessageStream, mut outbound: UnboundedReceiver<String>) {
        let user_id = self.identity.user_id;
        let orders: &OrderFlowApi<B> = &self.orders;
        let close_reason = loop {
            tokio::select! {
                next = outbound.recv() => match next {
                    Some(text) => {
                        if session.text(text).await.is_err() {
                            break None;
                        }
                    },
                    // The registry dropped our handle: a newer connection for this user took over.
                    None => break None,
                },
                next = stream.next() => match next {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&self.identity, &text, orders).await {
                            if session.text(reply.to_json()).await.is_err() {
                                break None;
                            }
                        }
                    },
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break None;
                        }
                    },
                    Some(Ok(Message::Close(reason))) => break reason,
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        warn!("📡️ Protocol error on the connection for {user_id}: {e}");
                        break None;
                    },
                    None => break None,
                },
            }
        };
        self.registry.release(user_id, self.connection_id).await;
        let _ = session.close(close_reason).await;
        info!("📡️ {user_id} disconnected (connection {})", self.connection_id);
    }
}

/// Acts on one inbound text frame. Returns the reply to send back on the same connection, if there is one.
pub async fn handle_client_message<B: DeliveryDatabase>(
    identity: &Identity,
    text: &str,
    orders: &OrderFlowApi<B>,
) -> Option<NotificationMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("📡️ Unreadable message from {}: {e}", identity.user_id);
            return Some(NotificationMessage::error(format!("Unrecognised message. {e}")));
        },
    };
    let result = match message {
        ClientMessage::Ping => return Some(NotificationMessage::pong()),
        ClientMessage::LocationUpdate(update) => {
            if identity.role != Role::DeliveryPartner {
                return Some(NotificationMessage::error("Only delivery partners can send location updates"));
            }
            orders.report_delivery_location(identity.user_id, update).await
        },
        ClientMessage::OrderUpdate { order_id, status } => {
            if identity.role != Role::RestaurantOwner {
                return Some(NotificationMessage::error("Only restaurant owners can send order updates"));
            }
            orders.handle_restaurant_order_update(identity.user_id, order_id, status).await.map(|job_id| {
                trace!("📡️ Order update from {} queued as job {job_id}", identity.user_id);
            })
        },
    };
    match result {
        Ok(()) => None,
        Err(e) => {
            debug!("📡️ Message from {} refused: {e}", identity.user_id);
            Some(NotificationMessage::error(e.to_string()))
        },
    }
}
