//! # Food delivery server
//! The HTTP and websocket front end of the delivery engine. It is responsible for:
//! * Accepting orders, status changes and payment requests from customers, restaurants, delivery partners and admins.
//! * Receiving payment events from Stripe.
//! * Holding a websocket per connected user and pushing order, payment and delivery updates down it.
//! * Running the background job queue and the periodic reconciliation jobs.
//!
//! Callers are authenticated upstream. The gateway passes the caller's id and role in the `X-User-Id` and
//! `X-User-Role` headers (see [identity](identity/index.html)).
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `GET /health`: A health check route that returns a 200 OK response.
//! * `POST /webhook/payments`: Stripe webhook events.
//! * `GET /ws`: The real-time channel.
//! * `POST /api/orders`: Place an order (customers).
//! * `GET /api/orders`: The caller's order history, filterable by `status` and paged with `limit` and `offset`.
//! * `GET /api/restaurants/{id}/orders`: A restaurant's orders (its owner and admins).
//! * `GET /api/deliveries/available`: Orders ready for pickup with no courier yet (delivery partners).
//! * `GET /api/orders/{id}`: Order details, for anyone involved in the order.
//! * `POST /api/orders/{id}/status`: Request a status change. Applied asynchronously.
//! * `POST /api/orders/{id}/cancel`: Cancel an order (customers and admins).
//! * `POST /api/orders/{id}/assign`: Assign a delivery partner.
//! * `POST /api/payments/intent`: Create a payment intent for an order (customers).
//! * `GET /api/payments/mine`: The caller's payments (customers).
//! * `POST /api/payments/{id}/refund`: Refund a payment (admins).
//! * `POST /api/payments/{id}/sync`: Re-check a payment with the provider.
//! * `GET /api/admin/dead_letters`: Jobs that failed for good (admins).

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod identity;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod ws;

#[cfg(test)]
mod endpoint_tests;
