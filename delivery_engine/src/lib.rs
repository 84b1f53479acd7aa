//! Delivery Engine
//!
//! The core of the food delivery server: the order state machine, payment reconciliation against an external
//! provider, real-time notification fan-out and the background task queue that ties them together. The engine knows
//! nothing about HTTP or websockets; the server crate adapts it to the outside world.
//!
//! The library is divided into these sections:
//! 1. Storage ([`mod@db`]). Orders, payments and the catalog live behind the traits in [`db::traits`]. There is a
//!    Sqlite backend and an in-memory backend. Every write that changes an order or payment is a compare-and-set on a
//!    version number.
//! 2. The public API ([`mod@flow_api`]). [`OrderFlowApi`] and [`PaymentFlowApi`] are where all business rules live.
//! 3. The task queue ([`mod@queue`]). At-least-once delivery with bounded concurrency, exponential backoff and a
//!    dead-letter log. All follow-up work (notifications, order transitions triggered by payments, delivery estimates)
//!    is enqueued, never done inline.
//! 4. Notifications ([`mod@notifications`]). The connection registry and the dispatcher that job workers drive.
//! 5. The provider boundary ([`mod@gateway`]).
pub mod db;

pub mod db_types;
pub mod flow_api;
pub mod gateway;
pub mod helpers;
pub mod notifications;
pub mod queue;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use db::memory::MemoryDatabase;
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::traits::{CatalogManagement, DeliveryDatabase, OrderManagement, PaymentManagement, StoreError};
pub use flow_api::{
    errors::{OrderFlowError, PaymentFlowError},
    job_router::JobRouter,
    order_flow_api::{OrderFlowApi, OrderFlowConfig},
    order_objects,
    payment_flow_api::{PaymentFlowApi, PaymentFlowConfig},
    payment_objects,
};
