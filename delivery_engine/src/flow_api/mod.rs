//! # Delivery engine public API
//!
//! * [`order_flow_api`] owns the order state machine: placing orders, status transitions, courier assignment, delivery
//!   estimates and the unpaid-order sweep.
//! * [`payment_flow_api`] keeps payments in step with the provider through webhooks and polling, and issues refunds.
//! * [`job_router`] connects both APIs, and the notification dispatcher, to the task queue.
//!
//! Both APIs are created from a storage backend and a [`crate::queue::JobProducer`]. Side effects such as notifications
//! and follow-up transitions are never performed inline. They are enqueued as jobs.
//!
//! ```rust,ignore
//! let db = SqliteDatabase::new_with_url(url, 5).await?;
//! let queue = TaskQueue::new(QueueConfig::default());
//! let orders = OrderFlowApi::new(db.clone(), queue.producer(), OrderFlowConfig::default());
//! let order = orders.place_order(customer_id, request).await?;
//! ```

pub mod errors;
pub mod job_router;
pub mod order_flow_api;
pub mod order_objects;
pub mod payment_flow_api;
pub mod payment_objects;
