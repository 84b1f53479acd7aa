//! Real-time notifications.
//!
//! [`ConnectionRegistry`] keeps track of who currently holds a live channel. [`NotificationDispatcher`] turns a
//! [`NotificationMessage`] and a [`NotificationTarget`] into deliveries through the registry. The dispatcher is only
//! ever driven by `dispatch_notification` jobs; order and payment code enqueue those jobs and move on.
mod dispatcher;
mod messages;
mod registry;

pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use messages::{MessageKind, NotificationMessage, NotificationTarget};
pub use registry::{ConnectionHandle, ConnectionRegistry, DeliveryError};
