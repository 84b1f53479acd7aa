mod catalog_management;
mod order_management;
mod payment_management;

pub use catalog_management::CatalogManagement;
pub use order_management::OrderManagement;
pub use payment_management::PaymentManagement;
use thiserror::Error;

/// Errors every storage backend reports. Backend specific failures are folded into [`StoreError::DriverError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("The requested record does not exist")]
    NotFound,
    #[error("The record was modified by another writer (expected version {expected})")]
    VersionConflict { expected: i64 },
    #[error("The record already exists: {0}")]
    AlreadyExists(String),
    #[error("Database driver error: {0}")]
    DriverError(String),
}

/// Everything the order lifecycle coordinator needs from persistent storage.
pub trait DeliveryDatabase: OrderManagement + PaymentManagement + CatalogManagement + Clone + Send + Sync + 'static {
    fn url(&self) -> &str;
}
