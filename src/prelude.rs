//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::{
    DEFAULT_MAX_CONNECTIONS, DbConfig, default_single_threaded, set_default_single_threaded,
};
pub use crate::connection::{AdapterConnection, ConnectionFactory, SharedConnection, factory_fn};
pub use crate::db::DatabaseHandle;
pub use crate::error::SqlConduitError;
pub use crate::pool::{ConnectionPool, ConnectionSource, SingleConnectionHolder};
pub use crate::registry::{Adapter, AdapterRegistry};
pub use crate::transaction::TransactionCoordinator;
