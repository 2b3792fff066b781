//! Connection lifecycle and transaction coordination for pluggable SQL
//! adapters.
//!
//! Callers obtain a [`DatabaseHandle`], a logical handle to one database,
//! without knowing how many physical connections exist or how they are
//! shared. Multi-threaded handles own a bounded [`ConnectionPool`] (FIFO
//! fairness, optional acquire timeout); single-threaded handles own a
//! [`SingleConnectionHolder`]. [`DatabaseHandle::transaction`] wraps a unit
//! of work in BEGIN/COMMIT/ROLLBACK on a single borrowed connection, with
//! re-entrant calls joining the outer transaction.
//!
//! Wire-level drivers live behind the [`Adapter`] and [`AdapterConnection`]
//! traits and are registered per URI scheme in an [`AdapterRegistry`].

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod transaction;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{
    DEFAULT_MAX_CONNECTIONS, DbConfig, default_single_threaded, set_default_single_threaded,
};
pub use connection::{AdapterConnection, ConnectionFactory, SharedConnection, factory_fn};
pub use db::DatabaseHandle;
pub use error::SqlConduitError;
pub use pool::{ConnectionPool, ConnectionSource, SingleConnectionHolder};
pub use registry::{Adapter, AdapterRegistry};
pub use transaction::TransactionCoordinator;
