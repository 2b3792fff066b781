//! Connection ownership: the bounded pool and the single-connection holder.

pub mod pooled;
pub mod single;

pub use pooled::ConnectionPool;
pub use single::SingleConnectionHolder;

use futures_util::future::BoxFuture;

use crate::connection::SharedConnection;
use crate::error::SqlConduitError;

/// The pool variant owned by a [`crate::DatabaseHandle`].
///
/// Chosen once at construction from the configured concurrency mode:
/// multi-threaded handles get a [`ConnectionPool`], single-threaded handles
/// the no-locking [`SingleConnectionHolder`].
#[derive(Debug)]
pub enum ConnectionSource {
    /// Bounded pool for concurrent callers.
    Pooled(ConnectionPool),
    /// One memoized connection for a single logical caller.
    Single(SingleConnectionHolder),
}

impl ConnectionSource {
    /// Borrow a connection for the duration of `f`, releasing it on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Propagates factory failures and whatever `f` returns.
    pub async fn hold<T, F>(&self, f: F) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>> + Send,
        T: Send,
    {
        match self {
            ConnectionSource::Pooled(pool) => pool.hold(f).await,
            ConnectionSource::Single(holder) => holder.hold(f).await,
        }
    }
}
