//! Degenerate one-connection pool for single-threaded use.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::connection::{ConnectionFactory, SharedConnection};
use crate::error::SqlConduitError;

/// Exactly one lazily materialized connection, memoized for the life of the
/// holder.
///
/// Correctness precondition, not an optimization: a holder assumes a single
/// logical caller and performs no pool-level locking or fairness. Re-entrant
/// use is fine: a `hold` body may call `hold` again and observes the same
/// memoized connection.
pub struct SingleConnectionHolder {
    factory: Arc<dyn ConnectionFactory>,
    conn: OnceCell<SharedConnection>,
}

impl SingleConnectionHolder {
    /// Create a holder that materializes its connection on first use.
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            conn: OnceCell::new(),
        }
    }

    /// The memoized connection, materializing it on first call.
    ///
    /// # Errors
    ///
    /// Propagates the factory failure; a failed materialization is not
    /// memoized and the next call retries.
    pub async fn connection(&self) -> Result<SharedConnection, SqlConduitError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                Ok::<_, SqlConduitError>(SharedConnection::new(self.factory.connect().await?))
            })
            .await?;
        Ok(conn.clone())
    }

    /// Invoke `f` with the memoized connection.
    ///
    /// Failures from `f` are classified at this boundary: recognized
    /// [`SqlConduitError`] kinds pass through unchanged, anything else is
    /// downgraded to [`SqlConduitError::Other`] carrying the original
    /// message.
    ///
    /// # Errors
    ///
    /// Factory failures on first use, then whatever `f` returns (classified).
    pub async fn hold<T, F, E>(&self, f: F) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, E>> + Send,
        T: Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let conn = self.connection().await?;
        f(conn).await.map_err(SqlConduitError::classify)
    }
}

// Manual Debug because the factory is not Debug.
impl fmt::Debug for SingleConnectionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleConnectionHolder")
            .field("materialized", &self.conn.initialized())
            .finish()
    }
}
