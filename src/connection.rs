//! Physical-connection plumbing shared by the pool and the single holder.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SqlConduitError;

/// Capability interface a concrete adapter implements for one physical
/// connection.
///
/// The core never interprets SQL text; it only frames when statements run
/// (borrow/release brackets, BEGIN/COMMIT/ROLLBACK). `table_names` is
/// optional; adapters without a listing primitive keep the default, and
/// [`crate::DatabaseHandle::table_exists`] falls back to a probe query.
#[async_trait]
pub trait AdapterConnection: Send {
    /// Run one SQL statement, reporting success or failure.
    ///
    /// # Errors
    ///
    /// Adapter-defined. A [`SqlConduitError::ConnectionFailure`] marks the
    /// connection as unusable and causes the pool to invalidate it.
    async fn execute(&mut self, sql: &str) -> Result<(), SqlConduitError>;

    /// List the table names visible on this connection, if the adapter
    /// supports listing.
    ///
    /// # Errors
    ///
    /// The default returns `ConfigurationError`; adapters with a listing
    /// primitive override it.
    async fn table_names(&mut self) -> Result<Vec<String>, SqlConduitError> {
        Err(SqlConduitError::ConfigurationError(
            "table listing is not implemented for this adapter".to_string(),
        ))
    }
}

/// Factory that produces one physical connection on demand.
///
/// Supplied once at pool construction; invoked lazily, at most once per slot
/// materialization, and never concurrently for the same slot.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open one physical connection.
    ///
    /// # Errors
    ///
    /// Returns [`SqlConduitError::ConnectionFailure`] (or an adapter-mapped
    /// kind) when the connection cannot be established.
    async fn connect(&self) -> Result<Box<dyn AdapterConnection>, SqlConduitError>;
}

struct FactoryFn<F>(F);

#[async_trait]
impl<F, Fut> ConnectionFactory for FactoryFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Box<dyn AdapterConnection>, SqlConduitError>> + Send,
{
    async fn connect(&self) -> Result<Box<dyn AdapterConnection>, SqlConduitError> {
        (self.0)().await
    }
}

/// Wrap a plain async closure as a [`ConnectionFactory`].
pub fn factory_fn<F, Fut>(f: F) -> Arc<dyn ConnectionFactory>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Box<dyn AdapterConnection>, SqlConduitError>> + Send + 'static,
{
    Arc::new(FactoryFn(f))
}

/// Handle to a lent physical connection.
///
/// Clonable so that re-entrant callers (nested `hold`, joined transactions)
/// can observe the same underlying connection. Exclusivity across unrelated
/// callers is enforced by pool bookkeeping, not by this type; the inner
/// mutex only serializes individual statements.
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<Mutex<Box<dyn AdapterConnection>>>,
}

impl SharedConnection {
    pub(crate) fn new(conn: Box<dyn AdapterConnection>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run one SQL statement on this connection.
    ///
    /// # Errors
    ///
    /// Forwards the adapter's error unchanged.
    pub async fn execute(&self, sql: &str) -> Result<(), SqlConduitError> {
        self.inner.lock().await.execute(sql).await
    }

    /// List table names, if the adapter supports listing.
    ///
    /// # Errors
    ///
    /// Forwards the adapter's error unchanged.
    pub async fn table_names(&self) -> Result<Vec<String>, SqlConduitError> {
        self.inner.lock().await.table_names().await
    }

    /// Whether two handles refer to the same physical connection.
    #[must_use]
    pub fn same_connection(&self, other: &SharedConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// Manual Debug because the boxed adapter connection is not Debug.
impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedConnection")
            .field(&Arc::as_ptr(&self.inner))
            .finish()
    }
}
