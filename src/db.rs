//! Caller-facing database facade.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::config::DbConfig;
use crate::connection::{ConnectionFactory, SharedConnection, factory_fn};
use crate::error::SqlConduitError;
use crate::pool::{ConnectionPool, ConnectionSource, SingleConnectionHolder};
use crate::registry::Adapter;
use crate::transaction::TransactionCoordinator;

/// Logical handle to one database.
///
/// Owns the configuration, a pool variant chosen from the configured
/// concurrency mode, and a transaction coordinator. Created once per logical
/// database; all downstream resources are owned exclusively by the handle
/// and live until it is dropped.
#[derive(Debug)]
pub struct DatabaseHandle {
    config: DbConfig,
    scheme: Option<String>,
    source: ConnectionSource,
    transactions: TransactionCoordinator,
}

impl DatabaseHandle {
    /// Build a handle from a configuration and an explicit connection
    /// factory.
    ///
    /// A `single_threaded` configuration (explicit, or via the process-wide
    /// default) gets a [`SingleConnectionHolder`]; otherwise a
    /// [`ConnectionPool`] sized by `max_connections` (default 4).
    #[must_use]
    pub fn new(config: DbConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_scheme(config, factory, None)
    }

    /// Build a handle whose factory is the adapter's `connect` primitive.
    #[must_use]
    pub fn from_adapter(adapter: Arc<dyn Adapter>, config: DbConfig) -> Self {
        let scheme = adapter.scheme().to_string();
        let factory_config = config.clone();
        let factory = factory_fn(move || {
            let adapter = adapter.clone();
            let config = factory_config.clone();
            async move { adapter.connect(&config).await }
        });
        Self::with_scheme(config, factory, Some(scheme))
    }

    fn with_scheme(
        config: DbConfig,
        factory: Arc<dyn ConnectionFactory>,
        scheme: Option<String>,
    ) -> Self {
        let source = if config.effective_single_threaded() {
            debug!(?scheme, "creating single-threaded handle");
            ConnectionSource::Single(SingleConnectionHolder::new(factory))
        } else {
            let size = config.effective_max_connections();
            debug!(?scheme, size, "creating pooled handle");
            ConnectionSource::Pooled(ConnectionPool::new(size, factory))
        };
        Self {
            config,
            scheme,
            source,
            transactions: TransactionCoordinator::new(),
        }
    }

    /// Borrow a connection for the duration of `f`.
    ///
    /// Inside an open [`DatabaseHandle::transaction`] call chain this reuses
    /// the transaction's connection, so statements issued through the handle
    /// participate in the transaction instead of borrowing a second
    /// connection.
    ///
    /// # Errors
    ///
    /// Factory failures, then whatever `f` returns.
    pub async fn synchronize<T, F>(&self, f: F) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>>
            + Send
            + 'static,
        T: Send + 'static,
    {
        if let Some(conn) = self.transactions.current_connection() {
            return f(conn).await;
        }
        self.source.hold(f).await
    }

    /// Run `f` inside a transaction; nested calls join the outer one.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::transaction`].
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>>
            + Send
            + 'static,
        T: Send + 'static,
    {
        self.transactions.transaction(&self.source, f).await
    }

    /// Whether a connection can currently be obtained. Converts every
    /// failure to `false`; never raises for ordinary connectivity problems.
    pub async fn test_connection(&self) -> bool {
        self.synchronize(|_conn| Box::pin(async { Ok::<_, SqlConduitError>(()) }))
            .await
            .is_ok()
    }

    /// Run one SQL statement on a borrowed connection.
    ///
    /// # Errors
    ///
    /// Forwards the adapter's error unchanged.
    pub async fn execute(&self, sql: &str) -> Result<(), SqlConduitError> {
        let sql = sql.to_string();
        self.synchronize(move |conn| Box::pin(async move { conn.execute(&sql).await }))
            .await
    }

    /// Best-effort table existence probe.
    ///
    /// Uses the adapter's table listing when implemented; otherwise attempts
    /// a trivial read against the name. Approximate, not authoritative: any
    /// failure is treated as "does not exist".
    pub async fn table_exists(&self, name: &str) -> bool {
        let name = name.to_string();
        let probe = format!("SELECT NULL AS nil FROM {name} LIMIT 1");
        self.synchronize(move |conn| {
            Box::pin(async move {
                match conn.table_names().await {
                    Ok(tables) => Ok(tables.iter().any(|t| t == &name)),
                    Err(SqlConduitError::ConfigurationError(_)) => {
                        Ok(conn.execute(&probe).await.is_ok())
                    }
                    Err(_) => Ok(false),
                }
            })
        })
        .await
        .unwrap_or(false)
    }

    /// Compose a connection string from the configuration. Pure formatting,
    /// no I/O.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when the handle has no URI scheme (constructed
    /// from a bare factory) or the configuration lacks a host.
    pub fn build_uri(&self) -> Result<String, SqlConduitError> {
        let scheme = self.scheme.as_deref().ok_or_else(|| {
            SqlConduitError::ConfigurationError(
                "cannot build a URI for a handle without an adapter scheme".to_string(),
            )
        })?;
        self.config.connection_url(scheme)
    }

    /// The handle's configuration.
    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// The adapter scheme this handle was constructed for, if any.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The pool variant backing this handle.
    #[must_use]
    pub fn source(&self) -> &ConnectionSource {
        &self.source
    }

    /// The bounded pool, when running multi-threaded.
    #[must_use]
    pub fn pool(&self) -> Option<&ConnectionPool> {
        match &self.source {
            ConnectionSource::Pooled(pool) => Some(pool),
            ConnectionSource::Single(_) => None,
        }
    }
}
