//! Mock adapter and scripted connections for exercising the core without a
//! real driver. Available behind the `test-utils` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DbConfig;
use crate::connection::{AdapterConnection, ConnectionFactory};
use crate::error::SqlConduitError;
use crate::registry::Adapter;

type SqlFailure = Arc<dyn Fn(&str) -> Option<SqlConduitError> + Send + Sync>;

/// Shared, ordered log of every statement executed across mock connections.
#[derive(Clone, Default)]
pub struct ExecuteLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecuteLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Snapshot of the log in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many logged entries equal `entry` exactly.
    #[must_use]
    pub fn count_of(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

/// Scripted physical connection: records every statement into an
/// [`ExecuteLog`], optionally failing the ones a script selects.
pub struct MockConnection {
    /// Zero-based materialization order of this connection.
    pub id: usize,
    log: ExecuteLog,
    fail_sql: Option<SqlFailure>,
    tables: Option<Vec<String>>,
}

#[async_trait]
impl AdapterConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        if let Some(fail) = &self.fail_sql
            && let Some(err) = fail(sql)
        {
            self.log.record(format!("{sql} [failed]"));
            return Err(err);
        }
        self.log.record(sql);
        Ok(())
    }

    async fn table_names(&mut self) -> Result<Vec<String>, SqlConduitError> {
        match &self.tables {
            Some(tables) => Ok(tables.clone()),
            None => Err(SqlConduitError::ConfigurationError(
                "table listing is not implemented for this adapter".to_string(),
            )),
        }
    }
}

/// Mock adapter doubling as a connection factory.
///
/// `Arc<MockAdapter>` can be handed to [`crate::DatabaseHandle::new`] as the
/// factory, registered in an [`crate::AdapterRegistry`] as an adapter, or
/// both; either path produces [`MockConnection`]s sharing one log.
pub struct MockAdapter {
    scheme: String,
    log: ExecuteLog,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_sql: Option<SqlFailure>,
    tables: Option<Vec<String>>,
    connect_delay: Option<Duration>,
}

impl MockAdapter {
    #[must_use]
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            log: ExecuteLog::new(),
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_sql: None,
            tables: None,
            connect_delay: None,
        }
    }

    /// Sleep this long before every connect, simulating a slow server.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Give connections a table-listing primitive returning these names.
    #[must_use]
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Fail selected statements: `f` returns the error to raise for a given
    /// SQL text, or `None` to let it succeed.
    #[must_use]
    pub fn with_failing_sql<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<SqlConduitError> + Send + Sync + 'static,
    {
        self.fail_sql = Some(Arc::new(f));
        self
    }

    /// Toggle connect failures at runtime.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// The shared statement log.
    #[must_use]
    pub fn log(&self) -> ExecuteLog {
        self.log.clone()
    }

    /// How many connections have been materialized.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<Box<dyn AdapterConnection>, SqlConduitError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SqlConduitError::ConnectionFailure(
                "mock adapter refused to connect".to_string(),
            ));
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id,
            log: self.log.clone(),
            fail_sql: self.fail_sql.clone(),
            tables: self.tables.clone(),
        }))
    }
}

#[async_trait]
impl ConnectionFactory for MockAdapter {
    async fn connect(&self) -> Result<Box<dyn AdapterConnection>, SqlConduitError> {
        self.open().await
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn connect(
        &self,
        _config: &DbConfig,
    ) -> Result<Box<dyn AdapterConnection>, SqlConduitError> {
        self.open().await
    }
}
