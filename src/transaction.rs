//! Transaction coordination: one BEGIN/COMMIT-or-ROLLBACK bracket per
//! outermost call chain per coordinator.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::connection::SharedConnection;
use crate::error::SqlConduitError;
use crate::pool::ConnectionSource;

tokio::task_local! {
    /// Open-transaction frames of the current call chain, innermost last.
    /// Scoped per call chain, so membership exists exactly for the dynamic
    /// extent of a `transaction` call and deregistration happens on scope
    /// exit regardless of how the body returns.
    static OPEN_TRANSACTIONS: Vec<TransactionFrame>;
}

#[derive(Clone)]
struct TransactionFrame {
    coordinator: u64,
    conn: SharedConnection,
}

static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(0);

/// Wraps units of work in BEGIN/COMMIT/ROLLBACK on a connection borrowed
/// from the handle's pool.
///
/// Nested `transaction` calls from the same call chain are not true nested
/// transactions: they silently join the outer one, so exactly one
/// BEGIN/COMMIT pair exists per outermost call per caller. Independent
/// concurrent callers each run their own top-level transaction.
#[derive(Debug)]
pub struct TransactionCoordinator {
    id: u64,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The connection of the transaction the current call chain has open
    /// with this coordinator, if any.
    #[must_use]
    pub fn current_connection(&self) -> Option<SharedConnection> {
        OPEN_TRANSACTIONS
            .try_with(|frames| {
                frames
                    .iter()
                    .rev()
                    .find(|frame| frame.coordinator == self.id)
                    .map(|frame| frame.conn.clone())
            })
            .ok()
            .flatten()
    }

    /// Run `f` inside a transaction on a single borrowed connection.
    ///
    /// Re-entrant calls join the open transaction and invoke `f` directly,
    /// with no BEGIN/COMMIT of their own. Otherwise: BEGIN, run `f`, COMMIT
    /// on success; on failure of `f` or of COMMIT, a best-effort ROLLBACK is
    /// issued and the original failure is re-raised unchanged. A rollback
    /// failure is suppressed in favor of the original cause.
    ///
    /// # Errors
    ///
    /// Borrow/factory failures, then the original failure of `f`, BEGIN, or
    /// COMMIT.
    pub async fn transaction<T, F>(
        &self,
        source: &ConnectionSource,
        f: F,
    ) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>>
            + Send
            + 'static,
        T: Send + 'static,
    {
        if let Some(conn) = self.current_connection() {
            debug!(coordinator = self.id, "joining open transaction");
            return f(conn).await;
        }

        let id = self.id;
        source
            .hold(move |conn| {
                Box::pin(async move {
                    let mut frames = OPEN_TRANSACTIONS.try_with(Vec::clone).unwrap_or_default();
                    frames.push(TransactionFrame {
                        coordinator: id,
                        conn: conn.clone(),
                    });
                    OPEN_TRANSACTIONS
                        .scope(frames, run_transaction(id, conn, f))
                        .await
                })
            })
            .await
    }
}

async fn run_transaction<T, F>(
    coordinator: u64,
    conn: SharedConnection,
    f: F,
) -> Result<T, SqlConduitError>
where
    F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>> + Send,
    T: Send,
{
    conn.execute("BEGIN").await?;
    debug!(coordinator, "transaction opened");
    match f(conn.clone()).await {
        Ok(value) => match conn.execute("COMMIT").await {
            Ok(()) => {
                debug!(coordinator, "transaction committed");
                Ok(value)
            }
            Err(commit_err) => {
                // Original cause wins; a rollback failure here is suppressed.
                let _ = conn.execute("ROLLBACK").await;
                debug!(coordinator, "commit failed, rolled back");
                Err(commit_err)
            }
        },
        Err(err) => {
            let _ = conn.execute("ROLLBACK").await;
            debug!(coordinator, "transaction rolled back");
            Err(err)
        }
    }
}
