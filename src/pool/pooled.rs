//! Bounded connection pool with FIFO waiter service.
//!
//! Lock discipline: all slot bookkeeping lives under one `std::sync::Mutex`
//! that is never held across an await point. The factory runs outside the
//! lock against a reserved slot, so it is never invoked concurrently for the
//! same slot and a failed materialization never consumes capacity. Waiters
//! are parked on oneshot channels and served in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::{ConnectionFactory, SharedConnection};
use crate::error::SqlConduitError;

/// What a parked acquirer receives when a slot frees up.
enum Handoff {
    /// A released connection, lent directly without touching the idle list.
    Lent(SharedConnection),
    /// A slot opened up (invalidation or failed materialization); re-run the
    /// acquire decision, which may now materialize a replacement.
    Retry,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<SharedConnection>,
    in_use: Vec<SharedConnection>,
    /// Slots currently being materialized by the factory, outside the lock.
    reserved: usize,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

impl PoolState {
    fn materialized(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.reserved
    }

    /// Hand a connection to the first waiter still listening, else park it
    /// on the idle list. The connection must already be off `in_use`.
    fn hand_back(&mut self, mut conn: SharedConnection) {
        while let Some(waiter) = self.waiters.pop_front() {
            let kept = conn.clone();
            if waiter.tx.send(Handoff::Lent(conn)).is_ok() {
                self.in_use.push(kept);
                debug!(waiter = waiter.id, "connection handed to waiter");
                return;
            }
            // That waiter timed out or dropped; try the next one.
            conn = kept;
        }
        self.idle.push(conn);
    }

    /// Wake one waiter to re-run its acquire decision against a freed slot.
    fn wake_one_for_retry(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.send(Handoff::Retry).is_ok() {
                return;
            }
        }
    }
}

enum Plan {
    Ready(SharedConnection),
    Materialize,
    Wait { id: u64, rx: oneshot::Receiver<Handoff> },
}

/// Bounded pool of lazily materialized physical connections.
///
/// At most `max_size` connections ever exist; each is lent to exactly one
/// caller at a time and recycled indefinitely until [`ConnectionPool::invalidate`]
/// removes it. `acquire` is the only suspending operation in the crate.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    max_size: usize,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Create a pool of at most `max_size` connections (clamped to ≥ 1)
    /// produced on demand by `factory`.
    #[must_use]
    pub fn new(max_size: usize, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            max_size: max_size.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a connection, waiting indefinitely for a free slot.
    ///
    /// # Errors
    ///
    /// Propagates a factory failure when a new connection has to be
    /// materialized.
    pub async fn acquire(&self) -> Result<SharedConnection, SqlConduitError> {
        self.acquire_timeout(None).await
    }

    /// Borrow a connection, waiting at most `timeout` (when given) for a
    /// free slot. Served FIFO relative to other waiters.
    ///
    /// # Errors
    ///
    /// [`SqlConduitError::PoolExhausted`] on expiry. The expired waiter is
    /// removed from the queue with no side effects on pool state. Factory
    /// failures propagate as-is.
    pub async fn acquire_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<SharedConnection, SqlConduitError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        // A waiter woken for a retry was first in line; if it loses the race
        // for the freed slot it re-enqueues at the front, keeping its
        // arrival-order position.
        let mut front_of_queue = false;
        loop {
            let plan = {
                let mut state = self.lock();
                if let Some(conn) = state.idle.pop() {
                    state.in_use.push(conn.clone());
                    Plan::Ready(conn)
                } else if state.materialized() < self.max_size {
                    state.reserved += 1;
                    Plan::Materialize
                } else {
                    let id = state.next_waiter_id;
                    state.next_waiter_id += 1;
                    let (tx, rx) = oneshot::channel();
                    let waiter = Waiter { id, tx };
                    if front_of_queue {
                        state.waiters.push_front(waiter);
                    } else {
                        state.waiters.push_back(waiter);
                    }
                    Plan::Wait { id, rx }
                }
            };

            match plan {
                Plan::Ready(conn) => {
                    debug!("lending idle connection");
                    return Ok(conn);
                }
                Plan::Materialize => return self.materialize().await,
                Plan::Wait { id, mut rx } => {
                    let handoff = match deadline {
                        None => rx.await.ok(),
                        Some(at) => match tokio::time::timeout_at(at, &mut rx).await {
                            Ok(received) => received.ok(),
                            Err(_elapsed) => return Err(self.expire_waiter(id, &mut rx)),
                        },
                    };
                    match handoff {
                        Some(Handoff::Lent(conn)) => return Ok(conn),
                        // Retry, or sender dropped during pool teardown races.
                        Some(Handoff::Retry) | None => continue,
                    }
                }
            }
        }
    }

    /// Run the factory against a reserved slot, outside the state lock.
    async fn materialize(&self) -> Result<SharedConnection, SqlConduitError> {
        debug!("materializing new connection");
        let mut reservation = SlotReservation {
            pool: self,
            armed: true,
        };
        match self.factory.connect().await {
            Ok(raw) => {
                let conn = SharedConnection::new(raw);
                let mut state = self.lock();
                reservation.armed = false;
                state.reserved -= 1;
                state.in_use.push(conn.clone());
                Ok(conn)
            }
            Err(err) => {
                let mut state = self.lock();
                reservation.armed = false;
                state.reserved -= 1;
                // The slot is free again; let the next waiter try it.
                state.wake_one_for_retry();
                debug!(error = %err, "connection factory failed");
                Err(err)
            }
        }
    }

    /// Remove a timed-out waiter, reclaiming a handoff that raced the expiry.
    fn expire_waiter(&self, id: u64, rx: &mut oneshot::Receiver<Handoff>) -> SqlConduitError {
        let mut state = self.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
            state.waiters.remove(pos);
        } else {
            match rx.try_recv() {
                Ok(Handoff::Lent(conn)) => {
                    if let Some(pos) = state.in_use.iter().position(|c| c.same_connection(&conn)) {
                        state.in_use.remove(pos);
                    }
                    state.hand_back(conn);
                }
                Ok(Handoff::Retry) => state.wake_one_for_retry(),
                Err(_) => {}
            }
        }
        debug!(waiter = id, "acquire timed out");
        SqlConduitError::PoolExhausted("timed out waiting for a free connection".to_string())
    }

    /// Return a borrowed connection to the pool, waking the first waiter.
    ///
    /// # Errors
    ///
    /// [`SqlConduitError::Other`] when `conn` is not currently lent by this
    /// pool. Releasing more than was acquired is a caller bug and is
    /// reported rather than silently ignored.
    pub fn release(&self, conn: SharedConnection) -> Result<(), SqlConduitError> {
        let mut state = self.lock();
        let pos = state
            .in_use
            .iter()
            .position(|c| c.same_connection(&conn))
            .ok_or_else(|| {
                SqlConduitError::Other(
                    "released a connection that is not checked out from this pool".to_string(),
                )
            })?;
        state.in_use.remove(pos);
        state.hand_back(conn);
        debug!("connection released");
        Ok(())
    }

    /// Permanently remove a connection that failed irrecoverably, freeing
    /// its slot so a future `acquire` may materialize a replacement.
    ///
    /// # Errors
    ///
    /// [`SqlConduitError::Other`] when `conn` is not currently lent by this
    /// pool.
    pub fn invalidate(&self, conn: SharedConnection) -> Result<(), SqlConduitError> {
        let mut state = self.lock();
        let pos = state
            .in_use
            .iter()
            .position(|c| c.same_connection(&conn))
            .ok_or_else(|| {
                SqlConduitError::Other(
                    "invalidated a connection that is not checked out from this pool".to_string(),
                )
            })?;
        state.in_use.remove(pos);
        drop(conn);
        state.wake_one_for_retry();
        debug!("connection invalidated");
        Ok(())
    }

    /// Borrow a connection for the duration of `f`, releasing it on every
    /// exit path (normal return, error, or cancellation of the returned
    /// future). A [`SqlConduitError::ConnectionFailure`] escaping `f`
    /// invalidates the connection instead of recycling it.
    ///
    /// # Errors
    ///
    /// Propagates factory failures and whatever `f` returns.
    pub async fn hold<T, F>(&self, f: F) -> Result<T, SqlConduitError>
    where
        F: FnOnce(SharedConnection) -> BoxFuture<'static, Result<T, SqlConduitError>> + Send,
        T: Send,
    {
        let conn = self.acquire().await?;
        let mut lease = Lease {
            pool: self,
            conn: Some(conn.clone()),
        };
        let result = f(conn).await;
        if let Err(err) = &result
            && err.is_connection_failure()
            && let Some(conn) = lease.conn.take()
        {
            let _ = self.invalidate(conn);
        }
        result
    }

    /// Number of idle (materialized, not lent) connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of connections currently lent out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.lock().in_use.len()
    }

    /// Number of connections materialized so far (idle + lent + being
    /// created).
    #[must_use]
    pub fn materialized_count(&self) -> usize {
        self.lock().materialized()
    }

    /// Capacity of the pool.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Rolls back a slot reservation when the owning `acquire` future is
/// dropped while the factory is still running (timeout or `select!`
/// cancellation), so a cancelled materialization never shrinks capacity.
/// Disarmed under the state lock once either `materialize` arm has settled
/// the books itself.
struct SlotReservation<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.lock();
            state.reserved -= 1;
            state.wake_one_for_retry();
            debug!("cancelled materialization returned its slot");
        }
    }
}

/// Releases the held connection when dropped, which also covers the
/// cancellation of a `hold` future at an await point inside the body.
struct Lease<'a> {
    pool: &'a ConnectionPool,
    conn: Option<SharedConnection>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.release(conn);
        }
    }
}

// Manual Debug because the factory is not Debug.
impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.max_size)
            .field("idle", &state.idle.len())
            .field("in_use", &state.in_use.len())
            .field("reserved", &state.reserved)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
