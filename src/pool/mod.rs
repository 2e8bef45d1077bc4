//! Bounded connection pool.
//!
//! [`ConnPool`] dials an initial batch of connections up front, grows lazily
//! up to `max_size`, and hands out [`PooledConn`] wrappers that go back to
//! the idle set when closed. All accounting lives behind one mutex that is
//! never held across an `.await`.

mod conn;

pub use conn::PooledConn;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_sizes, PoolConfig};
use crate::errors::{PoolError, PoolResult};
use crate::observability::{MetricsSnapshot, PoolMetrics, Timer};
use crate::transport::{cancelled, Dialer};
use crate::types::PoolStatus;

/// Mutable accounting guarded by the pool mutex.
struct PoolState<C> {
    /// Connections ready to hand out, oldest first.
    idle: VecDeque<C>,
    /// Idle plus checked-out connections (including dials in flight).
    total: usize,
    closed: bool,
}

/// Outcome of handing a connection back to the pool.
pub(crate) enum Reclaim<C> {
    /// The connection joined the idle set.
    Idle,
    /// The connection must be closed by the caller.
    Discard(C),
}

/// State shared between the pool handle and every checked-out wrapper.
pub(crate) struct Shared<C> {
    state: Mutex<PoolState<C>>,
    max_size: usize,
    metrics: PoolMetrics,
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        // The state is consistent after every critical section, so a panic
        // elsewhere while holding the lock leaves nothing to repair.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides, atomically with `get` and `close`, where a returned connection goes.
    pub(crate) fn reclaim(&self, conn: C, unusable: bool) -> Reclaim<C> {
        let mut state = self.lock();

        if state.closed || unusable || state.idle.len() >= self.max_size {
            state.total = state.total.saturating_sub(1);
            self.metrics.record_discard();

            #[cfg(feature = "tracing")]
            tracing::debug!(
                closed = state.closed,
                unusable = unusable,
                total = state.total,
                "Discarding returned connection"
            );

            Reclaim::Discard(conn)
        } else {
            state.idle.push_back(conn);
            self.metrics.record_reclaim();

            #[cfg(feature = "tracing")]
            tracing::debug!(idle = state.idle.len(), "Connection returned to pool");

            Reclaim::Idle
        }
    }

    /// Releases the accounting slot of a connection leaving the pool for good.
    pub(crate) fn detach(&self) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
        self.metrics.record_detach();
    }

    pub(crate) fn record_close_failure(&self) {
        self.metrics.record_close_failure();
    }
}

/// Accounting slot reserved for an on-demand dial.
///
/// Dropping the guard gives the slot back unless [`keep`](Self::keep) was
/// called once the dialed connection had been handed to a wrapper.
struct DialSlot<'a, C> {
    shared: &'a Shared<C>,
    armed: bool,
}

impl<'a, C> DialSlot<'a, C> {
    fn new(shared: &'a Shared<C>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<C> Drop for DialSlot<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.lock();
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// A bounded pool of connections to a single network endpoint.
///
/// Cloning the handle is cheap; all clones share the same connections.
pub struct ConnPool<D: Dialer> {
    inner: Arc<Inner<D>>,
}

struct Inner<D: Dialer> {
    dialer: D,
    network: String,
    address: String,
    initial_size: usize,
    shared: Arc<Shared<D::Conn>>,
}

impl<D: Dialer> Clone for ConnPool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dialer> fmt::Debug for ConnPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnPool")
            .field("network", &self.inner.network)
            .field("address", &self.inner.address)
            .field("dialer", &self.inner.dialer)
            .field("status", &self.status())
            .finish()
    }
}

impl<D: Dialer> ConnPool<D> {
    /// Creates a pool and dials `initial_size` connections before returning.
    ///
    /// `cancel` governs only these warm-up dials. If any of them fails, the
    /// connections dialed so far are shut down and a
    /// [`ConstructionDial`](crate::PoolErrorKind::ConstructionDial) error is
    /// returned.
    pub async fn connect(
        cancel: &CancellationToken,
        initial_size: usize,
        max_size: usize,
        dialer: D,
        network: impl Into<String>,
        address: impl Into<String>,
    ) -> PoolResult<Self> {
        validate_sizes(initial_size, max_size)?;

        let network = network.into();
        let address = address.into();
        let metrics = PoolMetrics::new();
        let mut idle = VecDeque::with_capacity(max_size);

        for _ in 0..initial_size {
            let result = if cancel.is_cancelled() {
                Err(cancelled())
            } else {
                dialer.dial(cancel, &network, &address).await
            };
            metrics.record_dial(result.is_ok());

            match result {
                Ok(conn) => idle.push_back(conn),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        address = %address,
                        dialed = idle.len(),
                        error = %e,
                        "Warm-up dial failed, closing connections"
                    );

                    for conn in idle.drain(..) {
                        let _ = shutdown(conn).await;
                    }
                    return Err(PoolError::construction_dial(&address, e));
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            network = %network,
            address = %address,
            initial_size = initial_size,
            max_size = max_size,
            "Connection pool ready"
        );

        let shared = Shared {
            state: Mutex::new(PoolState {
                idle,
                total: initial_size,
                closed: false,
            }),
            max_size,
            metrics,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                dialer,
                network,
                address,
                initial_size,
                shared: Arc::new(shared),
            }),
        })
    }

    /// Creates a pool from a validated configuration.
    pub async fn from_config(
        cancel: &CancellationToken,
        config: &PoolConfig,
        dialer: D,
    ) -> PoolResult<Self> {
        config.validate()?;
        Self::connect(
            cancel,
            config.initial_size,
            config.max_size,
            dialer,
            config.network.clone(),
            config.address.clone(),
        )
        .await
    }

    /// Takes an idle connection, or dials a new one while under the ceiling.
    ///
    /// Never waits for another caller: at the ceiling this fails with
    /// [`PoolExhausted`](crate::PoolErrorKind::PoolExhausted).
    pub async fn get(&self) -> PoolResult<PooledConn<D::Conn>> {
        self.get_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`get`](Self::get), but an on-demand dial gives up once `cancel` fires.
    pub async fn get_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledConn<D::Conn>> {
        let shared = &self.inner.shared;

        {
            let mut state = shared.lock();

            if state.closed {
                return Err(PoolError::closed());
            }

            if let Some(conn) = state.idle.pop_front() {
                shared.metrics.record_checkout(true);
                return Ok(PooledConn::new(conn, Arc::clone(shared)));
            }

            if state.total >= shared.max_size {
                shared.metrics.record_exhausted();

                #[cfg(feature = "tracing")]
                tracing::warn!(max_size = shared.max_size, "Connection pool exhausted");

                return Err(PoolError::exhausted(shared.max_size));
            }

            // Reserve the slot before dialing so concurrent callers cannot
            // overshoot the ceiling.
            state.total += 1;
        }

        // Released if the dial fails or this future is dropped mid-dial.
        let slot: DialSlot<'_, D::Conn> = DialSlot::new(shared);

        let timer = Timer::start("pool_dial");
        let result = self
            .inner
            .dialer
            .dial(cancel, &self.inner.network, &self.inner.address)
            .await;
        timer.stop();
        shared.metrics.record_dial(result.is_ok());

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                drop(slot);

                #[cfg(feature = "tracing")]
                tracing::warn!(address = %self.inner.address, error = %e, "On-demand dial failed");

                return Err(PoolError::dial_on_demand(&self.inner.address, e));
            }
        };

        let closed_meanwhile = shared.lock().closed;
        if closed_meanwhile {
            drop(slot);
            let _ = shutdown(conn).await;
            return Err(PoolError::closed());
        }

        slot.keep();
        shared.metrics.record_checkout(false);

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.inner.address, "Dialed new pooled connection");

        Ok(PooledConn::new(conn, Arc::clone(shared)))
    }

    /// Returns the number of idle connections.
    pub fn size(&self) -> usize {
        self.inner.shared.lock().idle.len()
    }

    /// Returns a snapshot of the pool's accounting.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.shared.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
            total: state.total,
            max_size: self.inner.shared.max_size,
            closed: state.closed,
        }
    }

    /// Returns a snapshot of the pool's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.shared.metrics.snapshot()
    }

    /// Returns the connection ceiling.
    pub fn max_size(&self) -> usize {
        self.inner.shared.max_size
    }

    /// Returns the number of connections dialed at construction.
    pub fn initial_size(&self) -> usize {
        self.inner.initial_size
    }

    /// Returns the network type passed to the dialer.
    pub fn network(&self) -> &str {
        &self.inner.network
    }

    /// Returns the address passed to the dialer.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().closed
    }

    /// Closes the pool and every idle connection.
    ///
    /// Calling this again is a no-op. Connections still checked out are left
    /// alone and get closed when their holder returns them. Every idle
    /// connection is shut down even if some fail; the first failure is
    /// returned.
    pub async fn close(&self) -> PoolResult<()> {
        let shared = &self.inner.shared;

        let drained: Vec<D::Conn> = {
            let mut state = shared.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;

            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            address = %self.inner.address,
            idle_closed = drained.len(),
            "Closing connection pool"
        );

        let mut first_error = None;
        for conn in drained {
            if let Err(e) = shutdown(conn).await {
                shared.record_close_failure();

                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to close idle connection");

                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(PoolError::reclaim_close(e)),
            None => Ok(()),
        }
    }
}

/// Shuts down the write side and drops the connection.
async fn shutdown<C: AsyncWrite + Unpin>(mut conn: C) -> std::io::Result<()> {
    conn.shutdown().await
}
