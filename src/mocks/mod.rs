//! Mock implementations for testing.
//!
//! Provides an in-memory dialer and connection so pool behavior can be
//! exercised without sockets.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::transport::{cancelled, Dialer};

/// Greeting every mock connection starts with.
pub const MOCK_GREETING: &[u8] = b"220 mock.example.com ESMTP ready\r\n";

/// Counters shared by a mock dialer and every connection it produced.
#[derive(Debug, Default)]
pub struct MockStats {
    dialed: AtomicUsize,
    live: AtomicUsize,
    shutdowns: AtomicUsize,
    fail_shutdown: AtomicBool,
}

impl MockStats {
    /// Connections successfully dialed.
    pub fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    /// Connections dialed and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Shutdown attempts, successful or not.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockDialerState {
    /// Dial attempts so far, including failures.
    attempts: usize,
    /// Attempt index from which every dial fails.
    fail_from: Option<(usize, io::ErrorKind)>,
    /// Failures for the next attempts, in order.
    fail_next: VecDeque<io::ErrorKind>,
    delay: Option<Duration>,
    targets: Vec<(String, String)>,
}

/// Mock dialer producing [`MockConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct MockDialer {
    state: Arc<Mutex<MockDialerState>>,
    stats: Arc<MockStats>,
}

impl MockDialer {
    /// Creates a new mock dialer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next dial fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) -> &Self {
        self.state.lock().unwrap().fail_next.push_back(kind);
        self
    }

    /// Makes every dial from attempt `attempt` (zero-based) onward fail.
    pub fn fail_from(&self, attempt: usize, kind: io::ErrorKind) -> &Self {
        self.state.lock().unwrap().fail_from = Some((attempt, kind));
        self
    }

    /// Delays every dial.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        self.state.lock().unwrap().delay = Some(delay);
        self
    }

    /// Makes connection shutdowns fail.
    pub fn fail_shutdowns(&self, fail: bool) -> &Self {
        self.stats.fail_shutdown.store(fail, Ordering::SeqCst);
        self
    }

    /// Returns successful dials.
    pub fn dial_count(&self) -> usize {
        self.stats.dialed()
    }

    /// Returns the `(network, address)` of every dial attempt.
    pub fn targets(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().targets.clone()
    }

    /// Returns the shared counters.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    type Conn = MockConnection;

    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<MockConnection> {
        let (failure, delay) = {
            let mut state = self.state.lock().unwrap();
            let attempt = state.attempts;
            state.attempts += 1;
            state
                .targets
                .push((network.to_string(), address.to_string()));

            let failure = match state.fail_next.pop_front() {
                Some(kind) => Some(kind),
                None => state
                    .fail_from
                    .filter(|(from, _)| attempt >= *from)
                    .map(|(_, kind)| kind),
            };
            (failure, state.delay)
        };

        if let Some(delay) = delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(cancelled());
        }

        if let Some(kind) = failure {
            return Err(io::Error::new(kind, "mock dial failure"));
        }

        let id = self.stats.dialed.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection::new(id, Arc::clone(&self.stats)))
    }
}

/// In-memory connection: reads yield a greeting, writes are recorded.
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    shut_down: bool,
    stats: Arc<MockStats>,
}

impl MockConnection {
    fn new(id: usize, stats: Arc<MockStats>) -> Self {
        Self {
            id,
            inbound: MOCK_GREETING.iter().copied().collect(),
            written: Vec::new(),
            shut_down: false,
            stats,
        }
    }

    /// Dial-order identifier of this connection.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.clone()
    }

    /// Returns true once the connection was shut down.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MockConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = buf.remaining().min(this.inbound.len());
        let chunk: Vec<u8> = this.inbound.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.shut_down {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock connection shut down",
            )));
        }
        this.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        this.shut_down = true;

        if this.stats.fail_shutdown.load(Ordering::SeqCst) {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "mock shutdown failure")))
        } else {
            Poll::Ready(Ok(()))
        }
    }
}
