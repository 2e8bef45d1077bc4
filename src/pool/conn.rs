//! Checked-out connection wrapper.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::{Reclaim, Shared};
use crate::errors::{PoolError, PoolResult};

/// A connection checked out of a [`ConnPool`](super::ConnPool).
///
/// Reads and writes go straight to the raw connection. [`close`](Self::close)
/// hands the connection back to the pool instead of closing the transport,
/// unless the pool is closed, full, or the connection was marked unusable.
/// Dropping the wrapper without closing it reclaims the connection the same
/// way, except that a discarded connection is dropped without a shutdown.
pub struct PooledConn<C> {
    conn: Option<C>,
    shared: Arc<Shared<C>>,
    unusable: bool,
}

impl<C> PooledConn<C> {
    pub(crate) fn new(conn: C, shared: Arc<Shared<C>>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            unusable: false,
        }
    }

    /// Marks the connection as broken so that closing it discards the raw
    /// connection rather than returning it to the pool.
    pub fn mark_unusable(&mut self) {
        self.unusable = true;
    }

    /// Returns true if the connection will be discarded on close.
    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    /// Returns true until the connection has been handed back.
    pub fn is_checked_out(&self) -> bool {
        self.conn.is_some()
    }

    /// Borrows the raw connection, or `None` after close.
    pub fn get_ref(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    /// Mutably borrows the raw connection, or `None` after close.
    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    /// Detaches the raw connection from the pool.
    ///
    /// The pool forgets the connection and frees its slot; the caller owns
    /// the transport from here on and is responsible for closing it.
    pub fn into_inner(mut self) -> Option<C> {
        let conn = self.conn.take()?;
        self.shared.detach();
        Some(conn)
    }
}

impl<C: AsyncWrite + Unpin> PooledConn<C> {
    /// Hands the connection back to the pool.
    ///
    /// Only the first call has any effect. When the connection is discarded
    /// rather than re-idled, its transport is shut down and a failure to do
    /// so is reported as [`ReclaimClose`](crate::PoolErrorKind::ReclaimClose).
    pub async fn close(&mut self) -> PoolResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        match self.shared.reclaim(conn, self.unusable) {
            Reclaim::Idle => Ok(()),
            Reclaim::Discard(mut conn) => conn.shutdown().await.map_err(|e| {
                self.shared.record_close_failure();

                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to close discarded connection");

                PoolError::reclaim_close(e)
            }),
        }
    }
}

impl<C> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // A discarded connection is simply dropped here.
            let _ = self.shared.reclaim(conn, self.unusable);
        }
    }
}

impl<C> fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("checked_out", &self.conn.is_some())
            .field("unusable", &self.unusable)
            .finish()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection already returned to pool")
}

impl<C: AsyncRead + Unpin> AsyncRead for PooledConn<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().conn.as_mut() {
            Some(conn) => Pin::new(conn).poll_read(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for PooledConn<C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().conn.as_mut() {
            Some(conn) => Pin::new(conn).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().conn.as_mut() {
            Some(conn) => Pin::new(conn).poll_write_vectored(cx, bufs),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.conn.as_ref().map_or(false, |conn| conn.is_write_vectored())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().conn.as_mut() {
            Some(conn) => Pin::new(conn).poll_flush(cx),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    /// Shuts down the raw transport. The connection is then discarded on
    /// close instead of going back to the pool.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.conn.as_mut() {
            Some(conn) => {
                this.unusable = true;
                Pin::new(conn).poll_shutdown(cx)
            }
            None => Poll::Ready(Err(not_connected())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::mocks::MockDialer;
    use crate::pool::ConnPool;
    use std::io;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    async fn pool(initial: usize, max: usize) -> (ConnPool<MockDialer>, MockDialer) {
        let dialer = MockDialer::new();
        let pool = ConnPool::connect(
            &CancellationToken::new(),
            initial,
            max,
            dialer.clone(),
            "tcp",
            "mock:25",
        )
        .await
        .unwrap();
        (pool, dialer)
    }

    #[tokio::test]
    async fn test_io_passes_through() {
        let (pool, _dialer) = pool(1, 1).await;
        let mut conn = pool.get().await.unwrap();

        let mut greeting = vec![0u8; 5];
        conn.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"220 m");

        conn.write_all(b"EHLO test.localhost\r\n").await.unwrap();
        assert_eq!(conn.get_ref().unwrap().written(), b"EHLO test.localhost\r\n");
    }

    #[tokio::test]
    async fn test_io_after_close_is_not_connected() {
        let (pool, _dialer) = pool(1, 1).await;
        let mut conn = pool.get().await.unwrap();
        conn.close().await.unwrap();

        assert!(!conn.is_checked_out());
        let err = conn.write_all(b"QUIT\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_shutdown_marks_unusable() {
        let (pool, dialer) = pool(1, 1).await;
        let mut conn = pool.get().await.unwrap();

        conn.shutdown().await.unwrap();
        assert!(conn.is_unusable());
        conn.close().await.unwrap();

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.status().total, 0);
        assert_eq!(dialer.stats().live(), 0);
    }

    #[tokio::test]
    async fn test_externally_closed_connection_surfaces_error() {
        let (pool, _dialer) = pool(1, 1).await;

        let mut conn = pool.get().await.unwrap();
        conn.get_mut().unwrap().shutdown().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(pool.size(), 1);

        // The broken connection went back to the pool; its next holder sees
        // the first I/O error and nothing is retried.
        let mut conn = pool.get().await.unwrap();
        let err = conn.write_all(b"NOOP\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
