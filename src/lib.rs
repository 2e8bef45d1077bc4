//! # SMTP Connection Pool
//!
//! A bounded pool of long-lived connections for mail-transport clients:
//! - Eager warm-up of an initial batch of connections
//! - Lazy growth up to a hard ceiling, with immediate exhaustion errors
//! - Connections that return to the pool when closed
//! - Deterministic, best-effort shutdown
//! - Pluggable dialers (TCP and implicit TLS provided)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_smtp_pool::{ConnPool, TcpDialer};
//! use tokio::io::AsyncWriteExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnPool::connect(
//!         &CancellationToken::new(),
//!         5,
//!         30,
//!         TcpDialer::new(),
//!         "tcp",
//!         "smtp.example.com:25",
//!     )
//!     .await?;
//!
//!     let mut conn = pool.get().await?;
//!     conn.write_all(b"EHLO client.example.com\r\n").await?;
//!     conn.close().await?;
//!
//!     pool.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Transport layer
pub mod transport;

// Pool
pub mod pool;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{PoolConfig, PoolConfigBuilder, TlsConfig, TlsConfigBuilder};
pub use errors::{ErrorSeverity, PoolError, PoolErrorKind, PoolResult};
pub use observability::{MetricsSnapshot, PoolMetrics};
pub use pool::{ConnPool, PooledConn};
pub use transport::{DialFn, Dialer, TcpDialer};
#[cfg(feature = "rustls-tls")]
pub use transport::TlsDialer;
pub use types::PoolStatus;
