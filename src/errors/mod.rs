//! Error types for the connection pool.
//!
//! Every failure the pool can report is a [`PoolError`] tagged with a
//! [`PoolErrorKind`], so callers can decide between retrying, failing fast,
//! or giving up on the pool instance altogether.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Pool error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolErrorKind {
    /// A warm-up dial failed while constructing the pool.
    ConstructionDial,
    /// No idle connection and the ceiling has been reached.
    PoolExhausted,
    /// The pool has been closed.
    PoolClosed,
    /// Dialing a connection on demand failed.
    DialOnDemand,
    /// Closing a connection during reclaim or shutdown failed.
    ReclaimClose,
    /// Configuration is invalid.
    ConfigurationInvalid,
}

impl PoolErrorKind {
    /// Returns true if this error kind is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolErrorKind::PoolExhausted | PoolErrorKind::DialOnDemand)
    }

    /// Returns the severity level of this error kind.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PoolErrorKind::ConfigurationInvalid => ErrorSeverity::Critical,
            PoolErrorKind::ConstructionDial | PoolErrorKind::PoolClosed => ErrorSeverity::Error,
            PoolErrorKind::PoolExhausted | PoolErrorKind::DialOnDemand => ErrorSeverity::Warning,
            PoolErrorKind::ReclaimClose => ErrorSeverity::Info,
        }
    }
}

impl fmt::Display for PoolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolErrorKind::ConstructionDial => write!(f, "Warm-up dial failed"),
            PoolErrorKind::PoolExhausted => write!(f, "Connection pool exhausted"),
            PoolErrorKind::PoolClosed => write!(f, "Connection pool closed"),
            PoolErrorKind::DialOnDemand => write!(f, "On-demand dial failed"),
            PoolErrorKind::ReclaimClose => write!(f, "Failed to close connection"),
            PoolErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - cleanup was best effort.
    Info,
    /// Warning - temporary issue, may recover.
    Warning,
    /// Error - operation failed.
    Error,
    /// Critical - requires immediate attention.
    Critical,
}

/// Pool error with detailed information.
#[derive(Error, Debug)]
pub struct PoolError {
    /// Error kind.
    kind: PoolErrorKind,
    /// Human-readable message.
    message: String,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PoolError {
    /// Creates a new pool error.
    pub fn new(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> PoolErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the underlying I/O error, if the cause was one.
    pub fn io_error(&self) -> Option<&io::Error> {
        self.cause.as_ref()?.downcast_ref::<io::Error>()
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    // Convenience constructors

    /// Creates a warm-up dial error wrapping the transport failure.
    pub fn construction_dial(address: &str, cause: io::Error) -> Self {
        Self::new(
            PoolErrorKind::ConstructionDial,
            format!("failed to dial {} during warm-up: {}", address, cause),
        )
        .with_cause(cause)
    }

    /// Creates an on-demand dial error wrapping the transport failure.
    pub fn dial_on_demand(address: &str, cause: io::Error) -> Self {
        Self::new(
            PoolErrorKind::DialOnDemand,
            format!("failed to dial {}: {}", address, cause),
        )
        .with_cause(cause)
    }

    /// Creates a pool exhausted error.
    pub fn exhausted(max_size: usize) -> Self {
        Self::new(
            PoolErrorKind::PoolExhausted,
            format!("all {} connections are checked out", max_size),
        )
    }

    /// Creates a pool closed error.
    pub fn closed() -> Self {
        Self::new(PoolErrorKind::PoolClosed, "pool has been closed")
    }

    /// Creates a close failure error.
    pub fn reclaim_close(cause: io::Error) -> Self {
        Self::new(
            PoolErrorKind::ReclaimClose,
            format!("closing connection failed: {}", cause),
        )
        .with_cause(cause)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PoolErrorKind::ConfigurationInvalid, message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_kind_retryable() {
        assert!(PoolErrorKind::PoolExhausted.is_retryable());
        assert!(PoolErrorKind::DialOnDemand.is_retryable());
        assert!(!PoolErrorKind::PoolClosed.is_retryable());
        assert!(!PoolErrorKind::ConstructionDial.is_retryable());
    }

    #[test]
    fn test_dial_error_keeps_source() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = PoolError::dial_on_demand("127.0.0.1:25", io_err);

        assert_eq!(err.kind(), PoolErrorKind::DialOnDemand);
        assert_eq!(
            err.io_error().map(|e| e.kind()),
            Some(io::ErrorKind::ConnectionRefused)
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("127.0.0.1:25"));
    }

    #[test]
    fn test_error_without_cause() {
        let err = PoolError::exhausted(3);
        assert!(err.io_error().is_none());
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "Connection pool exhausted: all 3 connections are checked out");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            PoolErrorKind::ConfigurationInvalid.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(PoolErrorKind::PoolExhausted.severity(), ErrorSeverity::Warning);
        assert_eq!(PoolErrorKind::PoolClosed.severity(), ErrorSeverity::Error);
        assert!(ErrorSeverity::Info < ErrorSeverity::Critical);
    }
}
