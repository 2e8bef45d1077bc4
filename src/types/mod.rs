//! Shared data types for the connection pool.

use serde::Serialize;

/// Point-in-time view of a pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections ready to hand out without dialing.
    pub idle: usize,
    /// Connections currently checked out to callers.
    pub in_use: usize,
    /// Idle plus checked-out connections.
    pub total: usize,
    /// Maximum pool size.
    pub max_size: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
}

impl PoolStatus {
    /// Connections that could still be dialed before hitting the ceiling.
    pub fn headroom(&self) -> usize {
        self.max_size.saturating_sub(self.total)
    }

    /// Returns true if a `get` would fail with an exhaustion error.
    pub fn is_exhausted(&self) -> bool {
        !self.closed && self.idle == 0 && self.total >= self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_headroom() {
        let status = PoolStatus {
            idle: 0,
            in_use: 3,
            total: 3,
            max_size: 3,
            closed: false,
        };
        assert_eq!(status.headroom(), 0);
        assert!(status.is_exhausted());

        let status = PoolStatus { idle: 1, total: 2, in_use: 1, ..status };
        assert_eq!(status.headroom(), 1);
        assert!(!status.is_exhausted());
    }

    #[test]
    fn test_pool_status_serializes() {
        let status = PoolStatus {
            idle: 2,
            in_use: 1,
            total: 3,
            max_size: 10,
            closed: false,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["idle"], 2);
        assert_eq!(json["max_size"], 10);
    }
}
