// src/core/errors.rs

//! Defines the primary error type for the fan-out core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure mode the core can surface.
/// `thiserror` gives us `Display` and `std::error::Error` for free; `From`
/// impls below let `?` work across the sqlx/tokio-postgres/io boundary.
#[derive(Error, Debug)]
pub enum FanoutError {
    // --- tenant lifecycle ---
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant suspended: {0}")]
    TenantSuspended(String),

    #[error("tenant database unavailable: {0}")]
    TenantDatabaseUnavailable(String),

    #[error("tenant database has too many connections")]
    TenantDbTooManyConnections,

    #[error("tenant database connection is still initializing")]
    TenantDatabaseConnectionInitializing,

    #[error("tenant connect supervisor is still initializing")]
    Initializing,

    // --- authorization ---
    #[error("increase_connection_pool")]
    IncreaseConnectionPool,

    #[error("rls policy error: {0}")]
    RlsPolicyError(String),

    // --- replication ---
    #[error("max_wal_senders_reached")]
    MaxWalSendersReached,

    #[error("replication slot already in use: {0}")]
    ReplicationSlotInUse(String),

    #[error("operation timed out")]
    Timeout,

    // --- cluster ---
    #[error("rpc error: {0}")]
    RpcError(String),

    #[error("rebalancing")]
    Rebalancing,

    // --- generic / transport ---
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("database error: {0}")]
    Database(Arc<sqlx::Error>),

    #[error("replication protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// Manual Clone because `sqlx::Error` and `std::io::Error` are not Clone.
// Wrapping them in Arc keeps FanoutError cheaply clonable for the cases
// (e.g. cached probe results) that need to hand a prior error back out.
impl Clone for FanoutError {
    fn clone(&self) -> Self {
        match self {
            Self::TenantNotFound(s) => Self::TenantNotFound(s.clone()),
            Self::TenantSuspended(s) => Self::TenantSuspended(s.clone()),
            Self::TenantDatabaseUnavailable(s) => Self::TenantDatabaseUnavailable(s.clone()),
            Self::TenantDbTooManyConnections => Self::TenantDbTooManyConnections,
            Self::TenantDatabaseConnectionInitializing => {
                Self::TenantDatabaseConnectionInitializing
            }
            Self::Initializing => Self::Initializing,
            Self::IncreaseConnectionPool => Self::IncreaseConnectionPool,
            Self::RlsPolicyError(s) => Self::RlsPolicyError(s.clone()),
            Self::MaxWalSendersReached => Self::MaxWalSendersReached,
            Self::ReplicationSlotInUse(s) => Self::ReplicationSlotInUse(s.clone()),
            Self::Timeout => Self::Timeout,
            Self::RpcError(s) => Self::RpcError(s.clone()),
            Self::Rebalancing => Self::Rebalancing,
            Self::Io(e) => Self::Io(Arc::clone(e)),
            Self::Database(e) => Self::Database(Arc::clone(e)),
            Self::Protocol(s) => Self::Protocol(s.clone()),
            Self::Internal(s) => Self::Internal(s.clone()),
        }
    }
}

impl PartialEq for FanoutError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::TenantNotFound(a), Self::TenantNotFound(b)) => a == b,
            (Self::TenantSuspended(a), Self::TenantSuspended(b)) => a == b,
            (Self::TenantDatabaseUnavailable(a), Self::TenantDatabaseUnavailable(b)) => a == b,
            (Self::RlsPolicyError(a), Self::RlsPolicyError(b)) => a == b,
            (Self::ReplicationSlotInUse(a), Self::ReplicationSlotInUse(b)) => a == b,
            (Self::RpcError(a), Self::RpcError(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.to_string() == b.to_string(),
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            (Self::Protocol(a), Self::Protocol(b)) => a == b,
            (Self::Internal(a), Self::Internal(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for FanoutError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for FanoutError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(Arc::new(e))
    }
}

impl From<tokio_postgres::Error> for FanoutError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<serde_json::Error> for FanoutError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for FanoutError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_compare_by_message() {
        let a = FanoutError::from(std::io::Error::other("boom"));
        let b = FanoutError::from(std::io::Error::other("boom"));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_variants_are_not_equal() {
        assert_ne!(FanoutError::Timeout, FanoutError::Rebalancing);
    }

    #[test]
    fn clone_preserves_variant() {
        let e = FanoutError::TenantSuspended("acme".into());
        let cloned = e.clone();
        assert_eq!(e, cloned);
    }
}
