// src/core/db.rs

//! Tenant database pooling. Owns turning a `DbExtension` into a live
//! `sqlx::PgPool` and classifying connection failures into the lifecycle
//! error taxonomy. The `TenantDatabase` trait exists so the connect
//! supervisor's pipeline can be exercised in tests without a real Postgres.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

use crate::config::DbPoolConfig;
use crate::core::errors::FanoutError;
use crate::core::types::DbExtension;

/// Opens a pooled connection to a tenant's database.
pub async fn connect(ext: &DbExtension, pool_cfg: &DbPoolConfig) -> Result<PgPool, FanoutError> {
    let ssl_mode = if ext.ssl_enforced {
        PgSslMode::Require
    } else {
        PgSslMode::Prefer
    };

    let options = PgConnectOptions::new()
        .host(&ext.host)
        .port(ext.port)
        .username(&ext.user)
        .password(&ext.password)
        .database(&ext.db_name)
        .ssl_mode(ssl_mode);

    PgPoolOptions::new()
        .min_connections(pool_cfg.min_pool_size)
        .max_connections(pool_cfg.max_pool_size)
        .acquire_timeout(pool_cfg.checkout_timeout)
        .connect_with(options)
        .await
        .map_err(classify_connect_error)
}

/// Classifies errors surfaced while driving a `tokio_postgres` replication
/// connection into the replication-specific error taxonomy.
pub fn classify_replication_error(e: tokio_postgres::Error) -> FanoutError {
    let message = e.to_string();
    if message.contains("max_wal_senders") {
        FanoutError::MaxWalSendersReached
    } else if message.contains("replication slot") && message.contains("is active") {
        FanoutError::ReplicationSlotInUse(message)
    } else {
        FanoutError::from(e)
    }
}

fn classify_connect_error(e: sqlx::Error) -> FanoutError {
    match &e {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("too many connections") || db_err.code().as_deref() == Some("53300")
            {
                FanoutError::TenantDbTooManyConnections
            } else {
                FanoutError::from(e)
            }
        }
        sqlx::Error::PoolTimedOut => FanoutError::TenantDatabaseConnectionInitializing,
        sqlx::Error::Io(_) => FanoutError::TenantDatabaseUnavailable(e.to_string()),
        _ => FanoutError::from(e),
    }
}

/// What the connect supervisor's `CheckConnection` pipeline step needs from
/// a tenant database. Kept tiny and trait-gated so it can be faked in tests.
#[async_trait]
pub trait TenantDatabase: Send + Sync {
    async fn ping(&self) -> Result<(), FanoutError>;
}

pub struct SqlxTenantDatabase {
    pool: PgPool,
}

impl SqlxTenantDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantDatabase for SqlxTenantDatabase {
    async fn ping(&self) -> Result<(), FanoutError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify_connect_error)?;
        Ok(())
    }
}

pub type SharedTenantDatabase = Arc<dyn TenantDatabase>;

/// Fakes usable from both colocated unit tests and the crate's `tests/`
/// integration binary, since neither can stand up a real Postgres.
pub mod fakes {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakeTenantDatabase {
        pub outcome: Mutex<Option<FanoutError>>,
    }

    impl FakeTenantDatabase {
        pub fn healthy() -> Self {
            Self::default()
        }

        pub fn failing(err: FanoutError) -> Self {
            Self {
                outcome: Mutex::new(Some(err)),
            }
        }
    }

    #[async_trait]
    impl TenantDatabase for FakeTenantDatabase {
        async fn ping(&self) -> Result<(), FanoutError> {
            match self.outcome.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}
