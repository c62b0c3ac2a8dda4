// src/core/migrations.rs

//! The migration collaborator the connect supervisor's startup pipeline
//! calls into. Migration *design* (how schema changes are authored,
//! versioned, rolled out) is someone else's concern; this trait only models
//! the single call the pipeline makes, plus a minimal default
//! implementation that ensures the message table the replication ingester
//! reads from actually exists.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::errors::FanoutError;

#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Brings a tenant's database schema up to date. Called once per
    /// connect supervisor startup, before replication begins.
    async fn run(&self, pool: &PgPool) -> Result<(), FanoutError>;
}

/// Creates the `realtime.messages` table (and its default partition) if
/// absent. Idempotent: safe to call on every startup.
pub struct DefaultMigrationRunner;

#[async_trait]
impl MigrationRunner for DefaultMigrationRunner {
    async fn run(&self, pool: &PgPool) -> Result<(), FanoutError> {
        sqlx::query(
            r#"
            CREATE SCHEMA IF NOT EXISTS realtime
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS realtime.messages (
                id uuid NOT NULL DEFAULT gen_random_uuid(),
                topic text NOT NULL,
                private boolean NOT NULL DEFAULT false,
                event text,
                extension text NOT NULL,
                payload jsonb NOT NULL DEFAULT '{}'::jsonb,
                inserted_at timestamptz NOT NULL DEFAULT now(),
                committed_at timestamptz NOT NULL DEFAULT now(),
                PRIMARY KEY (id, inserted_at)
            ) PARTITION BY RANGE (inserted_at)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS realtime.messages_default
            PARTITION OF realtime.messages DEFAULT
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

pub mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct NoopMigrationRunner;

    #[async_trait]
    impl MigrationRunner for NoopMigrationRunner {
        async fn run(&self, _pool: &PgPool) -> Result<(), FanoutError> {
            Ok(())
        }
    }
}
