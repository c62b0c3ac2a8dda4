// src/core/auth/engine.rs

//! Runs the actual RLS probes. Every probe happens inside a real
//! transaction against the tenant database: read probes set `SET
//! TRANSACTION READ ONLY` on that same transaction, write probes run in a
//! normal transaction that is always rolled back, regardless of outcome, so
//! a probe never leaves a durable side effect.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::core::errors::FanoutError;
use crate::core::types::{AuthorizationContext, ProbeKind, Tri};

#[async_trait]
pub trait AuthProbeRunner: Send + Sync {
    async fn probe(&self, ctx: &AuthorizationContext, kind: ProbeKind) -> Result<Tri, FanoutError>;
}

pub struct SqlxAuthProbeRunner {
    pool: PgPool,
}

impl SqlxAuthProbeRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn probe_table(kind: ProbeKind) -> &'static str {
        match kind {
            ProbeKind::BroadcastRead | ProbeKind::BroadcastWrite => "realtime.messages",
            ProbeKind::PresenceRead | ProbeKind::PresenceWrite => "realtime.messages",
        }
    }

    fn is_write(kind: ProbeKind) -> bool {
        matches!(kind, ProbeKind::BroadcastWrite | ProbeKind::PresenceWrite)
    }
}

#[async_trait]
impl AuthProbeRunner for SqlxAuthProbeRunner {
    async fn probe(&self, ctx: &AuthorizationContext, kind: ProbeKind) -> Result<Tri, FanoutError> {
        let write = Self::is_write(kind);
        let table = Self::probe_table(kind);

        let mut tx = self.pool.begin().await.map_err(classify_probe_error)?;

        if !write {
            // Must run inside the transaction the probe itself uses — a
            // separate connection's read-only mode has no bearing on this one.
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(classify_probe_error)?;
        }

        sqlx::query("SET LOCAL role = $1")
            .bind(&ctx.role)
            .execute(&mut *tx)
            .await
            .map_err(classify_probe_error)?;

        sqlx::query("SELECT set_config('request.jwt.claim.role', $1, true)")
            .bind(&ctx.role)
            .execute(&mut *tx)
            .await
            .map_err(classify_probe_error)?;

        if let Some(sub) = ctx.claim_sub() {
            sqlx::query("SELECT set_config('request.jwt.claim.sub', $1, true)")
                .bind(sub)
                .execute(&mut *tx)
                .await
                .map_err(classify_probe_error)?;
        }

        sqlx::query("SELECT set_config('request.jwt.claims', $1, true)")
            .bind(ctx.claims.to_string())
            .execute(&mut *tx)
            .await
            .map_err(classify_probe_error)?;

        let headers_json = serde_json::to_string(&ctx.headers)?;
        sqlx::query("SELECT set_config('request.headers', $1, true)")
            .bind(headers_json)
            .execute(&mut *tx)
            .await
            .map_err(classify_probe_error)?;

        let outcome = if write {
            // Broadcast and presence are separate RLS policies; probing with
            // the wrong `extension` literal would exercise the other one.
            let extension = match kind {
                ProbeKind::PresenceWrite => "presence",
                _ => "broadcast",
            };
            sqlx::query(&format!(
                "INSERT INTO {table} (topic, private, extension, payload) VALUES ($1, true, '{extension}', '{{}}'::jsonb) RETURNING id"
            ))
            .bind(&ctx.topic)
            .fetch_one(&mut *tx)
            .await
            .map(|row| row.get::<uuid::Uuid, _>("id"))
        } else {
            sqlx::query(&format!("SELECT 1 FROM {table} WHERE topic = $1 LIMIT 1"))
                .bind(&ctx.topic)
                .fetch_optional(&mut *tx)
                .await
                .map(|_| uuid::Uuid::nil())
        };

        // Always rolled back: a probe, even a successful write probe, must
        // never leave a row behind.
        let _ = tx.rollback().await;

        match outcome {
            Ok(_) => Ok(Tri::True),
            Err(sqlx::Error::Database(db_err)) if is_permission_denied(&*db_err) => Ok(Tri::False),
            Err(e) => Err(classify_probe_error(e)),
        }
    }
}

fn is_permission_denied(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    db_err.code().as_deref() == Some("42501")
}

fn classify_probe_error(e: sqlx::Error) -> FanoutError {
    match &e {
        sqlx::Error::PoolTimedOut => FanoutError::IncreaseConnectionPool,
        sqlx::Error::Database(db_err) if is_permission_denied(&**db_err) => {
            FanoutError::RlsPolicyError(db_err.message().to_string())
        }
        sqlx::Error::Database(db_err) => FanoutError::RlsPolicyError(db_err.message().to_string()),
        _ => FanoutError::from(e),
    }
}

pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakeAuthProbeRunner {
        pub scripted: Mutex<HashMap<ProbeKind, Tri>>,
    }

    impl FakeAuthProbeRunner {
        pub fn allow_all() -> Self {
            let mut scripted = HashMap::new();
            for kind in [
                ProbeKind::BroadcastRead,
                ProbeKind::BroadcastWrite,
                ProbeKind::PresenceRead,
                ProbeKind::PresenceWrite,
            ] {
                scripted.insert(kind, Tri::True);
            }
            Self {
                scripted: Mutex::new(scripted),
            }
        }

        pub fn deny_all() -> Self {
            let mut scripted = HashMap::new();
            for kind in [
                ProbeKind::BroadcastRead,
                ProbeKind::BroadcastWrite,
                ProbeKind::PresenceRead,
                ProbeKind::PresenceWrite,
            ] {
                scripted.insert(kind, Tri::False);
            }
            Self {
                scripted: Mutex::new(scripted),
            }
        }
    }

    #[async_trait]
    impl AuthProbeRunner for FakeAuthProbeRunner {
        async fn probe(&self, _ctx: &AuthorizationContext, kind: ProbeKind) -> Result<Tri, FanoutError> {
            Ok(*self.scripted.lock().get(&kind).unwrap_or(&Tri::Unknown))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeAuthProbeRunner;
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> AuthorizationContext {
        AuthorizationContext {
            tenant_id: crate::core::types::TenantId::from("acme"),
            topic: "room:1".into(),
            claims: serde_json::json!({"sub": "user-1"}),
            role: "authenticated".into(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn allow_all_fake_reports_true_for_every_kind() {
        let runner = FakeAuthProbeRunner::allow_all();
        let result = runner.probe(&ctx(), ProbeKind::BroadcastWrite).await.unwrap();
        assert_eq!(result, Tri::True);
    }

    #[tokio::test]
    async fn deny_all_fake_reports_false() {
        let runner = FakeAuthProbeRunner::deny_all();
        let result = runner.probe(&ctx(), ProbeKind::PresenceRead).await.unwrap();
        assert_eq!(result, Tri::False);
    }
}
