// src/core/connect/pipeline.rs

//! The connect supervisor's startup pipeline: an ordered list of steps run
//! once per tenant connection attempt, each able to short-circuit the rest.
//! Mirrors a whole-process startup phase list, generalized here to run once
//! per tenant instead of once per server.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::db::TenantDatabase;
use crate::core::errors::FanoutError;
use crate::core::migrations::MigrationRunner;
use crate::core::rate::RateCounters;
use crate::core::registry::conflict::Candidate;
use crate::core::registry::{Registration, Registry, Scope};
use crate::core::tenant_cache::TenantCatalog;
use crate::core::types::{DbExtension, Tenant, TenantId};

/// Opens whatever the pipeline needs to talk to a tenant's database. Real
/// deployments hand the live `sqlx`/`tokio_postgres`-backed connector;
/// tests hand a fake that never touches the network.
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(
        &self,
        ext: &DbExtension,
    ) -> Result<(Arc<dyn TenantDatabase>, Option<PgPool>), FanoutError>;
}

pub struct PipelineCtx {
    pub tenant_id: TenantId,
    pub node_id: String,
    pub region: String,
    pub run_id: String,
    pub catalog: Arc<dyn TenantCatalog>,
    pub registry: Arc<Registry>,
    pub connector: Arc<dyn DbConnector>,
    pub migration_runner: Arc<dyn MigrationRunner>,
    pub rate: Arc<RateCounters>,
    pub tenant: Option<Tenant>,
    pub db: Option<Arc<dyn TenantDatabase>>,
    pub pool: Option<PgPool>,
}

pub type Step = fn(&mut PipelineCtx) -> futures::future::BoxFuture<'_, Result<(), FanoutError>>;

pub fn startup_steps() -> Vec<Step> {
    vec![
        |ctx| Box::pin(get_tenant(ctx)),
        |ctx| Box::pin(check_connection(ctx)),
        |ctx| Box::pin(start_counters(ctx)),
        |ctx| Box::pin(register_process(ctx)),
        |ctx| Box::pin(run_migrations(ctx)),
    ]
}

async fn get_tenant(ctx: &mut PipelineCtx) -> Result<(), FanoutError> {
    let tenant = ctx.catalog.fetch(&ctx.tenant_id).await?;
    if tenant.suspend {
        return Err(FanoutError::TenantSuspended(tenant.external_id));
    }
    ctx.tenant = Some(tenant);
    Ok(())
}

async fn check_connection(ctx: &mut PipelineCtx) -> Result<(), FanoutError> {
    let tenant = ctx
        .tenant
        .as_ref()
        .ok_or_else(|| FanoutError::Internal("get_tenant did not run".to_string()))?;
    let extension = tenant
        .primary_extension()
        .ok_or_else(|| FanoutError::TenantDatabaseUnavailable("no db extension configured".to_string()))?;

    let (db, pool) = ctx.connector.connect(extension).await?;
    db.ping().await?;
    ctx.db = Some(db);
    ctx.pool = pool;
    Ok(())
}

async fn start_counters(ctx: &mut PipelineCtx) -> Result<(), FanoutError> {
    // Touching the rate counter map here (rather than lazily on first
    // client request) means a freshly started tenant always has a live
    // entry other watchdogs can read without special-casing "not yet seen".
    ctx.rate.credit(&ctx.tenant_id, crate::core::rate::CounterKind::RequestsPerSecond, 0);
    Ok(())
}

async fn register_process(ctx: &mut PipelineCtx) -> Result<(), FanoutError> {
    let candidate = Candidate {
        owner: ctx.node_id.clone(),
        region: ctx.region.clone(),
        run_id: ctx.run_id.clone(),
    };
    match ctx.registry.register(Scope::Connect, ctx.tenant_id.as_str(), candidate) {
        Registration::Won => Ok(()),
        Registration::Lost { owner } => Err(FanoutError::RpcError(format!(
            "tenant already owned by {owner}"
        ))),
    }
}

async fn run_migrations(ctx: &mut PipelineCtx) -> Result<(), FanoutError> {
    if let Some(pool) = &ctx.pool {
        ctx.migration_runner.run(pool).await?;
    }
    Ok(())
}
