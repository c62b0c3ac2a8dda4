// src/main.rs

//! Entry point for the fan-out core process. Two modes: the normal server
//! mode, which loads configuration, wires up the process-wide collaborators
//! (cluster registry, operations bus, connect supervisors) and idles until a
//! shutdown signal; and `--registry-node`, a small inspection mode that
//! prints this node's identity and the registry scope names it knows about
//! without running the full supervisor set.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use pg_fanout::config::Config;
use pg_fanout::core::connect::{ConnectDeps, ConnectSupervisors};
use pg_fanout::core::db::SqlxTenantDatabase;
use pg_fanout::core::errors::FanoutError;
use pg_fanout::core::migrations::DefaultMigrationRunner;
use pg_fanout::core::operations::OperationsBus;
use pg_fanout::core::registry::Registry;
use pg_fanout::core::types::DbExtension;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("pg-fanoutd version {VERSION}");
        return Ok(());
    }

    if args.len() > 1 && args[1] == "--registry-node" {
        if args.len() != 3 {
            eprintln!("Usage: pg-fanoutd --registry-node /path/to/config.toml");
            std::process::exit(1);
        }
        let config_path = &args[2];

        tracing_subscriber::fmt()
            .with_env_filter(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            )
            .compact()
            .with_ansi(true)
            .init();

        let config = match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{config_path}\": {e}");
                std::process::exit(1);
            }
        };

        info!(node_id = %config.node_id, region = %config.region, "inspecting registry node identity");
        println!("node_id: {}", config.node_id);
        println!("region: {}", config.region);
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let _reload_handle = Arc::new(reload_handle);

    if let Err(e) = run(config).await {
        error!("fan-out core runtime error: {e}");
        return Err(e);
    }

    Ok(())
}

/// Wires up the process-wide collaborators and idles until a shutdown
/// signal. The tenant catalog and cluster messaging bus are supplied by
/// whatever external gateway process embeds this core; this binary exists
/// to prove the wiring boots and to host a standalone node for local
/// development against a single Postgres instance.
async fn run(config: Config) -> Result<()> {
    info!(node_id = %config.node_id, region = %config.region, host = %config.host, port = config.port, "starting fan-out core");

    let registry = Arc::new(Registry::new(config.region.clone()));
    let operations = Arc::new(OperationsBus::new());

    let deps = ConnectDeps {
        node_id: config.node_id.clone(),
        region: config.region.clone(),
        catalog: Arc::new(NoCatalogConfigured),
        registry: registry.clone(),
        operations: operations.clone(),
        connector: Arc::new(SqlxDbConnector {
            pool_cfg: config.db_pool.clone(),
        }),
        migration_runner: Arc::new(DefaultMigrationRunner),
        replication_slot_suffix: config.slot_name_suffix.clone(),
        check_connected_user_interval: config.check_connected_user_interval,
        rebalance_check_interval: config.rebalance_check_interval,
        replication_keepalive_interval: config.replication.keepalive_interval,
    };

    let _supervisors = ConnectSupervisors::new(deps);

    info!("fan-out core ready, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    Ok(())
}

/// Opens a tenant's Postgres pool and wraps it as both the `TenantDatabase`
/// health-check handle the pipeline needs and the raw `PgPool` migrations
/// and auth probes run against.
struct SqlxDbConnector {
    pool_cfg: pg_fanout::config::DbPoolConfig,
}

#[async_trait::async_trait]
impl pg_fanout::core::connect::pipeline::DbConnector for SqlxDbConnector {
    async fn connect(
        &self,
        ext: &DbExtension,
    ) -> Result<(Arc<dyn pg_fanout::core::db::TenantDatabase>, Option<sqlx::PgPool>), FanoutError> {
        let pool = pg_fanout::core::db::connect(ext, &self.pool_cfg).await?;
        let db: Arc<dyn pg_fanout::core::db::TenantDatabase> =
            Arc::new(SqlxTenantDatabase::new(pool.clone()));
        Ok((db, Some(pool)))
    }
}

/// Placeholder `TenantCatalog` for the standalone binary: the tenant CRUD
/// API that would normally back this is out of scope here and lives in the
/// embedding gateway process.
struct NoCatalogConfigured;

#[async_trait::async_trait]
impl pg_fanout::core::tenant_cache::TenantCatalog for NoCatalogConfigured {
    async fn fetch(&self, id: &pg_fanout::core::types::TenantId) -> Result<pg_fanout::core::types::Tenant, FanoutError> {
        Err(FanoutError::TenantNotFound(id.to_string()))
    }
}
