// src/core/connect/mod.rs

//! The connect supervisor: one task per tenant, owning that tenant's
//! lifecycle from first connecting client through replication and serving,
//! down to idle shutdown or region handoff. `ConnectSupervisors` is the
//! process-wide manager other code calls into — it is the single-owner
//! actor-per-tenant pattern, generalized from a whole-process startup
//! sequence into something that runs once per tenant.

pub mod handle;
pub mod pipeline;
pub mod state;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::auth::engine::AuthProbeRunner;
use crate::core::channels::presence::PresenceStore;
use crate::core::db::TenantDatabase;
use crate::core::errors::FanoutError;
use crate::core::migrations::MigrationRunner;
use crate::core::operations::{Operation, OperationsBus};
use crate::core::pubsub::PubSubBus;
use crate::core::rate::RateCounters;
use crate::core::registry::{Registry, Scope};
use crate::core::replication::ReplicationIngester;
use crate::core::telemetry;
use crate::core::tenant_cache::TenantCatalog;
use crate::core::types::{MessageExtension, Tenant, TenantId};

pub use handle::{ConnectCommand, ConnectHandle};
pub use state::ConnectState;

/// Collaborators a connect supervisor needs that come from outside its own
/// tenant: the catalog, the cluster registry, the operations bus, and
/// factories for the tenant-DB and auth-probe connections.
pub struct ConnectDeps {
    pub node_id: String,
    pub region: String,
    pub catalog: Arc<dyn TenantCatalog>,
    pub registry: Arc<Registry>,
    pub operations: Arc<OperationsBus>,
    pub connector: Arc<dyn pipeline::DbConnector>,
    pub migration_runner: Arc<dyn MigrationRunner>,
    pub replication_slot_suffix: Option<String>,
    pub check_connected_user_interval: Duration,
    pub rebalance_check_interval: Duration,
    pub replication_keepalive_interval: Duration,
}

/// Process-wide registry of running connect supervisors, keyed by tenant.
/// Calling `lookup_or_start_connection` for a tenant with no running
/// supervisor runs the startup pipeline and, on success, spawns its task.
pub struct ConnectSupervisors {
    deps: Arc<ConnectDeps>,
    handles: DashMap<TenantId, ConnectHandle>,
}

impl ConnectSupervisors {
    pub fn new(deps: ConnectDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            handles: DashMap::new(),
        }
    }

    pub fn lookup(&self, tenant_id: &TenantId) -> Option<ConnectHandle> {
        self.handles.get(tenant_id).map(|h| h.clone())
    }

    pub async fn lookup_or_start_connection(&self, tenant_id: &TenantId) -> Result<ConnectHandle, FanoutError> {
        if let Some(handle) = self.lookup(tenant_id) {
            return Ok(handle);
        }

        let run_id = new_run_id();
        let mut ctx = pipeline::PipelineCtx {
            tenant_id: tenant_id.clone(),
            node_id: self.deps.node_id.clone(),
            region: self.deps.region.clone(),
            run_id,
            catalog: self.deps.catalog.clone(),
            registry: self.deps.registry.clone(),
            connector: self.deps.connector.clone(),
            migration_runner: self.deps.migration_runner.clone(),
            rate: Arc::new(RateCounters::new()),
            tenant: None,
            db: None,
            pool: None,
        };

        for step in pipeline::startup_steps() {
            step(&mut ctx).await?;
        }

        let tenant = ctx
            .tenant
            .clone()
            .ok_or_else(|| FanoutError::Internal("pipeline finished without a tenant".to_string()))?;

        let bus = Arc::new(PubSubBus::new());
        let presence = Arc::new(PresenceStore::new());
        let rate = ctx.rate.clone();
        let auth_runner: Arc<dyn AuthProbeRunner> = match &ctx.pool {
            Some(pool) => Arc::new(crate::core::auth::engine::SqlxAuthProbeRunner::new(pool.clone())),
            // No pool means the connector never gave us one (tests, or a
            // tenant database the connector couldn't reach transactionally).
            // Fail closed rather than letting every probe return Unknown.
            None => Arc::new(crate::core::auth::engine::fakes::FakeAuthProbeRunner::deny_all()),
        };
        let (tx, rx) = mpsc::channel(32);
        let handle = ConnectHandle::new(
            tenant_id.clone(),
            tx,
            bus.clone(),
            rate.clone(),
            presence.clone(),
            auth_runner.clone(),
        );

        let db = ctx
            .db
            .clone()
            .ok_or_else(|| FanoutError::Internal("pipeline finished without a db handle".to_string()))?;
        let supervisor = Supervisor {
            tenant,
            deps: self.deps.clone(),
            bus,
            rate,
            db,
        };

        tokio::spawn(supervisor.run(rx));
        self.handles.insert(tenant_id.clone(), handle.clone());
        self.deps.registry.mark_ready(tenant_id.as_str());
        telemetry::tenant_connected(tenant_id, &self.deps.region);

        Ok(handle)
    }

    pub fn remove(&self, tenant_id: &TenantId) {
        self.handles.remove(tenant_id);
    }
}

fn new_run_id() -> String {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("getrandom");
    hex::encode(buf)
}

struct Supervisor {
    tenant: Tenant,
    deps: Arc<ConnectDeps>,
    bus: Arc<PubSubBus>,
    rate: Arc<RateCounters>,
    db: Arc<dyn TenantDatabase>,
}

impl Supervisor {
    async fn run(self, mut commands: mpsc::Receiver<ConnectCommand>) {
        let mut state = ConnectState::Replicating;
        let tenant_id = self.tenant.id.clone();

        let (replication_tx, mut replication_rx) = mpsc::channel(256);
        let (repl_shutdown_tx, repl_shutdown_rx) = mpsc::channel::<()>(1);

        if let Some(extension) = self.tenant.primary_extension() {
            let slot_name = match &self.deps.replication_slot_suffix {
                Some(suffix) => format!(
                    "supabase_realtime_messages_replication_slot_{}_{}",
                    self.tenant.external_id, suffix
                ),
                None => format!(
                    "supabase_realtime_messages_replication_slot_{}",
                    self.tenant.external_id
                ),
            };
            let ingester = ReplicationIngester::new(
                tenant_id.clone(),
                extension.clone(),
                slot_name,
                self.deps.replication_keepalive_interval,
            );
            tokio::spawn(async move {
                if let Err(err) = ingester.run(replication_tx, repl_shutdown_rx).await {
                    warn!(tenant_id = %tenant_id, error = %err, "replication ingester exited");
                }
            });
        }

        state = ConnectState::Serving;
        debug!(tenant_id = %self.tenant.id, "connect supervisor entering serving state");

        let mut operations_rx = self.deps.operations.subscribe(&self.tenant.id);
        let mut idle_watchdog = watchdog::IdleShutdownWatchdog::new();
        let mut idle_ticker = tokio::time::interval(self.deps.check_connected_user_interval);
        let mut rebalance_ticker = tokio::time::interval(self.deps.rebalance_check_interval);

        loop {
            tokio::select! {
                Some(command) = commands.recv() => {
                    match command {
                        ConnectCommand::Shutdown { reply } => {
                            state = ConnectState::ShuttingDown;
                            let _ = repl_shutdown_tx.send(()).await;
                            let _ = reply.send(());
                            telemetry::tenant_db_disconnected(&self.tenant.id, "shutdown requested");
                            return;
                        }
                        ConnectCommand::CurrentState { reply } => {
                            let _ = reply.send(state);
                        }
                    }
                }
                Some(op) = operations_rx.recv() => {
                    match op {
                        Operation::SuspendTenant => {
                            state = ConnectState::ShuttingDown;
                            let _ = repl_shutdown_tx.send(()).await;
                            telemetry::tenant_db_disconnected(&self.tenant.id, "tenant suspended");
                            return;
                        }
                        Operation::UnsuspendTenant => {}
                        Operation::Disconnect => {
                            let _ = repl_shutdown_tx.send(()).await;
                        }
                    }
                }
                Some(message) = replication_rx.recv() => {
                    let topic = format!("realtime:{}", message.topic);
                    if message.event.is_none() || message.extension != MessageExtension::Broadcast {
                        telemetry::unable_to_broadcast_changes(
                            &self.tenant.id,
                            &topic,
                            "event is null or extension is not broadcast",
                        );
                        continue;
                    }
                    let committed_at = message.committed_at;
                    let inserted_at = message.inserted_at;
                    let message = Arc::new(message.merge_id_into_payload());
                    self.bus.publish(&topic, message);
                    telemetry::broadcast_from_database(&self.tenant.id, &topic, committed_at, inserted_at);
                }
                _ = idle_ticker.tick() => {
                    if let Err(err) = self.db.ping().await {
                        warn!(tenant_id = %self.tenant.id, error = %err, "tenant database ping failed");
                        telemetry::tenant_db_disconnected(&self.tenant.id, "ping failed");
                        let _ = repl_shutdown_tx.send(()).await;
                        return;
                    }
                    let connected = self.bus.subscriber_count(&format!("realtime:{}", self.tenant.external_id));
                    if idle_watchdog.record(connected as u32) {
                        info!(tenant_id = %self.tenant.id, "idle shutdown triggered");
                        let _ = repl_shutdown_tx.send(()).await;
                        return;
                    }
                }
                _ = rebalance_ticker.tick() => {
                    let region_node_available = self
                        .deps
                        .registry
                        .members(Scope::RegionNodes)
                        .iter()
                        .any(|(region, _)| region == &self.tenant.region);
                    if watchdog::should_rebalance(&self.deps.region, &self.tenant.region, region_node_available) {
                        info!(tenant_id = %self.tenant.id, "region rebalance triggered");
                        let _ = repl_shutdown_tx.send(()).await;
                        return;
                    }
                }
            }
        }
    }
}
