// tests/idle_shutdown.rs

//! Drives a real connect supervisor's idle-shutdown ticker on a fast
//! interval and observes the tenant task exit once nobody is subscribed to
//! its realtime topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pg_fanout::core::connect::pipeline::DbConnector;
use pg_fanout::core::connect::{ConnectDeps, ConnectSupervisors};
use pg_fanout::core::db::fakes::FakeTenantDatabase;
use pg_fanout::core::db::TenantDatabase;
use pg_fanout::core::errors::FanoutError;
use pg_fanout::core::migrations::fakes::NoopMigrationRunner;
use pg_fanout::core::operations::OperationsBus;
use pg_fanout::core::registry::Registry;
use pg_fanout::core::tenant_cache::fakes::FakeTenantCatalog;
use pg_fanout::core::types::{DbExtension, Tenant, TenantId};

struct AlwaysHealthyConnector;

#[async_trait]
impl DbConnector for AlwaysHealthyConnector {
    async fn connect(
        &self,
        _ext: &DbExtension,
    ) -> Result<(Arc<dyn TenantDatabase>, Option<sqlx::PgPool>), FanoutError> {
        Ok((Arc::new(FakeTenantDatabase::healthy()), None))
    }
}

fn tenant(id: &str) -> Tenant {
    Tenant {
        id: TenantId::from(id),
        external_id: id.to_string(),
        region: "us-east".into(),
        suspend: false,
        jwt_secret: "secret".into(),
        jwks: None,
        max_concurrent_users: 100,
        max_events_per_second: 100,
        max_joins_per_second: 100,
        max_channels_per_client: 100,
        max_bytes_per_second: 1_000_000,
        // no extensions: no replication ingester spawns, keeping this test
        // focused on the idle watchdog rather than replication plumbing.
        extensions: vec![],
    }
}

#[tokio::test]
async fn a_tenant_with_nobody_subscribed_shuts_itself_down() {
    let t = tenant("acme");
    let supervisors = ConnectSupervisors::new(ConnectDeps {
        node_id: "node-1".into(),
        region: "us-east".into(),
        catalog: Arc::new(FakeTenantCatalog::with(t.clone())),
        registry: Arc::new(Registry::new("us-east")),
        operations: Arc::new(OperationsBus::new()),
        connector: Arc::new(AlwaysHealthyConnector),
        migration_runner: Arc::new(NoopMigrationRunner),
        replication_slot_suffix: None,
        check_connected_user_interval: Duration::from_millis(5),
        rebalance_check_interval: Duration::from_secs(3600),
        replication_keepalive_interval: Duration::from_secs(10),
    });

    let handle = supervisors.lookup_or_start_connection(&t.id).await.unwrap();

    // six idle ticks with no subscriber fill the watchdog's ring buffer and
    // the supervisor task returns, dropping its command queue. Real time,
    // not a mocked clock, since this crate's dev-dependencies don't carry
    // tokio's test-util feature.
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(handle.current_state().await.is_err());
}

#[tokio::test]
async fn a_subscribed_tenant_survives_the_idle_window() {
    let t = tenant("acme");
    let supervisors = ConnectSupervisors::new(ConnectDeps {
        node_id: "node-1".into(),
        region: "us-east".into(),
        catalog: Arc::new(FakeTenantCatalog::with(t.clone())),
        registry: Arc::new(Registry::new("us-east")),
        operations: Arc::new(OperationsBus::new()),
        connector: Arc::new(AlwaysHealthyConnector),
        migration_runner: Arc::new(NoopMigrationRunner),
        replication_slot_suffix: None,
        check_connected_user_interval: Duration::from_millis(5),
        rebalance_check_interval: Duration::from_secs(3600),
        replication_keepalive_interval: Duration::from_secs(10),
    });

    let handle = supervisors.lookup_or_start_connection(&t.id).await.unwrap();
    let _subscriber = handle.bus.subscribe(&format!("realtime:{}", t.external_id));

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(handle.current_state().await.unwrap().can_accept_sessions());
}
