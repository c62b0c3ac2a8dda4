// tests/channel_gating.rs

//! Exercises broadcast/presence authorization gating and rate limiting
//! against the public channel-handling API, using the scripted auth probe
//! fake instead of a real RLS-backed Postgres connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use pg_fanout::core::auth::engine::fakes::FakeAuthProbeRunner;
use pg_fanout::core::auth::AuthEngine;
use pg_fanout::core::channels::presence::PresenceStore;
use pg_fanout::core::channels::{broadcast, presence};
use pg_fanout::core::errors::FanoutError;
use pg_fanout::core::pubsub::PubSubBus;
use pg_fanout::core::rate::RateCounters;
use pg_fanout::core::types::{AuthorizationContext, Message, MessageExtension, Session, TenantId};
use uuid::Uuid;

fn session(private: bool, presence_enabled: bool, runner: FakeAuthProbeRunner) -> Session {
    let tenant_id = TenantId::from("acme");
    Session {
        tenant_id: tenant_id.clone(),
        topic: "room:1".into(),
        private,
        self_broadcast: false,
        ack_broadcast: false,
        presence_key: Some("user-1".into()),
        presence_enabled,
        auth_context: AuthorizationContext {
            tenant_id,
            topic: "room:1".into(),
            claims: serde_json::json!({"sub": "user-1"}),
            role: "authenticated".into(),
            headers: HashMap::new(),
        },
        auth: Arc::new(AuthEngine::new(Arc::new(runner))),
        rate: Arc::new(RateCounters::new()),
    }
}

fn message() -> Arc<Message> {
    Arc::new(Message {
        id: Uuid::new_v4(),
        topic: "room:1".into(),
        private: false,
        event: Some("update".into()),
        extension: MessageExtension::Broadcast,
        payload: serde_json::json!({"n": 1}),
        inserted_at: Utc::now(),
        committed_at: Utc::now(),
    })
}

#[tokio::test]
async fn a_public_channel_broadcast_never_touches_the_auth_probe() {
    let bus = PubSubBus::new();
    let s = session(false, false, FakeAuthProbeRunner::deny_all());
    let mut rx = bus.subscribe(&s.tenant_topic());

    let delivered = broadcast::handle_client_broadcast(&s, &bus, &s.rate, 10, message())
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn a_private_channel_denied_by_rls_rejects_the_broadcast() {
    let bus = PubSubBus::new();
    let s = session(true, false, FakeAuthProbeRunner::deny_all());

    let err = broadcast::handle_client_broadcast(&s, &bus, &s.rate, 10, message())
        .await
        .unwrap_err();

    assert!(matches!(err, FanoutError::RlsPolicyError(_)));
}

#[tokio::test]
async fn replication_sourced_broadcasts_bypass_rate_limiting() {
    let bus = PubSubBus::new();
    let mut rx = bus.subscribe("realtime:room:1");

    // a limit of 1, already exhausted, would block a client-originated send...
    let s = session(false, false, FakeAuthProbeRunner::allow_all());
    s.rate.credit(&s.tenant_id, pg_fanout::core::rate::CounterKind::EventsPerSecond, 1);
    let blocked = broadcast::handle_client_broadcast(&s, &bus, &s.rate, 1, message()).await;
    assert!(blocked.is_err());

    // ...but a database-originated row is never subject to that counter.
    let delivered = broadcast::handle_database_broadcast(&bus, "realtime:room:1", message());
    assert_eq!(delivered, 1);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn presence_tracking_on_a_disabled_channel_is_a_no_op_not_an_error() {
    let s = session(false, false, FakeAuthProbeRunner::allow_all());
    let store = PresenceStore::new();
    let bus = PubSubBus::new();
    let rate = RateCounters::new();
    presence::handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({}))
        .await
        .unwrap();
    assert!(!store.contains(&s.topic, "user-1"));
}

#[tokio::test]
async fn presence_tracking_on_a_private_enabled_channel_follows_the_probe() {
    let s = session(true, true, FakeAuthProbeRunner::allow_all());
    let store = PresenceStore::new();
    let bus = PubSubBus::new();
    let rate = RateCounters::new();
    presence::handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({}))
        .await
        .unwrap();
    assert!(rate.rate(&s.tenant_id, pg_fanout::core::rate::CounterKind::JoinsPerSecond) >= 1);
}

#[tokio::test]
async fn presence_track_then_untrack_returns_to_pre_track_membership() {
    let s = session(false, true, FakeAuthProbeRunner::allow_all());
    let store = PresenceStore::new();
    let bus = PubSubBus::new();
    let rate = RateCounters::new();
    presence::handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({"status": "online"}))
        .await
        .unwrap();
    assert!(store.contains(&s.topic, "user-1"));
    presence::handle_untrack(&s, &store, &bus).await.unwrap();
    assert!(!store.contains(&s.topic, "user-1"));
}
