// src/core/channels/presence.rs

//! Gating and state for presence traffic. Presence additionally requires the
//! channel to have presence enabled at all (`session.presence_enabled`) on
//! top of the same public/private + RLS-probe rule broadcast uses, plus a
//! membership map (who's tracked, under what metadata) that `track`/`untrack`
//! mutate and that every change fans out as a `presence_diff` broadcast.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::core::errors::FanoutError;
use crate::core::pubsub::PubSubBus;
use crate::core::rate::{CounterKind, RateCounters};
use crate::core::types::{Message, MessageExtension, ProbeKind, Session};

/// Per-tenant presence membership, keyed by topic then by `presence_key`.
/// One store is shared by every session on a tenant's connect supervisor,
/// the same way `PubSubBus` shares its topic map — `track` replaces an
/// existing key's metadata outright rather than merging it.
#[derive(Default)]
pub struct PresenceStore {
    topics: DashMap<String, DashMap<String, serde_json::Value>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or replaces) `key`'s metadata on `topic`. Returns the prior
    /// value, if any, so the caller can tell a fresh join from a re-track.
    pub fn track(&self, topic: &str, key: &str, meta: serde_json::Value) -> Option<serde_json::Value> {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(key.to_string(), meta)
    }

    /// Removes `key` from `topic`'s membership. Returns the metadata it held.
    pub fn untrack(&self, topic: &str, key: &str) -> Option<serde_json::Value> {
        self.topics.get(topic).and_then(|members| members.remove(key).map(|(_, v)| v))
    }

    pub fn contains(&self, topic: &str, key: &str) -> bool {
        self.topics.get(topic).map(|members| members.contains_key(key)).unwrap_or(false)
    }

    pub fn member_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|members| members.len()).unwrap_or(0)
    }
}

pub async fn authorize_track(session: &Session) -> Result<bool, FanoutError> {
    if !session.presence_enabled {
        return Ok(false);
    }
    if !session.private {
        return Ok(true);
    }
    let result = session
        .auth
        .ensure(&session.auth_context, ProbeKind::PresenceWrite)
        .await?;
    Ok(result.is_true())
}

pub async fn authorize_read(session: &Session) -> Result<bool, FanoutError> {
    if !session.presence_enabled {
        return Ok(false);
    }
    if !session.private {
        return Ok(true);
    }
    let result = session
        .auth
        .ensure(&session.auth_context, ProbeKind::PresenceRead)
        .await?;
    Ok(result.is_true())
}

/// Dispatches a client's presence event. `"track"`/`"untrack"` are the only
/// recognized events; anything else is logged as `UnknownPresenceEvent` and
/// rejected rather than silently ignored.
pub async fn handle_presence_event(
    session: &Session,
    store: &PresenceStore,
    bus: &PubSubBus,
    rate: &RateCounters,
    max_joins_per_second: u32,
    event: &str,
    meta: serde_json::Value,
) -> Result<(), FanoutError> {
    match event {
        "track" => handle_track(session, store, bus, rate, max_joins_per_second, meta).await,
        "untrack" => handle_untrack(session, store, bus).await,
        other => {
            warn!(
                tenant_id = %session.tenant_id,
                topic = %session.topic,
                event = other,
                "UnknownPresenceEvent"
            );
            Err(FanoutError::Internal(format!("unknown presence event: {other}")))
        }
    }
}

/// A client asking to track (join) presence on a channel. Crediting the
/// joins/sec counter happens here rather than in the caller, since a join
/// always implies exactly one credit regardless of payload size. A channel
/// with presence disabled is not a policy violation, just a no-op: the
/// caller asked for something this channel doesn't offer.
pub async fn handle_track(
    session: &Session,
    store: &PresenceStore,
    bus: &PubSubBus,
    rate: &RateCounters,
    max_joins_per_second: u32,
    meta: serde_json::Value,
) -> Result<(), FanoutError> {
    if !session.presence_enabled {
        return Ok(());
    }
    if !authorize_track(session).await? {
        return Err(FanoutError::RlsPolicyError(
            "presence write denied by RLS policy".to_string(),
        ));
    }
    if !rate.try_credit(
        &session.tenant_id,
        CounterKind::JoinsPerSecond,
        max_joins_per_second as u64,
    ) {
        return Err(FanoutError::Internal(
            "joins_per_second rate limit exceeded".to_string(),
        ));
    }
    let key = session
        .presence_key
        .clone()
        .ok_or_else(|| FanoutError::Internal("presence track requires a presence_key".to_string()))?;

    store.track(&session.topic, &key, meta.clone());
    publish_presence_diff(session, bus, serde_json::json!({ key: meta }), serde_json::json!({}));
    Ok(())
}

/// A client leaving presence on a channel. Symmetric with `handle_track`: a
/// disabled channel or a missing key is a no-op, not an error.
pub async fn handle_untrack(session: &Session, store: &PresenceStore, bus: &PubSubBus) -> Result<(), FanoutError> {
    if !session.presence_enabled {
        return Ok(());
    }
    let Some(key) = session.presence_key.clone() else {
        return Ok(());
    };
    if let Some(meta) = store.untrack(&session.topic, &key) {
        publish_presence_diff(session, bus, serde_json::json!({}), serde_json::json!({ key: meta }));
    }
    Ok(())
}

fn publish_presence_diff(session: &Session, bus: &PubSubBus, joins: serde_json::Value, leaves: serde_json::Value) {
    let now = chrono::Utc::now();
    let message = Arc::new(Message {
        id: Uuid::new_v4(),
        topic: session.topic.clone(),
        private: session.private,
        event: Some("presence_diff".to_string()),
        extension: MessageExtension::Presence,
        payload: serde_json::json!({ "joins": joins, "leaves": leaves }),
        inserted_at: now,
        committed_at: now,
    });
    bus.publish(&session.tenant_topic(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::AuthEngine;
    use crate::core::auth::engine::fakes::FakeAuthProbeRunner;
    use crate::core::types::{AuthorizationContext, TenantId};
    use std::collections::HashMap;

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
                claims: serde_json::json!({}),
                role: "authenticated".into(),
                headers: HashMap::new(),
            },
            auth: Arc::new(AuthEngine::new(Arc::new(runner))),
            rate: Arc::new(RateCounters::new()),
        }
    }

    #[tokio::test]
    async fn presence_disabled_is_always_denied_by_authorize() {
        let s = session(false, false, FakeAuthProbeRunner::allow_all());
        assert!(!authorize_track(&s).await.unwrap());
    }

    #[tokio::test]
    async fn public_presence_enabled_channel_is_allowed() {
        let s = session(false, true, FakeAuthProbeRunner::deny_all());
        assert!(authorize_track(&s).await.unwrap());
    }

    #[tokio::test]
    async fn private_presence_channel_follows_probe_result() {
        let s = session(true, true, FakeAuthProbeRunner::deny_all());
        assert!(!authorize_track(&s).await.unwrap());
    }

    #[tokio::test]
    async fn handle_track_on_a_disabled_channel_is_a_no_op_success() {
        let s = session(false, false, FakeAuthProbeRunner::allow_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({})).await.unwrap();
        assert!(!store.contains(&s.topic, "user-1"));
        assert_eq!(rate.rate(&s.tenant_id, CounterKind::JoinsPerSecond), 0);
    }

    #[tokio::test]
    async fn handle_track_denied_by_rls_is_an_error() {
        let s = session(true, true, FakeAuthProbeRunner::deny_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        let err = handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::RlsPolicyError(_)));
    }

    #[tokio::test]
    async fn handle_track_credits_joins_counter_and_records_membership() {
        let s = session(false, true, FakeAuthProbeRunner::allow_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({"status": "online"}))
            .await
            .unwrap();
        assert!(rate.rate(&s.tenant_id, CounterKind::JoinsPerSecond) >= 1);
        assert!(store.contains(&s.topic, "user-1"));
    }

    #[tokio::test]
    async fn track_then_untrack_publishes_diffs_and_returns_to_pre_track_state() {
        let s = session(false, true, FakeAuthProbeRunner::allow_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        let mut rx = bus.subscribe(&s.tenant_topic());

        handle_track(&s, &store, &bus, &rate, 10, serde_json::json!({"status": "online"}))
            .await
            .unwrap();
        assert_eq!(store.member_count(&s.topic), 1);
        let joined = rx.try_recv().unwrap();
        assert_eq!(joined.message.event.as_deref(), Some("presence_diff"));
        assert!(joined.message.payload["joins"]["user-1"].is_object());

        handle_untrack(&s, &store, &bus).await.unwrap();
        assert_eq!(store.member_count(&s.topic), 0);
        let left = rx.try_recv().unwrap();
        assert_eq!(left.message.payload["leaves"]["user-1"]["status"], serde_json::json!("online"));
    }

    #[tokio::test]
    async fn untrack_of_a_key_never_tracked_is_a_no_op() {
        let s = session(false, true, FakeAuthProbeRunner::allow_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let mut rx = bus.subscribe(&s.tenant_topic());
        handle_untrack(&s, &store, &bus).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_event_is_rejected() {
        let s = session(false, true, FakeAuthProbeRunner::allow_all());
        let store = PresenceStore::new();
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        let err = handle_presence_event(&s, &store, &bus, &rate, 10, "wave", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::Internal(_)));
    }
}
