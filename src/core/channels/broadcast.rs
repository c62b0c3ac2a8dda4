// src/core/channels/broadcast.rs

//! Gating logic for broadcast traffic: a public channel (`private == false`)
//! never needs an RLS probe; a private channel needs one per direction,
//! via the session's `AuthEngine`.

use std::sync::Arc;

use crate::core::errors::FanoutError;
use crate::core::pubsub::PubSubBus;
use crate::core::rate::{CounterKind, RateCounters};
use crate::core::types::{Message, ProbeKind, Session};

pub async fn authorize_write(session: &Session) -> Result<bool, FanoutError> {
    if !session.private {
        return Ok(true);
    }
    let result = session
        .auth
        .ensure(&session.auth_context, ProbeKind::BroadcastWrite)
        .await?;
    Ok(result.is_true())
}

pub async fn authorize_read(session: &Session) -> Result<bool, FanoutError> {
    if !session.private {
        return Ok(true);
    }
    let result = session
        .auth
        .ensure(&session.auth_context, ProbeKind::BroadcastRead)
        .await?;
    Ok(result.is_true())
}

/// Handles a broadcast sent by a connected client (as opposed to one ingested
/// from replication): authorizes the write, credits the events/sec counter,
/// and publishes to the tenant topic. `self_broadcast` decides whether the
/// sender's own socket should also receive the fan-out — left to the
/// caller, since that's purely a delivery-side decision, not a gating one.
pub async fn handle_client_broadcast(
    session: &Session,
    bus: &PubSubBus,
    rate: &RateCounters,
    max_events_per_second: u32,
    message: Arc<Message>,
) -> Result<usize, FanoutError> {
    if !authorize_write(session).await? {
        return Err(FanoutError::RlsPolicyError(
            "broadcast write denied by RLS policy".to_string(),
        ));
    }
    if !rate.try_credit(
        &session.tenant_id,
        CounterKind::EventsPerSecond,
        max_events_per_second as u64,
    ) {
        return Err(FanoutError::Internal(
            "events_per_second rate limit exceeded".to_string(),
        ));
    }
    Ok(bus.publish(&session.tenant_topic(), message))
}

/// Handles a row the replication ingester decoded into a broadcast. No rate
/// crediting here: these didn't come from a client request, they came from
/// a database commit, so "requests per second" doesn't apply.
pub fn handle_database_broadcast(bus: &PubSubBus, topic: &str, message: Arc<Message>) -> usize {
    bus.publish(topic, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::AuthEngine;
    use crate::core::auth::engine::fakes::FakeAuthProbeRunner;
    use crate::core::types::{AuthorizationContext, MessageExtension, TenantId};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn sample_session(private: bool, runner: FakeAuthProbeRunner) -> Session {
        let tenant_id = TenantId::from("acme");
        Session {
            tenant_id: tenant_id.clone(),
            topic: "room:1".into(),
            private,
            self_broadcast: false,
            ack_broadcast: false,
            presence_key: None,
            presence_enabled: false,
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

    fn sample_message() -> Arc<Message> {
        Arc::new(Message {
            id: Uuid::new_v4(),
            topic: "room:1".into(),
            private: true,
            event: None,
            extension: MessageExtension::Broadcast,
            payload: serde_json::Value::Null,
            inserted_at: Utc::now(),
            committed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn public_channel_never_probes() {
        let session = sample_session(false, FakeAuthProbeRunner::deny_all());
        assert!(authorize_write(&session).await.unwrap());
    }

    #[tokio::test]
    async fn private_channel_denied_by_policy_rejects_publish() {
        let session = sample_session(true, FakeAuthProbeRunner::deny_all());
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        let err = handle_client_broadcast(&session, &bus, &rate, 100, sample_message())
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::RlsPolicyError(_)));
    }

    #[tokio::test]
    async fn private_channel_allowed_by_policy_publishes() {
        let session = sample_session(true, FakeAuthProbeRunner::allow_all());
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        let _rx = bus.subscribe(&session.tenant_topic());
        let delivered = handle_client_broadcast(&session, &bus, &rate, 100, sample_message())
            .await
            .unwrap();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_blocks_publish() {
        let session = sample_session(false, FakeAuthProbeRunner::allow_all());
        let bus = PubSubBus::new();
        let rate = RateCounters::new();
        rate.credit(&session.tenant_id, CounterKind::EventsPerSecond, 1);
        let err = handle_client_broadcast(&session, &bus, &rate, 1, sample_message())
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::Internal(_)));
    }
}
