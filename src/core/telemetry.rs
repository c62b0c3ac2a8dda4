// src/core/telemetry.rs

//! Structured log events emitted at the points the tenant operator cares
//! about. Formatting that data as Prometheus series is someone else's job;
//! this module only owns making the events exist with consistent fields.

use chrono::{DateTime, Utc};

use crate::core::types::TenantId;

/// `committed_at`/`inserted_at` are the row's own timestamps, not when this
/// process happened to observe them — latency is measured against the
/// database's clock, not wall time spent decoding and fanning out.
pub fn broadcast_from_database(
    tenant: &TenantId,
    topic: &str,
    committed_at: DateTime<Utc>,
    inserted_at: DateTime<Utc>,
) {
    let now = Utc::now();
    let latency_committed_at = (now - committed_at).num_milliseconds();
    let latency_inserted_at = (now - inserted_at).num_milliseconds();
    tracing::info!(
        tenant_id = %tenant,
        topic,
        latency_committed_at,
        latency_inserted_at,
        "broadcast_from_database"
    );
}

pub fn unable_to_broadcast_changes(tenant: &TenantId, topic: &str, reason: &str) {
    tracing::warn!(tenant_id = %tenant, topic, reason, "UnableToBroadcastChanges");
}

pub fn tenant_connected(tenant: &TenantId, region: &str) {
    tracing::info!(tenant_id = %tenant, region, "tenant_connected");
}

pub fn tenant_db_disconnected(tenant: &TenantId, reason: &str) {
    tracing::warn!(tenant_id = %tenant, reason, "tenant_db_disconnected");
}
