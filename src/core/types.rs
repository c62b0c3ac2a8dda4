// src/core/types.rs

//! Shared data types: tenants, messages, authorization context and the
//! tri-state capability grid sessions carry around.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Distinguishes a tenant's external id from any other bare `String` floating
/// around call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-tenant Postgres connection material. Lives on the `Tenant` record
/// rather than in static config, since it varies per tenant and is fetched
/// from the tenant catalog, not a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbExtension {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub ssl_enforced: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// A tenant as known to the cluster: identity, region, suspension state and
/// the DB extension used to reach its database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub external_id: String,
    pub region: String,
    pub suspend: bool,
    pub jwt_secret: String,
    pub jwks: Option<serde_json::Value>,
    pub max_concurrent_users: u32,
    pub max_events_per_second: u32,
    pub max_joins_per_second: u32,
    pub max_channels_per_client: u32,
    pub max_bytes_per_second: u32,
    pub extensions: Vec<DbExtension>,
}

impl Tenant {
    pub fn primary_extension(&self) -> Option<&DbExtension> {
        self.extensions.first()
    }
}

/// `extension` discriminant of a replicated message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageExtension {
    Broadcast,
    Presence,
}

/// A row ingested from the tenant's `realtime.messages` table via logical
/// replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub private: bool,
    pub event: Option<String>,
    pub extension: MessageExtension,
    pub payload: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
}

impl Message {
    /// Merges `id` into `payload` for fan-out: added when absent, never
    /// overriding a value the row's own payload already carries. Non-object
    /// payloads have no key to merge into, so they're wrapped instead.
    pub fn merge_id_into_payload(mut self) -> Self {
        let id = serde_json::Value::String(self.id.to_string());
        self.payload = match std::mem::take(&mut self.payload) {
            serde_json::Value::Object(mut map) => {
                map.entry("id").or_insert(id);
                serde_json::Value::Object(map)
            }
            other => serde_json::json!({ "id": id, "payload": other }),
        };
        self
    }
}

/// Everything an authorization probe needs to evaluate RLS for a session:
/// the claims pulled from the verified JWT plus request-scoped headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub tenant_id: TenantId,
    pub topic: String,
    pub claims: serde_json::Value,
    pub role: String,
    pub headers: HashMap<String, String>,
}

impl AuthorizationContext {
    pub fn claim_sub(&self) -> Option<&str> {
        self.claims.get("sub").and_then(|v| v.as_str())
    }
}

/// A tri-state capability. Distinct from `Option<bool>` so that `Unknown`
/// can never be accidentally treated as `false` by an `unwrap_or(false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Tri {
    #[default]
    Unknown,
    True,
    False,
}

impl Tri {
    pub fn from_bool(b: bool) -> Self {
        if b { Tri::True } else { Tri::False }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Tri::Unknown)
    }

    pub fn is_true(self) -> bool {
        matches!(self, Tri::True)
    }

    /// Once a capability resolves to a concrete boolean it is terminal: a
    /// later probe result never overwrites it. Only `Unknown -> x` advances.
    pub fn latch(self, probed: Tri) -> Tri {
        if self.is_known() { self } else { probed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BroadcastPolicies {
    pub read: Tri,
    pub write: Tri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresencePolicies {
    pub read: Tri,
    pub write: Tri,
}

/// The capability grid a session accumulates as probes run. One probe per
/// direction per session, at most: see `AuthProbeCache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policies {
    pub broadcast: BroadcastPolicies,
    pub presence: PresencePolicies,
}

/// The probe kind, used as the cache key so "at most once per direction per
/// session" is enforceable without re-deriving it from `Policies` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    BroadcastRead,
    BroadcastWrite,
    PresenceRead,
    PresenceWrite,
}

/// A connected client's view of one channel: which topic, whether it's
/// private, and the handles it needs to check authorization and rate
/// limits for that tenant.
pub struct Session {
    pub tenant_id: TenantId,
    pub topic: String,
    pub private: bool,
    pub self_broadcast: bool,
    pub ack_broadcast: bool,
    pub presence_key: Option<String>,
    pub presence_enabled: bool,
    pub auth_context: AuthorizationContext,
    pub auth: std::sync::Arc<crate::core::auth::AuthEngine>,
    pub rate: std::sync::Arc<crate::core::rate::RateCounters>,
}

impl Session {
    pub fn tenant_topic(&self) -> String {
        format!("realtime:{}", self.topic)
    }
}
