// src/core/auth/mod.rs

//! The authorization engine: derives a session's broadcast/presence
//! read/write capabilities by running RLS probes against the tenant
//! database, caching each direction's result for the life of the session.

pub mod engine;
pub mod policies;

use std::sync::Arc;

use crate::core::errors::FanoutError;
use crate::core::types::{AuthorizationContext, Policies, ProbeKind, Tri};
use engine::AuthProbeRunner;
use policies::AuthProbeCache;

pub struct AuthEngine {
    runner: Arc<dyn AuthProbeRunner>,
    cache: AuthProbeCache,
}

impl AuthEngine {
    pub fn new(runner: Arc<dyn AuthProbeRunner>) -> Self {
        Self {
            runner,
            cache: AuthProbeCache::new(),
        }
    }

    pub fn policies(&self) -> Policies {
        self.cache.snapshot()
    }

    /// Returns the cached capability for `kind` if a probe already ran;
    /// otherwise runs one, records it, and returns the (possibly still
    /// `Unknown`) result. A pool-exhaustion failure is surfaced uncached, so
    /// a later call can retry. A broken RLS policy is different: the probe
    /// itself raised, so the direction is latched `False` before the error
    /// is propagated — a policy that errors is not one we can trust to pass.
    pub async fn ensure(&self, ctx: &AuthorizationContext, kind: ProbeKind) -> Result<Tri, FanoutError> {
        if self.cache.already_probed(kind) {
            return Ok(self.read_cached(kind));
        }
        match self.runner.probe(ctx, kind).await {
            Ok(result) => Ok(self.cache.record(kind, result)),
            Err(err @ FanoutError::RlsPolicyError(_)) => {
                self.cache.record(kind, Tri::False);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn read_cached(&self, kind: ProbeKind) -> Tri {
        match kind {
            ProbeKind::BroadcastRead => self.cache.broadcast().read,
            ProbeKind::BroadcastWrite => self.cache.broadcast().write,
            ProbeKind::PresenceRead => self.cache.presence().read,
            ProbeKind::PresenceWrite => self.cache.presence().write,
        }
    }
}
