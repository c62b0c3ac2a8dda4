// src/core/auth/policies.rs

//! The per-session capability cache. A session's `Policies` start fully
//! `Unknown`; each probe direction is run at most once and latches its
//! result in permanently, per the tri-state rule in `Tri::latch`.

use parking_lot::Mutex;
use std::collections::HashSet;

use crate::core::types::{BroadcastPolicies, PresencePolicies, Policies, ProbeKind, Tri};

#[derive(Default)]
pub struct AuthProbeCache {
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    policies: Policies,
    probed: HashSet<ProbeKind>,
}

impl AuthProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Policies {
        self.state.lock().policies
    }

    /// True once a probe has been run for this direction, regardless of its
    /// outcome — the "at most once per direction per session" invariant.
    pub fn already_probed(&self, kind: ProbeKind) -> bool {
        self.state.lock().probed.contains(&kind)
    }

    /// Records a probe outcome. Marks the direction probed even when the
    /// result stays `Unknown` (a probe that legitimately can't determine an
    /// answer still counts as having run once).
    pub fn record(&self, kind: ProbeKind, result: Tri) -> Tri {
        let mut state = self.state.lock();
        state.probed.insert(kind);
        let policies = &mut state.policies;
        match kind {
            ProbeKind::BroadcastRead => {
                policies.broadcast.read = policies.broadcast.read.latch(result);
                policies.broadcast.read
            }
            ProbeKind::BroadcastWrite => {
                policies.broadcast.write = policies.broadcast.write.latch(result);
                policies.broadcast.write
            }
            ProbeKind::PresenceRead => {
                policies.presence.read = policies.presence.read.latch(result);
                policies.presence.read
            }
            ProbeKind::PresenceWrite => {
                policies.presence.write = policies.presence.write.latch(result);
                policies.presence.write
            }
        }
    }

    pub fn broadcast(&self) -> BroadcastPolicies {
        self.state.lock().policies.broadcast
    }

    pub fn presence(&self) -> PresencePolicies {
        self.state.lock().policies.presence
    }
}
