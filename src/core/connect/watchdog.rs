// src/core/connect/watchdog.rs

//! Two watchdogs the connect supervisor runs alongside its main loop:
//! idle-shutdown (stop a tenant with nobody connected) and region rebalance
//! (hand a tenant back to a node in its own region once one is available).

/// Samples connected-client counts into a 6-slot ring; if every slot reads
/// zero the tenant has had no connected clients across the whole window
/// and is a candidate for idle shutdown.
pub struct IdleShutdownWatchdog {
    samples: [u32; 6],
    idx: usize,
}

impl Default for IdleShutdownWatchdog {
    fn default() -> Self {
        // Seed with non-zero so a supervisor that hasn't taken its first
        // sample yet is never mistaken for idle.
        Self {
            samples: [1; 6],
            idx: 0,
        }
    }
}

impl IdleShutdownWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current connected-client count. Returns `true` once all
    /// six slots have read zero.
    pub fn record(&mut self, connected_clients: u32) -> bool {
        self.samples[self.idx] = connected_clients;
        self.idx = (self.idx + 1) % self.samples.len();
        self.samples.iter().all(|&s| s == 0)
    }
}

/// Decides whether a tenant currently owned by this node should be handed
/// off to a node in the tenant's own region.
pub fn should_rebalance(local_region: &str, tenant_region: &str, region_node_available: bool) -> bool {
    local_region != tenant_region && region_node_available
}
