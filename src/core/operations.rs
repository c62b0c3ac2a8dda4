// src/core/operations.rs

//! The tenant operations bus: a narrow broadcast channel per tenant that
//! carries administrative signals (`suspend`, `unsuspend`, `disconnect`) to
//! whichever node owns that tenant's connect supervisor. Topic name is
//! `realtime:operations:<tenant_id>`, kept as a real string key (not just a
//! type tag) so it can be logged and correlated the same way a channel name
//! would be.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::core::types::TenantId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SuspendTenant,
    UnsuspendTenant,
    Disconnect,
}

pub fn operations_topic(tenant: &TenantId) -> String {
    format!("realtime:operations:{tenant}")
}

#[derive(Default)]
pub struct OperationsBus {
    channels: DashMap<TenantId, Arc<Sender<Operation>>>,
}

impl OperationsBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, tenant: &TenantId) -> Receiver<Operation> {
        self.channels
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(broadcast::channel(16).0))
            .value()
            .subscribe()
    }

    /// Broadcasts an operation to every subscriber currently watching this
    /// tenant (normally exactly one: its connect supervisor). Returns how
    /// many subscribers received it.
    pub fn publish(&self, tenant: &TenantId, op: Operation) -> usize {
        self.channels
            .get(tenant)
            .map(|sender| sender.send(op).unwrap_or(0))
            .unwrap_or(0)
    }
}
