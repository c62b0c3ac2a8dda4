// src/core/connect/handle.rs

//! The client-facing side of a connect supervisor: a cheap, cloneable
//! handle over an mpsc command queue into the actor task that actually
//! owns the tenant's state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::core::auth::engine::AuthProbeRunner;
use crate::core::channels::presence::PresenceStore;
use crate::core::connect::state::ConnectState;
use crate::core::errors::FanoutError;
use crate::core::pubsub::PubSubBus;
use crate::core::rate::RateCounters;
use crate::core::types::TenantId;

pub enum ConnectCommand {
    Shutdown { reply: oneshot::Sender<()> },
    CurrentState { reply: oneshot::Sender<ConnectState> },
}

/// A cheap, cloneable handle to a running connect supervisor. Carries
/// everything a newly connecting session needs to join that tenant: the
/// pub/sub bus to subscribe on, the rate counters to credit against, the
/// presence membership store, and the probe runner to build a per-session
/// `AuthEngine` from.
#[derive(Clone)]
pub struct ConnectHandle {
    tenant_id: TenantId,
    tx: mpsc::Sender<ConnectCommand>,
    pub bus: Arc<PubSubBus>,
    pub rate: Arc<RateCounters>,
    pub presence: Arc<PresenceStore>,
    pub auth_runner: Arc<dyn AuthProbeRunner>,
}

impl ConnectHandle {
    pub fn new(
        tenant_id: TenantId,
        tx: mpsc::Sender<ConnectCommand>,
        bus: Arc<PubSubBus>,
        rate: Arc<RateCounters>,
        presence: Arc<PresenceStore>,
        auth_runner: Arc<dyn AuthProbeRunner>,
    ) -> Self {
        Self {
            tenant_id,
            tx,
            bus,
            rate,
            presence,
            auth_runner,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub async fn shutdown(&self) -> Result<(), FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ConnectCommand::Shutdown { reply })
            .await
            .map_err(|_| FanoutError::Internal("connect supervisor already gone".to_string()))?;
        rx.await
            .map_err(|_| FanoutError::Internal("connect supervisor dropped shutdown reply".to_string()))
    }

    pub async fn current_state(&self) -> Result<ConnectState, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ConnectCommand::CurrentState { reply })
            .await
            .map_err(|_| FanoutError::Internal("connect supervisor already gone".to_string()))?;
        rx.await
            .map_err(|_| FanoutError::Internal("connect supervisor dropped state reply".to_string()))
    }
}
