// src/core/connect/state.rs

//! The lifecycle states a connect supervisor moves through. Transitions
//! only ever go forward except into `ShuttingDown`, which can be entered
//! from anywhere.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Initializing,
    Migrating,
    Replicating,
    Serving,
    ShuttingDown,
}

impl ConnectState {
    pub fn can_accept_sessions(self) -> bool {
        matches!(self, ConnectState::Serving)
    }
}
