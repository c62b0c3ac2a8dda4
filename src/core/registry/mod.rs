// src/core/registry/mod.rs

//! The cluster-wide name registry: which node owns which tenant's connect
//! supervisor, and which nodes are present in which region. Backed by an
//! in-process `DashMap` the way this workspace's warden state keeps its
//! monitor table; a multi-node deployment swaps in a registry backed by the
//! cluster bus behind the same API.

pub mod conflict;

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::timeout;

use crate::core::errors::FanoutError;
use conflict::{Candidate, Winner, resolve};

/// Which namespace a registry key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Owning node of a tenant's connect supervisor.
    Connect,
    /// Membership of a node within a region.
    RegionNodes,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key(Scope, String);

#[derive(Debug, Clone)]
struct Entry {
    candidate: Candidate,
}

/// Outcome of a `register` call: either the caller now owns the slot, or it
/// lost the conflict and the current owner is returned so the caller can
/// shut down gracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Won,
    Lost { owner: String },
}

/// Per-key "ready" notification bus. Subscribers register interest before
/// checking whether the condition already holds, so a `register`/`announce`
/// that races ahead of a `subscribe` is never silently missed.
#[derive(Default)]
struct ReadyBus {
    channels: DashMap<String, Arc<Sender<()>>>,
    ready: DashSet<String>,
}

impl ReadyBus {
    fn subscribe(&self, key: &str) -> Receiver<()> {
        self.channels
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(broadcast::channel(1).0))
            .value()
            .subscribe()
    }

    fn is_ready(&self, key: &str) -> bool {
        self.ready.contains(key)
    }

    fn announce(&self, key: &str) {
        self.ready.insert(key.to_string());
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(());
        }
    }
}

/// The cluster registry.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<Key, Entry>,
    ready: ReadyBus,
    local_region: parking_lot::RwLock<String>,
}

impl Registry {
    pub fn new(local_region: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            ready: ReadyBus::default(),
            local_region: parking_lot::RwLock::new(local_region.into()),
        }
    }

    /// Registers (or re-registers) `candidate` under `scope`/`name`. If the
    /// slot is already held, the conflict rule decides the winner; the
    /// loser's owner id is returned so the caller can tell it to stop.
    pub fn register(&self, scope: Scope, name: &str, candidate: Candidate) -> Registration {
        let key = Key(scope, name.to_string());
        let region = self.local_region.read().clone();

        let outcome = match self.entries.get(&key) {
            Some(existing) if existing.candidate.owner != candidate.owner => {
                match resolve(&existing.candidate, &candidate, &region) {
                    Winner::Candidate => None,
                    Winner::Existing => Some(existing.candidate.owner.clone()),
                }
            }
            _ => None,
        };

        match outcome {
            Some(owner) => Registration::Lost { owner },
            None => {
                self.entries.insert(key, Entry { candidate });
                Registration::Won
            }
        }
    }

    /// Announces that whatever `register` claimed for `name` has finished
    /// starting up and is actually serving traffic. Kept separate from
    /// `register` itself: ownership and readiness are different moments —
    /// a tenant can hold its registry slot for a while before replication
    /// and the startup pipeline finish.
    pub fn mark_ready(&self, name: &str) {
        self.ready.announce(name);
    }

    pub fn lookup(&self, scope: Scope, name: &str) -> Option<String> {
        self.entries
            .get(&Key(scope, name.to_string()))
            .map(|e| e.candidate.owner.clone())
    }

    pub fn members(&self, scope: Scope) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == scope)
            .map(|e| (e.key().1.clone(), e.value().candidate.owner.clone()))
            .collect()
    }

    pub fn deregister(&self, scope: Scope, name: &str, owner: &str) {
        self.entries.remove_if(&Key(scope, name.to_string()), |_, v| v.candidate.owner == owner);
    }

    /// Subscribes for, then checks, readiness of `name` — avoiding the
    /// window where the condition becomes true between a check and a
    /// subscribe. Returns once the key is registered under `Scope::Connect`
    /// or the timeout elapses.
    pub async fn wait_ready(&self, name: &str, wait: Duration) -> Result<(), FanoutError> {
        let mut rx = self.ready.subscribe(name);
        if self.ready.is_ready(name) {
            return Ok(());
        }
        match timeout(wait, rx.recv()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(FanoutError::Timeout),
        }
    }
}
