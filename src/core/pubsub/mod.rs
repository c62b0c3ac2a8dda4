// src/core/pubsub/mod.rs

//! The tenant-scoped publish/subscribe bus. Every tenant topic (channel) is
//! a broadcast channel; in addition to the generic `Envelope` fan-out a
//! "fastlane" path lets callers register a sink that receives an
//! already-encoded frame directly, skipping per-subscriber re-encoding.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::core::errors::FanoutError;
use crate::core::types::Message;

const CHANNEL_CAPACITY: usize = 256;

/// A message handed to generic (non-fastlane) subscribers of a topic.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub message: Arc<Message>,
}

/// A subscriber that wants pre-encoded frames handed to it directly rather
/// than decoding an `Envelope` itself. Registered per topic; the bus calls
/// `send_encoded` once per publish instead of once per subscriber re-encode.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn send_encoded(&self, payload: Bytes) -> Result<(), FanoutError>;
}

#[derive(Default)]
struct Topic {
    sender: Option<Arc<Sender<Envelope>>>,
    fastlane: Vec<Arc<dyn SubscriberSink>>,
}

/// Central hub for all tenant pub/sub traffic. One `PubSubBus` is shared by
/// every session belonging to a tenant's connect supervisor.
#[derive(Default)]
pub struct PubSubBus {
    topics: DashMap<String, Topic>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to generic (decode-it-yourself) delivery on a topic.
    pub fn subscribe(&self, topic: &str) -> Receiver<Envelope> {
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        if entry.sender.is_none() {
            entry.sender = Some(Arc::new(broadcast::channel(CHANNEL_CAPACITY).0));
        }
        entry.sender.as_ref().unwrap().subscribe()
    }

    /// Registers a fastlane sink for pre-encoded delivery on a topic.
    pub fn register_fastlane(&self, topic: &str, sink: Arc<dyn SubscriberSink>) {
        self.topics.entry(topic.to_string()).or_default().fastlane.push(sink);
    }

    /// Publishes a message to a topic's generic subscribers. Returns the
    /// number of generic receivers the message reached (fastlane sinks are
    /// delivered separately via `publish_encoded`).
    pub fn publish(&self, topic: &str, message: Arc<Message>) -> usize {
        let Some(entry) = self.topics.get(topic) else {
            return 0;
        };
        match &entry.sender {
            Some(sender) => sender
                .send(Envelope {
                    topic: topic.to_string(),
                    message,
                })
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Delivers a pre-encoded frame to every fastlane sink registered on a
    /// topic, in addition to whatever `publish` already reached.
    pub async fn publish_encoded(&self, topic: &str, payload: Bytes) {
        let sinks: Vec<_> = match self.topics.get(topic) {
            Some(entry) => entry.fastlane.clone(),
            None => return,
        };
        for sink in sinks {
            if let Err(err) = sink.send_encoded(payload.clone()).await {
                tracing::debug!(topic, error = %err, "fastlane sink delivery failed");
            }
        }
    }

    /// Drops topics with no remaining generic subscribers and no fastlane
    /// sinks, freeing the broadcast channel. Meant to be called from a
    /// periodic maintenance task, mirroring a purge sweep over shared maps.
    pub fn purge_empty_topics(&self) -> usize {
        let mut purged = 0;
        self.topics.retain(|_, topic| {
            let alive = topic
                .sender
                .as_ref()
                .map(|s| s.receiver_count() > 0)
                .unwrap_or(false)
                || !topic.fastlane.is_empty();
            if !alive {
                purged += 1;
            }
            alive
        });
        purged
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .and_then(|t| t.sender.as_ref().map(|s| s.receiver_count()))
            .unwrap_or(0)
    }
}
