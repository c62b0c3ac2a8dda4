// src/core/replication/ingester.rs

//! Owns the lifecycle of one tenant's logical replication connection:
//! connect, ensure the slot exists, stream `pgoutput` data, decode inserts
//! into `Message`s and hand them to the caller. Reconnects with exponential
//! backoff on any connection loss, the same shape as this workspace's
//! replica worker reconnect loop.

use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::StreamExt;
use postgres_protocol::message::backend::{LogicalReplicationMessage, ReplicationMessage};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_postgres::replication::LogicalReplicationStream;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use crate::core::db::classify_replication_error;
use crate::core::errors::FanoutError;
use crate::core::replication::decode::{Decoded, PgOutputDecoder};
use crate::core::types::{DbExtension, Message, TenantId};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const PUBLICATION_NAME: &str = "supabase_realtime";

pub struct ReplicationIngester {
    tenant: TenantId,
    extension: DbExtension,
    slot_name: String,
    keepalive_interval: Duration,
}

impl ReplicationIngester {
    pub fn new(tenant: TenantId, extension: DbExtension, slot_name: String, keepalive_interval: Duration) -> Self {
        Self {
            tenant,
            extension,
            slot_name,
            keepalive_interval,
        }
    }

    /// Runs the ingester until `shutdown` fires, reconnecting on any
    /// transport failure. Decoded inserts are sent on `tx`; the receiver
    /// side hangs up to signal the ingester should stop.
    pub async fn run(self, tx: mpsc::Sender<Message>, mut shutdown: mpsc::Receiver<()>) -> Result<(), FanoutError> {
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(tenant_id = %self.tenant, "replication ingester shutting down");
                    return Ok(());
                }
                result = self.connect_and_stream(&tx) => {
                    match result {
                        Ok(()) => {
                            // Stream ended cleanly (peer closed); treat as a disconnect and retry.
                            delay = INITIAL_RECONNECT_DELAY;
                        }
                        Err(FanoutError::MaxWalSendersReached) => {
                            warn!(tenant_id = %self.tenant, "max_wal_senders_reached, backing off");
                        }
                        Err(err) => {
                            error!(tenant_id = %self.tenant, error = %err, "replication stream error");
                        }
                    }
                }
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            let wait = delay + jitter;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!(tenant_id = %self.tenant, "replication ingester shutting down during backoff");
                    return Ok(());
                }
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    async fn connect_and_stream(&self, tx: &mpsc::Sender<Message>) -> Result<(), FanoutError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.extension.host)
            .port(self.extension.port)
            .user(&self.extension.user)
            .password(&self.extension.password)
            .dbname(&self.extension.db_name)
            .replication_mode(tokio_postgres::config::ReplicationMode::Logical);

        let (client, connection) = config.connect(NoTls).await.map_err(classify_replication_error)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "replication connection terminated");
            }
        });

        self.ensure_slot(&client).await?;

        let query = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (proto_version '1', publication_names '{}')",
            self.slot_name, PUBLICATION_NAME
        );
        let duplex = client
            .copy_both_simple::<Bytes>(&query)
            .await
            .map_err(classify_replication_error)?;

        let mut stream = Box::pin(LogicalReplicationStream::new(duplex));
        let mut decoder = PgOutputDecoder::new();

        loop {
            let Some(message) = stream.next().await else {
                return Ok(());
            };
            let message = message.map_err(classify_replication_error)?;
            match decoder.decode(&message)? {
                Decoded::Insert(row) => {
                    if tx.send(row).await.is_err() {
                        return Ok(());
                    }
                }
                Decoded::Keepalive { reply_requested, .. } => {
                    if reply_requested {
                        stream
                            .as_mut()
                            .standby_status_update(0, 0, 0, chrono_epoch_micros(), 0)
                            .await
                            .map_err(classify_replication_error)?;
                    }
                }
                Decoded::Other => {}
            }
        }
    }

    /// Creates the tenant's dedicated temporary slot if it does not already
    /// exist. Idempotent across reconnects.
    async fn ensure_slot(&self, client: &Client) -> Result<(), FanoutError> {
        let check = client
            .simple_query(&format!(
                "SELECT 1 FROM pg_replication_slots WHERE slot_name = '{}'",
                self.slot_name
            ))
            .await
            .map_err(classify_replication_error)?;

        let exists = check
            .iter()
            .any(|m| matches!(m, SimpleQueryMessage::Row(_)));
        if exists {
            return Ok(());
        }

        client
            .simple_query(&format!(
                "CREATE_REPLICATION_SLOT \"{}\" LOGICAL pgoutput",
                self.slot_name
            ))
            .await
            .map_err(classify_replication_error)?;
        Ok(())
    }
}

fn chrono_epoch_micros() -> i64 {
    // Postgres replication protocol epoch is 2000-01-01, not Unix epoch.
    const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;
    let now = chrono::Utc::now().timestamp_micros();
    now - PG_EPOCH_OFFSET_SECS * 1_000_000
}
