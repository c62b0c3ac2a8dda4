// src/core/replication/decode.rs

//! Decodes the `pgoutput` logical replication wire format into `Message`
//! rows. Only `INSERT`s against the message table are turned into
//! broadcasts; every other change kind is observed (to keep relation
//! metadata current) and otherwise dropped.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use postgres_protocol::message::backend::{LogicalReplicationMessage, ReplicationMessage, TupleData};
use uuid::Uuid;

use crate::core::errors::FanoutError;
use crate::core::types::{Message, MessageExtension};

struct RelationInfo {
    columns: Vec<String>,
}

/// Tracks `Relation` messages so later `Insert` messages (which only carry
/// column values, not names) can be mapped back to field names.
#[derive(Default)]
pub struct PgOutputDecoder {
    relations: HashMap<i32, RelationInfo>,
}

pub enum Decoded {
    Insert(Message),
    Keepalive { wal_end: u64, reply_requested: bool },
    Other,
}

impl PgOutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, raw: &ReplicationMessage<LogicalReplicationMessage>) -> Result<Decoded, FanoutError> {
        match raw {
            ReplicationMessage::XLogData(body) => self.decode_logical(body.data()),
            ReplicationMessage::PrimaryKeepAlive(k) => Ok(Decoded::Keepalive {
                wal_end: k.wal_end(),
                reply_requested: k.reply() != 0,
            }),
            _ => Ok(Decoded::Other),
        }
    }

    fn decode_logical(&mut self, msg: &LogicalReplicationMessage) -> Result<Decoded, FanoutError> {
        match msg {
            LogicalReplicationMessage::Relation(rel) => {
                let columns = rel
                    .columns()
                    .iter()
                    .map(|c| c.name().unwrap_or_default().to_string())
                    .collect();
                self.relations.insert(rel.rel_id(), RelationInfo { columns });
                Ok(Decoded::Other)
            }
            LogicalReplicationMessage::Insert(insert) => {
                let Some(relation) = self.relations.get(&insert.rel_id()) else {
                    return Ok(Decoded::Other);
                };
                let tuple = insert.tuple();
                let fields = zip_columns(&relation.columns, tuple.tuple_data());
                match build_message(&fields) {
                    Some(message) => Ok(Decoded::Insert(message)),
                    None => Ok(Decoded::Other),
                }
            }
            _ => Ok(Decoded::Other),
        }
    }
}

fn zip_columns<'a>(columns: &'a [String], values: &'a [TupleData]) -> HashMap<&'a str, Option<String>> {
    columns
        .iter()
        .zip(values.iter())
        .map(|(name, value)| {
            let text = match value {
                TupleData::Text(bytes) => String::from_utf8(bytes.to_vec()).ok(),
                TupleData::Null | TupleData::UnchangedToast => None,
            };
            (name.as_str(), text)
        })
        .collect()
}

fn build_message(fields: &HashMap<&str, Option<String>>) -> Option<Message> {
    let id = fields
        .get("id")
        .and_then(|v| v.as_deref())
        .and_then(|s| Uuid::from_str(s).ok())?;
    let topic = fields.get("topic").and_then(|v| v.clone())?;
    let private = fields
        .get("private")
        .and_then(|v| v.as_deref())
        .map(|s| s == "t")
        .unwrap_or(false);
    let event = fields.get("event").and_then(|v| v.clone());
    let extension = match fields.get("extension").and_then(|v| v.as_deref()) {
        Some("presence") => MessageExtension::Presence,
        _ => MessageExtension::Broadcast,
    };
    let payload = fields
        .get("payload")
        .and_then(|v| v.as_deref())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(serde_json::Value::Null);
    let inserted_at = fields
        .get("inserted_at")
        .and_then(|v| v.as_deref())
        .and_then(parse_pg_timestamp)
        .unwrap_or_else(Utc::now);
    // The commit timestamp column, distinct from `inserted_at`: the former
    // is when the transaction committed, the latter when the row's default
    // was evaluated. Both are decoded the same way off the replicated tuple.
    let committed_at = fields
        .get("committed_at")
        .and_then(|v| v.as_deref())
        .and_then(parse_pg_timestamp)
        .unwrap_or(inserted_at);

    Some(Message {
        id,
        topic,
        private,
        event,
        extension,
        payload,
        inserted_at,
        committed_at,
    })
}

fn parse_pg_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_requires_id_and_topic() {
        let mut fields: HashMap<&str, Option<String>> = HashMap::new();
        fields.insert("topic", Some("room:1".to_string()));
        assert!(build_message(&fields).is_none());
    }

    #[test]
    fn build_message_defaults_extension_to_broadcast() {
        let mut fields: HashMap<&str, Option<String>> = HashMap::new();
        fields.insert("id", Some(Uuid::nil().to_string()));
        fields.insert("topic", Some("room:1".to_string()));
        let message = build_message(&fields).unwrap();
        assert_eq!(message.extension, MessageExtension::Broadcast);
        assert!(!message.private);
    }

    #[test]
    fn build_message_parses_presence_extension_and_private_flag() {
        let mut fields: HashMap<&str, Option<String>> = HashMap::new();
        fields.insert("id", Some(Uuid::nil().to_string()));
        fields.insert("topic", Some("room:1".to_string()));
        fields.insert("extension", Some("presence".to_string()));
        fields.insert("private", Some("t".to_string()));
        let message = build_message(&fields).unwrap();
        assert_eq!(message.extension, MessageExtension::Presence);
        assert!(message.private);
    }

    #[test]
    fn parses_postgres_timestamp_with_microseconds() {
        let parsed = parse_pg_timestamp("2024-01-02 03:04:05.123456+00");
        assert!(parsed.is_some());
    }
}
