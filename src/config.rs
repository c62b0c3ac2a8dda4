// src/config.rs

//! Loads and validates static process configuration. Per-tenant connection
//! material (DB host, JWT secret, region) is data fetched from the tenant
//! catalog at runtime, not part of this file.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Connection pool sizing for tenant database pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPoolConfig {
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(with = "humantime_serde", default = "default_checkout_timeout")]
    pub checkout_timeout: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            checkout_timeout: default_checkout_timeout(),
        }
    }
}

fn default_min_pool_size() -> u32 {
    0
}
fn default_max_pool_size() -> u32 {
    5
}
fn default_checkout_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Tunables for the logical replication ingester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(with = "humantime_serde", default = "default_startup_timeout")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_keepalive_interval")]
    pub keepalive_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_keepalive_interval() -> Duration {
    Duration::from_secs(10)
}

/// The validated, resolved process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,

    /// This node's identity in the cluster registry. Defaults to a random
    /// id so a single-node deployment never needs to set it explicitly.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// The region this node runs in, used by the registry's conflict
    /// resolution and the region-rebalance watchdog.
    #[serde(default = "default_region")]
    pub region: String,

    /// Appended to the logical replication slot name so multiple
    /// environments sharing a tenant database don't collide on a slot.
    #[serde(default)]
    pub slot_name_suffix: Option<String>,

    /// Named JWT claim validators applied before a session's claims are
    /// trusted for authorization probes.
    #[serde(default)]
    pub jwt_claim_validators: Vec<String>,

    #[serde(with = "humantime_serde", default = "default_rebalance_interval")]
    pub rebalance_check_interval: Duration,

    #[serde(
        with = "humantime_serde",
        default = "default_check_connected_user_interval"
    )]
    pub check_connected_user_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_erpc_timeout")]
    pub erpc_timeout: Duration,

    #[serde(default)]
    pub db_pool: DbPoolConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            node_id: default_node_id(),
            region: default_region(),
            slot_name_suffix: None,
            jwt_claim_validators: Vec::new(),
            rebalance_check_interval: default_rebalance_interval(),
            check_connected_user_interval: default_check_connected_user_interval(),
            erpc_timeout: default_erpc_timeout(),
            db_pool: DbPoolConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_node_id() -> String {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("getrandom");
    format!("node-{}", hex::encode(buf))
}
fn default_region() -> String {
    "local".to_string()
}
fn default_rebalance_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_check_connected_user_interval() -> Duration {
    Duration::from_secs(50)
}
fn default_erpc_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Mirrors `Config` field-for-field but with every optional field truly
/// optional at the TOML level, so `#[serde(default = "...")]` functions on
/// `Config` itself can't silently shadow a malformed file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_node_id")]
    node_id: String,
    #[serde(default = "default_region")]
    region: String,
    #[serde(default)]
    slot_name_suffix: Option<String>,
    #[serde(default)]
    jwt_claim_validators: Vec<String>,
    #[serde(with = "humantime_serde", default = "default_rebalance_interval")]
    rebalance_check_interval: Duration,
    #[serde(
        with = "humantime_serde",
        default = "default_check_connected_user_interval"
    )]
    check_connected_user_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_erpc_timeout")]
    erpc_timeout: Duration,
    #[serde(default)]
    db_pool: DbPoolConfig,
    #[serde(default)]
    replication: ReplicationConfig,
}

impl Config {
    /// Reads and parses a TOML file into a validated `Config`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            node_id: raw.node_id,
            region: raw.region,
            slot_name_suffix: raw.slot_name_suffix,
            jwt_claim_validators: raw.jwt_claim_validators,
            rebalance_check_interval: raw.rebalance_check_interval,
            check_connected_user_interval: raw.check_connected_user_interval,
            erpc_timeout: raw.erpc_timeout,
            db_pool: raw.db_pool,
            replication: raw.replication,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.node_id.trim().is_empty() {
            return Err(anyhow!("node_id cannot be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(anyhow!("region cannot be empty"));
        }
        if self.db_pool.max_pool_size == 0 {
            return Err(anyhow!("db_pool.max_pool_size cannot be 0"));
        }
        if self.db_pool.min_pool_size > self.db_pool.max_pool_size {
            return Err(anyhow!(
                "db_pool.min_pool_size cannot exceed db_pool.max_pool_size"
            ));
        }
        if self.erpc_timeout.is_zero() {
            return Err(anyhow!("erpc_timeout cannot be 0"));
        }
        Ok(())
    }

    /// The logical replication slot name for a given tenant, with the
    /// configured environment suffix appended when present.
    pub fn slot_name_for(&self, tenant_external_id: &str) -> String {
        match &self.slot_name_suffix {
            Some(suffix) if !suffix.is_empty() => {
                format!("supabase_realtime_messages_replication_slot_{tenant_external_id}_{suffix}")
            }
            _ => format!("supabase_realtime_messages_replication_slot_{tenant_external_id}"),
        }
    }
}
