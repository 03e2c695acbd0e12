//! TpcKv Configuration
//!
//! This module provides configuration structures for the coordinator and
//! replica processes. One file may carry both sections; each process only
//! reads the sections it needs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::commitlog::CommitLogOptions;
use crate::registry::ReplicaId;

/// Main TpcKv configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TpcKvConfig {
    /// Coordinator process configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Replica process configuration
    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Cache geometry, shared by coordinator and replicas
    #[serde(default)]
    pub cache: CacheConfig,

    /// Timeouts and phase-2 retry policy
    #[serde(default)]
    pub network: NetworkConfig,

    /// Commit log durability
    #[serde(default)]
    pub commitlog: CommitLogConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Client-facing listen address
    #[serde(default = "default_client_address")]
    pub client_address: String,

    /// Registration listen address
    #[serde(default = "default_registration_address")]
    pub registration_address: String,

    /// Registry capacity
    #[serde(default = "default_num_replicas")]
    pub num_replicas: usize,

    /// Worker pool size per listener
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded hand-off queue per listener
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Operator-chosen name; the replica id is its 64-bit hash
    #[serde(default = "default_replica_name")]
    pub name: String,

    /// Explicit numeric id, overriding the name hash
    #[serde(default)]
    pub id: Option<String>,

    /// Listen address; port 0 lets the OS choose
    #[serde(default = "default_replica_bind_address")]
    pub bind_address: String,

    /// Host announced to the coordinator
    #[serde(default = "default_localhost")]
    pub advertise_host: String,

    /// Coordinator host for registration
    #[serde(default = "default_localhost")]
    pub coordinator_host: String,

    /// Coordinator registration port
    #[serde(default = "default_registration_port")]
    pub registration_port: u16,

    /// Directory holding the commit log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded hand-off queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Cache geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_num_sets")]
    pub num_sets: usize,

    #[serde(default = "default_max_elems_per_set")]
    pub max_elems_per_set: usize,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect and read bound in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// First phase-2 retry delay
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    /// Largest phase-2 retry delay
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Phase-2 attempt cap (0 = retry until acknowledged)
    #[serde(default)]
    pub retry_max_attempts: u32,
}

/// Commit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitLogConfig {
    /// Sync after every append
    #[serde(default = "default_true")]
    pub fsync: bool,

    /// Enable LZ4 compression for log records
    #[serde(default)]
    pub compression: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_client_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_registration_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_num_replicas() -> usize {
    2
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_replica_name() -> String {
    "replica-1".to_string()
}

fn default_replica_bind_address() -> String {
    "0.0.0.0:0".to_string()
}

fn default_localhost() -> String {
    "127.0.0.1".to_string()
}

fn default_registration_port() -> u16 {
    9090
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/tpckv")
}

fn default_num_sets() -> usize {
    100
}

fn default_max_elems_per_set() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_address: default_client_address(),
            registration_address: default_registration_address(),
            num_replicas: default_num_replicas(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            name: default_replica_name(),
            id: None,
            bind_address: default_replica_bind_address(),
            advertise_host: default_localhost(),
            coordinator_host: default_localhost(),
            registration_port: default_registration_port(),
            data_dir: default_data_dir(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_sets: default_num_sets(),
            max_elems_per_set: default_max_elems_per_set(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            retry_max_attempts: 0,
        }
    }
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            fsync: true,
            compression: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TpcKvConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: TpcKvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.coordinator.num_replicas == 0 {
            return Err(crate::Error::Config("coordinator.num_replicas must be at least 1".into()));
        }

        if self.coordinator.client_address.is_empty() || self.coordinator.registration_address.is_empty() {
            return Err(crate::Error::Config("coordinator addresses cannot be empty".into()));
        }

        if self.replica.name.is_empty() && self.replica.id.is_none() {
            return Err(crate::Error::Config("replica.name cannot be empty".into()));
        }

        if self.replica.bind_address.is_empty() || self.replica.advertise_host.is_empty() {
            return Err(crate::Error::Config("replica addresses cannot be empty".into()));
        }

        if let Some(id) = &self.replica.id {
            id.parse::<ReplicaId>()
                .map_err(|_| crate::Error::Config(format!("replica.id is not a 64-bit integer: {}", id)))?;
        }

        if self.cache.num_sets == 0 || self.cache.max_elems_per_set == 0 {
            return Err(crate::Error::Config("cache sets and slots must be at least 1".into()));
        }

        if self.network.timeout_ms == 0 {
            return Err(crate::Error::Config("network.timeout_ms must be positive".into()));
        }

        if self.network.retry_initial_backoff_ms > self.network.retry_max_backoff_ms {
            return Err(crate::Error::Config(
                "network.retry_initial_backoff_ms exceeds retry_max_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    /// Replica id: the explicit `id` if set, else the hash of `name`
    pub fn replica_id(&self) -> crate::Result<ReplicaId> {
        match &self.replica.id {
            Some(id) => id.parse(),
            None => Ok(ReplicaId::from_name(&self.replica.name)),
        }
    }

    /// Commit log path for this replica
    pub fn commit_log_path(&self) -> crate::Result<PathBuf> {
        Ok(self.replica.data_dir.join(format!("{}.tpclog", self.replica_id()?)))
    }

    /// Commit log durability options
    pub fn commit_log_options(&self) -> CommitLogOptions {
        CommitLogOptions {
            fsync: self.commitlog.fsync,
            compression: self.commitlog.compression,
        }
    }

    /// Registration endpoint on the coordinator
    pub fn registration_target(&self) -> String {
        format!("{}:{}", self.replica.coordinator_host, self.replica.registration_port)
    }

    /// Get the network timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms)
    }

    /// Get the first retry delay as Duration
    pub fn retry_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.network.retry_initial_backoff_ms)
    }

    /// Get the largest retry delay as Duration
    pub fn retry_max_backoff(&self) -> Duration {
        Duration::from_millis(self.network.retry_max_backoff_ms)
    }
}

/// Sample configuration written by `tpckv init`
pub const SAMPLE_CONFIG: &str = r#"[coordinator]
client_address = "0.0.0.0:8080"
registration_address = "0.0.0.0:9090"
num_replicas = 2

[replica]
name = "replica-1"
bind_address = "0.0.0.0:0"
advertise_host = "127.0.0.1"
coordinator_host = "127.0.0.1"
registration_port = 9090
data_dir = "/var/lib/tpckv"

[cache]
num_sets = 100
max_elems_per_set = 10

[network]
timeout_ms = 5000
retry_initial_backoff_ms = 100
retry_max_backoff_ms = 5000
retry_max_attempts = 0

[commitlog]
fsync = true
compression = false

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[coordinator]
client_address = "127.0.0.1:18080"
num_replicas = 3

[replica]
name = "slave-a"
data_dir = "/tmp/tpckv"

[network]
timeout_ms = 250
"#;

        let config = TpcKvConfig::from_str(toml).unwrap();
        assert_eq!(config.coordinator.client_address, "127.0.0.1:18080");
        assert_eq!(config.coordinator.registration_address, "0.0.0.0:9090");
        assert_eq!(config.coordinator.num_replicas, 3);
        assert_eq!(config.cache.num_sets, 100);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.replica_id().unwrap(), ReplicaId::from_name("slave-a"));
        assert_eq!(
            config.commit_log_path().unwrap(),
            PathBuf::from(format!("/tmp/tpckv/{}.tpclog", ReplicaId::from_name("slave-a")))
        );
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = TpcKvConfig::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.registration_target(), "127.0.0.1:9090");
        assert!(config.commit_log_options().fsync);
    }

    #[test]
    fn test_explicit_signed_id() {
        let config = TpcKvConfig::from_str("[replica]\nid = \"-1\"\n").unwrap();
        assert_eq!(config.replica_id().unwrap(), ReplicaId(u64::MAX));
    }

    #[test]
    fn test_validation_failures() {
        assert!(TpcKvConfig::from_str("[coordinator]\nnum_replicas = 0\n").is_err());
        assert!(TpcKvConfig::from_str("[cache]\nnum_sets = 0\n").is_err());
        assert!(TpcKvConfig::from_str("[network]\ntimeout_ms = 0\n").is_err());
        assert!(TpcKvConfig::from_str("[replica]\nid = \"abc\"\n").is_err());
    }
}
