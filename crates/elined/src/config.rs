//! Configuration file support for elined
//!
//! Loads and validates elined configuration from TOML files.
//! Default location: /etc/eline/elined.toml

use crate::error::{EvcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/eline/elined.toml";

/// Collaborator service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Path computation endpoint (POST)
    #[serde(default = "default_pathfinder_url")]
    pub pathfinder_url: String,

    /// Flow service base URL
    #[serde(default = "default_flow_manager_url")]
    pub flow_manager_url: String,

    /// Control-plane trace base URL
    #[serde(default = "default_sdntrace_cp_url")]
    pub sdntrace_cp_url: String,

    /// Topology service base URL
    #[serde(default = "default_topology_url")]
    pub topology_url: String,

    /// Timeout applied to every HTTP request in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Flow synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// High byte stamped on every circuit cookie
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: u8,

    /// Owner name attached to every flow
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Priority of EPL (untagged UNI) flows
    #[serde(default = "default_epl_priority")]
    pub epl_priority: u16,

    /// Priority of flows matching a specific VLAN or mask
    #[serde(default = "default_evpl_priority")]
    pub evpl_priority: u16,

    /// Priority of flows matching any tagged frame
    #[serde(default = "default_any_priority")]
    pub any_priority: u16,

    /// Priority of flows matching untagged frames only
    #[serde(default = "default_untagged_priority")]
    pub untagged_priority: u16,

    /// Table assignment per table group (`epl`, `evpl`)
    #[serde(default = "default_table_groups")]
    pub table_groups: BTreeMap<String, u8>,

    /// Maximum flows per switch per bulk install round (0 = unlimited)
    #[serde(default)]
    pub batch_size: usize,

    /// Pause between bulk install rounds in milliseconds
    #[serde(default = "default_batch_interval")]
    pub batch_interval_ms: u64,
}

/// Dynamic path computation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Candidates requested for best-path computation
    #[serde(default = "default_dynamic_max_paths")]
    pub dynamic_max_paths: usize,

    /// Candidates requested for disjoint-path computation
    #[serde(default = "default_disjoint_path_cutoff")]
    pub disjoint_path_cutoff: usize,
}

/// Consistency loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Run the periodic consistency sweep
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sweep period in seconds
    #[serde(default = "default_deploy_evcs_interval")]
    pub interval_secs: u64,

    /// Failed trace rounds tolerated before a forced redeploy
    #[serde(default = "default_wait_for_old_path")]
    pub wait_for_old_path: u32,

    /// Window after a flow removal during which a circuit is skipped
    #[serde(default = "default_time_recent")]
    pub time_recent_deleted_flows_secs: u64,

    /// Window after an update during which a circuit is skipped
    #[serde(default = "default_time_recent")]
    pub time_recent_updated_secs: u64,

    /// Deadline of a bulk trace request in seconds
    #[serde(default = "default_trace_timeout")]
    pub trace_timeout_secs: u64,
}

/// Event handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Debounce delay for interface up/down events in milliseconds
    #[serde(default = "default_uni_state_change_delay")]
    pub uni_state_change_delay_ms: u64,

    /// Redis pub/sub channel carrying topology events (empty disables)
    #[serde(default = "default_topology_channel")]
    pub topology_channel: String,

    /// Capacity of the circuit notification channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

/// Circuit store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis hash of JSON documents
    #[default]
    Redis,
    /// Process-local map
    Memory,
}

/// Circuit document store, the `[database]` section.
///
/// Missing keys take the values of [`StoreConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Where circuit documents live
    pub backend: StoreBackend,
    /// Redis server host
    pub host: String,
    /// Redis server port
    pub port: u16,
    /// Redis logical database
    pub db: u32,
    /// Prefix of the hash keys holding circuit documents
    pub key_prefix: String,
    /// Attempts per store command before giving up
    pub max_attempts: u32,
    /// First retry delay in milliseconds, doubled per attempt
    pub retry_backoff_ms: u64,
}

/// Complete elined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElineConfig {
    /// Collaborator endpoints
    #[serde(default)]
    pub services: ServicesConfig,

    /// Flow synthesis
    #[serde(default)]
    pub flows: FlowsConfig,

    /// Dynamic paths
    #[serde(default)]
    pub paths: PathsConfig,

    /// Consistency loop
    #[serde(default)]
    pub consistency: ConsistencyConfig,

    /// Event handling
    #[serde(default)]
    pub events: EventsConfig,

    /// Circuit store
    #[serde(default)]
    pub database: StoreConfig,
}

// Default functions
fn default_pathfinder_url() -> String {
    "http://127.0.0.1:8181/api/kytos/pathfinder/v3/".to_string()
}

fn default_flow_manager_url() -> String {
    "http://127.0.0.1:8181/api/kytos/flow_manager/v2".to_string()
}

fn default_sdntrace_cp_url() -> String {
    "http://127.0.0.1:8181/api/amlight/sdntrace_cp/v1".to_string()
}

fn default_topology_url() -> String {
    "http://127.0.0.1:8181/api/kytos/topology/v3".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_cookie_prefix() -> u8 {
    0xAA
}

fn default_owner() -> String {
    "mef_eline".to_string()
}

fn default_epl_priority() -> u16 {
    10000
}

fn default_evpl_priority() -> u16 {
    20000
}

fn default_any_priority() -> u16 {
    15000
}

fn default_untagged_priority() -> u16 {
    20000
}

fn default_table_groups() -> BTreeMap<String, u8> {
    BTreeMap::from([("epl".to_string(), 0), ("evpl".to_string(), 0)])
}

fn default_batch_interval() -> u64 {
    500
}

fn default_dynamic_max_paths() -> usize {
    2
}

fn default_disjoint_path_cutoff() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_deploy_evcs_interval() -> u64 {
    60
}

fn default_wait_for_old_path() -> u32 {
    5
}

fn default_time_recent() -> u64 {
    60
}

fn default_trace_timeout() -> u64 {
    30
}

fn default_uni_state_change_delay() -> u64 {
    2000
}

fn default_topology_channel() -> String {
    "eline:topology".to_string()
}

fn default_notification_capacity() -> usize {
    1024
}

// Default implementations
impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            pathfinder_url: default_pathfinder_url(),
            flow_manager_url: default_flow_manager_url(),
            sdntrace_cp_url: default_sdntrace_cp_url(),
            topology_url: default_topology_url(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            cookie_prefix: default_cookie_prefix(),
            owner: default_owner(),
            epl_priority: default_epl_priority(),
            evpl_priority: default_evpl_priority(),
            any_priority: default_any_priority(),
            untagged_priority: default_untagged_priority(),
            table_groups: default_table_groups(),
            batch_size: 0,
            batch_interval_ms: default_batch_interval(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dynamic_max_paths: default_dynamic_max_paths(),
            disjoint_path_cutoff: default_disjoint_path_cutoff(),
        }
    }
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_deploy_evcs_interval(),
            wait_for_old_path: default_wait_for_old_path(),
            time_recent_deleted_flows_secs: default_time_recent(),
            time_recent_updated_secs: default_time_recent(),
            trace_timeout_secs: default_trace_timeout(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            uni_state_change_delay_ms: default_uni_state_change_delay(),
            topology_channel: default_topology_channel(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            key_prefix: "eline".to_string(),
            max_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl StoreConfig {
    /// Connection URL of the Redis server.
    pub fn connection_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl ElineConfig {
    /// Reads the configuration at `path`.
    ///
    /// A missing file is not an error: the daemon runs with defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No elined config, running with defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&content)
            .map_err(|e| EvcError::Config(format!("{}: {}", path.display(), e)))
    }

    /// HTTP request timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.services.http_timeout_secs)
    }

    /// Consistency sweep period
    pub fn deploy_evcs_interval(&self) -> Duration {
        Duration::from_secs(self.consistency.interval_secs)
    }

    /// Bulk trace deadline
    pub fn trace_timeout(&self) -> Duration {
        Duration::from_secs(self.consistency.trace_timeout_secs)
    }

    /// Interface event debounce delay
    pub fn uni_state_change_delay(&self) -> Duration {
        Duration::from_millis(self.events.uni_state_change_delay_ms)
    }

    /// Pause between bulk install rounds
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.flows.batch_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.backend == StoreBackend::Redis && self.database.port == 0 {
            return Err(EvcError::Config("database.port must be > 0".to_string()));
        }

        if self.database.max_attempts == 0 {
            return Err(EvcError::Config("max_attempts must be > 0".to_string()));
        }

        if self.consistency.interval_secs == 0 {
            return Err(EvcError::Config("interval_secs must be > 0".to_string()));
        }

        if self.paths.dynamic_max_paths == 0 || self.paths.disjoint_path_cutoff == 0 {
            return Err(EvcError::Config(
                "dynamic_max_paths and disjoint_path_cutoff must be > 0".to_string(),
            ));
        }

        for group in self.flows.table_groups.keys() {
            if group != "epl" && group != "evpl" {
                return Err(EvcError::Config(format!(
                    "unknown table group '{}' (expected epl or evpl)",
                    group
                )));
            }
        }

        for (name, url) in [
            ("pathfinder_url", &self.services.pathfinder_url),
            ("flow_manager_url", &self.services.flow_manager_url),
            ("sdntrace_cp_url", &self.services.sdntrace_cp_url),
            ("topology_url", &self.services.topology_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(EvcError::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        Ok(())
    }
}
