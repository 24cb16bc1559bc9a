use crate::core::keeper::types::SessionScope;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// Main config structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub files: FilesConfig,
    pub proxy: ProxyConfig,
    pub schedule: ScheduleConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

/// Remote service endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub session_url: String,
    pub ping_url: String,
    /// Send an OPTIONS probe before each auth call
    pub session_preflight: bool,
    /// Send an OPTIONS probe before each heartbeat
    pub ping_preflight: bool,
    /// Value of `version` in heartbeat payloads
    pub client_version: String,
}

/// Input and state file locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Newline-delimited bearer tokens
    pub token_file: PathBuf,
    /// State directory, `~/.pulsekeeper` when unset
    pub state_dir: Option<PathBuf>,
    /// Session cache, `<state_dir>/sessions.json` when unset
    pub session_file: Option<PathBuf>,
}

/// Egress path pool source
///
/// Precedence: `direct`, then `source_url`, then `file`. With none of them
/// set every credential runs over a single direct path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub direct: bool,
    pub file: Option<PathBuf>,
    pub source_url: Option<String>,
    /// Where a remote list is persisted, `<state_dir>/proxies.txt` when unset
    pub cache_file: Option<PathBuf>,
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ping_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// Running pairs across all credentials
    pub max_active_pairs: usize,
    /// Optional cap for a single credential's window
    pub max_pairs_per_credential: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    pub accept_language: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub scope: SessionScope,
}
