// Core types for the session keeper
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Bearer token identifying one account to the remote service
///
/// Never printed in full: `Display` and `Debug` both render a masked form
/// so log lines and panic messages cannot leak the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the Authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Stable short identity derived from the token (first 12 hex chars of SHA-256)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{}…({} chars)", prefix, self.0.chars().count())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

/// Outbound route used for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EgressPath {
    /// No proxy
    Direct,
    /// Proxy address in `scheme://host:port` form
    Proxy(String),
}

impl EgressPath {
    pub const DIRECT_SENTINEL: &'static str = "direct";

    /// Map a raw list entry to a path; empty or `direct` means no proxy
    pub fn from_entry(entry: &str) -> Self {
        let trimmed = entry.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(Self::DIRECT_SENTINEL) {
            EgressPath::Direct
        } else {
            EgressPath::Proxy(trimmed.to_string())
        }
    }

    pub fn proxy_url(&self) -> Option<&str> {
        match self {
            EgressPath::Direct => None,
            EgressPath::Proxy(url) => Some(url),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, EgressPath::Proxy(_))
    }

    /// Identity string used in logs and persisted files
    pub fn identity(&self) -> &str {
        match self {
            EgressPath::Direct => Self::DIRECT_SENTINEL,
            EgressPath::Proxy(url) => url,
        }
    }
}

impl fmt::Display for EgressPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}

/// A (Credential, EgressPath) combination, the unit of lifecycle scheduling
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub credential: Credential,
    pub path: EgressPath,
}

impl PairKey {
    pub fn new(credential: Credential, path: EgressPath) -> Self {
        Self { credential, path }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.credential.fingerprint(), self.path)
    }
}

/// How cached sessions are keyed on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// One session per (credential, path) pair
    #[default]
    Pair,
    /// One session per path, shared by every credential routed through it
    Path,
}

/// Persisted identity of a cached session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_pair(scope: SessionScope, key: &PairKey) -> Self {
        match scope {
            SessionScope::Pair => Self(format!("{}|{}", key.credential.fingerprint(), key.path)),
            SessionScope::Path => Self(key.path.identity().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached authentication artifacts allowing heartbeat without re-authenticating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account_id: String,
    pub browser_id: Uuid,
}

/// Connection status of one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// Last heartbeat succeeded
    Connected,
    /// Last heartbeat failed without an authorization revocation
    Disconnected,
    /// Initial and post-logout state
    #[default]
    NotConnected,
}

/// Snapshot published by a running pair for the orchestrator
#[derive(Debug, Clone, Default)]
pub struct PairStatus {
    pub state: ConnectionState,
    /// Advisory count of consecutive heartbeat failures
    pub retries: u32,
    pub last_heartbeat: Option<Instant>,
}

/// Decoded response structure `{code, data}` returned by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Envelope {
    /// Envelope code signalling revoked authorization
    pub const FORBIDDEN_CODE: i64 = 403;

    /// Decode and validate a response body
    ///
    /// A body that is not JSON, lacks an integer `code`, or carries a
    /// negative `code` is rejected.
    pub fn decode(body: &[u8]) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| format!("body is not JSON: {}", e))?;

        let code = match value.get("code") {
            Some(code) => code
                .as_i64()
                .ok_or_else(|| format!("code is not an integer: {}", code))?,
            None => return Err("code field missing".to_string()),
        };
        if code < 0 {
            return Err(format!("error code {}", code));
        }

        Ok(Self {
            code,
            data: value.get("data").cloned().unwrap_or(serde_json::Value::Null),
            msg: value
                .get("msg")
                .and_then(|m| m.as_str())
                .map(str::to_string),
        })
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == Self::FORBIDDEN_CODE
    }

    /// Account id carried by an auth response, if present and non-empty
    pub fn uid(&self) -> Option<&str> {
        self.data
            .get("uid")
            .and_then(|uid| uid.as_str())
            .filter(|uid| !uid.is_empty())
    }
}

/// Session keeper errors
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    /// Unrecoverable configuration or input problem detected before scheduling starts
    #[error("Startup failed: {0}")]
    StartupFatal(String),
    #[error("HTTP client error: {0}")]
    HttpClient(String),
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Write `content` to `path` atomically using temp file + rename
pub async fn write_atomic(path: &std::path::Path, content: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}
