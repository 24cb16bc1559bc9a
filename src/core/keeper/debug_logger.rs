use std::collections::HashMap;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use flate2::{write::GzEncoder, Compression};
use fs2::FileExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::keeper::types::{ConnectionState, PairKey};

// Hardcoded rotation policy
const LOG_ROTATION_SIZE_MB: u64 = 8;
const MAX_ARCHIVES: u32 = 5;
const ROTATION_CHECK_INTERVAL: u32 = 200;

const ENV_DEBUG: &str = "PULSEKEEPER_DEBUG";
const ENV_LOG_LEVEL: &str = "PULSEKEEPER_LOG_LEVEL";

/// Severity of a log entry, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parse a level name; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LogEntry {
    timestamp: String,                          // ISO-8601 with timezone
    level: String,                              // DEBUG, INFO, WARN, ERROR
    component: String,                          // Component name
    event: String,                              // Event type
    message: String,                            // Human readable message (redacted)
    correlation_id: Option<String>,             // Run id unless overridden
    fields: HashMap<String, serde_json::Value>, // Structured data
}

struct RotatingLogger {
    log_path: PathBuf,
    write_count: AtomicU32,
}

impl RotatingLogger {
    fn new(log_path: PathBuf) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        Self {
            log_path,
            write_count: AtomicU32::new(0),
        }
    }

    fn write_with_rotation(&self, json_line: &str) -> Result<(), std::io::Error> {
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed(); // Rotation errors never stop logging
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        writeln!(file, "{}", json_line)?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), std::io::Error> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        // Another process may share the log directory
        let lock_path = self.log_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                if self.needs_rotation()? {
                    self.perform_rotation()?;
                }
                let _ = std::fs::remove_file(&lock_path);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    fn needs_rotation(&self) -> Result<bool, std::io::Error> {
        if !self.log_path.exists() {
            return Ok(false);
        }

        let metadata = std::fs::metadata(&self.log_path)?;
        Ok(metadata.len() >= LOG_ROTATION_SIZE_MB * 1024 * 1024)
    }

    fn base_name(&self) -> String {
        self.log_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "pulsekeeper".to_string())
    }

    fn log_dir(&self) -> &Path {
        self.log_path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn perform_rotation(&self) -> Result<(), std::io::Error> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let archive_path = self
            .log_dir()
            .join(format!("{}.{}.gz", self.base_name(), timestamp));

        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source_file = File::open(&temp_path)?;
        let target_file = File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target_file, Compression::default());
        std::io::copy(&mut BufReader::new(source_file), &mut encoder)?;
        encoder.finish()?;

        std::fs::remove_file(&temp_path)?;

        let _ = self.cleanup_old_archives();

        Ok(())
    }

    fn cleanup_old_archives(&self) -> Result<(), std::io::Error> {
        let prefix = format!("{}.", self.base_name());

        let mut archives = Vec::new();
        for entry in std::fs::read_dir(self.log_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with(&prefix) && name.ends_with(".gz") {
                archives.push((entry.path(), entry.metadata()?.modified()?));
            }
        }

        // Keep only the most recent MAX_ARCHIVES
        archives.sort_by_key(|(_, modified)| *modified);
        if archives.len() > MAX_ARCHIVES as usize {
            let to_remove = archives.len() - MAX_ARCHIVES as usize;
            for (path, _) in archives.iter().take(to_remove) {
                let _ = std::fs::remove_file(path);
            }
        }

        Ok(())
    }
}

/// Console + structured file logger for the session keeper
///
/// Console lines (`timestamp | LEVEL | component | message`) go to stdout when
/// at or above the console threshold (`PULSEKEEPER_LOG_LEVEL`, default info).
/// With `PULSEKEEPER_DEBUG=true` every entry is also appended as a JSON line to
/// a size-rotated file. Messages pass through redaction before either sink.
pub struct KeeperLogger {
    console_level: Option<LogLevel>,
    rotating_logger: Option<Mutex<RotatingLogger>>,
    run_id: String,
    redaction_patterns: Vec<Regex>,
}

impl KeeperLogger {
    pub fn new() -> Self {
        let file_path = if parse_debug_enabled() {
            Some(Self::default_log_path())
        } else {
            None
        };
        let console_level = Some(Self::console_level_from_env());
        Self::build(console_level, file_path)
    }

    /// Logger writing JSON lines to `log_path` and nothing to the console (for testing)
    pub fn with_file(log_path: PathBuf) -> Self {
        Self::build(None, Some(log_path))
    }

    /// Logger that drops everything
    pub fn disabled() -> Self {
        Self::build(None, None)
    }

    fn build(console_level: Option<LogLevel>, file_path: Option<PathBuf>) -> Self {
        Self {
            console_level,
            rotating_logger: file_path.map(|path| Mutex::new(RotatingLogger::new(path))),
            run_id: Uuid::new_v4().to_string()[..8].to_string(),
            redaction_patterns: Self::compile_redaction_patterns(),
        }
    }

    fn console_level_from_env() -> LogLevel {
        let from_env = env::var(ENV_LOG_LEVEL)
            .ok()
            .and_then(|value| LogLevel::parse(&value));
        match from_env {
            Some(level) => level,
            None if parse_debug_enabled() => LogLevel::Debug,
            None => LogLevel::Info,
        }
    }

    fn default_log_path() -> PathBuf {
        let mut log_path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        log_path.push(".pulsekeeper");
        log_path.push("pulsekeeper-debug.log");
        log_path
    }

    fn compile_redaction_patterns() -> Vec<Regex> {
        let patterns = [
            r"(?i)authorization[:\s]+(bearer\s+)?[^\s\n]+",
            r"(?i)bearer[:\s]+[^\s\n]+",
            r"(?i)token[:=\s]+[^\s\n]+",
            r"(?i)password[:=\s]+[^\s\n]+",
            r"(?i)secret[:=\s]+[^\s\n]+",
        ];

        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    }

    /// Redaction guardrails for sensitive data
    pub fn redact_sensitive_data(&self, text: &str) -> String {
        let mut redacted = text.to_string();

        for regex in &self.redaction_patterns {
            redacted = regex.replace_all(&redacted, "[REDACTED]").to_string();
        }

        // Long opaque strings are most likely tokens
        if redacted.len() > 100
            && !redacted.contains(' ')
            && redacted
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c))
        {
            redacted = format!("[REDACTED_LONG_STRING_{}chars]", redacted.len());
        }

        redacted
    }

    pub fn log(
        &self,
        level: LogLevel,
        component: &str,
        event: &str,
        message: &str,
        fields: HashMap<String, serde_json::Value>,
    ) {
        let console = self.console_level.is_some_and(|min| level >= min);
        if !console && self.rotating_logger.is_none() {
            return;
        }

        let message = self.redact_sensitive_data(message);

        if console {
            println!(
                "{} | {:<5} | {} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level.as_str(),
                component,
                message
            );
        }

        if let Some(logger) = &self.rotating_logger {
            let entry = LogEntry {
                timestamp: Local::now().to_rfc3339(),
                level: level.as_str().to_string(),
                component: component.to_string(),
                event: event.to_string(),
                message,
                correlation_id: Some(self.run_id.clone()),
                fields,
            };
            if let Ok(logger) = logger.lock() {
                if let Ok(json_line) = serde_json::to_string(&entry) {
                    let _ = logger.write_with_rotation(&json_line); // Don't crash on logging errors
                }
            }
        }
    }

    pub fn debug(&self, component: &str, message: &str) {
        self.log(LogLevel::Debug, component, "debug", message, HashMap::new());
    }

    pub fn info(&self, component: &str, message: &str) {
        self.log(LogLevel::Info, component, "info", message, HashMap::new());
    }

    pub fn warn(&self, component: &str, message: &str) {
        self.log(LogLevel::Warn, component, "warn", message, HashMap::new());
    }

    pub fn error(&self, component: &str, message: &str) {
        self.log(LogLevel::Error, component, "error", message, HashMap::new());
    }

    // Typed lifecycle events

    pub fn pair_admitted(&self, key: &PairKey) {
        self.log(
            LogLevel::Info,
            "Orchestrator",
            "pair_admitted",
            &format!("Starting lifecycle for {}", key),
            pair_fields(key),
        );
    }

    pub fn auth_result(&self, key: &PairKey, cached: bool, outcome: &str) {
        let mut fields = pair_fields(key);
        fields.insert("cached".to_string(), serde_json::Value::Bool(cached));
        fields.insert("outcome".to_string(), outcome.into());

        let level = if outcome == "ok" { LogLevel::Info } else { LogLevel::Warn };
        self.log(
            level,
            "Connection",
            "auth_result",
            &format!(
                "Authentication for {} {}{}",
                key,
                outcome,
                if cached { " (cached session)" } else { "" }
            ),
            fields,
        );
    }

    pub fn heartbeat_result(&self, key: &PairKey, state: ConnectionState, retries: u32, detail: &str) {
        let mut fields = pair_fields(key);
        fields.insert("state".to_string(), format!("{:?}", state).into());
        fields.insert("retries".to_string(), retries.into());

        let level = match state {
            ConnectionState::Connected => LogLevel::Info,
            _ => LogLevel::Warn,
        };
        self.log(
            level,
            "Connection",
            "heartbeat",
            &format!("Heartbeat via {}: {:?} (retries={}) {}", key.path, state, retries, detail),
            fields,
        );
    }

    pub fn forced_logout(&self, key: &PairKey, reason: &str) {
        let mut fields = pair_fields(key);
        fields.insert("reason".to_string(), reason.into());
        self.log(
            LogLevel::Warn,
            "Connection",
            "forced_logout",
            &format!("Logged out and cleared session for {}: {}", key, reason),
            fields,
        );
    }

    pub fn transport_attempt_failed(&self, url: &str, path: &str, attempt: u32, max_attempts: u32, error: &str) {
        let mut fields = HashMap::new();
        fields.insert("url".to_string(), url.into());
        fields.insert("path".to_string(), path.into());
        fields.insert("attempt".to_string(), attempt.into());

        self.log(
            LogLevel::Warn,
            "Transport",
            "attempt_failed",
            &format!(
                "Attempt {}/{} to {} via {} failed: {}",
                attempt, max_attempts, url, path, error
            ),
            fields,
        );
    }

    pub fn pair_evicted(&self, key: &PairKey, reason: &str, replacement: Option<&str>) {
        let mut fields = pair_fields(key);
        fields.insert("reason".to_string(), reason.into());
        fields.insert(
            "replacement".to_string(),
            replacement.map(|r| r.into()).unwrap_or(serde_json::Value::Null),
        );

        self.log(
            LogLevel::Warn,
            "Orchestrator",
            "pair_evicted",
            &format!(
                "Evicted {} ({}); replacement: {}",
                key,
                reason,
                replacement.unwrap_or("none, window shrinks")
            ),
            fields,
        );
    }

    pub fn pool_refreshed(&self, source: &str, count: usize) {
        let mut fields = HashMap::new();
        fields.insert("source".to_string(), source.into());
        fields.insert("count".to_string(), count.into());
        self.log(
            LogLevel::Info,
            "ProxyPool",
            "refresh_ok",
            &format!("Proxy pool refreshed from {}: {} paths", source, count),
            fields,
        );
    }

    pub fn pool_refresh_failed(&self, source: &str, error: &str) {
        let mut fields = HashMap::new();
        fields.insert("source".to_string(), source.into());
        self.log(
            LogLevel::Warn,
            "ProxyPool",
            "refresh_failed",
            &format!("Proxy pool refresh from {} failed, keeping current pool: {}", source, error),
            fields,
        );
    }

    pub fn sweep_summary(&self, sweep: u64, active: usize, connected: usize, disconnected: usize, pool_size: usize) {
        let not_connected = active.saturating_sub(connected + disconnected);
        let mut fields = HashMap::new();
        fields.insert("sweep".to_string(), sweep.into());
        fields.insert("active".to_string(), active.into());
        fields.insert("connected".to_string(), connected.into());
        fields.insert("disconnected".to_string(), disconnected.into());
        fields.insert("not_connected".to_string(), not_connected.into());
        fields.insert("pool_size".to_string(), pool_size.into());

        self.log(
            LogLevel::Debug,
            "Orchestrator",
            "sweep",
            &format!(
                "Sweep {}: {} active pairs ({} connected, {} disconnected, {} not connected), pool {}",
                sweep, active, connected, disconnected, not_connected, pool_size
            ),
            fields,
        );
    }

    pub fn is_file_enabled(&self) -> bool {
        self.rotating_logger.is_some()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Default for KeeperLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn pair_fields(key: &PairKey) -> HashMap<String, serde_json::Value> {
    let mut fields = HashMap::new();
    fields.insert("credential".to_string(), key.credential.fingerprint().into());
    fields.insert("path".to_string(), key.path.identity().into());
    fields
}

/// Parse file logging switch from PULSEKEEPER_DEBUG
/// Supports: true/false, 1/0, yes/no, on/off (case insensitive)
pub fn parse_debug_enabled() -> bool {
    env::var(ENV_DEBUG)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

static LOGGER: OnceLock<KeeperLogger> = OnceLock::new();

/// Process-wide logger, configured from the environment on first use
pub fn get_logger() -> &'static KeeperLogger {
    LOGGER.get_or_init(KeeperLogger::new)
}
