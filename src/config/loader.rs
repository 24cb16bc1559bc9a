use super::types::Config;
use super::ConfigError;
use crate::core::keeper::connection::{Endpoints, HeartbeatSettings};
use crate::core::keeper::orchestrator::OrchestratorSettings;
use crate::core::keeper::proxy_pool::PoolSource;
use crate::core::keeper::transport::{Endpoint, RequestProfile, RetryPolicy};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "sessions.json";
const PROXY_CACHE_FILE: &str = "proxies.txt";

impl Config {
    /// `~/.pulsekeeper/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(home.join(".pulsekeeper").join(CONFIG_FILE))
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a default config to the default location unless one exists
    pub fn init() -> Result<PathBuf, ConfigError> {
        let path = Self::default_path()?;
        Self::init_at(&path)?;
        Ok(path)
    }

    /// Returns `false` when a config file is already present at `path`
    pub fn init_at(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = Self::default().to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn print(&self) -> Result<(), ConfigError> {
        println!("{}", self.to_toml()?);
        Ok(())
    }

    /// Validate value ranges and addresses
    pub fn check(&self) -> Result<(), ConfigError> {
        check_http_url("endpoints.session_url", &self.endpoints.session_url)?;
        check_http_url("endpoints.ping_url", &self.endpoints.ping_url)?;

        if self.endpoints.client_version.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "endpoints.client_version must not be empty".to_string(),
            ));
        }
        if self.schedule.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.ping_interval_secs must be positive".to_string(),
            ));
        }
        if self.schedule.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.schedule.max_active_pairs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.max_active_pairs must be at least 1".to_string(),
            ));
        }
        if self.schedule.max_pairs_per_credential == Some(0) {
            return Err(ConfigError::Invalid(
                "schedule.max_pairs_per_credential must be at least 1 when set".to_string(),
            ));
        }
        if self.transport.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "transport.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.transport.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "transport.timeout_secs must be positive".to_string(),
            ));
        }
        if self.proxy.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "proxy.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.proxy.source_url {
            check_http_url("proxy.source_url", url)?;
        }
        Ok(())
    }

    /// Directory holding the session cache, proxy cache and debug log
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.files.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .ok_or(ConfigError::HomeDirNotFound)?
                .join(".pulsekeeper")),
        }
    }

    pub fn session_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.files.session_file {
            Some(path) => Ok(path.clone()),
            None => Ok(self.state_dir()?.join(SESSION_FILE)),
        }
    }

    pub fn pool_source(&self) -> Result<PoolSource, ConfigError> {
        if self.proxy.direct {
            return Ok(PoolSource::Direct);
        }
        if let Some(url) = &self.proxy.source_url {
            let cache_file = match &self.proxy.cache_file {
                Some(path) => path.clone(),
                None => self.state_dir()?.join(PROXY_CACHE_FILE),
            };
            return Ok(PoolSource::Remote {
                url: url.clone(),
                cache_file,
            });
        }
        Ok(match &self.proxy.file {
            Some(path) => PoolSource::File(path.clone()),
            None => PoolSource::Direct,
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            session: Endpoint::new(&self.endpoints.session_url)
                .with_preflight(self.endpoints.session_preflight),
            ping: Endpoint::new(&self.endpoints.ping_url)
                .with_preflight(self.endpoints.ping_preflight),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transport.max_attempts,
            backoff_base: Duration::from_secs(self.transport.backoff_base_secs),
            timeout: Duration::from_secs(self.transport.timeout_secs),
        }
    }

    pub fn request_profile(&self) -> RequestProfile {
        let defaults = RequestProfile::default();
        RequestProfile {
            user_agent: self
                .transport
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            accept_language: self.transport.accept_language.clone(),
            referer: self.transport.referer.clone(),
            origin: self.transport.origin.clone(),
        }
    }

    pub fn heartbeat_settings(&self) -> HeartbeatSettings {
        HeartbeatSettings {
            ping_interval: Duration::from_secs(self.schedule.ping_interval_secs),
            client_version: self.endpoints.client_version.clone(),
            session_scope: self.session.scope,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_active_pairs: self.schedule.max_active_pairs,
            max_pairs_per_credential: self.schedule.max_pairs_per_credential,
            sweep_interval: Duration::from_secs(self.schedule.sweep_interval_secs),
            refresh_interval: Duration::from_secs(self.proxy.refresh_interval_secs),
        }
    }
}

fn check_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{} is not a valid URL: {}", field, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{} must use http or https, got {}",
            field, other
        ))),
    }
}

