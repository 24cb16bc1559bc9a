use super::types::{
    Config, EndpointsConfig, FilesConfig, ProxyConfig, ScheduleConfig, SessionConfig,
    TransportConfig,
};
use std::path::PathBuf;

pub const DEFAULT_SESSION_URL: &str = "https://api.nodepay.org/api/auth/session";
pub const DEFAULT_PING_URL: &str = "https://nw.nodepay.org/api/network/ping";
pub const DEFAULT_CLIENT_VERSION: &str = "2.2.7";
pub const DEFAULT_TOKEN_FILE: &str = "np_tokens.txt";
pub const DEFAULT_REFERER: &str = "https://app.nodepay.ai";

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig::default(),
            files: FilesConfig::default(),
            proxy: ProxyConfig::default(),
            schedule: ScheduleConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            session_url: DEFAULT_SESSION_URL.to_string(),
            ping_url: DEFAULT_PING_URL.to_string(),
            session_preflight: false,
            ping_preflight: false,
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            state_dir: None,
            session_file: None,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            direct: false,
            file: None,
            source_url: None,
            cache_file: None,
            refresh_interval_secs: 3600, // hourly
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 180,
            sweep_interval_secs: 10,
            max_active_pairs: 100,
            max_pairs_per_credential: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1,
            timeout_secs: 10,
            user_agent: None,
            accept_language: "en-US,en;q=0.5".to_string(),
            referer: Some(DEFAULT_REFERER.to_string()),
            origin: None,
        }
    }
}
