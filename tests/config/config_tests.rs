use crate::common::create_temp_dir;
use pulsekeeper::config::{Config, ConfigError};
use pulsekeeper::core::keeper::proxy_pool::PoolSource;
use pulsekeeper::core::keeper::types::SessionScope;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_defaults_match_documented_values() {
    let config = Config::default();

    assert_eq!(config.schedule.ping_interval_secs, 180);
    assert_eq!(config.schedule.max_active_pairs, 100);
    assert_eq!(config.schedule.max_pairs_per_credential, None);
    assert_eq!(config.transport.max_attempts, 3);
    assert_eq!(config.transport.backoff_base_secs, 1);
    assert_eq!(config.proxy.refresh_interval_secs, 3600);
    assert_eq!(config.endpoints.client_version, "2.2.7");
    assert_eq!(config.files.token_file, PathBuf::from("np_tokens.txt"));
    assert_eq!(config.session.scope, SessionScope::Pair);
    assert!(config.check().is_ok());
}

#[test]
fn test_missing_file_loads_defaults() {
    let dir = create_temp_dir();
    let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = create_temp_dir();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[schedule]
max_active_pairs = 5
max_pairs_per_credential = 2

[proxy]
source_url = "https://lists.example/proxies.txt"

[session]
scope = "path"
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();

    assert_eq!(config.schedule.max_active_pairs, 5);
    assert_eq!(config.schedule.max_pairs_per_credential, Some(2));
    assert_eq!(config.orchestrator_settings().max_active_pairs, 5);
    assert_eq!(config.orchestrator_settings().max_pairs_per_credential, Some(2));
    assert_eq!(config.schedule.ping_interval_secs, 180);
    assert_eq!(config.session.scope, SessionScope::Path);
    assert_eq!(
        config.proxy.source_url.as_deref(),
        Some("https://lists.example/proxies.txt")
    );
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let dir = create_temp_dir();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[schedule\nmax_active_pairs = ").unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_init_writes_loadable_defaults_once() {
    let dir = create_temp_dir();
    let path = dir.path().join("nested").join("config.toml");

    assert!(Config::init_at(&path).unwrap());
    assert!(!Config::init_at(&path).unwrap());
    assert_eq!(Config::load_from(&path).unwrap(), Config::default());
}

#[test]
fn test_check_rejects_bad_values() {
    let mut config = Config::default();
    config.schedule.max_active_pairs = 0;
    assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.schedule.max_pairs_per_credential = Some(0);
    assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.transport.max_attempts = 0;
    assert!(config.check().is_err());

    let mut config = Config::default();
    config.endpoints.ping_url = "ftp://nw.example/ping".to_string();
    assert!(config.check().is_err());

    let mut config = Config::default();
    config.proxy.source_url = Some("not a url".to_string());
    assert!(config.check().is_err());
}

#[test]
fn test_pool_source_precedence() {
    let mut config = Config::default();
    config.files.state_dir = Some(PathBuf::from("/state"));
    assert_eq!(config.pool_source().unwrap(), PoolSource::Direct);

    config.proxy.file = Some(PathBuf::from("proxy.txt"));
    assert_eq!(
        config.pool_source().unwrap(),
        PoolSource::File(PathBuf::from("proxy.txt"))
    );

    config.proxy.source_url = Some("https://lists.example/p.txt".to_string());
    assert_eq!(
        config.pool_source().unwrap(),
        PoolSource::Remote {
            url: "https://lists.example/p.txt".to_string(),
            cache_file: PathBuf::from("/state/proxies.txt"),
        }
    );

    config.proxy.direct = true;
    assert_eq!(config.pool_source().unwrap(), PoolSource::Direct);
}

#[test]
fn test_runtime_settings_follow_config() {
    let mut config = Config::default();
    config.files.state_dir = Some(PathBuf::from("/state"));
    config.transport.backoff_base_secs = 2;
    config.transport.user_agent = Some("custom-agent".to_string());
    config.endpoints.ping_preflight = true;

    assert_eq!(config.session_path().unwrap(), PathBuf::from("/state/sessions.json"));
    assert_eq!(config.retry_policy().backoff(1), Duration::from_secs(4));
    assert_eq!(config.request_profile().user_agent, "custom-agent");
    assert!(config.endpoints().ping.preflight);
    assert!(!config.endpoints().session.preflight);
    assert_eq!(
        config.orchestrator_settings().sweep_interval,
        Duration::from_secs(10)
    );
    assert_eq!(config.heartbeat_settings().ping_interval, Duration::from_secs(180));
}
