use clap::Parser;
use pulsekeeper::cli::Cli;
use pulsekeeper::config::Config;
use std::path::PathBuf;

#[test]
fn test_no_flags_leave_config_untouched() {
    let cli = Cli::try_parse_from(["pulsekeeper"]).unwrap();
    let mut config = Config::default();
    cli.apply_to(&mut config);
    assert_eq!(config, Config::default());
}

#[test]
fn test_overrides_apply_on_top_of_file_values() {
    let cli = Cli::try_parse_from([
        "pulsekeeper",
        "--tokens",
        "my_tokens.txt",
        "--proxies",
        "proxy.txt",
        "-w",
        "7",
    ])
    .unwrap();
    let mut config = Config::default();
    config.proxy.source_url = Some("https://lists.example/p.txt".to_string());

    cli.apply_to(&mut config);

    assert_eq!(config.files.token_file, PathBuf::from("my_tokens.txt"));
    assert_eq!(config.proxy.file, Some(PathBuf::from("proxy.txt")));
    assert!(config.proxy.source_url.is_none());
    assert_eq!(config.schedule.max_active_pairs, 7);
}

#[test]
fn test_proxy_url_and_direct_flags() {
    let cli = Cli::try_parse_from([
        "pulsekeeper",
        "--proxy-url",
        "https://lists.example/p.txt",
        "--direct",
    ])
    .unwrap();
    let mut config = Config::default();

    cli.apply_to(&mut config);

    assert_eq!(
        config.proxy.source_url.as_deref(),
        Some("https://lists.example/p.txt")
    );
    assert!(config.proxy.direct);
}

#[test]
fn test_proxies_and_proxy_url_conflict() {
    let result = Cli::try_parse_from([
        "pulsekeeper",
        "--proxies",
        "proxy.txt",
        "--proxy-url",
        "https://lists.example/p.txt",
    ]);
    assert!(result.is_err());
}
