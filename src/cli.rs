use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pulsekeeper")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Keeps heartbeat sessions alive for many credentials across many proxies")]
pub struct Cli {
    /// Config file (default: ~/.pulsekeeper/config.toml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long = "init")]
    pub init: bool,

    /// Validate the configuration and exit
    #[arg(long = "check")]
    pub check: bool,

    /// Print the effective configuration and exit
    #[arg(long = "print")]
    pub print: bool,

    /// Token file, one bearer token per line
    #[arg(short = 't', long = "tokens")]
    pub tokens: Option<PathBuf>,

    /// Local proxy list file
    #[arg(short = 'p', long = "proxies")]
    pub proxies: Option<PathBuf>,

    /// Remote proxy list URL, refreshed periodically
    #[arg(long = "proxy-url", conflicts_with = "proxies")]
    pub proxy_url: Option<String>,

    /// Maximum concurrently active pairs across all tokens
    #[arg(short = 'w', long = "max-active")]
    pub max_active: Option<usize>,

    /// Ignore any proxy source and connect directly
    #[arg(long = "direct")]
    pub direct: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply command-line overrides on top of file values
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(tokens) = &self.tokens {
            config.files.token_file = tokens.clone();
        }
        if let Some(proxies) = &self.proxies {
            config.proxy.file = Some(proxies.clone());
            config.proxy.source_url = None;
        }
        if let Some(url) = &self.proxy_url {
            config.proxy.source_url = Some(url.clone());
        }
        if let Some(max_active) = self.max_active {
            config.schedule.max_active_pairs = max_active;
        }
        if self.direct {
            config.proxy.direct = true;
        }
    }
}
