//! Token and proxy list loading
//!
//! Both inputs are plain newline-delimited text. Lines are trimmed, blank lines
//! and `#` comments are skipped. A missing or empty token file is fatal at
//! startup; proxy entries that are not `scheme://host:port` are dropped with a
//! warning so one bad line cannot take the whole list down.

use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::types::{Credential, EgressPath, KeeperError};
use std::collections::HashSet;
use std::path::Path;

const PROXY_SCHEMES: [&str; 6] = ["http", "https", "socks4", "socks4a", "socks5", "socks5h"];

fn meaningful_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Parse a token list, collapsing duplicates while keeping file order
pub fn parse_tokens(content: &str) -> Vec<Credential> {
    let mut seen = HashSet::new();
    meaningful_lines(content)
        .filter(|line| seen.insert(line.to_string()))
        .map(Credential::new)
        .collect()
}

/// Load credentials from a newline-delimited token file
///
/// # Errors
///
/// Returns `KeeperError::StartupFatal` if the file cannot be read or holds no tokens.
pub async fn load_tokens(path: &Path) -> Result<Vec<Credential>, KeeperError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        KeeperError::StartupFatal(format!("Failed to load tokens from {}: {}", path.display(), e))
    })?;

    let tokens = parse_tokens(&content);
    if tokens.is_empty() {
        return Err(KeeperError::StartupFatal(format!(
            "Token file {} is empty",
            path.display()
        )));
    }

    get_logger().info(
        "Sources",
        &format!("Loaded {} credentials from {}", tokens.len(), path.display()),
    );
    Ok(tokens)
}

/// Validate a proxy address: known scheme, host, and an explicit or default port
pub fn validate_proxy_address(address: &str) -> Result<(), String> {
    let parsed = url::Url::parse(address).map_err(|e| format!("unparseable address: {}", e))?;

    if !PROXY_SCHEMES.contains(&parsed.scheme()) {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    if parsed.port_or_known_default().is_none() {
        return Err("missing port".to_string());
    }
    Ok(())
}

/// Parse a proxy list into egress paths
///
/// Only the literal `direct` selects [`EgressPath::Direct`] here; blank lines
/// are skipped like comments. Invalid addresses are skipped and duplicates keep
/// their first position.
pub fn parse_proxy_list(content: &str) -> Vec<EgressPath> {
    let logger = get_logger();
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for line in meaningful_lines(content) {
        let path = EgressPath::from_entry(line);
        if let EgressPath::Proxy(address) = &path {
            if let Err(reason) = validate_proxy_address(address) {
                logger.warn("Sources", &format!("Skipping proxy entry {}: {}", address, reason));
                continue;
            }
        }
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }

    paths
}

/// Render paths back to the newline-delimited list format
pub fn render_proxy_list(paths: &[EgressPath]) -> String {
    let mut rendered = paths
        .iter()
        .map(EgressPath::identity)
        .collect::<Vec<_>>()
        .join("\n");
    rendered.push('\n');
    rendered
}
