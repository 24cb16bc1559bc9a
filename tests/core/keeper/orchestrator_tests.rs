/*!
Orchestrator tests on paused tokio time.

The first sweep tick fires immediately, so every scenario starts with the
window filled at t=0. Pair lifecycles heartbeat every 180s and the runs
below stop well before that unless stated otherwise.
*/

use crate::common::*;
use pulsekeeper::core::keeper::orchestrator::{Orchestrator, OrchestratorSettings, RunSummary};
use pulsekeeper::core::keeper::connection::SystemClock;
use pulsekeeper::core::keeper::proxy_pool::{PoolSource, ProxyPool};
use pulsekeeper::core::keeper::session_store::SessionStore;
use pulsekeeper::core::keeper::transport::HttpMethod;
use pulsekeeper::core::keeper::types::{Credential, EgressPath, SessionScope};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    client: MockHttpClient,
    pool: Arc<ProxyPool>,
    orchestrator: Orchestrator,
    dir: TempDir,
}

fn settings(max_active: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        max_active_pairs: max_active,
        max_pairs_per_credential: None,
        sweep_interval: Duration::from_secs(10),
        refresh_interval: Duration::from_secs(3600),
    }
}

async fn harness(tokens: &[&str], proxies: &[u8], max_active: usize, client: MockHttpClient) -> Harness {
    harness_with(tokens, proxies, settings(max_active), client).await
}

async fn harness_with(
    tokens: &[&str],
    proxies: &[u8],
    settings: OrchestratorSettings,
    client: MockHttpClient,
) -> Harness {
    let dir = create_temp_dir();
    let context = make_context(&client, &dir, Arc::new(SystemClock), SessionScope::Pair).await;
    let pool = Arc::new(ProxyPool::with_paths(
        PoolSource::Direct,
        proxies.iter().map(|n| proxy_path(*n)).collect(),
        Arc::new(client.clone()),
    ));
    let orchestrator = Orchestrator::new(
        tokens.iter().map(|t| Credential::new(*t)).collect(),
        pool.clone(),
        context,
        settings,
    );
    Harness {
        client,
        pool,
        orchestrator,
        dir,
    }
}

fn healthy_client() -> MockHttpClient {
    let client = MockHttpClient::new();
    client.set_default(HttpMethod::Post, SESSION_URL, auth_ok("u1"));
    client.set_default(HttpMethod::Post, PING_URL, ping_code(0));
    client
}

async fn run_for(orchestrator: Orchestrator, seconds: u64) -> RunSummary {
    orchestrator
        .run(tokio::time::sleep(Duration::from_secs(seconds)))
        .await
}

fn proxies_used(client: &MockHttpClient, url: &str) -> HashSet<String> {
    client
        .calls_to(HttpMethod::Post, url)
        .into_iter()
        .filter_map(|call| call.proxy)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_window_bounds_active_pairs() {
    let h = harness(&["tok1"], &[1, 2, 3, 4, 5], 2, healthy_client()).await;

    let summary = run_for(h.orchestrator, 35).await;

    assert_eq!(summary.pairs_admitted, 2);
    assert_eq!(summary.pairs_evicted, 0);
    assert_eq!(summary.active_at_shutdown, 2);
    assert!(summary.sweeps >= 4);
    let used = proxies_used(&h.client, PING_URL);
    assert_eq!(used, HashSet::from([proxy(1), proxy(2)]));
}

#[tokio::test(start_paused = true)]
async fn test_each_credential_gets_its_own_window() {
    let h = harness(&["tok-a", "tok-b"], &[1, 2, 3], 4, healthy_client()).await;

    let summary = run_for(h.orchestrator, 5).await;

    assert_eq!(summary.pairs_admitted, 4);
    assert_eq!(summary.active_at_shutdown, 4);

    let auths = h.client.calls_to(HttpMethod::Post, SESSION_URL);
    let tokens: HashSet<&str> = auths
        .iter()
        .filter_map(|call| header(call, "Authorization"))
        .collect();
    assert_eq!(tokens, HashSet::from(["Bearer tok-a", "Bearer tok-b"]));

    // One session per (credential, path) pair
    let store = SessionStore::open(h.dir.path().join("sessions.json")).await;
    assert_eq!(store.len().await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_pair_budget_spans_all_credentials() {
    let h = harness(&["tok-a", "tok-b", "tok-c"], &[1, 2, 3, 4], 2, healthy_client()).await;

    let summary = run_for(h.orchestrator, 25).await;

    assert_eq!(summary.pairs_admitted, 2);
    assert_eq!(summary.active_at_shutdown, 2);
    assert!(summary.sweeps >= 3);
    // Budget is handed out one pair per credential per round
    let auths = h.client.calls_to(HttpMethod::Post, SESSION_URL);
    let tokens: HashSet<&str> = auths
        .iter()
        .filter_map(|call| header(call, "Authorization"))
        .collect();
    assert_eq!(tokens, HashSet::from(["Bearer tok-a", "Bearer tok-b"]));
}

#[tokio::test(start_paused = true)]
async fn test_replacements_stay_within_pair_budget() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, PING_URL, Some(&proxy(1)), ping_code(403));
    let h = harness(&["tok-a", "tok-b"], &[1, 2, 3, 4], 3, client).await;

    let summary = run_for(h.orchestrator, 5).await;

    assert_eq!(summary.pairs_evicted, 2);
    assert_eq!(summary.pairs_admitted, 5);
    assert_eq!(summary.active_at_shutdown, 3);
}

#[tokio::test(start_paused = true)]
async fn test_per_credential_cap_applies_under_global_budget() {
    let mut capped = settings(10);
    capped.max_pairs_per_credential = Some(1);
    let h = harness_with(&["tok-a", "tok-b"], &[1, 2, 3], capped, healthy_client()).await;

    let summary = run_for(h.orchestrator, 15).await;

    assert_eq!(summary.pairs_admitted, 2);
    assert_eq!(summary.active_at_shutdown, 2);
    assert_eq!(proxies_used(&h.client, PING_URL), HashSet::from([proxy(1)]));
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_pair_is_replaced_from_pool() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, PING_URL, Some(&proxy(1)), ping_code(403));
    let h = harness(&["tok1"], &[1, 2, 3], 2, client).await;

    let summary = run_for(h.orchestrator, 5).await;

    assert_eq!(summary.pairs_admitted, 3);
    assert_eq!(summary.pairs_evicted, 1);
    assert_eq!(summary.proxies_removed, 0);
    assert_eq!(summary.active_at_shutdown, 2);
    assert!(proxies_used(&h.client, PING_URL).contains(&proxy(3)));
    // Revoked authorization says nothing about the proxy itself
    assert_eq!(h.pool.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_dead_proxy_is_removed_and_replaced() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, SESSION_URL, Some(&proxy(1)), connect_failure());
    let h = harness(&["tok1"], &[1, 2, 3], 2, client).await;

    // Auth through the dead proxy burns 3 attempts with 1s + 2s of backoff
    let summary = run_for(h.orchestrator, 8).await;

    assert_eq!(summary.pairs_evicted, 1);
    assert_eq!(summary.proxies_removed, 1);
    assert_eq!(summary.active_at_shutdown, 2);
    assert_eq!(h.pool.current().await, vec![proxy_path(2), proxy_path(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_dead_for_several_credentials_is_counted_once() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, SESSION_URL, Some(&proxy(1)), connect_failure());
    let h = harness(&["tok-a", "tok-b"], &[1, 2, 3], 4, client).await;

    let summary = run_for(h.orchestrator, 8).await;

    assert_eq!(summary.pairs_evicted, 2);
    assert_eq!(summary.proxies_removed, 1);
    assert_eq!(summary.active_at_shutdown, 4);
    assert_eq!(h.pool.current().await, vec![proxy_path(2), proxy_path(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_window_shrinks_when_pool_is_exhausted() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, PING_URL, Some(&proxy(2)), ping_code(403));
    let h = harness(&["tok1"], &[1, 2], 2, client).await;

    let summary = run_for(h.orchestrator, 5).await;

    assert_eq!(summary.pairs_admitted, 2);
    assert_eq!(summary.pairs_evicted, 1);
    assert_eq!(summary.active_at_shutdown, 1);
}

#[tokio::test(start_paused = true)]
async fn test_benched_path_is_retried_on_next_sweep() {
    let client = healthy_client();
    client.push_via(HttpMethod::Post, PING_URL, Some(&proxy(2)), ping_code(403));
    let h = harness(&["tok1"], &[1, 2], 2, client).await;

    // Sweep at t=10 clears the bench and re-admits proxy 2
    let summary = run_for(h.orchestrator, 15).await;

    assert_eq!(summary.pairs_admitted, 3);
    assert_eq!(summary.pairs_evicted, 1);
    assert_eq!(summary.active_at_shutdown, 2);
    assert_eq!(
        h.client
            .calls_to(HttpMethod::Post, SESSION_URL)
            .iter()
            .filter(|call| call.proxy.as_deref() == Some(proxy(2).as_str()))
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_panicking_pair_does_not_disturb_siblings() {
    let client = healthy_client();
    client.panic_via(&proxy(1));
    let h = harness(&["tok1"], &[1, 2, 3], 2, client).await;

    let summary = run_for(h.orchestrator, 5).await;

    // The panicked pair's slot is released and refilled
    assert_eq!(summary.pairs_admitted, 3);
    assert_eq!(summary.pairs_evicted, 1);
    assert_eq!(summary.active_at_shutdown, 2);
    let pinged = proxies_used(&h.client, PING_URL);
    assert!(pinged.contains(&proxy(2)));
    assert!(pinged.contains(&proxy(3)));
    assert!(!pinged.contains(&proxy(1)));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_keep_pair_active() {
    let client = healthy_client();
    client.set_default_via(HttpMethod::Post, PING_URL, Some(&proxy(1)), timeout_failure());
    let h = harness(&["tok1"], &[1, 2], 1, client).await;

    let summary = run_for(h.orchestrator, 400).await;

    assert_eq!(summary.pairs_admitted, 1);
    assert_eq!(summary.pairs_evicted, 0);
    assert_eq!(summary.active_at_shutdown, 1);
    // Heartbeats at t=0, t~183 and t~366, three attempts each
    assert_eq!(h.client.calls_to(HttpMethod::Post, PING_URL).len(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_direct_mode_runs_one_pair_per_credential() {
    let dir = create_temp_dir();
    let client = healthy_client();
    let context = make_context(&client, &dir, Arc::new(SystemClock), SessionScope::Pair).await;
    let pool = Arc::new(ProxyPool::with_paths(
        PoolSource::Direct,
        vec![EgressPath::Direct],
        Arc::new(client.clone()),
    ));
    let orchestrator = Orchestrator::new(
        vec![Credential::new("tok1"), Credential::new("tok2")],
        pool,
        context,
        OrchestratorSettings::default(),
    );

    let summary = run_for(orchestrator, 5).await;

    assert_eq!(summary.pairs_admitted, 2);
    assert!(client.calls().iter().all(|call| call.proxy.is_none()));
}
