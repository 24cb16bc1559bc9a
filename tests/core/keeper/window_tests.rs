use crate::common::*;
use pulsekeeper::core::keeper::proxy_pool::{Eviction, PoolSource, ProxyPool};
use pulsekeeper::core::keeper::types::EgressPath;
use pulsekeeper::core::keeper::window::ActiveWindow;
use std::sync::Arc;

const UNBOUNDED: usize = usize::MAX;

fn pool_of(ns: &[u8]) -> ProxyPool {
    ProxyPool::with_paths(
        PoolSource::File("unused.txt".into()),
        ns.iter().map(|n| proxy_path(*n)).collect(),
        Arc::new(MockHttpClient::new()),
    )
}

#[tokio::test]
async fn test_fill_is_capped_at_capacity() {
    let pool = pool_of(&[1, 2, 3, 4, 5]);
    let mut window = ActiveWindow::new(3);

    let admitted = window.fill(&pool, UNBOUNDED).await;

    assert_eq!(admitted, vec![proxy_path(1), proxy_path(2), proxy_path(3)]);
    assert_eq!(window.len(), 3);
    assert!(window.fill(&pool, UNBOUNDED).await.is_empty());
}

#[tokio::test]
async fn test_fill_with_small_pool_admits_everything() {
    let pool = pool_of(&[1, 2]);
    let mut window = ActiveWindow::new(10);

    window.fill(&pool, UNBOUNDED).await;

    assert_eq!(window.paths(), &[proxy_path(1), proxy_path(2)]);
}

#[tokio::test]
async fn test_evict_with_spare_keeps_window_size() {
    let pool = pool_of(&[1, 2, 3]);
    let mut window = ActiveWindow::new(2);
    window.fill(&pool, UNBOUNDED).await;

    let eviction = window.evict(&proxy_path(1), &pool, false, UNBOUNDED).await;

    assert_eq!(eviction.replacement, Some(proxy_path(3)));
    assert!(!eviction.removed);
    assert_eq!(window.len(), 2);
    assert!(!window.contains(&proxy_path(1)));
    assert!(window.is_benched(&proxy_path(1)));
    // Non-fatal failures leave the pool intact
    assert_eq!(pool.len().await, 3);
}

#[tokio::test]
async fn test_evict_without_spare_shrinks_window_by_one() {
    let pool = pool_of(&[1, 2]);
    let mut window = ActiveWindow::new(2);
    window.fill(&pool, UNBOUNDED).await;

    let eviction = window.evict(&proxy_path(2), &pool, false, UNBOUNDED).await;

    assert_eq!(eviction.replacement, None);
    assert_eq!(window.len(), 1);
}

#[tokio::test]
async fn test_dead_proxy_is_removed_from_pool() {
    let pool = pool_of(&[1, 2, 3]);
    let mut window = ActiveWindow::new(2);
    window.fill(&pool, UNBOUNDED).await;

    let eviction = window.evict(&proxy_path(1), &pool, true, UNBOUNDED).await;

    assert_eq!(eviction.replacement, Some(proxy_path(3)));
    assert!(eviction.removed);
    assert_eq!(window.len(), 2);
    assert!(!pool.current().await.contains(&proxy_path(1)));
}

#[tokio::test]
async fn test_benched_path_returns_after_next_sweep() {
    let pool = pool_of(&[1, 2]);
    let mut window = ActiveWindow::new(2);
    window.fill(&pool, UNBOUNDED).await;
    window.evict(&proxy_path(1), &pool, false, UNBOUNDED).await;

    // Same sweep: the benched path is not drawn again
    assert!(window.fill(&pool, UNBOUNDED).await.is_empty());

    window.begin_sweep();
    assert_eq!(window.fill(&pool, UNBOUNDED).await, vec![proxy_path(1)]);
    assert_eq!(window.len(), 2);
}

#[tokio::test]
async fn test_evicting_inactive_path_is_noop() {
    let pool = pool_of(&[1, 2, 3]);
    let mut window = ActiveWindow::new(1);
    window.fill(&pool, UNBOUNDED).await;

    assert_eq!(
        window.evict(&proxy_path(3), &pool, true, UNBOUNDED).await,
        Eviction::default()
    );
    assert_eq!(window.len(), 1);
    assert_eq!(pool.len().await, 3);
}

#[tokio::test]
async fn test_direct_path_window() {
    let pool = ProxyPool::with_paths(
        PoolSource::Direct,
        vec![EgressPath::Direct],
        Arc::new(MockHttpClient::new()),
    );
    let mut window = ActiveWindow::new(100);

    assert_eq!(window.fill(&pool, UNBOUNDED).await, vec![EgressPath::Direct]);
    assert_eq!(window.capacity(), 100);
}

#[tokio::test]
async fn test_fill_respects_budget() {
    let pool = pool_of(&[1, 2, 3, 4]);
    let mut window = ActiveWindow::new(4);

    assert_eq!(window.fill(&pool, 1).await, vec![proxy_path(1)]);
    assert!(window.fill(&pool, 0).await.is_empty());
    assert_eq!(window.fill(&pool, 2).await, vec![proxy_path(2), proxy_path(3)]);
    assert_eq!(window.len(), 3);
}

#[tokio::test]
async fn test_evict_without_budget_draws_no_replacement() {
    let pool = pool_of(&[1, 2, 3]);
    let mut window = ActiveWindow::new(2);
    window.fill(&pool, UNBOUNDED).await;

    let eviction = window.evict(&proxy_path(1), &pool, true, 0).await;

    // The dead proxy still leaves the pool
    assert_eq!(
        eviction,
        Eviction {
            removed: true,
            replacement: None
        }
    );
    assert_eq!(window.paths(), &[proxy_path(2)]);
    assert_eq!(pool.current().await, vec![proxy_path(2), proxy_path(3)]);
}
