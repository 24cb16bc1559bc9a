//! Orchestrator - runs one lifecycle per active (credential, path) pair
//!
//! ## Scheduling model
//!
//! - `max_active_pairs` bounds the running pairs across all credentials;
//!   each credential also has its own [`ActiveWindow`], optionally capped by
//!   `max_pairs_per_credential`
//! - Every pair runs as its own task in a `JoinSet`; a panic or failure in one
//!   pair surfaces as that task's exit, siblings keep running
//! - On each sweep tick the bench is cleared and free budget is handed out one
//!   path per credential per round, starting from a rotating credential
//! - When a pair ends, its path is evicted from the window (and from the pool
//!   when the proxy is dead) and a replacement is spawned immediately
//! - The proxy pool refreshes on its own timer in a separate task
//!
//! Shutdown aborts every pair task; session writes are atomic so aborting
//! mid-save leaves the cache readable.

use crate::core::keeper::connection::{PairConnection, PairContext, PairFailure};
use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::proxy_pool::{run_refresher, ProxyPool};
use crate::core::keeper::types::{ConnectionState, Credential, EgressPath, PairKey, PairStatus};
use crate::core::keeper::window::ActiveWindow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{AbortHandle, Id, JoinError, JoinSet};

/// Pair budgets and cadences
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound on running pairs across every credential
    pub max_active_pairs: usize,
    /// Optional tighter bound for a single credential
    pub max_pairs_per_credential: Option<usize>,
    pub sweep_interval: Duration,
    pub refresh_interval: Duration,
}

impl OrchestratorSettings {
    fn window_capacity(&self) -> usize {
        self.max_pairs_per_credential
            .map_or(self.max_active_pairs, |cap| cap.min(self.max_active_pairs))
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_active_pairs: 100,
            max_pairs_per_credential: None,
            sweep_interval: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(3600),
        }
    }
}

/// Runtime unit for one active pair
pub struct LifecycleHandle {
    slot: usize,
    key: PairKey,
    abort: AbortHandle,
    status: watch::Receiver<PairStatus>,
    admitted_at: Instant,
}

impl LifecycleHandle {
    pub fn key(&self) -> &PairKey {
        &self.key
    }

    pub fn status(&self) -> PairStatus {
        self.status.borrow().clone()
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.status.borrow().last_heartbeat
    }

    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// Counters reported when a run stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sweeps: u64,
    pub pairs_admitted: u64,
    pub pairs_evicted: u64,
    pub proxies_removed: u64,
    pub active_at_shutdown: usize,
}

enum Event {
    Shutdown,
    Sweep,
    Joined(Result<(Id, PairFailure), JoinError>),
}

pub struct Orchestrator {
    credentials: Vec<Credential>,
    pool: Arc<ProxyPool>,
    context: Arc<PairContext>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        credentials: Vec<Credential>,
        pool: Arc<ProxyPool>,
        context: Arc<PairContext>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            credentials,
            pool,
            context,
            settings,
        }
    }

    /// Run sweeps until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let logger = get_logger();
        let mut run = RunState::new(&self);

        let refresher = if self.pool.source().is_refreshable() {
            Some(tokio::spawn(run_refresher(
                self.pool.clone(),
                self.settings.refresh_interval,
            )))
        } else {
            None
        };

        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                _ = sweep.tick() => Event::Sweep,
                Some(joined) = run.tasks.join_next_with_id(), if !run.tasks.is_empty() => Event::Joined(joined),
            };

            match event {
                Event::Shutdown => break,
                Event::Sweep => run.sweep(&self).await,
                Event::Joined(Ok((id, failure))) => run.handle_exit(&self, id, failure).await,
                Event::Joined(Err(e)) if e.is_cancelled() => {
                    run.handles.remove(&e.id());
                }
                Event::Joined(Err(e)) => {
                    let id = e.id();
                    let reason = match e.try_into_panic() {
                        Ok(payload) => panic_message(payload.as_ref()),
                        Err(e) => e.to_string(),
                    };
                    logger.error("Orchestrator", &format!("Pair task failed: {}", reason));
                    run.handle_exit(&self, id, PairFailure::Panicked(reason)).await;
                }
            }
        }

        run.summary.active_at_shutdown = run.handles.len();
        logger.info(
            "Orchestrator",
            &format!(
                "Shutting down: cancelling {} active pairs",
                run.summary.active_at_shutdown
            ),
        );
        for handle in run.handles.values() {
            let status = handle.status();
            logger.debug(
                "Orchestrator",
                &format!(
                    "Cancelling {} ({:?}, retries={}, up {:?}, last heartbeat {:?} ago)",
                    handle.key(),
                    status.state,
                    status.retries,
                    handle.admitted_at().elapsed(),
                    handle.last_heartbeat().map(|at| at.elapsed()),
                ),
            );
            handle.cancel();
        }
        run.tasks.shutdown().await;
        if let Some(refresher) = refresher {
            refresher.abort();
        }

        run.summary
    }

    fn spawn_pair(&self, run: &mut RunState, slot: usize, path: EgressPath) {
        let key = PairKey::new(self.credentials[slot].clone(), path);
        let (connection, status) = PairConnection::new(key.clone(), self.context.clone());
        let abort = run.tasks.spawn(connection.run());

        get_logger().pair_admitted(&key);
        run.summary.pairs_admitted += 1;
        run.handles.insert(
            abort.id(),
            LifecycleHandle {
                slot,
                key,
                abort,
                status,
                admitted_at: Instant::now(),
            },
        );
    }
}

struct RunState {
    windows: Vec<ActiveWindow>,
    handles: HashMap<Id, LifecycleHandle>,
    tasks: JoinSet<PairFailure>,
    summary: RunSummary,
}

impl RunState {
    fn new(orchestrator: &Orchestrator) -> Self {
        let capacity = orchestrator.settings.window_capacity();
        Self {
            windows: orchestrator
                .credentials
                .iter()
                .map(|_| ActiveWindow::new(capacity))
                .collect(),
            handles: HashMap::new(),
            tasks: JoinSet::new(),
            summary: RunSummary::default(),
        }
    }

    /// Pairs that may still start before `max_active_pairs` is reached
    fn budget(&self, orchestrator: &Orchestrator) -> usize {
        orchestrator
            .settings
            .max_active_pairs
            .saturating_sub(self.handles.len())
    }

    async fn sweep(&mut self, orchestrator: &Orchestrator) {
        self.summary.sweeps += 1;
        for window in &mut self.windows {
            window.begin_sweep();
        }

        let count = self.windows.len();
        if count > 0 {
            let start = ((self.summary.sweeps - 1) % count as u64) as usize;
            loop {
                let mut admitted_any = false;
                for offset in 0..count {
                    let budget = self.budget(orchestrator);
                    if budget == 0 {
                        break;
                    }
                    let slot = (start + offset) % count;
                    for path in self.windows[slot].fill(&orchestrator.pool, 1).await {
                        orchestrator.spawn_pair(self, slot, path);
                        admitted_any = true;
                    }
                }
                if !admitted_any || self.budget(orchestrator) == 0 {
                    break;
                }
            }
        }

        let (connected, disconnected) = self.handles.values().fold((0, 0), |(c, d), handle| {
            match handle.status().state {
                ConnectionState::Connected => (c + 1, d),
                ConnectionState::Disconnected => (c, d + 1),
                ConnectionState::NotConnected => (c, d),
            }
        });
        get_logger().sweep_summary(
            self.summary.sweeps,
            self.handles.len(),
            connected,
            disconnected,
            orchestrator.pool.len().await,
        );
    }

    async fn handle_exit(&mut self, orchestrator: &Orchestrator, id: Id, failure: PairFailure) {
        let Some(handle) = self.handles.remove(&id) else {
            return;
        };
        let LifecycleHandle { slot, key, .. } = handle;

        let budget = self.budget(orchestrator);
        let eviction = self.windows[slot]
            .evict(&key.path, &orchestrator.pool, failure.is_proxy_dead(), budget)
            .await;

        self.summary.pairs_evicted += 1;
        if eviction.removed {
            self.summary.proxies_removed += 1;
        }
        get_logger().pair_evicted(
            &key,
            &failure.to_string(),
            eviction.replacement.as_ref().map(EgressPath::identity),
        );

        if let Some(path) = eviction.replacement {
            orchestrator.spawn_pair(self, slot, path);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
