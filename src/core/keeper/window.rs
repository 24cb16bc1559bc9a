// Bounded set of active egress paths for one credential
use crate::core::keeper::proxy_pool::{Eviction, ProxyPool};
use crate::core::keeper::types::EgressPath;
use std::collections::HashSet;

/// Paths with a running lifecycle for one credential, capped at `capacity`
///
/// Paths that failed during the current sweep are benched and are not
/// drawn again until [`ActiveWindow::begin_sweep`] runs.
#[derive(Debug, Clone)]
pub struct ActiveWindow {
    capacity: usize,
    active: Vec<EgressPath>,
    benched: HashSet<EgressPath>,
}

impl ActiveWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: Vec::with_capacity(capacity),
            benched: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, path: &EgressPath) -> bool {
        self.active.contains(path)
    }

    pub fn paths(&self) -> &[EgressPath] {
        &self.active
    }

    pub fn is_benched(&self, path: &EgressPath) -> bool {
        self.benched.contains(path)
    }

    /// Start a new outer sweep: benched paths become eligible again
    pub fn begin_sweep(&mut self) {
        self.benched.clear();
    }

    fn excluded(&self) -> HashSet<EgressPath> {
        self.active
            .iter()
            .chain(self.benched.iter())
            .cloned()
            .collect()
    }

    /// Admit up to `budget` pool paths without exceeding capacity; returns the newly admitted paths
    pub async fn fill(&mut self, pool: &ProxyPool, budget: usize) -> Vec<EgressPath> {
        let free = self.capacity.saturating_sub(self.active.len()).min(budget);
        if free == 0 {
            return Vec::new();
        }

        let admitted = pool.take_available(free, &self.excluded()).await;
        self.active.extend(admitted.iter().cloned());
        admitted
    }

    /// Drop a failed path and admit a replacement when one is available
    ///
    /// `proxy_dead` also removes the path from the pool itself. A replacement
    /// is only drawn while `budget` is non-zero; without one the window
    /// shrinks by one.
    pub async fn evict(&mut self, path: &EgressPath, pool: &ProxyPool, proxy_dead: bool, budget: usize) -> Eviction {
        let before = self.active.len();
        self.active.retain(|candidate| candidate != path);
        if self.active.len() == before {
            return Eviction::default();
        }
        self.benched.insert(path.clone());

        let exclude = self.excluded();
        let mut eviction = if proxy_dead {
            pool.evict(path, &exclude).await
        } else {
            Eviction {
                removed: false,
                replacement: pool.replacement(&exclude).await,
            }
        };
        if budget == 0 {
            eviction.replacement = None;
        }

        if let Some(next) = &eviction.replacement {
            self.active.push(next.clone());
        }
        eviction
    }
}
