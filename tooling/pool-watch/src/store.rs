//! Shared pool table.
//!
//! The fast poll loop, the roster refresh loop and chat commands all go
//! through [`PoolStore`]. Every operation takes the single lock, does its
//! read-modify-write on [`FleetState`] and releases it; network fetches
//! never happen while the lock is held.

use crate::{
    composer::{compose_report, AlertReport},
    config::MonitorSettings,
    consensus::{mode_height, update_consensus},
    detector::{evaluate_pool, PoolSignals},
    fetcher::{FetchError, FetchTarget},
    models::{NetworkState, PoolRecord, PoolSample, RosterEntry},
    stuck::{evaluate_network, NetworkAlert},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::SystemTime,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of one fetch for one pool, keyed by pool id.
pub type PoolFetch = (String, Result<PoolSample, FetchError>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub removed: usize,
    pub retained: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub report: Option<AlertReport>,
    pub network_alert: Option<NetworkAlert>,
    pub consensus_height: u64,
}

/// Read-only copy of the fleet handed to status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub pools: Vec<PoolRecord>,
    pub network: NetworkState,
}

impl FleetSnapshot {
    pub fn pool(&self, id: &str) -> Option<&PoolRecord> {
        self.pools.iter().find(|pool| pool.url == id)
    }
}

#[derive(Debug, Clone)]
pub struct FleetState {
    pools: BTreeMap<String, PoolRecord>,
    network: NetworkState,
    /// Restored watch registrations whose pool is not in the roster (yet).
    parked_watchers: BTreeMap<String, BTreeSet<String>>,
}

impl FleetState {
    pub fn new(started_at: SystemTime) -> Self {
        Self {
            pools: BTreeMap::new(),
            network: NetworkState::new(started_at),
            parked_watchers: BTreeMap::new(),
        }
    }

    pub fn pools(&self) -> impl Iterator<Item = &PoolRecord> {
        self.pools.values()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Replaces the pool list. Survivors keep their live health and watcher
    /// fields, removed pools are forgotten, new pools start clean.
    pub fn merge_roster(&mut self, entries: Vec<RosterEntry>) -> MergeSummary {
        let mut previous = std::mem::take(&mut self.pools);
        let mut summary = MergeSummary::default();

        for entry in entries {
            if self.pools.contains_key(&entry.url) {
                warn!(pool = %entry.url, "duplicate roster entry ignored");
                continue;
            }

            if let Err(error) = &entry.dialect {
                warn!(pool = %entry.url, error = %error, "pool will not be polled");
            }

            let record = match previous.remove(&entry.url) {
                Some(mut existing) => {
                    summary.retained += 1;
                    existing.api_base = entry.api_base.clone();
                    existing.dialect = entry.dialect.clone().ok();
                    if existing.dialect.is_none() {
                        // Detection stops for this pool, so nothing could clear its alerts.
                        forget_health(&mut existing);
                    }
                    existing
                }
                None => {
                    summary.added += 1;
                    let mut fresh = PoolRecord::from_roster(&entry);
                    if let Some(watchers) = self.parked_watchers.remove(&entry.url) {
                        fresh.watchers = watchers;
                    }
                    fresh
                }
            };
            self.pools.insert(record.url.clone(), record);
        }

        summary.removed = previous.len();
        summary
    }

    /// Pools that can be polled this cycle.
    pub fn fetch_targets(&self) -> Vec<FetchTarget> {
        self.pools
            .values()
            .filter_map(|pool| {
                pool.dialect.map(|dialect| FetchTarget {
                    pool: pool.url.clone(),
                    api_base: pool.api_base.clone(),
                    dialect,
                })
            })
            .collect()
    }

    /// Records fetch results, recomputes consensus, runs the detectors on the
    /// pools that were fetched and composes the cycle's messages.
    pub fn apply_cycle(
        &mut self,
        fetches: Vec<PoolFetch>,
        settings: &MonitorSettings,
        now: SystemTime,
    ) -> CycleOutcome {
        let mut fetched = Vec::with_capacity(fetches.len());
        for (id, result) in fetches {
            let Some(pool) = self.pools.get_mut(&id) else {
                debug!(pool = %id, "fetched pool left the roster mid-cycle");
                continue;
            };

            pool.polled = true;
            match result {
                Ok(sample) => {
                    pool.last_height = sample.height;
                    pool.last_block_found_at = sample.last_block_found_at;
                }
                Err(error) => {
                    debug!(pool = %id, error = %error, "pool fetch failed");
                    pool.last_height = 0;
                }
            }
            fetched.push(id);
        }

        let heights = self
            .pools
            .values()
            .filter(|pool| pool.dialect.is_some())
            .map(|pool| pool.last_height);
        let candidate = mode_height(heights, settings.include_down_pools_in_consensus);
        update_consensus(&mut self.network, candidate, now);

        let consensus_height = self.network.consensus_height;
        let mut signals = PoolSignals::default();
        for id in &fetched {
            if let Some(pool) = self.pools.get_mut(id) {
                signals = signals.merge(evaluate_pool(pool, consensus_height, settings, now));
            }
        }

        // An undelivered report from an earlier cycle is retried as well.
        let pending = self.pools.values().any(PoolRecord::awaiting_announcement);
        let report = if signals.any() || pending {
            compose_report(self.pools.values(), now)
        } else {
            None
        };

        let network_alert = match candidate {
            Some(_) => evaluate_network(&mut self.network, settings.stuck_after, now),
            None => None,
        };

        CycleOutcome {
            report,
            network_alert,
            consensus_height,
        }
    }

    /// Commits a delivered report: its pools count as announced.
    pub fn mark_announced(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(pool) = self.pools.get_mut(id) {
                pool.mark_announced();
            }
        }
    }

    pub fn update_pool<R>(&mut self, id: &str, mutator: impl FnOnce(&mut PoolRecord) -> R) -> Option<R> {
        self.pools.get_mut(id).map(mutator)
    }

    /// Every `(pool, subscriber)` registration, parked ones included.
    pub fn watch_pairs(&self) -> Vec<(String, String)> {
        let live = self
            .pools
            .values()
            .flat_map(|pool| pool.watchers.iter().map(|watcher| (pool.url.clone(), watcher.clone())));
        let parked = self.parked_watchers.iter().flat_map(|(pool, watchers)| {
            watchers.iter().map(|watcher| (pool.clone(), watcher.clone()))
        });

        let mut pairs: Vec<(String, String)> = live.chain(parked).collect();
        pairs.sort();
        pairs
    }

    /// Attaches restored registrations to known pools and parks the rest.
    pub fn restore_watchers(&mut self, pairs: Vec<(String, String)>) {
        for (pool_id, subscriber) in pairs {
            match self.pools.get_mut(&pool_id) {
                Some(pool) => {
                    pool.watchers.insert(subscriber);
                }
                None => {
                    self.parked_watchers.entry(pool_id).or_default().insert(subscriber);
                }
            }
        }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            pools: self.pools.values().cloned().collect(),
            network: self.network.clone(),
        }
    }
}

fn forget_health(pool: &mut PoolRecord) {
    pool.api_fail_streak = 0;
    pool.api_alert_active = false;
    pool.height_alert_active = false;
    pool.mentioned_this_episode = false;
    pool.just_recovered = false;
    pool.issue_started_at = None;
}

#[derive(Debug)]
pub struct PoolStore {
    state: Mutex<FleetState>,
}

impl PoolStore {
    pub fn new(started_at: SystemTime) -> Self {
        Self {
            state: Mutex::new(FleetState::new(started_at)),
        }
    }

    pub async fn snapshot(&self) -> FleetSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn pool_count(&self) -> usize {
        self.state.lock().await.pool_count()
    }

    pub async fn update_pool<R>(&self, id: &str, mutator: impl FnOnce(&mut PoolRecord) -> R) -> Option<R> {
        self.state.lock().await.update_pool(id, mutator)
    }

    pub async fn merge_roster(&self, entries: Vec<RosterEntry>) -> MergeSummary {
        self.state.lock().await.merge_roster(entries)
    }

    pub async fn fetch_targets(&self) -> Vec<FetchTarget> {
        self.state.lock().await.fetch_targets()
    }

    pub async fn apply_cycle(
        &self,
        fetches: Vec<PoolFetch>,
        settings: &MonitorSettings,
        now: SystemTime,
    ) -> CycleOutcome {
        self.state.lock().await.apply_cycle(fetches, settings, now)
    }

    pub async fn mark_announced(&self, ids: &[String]) {
        self.state.lock().await.mark_announced(ids);
    }

    pub async fn watch_pairs(&self) -> Vec<(String, String)> {
        self.state.lock().await.watch_pairs()
    }

    pub async fn restore_watchers(&self, pairs: Vec<(String, String)>) {
        self.state.lock().await.restore_watchers(pairs);
    }
}
