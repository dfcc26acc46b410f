// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! In-memory RC state and the scheduling algorithms that operate on it.
//!
//! Everything here is synchronous and side-effect-free beyond the struct
//! it's called on — the async/networking concerns live in
//! [`super::service`]. That split keeps `assign_load`/`assign_processors`
//! unit-testable without a runtime.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::distributed::store::{FileKvStore, HostStore};
use crate::distributed::types::{CoordinatorInfo, HostName, LockEntry, ResourceEntry, RuleEntry};
use crate::error::DispatchError;

/// All RC state guarded by a single `parking_lot::Mutex` (see design
/// notes: one lock serializes `hosts`, `system_load`, `coordinators` and
/// `locks` together, because `assign_load`/`assign_processors` read and
/// write several of them atomically). The two on-disk tables live behind
/// the same lock so a rule acquisition and the load-balance it may
/// trigger can't interleave with a concurrent mutation.
pub struct RcState {
    /// Host name -> max CPU slots.
    pub hosts: HashMap<HostName, f64>,
    /// Host name -> current reported load.
    pub system_load: HashMap<HostName, f64>,
    /// Coordinator URL -> bookkeeping.
    pub coordinators: HashMap<String, CoordinatorInfo>,
    /// `(host, resource)` -> lock, present only while a build is in
    /// flight (spec.md §3 data model).
    pub locks: HashMap<(HostName, String), LockEntry>,
    /// Persisted rule definitions, keyed by rule name.
    pub rules: FileKvStore<String, RuleEntry>,
    /// Persisted resource records, keyed by `host/resource`.
    pub resources: FileKvStore<String, ResourceEntry>,
    /// Backing store for `hosts`, re-written on every `setload`.
    pub host_store: HostStore,
    /// Directory resources without an explicit rule path materialize
    /// under by default.
    pub data_dir: PathBuf,
    /// Tolerance added to a host's `max_load` before it is classified as
    /// overloaded (spec.md §3 Host invariant, §8 Overload reply).
    pub overload_margin: f64,
    /// Minimum interval between automatic full rebalances triggered from
    /// `report_load` (spec.md §4.1).
    pub rebalance_frequency: chrono::Duration,
    /// When `load_balance` last ran.
    pub last_rebalance: DateTime<Utc>,
    /// Set whenever a structural change (a brand new coordinator) makes
    /// the next `report_load` rebalance unconditionally, regardless of
    /// `rebalance_frequency`.
    pub must_rebalance: bool,
}

impl RcState {
    /// Build state from persisted stores under `data_dir`, loading the
    /// host inventory from `hosts_path`.
    pub fn open(
        hosts_path: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        overload_margin: f64,
        rebalance_frequency: chrono::Duration,
    ) -> Result<Self, DispatchError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|source| DispatchError::Persistence {
            path: data_dir.display().to_string(),
            source,
        })?;

        let host_store = HostStore::new(hosts_path);
        let hosts = host_store.load()?;
        let system_load = hosts.keys().map(|h| (h.clone(), 0.0)).collect();

        Ok(Self {
            hosts,
            system_load,
            coordinators: HashMap::new(),
            locks: HashMap::new(),
            rules: FileKvStore::open(data_dir.join("rules.json"))?,
            resources: FileKvStore::open(data_dir.join("resources.json"))?,
            host_store,
            data_dir: data_dir.to_path_buf(),
            overload_margin,
            rebalance_frequency,
            last_rebalance: Utc::now(),
            must_rebalance: false,
        })
    }

    /// A host not yet present in `system_load` defaults to `0.0` the
    /// first time it is touched, rather than panicking (spec.md §3 Host
    /// invariant).
    pub fn load_of(&mut self, host: &str) -> f64 {
        *self.system_load.entry(host.to_string()).or_insert(0.0)
    }

    /// Whether `report_load` should trigger a full rebalance right now:
    /// either a structural change is pending, or the periodic interval
    /// has elapsed (spec.md §4.1).
    pub fn should_rebalance(&self, now: DateTime<Utc>) -> bool {
        self.must_rebalance || now.signed_duration_since(self.last_rebalance) >= self.rebalance_frequency
    }

    /// Default local path for a resource that has no rule-supplied path
    /// on record.
    pub fn default_resource_path(&self, host: &HostName, resource: &str) -> String {
        self.data_dir.join("resources").join(host).join(resource).display().to_string()
    }
}

/// `assignLoad`: recompute each coordinator's `allocated_cpu` as a
/// priority-weighted share of total fleet capacity.
///
/// `M = Σ host.max_load`, `P = Σ coordinator.priority`. Each coordinator
/// gets `floor((M / P) * priority)`. If `P == 0` every quota is zero
/// (there is nothing to divide capacity by). `floor` truncates toward
/// zero on the non-negative values this system deals in, matching
/// Python's `int()` on a non-negative float.
pub fn assign_load(hosts: &HashMap<HostName, f64>, coordinators: &mut HashMap<String, CoordinatorInfo>) {
    let m: f64 = hosts.values().sum();
    let p: f64 = coordinators.values().map(|c| c.priority).sum();

    if p <= 0.0 {
        for info in coordinators.values_mut() {
            info.allocated_cpu = 0;
        }
        return;
    }

    let share = m / p;
    for info in coordinators.values_mut() {
        info.allocated_cpu = (share * info.priority).floor().max(0.0) as u64;
    }
}

/// `assignProcessors`: hand out free host slots to coordinators that are
/// under their allocated quota, using a shuffle-and-pair match.
///
/// A host contributes `slack = floor(maxLoad_h + overloadMargin -
/// currentLoad_h)` free slots, but only while `currentLoad_h < maxLoad_h
/// + (overloadMargin - 1)`; a host already at or near its overload
/// threshold contributes nothing, regardless of how few processors are
/// currently assigned to it there (spec.md §4.1). The free-slot multiset
/// is built by iterating hosts in a **stable, sorted-by-name** order
/// (original_source iterates a `dict` whose order is unspecified; sorting
/// makes the outcome deterministic without changing the documented
/// semantics, which only requires the *need* list to be shuffled — see
/// SPEC_FULL.md §4.1). The need list — one entry per coordinator per CPU
/// it is still owed — is shuffled with Fisher-Yates before pairing,
/// matching original_source's `random.shuffle(l)` on the need list only.
pub fn assign_processors(
    hosts: &HashMap<HostName, f64>,
    system_load: &HashMap<HostName, f64>,
    overload_margin: f64,
    coordinators: &mut HashMap<String, CoordinatorInfo>,
) {
    let mut host_names: Vec<&HostName> = hosts.keys().collect();
    host_names.sort();

    let mut free_slots: Vec<HostName> = Vec::new();
    for host in host_names {
        let max_load = hosts[host];
        let current_load = system_load.get(host).copied().unwrap_or(0.0);
        if current_load >= max_load + (overload_margin - 1.0) {
            continue;
        }
        let slack = (max_load + overload_margin - current_load).floor().max(0.0) as u64;
        for _ in 0..slack {
            free_slots.push(host.clone());
        }
    }

    let mut need: Vec<String> = Vec::new();
    let mut urls: Vec<&String> = coordinators.keys().collect();
    urls.sort();
    for url in urls {
        let info = &coordinators[url];
        let owed = info.allocated_cpu.saturating_sub(info.total_processors());
        for _ in 0..owed {
            need.push(url.clone());
        }
    }

    need.shuffle(&mut rand::thread_rng());

    for (slot_host, url) in free_slots.into_iter().zip(need.into_iter()) {
        if let Some(info) = coordinators.get_mut(&url) {
            *info.processors.entry(slot_host).or_insert(0) += 1;
        }
    }
}

/// `loadBalance`: the combined rebalance step run after any event that
/// changes priorities, host inventory, or processor counts. Resets the
/// rebalance clock, so a caller that just ran this doesn't immediately
/// trigger another one on the next `report_load`.
pub fn load_balance(state: &mut RcState) {
    assign_load(&state.hosts, &mut state.coordinators);
    assign_processors(&state.hosts, &state.system_load, state.overload_margin, &mut state.coordinators);
    state.last_rebalance = Utc::now();
    state.must_rebalance = false;
}

/// Acquire a named-resource lock if it is free. Returns `true` if the
/// caller now holds it.
pub fn try_acquire(locks: &mut HashMap<(HostName, String), LockEntry>, host: &HostName, resource: &str, rule: &str) -> bool {
    let key = (host.clone(), resource.to_string());
    if locks.contains_key(&key) {
        false
    } else {
        locks.insert(
            key,
            LockEntry {
                rule: rule.to_string(),
                updated_at: Utc::now(),
            },
        );
        true
    }
}

/// Release a lock previously acquired with [`try_acquire`], unconditionally
/// removing the entry — whether the build succeeded or failed, `locks` and
/// `resources` must never simultaneously hold the same key (spec.md §8
/// Testable Property). Returns the removed entry so the caller can decide
/// whether to persist a [`crate::distributed::types::ResourceEntry`].
pub fn release(locks: &mut HashMap<(HostName, String), LockEntry>, host: &HostName, resource: &str) -> Option<LockEntry> {
    locks.remove(&(host.clone(), resource.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::types::CoordinatorInfo;
    use chrono::Utc;

    fn coordinator(priority: f64) -> CoordinatorInfo {
        CoordinatorInfo {
            url: "http://c".into(),
            priority,
            allocated_cpu: 0,
            processors: HashMap::new(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_assign_load_splits_proportionally() {
        let mut hosts = HashMap::new();
        hosts.insert("h1".to_string(), 10.0);
        hosts.insert("h2".to_string(), 10.0);

        let mut coordinators = HashMap::new();
        coordinators.insert("a".to_string(), coordinator(1.0));
        coordinators.insert("b".to_string(), coordinator(3.0));

        assign_load(&hosts, &mut coordinators);

        // M = 20, P = 4, share = 5: a -> floor(5*1)=5, b -> floor(5*3)=15
        assert_eq!(coordinators["a"].allocated_cpu, 5);
        assert_eq!(coordinators["b"].allocated_cpu, 15);
    }

    #[test]
    fn test_assign_load_zero_priority_yields_zero_quota() {
        let mut hosts = HashMap::new();
        hosts.insert("h1".to_string(), 10.0);

        let mut coordinators = HashMap::new();
        coordinators.insert("a".to_string(), coordinator(0.0));

        assign_load(&hosts, &mut coordinators);

        assert_eq!(coordinators["a"].allocated_cpu, 0);
    }

    #[test]
    fn test_assign_load_floor_truncates() {
        let mut hosts = HashMap::new();
        hosts.insert("h1".to_string(), 10.0);

        let mut coordinators = HashMap::new();
        coordinators.insert("a".to_string(), coordinator(1.0));
        coordinators.insert("b".to_string(), coordinator(1.0));
        coordinators.insert("c".to_string(), coordinator(1.0));

        assign_load(&hosts, &mut coordinators);

        // M=10, P=3, share=3.333...; each gets floor(3.333)=3
        assert_eq!(coordinators["a"].allocated_cpu, 3);
        assert_eq!(coordinators["b"].allocated_cpu, 3);
        assert_eq!(coordinators["c"].allocated_cpu, 3);
    }

    #[test]
    fn test_assign_processors_respects_host_capacity() {
        let mut hosts = HashMap::new();
        hosts.insert("h1".to_string(), 2.0);
        let system_load = HashMap::new();

        let mut coordinators = HashMap::new();
        let mut a = coordinator(1.0);
        a.allocated_cpu = 5;
        coordinators.insert("a".to_string(), a);

        assign_processors(&hosts, &system_load, 1.0, &mut coordinators);

        // slack = floor(2.0 + 1.0 - 0.0) = 3, but only 5 are owed and only
        // one coordinator exists, so it picks up min(3, 5) = 3 slots.
        assert_eq!(coordinators["a"].total_processors(), 3);
    }

    #[test]
    fn test_assign_processors_overloaded_host_contributes_nothing() {
        let mut hosts = HashMap::new();
        hosts.insert("h1".to_string(), 4.0);
        let mut system_load = HashMap::new();
        // current_load (4.0) >= max_load (4.0) + (margin - 1) (-0.4) = 3.6
        system_load.insert("h1".to_string(), 4.0);

        let mut coordinators = HashMap::new();
        let mut a = coordinator(1.0);
        a.allocated_cpu = 5;
        coordinators.insert("a".to_string(), a);

        assign_processors(&hosts, &system_load, 0.6, &mut coordinators);

        assert_eq!(coordinators["a"].total_processors(), 0);
    }

    #[test]
    fn test_try_acquire_then_release() {
        let mut locks = HashMap::new();
        let host = "h1".to_string();

        assert!(try_acquire(&mut locks, &host, "index", "build_index"));
        assert!(!try_acquire(&mut locks, &host, "index", "build_index"));

        let released = release(&mut locks, &host, "index");
        assert_eq!(released.unwrap().rule, "build_index");
        assert!(!locks.contains_key(&(host, "index".to_string())));
    }

    #[test]
    fn test_release_of_unheld_lock_is_noop() {
        let mut locks = HashMap::new();
        let host = "h1".to_string();
        assert!(release(&mut locks, &host, "index").is_none());
    }
}
