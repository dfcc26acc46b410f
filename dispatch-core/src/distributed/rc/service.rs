// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Async service methods implementing the RC's external interface.
//!
//! Handlers take `&self` and lock [`RcState`] for the duration of one
//! call. Per the deadlock-avoidance discipline in the design notes,
//! anything that calls back out to a coordinator (delivering a changed
//! CPU allocation) is hoisted into a detached `tokio::spawn`ed task after
//! the lock is released, with the data it needs swapped out of the state
//! first so the handler is free to keep mutating afterward without racing
//! the detached task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::distributed::protocol::{RcStatus, RuleDetails};
use crate::distributed::rc::state::{self, RcState};
use crate::distributed::rpc::RpcClient;
use crate::distributed::types::{CoordinatorInfo, HostName, ResourceEntry, ResourceOutcome, RuleEntry, RuleOutcome};
use crate::error::{DispatchError, DispatchResult};

/// Configuration the RC service needs beyond its state.
#[derive(Debug, Clone)]
pub struct ResourceControllerConfig {
    /// Path to the persisted hosts file.
    pub hosts_path: String,
    /// Directory the rules/resources tables live under.
    pub data_dir: String,
    /// Tolerance added to a host's `max_load` before it counts as
    /// overloaded (spec.md §3 Host invariant).
    pub overload_margin: f64,
    /// Minimum interval, in seconds, between automatic rebalances
    /// triggered from `report_load` (spec.md §4.1).
    pub rebalance_frequency_secs: u64,
}

impl Default for ResourceControllerConfig {
    fn default() -> Self {
        Self {
            hosts_path: "hosts.txt".to_string(),
            data_dir: "./rc-data".to_string(),
            overload_margin: 1.0,
            rebalance_frequency_secs: 300,
        }
    }
}

/// The Resource Controller: a single fleet-wide singleton.
pub struct ResourceController {
    state: Arc<Mutex<RcState>>,
}

impl ResourceController {
    /// Load state from disk and construct the controller.
    pub fn open(config: &ResourceControllerConfig) -> DispatchResult<Self> {
        let state = RcState::open(
            &config.hosts_path,
            &config.data_dir,
            config.overload_margin,
            chrono::Duration::seconds(config.rebalance_frequency_secs as i64),
        )?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// `register_coordinator(url, priority)`. Spec.md §4.1 Registration:
    /// if the URL is already known, only `priority` is updated in place
    /// (logged "change_priority"), preserving `processors`/
    /// `allocated_cpu`; a genuinely new URL gets a fresh record and sets
    /// `must_rebalance`.
    pub async fn register_coordinator(&self, url: String, priority: f64) {
        let deliveries = {
            let mut state = self.state.lock();
            match state.coordinators.get_mut(&url) {
                Some(info) => {
                    tracing::debug!(url, priority, "change_priority");
                    info.priority = priority;
                }
                None => {
                    state.coordinators.insert(
                        url.clone(),
                        CoordinatorInfo {
                            url: url.clone(),
                            priority,
                            allocated_cpu: 0,
                            processors: HashMap::new(),
                            registered_at: chrono::Utc::now(),
                        },
                    );
                    state.must_rebalance = true;
                }
            }
            state::load_balance(&mut state);
            snapshot_allocations(&state)
        };
        notify_coordinators(deliveries);
    }

    /// `unregister_coordinator(url)` — a tolerant no-op if the URL is
    /// unknown, matching original_source's `KeyError`-is-ignored pattern.
    pub async fn unregister_coordinator(&self, url: &str) {
        let deliveries = {
            let mut state = self.state.lock();
            if state.coordinators.remove(url).is_none() {
                tracing::debug!(url, "unregister_coordinator: unknown coordinator, ignoring");
                return;
            }
            state::load_balance(&mut state);
            snapshot_allocations(&state)
        };
        notify_coordinators(deliveries);
    }

    /// `request_cpus(url, priority)`.
    pub async fn request_cpus(&self, url: &str, priority: f64) -> DispatchResult<u64> {
        let (allocated, deliveries) = {
            let mut state = self.state.lock();
            match state.coordinators.get_mut(url) {
                Some(info) => info.priority = priority,
                None => {
                    return Err(DispatchError::PolicyDenied(format!(
                        "coordinator {url} is not registered"
                    )))
                }
            }
            state::load_balance(&mut state);
            let allocated = state.coordinators[url].allocated_cpu;
            (allocated, snapshot_allocations(&state))
        };
        notify_coordinators(deliveries);
        Ok(allocated)
    }

    /// `register_processor(url, host)` — tolerates an unknown coordinator.
    pub async fn register_processor(&self, url: &str, host: &HostName) {
        let mut state = self.state.lock();
        // A host not yet present defaults to 0.0 rather than panicking.
        let _ = state.load_of(host);
        if let Some(info) = state.coordinators.get_mut(url) {
            *info.processors.entry(host.clone()).or_insert(0) += 1;
        } else {
            tracing::debug!(url, "register_processor: unknown coordinator, ignoring");
        }
        // original_source nudges systemLoad up by 1.0 here as a heuristic
        // to avoid immediately over-assigning the same host again before
        // the processor's first report_load arrives (see design notes,
        // "Open question: systemLoad heuristic nudge" — kept as-is).
        *state.system_load.entry(host.clone()).or_insert(0.0) += 1.0;
    }

    /// `unregister_processor(url, host)` — always triggers `load_balance`
    /// even if the coordinator/processor pair was unknown, matching
    /// original_source.
    pub async fn unregister_processor(&self, url: &str, host: &HostName) {
        let deliveries = {
            let mut state = self.state.lock();
            if let Some(info) = state.coordinators.get_mut(url) {
                if let Some(count) = info.processors.get_mut(host) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        info.processors.remove(host);
                    }
                }
            } else {
                tracing::debug!(url, "unregister_processor: unknown coordinator, ignoring");
            }
            state::load_balance(&mut state);
            snapshot_allocations(&state)
        };
        notify_coordinators(deliveries);
    }

    /// `report_load(host, load)`. Triggers a full rebalance if one is
    /// pending or the periodic interval has elapsed (spec.md §4.1), then
    /// returns whether the host is NOT overloaded, per spec.md §8's
    /// Testable Property: `false` iff `load ≥ maxLoad_h + overloadMargin`.
    pub async fn report_load(&self, host: &HostName, load: f64) -> bool {
        let (not_overloaded, deliveries) = {
            let mut state = self.state.lock();
            state.system_load.insert(host.clone(), load);

            let now = chrono::Utc::now();
            let deliveries = if state.should_rebalance(now) {
                state::load_balance(&mut state);
                Some(snapshot_allocations(&state))
            } else {
                None
            };

            let max_load = state.hosts.get(host).copied().unwrap_or(0.0);
            let not_overloaded = load < max_load + state.overload_margin;
            (not_overloaded, deliveries)
        };
        if let Some(deliveries) = deliveries {
            notify_coordinators(deliveries);
        }
        not_overloaded
    }

    /// `setload(host, max_load)` — register or update a host's capacity
    /// and persist the change.
    pub async fn setload(&self, host: HostName, max_load: f64) -> DispatchResult<()> {
        let deliveries = {
            let mut state = self.state.lock();
            state.hosts.insert(host.clone(), max_load);
            state.host_store.save(&state.hosts)?;
            state::load_balance(&mut state);
            snapshot_allocations(&state)
        };
        notify_coordinators(deliveries);
        Ok(())
    }

    /// `setrule(name, path, acquire_command, release_command)`.
    pub async fn setrule(
        &self,
        name: String,
        path: String,
        acquire_command: String,
        release_command: Option<String>,
    ) -> DispatchResult<()> {
        let mut state = self.state.lock();
        state.rules.set(
            name,
            RuleEntry {
                path,
                acquire_command,
                release_command,
            },
        )
    }

    /// `delrule(name)`.
    pub async fn delrule(&self, name: &str) -> DispatchResult<()> {
        let mut state = self.state.lock();
        state.rules.remove(&name.to_string())
    }

    /// `get_resource(host, resource)`: the three-way ready/wait/build
    /// outcome described in spec.md §4.1/§4.3. "Already materialized" is
    /// decided from the **persisted** `resources` store, not the
    /// in-memory `locks` map — `locks` is lost on every RC restart
    /// (spec.md §5), so a resource built before a restart must still be
    /// found here.
    pub async fn get_resource(&self, host: &HostName, resource: &str) -> ResourceOutcome {
        let mut state = self.state.lock();
        let rkey = resource_key(host, resource);
        if let Some(entry) = state.resources.get(&rkey) {
            return ResourceOutcome::Ready { path: entry.path.clone() };
        }

        let key = (host.clone(), resource.to_string());
        if state.locks.contains_key(&key) {
            return ResourceOutcome::Wait;
        }

        // No lock and no record: a later acquire_rule call takes the
        // lock; get_resource itself never acquires it, matching spec.md
        // §4.3's openResource pseudocode where BUILD is followed by an
        // explicit acquireRule call.
        ResourceOutcome::Build { rule: resource.to_string() }
    }

    /// `acquire_rule(host, resource, rule)`.
    pub async fn acquire_rule(&self, host: &HostName, resource: &str, rule: &str) -> (RuleOutcome, Option<RuleDetails>) {
        let mut state = self.state.lock();
        let rkey = resource_key(host, resource);
        if state.resources.get(&rkey).is_some() {
            return (RuleOutcome::Materialized, None);
        }

        if !state::try_acquire(&mut state.locks, host, resource, rule) {
            return (RuleOutcome::Locked, None);
        }

        let rule_key = rule.to_string();
        let path = state
            .rules
            .get(&rule_key)
            .map(|r| r.path.clone())
            .unwrap_or_else(|| state.default_resource_path(host, resource));
        let acquire_command = state
            .rules
            .get(&rule_key)
            .map(|r| r.acquire_command.clone())
            .unwrap_or_default();
        (RuleOutcome::Acquired, Some(RuleDetails { path, acquire_command }))
    }

    /// `release_rule(host, resource, succeeded)`. Always removes the
    /// in-memory lock; only on success does the resource get persisted.
    /// This keeps `locks[k]` and `resources[k]` mutually exclusive
    /// (spec.md §8 Testable Property) — unlike a prior revision, the
    /// lock is never left behind in a "materialized" state.
    pub async fn release_rule(&self, host: &HostName, resource: &str, succeeded: bool) -> DispatchResult<()> {
        let mut state = self.state.lock();
        let released = state::release(&mut state.locks, host, resource);
        if succeeded {
            if let Some(entry) = released {
                let path = state
                    .rules
                    .get(&entry.rule)
                    .map(|r| r.path.clone())
                    .unwrap_or_else(|| state.default_resource_path(host, resource));
                state.resources.set(
                    resource_key(host, resource),
                    ResourceEntry {
                        rule: entry.rule,
                        host: host.clone(),
                        path,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// `retry_unused_hosts`: re-run load balancing, giving idle hosts
    /// another chance to pick up waiting coordinators.
    pub async fn retry_unused_hosts(&self) {
        let deliveries = {
            let mut state = self.state.lock();
            state::load_balance(&mut state);
            snapshot_allocations(&state)
        };
        notify_coordinators(deliveries);
    }

    /// `get_status`.
    pub async fn get_status(&self) -> RcStatus {
        let state = self.state.lock();
        RcStatus {
            hosts: state.hosts.iter().map(|(h, l)| (h.clone(), *l)).collect(),
            system_load: state.system_load.iter().map(|(h, l)| (h.clone(), *l)).collect(),
            coordinators: state
                .coordinators
                .values()
                .map(|c| (c.url.clone(), c.priority, c.allocated_cpu))
                .collect(),
        }
    }

    /// Shared state handle, for the server layer to build the router on.
    pub(crate) fn state_handle(&self) -> Arc<Mutex<RcState>> {
        Arc::clone(&self.state)
    }
}

fn resource_key(host: &HostName, resource: &str) -> String {
    format!("{host}/{resource}")
}

/// One `(coordinator_url, allocated_cpu, processor_counts)` tuple that a
/// detached task will deliver to its coordinator.
type Delivery = (String, u64, HashMap<HostName, u64>);

fn snapshot_allocations(state: &RcState) -> Vec<Delivery> {
    state
        .coordinators
        .values()
        .map(|c| (c.url.clone(), c.allocated_cpu, c.processors.clone()))
        .collect()
}

/// Deliver new allocations to each coordinator from a detached task, so
/// the RPC handler that triggered the rebalance can return (and keep
/// mutating `state`) without waiting on a peer's network round trip.
fn notify_coordinators(deliveries: Vec<Delivery>) {
    for (url, allocated_cpu, processors) in deliveries {
        tokio::spawn(async move {
            let client = RpcClient::new(url.clone());
            let body = serde_json::json!({
                "allocated_cpu": allocated_cpu,
                "processors": processors,
            });
            if let Err(err) = client
                .call::<serde_json::Value, serde_json::Value>("/rc/allocation", &body)
                .await
            {
                tracing::warn!(%url, %err, "failed to deliver allocation to coordinator");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> ResourceControllerConfig {
        ResourceControllerConfig {
            hosts_path: dir.path().join("hosts.txt").display().to_string(),
            data_dir: dir.path().join("data").display().to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_setload_then_register_coordinator_allocates() {
        let dir = TempDir::new().unwrap();
        let rc = ResourceController::open(&config_in(&dir)).unwrap();

        rc.setload("host1".to_string(), 4.0).await.unwrap();
        rc.register_coordinator("http://coord:1".to_string(), 1.0).await;

        let status = rc.get_status().await;
        assert_eq!(status.coordinators[0].2, 4);
    }

    #[tokio::test]
    async fn test_unregister_unknown_coordinator_is_noop() {
        let dir = TempDir::new().unwrap();
        let rc = ResourceController::open(&config_in(&dir)).unwrap();
        rc.unregister_coordinator("http://nope").await;
        let status = rc.get_status().await;
        assert!(status.coordinators.is_empty());
    }

    #[tokio::test]
    async fn test_get_resource_build_then_release_materializes() {
        let dir = TempDir::new().unwrap();
        let rc = ResourceController::open(&config_in(&dir)).unwrap();

        let host = "host1".to_string();
        let outcome = rc.get_resource(&host, "index").await;
        assert!(matches!(outcome, ResourceOutcome::Build { .. }));

        let (acquired, details) = rc.acquire_rule(&host, "index", "index-rule").await;
        assert_eq!(acquired, RuleOutcome::Acquired);
        assert!(details.is_some());

        // A second caller sees the lock instead of being handed the build.
        let second = rc.get_resource(&host, "index").await;
        assert!(matches!(second, ResourceOutcome::Wait));

        let (locked, _) = rc.acquire_rule(&host, "index", "index-rule").await;
        assert_eq!(locked, RuleOutcome::Locked);

        rc.release_rule(&host, "index", true).await.unwrap();

        let third = rc.get_resource(&host, "index").await;
        assert!(matches!(third, ResourceOutcome::Ready { .. }));

        let (materialized, _) = rc.acquire_rule(&host, "index", "index-rule").await;
        assert_eq!(materialized, RuleOutcome::Materialized);
    }

    #[tokio::test]
    async fn test_release_failure_allows_retry() {
        let dir = TempDir::new().unwrap();
        let rc = ResourceController::open(&config_in(&dir)).unwrap();
        let host = "host1".to_string();

        rc.get_resource(&host, "index").await;
        rc.acquire_rule(&host, "index", "index-rule").await;
        rc.release_rule(&host, "index", false).await.unwrap();

        let outcome = rc.get_resource(&host, "index").await;
        assert!(matches!(outcome, ResourceOutcome::Build { .. }));
    }

    #[tokio::test]
    async fn test_request_cpus_unknown_coordinator_denied() {
        let dir = TempDir::new().unwrap();
        let rc = ResourceController::open(&config_in(&dir)).unwrap();
        let result = rc.request_cpus("http://nope", 1.0).await;
        assert!(result.is_err());
    }
}
