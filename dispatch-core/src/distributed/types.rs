// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared data model: hosts, coordinator records, resource/rule/lock
//! entries, and the typed outcomes that replace the sentinel-valued RPC
//! returns described in the design notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A worker machine's name, as it appears in the hosts file and in every
/// RPC that references a host.
pub type HostName = String;

/// Opaque task identifier pulled from a coordinator's user iterator.
/// Modeled as JSON so a coordinator can dispatch any serializable work
/// item without this crate knowing its shape.
pub type TaskId = serde_json::Value;

/// One line of the RC's persisted hosts file: `host maxLoad`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    /// Host name.
    pub name: HostName,
    /// Maximum CPU slots this host offers the fleet.
    pub max_load: f64,
}

/// Per-coordinator bookkeeping the RC keeps while a coordinator is
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorInfo {
    /// URL the RC calls back on (e.g. to deliver assigned CPUs).
    pub url: String,
    /// Current requested priority (shares of the fleet CPU pool).
    pub priority: f64,
    /// CPUs most recently allocated to this coordinator by
    /// [`crate::distributed::rc::state::assign_load`].
    pub allocated_cpu: u64,
    /// Per-host processor counts currently assigned to this coordinator.
    pub processors: HashMap<HostName, u64>,
    /// When this coordinator registered.
    pub registered_at: DateTime<Utc>,
}

impl CoordinatorInfo {
    /// Total processors currently assigned across all hosts.
    pub fn total_processors(&self) -> u64 {
        self.processors.values().sum()
    }
}

/// One entry in the RC's in-memory lock table, keyed by `(host,
/// resource)`. Presence of an entry means the resource is currently being
/// built; there is no "materialized" variant stored here. Once a build
/// finishes, the entry is removed and a [`ResourceEntry`] is written to
/// the persisted `resources` store instead, so `locks` and `resources`
/// never simultaneously hold the same key (spec.md §8 Testable Property).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    /// Name of the rule materializing this resource.
    pub rule: String,
    /// When the lock was acquired; used for liveness/TTL diagnostics (see
    /// design notes — the RC does not currently expire stale locks
    /// automatically, matching spec.md's explicit non-goal).
    pub updated_at: DateTime<Utc>,
}

/// A persisted build rule: the destination path it materializes a
/// resource at, plus the shell command (with one `{}` substitution slot
/// for that path) that performs the build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Local path this rule materializes its resource at.
    pub path: String,
    /// Command used to build the resource; `{}` is replaced with `path`.
    pub acquire_command: String,
    /// Command used to release/tear down the resource, if any.
    pub release_command: Option<String>,
}

/// A persisted resource record: which rule built it, on which host, and
/// the local path it lives at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Rule that materialized this resource.
    pub rule: String,
    /// Host the resource lives on.
    pub host: HostName,
    /// Local path the resource was materialized at.
    pub path: String,
}

/// Outcome of a dispatch-shaped RPC call that historically used the
/// three-valued `false`/`true`/payload sentinel convention. `Stop` and
/// `Wait` replace the boolean sentinels; `Ready` carries the real payload.
///
/// See design notes: the sentinel convention is fragile because a
/// legitimate payload that happens to be `false` (or `true`) is
/// indistinguishable from the control signal. This enum makes the two
/// cases structurally different so they can't be confused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome<T> {
    /// No more work; the caller should stop calling.
    Stop,
    /// No work available right now; the caller should retry later.
    Wait,
    /// A real payload is available.
    Ready(T),
}

impl<T> DispatchOutcome<T> {
    /// True if this outcome carries a payload.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// True if the caller should stop retrying.
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Outcome of a named-resource acquisition call (`get_resource`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// The resource is materialized; open this local path.
    Ready {
        /// Local path the resource lives at.
        path: String,
    },
    /// The resource is still being built; retry later.
    Wait,
    /// No one holds the lock; the caller should call `acquire_rule` and,
    /// if it wins the lock, build the resource itself.
    Build {
        /// Rule to run.
        rule: String,
    },
}

/// Outcome of acquiring a build-rule lock directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    /// Lock acquired; caller must build and release.
    Acquired,
    /// Someone else holds the lock; retry later.
    Locked,
    /// Already materialized; nothing to do.
    Materialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_outcome_predicates() {
        let ready: DispatchOutcome<u32> = DispatchOutcome::Ready(42);
        assert!(ready.is_ready());
        assert!(!ready.is_stop());

        let stop: DispatchOutcome<u32> = DispatchOutcome::Stop;
        assert!(stop.is_stop());
        assert!(!stop.is_ready());
    }

    #[test]
    fn test_coordinator_info_total_processors() {
        let mut processors = HashMap::new();
        processors.insert("host1".to_string(), 3);
        processors.insert("host2".to_string(), 5);

        let info = CoordinatorInfo {
            url: "http://host:1".into(),
            priority: 1.0,
            allocated_cpu: 8,
            processors,
            registered_at: Utc::now(),
        };

        assert_eq!(info.total_processors(), 8);
    }

    #[test]
    fn test_dispatch_outcome_serde_roundtrip() {
        let outcome: DispatchOutcome<String> = DispatchOutcome::Ready("task-1".to_string());
        let json = serde_json::to_string(&outcome).unwrap();
        let back: DispatchOutcome<String> = serde_json::from_str(&json).unwrap();
        assert!(back.is_ready());
    }
}
