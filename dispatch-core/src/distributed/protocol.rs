// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire types for every RPC method in the external interface: one struct
//! pair (request/response) per route, all `Serialize + Deserialize`, JSON
//! over HTTP via `axum`/`reqwest`.

use serde::{Deserialize, Serialize};

use super::types::{DispatchOutcome, HostName, RuleOutcome, TaskId};

// ---------------------------------------------------------------------
// Resource Controller
// ---------------------------------------------------------------------

/// `register_coordinator(url, priority)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCoordinatorRequest {
    /// Callback URL of the registering coordinator.
    pub url: String,
    /// Requested priority.
    pub priority: f64,
}

/// Response to [`RegisterCoordinatorRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCoordinatorResponse {
    /// Echoes the registered URL, for client-side confirmation.
    pub url: String,
}

/// `unregister_coordinator(url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterCoordinatorRequest {
    /// Coordinator URL.
    pub url: String,
}

/// `request_cpus(url, priority)` — a coordinator asking for a priority
/// change, returning its newly allocated CPU quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCpusRequest {
    /// Coordinator URL.
    pub url: String,
    /// New requested priority.
    pub priority: f64,
}

/// Response to [`RequestCpusRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCpusResponse {
    /// CPUs now allocated to this coordinator.
    pub allocated_cpu: u64,
}

/// `register_processor(url, host)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProcessorRequest {
    /// Coordinator URL the processor belongs to.
    pub url: String,
    /// Host the processor is running on.
    pub host: HostName,
}

/// `unregister_processor(url, host)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterProcessorRequest {
    /// Coordinator URL the processor belongs to.
    pub url: String,
    /// Host the processor was running on.
    pub host: HostName,
}

/// `report_load(host, load)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportLoadRequest {
    /// Host reporting its load.
    pub host: HostName,
    /// 1-minute load average.
    pub load: f64,
}

/// Response to [`ReportLoadRequest`]. spec.md §4.1/§8: "Return `true` if
/// host is not overloaded, else `false`", based on `currentLoad ≥
/// maxLoad + overloadMargin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReportLoadResponse {
    /// `true` if the host is not overloaded.
    pub not_overloaded: bool,
}

/// `get_resource(host, resource)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResourceRequest {
    /// Host the resource is needed on.
    pub host: HostName,
    /// Resource name.
    pub resource: String,
}

/// `acquire_rule(host, resource, rule)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRuleRequest {
    /// Host.
    pub host: HostName,
    /// Resource name.
    pub resource: String,
    /// Rule to run if the lock is free.
    pub rule: String,
}

/// Response to [`AcquireRuleRequest`]. When `outcome` is
/// [`RuleOutcome::Acquired`], `rule` carries the rule tuple (path and
/// build command) the caller needs to materialize the resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRuleResponse {
    /// Outcome of the acquisition attempt.
    pub outcome: RuleOutcome,
    /// The rule's destination path and build command, present only when
    /// `outcome` is `Acquired`.
    pub rule: Option<RuleDetails>,
}

/// The part of a [`RuleEntry`](super::types::RuleEntry) a caller needs to
/// actually run a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDetails {
    /// Local path the resource should be materialized at.
    pub path: String,
    /// Build command; `{}` is replaced with `path`.
    pub acquire_command: String,
}

/// `release_rule(host, resource, succeeded)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRuleRequest {
    /// Host.
    pub host: HostName,
    /// Resource name.
    pub resource: String,
    /// Whether the build succeeded; on failure the lock is simply
    /// released without a resource record, so a future caller can retry.
    pub succeeded: bool,
}

/// `setrule(name, path, acquire_command, release_command)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRuleRequest {
    /// Rule name.
    pub name: String,
    /// Local destination path this rule materializes.
    pub path: String,
    /// Build command; `{}` is replaced with `path`.
    pub acquire_command: String,
    /// Teardown command, if any.
    pub release_command: Option<String>,
}

/// `delrule(name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelRuleRequest {
    /// Rule name.
    pub name: String,
}

/// `setload(host, max_load)` — registers or updates a host's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLoadRequest {
    /// Host name.
    pub host: HostName,
    /// New maximum CPU slots.
    pub max_load: f64,
}

/// Snapshot returned by `get_status` on the RC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcStatus {
    /// Registered hosts and their max load.
    pub hosts: Vec<(HostName, f64)>,
    /// Current system load per host.
    pub system_load: Vec<(HostName, f64)>,
    /// Registered coordinators: url, priority, allocated cpu.
    pub coordinators: Vec<(String, f64, u64)>,
}

// ---------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------

/// `register_client(host, pid, logfile)` — a newly started processor
/// announcing itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    /// Host the processor is running on.
    pub host: HostName,
    /// Callback URL of the processor.
    pub url: String,
    /// Logfile path the launcher started this processor with; used to
    /// resolve the `(host, clientSeq)` pair in `clients_starting`.
    pub logfile: Option<String>,
}

/// `unregister_client(url, done)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterClientRequest {
    /// Processor URL.
    pub url: String,
    /// Whether the user iterator is exhausted (graceful) or this is an
    /// early disconnect.
    pub done: bool,
}

/// `next(url)` — pull the next task ID for a given processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextRequest {
    /// Processor URL.
    pub url: String,
}

/// Response to [`NextRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextResponse {
    /// Dispatch outcome carrying the next task ID, if any.
    pub outcome: DispatchOutcome<TaskId>,
}

/// `report_success(url, id)` — acknowledge a completed task, piggybacked
/// with the next task ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSuccessRequest {
    /// Processor URL.
    pub url: String,
    /// Task ID that succeeded.
    pub id: TaskId,
}

/// `report_error(url, id, message)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportErrorRequest {
    /// Processor URL.
    pub url: String,
    /// Task ID that failed, or `None` for the "no previous task"
    /// sentinel, which is silently ignored (see design notes).
    pub id: Option<TaskId>,
    /// Error message.
    pub message: String,
}

/// `set_max_clients(n)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMaxClientsRequest {
    /// New maximum number of clients, or `None` for unbounded.
    pub max_clients: Option<u32>,
}

/// `stop_client(url)` — ask one processor to stop after its current
/// task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopClientRequest {
    /// Processor URL to stop.
    pub url: String,
}

/// Snapshot returned by `get_status` on the Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Registered client (processor) URLs.
    pub clients: Vec<String>,
    /// Number of tasks dispatched but not yet acknowledged.
    pub pending: usize,
    /// Number of tasks completed so far.
    pub completed: usize,
    /// Whether the user iterator is exhausted.
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_response_roundtrip() {
        let resp = NextResponse {
            outcome: DispatchOutcome::Ready(serde_json::json!("task-42")),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: NextResponse = serde_json::from_str(&json).unwrap();
        assert!(back.outcome.is_ready());
    }

    #[test]
    fn test_report_error_sentinel_is_none() {
        let req = ReportErrorRequest {
            url: "http://worker:1".into(),
            id: None,
            message: "no previous task".into(),
        };
        assert!(req.id.is_none());
    }
}
