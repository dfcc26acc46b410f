// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Coordinator state: the user task iterator, the pending/already-done
//! bookkeeping that makes `report_success` idempotent against duplicate
//! delivery, and per-client lifecycle tracking.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::distributed::types::{HostName, TaskId};

/// Anything that can hand out task IDs one at a time. A blanket impl
/// below covers any `Iterator<Item = TaskId> + Send`, so callers
/// typically just pass a boxed iterator rather than implementing this
/// directly.
pub trait TaskSource: Send {
    /// Draw the next task ID, or `None` if the source is exhausted.
    fn next_task(&mut self) -> Option<TaskId>;
}

impl<I: Iterator<Item = TaskId> + Send> TaskSource for I {
    fn next_task(&mut self) -> Option<TaskId> {
        Iterator::next(self)
    }
}

/// Per-client (processor) bookkeeping. Kept in a `DashMap` because each
/// client's record is updated independently of the others — unlike the
/// RC, there's no cross-client invariant that needs one serializing lock.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Host this processor runs on.
    pub host: HostName,
    /// When it registered.
    pub registered_at: DateTime<Utc>,
}

/// One task currently dispatched but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct PendingTask {
    /// Client URL it was sent to.
    pub client_url: String,
    /// The task payload itself (kept so it can be logged on error).
    pub task: TaskId,
}

/// All coordinator state. The task-drawing path (`task_source`,
/// `already_done`, `exhausted`) is behind a `Mutex` because `next()` and
/// `report_success()` must treat "pull the next task" and "mark the
/// current one done" as one atomic step to stay idempotent against
/// redelivery; `clients`/`pending` are independent per-key maps and use
/// `DashMap` instead.
pub struct CoordinatorState {
    /// Registered processor URL -> record.
    pub clients: DashMap<String, ClientRecord>,
    /// Processor URLs asked to stop gracefully via `stop_client`: `next()`
    /// answers `Stop` to these without tearing down their registration
    /// immediately, so a client mid-task still gets acknowledged through
    /// `report_success`/`report_error` first.
    pub stop_clients: DashSet<String>,
    /// Canonical task key -> pending dispatch record.
    pub pending: DashMap<String, PendingTask>,
    /// Host -> (sequence -> start time) for processors the launcher has
    /// been asked to start but that haven't called `register_client` yet.
    pub clients_starting: Mutex<HashMap<HostName, HashMap<u64, DateTime<Utc>>>>,
    next_seq: AtomicU64,
    inner: Mutex<TaskDrawState>,
    /// Whether the user iterator has been fully drained.
    pub exhausted: AtomicBool,
    /// Maximum simultaneous clients, if bounded.
    pub max_clients: Mutex<Option<u32>>,
    /// Current requested priority.
    pub priority: Mutex<f64>,
    /// Most recent CPU allocation delivered by the RC.
    pub allocated_cpu: AtomicU64,
    /// Signaled once the coordinator should exit (all clients drained
    /// after exhaustion).
    pub shutdown: std::sync::Arc<tokio::sync::Notify>,
}

struct TaskDrawState {
    source: Box<dyn TaskSource>,
    already_done: HashSet<String>,
    completed_count: usize,
}

impl CoordinatorState {
    /// Build fresh state around a task source and any already-completed
    /// task keys recovered from a prior run's success log.
    pub fn new(source: Box<dyn TaskSource>, already_done: HashSet<String>, priority: f64) -> Self {
        Self {
            clients: DashMap::new(),
            stop_clients: DashSet::new(),
            pending: DashMap::new(),
            clients_starting: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            inner: Mutex::new(TaskDrawState {
                source,
                already_done,
                completed_count: 0,
            }),
            exhausted: AtomicBool::new(false),
            max_clients: Mutex::new(None),
            priority: Mutex::new(priority),
            allocated_cpu: AtomicU64::new(0),
            shutdown: std::sync::Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Allocate the next starting-client sequence number for `host`.
    pub fn next_sequence(&self, host: &HostName, now: DateTime<Utc>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.clients_starting
            .lock()
            .entry(host.clone())
            .or_default()
            .insert(seq, now);
        seq
    }

    /// Resolve and clear a starting-slot by its logfile's embedded
    /// sequence number (see `launcher::logfile_path`).
    pub fn clear_starting(&self, host: &HostName, seq: u64) {
        let mut starting = self.clients_starting.lock();
        if let Some(seqs) = starting.get_mut(host) {
            seqs.remove(&seq);
            if seqs.is_empty() {
                starting.remove(host);
            }
        }
    }

    /// Pull the next task, skipping any key already recorded as done
    /// (defends against a success log replay leaving the iterator
    /// slightly ahead of `already_done` after a crash).
    pub fn draw_next(&self) -> Option<TaskId> {
        let mut inner = self.inner.lock();
        loop {
            match inner.source.next_task() {
                None => {
                    self.exhausted.store(true, Ordering::SeqCst);
                    return None;
                }
                Some(task) => {
                    let key = canonical_key(&task);
                    if inner.already_done.contains(&key) {
                        continue;
                    }
                    return Some(task);
                }
            }
        }
    }

    /// Record a task as completed. Returns `true` if this is the first
    /// time it has been marked done (the caller should append it to the
    /// success log); `false` if it was already recorded, which is the
    /// tolerated double-acknowledgement case from the design notes.
    pub fn mark_done(&self, task: &TaskId) -> bool {
        let key = canonical_key(task);
        let mut inner = self.inner.lock();
        let first = inner.already_done.insert(key);
        if first {
            inner.completed_count += 1;
        }
        first
    }

    /// Number of tasks marked done so far.
    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed_count
    }
}

/// A stable string key for a task ID, used to index `pending` and
/// `already_done` since `TaskId` (arbitrary JSON) isn't `Hash`.
pub fn canonical_key(task: &TaskId) -> String {
    serde_json::to_string(task).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(tasks: Vec<u32>) -> Box<dyn TaskSource> {
        Box::new(tasks.into_iter().map(|t| serde_json::json!(t)))
    }

    #[test]
    fn test_draw_next_skips_already_done() {
        let mut done = HashSet::new();
        done.insert(canonical_key(&serde_json::json!(1)));

        let state = CoordinatorState::new(source(vec![1, 2, 3]), done, 1.0);
        assert_eq!(state.draw_next(), Some(serde_json::json!(2)));
        assert_eq!(state.draw_next(), Some(serde_json::json!(3)));
        assert_eq!(state.draw_next(), None);
        assert!(state.exhausted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mark_done_idempotent() {
        let state = CoordinatorState::new(source(vec![1]), HashSet::new(), 1.0);
        let task = serde_json::json!(1);
        assert!(state.mark_done(&task));
        assert!(!state.mark_done(&task));
        assert_eq!(state.completed_count(), 1);
    }

    #[test]
    fn test_starting_slot_lifecycle() {
        let state = CoordinatorState::new(source(vec![]), HashSet::new(), 1.0);
        let host = "host1".to_string();
        let seq = state.next_sequence(&host, Utc::now());
        assert!(state.clients_starting.lock().contains_key(&host));
        state.clear_starting(&host, seq);
        assert!(!state.clients_starting.lock().contains_key(&host));
    }
}
