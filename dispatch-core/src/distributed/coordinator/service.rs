// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Async service methods implementing the Coordinator's external
//! interface: client lifecycle, task dispatch, and success/error
//! reporting.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::distributed::launcher::{logfile_path, Launcher};
use crate::distributed::protocol::CoordinatorStatus;
use crate::distributed::rpc::RpcClient;
use crate::distributed::store::AppendLog;
use crate::distributed::types::{DispatchOutcome, HostName, TaskId};

use super::state::{canonical_key, ClientRecord, CoordinatorState, PendingTask, TaskSource};

/// Configuration a coordinator needs beyond its task source.
#[derive(Clone)]
pub struct CoordinatorConfig {
    /// This coordinator's own callback URL, registered with the RC and
    /// handed to every processor so it knows where to call back.
    pub url: String,
    /// RC base URL.
    pub rc_url: String,
    /// Name used in logfile paths (`/tmp/{name}_{seq}.log`) and the
    /// success/error log filenames.
    pub name: String,
    /// Directory processor logfiles are written under.
    pub log_dir: String,
    /// Directory the success/error logs live under.
    pub data_dir: String,
    /// Initial requested priority.
    pub priority: f64,
    /// Maximum number of processors still waiting to register on a
    /// single host before `start_processor` stops launching more there
    /// (repeated launch failures, e.g. bad SSH config, shouldn't pile up
    /// unboundedly).
    pub max_ssh_errors: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9754".to_string(),
            rc_url: "http://127.0.0.1:9753".to_string(),
            name: "job".to_string(),
            log_dir: "/tmp".to_string(),
            data_dir: "./coordinator-data".to_string(),
            priority: 1.0,
            max_ssh_errors: 3,
        }
    }
}

/// A job's Coordinator: owns a [`TaskSource`], hands task IDs to
/// registered processors, and keeps the RC apprised of its CPU demand.
pub struct Coordinator {
    state: Arc<CoordinatorState>,
    config: CoordinatorConfig,
    rc: RpcClient,
    launcher: Arc<dyn Launcher>,
    success_log: AppendLog,
    error_log: AppendLog,
}

impl Coordinator {
    /// Build a coordinator around `source`, replaying its success log to
    /// rebuild the `already_done` set (so a restart doesn't redeliver
    /// tasks that already completed).
    pub fn open(
        config: CoordinatorConfig,
        source: Box<dyn TaskSource>,
        launcher: Arc<dyn Launcher>,
    ) -> crate::error::DispatchResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| crate::error::DispatchError::Persistence {
            path: config.data_dir.clone(),
            source,
        })?;

        let success_path = PathBuf::from(&config.data_dir).join(format!("{}.success.log", config.name));
        let error_path = PathBuf::from(&config.data_dir).join(format!("{}.error.log", config.name));

        let success_log = AppendLog::open_append(&success_path)?;
        // The error log truncates on start: only the current run's
        // failures matter, mirroring original_source's per-run error log.
        let error_log = AppendLog::open_truncated(&error_path)?;

        let already_done = success_log
            .read_lines()?
            .into_iter()
            .collect::<std::collections::HashSet<_>>();

        let state = Arc::new(CoordinatorState::new(source, already_done, config.priority));
        let rc = RpcClient::new(config.rc_url.clone());

        Ok(Self {
            state,
            config,
            rc,
            launcher,
            success_log,
            error_log,
        })
    }

    /// Register with the RC. Must be called before any processor calls
    /// `next()` expect CPUs to actually be allocated.
    pub async fn register_with_rc(&self) -> crate::error::DispatchResult<()> {
        let body = serde_json::json!({ "url": self.config.url, "priority": self.config.priority });
        self.rc
            .call::<serde_json::Value, serde_json::Value>("/rc/register_coordinator", &body)
            .await?;
        Ok(())
    }

    /// `register_client(host, pid, logfile)` — resolves the logfile back
    /// to a starting-slot if one exists, then records the client.
    pub async fn register_client(&self, host: HostName, url: String, logfile: Option<String>) {
        if let Some(logfile) = logfile.as_deref() {
            if let Some(seq) = parse_seq_from_logfile(logfile) {
                self.state.clear_starting(&host, seq);
            }
        }
        self.state.clients.insert(
            url.clone(),
            ClientRecord {
                host: host.clone(),
                registered_at: Utc::now(),
            },
        );

        let body = serde_json::json!({ "url": self.config.url, "host": host });
        let _ = self
            .rc
            .call::<serde_json::Value, serde_json::Value>("/rc/register_processor", &body)
            .await;
    }

    /// `unregister_client(url, done)`.
    pub async fn unregister_client(&self, url: &str, _done: bool) {
        if let Some((_, record)) = self.state.clients.remove(url) {
            let body = serde_json::json!({ "url": self.config.url, "host": record.host });
            let _ = self
                .rc
                .call::<serde_json::Value, serde_json::Value>("/rc/unregister_processor", &body)
                .await;
        }
        self.state.pending.remove(url);
        self.state.stop_clients.remove(url);
        self.maybe_finish_shutdown();
    }

    /// `next(url)` — draw a task for this processor, or signal
    /// wait/stop per spec.md §3's dispatch contract. A processor marked
    /// via `stop_client` gets `Stop` here, after its current task (if
    /// any) has already been acknowledged through `report_success`/
    /// `report_error` — it does not get torn out of `clients` until it
    /// actually calls `unregister_client`. `max_clients`, if set, also
    /// caps how many processors may keep pulling tasks at once.
    pub fn next(&self, url: &str) -> DispatchOutcome<TaskId> {
        if self.state.stop_clients.remove(url).is_some() {
            return DispatchOutcome::Stop;
        }
        if self.state.exhausted.load(std::sync::atomic::Ordering::SeqCst) {
            return DispatchOutcome::Stop;
        }
        if let Some(max) = *self.state.max_clients.lock() {
            if self.state.clients.len() as u32 > max {
                return DispatchOutcome::Stop;
            }
        }
        match self.state.draw_next() {
            Some(task) => {
                self.state.pending.insert(
                    canonical_key(&task),
                    PendingTask {
                        client_url: url.to_string(),
                        task: task.clone(),
                    },
                );
                DispatchOutcome::Ready(task)
            }
            None => {
                self.maybe_finish_shutdown();
                DispatchOutcome::Stop
            }
        }
    }

    /// `report_success(url, id)` — acknowledge completion and, per the
    /// piggyback convention, hand back the next task in the same call.
    pub fn report_success(&self, url: &str, id: TaskId) -> DispatchOutcome<TaskId> {
        self.state.pending.remove(&canonical_key(&id));
        if self.state.mark_done(&id) {
            let _ = self.success_log.append_line(&canonical_key(&id));
        }
        self.next(url)
    }

    /// `report_error(url, id, message)` — the `id: None` sentinel (no
    /// previous task to report against, e.g. on a processor's very first
    /// call) is silently ignored rather than logged as a failure.
    pub fn report_error(&self, url: &str, id: Option<TaskId>, message: &str) {
        match id {
            None => {}
            Some(task) => {
                self.state.pending.remove(&canonical_key(&task));
                let line = format!("{} :: {} :: {}", url, canonical_key(&task), message);
                let _ = self.error_log.append_line(&line);
            }
        }
    }

    /// `set_max_clients(n)`.
    pub fn set_max_clients(&self, max_clients: Option<u32>) {
        *self.state.max_clients.lock() = max_clients;
    }

    /// `stop_client(url)` — marks this processor to stop gracefully.
    /// Bookkeeping (`clients`, RC processor count) is only torn down once
    /// the processor itself calls `unregister_client`, so a task it is
    /// mid-flight on is still acknowledged normally; the next `next()`
    /// call from this URL is simply answered `Stop`.
    pub async fn stop_client(&self, url: &str) {
        self.state.stop_clients.insert(url.to_string());
    }

    /// `get_status`.
    pub fn get_status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            clients: self.state.clients.iter().map(|e| e.key().clone()).collect(),
            pending: self.state.pending.len(),
            completed: self.state.completed_count(),
            exhausted: self.state.exhausted.load(std::sync::atomic::Ordering::SeqCst),
        }
    }

    /// Launch a processor on `host` via the configured [`Launcher`],
    /// tracking the starting slot so `register_client` can resolve it.
    /// Declines (without launching) once `max_clients` is already met,
    /// or once `host` has more unresolved starting slots than
    /// `max_ssh_errors` — a symptom of a host whose launches keep failing
    /// before the processor ever calls back `register_client`.
    pub async fn start_processor(&self, host: &HostName) -> crate::error::DispatchResult<()> {
        if let Some(max) = *self.state.max_clients.lock() {
            if self.state.clients.len() as u32 >= max {
                tracing::debug!(%host, "start_processor: max_clients reached, declining");
                return Ok(());
            }
        }
        let starting_on_host = self
            .state
            .clients_starting
            .lock()
            .get(host)
            .map(|seqs| seqs.len() as u32)
            .unwrap_or(0);
        if starting_on_host > self.config.max_ssh_errors {
            tracing::warn!(%host, starting_on_host, "start_processor: too many unresolved starts, declining");
            return Ok(());
        }

        let now = Utc::now();
        let seq = self.state.next_sequence(host, now);
        let logfile = logfile_path(&self.config.log_dir, &self.config.name, seq);
        self.launcher.launch(host, &self.config.url, &logfile).await
    }

    /// Notify the shutdown signal once the iterator is exhausted and no
    /// clients remain pending or registered — the CLI driver awaits this
    /// to know when it can exit the coordinator process.
    fn maybe_finish_shutdown(&self) {
        let exhausted = self.state.exhausted.load(std::sync::atomic::Ordering::SeqCst);
        if exhausted && self.state.pending.is_empty() && self.state.clients.is_empty() {
            self.state.shutdown.notify_waiters();
        }
    }

    /// Shared shutdown signal, for the driver to await.
    pub fn shutdown_signal(&self) -> Arc<tokio::sync::Notify> {
        Arc::clone(&self.state.shutdown)
    }
}

fn parse_seq_from_logfile(logfile: &str) -> Option<u64> {
    let stem = logfile.rsplit('/').next()?.strip_suffix(".log")?;
    stem.rsplit('_').next()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::launcher::Launcher;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NullLauncher;

    #[async_trait]
    impl Launcher for NullLauncher {
        async fn launch(&self, _host: &HostName, _coordinator_url: &str, _logfile: &str) -> crate::error::DispatchResult<()> {
            Ok(())
        }
    }

    fn source(tasks: Vec<u32>) -> Box<dyn TaskSource> {
        Box::new(tasks.into_iter().map(|t| serde_json::json!(t)))
    }

    fn coordinator_in(dir: &TempDir, tasks: Vec<u32>) -> Coordinator {
        let config = CoordinatorConfig {
            data_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        Coordinator::open(config, source(tasks), Arc::new(NullLauncher)).unwrap()
    }

    #[test]
    fn test_next_dispatches_then_stops() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![1, 2]);

        assert!(matches!(coordinator.next("http://p1"), DispatchOutcome::Ready(_)));
        assert!(matches!(coordinator.next("http://p1"), DispatchOutcome::Ready(_)));
        assert!(matches!(coordinator.next("http://p1"), DispatchOutcome::Stop));
    }

    #[test]
    fn test_report_success_piggybacks_next() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![1, 2]);

        let first = coordinator.next("http://p1");
        let task = match first {
            DispatchOutcome::Ready(t) => t,
            _ => panic!("expected a task"),
        };

        let outcome = coordinator.report_success("http://p1", task);
        assert!(matches!(outcome, DispatchOutcome::Ready(_)));
        assert_eq!(coordinator.get_status().completed, 1);
    }

    #[test]
    fn test_report_error_none_sentinel_ignored() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![1]);
        coordinator.report_error("http://p1", None, "no previous task");
        assert!(coordinator.error_log.read_lines().unwrap().is_empty());
    }

    #[test]
    fn test_restart_skips_already_done_tasks() {
        let dir = TempDir::new().unwrap();
        {
            let coordinator = coordinator_in(&dir, vec![1, 2]);
            let task = match coordinator.next("http://p1") {
                DispatchOutcome::Ready(t) => t,
                _ => panic!(),
            };
            coordinator.report_success("http://p1", task);
        }

        let coordinator = coordinator_in(&dir, vec![1, 2]);
        let next = coordinator.next("http://p1");
        assert_eq!(next_value(&next), Some(serde_json::json!(2)));
    }

    fn next_value(outcome: &DispatchOutcome<TaskId>) -> Option<TaskId> {
        match outcome {
            DispatchOutcome::Ready(v) => Some(v.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_seq_from_logfile() {
        assert_eq!(parse_seq_from_logfile("/tmp/job1_7.log"), Some(7));
        assert_eq!(parse_seq_from_logfile("garbage"), None);
    }

    #[tokio::test]
    async fn test_stop_client_defers_until_next_call() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![1, 2]);
        let url = "http://p1";

        let task = match coordinator.next(url) {
            DispatchOutcome::Ready(t) => t,
            _ => panic!("expected a task"),
        };

        // Marking for stop doesn't retroactively fail the in-flight task.
        coordinator.stop_client(url).await;
        let outcome = coordinator.report_success(url, task);
        assert!(matches!(outcome, DispatchOutcome::Stop));
    }

    #[test]
    fn test_max_clients_throttles_next() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![1, 2]);
        coordinator.set_max_clients(Some(1));

        coordinator.state.clients.insert(
            "http://p1".to_string(),
            ClientRecord {
                host: "h1".to_string(),
                registered_at: Utc::now(),
            },
        );
        coordinator.state.clients.insert(
            "http://p2".to_string(),
            ClientRecord {
                host: "h1".to_string(),
                registered_at: Utc::now(),
            },
        );

        assert!(matches!(coordinator.next("http://p1"), DispatchOutcome::Stop));
    }

    #[tokio::test]
    async fn test_start_processor_declines_past_max_clients() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir, vec![]);
        coordinator.set_max_clients(Some(0));

        coordinator.start_processor(&"h1".to_string()).await.unwrap();
        assert!(coordinator.state.clients_starting.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_processor_declines_past_max_ssh_errors() {
        let dir = TempDir::new().unwrap();
        let config = CoordinatorConfig {
            data_dir: dir.path().display().to_string(),
            max_ssh_errors: 1,
            ..Default::default()
        };
        let coordinator = Coordinator::open(config, source(vec![]), Arc::new(NullLauncher)).unwrap();
        let host = "h1".to_string();

        coordinator.start_processor(&host).await.unwrap();
        coordinator.start_processor(&host).await.unwrap();
        let starting = coordinator.state.clients_starting.lock();
        assert_eq!(starting.get(&host).map(|s| s.len()), Some(2));

        drop(starting);
        coordinator.start_processor(&host).await.unwrap();
        let starting = coordinator.state.clients_starting.lock();
        assert_eq!(starting.get(&host).map(|s| s.len()), Some(2));
    }
}
