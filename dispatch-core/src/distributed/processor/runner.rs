// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Processor: a remote worker that pulls task IDs from its
//! coordinator, runs them through a user-supplied handler, and reports
//! outcomes back. Also owns periodic load reporting to the RC and the
//! overload/error-streak self-shutdown policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;

use crate::distributed::loadprobe::LoadProbe;
use crate::distributed::protocol::ReportLoadResponse;
use crate::distributed::rpc::RpcClient;
use crate::distributed::types::{DispatchOutcome, HostName, ResourceOutcome, RuleOutcome, TaskId};
use crate::error::{DispatchError, DispatchResult};

/// How a caller intends to use a resource's local file once it's ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOpenMode {
    Read,
    Write,
    Append,
}

/// A plain local file handle to a materialized resource. Per spec.md
/// §4.3's `openResource` pseudocode, materialization (acquiring the
/// rule, running its build command, releasing the rule) happens inside
/// `open_resource` itself — there is no externally visible "still
/// building" state in this type's public contract, and no lock for a
/// caller to leak by forgetting to release it.
pub struct ResourceHandle {
    pub file: File,
}

async fn open_with_mode(path: &str, mode: ResourceOpenMode) -> DispatchResult<File> {
    let mut options = tokio::fs::OpenOptions::new();
    match mode {
        ResourceOpenMode::Read => {
            options.read(true);
        }
        ResourceOpenMode::Write => {
            options.write(true).create(true).truncate(true);
        }
        ResourceOpenMode::Append => {
            options.write(true).create(true).append(true);
        }
    }
    options.open(path).await.map_err(|source| DispatchError::Persistence {
        path: path.to_string(),
        source,
    })
}

/// User-supplied task execution logic.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task to completion, or return an error.
    async fn handle(&self, task: &TaskId) -> anyhow::Result<()>;
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// This processor's own callback URL.
    pub url: String,
    /// Coordinator base URL.
    pub coordinator_url: String,
    /// RC base URL, for load reporting and resource acquisition.
    pub rc_url: String,
    /// Host this processor runs on.
    pub host: HostName,
    /// How often to poll when the coordinator says WAIT.
    pub wait_interval: Duration,
    /// How often to sample and report load to the RC.
    pub load_report_interval: Duration,
    /// Consecutive overload samples before self-shutdown.
    pub overload_max: u32,
    /// Consecutive task errors before self-shutdown.
    pub max_errors_in_a_row: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9755".to_string(),
            coordinator_url: "http://127.0.0.1:9754".to_string(),
            rc_url: "http://127.0.0.1:9753".to_string(),
            host: "localhost".to_string(),
            wait_interval: Duration::from_secs(5),
            load_report_interval: Duration::from_secs(30),
            overload_max: 3,
            max_errors_in_a_row: 5,
        }
    }
}

/// A running processor: the task-pulling/executing loop plus the
/// ancillary load-reporting and resource-acquisition helpers.
pub struct Processor {
    config: ProcessorConfig,
    coordinator: RpcClient,
    rc: RpcClient,
    handler: std::sync::Arc<dyn TaskHandler>,
    load_probe: std::sync::Arc<dyn LoadProbe>,
    overload_count: AtomicU32,
    error_streak: AtomicU32,
    overloaded: std::sync::atomic::AtomicBool,
}

impl Processor {
    /// Build a processor around a handler and load probe.
    pub fn new(
        config: ProcessorConfig,
        handler: std::sync::Arc<dyn TaskHandler>,
        load_probe: std::sync::Arc<dyn LoadProbe>,
    ) -> Self {
        let coordinator = RpcClient::new(config.coordinator_url.clone());
        let rc = RpcClient::new(config.rc_url.clone());
        Self {
            config,
            coordinator,
            rc,
            handler,
            load_probe,
            overload_count: AtomicU32::new(0),
            overloaded: std::sync::atomic::AtomicBool::new(false),
            error_streak: AtomicU32::new(0),
        }
    }

    /// Announce this processor to its coordinator.
    pub async fn register(&self) -> DispatchResult<()> {
        let body = serde_json::json!({
            "host": self.config.host,
            "url": self.config.url,
            "logfile": std::env::var("DISPATCH_LOGFILE").ok(),
        });
        self.coordinator
            .call::<serde_json::Value, serde_json::Value>("/coordinator/register_client", &body)
            .await?;
        Ok(())
    }

    /// Pull one task, or `None` if the coordinator said STOP.
    async fn pull_next(&self) -> DispatchResult<Option<TaskId>> {
        let body = serde_json::json!({ "url": self.config.url });
        loop {
            let resp: crate::distributed::protocol::NextResponse = self
                .coordinator
                .call("/coordinator/next", &body)
                .await?;
            match resp.outcome {
                DispatchOutcome::Stop => return Ok(None),
                DispatchOutcome::Ready(task) => return Ok(Some(task)),
                DispatchOutcome::Wait => {
                    tokio::time::sleep(self.config.wait_interval).await;
                }
            }
        }
    }

    /// Acknowledge success and pull the piggybacked next task.
    async fn ack_success(&self, id: TaskId) -> DispatchResult<Option<TaskId>> {
        let body = serde_json::json!({ "url": self.config.url, "id": id });
        loop {
            let resp: crate::distributed::protocol::NextResponse = self
                .coordinator
                .call("/coordinator/report_success", &body)
                .await?;
            match resp.outcome {
                DispatchOutcome::Stop => return Ok(None),
                DispatchOutcome::Ready(task) => return Ok(Some(task)),
                DispatchOutcome::Wait => {
                    tokio::time::sleep(self.config.wait_interval).await;
                }
            }
        }
    }

    async fn ack_error(&self, id: Option<TaskId>, message: &str) {
        let body = serde_json::json!({ "url": self.config.url, "id": id, "message": message });
        if let Err(err) = self
            .coordinator
            .call::<serde_json::Value, serde_json::Value>("/coordinator/report_error", &body)
            .await
        {
            tracing::warn!(%err, "failed to report task error to coordinator");
        }
    }

    /// Sample load and report it to the RC, returning whether this
    /// sample counts as overloaded. The RC, not this processor, decides
    /// what "overloaded" means (spec.md §4.1/§8: `currentLoad ≥ maxLoad
    /// + overloadMargin`, computed server-side from data this processor
    /// doesn't have) — this just relays the RC's verdict.
    async fn report_load(&self) -> bool {
        match self.load_probe.sample() {
            Ok(load) => {
                let body = serde_json::json!({ "host": self.config.host, "load": load });
                match self
                    .rc
                    .call::<serde_json::Value, ReportLoadResponse>("/rc/report_load", &body)
                    .await
                {
                    Ok(resp) => !resp.not_overloaded,
                    Err(err) => {
                        tracing::warn!(%err, "failed to report load to RC");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to sample load");
                false
            }
        }
    }

    /// Open a named resource on this processor's host, following the
    /// ready/wait/build protocol in spec.md §4.1/§4.3 until it resolves
    /// to a local file. Materialization (acquiring the rule, running its
    /// build command, releasing the rule) happens inside this loop, the
    /// same way spec.md §4.3's `openResource` pseudocode folds it into a
    /// single call rather than handing the caller a separate
    /// still-building handle.
    pub async fn open_resource(&self, resource: &str, mode: ResourceOpenMode) -> DispatchResult<ResourceHandle> {
        loop {
            let body = serde_json::json!({ "host": self.config.host, "resource": resource });
            let outcome: ResourceOutcome = self.rc.call("/rc/get_resource", &body).await?;
            match outcome {
                ResourceOutcome::Ready { path } => {
                    let file = open_with_mode(&path, mode).await?;
                    return Ok(ResourceHandle { file });
                }
                ResourceOutcome::Wait => {
                    tokio::time::sleep(self.config.wait_interval).await;
                }
                ResourceOutcome::Build { rule } => {
                    self.materialize(resource, &rule).await?;
                }
            }
        }
    }

    /// Acquire the build lock for `resource` (if still free), run the
    /// rule's build command, and release the lock. A no-op if another
    /// caller already holds the lock or already materialized it; the
    /// outer `open_resource` loop simply retries `get_resource`
    /// afterward either way.
    async fn materialize(&self, resource: &str, rule: &str) -> DispatchResult<()> {
        let body = serde_json::json!({ "host": self.config.host, "resource": resource, "rule": rule });
        let resp: crate::distributed::protocol::AcquireRuleResponse =
            self.rc.call("/rc/acquire_rule", &body).await?;

        let details = match (resp.outcome, resp.rule) {
            (RuleOutcome::Acquired, Some(details)) => details,
            (RuleOutcome::Locked, _) => {
                tokio::time::sleep(self.config.wait_interval).await;
                return Ok(());
            }
            (RuleOutcome::Materialized, _) | (RuleOutcome::Acquired, None) => return Ok(()),
        };

        let command = details.acquire_command.replace("{}", &details.path);
        let result = tokio::process::Command::new("sh").arg("-c").arg(&command).status().await;
        let succeeded = matches!(result, Ok(status) if status.success());
        if !succeeded {
            if let Err(err) = result {
                tracing::warn!(resource, rule, %err, "failed to run rule build command");
            } else {
                tracing::warn!(resource, rule, "rule build command exited with failure");
            }
        }

        let release_body = serde_json::json!({ "host": self.config.host, "resource": resource, "succeeded": succeeded });
        self.rc
            .call::<serde_json::Value, serde_json::Value>("/rc/release_rule", &release_body)
            .await?;

        if !succeeded {
            return Err(DispatchError::RuleFailed {
                rule: rule.to_string(),
                resource: resource.to_string(),
                host: self.config.host.clone(),
                source: anyhow::anyhow!("build command failed: {command}"),
            });
        }
        Ok(())
    }

    /// Run the main processor loop to completion: pull tasks, execute
    /// them, report outcomes, and self-shut-down on sustained overload
    /// or sustained task failure. Spawns a background task that samples
    /// load on `load_report_interval` and reports it to the RC; a
    /// sustained overload trips the shared flag the main loop checks
    /// between tasks. Returns once the coordinator says STOP or a
    /// shutdown condition trips.
    pub async fn run(self: std::sync::Arc<Self>) -> DispatchResult<()> {
        self.register().await?;

        let load_reporter = {
            let processor = std::sync::Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(processor.config.load_report_interval);
                loop {
                    ticker.tick().await;
                    let overloaded = processor.report_load().await;
                    if processor.record_overload(overloaded) {
                        tracing::warn!("sustained overload, flagging processor for shutdown");
                        processor.overloaded.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            })
        };

        let mut task = self.pull_next().await?;
        while let Some(current) = task {
            if self.overloaded.load(Ordering::SeqCst) {
                tracing::info!("shutting down due to sustained overload");
                break;
            }
            match self.handler.handle(&current).await {
                Ok(()) => {
                    self.error_streak.store(0, Ordering::SeqCst);
                    task = self.ack_success(current).await?;
                }
                Err(err) => {
                    self.ack_error(Some(current), &err.to_string()).await;
                    let streak = self.error_streak.fetch_add(1, Ordering::SeqCst) + 1;
                    if streak >= self.config.max_errors_in_a_row {
                        tracing::error!(streak, "too many consecutive task errors, shutting down");
                        break;
                    }
                    task = self.pull_next().await?;
                }
            }
        }

        load_reporter.abort();

        let body = serde_json::json!({ "url": self.config.url, "done": true });
        let _ = self
            .coordinator
            .call::<serde_json::Value, serde_json::Value>("/coordinator/unregister_client", &body)
            .await;
        Ok(())
    }

    /// Record one overload sample, returning `true` once
    /// `overload_max` consecutive samples have tripped — the caller
    /// should stop pulling new tasks and exit.
    pub fn record_overload(&self, overloaded: bool) -> bool {
        if overloaded {
            self.overload_count.fetch_add(1, Ordering::SeqCst) + 1 >= self.config.overload_max
        } else {
            self.overload_count.store(0, Ordering::SeqCst);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::loadprobe::LoadProbe;

    struct FixedProbe(f64);
    impl LoadProbe for FixedProbe {
        fn sample(&self) -> DispatchResult<f64> {
            Ok(self.0)
        }
    }

    struct OkHandler;
    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(&self, _task: &TaskId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn processor() -> Processor {
        Processor::new(
            ProcessorConfig::default(),
            std::sync::Arc::new(OkHandler),
            std::sync::Arc::new(FixedProbe(0.1)),
        )
    }

    #[test]
    fn test_record_overload_trips_after_threshold() {
        let p = processor();
        assert!(!p.record_overload(true));
        assert!(!p.record_overload(true));
        assert!(p.record_overload(true));
    }

    #[test]
    fn test_record_overload_resets_on_healthy_sample() {
        let p = processor();
        assert!(!p.record_overload(true));
        assert!(!p.record_overload(false));
        assert!(!p.record_overload(true));
    }

    #[tokio::test]
    async fn test_open_with_mode_write_then_read() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resource.txt").display().to_string();

        let mut file = open_with_mode(&path, ResourceOpenMode::Write).await.unwrap();
        file.write_all(b"hello").await.unwrap();
        file.flush().await.unwrap();

        let mut handle = open_with_mode(&path, ResourceOpenMode::Read).await.unwrap();
        let mut contents = String::new();
        handle.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "hello");
    }

    #[tokio::test]
    async fn test_open_with_mode_missing_file_is_persistence_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.txt").display().to_string();
        let result = open_with_mode(&path, ResourceOpenMode::Read).await;
        assert!(matches!(result, Err(DispatchError::Persistence { .. })));
    }
}
