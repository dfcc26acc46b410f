// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `dispatchctl coordinator` — run a coordinator over a file of
//! newline-delimited JSON task IDs.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use dispatch_core::distributed::coordinator::{router, Coordinator, CoordinatorConfig};
use dispatch_core::distributed::launcher::{Launcher, SshLauncher};
use dispatch_core::distributed::rpc::RpcClient;
use dispatch_core::distributed::types::TaskId;

use crate::output::{display, OutputFormat};

#[derive(Subcommand)]
pub enum CoordinatorCommands {
    /// Start a coordinator serving tasks read from a file.
    Serve {
        /// Newline-delimited JSON file of task IDs to dispatch.
        tasks_file: std::path::PathBuf,
        /// Address to bind this coordinator's RPC server to.
        #[arg(long, default_value = "0.0.0.0:9754")]
        bind_addr: String,
        /// This coordinator's own callback URL (must match `bind_addr`'s
        /// externally reachable address).
        #[arg(long, default_value = "http://127.0.0.1:9754")]
        url: String,
        /// Resource Controller base URL.
        #[arg(long, default_value = "http://127.0.0.1:9753")]
        rc_url: String,
        /// Job name, used for logfile and success/error log naming.
        #[arg(long, default_value = "job")]
        name: String,
        /// Initial requested priority.
        #[arg(long, default_value_t = 1.0)]
        priority: f64,
        /// Directory the success/error logs live under.
        #[arg(long, default_value = "./coordinator-data")]
        data_dir: String,
        /// Maximum unresolved processor starts allowed on a single host
        /// before `start_processor` stops launching more there.
        #[arg(long, default_value_t = 3)]
        max_ssh_errors: u32,
    },

    /// Query a running coordinator's status.
    Status {
        /// Coordinator base URL.
        #[arg(long, default_value = "http://127.0.0.1:9754")]
        url: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

pub async fn execute(cmd: CoordinatorCommands, _verbose: bool) -> Result<()> {
    match cmd {
        CoordinatorCommands::Serve {
            tasks_file,
            bind_addr,
            url,
            rc_url,
            name,
            priority,
            data_dir,
            max_ssh_errors,
        } => serve(tasks_file, bind_addr, url, rc_url, name, priority, data_dir, max_ssh_errors).await,
        CoordinatorCommands::Status { url, format } => status(url, format).await,
    }
}

/// Reads task IDs from a newline-delimited JSON file, skipping blank and
/// unparseable lines rather than failing the whole run over one bad line.
struct FileTaskSource {
    lines: std::io::Lines<std::io::BufReader<std::fs::File>>,
}

impl Iterator for FileTaskSource {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        for line in self.lines.by_ref() {
            let line = line.ok()?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => return Some(value),
                Err(err) => {
                    tracing::warn!(%err, line = trimmed, "skipping unparseable task line");
                    continue;
                }
            }
        }
        None
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    tasks_file: std::path::PathBuf,
    bind_addr: String,
    url: String,
    rc_url: String,
    name: String,
    priority: f64,
    data_dir: String,
    max_ssh_errors: u32,
) -> Result<()> {
    let file = std::fs::File::open(&tasks_file)
        .with_context(|| format!("failed to open tasks file {}", tasks_file.display()))?;
    let source = Box::new(FileTaskSource {
        lines: std::io::BufReader::new(file).lines(),
    });

    let config = CoordinatorConfig {
        url: url.clone(),
        rc_url,
        name,
        log_dir: "/tmp".to_string(),
        data_dir,
        priority,
        max_ssh_errors,
    };

    let launcher: Arc<dyn Launcher> = Arc::new(SshLauncher::default());
    let coordinator = Arc::new(Coordinator::open(config, source, launcher)?);
    coordinator.register_with_rc().await.context("failed to register with resource controller")?;

    let shutdown = coordinator.shutdown_signal();
    let app = router(Arc::clone(&coordinator));

    tracing::info!(%bind_addr, %url, "coordinator listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("coordinator server exited")?;
        }
        () = shutdown.notified() => {
            tracing::info!("task source exhausted and all clients drained, shutting down");
        }
    }
    Ok(())
}

async fn status(url: String, format: OutputFormat) -> Result<()> {
    let client = RpcClient::new(url);
    let status: dispatch_core::distributed::protocol::CoordinatorStatus = client
        .call("/coordinator/get_status", &serde_json::json!({}))
        .await
        .context("get_status call failed")?;
    display(&status, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_task_source_skips_blank_and_bad_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "\"task-2\"").unwrap();
        drop(file);

        let mut source = FileTaskSource {
            lines: std::io::BufReader::new(std::fs::File::open(&path).unwrap()).lines(),
        };

        assert_eq!(source.next(), Some(serde_json::json!(1)));
        assert_eq!(source.next(), Some(serde_json::json!("task-2")));
        assert_eq!(source.next(), None);
    }
}
