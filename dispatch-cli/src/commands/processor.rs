// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `dispatchctl processor` — run a processor that executes each task ID
//! as a shell command.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Subcommand;
use dispatch_core::distributed::loadprobe::ProcLoadAvgProbe;
use dispatch_core::distributed::processor::{Processor, ProcessorConfig, TaskHandler};
use dispatch_core::distributed::types::TaskId;

#[derive(Subcommand)]
pub enum ProcessorCommands {
    /// Start a processor that runs each task through a shell command.
    Run {
        /// Coordinator base URL to pull work from.
        #[arg(long, default_value = "http://127.0.0.1:9754")]
        coordinator_url: String,
        /// Resource Controller base URL, for load reporting.
        #[arg(long, default_value = "http://127.0.0.1:9753")]
        rc_url: String,
        /// This processor's own callback URL.
        #[arg(long, default_value = "http://127.0.0.1:9755")]
        url: String,
        /// Host name to report to the coordinator/RC.
        #[arg(long)]
        host: String,
        /// Shell command template; `{}` is replaced with the task's JSON
        /// representation.
        command: String,
    },
}

pub async fn execute(cmd: ProcessorCommands, _verbose: bool) -> Result<()> {
    match cmd {
        ProcessorCommands::Run {
            coordinator_url,
            rc_url,
            url,
            host,
            command,
        } => run(coordinator_url, rc_url, url, host, command).await,
    }
}

/// Runs a task by substituting its JSON form into a shell command
/// template and executing it via `sh -c`.
struct ShellTaskHandler {
    template: String,
}

#[async_trait]
impl TaskHandler for ShellTaskHandler {
    async fn handle(&self, task: &TaskId) -> anyhow::Result<()> {
        let rendered = self.template.replace("{}", &task.to_string());
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .status()
            .await
            .with_context(|| format!("failed to spawn: {rendered}"))?;
        if !status.success() {
            anyhow::bail!("command exited with {status}: {rendered}");
        }
        Ok(())
    }
}

async fn run(coordinator_url: String, rc_url: String, url: String, host: String, command: String) -> Result<()> {
    let config = ProcessorConfig {
        url,
        coordinator_url,
        rc_url,
        host,
        ..Default::default()
    };

    let processor = Arc::new(Processor::new(
        config,
        Arc::new(ShellTaskHandler { template: command }),
        Arc::new(ProcLoadAvgProbe),
    ));

    processor.run().await.context("processor loop exited with an error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_task_handler_success() {
        let handler = ShellTaskHandler {
            template: "true".to_string(),
        };
        assert!(handler.handle(&serde_json::json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shell_task_handler_failure() {
        let handler = ShellTaskHandler {
            template: "false".to_string(),
        };
        assert!(handler.handle(&serde_json::json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_shell_task_handler_substitutes_task() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out.txt");
        let handler = ShellTaskHandler {
            template: format!("echo {{}} > {}", out.display()),
        };
        handler.handle(&serde_json::json!(42)).await.unwrap();
        let contents = std::fs::read_to_string(&out).unwrap();
        assert_eq!(contents.trim(), "42");
    }
}
