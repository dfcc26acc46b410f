// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The launcher contract: how a coordinator starts a processor on a
//! remote host (spec.md §6). Implementations shell out (locally, or via
//! `ssh`) to a command that eventually runs a `dispatchctl processor`
//! process pointed back at this coordinator.

use async_trait::async_trait;
use tokio::process::Command;

use crate::distributed::types::HostName;
use crate::error::{DispatchError, DispatchResult};

/// Starts a processor on a remote host.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a processor on `host`, pointed at `coordinator_url`, with
    /// its stdout/stderr redirected to `logfile`.
    ///
    /// The logfile path convention (`/tmp/{name}_{seq}.log`) is how the
    /// coordinator later resolves a `register_client` call's `logfile`
    /// back to the `(host, clientSeq)` slot it was expecting — see
    /// SPEC_FULL.md §4.2.
    async fn launch(&self, host: &HostName, coordinator_url: &str, logfile: &str) -> DispatchResult<()>;
}

/// Launches a processor over `ssh`, backgrounding it and redirecting
/// output to `logfile`. The remote command is expected to be
/// `dispatchctl processor --coordinator <url>` already on the target
/// host's `PATH`.
pub struct SshLauncher {
    /// Path to the `dispatchctl` binary on the remote host.
    pub remote_binary: String,
}

impl Default for SshLauncher {
    fn default() -> Self {
        Self {
            remote_binary: "dispatchctl".to_string(),
        }
    }
}

#[async_trait]
impl Launcher for SshLauncher {
    async fn launch(&self, host: &HostName, coordinator_url: &str, logfile: &str) -> DispatchResult<()> {
        let remote_command = format!(
            "nohup {} processor --coordinator {} >{} 2>&1 &",
            self.remote_binary, coordinator_url, logfile
        );

        let status = Command::new("ssh")
            .arg(host)
            .arg(remote_command)
            .status()
            .await
            .map_err(|source| DispatchError::Persistence {
                path: format!("ssh://{host}"),
                source,
            })?;

        if !status.success() {
            return Err(DispatchError::Fatal(format!(
                "ssh launch on {host} exited with {status}"
            )));
        }
        Ok(())
    }
}

/// Builds the conventional logfile path for a (host, sequence) pair.
pub fn logfile_path(log_dir: &str, coordinator_name: &str, seq: u64) -> String {
    format!("{log_dir}/{coordinator_name}_{seq}.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logfile_path_convention() {
        assert_eq!(logfile_path("/tmp", "job1", 3), "/tmp/job1_3.log");
    }
}
