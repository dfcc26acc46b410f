// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `dispatchctl rc` — run a Resource Controller server, or administer a
//! running one.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use dispatch_core::distributed::rc::{router, ResourceController, ResourceControllerConfig};
use dispatch_core::distributed::rpc::RpcClient;

use crate::output::{display, OutputFormat};

#[derive(Subcommand)]
pub enum RcCommands {
    /// Start the Resource Controller's RPC server.
    Serve {
        /// Address to bind the RPC server to.
        #[arg(long, default_value = "0.0.0.0:9753")]
        bind_addr: String,
        /// Path to the persisted hosts file.
        #[arg(long, default_value = "hosts.txt")]
        hosts_path: String,
        /// Directory the rules/resources tables live under.
        #[arg(long, default_value = "./rc-data")]
        data_dir: String,
        /// Tolerance added to a host's max load before it counts as
        /// overloaded.
        #[arg(long, default_value_t = 1.0)]
        overload_margin: f64,
        /// Minimum interval, in seconds, between automatic rebalances
        /// triggered from `report_load`.
        #[arg(long, default_value_t = 300)]
        rebalance_frequency_secs: u64,
    },

    /// Register or update a host's maximum CPU capacity.
    SetLoad {
        /// RC base URL.
        #[arg(long, default_value = "http://127.0.0.1:9753")]
        rc_url: String,
        /// Host name.
        host: String,
        /// Maximum CPU slots this host offers.
        max_load: f64,
    },

    /// Query the RC's current fleet status.
    Status {
        /// RC base URL.
        #[arg(long, default_value = "http://127.0.0.1:9753")]
        rc_url: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

pub async fn execute(cmd: RcCommands, _verbose: bool) -> Result<()> {
    match cmd {
        RcCommands::Serve {
            bind_addr,
            hosts_path,
            data_dir,
            overload_margin,
            rebalance_frequency_secs,
        } => serve(bind_addr, hosts_path, data_dir, overload_margin, rebalance_frequency_secs).await,
        RcCommands::SetLoad { rc_url, host, max_load } => set_load(rc_url, host, max_load).await,
        RcCommands::Status { rc_url, format } => status(rc_url, format).await,
    }
}

async fn serve(
    bind_addr: String,
    hosts_path: String,
    data_dir: String,
    overload_margin: f64,
    rebalance_frequency_secs: u64,
) -> Result<()> {
    let config = ResourceControllerConfig {
        hosts_path,
        data_dir,
        overload_margin,
        rebalance_frequency_secs,
    };
    let rc = Arc::new(ResourceController::open(&config).context("failed to open resource controller state")?);
    let app = router(rc);

    tracing::info!(%bind_addr, "resource controller listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, app).await.context("resource controller server exited")?;
    Ok(())
}

async fn set_load(rc_url: String, host: String, max_load: f64) -> Result<()> {
    let client = RpcClient::new(rc_url);
    let body = serde_json::json!({ "host": host, "max_load": max_load });
    client
        .call::<serde_json::Value, serde_json::Value>("/rc/setload", &body)
        .await
        .context("setload call failed")?;
    println!("host {host} now offers {max_load} CPUs");
    Ok(())
}

async fn status(rc_url: String, format: OutputFormat) -> Result<()> {
    let client = RpcClient::new(rc_url);
    let status: dispatch_core::distributed::protocol::RcStatus = client
        .call("/rc/get_status", &serde_json::json!({}))
        .await
        .context("get_status call failed")?;
    display(&status, format)
}
