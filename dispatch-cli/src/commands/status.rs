// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `dispatchctl status` — a convenience wrapper that queries both an RC
//! and a coordinator in one call, for operators who don't want to
//! remember two separate subcommands.

use anyhow::{Context, Result};
use clap::Args;
use dispatch_core::distributed::rpc::RpcClient;

use crate::output::{display, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Resource Controller base URL, if it should be included.
    #[arg(long)]
    rc_url: Option<String>,
    /// Coordinator base URL, if it should be included.
    #[arg(long)]
    coordinator_url: Option<String>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

pub async fn execute(args: StatusArgs, _verbose: bool) -> Result<()> {
    if args.rc_url.is_none() && args.coordinator_url.is_none() {
        anyhow::bail!("pass at least one of --rc-url or --coordinator-url");
    }

    if let Some(rc_url) = args.rc_url {
        let client = RpcClient::new(rc_url);
        let status: dispatch_core::distributed::protocol::RcStatus = client
            .call("/rc/get_status", &serde_json::json!({}))
            .await
            .context("failed to query resource controller status")?;
        println!("Resource Controller:");
        display(&status, args.format)?;
    }

    if let Some(coordinator_url) = args.coordinator_url {
        let client = RpcClient::new(coordinator_url);
        let status: dispatch_core::distributed::protocol::CoordinatorStatus = client
            .call("/coordinator/get_status", &serde_json::json!({}))
            .await
            .context("failed to query coordinator status")?;
        println!("Coordinator:");
        display(&status, args.format)?;
    }

    Ok(())
}
