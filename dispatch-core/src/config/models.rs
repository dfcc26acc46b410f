// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration data model.

use serde::{Deserialize, Serialize};

/// Top-level configuration shared by the RC, Coordinator and Processor
/// binaries. Each role only reads the sub-table it cares about, but a
/// single config file/environment can drive all three.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Resource Controller settings.
    pub rc: RcConfig,
    /// Coordinator settings.
    pub coordinator: CoordinatorSettings,
    /// Processor settings.
    pub processor: ProcessorSettings,
    /// Persistence paths shared by all roles.
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rc: RcConfig::default(),
            coordinator: CoordinatorSettings::default(),
            processor: ProcessorSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Resource Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RcConfig {
    /// Host and port the RC's RPC server binds to.
    pub bind_addr: String,
    /// How often `retry_unused_hosts` is invoked automatically, in
    /// seconds. `0` disables the background sweep (callers must invoke it
    /// explicitly).
    pub retry_unused_hosts_interval_secs: u64,
    /// Path to the hosts file (`host maxLoad` lines).
    pub hosts_path: String,
    /// Tolerance added to a host's `max_load` before it counts as
    /// overloaded.
    pub overload_margin: f64,
    /// Minimum interval, in seconds, between automatic rebalances
    /// triggered from `report_load`.
    pub rebalance_frequency_secs: u64,
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9753".to_string(),
            retry_unused_hosts_interval_secs: 300,
            hosts_path: "hosts.txt".to_string(),
            overload_margin: 1.0,
            rebalance_frequency_secs: 300,
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Host and port the coordinator's RPC server binds to.
    pub bind_addr: String,
    /// URL of the Resource Controller to register with.
    pub rc_url: String,
    /// Initial requested priority (shares of the fleet's CPU pool).
    pub priority: f64,
    /// Maximum number of simultaneous clients (processors) this
    /// coordinator will start. `None` means unbounded.
    pub max_clients: Option<u32>,
    /// Directory client logfiles are written under.
    pub log_dir: String,
    /// Maximum unresolved processor starts allowed on a single host
    /// before `start_processor` stops launching more there.
    pub max_ssh_errors: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9754".to_string(),
            rc_url: "http://127.0.0.1:9753".to_string(),
            priority: 1.0,
            max_clients: None,
            log_dir: "/tmp".to_string(),
            max_ssh_errors: 3,
        }
    }
}

/// Processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorSettings {
    /// URL of the coordinator this processor pulls work from.
    pub coordinator_url: String,
    /// How often load is reported to the coordinator, in seconds.
    pub report_load_interval_secs: u64,
    /// Consecutive overload reports before this processor self-shuts down.
    pub overload_max: u32,
    /// Consecutive task errors before this processor self-shuts down.
    pub max_errors_in_a_row: u32,
    /// Seconds to sleep between `next()` retries on a WAIT response.
    pub wait_retry_secs: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:9754".to_string(),
            report_load_interval_secs: 30,
            overload_max: 3,
            max_errors_in_a_row: 5,
            wait_retry_secs: 5,
        }
    }
}

/// Shared persisted-store paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the RC's rules/resources key-value stores live under.
    pub rc_data_dir: String,
    /// Directory the coordinator's success/error logs live under.
    pub coordinator_data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rc_data_dir: "./rc-data".to_string(),
            coordinator_data_dir: "./coordinator-data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.rc.bind_addr, "0.0.0.0:9753");
        assert_eq!(cfg.coordinator.priority, 1.0);
        assert_eq!(cfg.processor.overload_max, 3);
    }
}
