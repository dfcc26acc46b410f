// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Load sampling for `report_load`.

use crate::error::{DispatchError, DispatchResult};

/// Samples this host's current load, expressed in the same units as a
/// host's `max_load` (i.e. "CPUs worth of runnable work").
pub trait LoadProbe: Send + Sync {
    /// Read the current load.
    fn sample(&self) -> DispatchResult<f64>;
}

/// Reads the 1-minute load average from `/proc/loadavg`, mirroring
/// original_source's `uptime`-parsing (`os.popen('uptime')`, taking the
/// 1-minute average) without shelling out to an external binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcLoadAvgProbe;

impl LoadProbe for ProcLoadAvgProbe {
    fn sample(&self) -> DispatchResult<f64> {
        let contents = std::fs::read_to_string("/proc/loadavg").map_err(|source| DispatchError::Persistence {
            path: "/proc/loadavg".to_string(),
            source,
        })?;
        parse_loadavg(&contents)
    }
}

fn parse_loadavg(contents: &str) -> DispatchResult<f64> {
    contents
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .ok_or_else(|| DispatchError::Fatal("malformed /proc/loadavg".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        let sample = "0.52 0.58 0.59 2/611 12345\n";
        assert_eq!(parse_loadavg(sample).unwrap(), 0.52);
    }

    #[test]
    fn test_parse_loadavg_malformed() {
        assert!(parse_loadavg("garbage").is_err());
    }
}
