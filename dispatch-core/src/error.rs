// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Crate-wide error type.
//!
//! Mirrors the taxonomy in the design: unknown-peer references are
//! tolerated no-ops at the call site (never surfaced as an error), so the
//! variants here are reserved for conditions a caller must actually react
//! to — policy denial, transient backpressure, RPC failure, persistence
//! failure, and fatal configuration/startup errors.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced by the Resource Controller, Coordinator and Processor.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The RC declined a request under its current policy (no hosts with
    /// spare capacity, priority exhausted, etc).
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// The peer asked the caller to retry later (WAIT sentinel).
    #[error("transient backpressure, retry later: {0}")]
    Backpressure(String),

    /// A named resource's build rule raised an error while materializing.
    #[error("rule {rule} failed to build resource {resource} on {host}: {source}")]
    RuleFailed {
        /// Rule name.
        rule: String,
        /// Resource name.
        resource: String,
        /// Host the rule ran on.
        host: String,
        /// Underlying error from the rule implementation.
        #[source]
        source: anyhow::Error,
    },

    /// The user-supplied task iterator raised an error.
    #[error("task iterator error: {0}")]
    IteratorFailed(#[source] anyhow::Error),

    /// A remote peer could not be reached, or returned a malformed
    /// response.
    #[error("rpc call to {peer} failed: {source}")]
    Rpc {
        /// Address of the peer that was called.
        peer: String,
        /// Underlying transport error.
        #[source]
        source: anyhow::Error,
    },

    /// Reading or writing a persisted store (hosts, rules, resources,
    /// success/error logs) failed.
    #[error("persistence error at {path}: {source}")]
    Persistence {
        /// Path of the file that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// A fatal, unrecoverable condition (e.g. a precondition the process
    /// cannot run without).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        let err = DispatchError::PolicyDenied("no capacity".into());
        assert_eq!(err.to_string(), "policy denied: no capacity");

        let err = DispatchError::Backpressure("wait for rebalance".into());
        assert!(err.to_string().contains("retry later"));
    }

    #[test]
    fn test_rule_failed_display() {
        let err = DispatchError::RuleFailed {
            rule: "build_index".into(),
            resource: "index".into(),
            host: "host1".into(),
            source: anyhow::anyhow!("disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("build_index"));
        assert!(msg.contains("host1"));
    }
}
