// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI-specific errors with a suggestion attached, so `main`'s top-level
//! handler can print actionable hints instead of a bare message.

use thiserror::Error;

/// Errors raised by `dispatchctl` subcommands themselves, as opposed to
/// errors surfaced from `dispatch_core` (which are wrapped via `anyhow`
/// at the call site).
#[derive(Debug, Error)]
pub enum CliError {
    /// A required peer (RC/Coordinator/Processor) could not be reached.
    #[error("could not reach {role} at {url}")]
    PeerUnreachable {
        /// Which role was being contacted.
        role: &'static str,
        /// URL that was attempted.
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The configuration file was missing or invalid.
    #[error("configuration error: {message}")]
    ConfigurationError {
        /// What went wrong.
        message: String,
        /// Suggested remedy.
        suggestion: String,
    },

    /// A task source file could not be read or parsed.
    #[error("invalid task source: {message}")]
    InvalidTaskSource {
        /// What went wrong.
        message: String,
    },
}

impl CliError {
    /// Print the error along with any attached suggestion.
    pub fn print_error(&self) {
        eprintln!("Error: {self}");
        if let Self::ConfigurationError { suggestion, .. } = self {
            if !suggestion.is_empty() {
                eprintln!("Suggestion: {suggestion}");
            }
        }
    }
}

/// Exit codes `main` maps `Result::Err` cases onto.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// General error.
    pub const ERROR: i32 = 1;
    /// Configuration error.
    pub const CONFIG_ERROR: i32 = 3;
    /// A peer RPC call failed.
    pub const RPC_ERROR: i32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = CliError::ConfigurationError {
            message: "missing rc.bind_addr".to_string(),
            suggestion: "run `dispatchctl config init`".to_string(),
        };
        assert!(err.to_string().contains("missing rc.bind_addr"));
    }

    #[test]
    fn test_invalid_task_source_display() {
        let err = CliError::InvalidTaskSource {
            message: "not valid JSON lines".to_string(),
        };
        assert!(err.to_string().contains("not valid JSON lines"));
    }
}
