// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Output formatting shared by every `dispatchctl` subcommand.

use anyhow::Result;
use serde::Serialize;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Print a status-shaped value in the requested format.
pub fn display<T: Serialize + std::fmt::Debug>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Text => {
            println!("{value:#?}");
        }
    }
    Ok(())
}

/// Print an error to stderr with an optional suggestion.
pub fn display_error(error: &str, suggestion: Option<&str>) {
    eprintln!("Error: {error}");
    if let Some(hint) = suggestion {
        eprintln!("Hint: {hint}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_display_json() {
        assert!(display(&Sample { value: 1 }, OutputFormat::Json).is_ok());
    }

    #[test]
    fn test_display_text() {
        assert!(display(&Sample { value: 1 }, OutputFormat::Text).is_ok());
    }
}
