//! Command-line tools for the experiment allocation engine
//!
//! Offline helpers around the `decision` crate: inspect the bucket of a
//! subject, plan sample sizes, and simulate an experiment end to end against
//! in-memory collaborators.

pub mod commands;
pub mod output;

use thiserror::Error;

/// CLI error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] abtest_config::ConfigError),

    #[error("Engine error: {0}")]
    Decision(#[from] decision::DecisionError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = std::result::Result<T, CliError>;

/// Parse a comma-separated list of numbers such as `50,30,20`
pub fn parse_list(input: &str) -> CliResult<Vec<f64>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| CliError::InvalidArgument(format!("'{}' is not a number", s)))
        })
        .collect()
}
