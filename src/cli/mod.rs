//! Command-line interface for cognito-score.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, KitArgs, ProviderArgs, RunArgs};
