//! BeaconChat CLI library
//!
//! This library provides the components behind the `beaconchat` binary:
//! argument parsing, TOML configuration, command handlers and output
//! formatting.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod simulate;

pub use cli::{Cli, Commands, IdentityArgs};
pub use commands::CommandDispatcher;
pub use config::CliAppConfig;
pub use error::{CliError, Result};
