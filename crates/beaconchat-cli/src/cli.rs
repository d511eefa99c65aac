//! Command-line interface definitions and parsing

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Print received messages as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

/// Who to broadcast as; falls back to the `[identity]` config section
#[derive(Args, Debug, Clone, Default)]
pub struct IdentityArgs {
    /// Display alias (first 8 characters go on the wire)
    #[arg(short, long)]
    pub alias: Option<String>,

    /// User identifier (last 3 characters go on the wire)
    #[arg(short, long)]
    pub user_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Broadcast presence and print received messages
    Listen {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Listen without broadcasting presence
        #[arg(long)]
        quiet: bool,
    },
    /// Broadcast a public message and wait for it to finish
    Send {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Message text
        text: String,
    },
    /// Broadcast a private message addressed to one alias
    Whisper {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Recipient alias
        #[arg(short, long)]
        to: String,
        /// Message text
        text: String,
    },
    /// Broadcast presence and show nearby peers
    Presence {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Run two in-process nodes over a simulated radio
    Simulate {
        /// Probability that a single delivery is lost
        #[arg(long, default_value_t = 0.0)]
        drop_rate: f64,
    },
}
