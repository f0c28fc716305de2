//! # CLI Interface
//!
//! Defines the command-line argument structure for `till-terminal` using
//! `clap` derive. Supports three subcommands: `decode`, `queue`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// till payment terminal — operator tooling.
///
/// Inspection tools for the till payment engine: decode bearer tokens the
/// way the terminal would, and examine the offline queue awaiting
/// reconciliation. The payment flow itself runs embedded in the POS
/// application, not through this binary.
#[derive(Parser, Debug)]
#[command(
    name = "till-terminal",
    about = "till payment terminal operator CLI",
    version,
    propagate_version = true
)]
pub struct TillTerminalCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Emit logs as JSON lines instead of human-readable output.
    #[arg(long, global = true, env = "TILL_LOG_JSON")]
    pub log_json: bool,
}

/// Top-level subcommands for the till terminal binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a bearer token and print its contents.
    Decode(DecodeArgs),
    /// Inspect the offline payment queue.
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `decode` subcommand.
#[derive(Parser, Debug)]
pub struct DecodeArgs {
    /// The serialized token (cashuA...). Reads stdin when omitted.
    pub token: Option<String>,

    /// Print the decoded summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Queue inspection subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List all entries awaiting reconciliation, FIFO.
    List(QueueListArgs),
    /// Show one entry (and its payment record) in full.
    Show(QueueShowArgs),
}

/// Arguments for `queue list`.
#[derive(Parser, Debug)]
pub struct QueueListArgs {
    /// Path to the terminal data directory holding the durable store.
    #[arg(long, short = 'd', env = "TILL_DATA_DIR", default_value = ".till")]
    pub data_dir: PathBuf,

    /// Print entries as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `queue show`.
#[derive(Parser, Debug)]
pub struct QueueShowArgs {
    /// The payment id of the entry to show.
    pub payment_id: String,

    /// Path to the terminal data directory holding the durable store.
    #[arg(long, short = 'd', env = "TILL_DATA_DIR", default_value = ".till")]
    pub data_dir: PathBuf,
}
