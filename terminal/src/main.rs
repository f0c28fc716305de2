// Copyright (c) 2026 Till Systems. MIT License.
// See LICENSE for details.

//! # till Terminal CLI
//!
//! Entry point for the `till-terminal` binary. Parses CLI arguments,
//! initializes logging, and runs operator tooling over the payment engine:
//!
//! - `decode`  — parse a bearer token and print what the terminal would see
//! - `queue`   — inspect the offline queue awaiting reconciliation
//! - `version` — print build version information

mod cli;
mod logging;

use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use till_engine::payment::PaymentId;
use till_engine::queue::store::{PaymentStore, QueueStore, TerminalDb};
use till_engine::token;

use cli::{Commands, DecodeArgs, QueueCommands, QueueListArgs, QueueShowArgs, TillTerminalCli};
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = TillTerminalCli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init_logging("till_terminal=info,till_engine=info", format);

    match cli.command {
        Commands::Decode(args) => decode_token(args),
        Commands::Queue(QueueCommands::List(args)) => list_queue(args),
        Commands::Queue(QueueCommands::Show(args)) => show_entry(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

/// Wire-format summary printed by `decode`.
#[derive(Serialize)]
struct TokenSummary {
    mint_url: String,
    unit: Option<String>,
    memo: Option<String>,
    amount: u64,
    proof_count: usize,
    denominations: Vec<u64>,
}

fn decode_token(args: DecodeArgs) -> Result<()> {
    let raw = match args.token {
        Some(token) => token,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading token from stdin")?;
            buf
        }
    };

    let token = token::parse(raw.trim()).context("token does not decode")?;
    let summary = TokenSummary {
        mint_url: token.mint_url.clone(),
        unit: token.unit.clone(),
        memo: token.memo.clone(),
        amount: token.amount(),
        proof_count: token.proof_count(),
        denominations: token.proofs.iter().map(|p| p.amount).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("mint:          {}", summary.mint_url);
        println!("unit:          {}", summary.unit.as_deref().unwrap_or("-"));
        println!("memo:          {}", summary.memo.as_deref().unwrap_or("-"));
        println!("amount:        {}", summary.amount);
        println!("proofs:        {}", summary.proof_count);
        println!(
            "denominations: {}",
            summary
                .denominations
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(" + ")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// queue
// ---------------------------------------------------------------------------

fn open_store(data_dir: &std::path::Path) -> Result<TerminalDb> {
    let db_path = data_dir.join("db");
    TerminalDb::open(&db_path)
        .with_context(|| format!("failed to open store at {}", db_path.display()))
}

fn list_queue(args: QueueListArgs) -> Result<()> {
    let store = open_store(&args.data_dir)?;
    let entries = store.pending().context("reading offline queue")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("offline queue is empty");
        return Ok(());
    }
    println!("{} entr{} awaiting reconciliation:", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    for entry in entries {
        println!(
            "  {}  enqueued {}  mint {}  retries {}  last error: {}",
            entry.payment_id,
            entry.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            entry.mint_url,
            entry.retry_count,
            entry.last_error.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn show_entry(args: QueueShowArgs) -> Result<()> {
    let payment_id: PaymentId = args
        .payment_id
        .parse()
        .context("payment id is not a valid UUID")?;
    let store = open_store(&args.data_dir)?;

    let Some(entry) = QueueStore::get(&store, &payment_id).context("reading offline queue")?
    else {
        bail!("no queue entry for payment {payment_id}");
    };
    println!("{}", serde_json::to_string_pretty(&entry)?);

    match PaymentStore::get(&store, &payment_id).context("reading payment record")? {
        Some(payment) => println!("{}", serde_json::to_string_pretty(&payment)?),
        None => tracing::warn!(%payment_id, "queue entry has no payment record"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn print_version() {
    println!(
        "till-terminal {} (engine {})",
        env!("CARGO_PKG_VERSION"),
        till_engine::ENGINE_VERSION,
    );
}
