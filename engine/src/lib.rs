// Copyright (c) 2026 Till Systems. MIT License.
// See LICENSE for details.

//! # till — Core Payment Engine
//!
//! The payment processing core for a point-of-sale terminal that accepts
//! bearer ecash. A customer presents a token, the terminal validates it
//! against the requested amount, redeems it with the issuing mint, and hands
//! a settlement record downstream. When the network is down, the terminal
//! provisionally accepts the token, queues it durably, and reconciles it
//! once connectivity returns.
//!
//! The hard part — and the reason this crate exists — is exactly-once
//! redemption of a bearer instrument. A token that has been swapped at the
//! mint is gone forever; a token that has *not* been swapped can be spent
//! anywhere else. Every design decision below flows from keeping those two
//! facts straight under partial failure.
//!
//! ## Architecture
//!
//! Modules are layered leaves-first:
//!
//! - **token** — wire codec for bearer tokens. Pure, no I/O.
//! - **mint** — protocol client for the issuing mint: validation, spent-state
//!   checks, split and swap. Owns the per-mint serialization and the
//!   point-of-no-return semantics around `swap`.
//! - **payment** — the per-payment state machine, overpayment policy, error
//!   taxonomy, and the event channel downstream consumers subscribe to.
//! - **queue** — durable offline queue and the reconciler that drains it.
//! - **connectivity** — reachability probe the session consults before
//!   choosing the online or offline path.
//! - **config** — immutable, validated terminal configuration.
//!
//! ## Design Philosophy
//!
//! 1. The mint's `swap` is the single point of no return. Nothing retries
//!    across it, nothing cancels through it.
//! 2. Failures are data: every error carries its class (format, amount,
//!    state, network, ambiguous) so callers route instead of guess.
//! 3. Provisional acceptance is a durable promise — the queue entry hits
//!    disk before the merchant hears "approved".

pub mod config;
pub mod connectivity;
pub mod mint;
pub mod payment;
pub mod queue;
pub mod token;

/// Engine crate version, for embedding binaries to report.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{OfflinePolicy, ReconcilePolicy, TerminalConfig};
pub use payment::session::{PaymentSession, Terminal};
pub use payment::types::{Payment, PaymentId, PaymentRecord, PaymentState};
pub use token::{Proof, Token};
