//! # Mint Protocol Client
//!
//! Everything that talks to (or about) the issuing mint. The flow a payment
//! takes through this module is strictly ordered:
//!
//! ```text
//!   validate ──► check_state ──► swap / split
//!   (trusted?     (spent?         (point of no return:
//!    keyset ok?)   pending?)       inputs consumed on success)
//! ```
//!
//! Two seams keep out-of-scope concerns out:
//!
//! - [`MintTransport`] carries the RPC calls. Wire protocol, auth, and HTTP
//!   live behind it.
//! - [`BlindingBackend`] performs the blind-signature cryptography. The
//!   client owns the *arithmetic* of every exchange — denominations,
//!   partitions, conservation of value — and delegates the math on curves.
//!
//! [`MintClient`] composes the two and adds the operational guarantees: a
//! deadline on every network call and per-mint serialization of swaps so a
//! terminal never races its own redemptions against one mint's replay
//! protection.

mod blind;
mod client;
mod error;
mod keyset;
mod transport;

pub use blind::{denominations, BlindError, BlindingBackend, PreMint, PreMintSecrets};
pub use client::{settlement_id, MintClient, SplitProofs};
pub use error::MintError;
pub use keyset::Keyset;
pub use transport::{
    BlindSignature, BlindedMessage, MintRejection, MintTransport, ProofState, TransportError,
};
