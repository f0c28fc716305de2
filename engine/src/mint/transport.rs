//! RPC seam to the issuing mint.
//!
//! The engine never opens a socket itself; it speaks to the mint through
//! [`MintTransport`]. Implementations own the wire protocol (HTTP, auth,
//! serialization) and Y-value derivation for spent-state lookups — the
//! engine hands over proofs, not curve points.
//!
//! The error surface is deliberately small and honest about what the caller
//! can conclude:
//!
//! - [`TransportError::Timeout`] / [`TransportError::Unavailable`] — the
//!   request may or may not have reached the mint.
//! - [`TransportError::Malformed`] — the mint answered, but the response
//!   could not be understood. For a swap this is the dangerous case: the
//!   mint may have committed.
//! - [`TransportError::Rejected`] — the mint processed the request and
//!   refused it. State is unchanged; the refusal reason is definite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::{KeysetId, Proof};

use super::keyset::Keyset;

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

/// Spent-state of a single proof as reported by the mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProofState {
    /// Never redeemed; safe to swap.
    Unspent,
    /// A redemption involving this proof is currently in flight.
    Pending,
    /// Already redeemed. Any further swap attempt will fail.
    Spent,
}

/// A blinded secret submitted to the mint for signing (`B_`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedMessage {
    /// Denomination requested for this output.
    pub amount: u64,

    /// Keyset the signature is requested under.
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,

    /// Blinded secret (hex-encoded point).
    #[serde(rename = "B_")]
    pub b: String,
}

/// A blind signature returned by the mint (`C_`), one per submitted
/// [`BlindedMessage`], in submission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    /// Denomination this signature covers.
    pub amount: u64,

    /// Keyset the mint signed under.
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,

    /// Blinded signature (hex-encoded point).
    #[serde(rename = "C_")]
    pub c: String,
}

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

/// A definite refusal from the mint. The request was processed and denied;
/// mint state did not change.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MintRejection {
    /// One or more input proofs were already redeemed.
    #[error("inputs already spent")]
    AlreadySpent,

    /// A proof failed the mint's signature verification.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// Any other refusal (rate limit, unsupported keyset, ...).
    #[error("{0}")]
    Other(String),
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport's own I/O deadline elapsed.
    #[error("mint request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS failure — the mint could not
    /// be reached.
    #[error("mint unreachable: {0}")]
    Unavailable(String),

    /// The mint responded with something the transport could not decode.
    #[error("malformed mint response: {0}")]
    Malformed(String),

    /// The mint processed the request and refused it.
    #[error("mint rejected request: {0}")]
    Rejected(MintRejection),
}

// ---------------------------------------------------------------------------
// Transport Trait
// ---------------------------------------------------------------------------

/// Request/response channel to one or more mints.
///
/// Implementations must be safe to call concurrently; the engine serializes
/// swaps per mint itself but will happily overlap keyset fetches and state
/// checks.
#[async_trait]
pub trait MintTransport: Send + Sync {
    /// Fetches the mint's currently active keyset.
    async fn active_keyset(&self, mint_url: &str) -> Result<Keyset, TransportError>;

    /// Queries the spent-state of each proof. The returned vector must be
    /// index-aligned with `proofs`.
    async fn check_state(
        &self,
        mint_url: &str,
        proofs: &[Proof],
    ) -> Result<Vec<ProofState>, TransportError>;

    /// Redeems `inputs` and requests blind signatures over `outputs`.
    ///
    /// On `Ok`, the inputs are permanently consumed by the mint. The
    /// returned signatures are index-aligned with `outputs`.
    async fn swap(
        &self,
        mint_url: &str,
        inputs: &[Proof],
        outputs: &[BlindedMessage],
    ) -> Result<Vec<BlindSignature>, TransportError>;
}
