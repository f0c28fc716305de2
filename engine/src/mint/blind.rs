//! Blinding seam and denomination arithmetic.
//!
//! The blind-signature exchange has two halves. The cryptographic half —
//! generating secrets, blinding them, unblinding the mint's signatures —
//! is delegated to a [`BlindingBackend`] supplied by the embedding
//! application. The arithmetic half — which denominations to request so
//! that partitions sum exactly — lives here and is fully testable without
//! any cryptography.

use thiserror::Error;

use crate::token::Proof;

use super::keyset::Keyset;
use super::transport::{BlindSignature, BlindedMessage};

// ---------------------------------------------------------------------------
// Denominations
// ---------------------------------------------------------------------------

/// Decomposes an amount into power-of-two denominations, ascending.
///
/// Mint keysets carry one key per power of two, so any amount is
/// representable as the set bits of its binary form:
/// `denominations(13) == [1, 4, 8]`. Zero decomposes to nothing.
pub fn denominations(amount: u64) -> Vec<u64> {
    (0..u64::BITS)
        .map(|bit| 1u64 << bit)
        .filter(|denom| amount & denom != 0)
        .collect()
}

// ---------------------------------------------------------------------------
// Pre-mint Outputs
// ---------------------------------------------------------------------------

/// One prepared swap output: the blinded message to submit plus the local
/// material needed to unblind the mint's answer.
///
/// The secret and blinding factor never travel to the mint; they stay with
/// the engine until the matching [`BlindSignature`] comes back.
#[derive(Clone, Debug)]
pub struct PreMint {
    /// Blinded message to submit.
    pub blinded: BlindedMessage,

    /// The secret that will live inside the resulting proof.
    pub secret: String,

    /// Blinding factor (opaque to the engine).
    pub r: String,
}

/// An ordered batch of prepared outputs for a single swap.
#[derive(Clone, Debug, Default)]
pub struct PreMintSecrets {
    /// Outputs in submission order. Signature responses are matched to
    /// these by index.
    pub outputs: Vec<PreMint>,
}

impl PreMintSecrets {
    /// Sum of the output denominations.
    pub fn total(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.blinded.amount))
    }

    /// The blinded messages, in submission order.
    pub fn blinded_messages(&self) -> Vec<BlindedMessage> {
        self.outputs.iter().map(|o| o.blinded.clone()).collect()
    }

    /// Number of prepared outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// `true` when no outputs were prepared.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Failures inside the blinding backend.
#[derive(Debug, Error)]
pub enum BlindError {
    /// A requested denomination has no key in the target keyset.
    #[error("keyset has no key for amount {0}")]
    UnsupportedAmount(u64),

    /// Signature count or amounts do not line up with the prepared outputs.
    #[error("signature batch mismatch: {0}")]
    SignatureMismatch(String),

    /// Any other failure in the underlying cryptographic library.
    #[error("blinding backend: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Backend Trait
// ---------------------------------------------------------------------------

/// The delegated cryptographic half of the swap exchange.
///
/// Implementations wrap an ecash primitive library. They must be
/// deterministic per call only in structure, not in content: every
/// `premint` must produce fresh secrets, or the mint will reject the
/// outputs as reused.
pub trait BlindingBackend: Send + Sync {
    /// Prepares one blinded output per entry of `amounts`, in order,
    /// keyed to the given keyset.
    fn premint(&self, keyset: &Keyset, amounts: &[u64]) -> Result<PreMintSecrets, BlindError>;

    /// Unblinds a signature batch into proofs, index-aligned with the
    /// prepared outputs.
    fn unblind(
        &self,
        pre: &PreMintSecrets,
        signatures: &[BlindSignature],
        keyset: &Keyset,
    ) -> Result<Vec<Proof>, BlindError>;
}
