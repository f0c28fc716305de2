//! Error surface of the mint protocol client.
//!
//! Variants are grouped by what the caller may do next: state errors mean
//! the same token will fail again; network errors are retryable; and
//! [`MintError::SwapStatusUnknown`] is the one nobody gets to collapse into
//! an ordinary failure — after it, the mint's state is genuinely ambiguous.

use thiserror::Error;

use super::blind::BlindError;

/// Failures from validation, state checks, splits, and swaps.
#[derive(Debug, Error)]
pub enum MintError {
    /// The token's mint is not in the terminal's trusted set.
    #[error("untrusted mint: {mint}")]
    UntrustedMint {
        /// The mint URL the token named.
        mint: String,
    },

    /// A proof failed structural or keyset validation.
    #[error("invalid proof signature: {detail}")]
    InvalidSignature {
        /// What exactly failed.
        detail: String,
    },

    /// The token's unit does not match the keyset's unit.
    #[error("unit mismatch: token is \"{token_unit}\", keyset is \"{keyset_unit}\"")]
    UnitMismatch {
        /// Unit named by the token.
        token_unit: String,
        /// Unit of the mint's active keyset.
        keyset_unit: String,
    },

    /// At least one proof has already been redeemed.
    #[error("proof already spent")]
    AlreadySpent,

    /// At least one proof is locked by a redemption in flight elsewhere.
    #[error("proof redemption pending elsewhere")]
    ProofPending,

    /// A network call exceeded its deadline. Retryable.
    #[error("mint call timed out after {timeout_ms}ms")]
    NetworkTimeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The mint could not be reached. Retryable.
    #[error("mint unavailable: {detail}")]
    MintUnavailable {
        /// Underlying transport detail.
        detail: String,
    },

    /// The mint answered in a way that violates the protocol contract
    /// (misaligned state vector, non-conserving split, unexpected refusal).
    #[error("mint protocol violation: {detail}")]
    Protocol {
        /// What the mint got wrong.
        detail: String,
    },

    /// A swap failed after validation succeeded, in a way that leaves the
    /// mint's state unknown: the inputs may or may not be consumed.
    ///
    /// Must never be reported as a clean failure — re-presenting the same
    /// token can later fail `AlreadySpent` even though no one confirmed
    /// success to the merchant.
    #[error("swap status unknown: {detail}")]
    SwapStatusUnknown {
        /// What happened mid-swap.
        detail: String,
    },

    /// Split was asked to keep more than the inputs are worth.
    #[error("insufficient inputs: have {available}, asked to keep {requested}")]
    InsufficientInputs {
        /// Total value of the input proofs.
        available: u64,
        /// Requested keep amount.
        requested: u64,
    },

    /// The blinding backend failed before anything was submitted.
    #[error(transparent)]
    Blinding(#[from] BlindError),
}

impl MintError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Only transient network conditions qualify. `SwapStatusUnknown` is
    /// deliberately not retryable here: retrying a swap blindly can
    /// double-submit; callers must re-check proof state first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MintError::NetworkTimeout { .. } | MintError::MintUnavailable { .. }
        )
    }
}
