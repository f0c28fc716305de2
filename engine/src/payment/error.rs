//! Payment error taxonomy.
//!
//! Every failure a payment can suffer, grouped by what the caller may do
//! next. The [`ErrorClass`] is part of the contract: it is carried on
//! failure events so downstream consumers route on class, not on string
//! matching.

use thiserror::Error;

use crate::mint::MintError;
use crate::queue::store::StoreError;
use crate::token::TokenError;

use super::source::SourceError;
use super::types::PaymentState;

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Routing class of a payment failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed token. Fail fast, no network call, not retryable.
    Format,
    /// The amounts do not work out. Not retryable; a new token is needed.
    Amount,
    /// The token or session is in a state that cannot proceed; the same
    /// input will fail again.
    State,
    /// Transient network condition. Retryable.
    Network,
    /// A swap failed after validation succeeded; the mint's state is
    /// unknown. Must never be collapsed into an ordinary failure.
    Ambiguous,
    /// Engine-internal fault (storage, blinding backend, protocol
    /// violations by the mint).
    Internal,
}

// ---------------------------------------------------------------------------
// PaymentError
// ---------------------------------------------------------------------------

/// Failures surfaced by the payment pipeline.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The presented token could not be parsed.
    #[error("invalid token format: {0}")]
    InvalidFormat(#[from] TokenError),

    /// The token is worth less than the requested amount. Decided by local
    /// arithmetic only — the mint is never contacted for a token that
    /// cannot possibly satisfy the request.
    #[error("insufficient amount: requested {requested}, token is worth {presented}")]
    InsufficientAmount {
        /// What the merchant asked for.
        requested: u64,
        /// What the token sums to.
        presented: u64,
    },

    /// The token is denominated in a unit this terminal does not handle.
    /// Amounts across units are incomparable, so this fails before any
    /// amount check.
    #[error("unit mismatch: token is \"{token_unit}\", terminal handles \"{terminal_unit}\"")]
    UnitMismatch {
        /// Unit named by the token.
        token_unit: String,
        /// The terminal's configured base unit.
        terminal_unit: String,
    },

    /// The terminal is offline and offline acceptance is disabled.
    #[error("offline acceptance is disabled")]
    OfflineDisabled,

    /// The terminal is offline and the token exceeds the offline ceiling.
    #[error("offline ceiling exceeded: limit {limit}, token is worth {presented}")]
    OfflineCeilingExceeded {
        /// Configured per-payment offline maximum.
        limit: u64,
        /// What the token sums to.
        presented: u64,
    },

    /// Another payment is already active on this terminal.
    #[error("another payment is already active")]
    SessionBusy,

    /// The requested operation is not allowed in the payment's state.
    #[error("operation not allowed in state {state}")]
    InvalidState {
        /// The state the payment was in.
        state: PaymentState,
    },

    /// Cancellation was refused because a swap is mid-flight. The
    /// operation will complete or fail; it cannot be aborted.
    #[error("cancellation refused: swap in flight")]
    SwapInFlight,

    /// The payment was cancelled before the point of no return.
    #[error("payment cancelled")]
    Cancelled,

    /// A mint protocol failure (validation, state check, swap).
    #[error(transparent)]
    Mint(#[from] MintError),

    /// Durable storage failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The hardware token source failed.
    #[error("token source failure: {0}")]
    Source(#[from] SourceError),
}

impl PaymentError {
    /// Routing class per the error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            PaymentError::InvalidFormat(_) => ErrorClass::Format,
            PaymentError::InsufficientAmount { .. }
            | PaymentError::OfflineCeilingExceeded { .. } => ErrorClass::Amount,
            PaymentError::UnitMismatch { .. }
            | PaymentError::OfflineDisabled
            | PaymentError::SessionBusy
            | PaymentError::InvalidState { .. }
            | PaymentError::SwapInFlight
            | PaymentError::Cancelled => ErrorClass::State,
            PaymentError::Mint(e) => match e {
                MintError::UntrustedMint { .. }
                | MintError::InvalidSignature { .. }
                | MintError::UnitMismatch { .. }
                | MintError::AlreadySpent
                | MintError::ProofPending => ErrorClass::State,
                MintError::NetworkTimeout { .. } | MintError::MintUnavailable { .. } => {
                    ErrorClass::Network
                }
                MintError::SwapStatusUnknown { .. } => ErrorClass::Ambiguous,
                MintError::Protocol { .. }
                | MintError::InsufficientInputs { .. }
                | MintError::Blinding(_) => ErrorClass::Internal,
            },
            PaymentError::Storage(_) | PaymentError::Source(_) => ErrorClass::Internal,
        }
    }

    /// Whether retrying later can succeed. Only transient network
    /// conditions qualify.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Network
    }
}
