//! Payment data model and state machine rules.
//!
//! A [`Payment`] is created by the orchestrator, mutated only through the
//! transition API here, and frozen once it reaches a terminal state. The
//! allowed-transition table is the single source of truth — both the live
//! session and the reconciler go through [`Payment::transition`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PaymentError;

// ---------------------------------------------------------------------------
// PaymentId
// ---------------------------------------------------------------------------

/// Collision-resistant payment identifier.
///
/// UUIDv4 rather than anything clock-derived: concurrent terminals creating
/// payments in the same millisecond must never collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte form, used as a storage key suffix.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentId({})", self.0)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// PaymentState
// ---------------------------------------------------------------------------

/// Lifecycle states of a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Created, waiting for a token.
    Pending,
    /// A raw token string has been received.
    TokenReceived,
    /// Online validation against the mint is underway.
    Validating,
    /// Redemption (swap/split) is underway.
    Processing,
    /// Terminal: redeemed and settled.
    Completed,
    /// Provisionally accepted offline; owned by the reconciler.
    PendingVerification,
    /// Terminal: rejected or errored.
    Failed,
    /// Terminal: cancelled before the point of no return.
    Cancelled,
}

impl PaymentState {
    /// Terminal states are immutable forever after.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Completed | PaymentState::Failed | PaymentState::Cancelled
        )
    }

    /// States from which cancellation may be requested. Once a swap is in
    /// flight the orchestrator refuses regardless of this table.
    pub fn allows_cancel(&self) -> bool {
        matches!(
            self,
            PaymentState::Pending
                | PaymentState::TokenReceived
                | PaymentState::Validating
                | PaymentState::Processing
        )
    }

    /// The allowed-transition table.
    pub fn can_transition_to(&self, to: PaymentState) -> bool {
        use PaymentState::*;
        match (self, to) {
            (Pending, TokenReceived) => true,
            (TokenReceived, Validating) => true,
            (Validating, Processing) => true,
            // Offline acceptance can park the payment any time before the
            // swap has been attempted.
            (TokenReceived | Validating | Processing, PendingVerification) => true,
            (Processing | PendingVerification, Completed) => true,
            (Pending | TokenReceived | Validating | Processing | PendingVerification, Failed) => {
                true
            }
            (Pending | TokenReceived | Validating | Processing, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentState::Pending => "pending",
            PaymentState::TokenReceived => "token_received",
            PaymentState::Validating => "validating",
            PaymentState::Processing => "processing",
            PaymentState::Completed => "completed",
            PaymentState::PendingVerification => "pending_verification",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Overpayment
// ---------------------------------------------------------------------------

/// Resolved handling of an overpaid amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentHandling {
    /// The excess is kept as a tip.
    Tip,
    /// The excess is returned as a fresh change token.
    Change,
}

/// Details of an overpayment, populated only when the received amount
/// exceeds the requested amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverpaymentInfo {
    /// Excess over the requested amount. Always > 0 when present.
    pub amount: u64,

    /// How the excess was resolved.
    pub handling: OverpaymentHandling,

    /// Serialized change token handed back to the payer. Present only
    /// when `handling` is [`OverpaymentHandling::Change`].
    pub change_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// One payment attempt, from creation to terminal state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    /// Collision-resistant identifier.
    pub id: PaymentId,

    /// Current lifecycle state.
    pub state: PaymentState,

    /// Amount the merchant asked for, in the terminal's base unit.
    pub requested_amount: u64,

    /// Unit of account for `requested_amount` (e.g. "sat").
    pub requested_unit: String,

    /// Display exchange rate captured at creation, for the receipt.
    pub exchange_rate: f64,

    /// Total value of the presented token, once received.
    pub received_amount: Option<u64>,

    /// Overpayment resolution, when the token exceeded the request.
    pub overpayment: Option<OverpaymentInfo>,

    /// Settlement identifier, assigned on completion.
    pub transaction_id: Option<String>,

    /// Whether this payment was provisionally accepted offline.
    pub offline_queued: bool,

    /// Last error message, for failed payments.
    pub error: Option<String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Time the payment reached `completed`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates a payment in `pending`.
    pub fn new(requested_amount: u64, requested_unit: impl Into<String>, exchange_rate: f64) -> Self {
        Self {
            id: PaymentId::generate(),
            state: PaymentState::Pending,
            requested_amount,
            requested_unit: requested_unit.into(),
            exchange_rate,
            received_amount: None,
            overpayment: None,
            transaction_id: None,
            offline_queued: false,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves the payment to `to`, returning the previous state.
    ///
    /// Rejects anything the transition table forbids — in particular any
    /// mutation of a terminal state.
    pub fn transition(&mut self, to: PaymentState) -> Result<PaymentState, PaymentError> {
        if !self.state.can_transition_to(to) {
            return Err(PaymentError::InvalidState { state: self.state });
        }
        let from = self.state;
        self.state = to;
        if to == PaymentState::Completed {
            self.completed_at = Some(Utc::now());
        }
        Ok(from)
    }

    /// The excess of the received amount over the request, if any.
    pub fn overpaid_amount(&self) -> u64 {
        self.received_amount
            .map(|r| r.saturating_sub(self.requested_amount))
            .unwrap_or(0)
    }

    /// Builds the immutable downstream record. `None` unless completed.
    pub fn record(&self, mint_url: &str) -> Option<PaymentRecord> {
        if self.state != PaymentState::Completed {
            return None;
        }
        Some(PaymentRecord {
            payment_id: self.id,
            amount: self.received_amount.unwrap_or(self.requested_amount),
            unit: self.requested_unit.clone(),
            mint_url: mint_url.to_string(),
            transaction_id: self.transaction_id.clone().unwrap_or_default(),
            overpayment: self.overpayment.clone(),
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        })
    }
}

// ---------------------------------------------------------------------------
// PaymentRecord
// ---------------------------------------------------------------------------

/// Immutable settlement record emitted on every completed payment, consumed
/// downstream for receipts and multi-terminal broadcast. The engine never
/// formats or transmits these itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// The payment this record settles.
    pub payment_id: PaymentId,

    /// Redeemed amount in `unit`.
    pub amount: u64,

    /// Unit of account.
    pub unit: String,

    /// Mint the token was redeemed against.
    pub mint_url: String,

    /// Settlement identifier.
    pub transaction_id: String,

    /// Overpayment resolution, if any.
    pub overpayment: Option<OverpaymentInfo>,

    /// Settlement time.
    pub completed_at: DateTime<Utc>,
}
