//! Proof and token data model.
//!
//! A [`Proof`] is an indivisible, mint-signed unit of value; a [`Token`] is
//! an ordered collection of proofs bound to a single mint. Proofs are
//! immutable once issued — the engine never edits one, it only presents
//! them to the mint or serializes them for a wallet.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// KeysetId
// ---------------------------------------------------------------------------

/// Identifier of the mint keyset a proof was signed under.
///
/// Opaque to the engine: it travels inside proofs on the wire and is matched
/// against the mint's advertised keysets during validation. Treated as a
/// case-sensitive string, compared byte-for-byte.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeysetId(String);

impl KeysetId {
    /// Wraps a raw keyset identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeysetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeysetId({})", self.0)
    }
}

impl fmt::Display for KeysetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeysetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Proof
// ---------------------------------------------------------------------------

/// An indivisible unit of ecash value signed by a mint.
///
/// Wire field names follow the ecash convention: the unblinded signature is
/// serialized as `C`, the keyset identifier as `id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proof {
    /// Denomination in the token's base unit.
    pub amount: u64,

    /// Keyset this proof was signed under.
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,

    /// The secret message the mint signed. Knowledge of the secret is
    /// what makes this a bearer instrument.
    pub secret: String,

    /// Unblinded mint signature over the secret (hex-encoded point).
    #[serde(rename = "C")]
    pub c: String,
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A proof collection plus redemption metadata — the unit exchanged between
/// customer wallets and the terminal.
///
/// Invariant: all proofs belong to `mint_url`. The engine's payment flow is
/// single-mint per token; multi-mint wire tokens are rejected at parse time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// URL of the issuing mint.
    pub mint_url: String,

    /// Ordered proof sequence. Order is preserved through encode/parse.
    pub proofs: Vec<Proof>,

    /// Unit of account for the proof amounts (e.g. "sat").
    pub unit: Option<String>,

    /// Free-form note from the sender.
    pub memo: Option<String>,
}

impl Token {
    /// Assembles a token from parts.
    pub fn new(
        mint_url: impl Into<String>,
        proofs: Vec<Proof>,
        unit: Option<String>,
        memo: Option<String>,
    ) -> Self {
        Self {
            mint_url: mint_url.into(),
            proofs,
            unit,
            memo,
        }
    }

    /// Total value of the token: the sum of its proof amounts.
    ///
    /// Saturates at `u64::MAX`; [`crate::token::parse`] rejects wire tokens
    /// whose amounts overflow, so a parsed token always sums exactly.
    pub fn amount(&self) -> u64 {
        self.proofs
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.amount))
    }

    /// Number of proofs carried.
    pub fn proof_count(&self) -> usize {
        self.proofs.len()
    }
}

impl fmt::Display for Token {
    /// Displays the token in its wire serialization.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::codec::encode(self))
    }
}

impl std::str::FromStr for Token {
    type Err = super::codec::TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        super::codec::parse(s)
    }
}
