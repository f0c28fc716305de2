//! Wire serialization for bearer tokens.
//!
//! The format is the ecash V3 envelope: a fixed ASCII prefix and version
//! tag followed by URL-safe base64 of a JSON document:
//!
//! ```text
//! cashuA <base64url-nopad> {
//!     "token": [ { "mint": <url>, "proofs": [ <Proof>... ] } ],
//!     "unit":  <optional string>,
//!     "memo":  <optional string>
//! }
//! ```
//!
//! Encoding is deterministic for identical input ordering: field order is
//! fixed by the serde structs and proofs serialize in sequence order. The
//! parser is more liberal than the encoder — it accepts padded base64 —
//! but everything it accepts re-encodes to an economically equivalent
//! token (same mint, same proof amounts).
//!
//! Wallets in the wild emit multi-entry tokens spanning several mints.
//! This terminal's payment flow redeems against exactly one mint per
//! payment, so multi-entry tokens are rejected here rather than half-honored
//! downstream.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::proof::{Proof, Token};

/// ASCII prefix every serialized token starts with.
pub const TOKEN_PREFIX: &str = "cashu";

/// Version tag following the prefix. Only `A` (the JSON envelope) is
/// supported.
pub const TOKEN_VERSION: char = 'A';

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Parse failures for the token wire format. All of these classify as
/// `InvalidFormat` in the payment error taxonomy: fail fast, no network
/// call, not retryable.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Input does not start with the `cashu` prefix.
    #[error("missing token prefix, expected \"{TOKEN_PREFIX}\"")]
    MissingPrefix,

    /// Prefix present but the version tag is not one we speak.
    #[error("unsupported token version '{0}'")]
    UnsupportedVersion(char),

    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded payload is not the expected JSON document.
    #[error("invalid token JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carries no mint entries.
    #[error("token has no mint entries")]
    NoEntries,

    /// The envelope carries more than one mint entry.
    #[error("multi-mint token with {0} entries not supported")]
    MultiMint(usize),

    /// The mint entry has an empty proof list. A token without proofs has
    /// no value and nothing to redeem.
    #[error("token carries no proofs")]
    EmptyProofs,

    /// A proof with a zero amount. Zero-value proofs cannot correspond to
    /// any mint keyset denomination.
    #[error("proof with zero amount")]
    ZeroAmount,

    /// The proof amounts sum past `u64::MAX`.
    #[error("proof amounts overflow")]
    AmountOverflow,
}

// ---------------------------------------------------------------------------
// Wire Document
// ---------------------------------------------------------------------------

/// Top-level JSON envelope. `token` is an array for wallet compatibility
/// even though this engine only ever reads or writes one entry.
#[derive(Serialize, Deserialize)]
struct TokenEnvelope {
    token: Vec<TokenEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
}

/// One mint's worth of proofs inside the envelope.
#[derive(Serialize, Deserialize)]
struct TokenEntry {
    mint: String,
    proofs: Vec<Proof>,
}

// ---------------------------------------------------------------------------
// Encode / Parse
// ---------------------------------------------------------------------------

/// Serializes a token to its wire form.
///
/// Deterministic: the same token (including proof order) always yields the
/// same string.
pub fn encode(token: &Token) -> String {
    let envelope = TokenEnvelope {
        token: vec![TokenEntry {
            mint: token.mint_url.clone(),
            proofs: token.proofs.clone(),
        }],
        unit: token.unit.clone(),
        memo: token.memo.clone(),
    };
    // Serialization of these plain structs cannot fail.
    let json = serde_json::to_vec(&envelope).expect("token envelope serializes");
    format!(
        "{TOKEN_PREFIX}{TOKEN_VERSION}{}",
        URL_SAFE_NO_PAD.encode(json)
    )
}

/// Parses a wire token.
///
/// Pure and I/O-free: no mint is consulted, no clock is read. Anything
/// malformed fails here so the payment pipeline never carries a half-parsed
/// token forward.
pub fn parse(raw: &str) -> Result<Token, TokenError> {
    let raw = raw.trim();
    let rest = raw.strip_prefix(TOKEN_PREFIX).ok_or(TokenError::MissingPrefix)?;

    let mut chars = rest.chars();
    let version = chars.next().ok_or(TokenError::MissingPrefix)?;
    if version != TOKEN_VERSION {
        return Err(TokenError::UnsupportedVersion(version));
    }
    let payload = chars.as_str();

    // Wallets disagree on padding; accept both, emit none.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let envelope: TokenEnvelope = serde_json::from_slice(&bytes)?;

    let mut entries = envelope.token;
    let entry = match entries.len() {
        0 => return Err(TokenError::NoEntries),
        1 => entries.remove(0),
        n => return Err(TokenError::MultiMint(n)),
    };
    if entry.proofs.is_empty() {
        return Err(TokenError::EmptyProofs);
    }

    let mut total: u64 = 0;
    for proof in &entry.proofs {
        if proof.amount == 0 {
            return Err(TokenError::ZeroAmount);
        }
        total = total
            .checked_add(proof.amount)
            .ok_or(TokenError::AmountOverflow)?;
    }

    Ok(Token {
        mint_url: entry.mint,
        proofs: entry.proofs,
        unit: envelope.unit,
        memo: envelope.memo,
    })
}
