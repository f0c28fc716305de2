//! # Bearer Token Model & Wire Codec
//!
//! A token is the unit a customer wallet hands the terminal: a set of
//! mint-signed proofs plus the metadata needed to redeem them (mint URL,
//! unit, optional memo). This module owns the data model and the wire
//! serialization — and nothing else. No I/O, no mint calls, no clocks.
//!
//! The wire format is the interoperability boundary with customer wallets
//! and must stay stable and round-trip-lossless: parsing an encoded token
//! always yields the same proof amounts and mint URL that went in.

mod codec;
mod proof;

pub use codec::{encode, parse, TokenError, TOKEN_PREFIX, TOKEN_VERSION};
pub use proof::{KeysetId, Proof, Token};
