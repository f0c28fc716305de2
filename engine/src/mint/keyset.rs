//! Mint keyset model.
//!
//! A keyset is the set of denomination public keys a mint signs with. Every
//! proof names the keyset it was signed under; validation cross-checks proof
//! denominations against the keys the mint actually advertises.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::token::KeysetId;

/// One mint keyset: an id, the unit it denominates, and a public key per
/// supported amount.
///
/// `keys` maps denomination → compressed public key (hex). A `BTreeMap`
/// keeps iteration order stable for logging and serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    /// Keyset identifier, as advertised by the mint.
    pub id: KeysetId,

    /// Unit of account this keyset denominates (e.g. "sat").
    pub unit: String,

    /// Denomination → mint public key (hex-encoded compressed point).
    pub keys: BTreeMap<u64, String>,

    /// Whether the mint currently signs with this keyset.
    pub active: bool,
}

impl Keyset {
    /// Returns `true` if the keyset carries a signing key for `amount`.
    pub fn supports_amount(&self, amount: u64) -> bool {
        self.keys.contains_key(&amount)
    }

    /// The largest denomination this keyset can sign.
    pub fn max_denomination(&self) -> Option<u64> {
        self.keys.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyset() -> Keyset {
        Keyset {
            id: KeysetId::from("009a1f293253e41e"),
            unit: "sat".into(),
            keys: [(1u64, "02aa".to_string()), (2, "02bb".into()), (4, "02cc".into())]
                .into_iter()
                .collect(),
            active: true,
        }
    }

    #[test]
    fn supports_only_listed_amounts() {
        let ks = keyset();
        assert!(ks.supports_amount(1));
        assert!(ks.supports_amount(4));
        assert!(!ks.supports_amount(3));
        assert!(!ks.supports_amount(8));
    }

    #[test]
    fn max_denomination() {
        assert_eq!(keyset().max_denomination(), Some(4));
    }
}
