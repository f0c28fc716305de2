//! The mint protocol client: validate → check_state → swap/split.
//!
//! [`MintClient`] wraps a [`MintTransport`] and a [`BlindingBackend`] with
//! the guarantees the payment flow depends on:
//!
//! - every network call runs under an explicit deadline;
//! - swap and split against one mint are serialized through a per-mint
//!   lock, so a terminal never races its own redemptions against that
//!   mint's replay protection;
//! - value is conserved across every exchange, checked locally — a split
//!   that does not sum is a protocol violation, not a rounding event;
//! - a failed swap is classified honestly: refusals are clean failures,
//!   timeouts and garbled responses are [`MintError::SwapStatusUnknown`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::token::{Proof, Token};

use super::blind::{denominations, BlindingBackend, PreMintSecrets};
use super::error::MintError;
use super::keyset::Keyset;
use super::transport::{MintRejection, MintTransport, ProofState, TransportError};

// ---------------------------------------------------------------------------
// Split Result
// ---------------------------------------------------------------------------

/// Output of [`MintClient::split`]: freshly signed proofs partitioned into
/// the amount the terminal keeps and the remainder returned to the payer.
#[derive(Clone, Debug)]
pub struct SplitProofs {
    /// Proofs summing exactly to the requested keep amount.
    pub keep: Vec<Proof>,

    /// Proofs summing to the remainder (the change).
    pub send: Vec<Proof>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical form for mint URL comparison: trailing slashes stripped.
/// "https://mint.example/" and "https://mint.example" are the same mint.
pub(crate) fn normalize_mint_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Deterministic settlement identifier for a redeemed proof set: hex
/// SHA-256 over the sorted proof secrets.
///
/// Stable across retries — reconciling the same token settles under the
/// same id — and collision-resistant, unlike anything derived from the
/// clock.
pub fn settlement_id(proofs: &[Proof]) -> String {
    let mut secrets: Vec<&str> = proofs.iter().map(|p| p.secret.as_str()).collect();
    secrets.sort_unstable();

    let mut hasher = Sha256::new();
    for secret in secrets {
        hasher.update(secret.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Total value of a proof slice, with overflow treated as a protocol
/// violation by callers (parsed tokens cannot overflow).
fn proofs_total(proofs: &[Proof]) -> u64 {
    proofs.iter().fold(0u64, |acc, p| acc.saturating_add(p.amount))
}

// ---------------------------------------------------------------------------
// MintClient
// ---------------------------------------------------------------------------

/// Protocol client for issuing mints.
///
/// Cheap to share: hold it in an `Arc` and call from the live session and
/// the reconciler concurrently. The per-mint lock inside guarantees the
/// two never swap against the same mint at the same time.
pub struct MintClient {
    transport: Arc<dyn MintTransport>,
    blinding: Arc<dyn BlindingBackend>,
    call_timeout: Duration,
    /// One async mutex per mint URL, created on first use.
    mint_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MintClient {
    /// Builds a client over the given transport and blinding backend.
    /// `call_timeout` bounds each individual network call.
    pub fn new(
        transport: Arc<dyn MintTransport>,
        blinding: Arc<dyn BlindingBackend>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            blinding,
            call_timeout,
            mint_locks: Mutex::new(HashMap::new()),
        }
    }

    fn mint_lock(&self, mint_url: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.mint_locks.lock();
        locks
            .entry(normalize_mint_url(mint_url).to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn timeout_ms(&self) -> u64 {
        self.call_timeout.as_millis() as u64
    }

    /// Maps a transport failure on a read-style call (keyset fetch, state
    /// check). Nothing was consumed, so these are plain failures.
    fn map_query_err(&self, err: TransportError) -> MintError {
        match err {
            TransportError::Timeout => MintError::NetworkTimeout {
                timeout_ms: self.timeout_ms(),
            },
            TransportError::Unavailable(detail) => MintError::MintUnavailable { detail },
            TransportError::Malformed(detail) => MintError::Protocol { detail },
            TransportError::Rejected(MintRejection::AlreadySpent) => MintError::AlreadySpent,
            TransportError::Rejected(rejection) => MintError::Protocol {
                detail: rejection.to_string(),
            },
        }
    }

    /// Maps a transport failure on the swap call itself. A refusal is
    /// definite (inputs untouched); a refused *connection* never carried
    /// the request; everything else leaves the mint's state unknown.
    fn map_swap_err(&self, err: TransportError) -> MintError {
        match err {
            TransportError::Unavailable(detail) => MintError::MintUnavailable { detail },
            TransportError::Timeout => MintError::SwapStatusUnknown {
                detail: format!("no response within {}ms", self.timeout_ms()),
            },
            TransportError::Malformed(detail) => MintError::SwapStatusUnknown {
                detail: format!("unreadable swap response: {detail}"),
            },
            TransportError::Rejected(MintRejection::AlreadySpent) => MintError::AlreadySpent,
            TransportError::Rejected(MintRejection::InvalidProof(detail)) => {
                MintError::InvalidSignature { detail }
            }
            TransportError::Rejected(MintRejection::Other(detail)) => {
                MintError::Protocol { detail }
            }
        }
    }

    // -----------------------------------------------------------------------
    // validate
    // -----------------------------------------------------------------------

    /// Validates a token against the trusted-mint set and the mint's
    /// active keyset.
    ///
    /// Checks, in order: mint membership in `trusted_mints` (no network
    /// traffic before this passes), keyset fetch, unit agreement, and
    /// per-proof structure (non-empty secret, well-formed signature point,
    /// denominations the claimed keyset actually signs).
    ///
    /// Deep signature verification is the mint's job at swap time; this
    /// pass rejects everything that provably cannot redeem.
    pub async fn validate(
        &self,
        token: &Token,
        trusted_mints: &BTreeSet<String>,
    ) -> Result<Keyset, MintError> {
        let mint = normalize_mint_url(&token.mint_url);
        let trusted = trusted_mints
            .iter()
            .any(|t| normalize_mint_url(t) == mint);
        if !trusted {
            return Err(MintError::UntrustedMint {
                mint: token.mint_url.clone(),
            });
        }

        let keyset = tokio::time::timeout(
            self.call_timeout,
            self.transport.active_keyset(&token.mint_url),
        )
        .await
        .map_err(|_| MintError::NetworkTimeout {
            timeout_ms: self.timeout_ms(),
        })?
        .map_err(|e| self.map_query_err(e))?;

        if let Some(unit) = &token.unit {
            if unit != &keyset.unit {
                return Err(MintError::UnitMismatch {
                    token_unit: unit.clone(),
                    keyset_unit: keyset.unit.clone(),
                });
            }
        }

        for (idx, proof) in token.proofs.iter().enumerate() {
            if proof.secret.is_empty() {
                return Err(MintError::InvalidSignature {
                    detail: format!("proof {idx} has an empty secret"),
                });
            }
            let point = hex::decode(&proof.c).map_err(|_| MintError::InvalidSignature {
                detail: format!("proof {idx} signature is not hex"),
            })?;
            if point.len() != 33 || !matches!(point[0], 0x02 | 0x03) {
                return Err(MintError::InvalidSignature {
                    detail: format!("proof {idx} signature is not a compressed point"),
                });
            }
            // Older keysets of the same mint are verified at swap time; we
            // can only cross-check denominations against the keyset we hold.
            if proof.keyset_id == keyset.id && !keyset.supports_amount(proof.amount) {
                return Err(MintError::InvalidSignature {
                    detail: format!(
                        "proof {idx} amount {} has no key in keyset {}",
                        proof.amount, keyset.id
                    ),
                });
            }
        }

        debug!(mint, proofs = token.proofs.len(), "token validated");
        Ok(keyset)
    }

    // -----------------------------------------------------------------------
    // check_state
    // -----------------------------------------------------------------------

    /// Queries the spent-state of each proof. Index-aligned with the input.
    pub async fn check_state(
        &self,
        mint_url: &str,
        proofs: &[Proof],
    ) -> Result<Vec<ProofState>, MintError> {
        let states = tokio::time::timeout(
            self.call_timeout,
            self.transport.check_state(mint_url, proofs),
        )
        .await
        .map_err(|_| MintError::NetworkTimeout {
            timeout_ms: self.timeout_ms(),
        })?
        .map_err(|e| self.map_query_err(e))?;

        if states.len() != proofs.len() {
            return Err(MintError::Protocol {
                detail: format!(
                    "state vector length {} for {} proofs",
                    states.len(),
                    proofs.len()
                ),
            });
        }
        Ok(states)
    }

    /// Fails if any proof is spent or pending. A single spent proof ruins
    /// the whole token: the swap would be rejected anyway, and attempting
    /// it would burn a replay slot at the mint.
    pub fn assert_spendable(states: &[ProofState]) -> Result<(), MintError> {
        if states.iter().any(|s| *s == ProofState::Spent) {
            return Err(MintError::AlreadySpent);
        }
        if states.iter().any(|s| *s == ProofState::Pending) {
            return Err(MintError::ProofPending);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // swap / split
    // -----------------------------------------------------------------------

    /// Redeems all input proofs for fresh ones of equal total value.
    ///
    /// This is the point of no return: once the mint answers success, the
    /// inputs are consumed forever. Callers must not resubmit them to any
    /// component afterwards.
    pub async fn swap_all(
        &self,
        mint_url: &str,
        proofs: &[Proof],
        keyset: &Keyset,
    ) -> Result<Vec<Proof>, MintError> {
        let total = proofs_total(proofs);
        let pre = self.blinding.premint(keyset, &denominations(total))?;
        self.do_swap(mint_url, proofs, &pre, keyset).await
    }

    /// Redeems the input proofs into two exact partitions: `keep` summing
    /// to `keep_amount` and `send` carrying the remainder.
    ///
    /// One swap, two output sets. The partition arithmetic is checked
    /// locally; a mint response that does not conserve value is rejected
    /// as a protocol violation even though the inputs are already gone —
    /// see [`MintError::SwapStatusUnknown`].
    pub async fn split(
        &self,
        mint_url: &str,
        proofs: &[Proof],
        keep_amount: u64,
        keyset: &Keyset,
    ) -> Result<SplitProofs, MintError> {
        let total = proofs_total(proofs);
        if keep_amount > total {
            return Err(MintError::InsufficientInputs {
                available: total,
                requested: keep_amount,
            });
        }

        let keep_denoms = denominations(keep_amount);
        let send_denoms = denominations(total - keep_amount);
        let mut amounts = keep_denoms.clone();
        amounts.extend_from_slice(&send_denoms);

        let pre = self.blinding.premint(keyset, &amounts)?;
        let fresh = self.do_swap(mint_url, proofs, &pre, keyset).await?;

        let keep: Vec<Proof> = fresh[..keep_denoms.len()].to_vec();
        let send: Vec<Proof> = fresh[keep_denoms.len()..].to_vec();

        // Conservation check. The blinding backend already verified batch
        // alignment; this guards the partition arithmetic end to end.
        if proofs_total(&keep) != keep_amount
            || proofs_total(&keep) + proofs_total(&send) != total
        {
            warn!(
                mint = mint_url,
                keep = proofs_total(&keep),
                send = proofs_total(&send),
                total,
                "split partition does not conserve value"
            );
            return Err(MintError::SwapStatusUnknown {
                detail: "split outputs do not conserve input value".into(),
            });
        }

        Ok(SplitProofs { keep, send })
    }

    /// Shared swap core: serializes per mint, bounds the call, verifies
    /// the signature batch, and unblinds.
    async fn do_swap(
        &self,
        mint_url: &str,
        inputs: &[Proof],
        pre: &PreMintSecrets,
        keyset: &Keyset,
    ) -> Result<Vec<Proof>, MintError> {
        let outputs = pre.blinded_messages();
        let lock = self.mint_lock(mint_url);
        let _serialized = lock.lock().await;

        debug!(
            mint = mint_url,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "submitting swap"
        );

        let signatures = tokio::time::timeout(
            self.call_timeout,
            self.transport.swap(mint_url, inputs, &outputs),
        )
        .await
        .map_err(|_| MintError::SwapStatusUnknown {
            detail: format!("no response within {}ms", self.timeout_ms()),
        })?
        .map_err(|e| self.map_swap_err(e))?;

        // From here on the mint has committed. Anything that stops us from
        // materializing the outputs is ambiguous-state, not a clean error.
        if signatures.len() != pre.len() {
            return Err(MintError::SwapStatusUnknown {
                detail: format!(
                    "mint returned {} signatures for {} outputs",
                    signatures.len(),
                    pre.len()
                ),
            });
        }
        for (sig, out) in signatures.iter().zip(pre.outputs.iter()) {
            if sig.amount != out.blinded.amount {
                return Err(MintError::SwapStatusUnknown {
                    detail: format!(
                        "signature amount {} does not match requested {}",
                        sig.amount, out.blinded.amount
                    ),
                });
            }
        }

        self.blinding
            .unblind(pre, &signatures, keyset)
            .map_err(|e| MintError::SwapStatusUnknown {
                detail: format!("unblinding failed after mint committed: {e}"),
            })
    }
}
