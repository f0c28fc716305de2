//! # Terminal Configuration
//!
//! Every tunable of the payment engine lives here, gathered into an
//! immutable [`TerminalConfig`] that is constructed once at startup and
//! handed to the orchestrator. There are no ambient globals: if a component
//! needs a knob, the knob is injected through this struct.
//!
//! Invalid configurations are rejected at construction, not at use. The one
//! cross-field invariant — the overpayment thresholds must be ordered — is
//! enforced by [`crate::payment::policy::OverpaymentPolicy::new`], so a
//! policy value that exists is a policy value that is valid.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::payment::policy::OverpaymentPolicy;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Per-call deadline for every network-bound mint operation. A mint that
/// cannot answer a keyset fetch in 10 seconds is a mint we treat as down.
pub const DEFAULT_MINT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling for a single provisionally-accepted offline payment, in the
/// terminal's base unit. Offline acceptance is an extension of credit to an
/// unverifiable token; this bounds the worst case per payment.
pub const DEFAULT_OFFLINE_MAX_AMOUNT: u64 = 10_000;

/// First retry delay for a queued offline payment that failed with a
/// retryable error.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound on the reconciliation backoff. Doubling stops here.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(600);

/// How often the reconciler re-scans the queue while the terminal is online.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Broadcast channel capacity for payment events. 256 absorbs short bursts
/// without dropping events for slow subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Rejection reasons for invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The overpayment thresholds are ordered the wrong way around.
    #[error(
        "force_change_threshold ({force_change}) must be >= auto_accept_tip_threshold ({auto_tip})"
    )]
    ThresholdOrder {
        /// Configured auto-accept tip ceiling.
        auto_tip: u64,
        /// Configured forced-change floor.
        force_change: u64,
    },

    /// A duration knob was set to zero where the engine requires progress.
    #[error("{name} must be non-zero")]
    ZeroDuration {
        /// Name of the offending field.
        name: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Offline Acceptance
// ---------------------------------------------------------------------------

/// Policy for provisionally accepting payments while the mint is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflinePolicy {
    /// Whether offline acceptance is allowed at all. When `false`, a payment
    /// attempted without connectivity fails instead of queueing.
    pub enabled: bool,

    /// Maximum token value accepted offline, in the terminal's base unit.
    /// Tokens above this ceiling fail rather than queue — never silently.
    pub max_amount: u64,
}

impl Default for OfflinePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_amount: DEFAULT_OFFLINE_MAX_AMOUNT,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Timing parameters for the offline-queue reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// First retry delay after a retryable failure. Doubles per retry.
    pub backoff_base: Duration,

    /// Bound on the exponential backoff.
    pub backoff_cap: Duration,

    /// Periodic re-scan interval while connectivity is up.
    pub interval: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl ReconcilePolicy {
    /// Retry delay for an entry that has already failed `retry_count` times:
    /// `min(base * 2^retry_count, cap)`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map(|d| d.min(self.backoff_cap))
            .unwrap_or(self.backoff_cap)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "reconcile.backoff_base",
            });
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "reconcile.interval",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TerminalConfig
// ---------------------------------------------------------------------------

/// Immutable configuration for one payment terminal.
///
/// Construct with struct syntax over [`Default`], then seal with
/// [`TerminalConfig::validated`]. Components receive the config by reference
/// or clone and never mutate it.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Mints this terminal accepts tokens from. A token whose mint URL is
    /// not in this set is rejected before any network traffic.
    pub trusted_mints: BTreeSet<String>,

    /// Base unit of account for requested amounts and tokens (e.g. "sat").
    pub unit: String,

    /// Overpayment classification thresholds and default handling.
    pub overpayment: OverpaymentPolicy,

    /// Offline acceptance policy.
    pub offline: OfflinePolicy,

    /// Deadline applied to each individual mint call.
    pub mint_call_timeout: Duration,

    /// Reconciler timing.
    pub reconcile: ReconcilePolicy,

    /// Capacity of the payment event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            trusted_mints: BTreeSet::new(),
            unit: "sat".to_string(),
            overpayment: OverpaymentPolicy::default(),
            offline: OfflinePolicy::default(),
            mint_call_timeout: DEFAULT_MINT_CALL_TIMEOUT,
            reconcile: ReconcilePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TerminalConfig {
    /// Checks the cross-field invariants and returns the sealed config.
    ///
    /// The overpayment policy is already valid by construction; this catches
    /// the remaining zero-duration footguns.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.mint_call_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "mint_call_timeout",
            });
        }
        self.reconcile.validate()?;
        Ok(self)
    }

    /// Convenience for tests and the common single-mint deployment.
    pub fn with_trusted_mint(mut self, mint_url: impl Into<String>) -> Self {
        self.trusted_mints.insert(mint_url.into());
        self
    }
}
