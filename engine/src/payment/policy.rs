//! Overpayment classification.
//!
//! When a customer presents more value than was requested, the excess is
//! either kept as a tip, returned as change, or put to the operator — a
//! pure decision over the amount and the configured thresholds. No I/O,
//! no state: given the same inputs, the same answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

use super::types::{OverpaymentHandling, PaymentId};

// ---------------------------------------------------------------------------
// Policy Configuration
// ---------------------------------------------------------------------------

/// Default handling when the excess falls between the two thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentMode {
    /// Keep mid-range excess as a tip.
    AutoTip,
    /// Return mid-range excess as change.
    AutoChange,
    /// Ask the operator (via the injected [`OverpaymentPrompter`]).
    Prompt,
}

/// What the classifier decided for a given excess.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverpaymentDecision {
    /// Keep the excess.
    Tip,
    /// Produce a change token for the excess.
    Change,
    /// Defer to the operator.
    Prompt,
}

/// Validated overpayment thresholds.
///
/// Fields are private: the only way to obtain a policy is through
/// [`OverpaymentPolicy::new`], which rejects threshold orderings that would
/// make the bands overlap incoherently. A policy value that exists is a
/// policy value that is valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverpaymentPolicy {
    auto_accept_tip_threshold: u64,
    force_change_threshold: u64,
    default_mode: OverpaymentMode,
}

impl Default for OverpaymentPolicy {
    fn default() -> Self {
        // 10 and 1000 base units; unattended terminals keep small excess.
        Self {
            auto_accept_tip_threshold: 10,
            force_change_threshold: 1_000,
            default_mode: OverpaymentMode::AutoTip,
        }
    }
}

impl OverpaymentPolicy {
    /// Constructs a policy, rejecting `force_change_threshold <
    /// auto_accept_tip_threshold` at the door.
    pub fn new(
        auto_accept_tip_threshold: u64,
        force_change_threshold: u64,
        default_mode: OverpaymentMode,
    ) -> Result<Self, ConfigError> {
        if force_change_threshold < auto_accept_tip_threshold {
            return Err(ConfigError::ThresholdOrder {
                auto_tip: auto_accept_tip_threshold,
                force_change: force_change_threshold,
            });
        }
        Ok(Self {
            auto_accept_tip_threshold,
            force_change_threshold,
            default_mode,
        })
    }

    /// The ceiling under which excess is silently kept as a tip.
    pub fn auto_accept_tip_threshold(&self) -> u64 {
        self.auto_accept_tip_threshold
    }

    /// The floor above which excess is always returned as change.
    pub fn force_change_threshold(&self) -> u64 {
        self.force_change_threshold
    }

    /// Handling for excess between the thresholds.
    pub fn default_mode(&self) -> OverpaymentMode {
        self.default_mode
    }

    /// Classifies an overpaid amount.
    ///
    /// Returns `None` for zero (no overpayment to handle). Otherwise:
    /// at or under the tip threshold → tip; at or over the change
    /// threshold → change, overriding the configured default; in between →
    /// the configured default mode.
    pub fn classify(&self, overpayment: u64) -> Option<OverpaymentDecision> {
        if overpayment == 0 {
            return None;
        }
        if overpayment <= self.auto_accept_tip_threshold {
            return Some(OverpaymentDecision::Tip);
        }
        if overpayment >= self.force_change_threshold {
            return Some(OverpaymentDecision::Change);
        }
        Some(match self.default_mode {
            OverpaymentMode::AutoTip => OverpaymentDecision::Tip,
            OverpaymentMode::AutoChange => OverpaymentDecision::Change,
            OverpaymentMode::Prompt => OverpaymentDecision::Prompt,
        })
    }
}

// ---------------------------------------------------------------------------
// Prompt Seam
// ---------------------------------------------------------------------------

/// UI seam consulted when classification yields
/// [`OverpaymentDecision::Prompt`]. The session races the prompt against
/// cancellation, so implementations may block on a human indefinitely.
#[async_trait]
pub trait OverpaymentPrompter: Send + Sync {
    /// Asks the operator how to handle `amount` of excess on `payment_id`.
    async fn resolve(&self, payment_id: PaymentId, amount: u64) -> OverpaymentHandling;
}

/// Prompter of last resort: always keeps the excess as a tip. Suitable for
/// unattended terminals where nobody is there to answer.
pub struct TipFallbackPrompter;

#[async_trait]
impl OverpaymentPrompter for TipFallbackPrompter {
    async fn resolve(&self, _payment_id: PaymentId, _amount: u64) -> OverpaymentHandling {
        OverpaymentHandling::Tip
    }
}
