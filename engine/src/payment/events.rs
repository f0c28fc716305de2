//! Payment event channel.
//!
//! Every observable thing a payment does is mirrored onto a broadcast
//! channel: UI, logging, receipt printing, and multi-terminal sync each
//! take their own receiver and never overwrite each other. Emission is
//! fire-and-forget — a payment must not fail because nobody is listening.

use tokio::sync::broadcast;
use tracing::trace;

use super::error::ErrorClass;
use super::types::{PaymentId, PaymentRecord, PaymentState};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything subscribers can observe about payments on this terminal.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// A payment was created and is waiting for a token.
    Started {
        payment_id: PaymentId,
        requested_amount: u64,
        unit: String,
    },

    /// A token was received and parsed.
    TokenReceived {
        payment_id: PaymentId,
        amount: u64,
        mint_url: String,
    },

    /// The payment moved between lifecycle states.
    StateChanged {
        payment_id: PaymentId,
        from: PaymentState,
        to: PaymentState,
    },

    /// Classification needs an operator decision on the excess.
    OverpaymentPrompt { payment_id: PaymentId, amount: u64 },

    /// The payment was provisionally accepted offline and queued.
    OfflineQueued {
        payment_id: PaymentId,
        amount: u64,
        mint_url: String,
    },

    /// The payment settled. Carries the immutable downstream record.
    Completed { record: PaymentRecord },

    /// The payment failed. `class` lets subscribers route without parsing
    /// the detail string.
    Failed {
        payment_id: PaymentId,
        class: ErrorClass,
        detail: String,
    },

    /// The payment was cancelled before the point of no return.
    Cancelled { payment_id: PaymentId },

    /// A queued offline payment hit a retryable error and was deferred.
    ReconcileDeferred {
        payment_id: PaymentId,
        retry_count: u32,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Multi-subscriber fan-out for [`PaymentEvent`]s.
///
/// Cloning is cheap; all clones feed the same channel. Slow subscribers
/// that fall more than the channel capacity behind lose the oldest events
/// (standard broadcast semantics) — the payment store, not the event
/// stream, is the system of record.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PaymentEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new independent subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all current subscribers. Never fails: with no
    /// subscribers the event is dropped.
    pub fn emit(&self, event: PaymentEvent) {
        trace!(?event, "payment event");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers, mainly for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
