//! # Offline Queue & Reconciliation
//!
//! When the mint is unreachable, an eligible payment is provisionally
//! accepted: the raw token is written durably to the queue, the customer
//! walks away, and the merchant is owed a settlement. The reconciler later
//! drains the queue by replaying the exact online pipeline (validate →
//! check_state → swap) once connectivity returns.
//!
//! Rules the queue lives by:
//!
//! - **Durable before accepted.** The enqueue write flushes to disk before
//!   the caller may report success.
//! - **FIFO by enqueue time.** Oldest promises settle first.
//! - **Removed exactly once resolved.** Success and permanent failure
//!   delete the entry; transient failure only defers it with backoff.
//! - **One owner.** Entries belong to the queue until reconciliation
//!   deletes them; the live payment path never touches them again.

pub mod reconciler;
pub mod store;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::payment::types::PaymentId;

use store::{QueueStore, StoreError};

pub use reconciler::{ReconcileSummary, Reconciler};

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

/// One provisionally-accepted offline payment awaiting settlement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The payment this entry settles.
    pub payment_id: PaymentId,

    /// The raw token string exactly as presented. Re-parsed at
    /// reconciliation time; if it was malformed, that is a permanent
    /// failure discovered then.
    pub raw_token: String,

    /// Mint URL extracted at acceptance time, kept so the reconciler can
    /// group per mint without re-parsing.
    pub mint_url: String,

    /// Snapshot of the trusted-mint set at acceptance time. Reconciliation
    /// honors the trust decision the acceptance was made under.
    pub trusted_mints: BTreeSet<String>,

    /// When the entry was accepted. Defines FIFO order.
    pub enqueued_at: DateTime<Utc>,

    /// Number of failed settlement attempts so far.
    pub retry_count: u32,

    /// Message of the last failed attempt.
    pub last_error: Option<String>,

    /// Earliest time the next attempt may run (backoff schedule).
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Whether the backoff schedule allows an attempt at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Storage key: enqueue time (millis, big-endian) then payment id, so that
/// byte order equals FIFO order.
pub(crate) fn entry_key(entry: &QueueEntry) -> Vec<u8> {
    let millis = entry.enqueued_at.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&millis.to_be_bytes());
    key.extend_from_slice(entry.payment_id.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// OfflineQueue
// ---------------------------------------------------------------------------

/// The durable buffer of provisionally-accepted payments.
///
/// Thin lifecycle layer over a [`QueueStore`]: it builds entries, enforces
/// the removed-exactly-once-resolved rule, and keeps retry bookkeeping in
/// one place.
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
}

impl OfflineQueue {
    /// Wraps a store.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Durably accepts a payment for later settlement. Returns only after
    /// the entry is safe against process restart.
    pub fn enqueue(
        &self,
        payment_id: PaymentId,
        raw_token: impl Into<String>,
        mint_url: impl Into<String>,
        trusted_mints: BTreeSet<String>,
    ) -> Result<QueueEntry, StoreError> {
        let entry = QueueEntry {
            payment_id,
            raw_token: raw_token.into(),
            mint_url: mint_url.into(),
            trusted_mints,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
        };
        self.store.insert(&entry)?;
        info!(payment_id = %payment_id, mint = %entry.mint_url, "offline payment queued");
        Ok(entry)
    }

    /// All entries, FIFO by enqueue time.
    pub fn pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.store.pending()
    }

    /// Looks up one entry.
    pub fn get(&self, payment_id: &PaymentId) -> Result<Option<QueueEntry>, StoreError> {
        self.store.get(payment_id)
    }

    /// Removes an entry that reached a final outcome (settled or
    /// permanently failed). Idempotent.
    pub fn resolve(&self, payment_id: &PaymentId) -> Result<(), StoreError> {
        self.store.remove(payment_id)
    }

    /// Records a transient failure: bumps the retry count, notes the
    /// error, and schedules the next attempt. The entry stays queued.
    pub fn defer(
        &self,
        mut entry: QueueEntry,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<QueueEntry, StoreError> {
        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        entry.next_attempt_at = Some(next_attempt_at);
        self.store.update(&entry)?;
        Ok(entry)
    }

    /// Number of unresolved entries.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.store.pending()?.len())
    }

    /// `true` when nothing awaits reconciliation.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
