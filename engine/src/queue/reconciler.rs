//! Settlement of provisionally-accepted offline payments.
//!
//! The reconciler replays the exact online pipeline — validate →
//! check_state → swap — for each queued entry, in FIFO order. Entries are
//! processed one at a time, which makes per-mint serialization trivial
//! here; the mint client's own per-mint lock additionally guards against
//! racing a concurrent live payment's swap.
//!
//! Overpayment in this path is tip-only by design: the merchant already
//! handed over the goods, and there is no customer present to receive a
//! change token. The entry captures a settlement outcome; it does not
//! issue change after the fact.
//!
//! Reconciliation may be triggered from several places at once
//! (connectivity edges, periodic timer, operator action). A per-entry
//! in-flight set makes overlapping runs idempotent: whoever claims the
//! entry first processes it, everyone else skips it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ReconcilePolicy;
use crate::mint::{settlement_id, MintClient, MintError};
use crate::payment::error::ErrorClass;
use crate::payment::events::{EventBus, PaymentEvent};
use crate::payment::types::{
    OverpaymentHandling, OverpaymentInfo, PaymentId, PaymentRecord, PaymentState,
};
use crate::token;

use super::store::PaymentStore;
use super::{OfflineQueue, QueueEntry};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Counters for one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entries settled and removed.
    pub completed: usize,
    /// Entries that failed permanently and were removed.
    pub failed: usize,
    /// Entries deferred with backoff (still queued).
    pub deferred: usize,
    /// Entries skipped: not yet due, or claimed by a concurrent run.
    pub skipped: usize,
}

/// Per-entry result of a settlement attempt.
enum Settle {
    Done(PaymentRecord),
    /// The same entry will fail the same way forever; remove it. This is
    /// the accepted business risk of offline mode, not a retry candidate.
    Permanent(ErrorClass, String),
    /// Worth retrying after backoff.
    Transient(String),
}

/// Whether a mint failure during reconciliation is worth another attempt.
///
/// `SwapStatusUnknown` is deliberately transient here: the next attempt's
/// `check_state` resolves the ambiguity — unspent means our swap never
/// landed and can be retried, spent means it is a permanent failure.
fn is_transient(err: &MintError) -> bool {
    err.is_retryable()
        || matches!(
            err,
            MintError::SwapStatusUnknown { .. } | MintError::ProofPending
        )
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Drains the offline queue once connectivity allows.
pub struct Reconciler {
    mint: Arc<MintClient>,
    queue: Arc<OfflineQueue>,
    payments: Arc<dyn PaymentStore>,
    events: EventBus,
    policy: ReconcilePolicy,
    /// Entries currently being settled by some run of `reconcile`.
    in_flight: Mutex<HashSet<PaymentId>>,
}

impl Reconciler {
    /// Builds a reconciler over shared engine components.
    pub fn new(
        mint: Arc<MintClient>,
        queue: Arc<OfflineQueue>,
        payments: Arc<dyn PaymentStore>,
        events: EventBus,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            mint,
            queue,
            payments,
            events,
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over the queue, FIFO by enqueue time.
    ///
    /// Failures are isolated per entry: a poisoned entry is deferred or
    /// removed, never allowed to abort the rest of the drain.
    pub async fn reconcile(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let entries = match self.queue.pending() {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "cannot read offline queue");
                return summary;
            }
        };
        if entries.is_empty() {
            return summary;
        }
        info!(entries = entries.len(), "reconciling offline queue");

        for entry in entries {
            if !entry.due(Utc::now()) {
                summary.skipped += 1;
                continue;
            }
            // Claim the entry; a concurrent run that already holds it wins.
            if !self.in_flight.lock().insert(entry.payment_id) {
                summary.skipped += 1;
                continue;
            }

            let outcome = self.settle(&entry).await;
            self.apply(&entry, outcome, &mut summary);

            self.in_flight.lock().remove(&entry.payment_id);
        }

        summary
    }

    /// Drives reconciliation until the watch channel closes: wakes on
    /// restored connectivity and re-scans periodically while online.
    pub async fn run(&self, mut online: watch::Receiver<bool>) {
        loop {
            let is_online = *online.borrow_and_update();
            if !is_online {
                if online.changed().await.is_err() {
                    return;
                }
                continue;
            }

            self.reconcile().await;

            tokio::select! {
                _ = tokio::time::sleep(self.policy.interval) => {}
                changed = online.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Replays the online pipeline for one entry.
    async fn settle(&self, entry: &QueueEntry) -> Settle {
        let token = match token::parse(&entry.raw_token) {
            Ok(token) => token,
            Err(e) => {
                return Settle::Permanent(ErrorClass::Format, format!("invalid token format: {e}"))
            }
        };

        let keyset = match self.mint.validate(&token, &entry.trusted_mints).await {
            Ok(keyset) => keyset,
            Err(e) if is_transient(&e) => return Settle::Transient(e.to_string()),
            Err(e) => return Settle::Permanent(ErrorClass::State, e.to_string()),
        };

        let states = match self.mint.check_state(&token.mint_url, &token.proofs).await {
            Ok(states) => states,
            Err(e) if is_transient(&e) => return Settle::Transient(e.to_string()),
            Err(e) => return Settle::Permanent(ErrorClass::State, e.to_string()),
        };
        if let Err(e) = MintClient::assert_spendable(&states) {
            return if is_transient(&e) {
                Settle::Transient(e.to_string())
            } else {
                Settle::Permanent(ErrorClass::State, e.to_string())
            };
        }

        let redeemed = match self
            .mint
            .swap_all(&token.mint_url, &token.proofs, &keyset)
            .await
        {
            Ok(redeemed) => redeemed,
            Err(e) if is_transient(&e) => return Settle::Transient(e.to_string()),
            Err(e) => return Settle::Permanent(ErrorClass::State, e.to_string()),
        };
        debug_assert_eq!(
            redeemed.iter().map(|p| p.amount).sum::<u64>(),
            token.amount()
        );

        // Assemble the settlement record. Overpayment relative to the
        // original request is tip-only in this path.
        let amount = token.amount();
        let stored = self.payments.get(&entry.payment_id).ok().flatten();
        let (requested, unit) = match &stored {
            Some(p) => (p.requested_amount, p.requested_unit.clone()),
            None => (amount, token.unit.clone().unwrap_or_else(|| "sat".into())),
        };
        let overpayment = (amount > requested).then(|| OverpaymentInfo {
            amount: amount - requested,
            handling: OverpaymentHandling::Tip,
            change_token: None,
        });

        Settle::Done(PaymentRecord {
            payment_id: entry.payment_id,
            amount,
            unit,
            mint_url: token.mint_url.clone(),
            transaction_id: settlement_id(&token.proofs),
            overpayment,
            completed_at: Utc::now(),
        })
    }

    /// Applies a settlement outcome: queue removal/deferral, payment store
    /// update, event emission.
    fn apply(&self, entry: &QueueEntry, outcome: Settle, summary: &mut ReconcileSummary) {
        match outcome {
            Settle::Done(record) => {
                if let Err(e) = self.queue.resolve(&entry.payment_id) {
                    // The swap committed; losing the removal would re-settle
                    // the entry, which the next run's check_state will catch
                    // as AlreadySpent. Log loudly and move on.
                    error!(payment_id = %entry.payment_id, error = %e,
                        "failed to remove settled queue entry");
                }
                self.store_outcome(entry, PaymentState::Completed, |p| {
                    p.received_amount = Some(record.amount);
                    p.transaction_id = Some(record.transaction_id.clone());
                    p.overpayment = record.overpayment.clone();
                });
                info!(payment_id = %entry.payment_id, amount = record.amount,
                    "offline payment settled");
                self.events.emit(PaymentEvent::Completed { record });
                summary.completed += 1;
            }
            Settle::Permanent(class, detail) => {
                if let Err(e) = self.queue.resolve(&entry.payment_id) {
                    error!(payment_id = %entry.payment_id, error = %e,
                        "failed to remove dead queue entry");
                }
                self.store_outcome(entry, PaymentState::Failed, |p| {
                    p.error = Some(detail.clone());
                });
                warn!(payment_id = %entry.payment_id, detail,
                    "offline payment failed permanently");
                self.events.emit(PaymentEvent::Failed {
                    payment_id: entry.payment_id,
                    class,
                    detail,
                });
                summary.failed += 1;
            }
            Settle::Transient(detail) => {
                let next = Utc::now()
                    + chrono::Duration::from_std(self.policy.backoff_for(entry.retry_count))
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                match self.queue.defer(entry.clone(), &detail, next) {
                    Ok(deferred) => {
                        info!(payment_id = %entry.payment_id,
                            retry_count = deferred.retry_count, detail,
                            "offline payment deferred");
                        self.events.emit(PaymentEvent::ReconcileDeferred {
                            payment_id: entry.payment_id,
                            retry_count: deferred.retry_count,
                            detail,
                        });
                    }
                    Err(e) => {
                        error!(payment_id = %entry.payment_id, error = %e,
                            "failed to defer queue entry");
                    }
                }
                summary.deferred += 1;
            }
        }
    }

    /// Updates the persisted payment record for a final outcome. A missing
    /// or already-terminal record is logged, not fatal — the queue entry is
    /// the source of truth for settlement.
    fn store_outcome(
        &self,
        entry: &QueueEntry,
        to: PaymentState,
        mutate: impl FnOnce(&mut crate::payment::types::Payment),
    ) {
        match self.payments.get(&entry.payment_id) {
            Ok(Some(mut payment)) => {
                mutate(&mut payment);
                if payment.transition(to).is_err() {
                    warn!(payment_id = %entry.payment_id, state = %payment.state,
                        "queued payment not in pending_verification");
                    return;
                }
                if let Err(e) = self.payments.save(&payment) {
                    error!(payment_id = %entry.payment_id, error = %e,
                        "failed to persist reconciled payment");
                }
            }
            Ok(None) => {
                warn!(payment_id = %entry.payment_id, "no payment record for queue entry");
            }
            Err(e) => {
                error!(payment_id = %entry.payment_id, error = %e,
                    "failed to load payment for queue entry");
            }
        }
    }
}
