//! The terminal orchestrator and per-payment session.
//!
//! [`Terminal`] owns the collaborators — mint client, offline queue,
//! stores, connectivity, prompter, event bus — and enforces the one rule
//! that lives above any single payment: at most one payment is active per
//! terminal at a time.
//!
//! [`PaymentSession`] drives one payment through the pipeline:
//!
//! ```text
//!   parse ─► amount check ─► reachability ─┬─► validate ─► check_state ─► swap ─► completed
//!                                          └─► offline queue ─► pending_verification
//! ```
//!
//! Ordering rules the pipeline never bends:
//!
//! - no mint call before the local amount check passes;
//! - cancellation gates sit between stages, and the last one closes
//!   *atomically* with the swap starting — once the swap is in flight,
//!   cancellation is refused, the operation completes or fails;
//! - a retryable network failure before the swap may reroute to the
//!   offline queue (when eligible); after the swap is submitted there is
//!   no rerouting, only completion, clean failure, or status-unknown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, TerminalConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::mint::{settlement_id, Keyset, MintClient};
use crate::queue::reconciler::Reconciler;
use crate::queue::store::PaymentStore;
use crate::queue::OfflineQueue;
use crate::token::{self, Proof, Token};

use super::error::PaymentError;
use super::events::{EventBus, PaymentEvent};
use super::policy::{OverpaymentDecision, OverpaymentPrompter};
use super::source::TokenSource;
use super::types::{
    OverpaymentHandling, OverpaymentInfo, Payment, PaymentId, PaymentState,
};

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

struct TerminalCore {
    config: TerminalConfig,
    mint: Arc<MintClient>,
    queue: Arc<OfflineQueue>,
    payments: Arc<dyn PaymentStore>,
    connectivity: Arc<ConnectivityMonitor>,
    prompter: Arc<dyn OverpaymentPrompter>,
    events: EventBus,
    /// The single-active-payment slot. Holding a `PaymentId` here means a
    /// live session owns the terminal.
    active: Mutex<Option<PaymentId>>,
}

/// The explicitly constructed payment orchestrator for one terminal.
///
/// Cheap to clone; all clones share the same core. Construct once at
/// startup with validated configuration and injected collaborators.
#[derive(Clone)]
pub struct Terminal {
    core: Arc<TerminalCore>,
}

impl Terminal {
    /// Builds a terminal. The configuration is re-validated here so a
    /// terminal that exists is a terminal with coherent knobs.
    pub fn new(
        config: TerminalConfig,
        mint: Arc<MintClient>,
        queue: Arc<OfflineQueue>,
        payments: Arc<dyn PaymentStore>,
        connectivity: Arc<ConnectivityMonitor>,
        prompter: Arc<dyn OverpaymentPrompter>,
    ) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            core: Arc::new(TerminalCore {
                config,
                mint,
                queue,
                payments,
                connectivity,
                prompter,
                events,
                active: Mutex::new(None),
            }),
        })
    }

    /// The terminal's event bus.
    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    /// Subscribes to payment events.
    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.core.events.subscribe()
    }

    /// The connectivity monitor, for wiring probe loops and the reconciler.
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.core.connectivity
    }

    /// Builds a reconciler sharing this terminal's components. Run it as a
    /// background task alongside live payments; the mint client's per-mint
    /// lock keeps the two from racing swaps against one mint.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.core.mint),
            Arc::clone(&self.core.queue),
            Arc::clone(&self.core.payments),
            self.core.events.clone(),
            self.core.config.reconcile.clone(),
        )
    }

    /// Starts a payment for `requested_amount` (in the terminal's base
    /// unit). `currency` and `exchange_rate` are recorded for the receipt;
    /// amount comparison happens in the base unit.
    ///
    /// Fails with [`PaymentError::SessionBusy`] while another payment is
    /// active. A slot whose payment already reached a terminal state is
    /// reclaimed automatically.
    pub fn start_payment(
        &self,
        requested_amount: u64,
        currency: impl Into<String>,
        exchange_rate: f64,
    ) -> Result<PaymentSession, PaymentError> {
        let payment = Payment::new(requested_amount, currency, exchange_rate);
        {
            let mut active = self.core.active.lock();
            if let Some(prev) = *active {
                let reclaimable = matches!(
                    self.core.payments.get(&prev),
                    Ok(Some(p)) if p.state.is_terminal()
                );
                if !reclaimable {
                    return Err(PaymentError::SessionBusy);
                }
                debug!(payment_id = %prev, "reclaiming stale session slot");
            }
            *active = Some(payment.id);
        }

        if let Err(e) = self.core.payments.save(&payment) {
            let mut active = self.core.active.lock();
            if *active == Some(payment.id) {
                *active = None;
            }
            return Err(e.into());
        }

        info!(payment_id = %payment.id, requested_amount, "payment started");
        self.core.events.emit(PaymentEvent::Started {
            payment_id: payment.id,
            requested_amount,
            unit: payment.requested_unit.clone(),
        });

        Ok(PaymentSession {
            core: Arc::clone(&self.core),
            shared: Arc::new(SessionShared {
                payment: Mutex::new(payment),
                phase: Mutex::new(Phase::Idle),
                cancel_requested: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                redeemed: Mutex::new(None),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// PaymentSession
// ---------------------------------------------------------------------------

/// Where the pipeline currently is, for cancellation arbitration.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No pipeline running.
    Idle,
    /// Pipeline running, pre- or post-swap.
    Processing,
    /// The swap is in flight; cancellation must be refused.
    SwapInFlight,
}

struct SessionShared {
    payment: Mutex<Payment>,
    phase: Mutex<Phase>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    /// Fresh proofs from a completed redemption, awaiting pickup by the
    /// embedding wallet via [`PaymentSession::take_redeemed_proofs`].
    redeemed: Mutex<Option<Vec<Proof>>>,
}

/// One live payment. Clone freely — a UI task typically holds a clone for
/// cancellation while another drives [`process_token`].
///
/// Dropping the last clone of a session that never reached a terminal
/// state cancels it and frees the terminal slot.
///
/// [`process_token`]: PaymentSession::process_token
pub struct PaymentSession {
    core: Arc<TerminalCore>,
    shared: Arc<SessionShared>,
}

impl Clone for PaymentSession {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for PaymentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSession")
            .field("id", &self.shared.payment.lock().id)
            .field("state", &self.shared.payment.lock().state)
            .finish()
    }
}

impl PaymentSession {
    /// This payment's identifier.
    pub fn id(&self) -> PaymentId {
        self.shared.payment.lock().id
    }

    /// Snapshot of the payment as it stands.
    pub fn payment(&self) -> Payment {
        self.shared.payment.lock().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PaymentState {
        self.shared.payment.lock().state
    }

    /// Takes the fresh proofs produced by a completed redemption. The
    /// embedding wallet banks these; the engine does not keep custody.
    pub fn take_redeemed_proofs(&self) -> Option<Vec<Proof>> {
        self.shared.redeemed.lock().take()
    }

    /// Requests cancellation.
    ///
    /// Allowed from any non-terminal, pre-swap state; interrupts an
    /// in-flight hardware read or operator prompt. Refused with
    /// [`PaymentError::SwapInFlight`] once the swap has been submitted —
    /// the redemption either completes or fails, it cannot be aborted
    /// without risking indeterminate mint state.
    pub fn cancel(&self) -> Result<(), PaymentError> {
        let phase = self.shared.phase.lock();
        if *phase == Phase::SwapInFlight {
            return Err(PaymentError::SwapInFlight);
        }
        {
            let p = self.shared.payment.lock();
            if !p.state.allows_cancel() {
                return Err(PaymentError::InvalidState { state: p.state });
            }
        }
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        self.shared.cancel_notify.notify_waiters();

        // With no pipeline running there is nobody to observe the flag;
        // finalize here. A running pipeline finalizes at its next gate.
        if *phase == Phase::Idle {
            drop(phase);
            self.finalize_cancelled();
        }
        Ok(())
    }

    /// Waits for the hardware source to produce a token, racing the read
    /// against cancellation.
    ///
    /// A source failure surfaces as an error but leaves the payment in
    /// `pending` so the read can be retried; cancellation finalizes the
    /// payment as `cancelled`.
    pub async fn read_token(&self, source: &dyn TokenSource) -> Result<String, PaymentError> {
        if self.shared.cancel_requested.load(Ordering::SeqCst) {
            return Err(PaymentError::Cancelled);
        }
        tokio::select! {
            res = source.read() => Ok(res?),
            _ = self.shared.cancel_notify.notified() => Err(PaymentError::Cancelled),
        }
    }

    /// Processes a presented token through the full pipeline.
    ///
    /// Callable exactly once per session: re-invocation on a session that
    /// already left `pending` fails [`PaymentError::InvalidState`] without
    /// touching the mint — an already-completed payment can never trigger
    /// a second swap.
    pub async fn process_token(&self, raw: &str) -> Result<Payment, PaymentError> {
        {
            let mut phase = self.shared.phase.lock();
            let p = self.shared.payment.lock();
            if p.state != PaymentState::Pending {
                return Err(PaymentError::InvalidState { state: p.state });
            }
            *phase = Phase::Processing;
        }

        let result = self.pipeline(raw).await;
        *self.shared.phase.lock() = Phase::Idle;
        result
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn pipeline(&self, raw: &str) -> Result<Payment, PaymentError> {
        self.transition(PaymentState::TokenReceived)?;

        // 1. Parse. Malformed input fails fast with zero network traffic.
        let token = match token::parse(raw) {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e.into())),
        };
        let amount = token.amount();
        {
            self.shared.payment.lock().received_amount = Some(amount);
        }
        self.core.events.emit(PaymentEvent::TokenReceived {
            payment_id: self.id(),
            amount,
            mint_url: token.mint_url.clone(),
        });

        // 2. Unit agreement, then local arithmetic only: never contact the
        // mint for a token that cannot possibly satisfy the request.
        if let Some(unit) = &token.unit {
            if unit != &self.core.config.unit {
                return Err(self.fail(PaymentError::UnitMismatch {
                    token_unit: unit.clone(),
                    terminal_unit: self.core.config.unit.clone(),
                }));
            }
        }
        let requested = self.shared.payment.lock().requested_amount;
        if amount < requested {
            return Err(self.fail(PaymentError::InsufficientAmount {
                requested,
                presented: amount,
            }));
        }

        if self.cancel_pending() {
            return Err(self.finalize_cancelled());
        }

        // 3. Choose the path.
        let online = self.core.connectivity.refresh().await;
        if self.cancel_pending() {
            return Err(self.finalize_cancelled());
        }
        if !online {
            return self.accept_offline(&token, raw);
        }

        // 4. Online: validate → check_state → swap, in that order, always.
        self.transition(PaymentState::Validating)?;
        let keyset = match self
            .core
            .mint
            .validate(&token, &self.core.config.trusted_mints)
            .await
        {
            Ok(keyset) => keyset,
            Err(e) if e.is_retryable() && self.offline_eligible(amount) => {
                return self.accept_offline(&token, raw);
            }
            Err(e) => return Err(self.fail(e.into())),
        };
        if self.cancel_pending() {
            return Err(self.finalize_cancelled());
        }

        let states = match self.core.mint.check_state(&token.mint_url, &token.proofs).await {
            Ok(states) => states,
            Err(e) if e.is_retryable() && self.offline_eligible(amount) => {
                return self.accept_offline(&token, raw);
            }
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = MintClient::assert_spendable(&states) {
            return Err(self.fail(e.into()));
        }
        if self.cancel_pending() {
            return Err(self.finalize_cancelled());
        }

        // Overpayment classification (pure), possibly deferred to the
        // operator. The prompt races against cancellation.
        let overpaid = amount - requested;
        let handling = match self.core.config.overpayment.classify(overpaid) {
            None => None,
            Some(OverpaymentDecision::Tip) => Some(OverpaymentHandling::Tip),
            Some(OverpaymentDecision::Change) => Some(OverpaymentHandling::Change),
            Some(OverpaymentDecision::Prompt) => {
                self.core.events.emit(PaymentEvent::OverpaymentPrompt {
                    payment_id: self.id(),
                    amount: overpaid,
                });
                if self.cancel_pending() {
                    return Err(self.finalize_cancelled());
                }
                tokio::select! {
                    handling = self.core.prompter.resolve(self.id(), overpaid) => Some(handling),
                    _ = self.shared.cancel_notify.notified() => {
                        return Err(self.finalize_cancelled());
                    }
                }
            }
        };

        self.transition(PaymentState::Processing)?;
        self.redeem(&token, raw, &keyset, requested, overpaid, handling)
            .await
    }

    /// The swap stage. The final cancellation gate closes atomically with
    /// the phase moving to `SwapInFlight`.
    async fn redeem(
        &self,
        token: &Token,
        raw: &str,
        keyset: &Keyset,
        requested: u64,
        overpaid: u64,
        handling: Option<OverpaymentHandling>,
    ) -> Result<Payment, PaymentError> {
        {
            let mut phase = self.shared.phase.lock();
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                drop(phase);
                return Err(self.finalize_cancelled());
            }
            *phase = Phase::SwapInFlight;
        }

        let swap_result = match handling {
            None | Some(OverpaymentHandling::Tip) => self
                .core
                .mint
                .swap_all(&token.mint_url, &token.proofs, keyset)
                .await
                .map(|redeemed| (redeemed, None)),
            Some(OverpaymentHandling::Change) => self
                .core
                .mint
                .split(&token.mint_url, &token.proofs, requested, keyset)
                .await
                .map(|split| {
                    let change = token::encode(&Token::new(
                        token.mint_url.clone(),
                        split.send,
                        token.unit.clone(),
                        None,
                    ));
                    (split.keep, Some(change))
                }),
        };
        // The phase stays SwapInFlight until process_token's epilogue sets
        // Idle: by then the payment is terminal (or parked), so a late
        // cancel gets an honest refusal instead of a silent no-op.

        match swap_result {
            Err(e) if e.is_retryable() && self.offline_eligible(token.amount()) => {
                // The connection was refused before the request carried;
                // the inputs are untouched and the token may still queue.
                self.accept_offline(token, raw)
            }
            Err(e) => Err(self.fail(e.into())),
            Ok((redeemed, change_token)) => {
                let transaction_id = settlement_id(&token.proofs);
                {
                    let mut p = self.shared.payment.lock();
                    p.transaction_id = Some(transaction_id);
                    if overpaid > 0 {
                        p.overpayment = Some(OverpaymentInfo {
                            amount: overpaid,
                            handling: handling.unwrap_or(OverpaymentHandling::Tip),
                            change_token,
                        });
                    }
                }
                *self.shared.redeemed.lock() = Some(redeemed);
                self.transition(PaymentState::Completed)?;

                let payment = self.payment();
                if let Some(record) = payment.record(&token.mint_url) {
                    info!(payment_id = %payment.id, amount = record.amount,
                        transaction_id = %record.transaction_id, "payment completed");
                    self.core.events.emit(PaymentEvent::Completed { record });
                }
                Ok(payment)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Offline path
    // -----------------------------------------------------------------------

    fn offline_eligible(&self, amount: u64) -> bool {
        let offline = &self.core.config.offline;
        offline.enabled && amount <= offline.max_amount
    }

    /// Provisionally accepts the token: durable queue write, then
    /// `pending_verification`. Zero mint calls are made here; overpayment
    /// is tip-only because no change can be produced without the mint.
    fn accept_offline(&self, token: &Token, raw: &str) -> Result<Payment, PaymentError> {
        let amount = token.amount();
        let offline = &self.core.config.offline;
        if !offline.enabled {
            return Err(self.fail(PaymentError::OfflineDisabled));
        }
        if amount > offline.max_amount {
            return Err(self.fail(PaymentError::OfflineCeilingExceeded {
                limit: offline.max_amount,
                presented: amount,
            }));
        }

        if let Err(e) = self.core.queue.enqueue(
            self.id(),
            raw,
            token.mint_url.clone(),
            self.core.config.trusted_mints.clone(),
        ) {
            return Err(self.fail(e.into()));
        }

        {
            let mut p = self.shared.payment.lock();
            p.offline_queued = true;
            let overpaid = amount.saturating_sub(p.requested_amount);
            if overpaid > 0 {
                p.overpayment = Some(OverpaymentInfo {
                    amount: overpaid,
                    handling: OverpaymentHandling::Tip,
                    change_token: None,
                });
            }
        }
        self.transition(PaymentState::PendingVerification)?;
        self.core.events.emit(PaymentEvent::OfflineQueued {
            payment_id: self.id(),
            amount,
            mint_url: token.mint_url.clone(),
        });

        Ok(self.payment())
    }

    // -----------------------------------------------------------------------
    // State plumbing
    // -----------------------------------------------------------------------

    fn cancel_pending(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// Moves the payment to `to`, emits the transition, and — when the
    /// session's work is over — releases the terminal slot and persists.
    fn transition(&self, to: PaymentState) -> Result<(), PaymentError> {
        let (payment_id, from, snapshot) = {
            let mut p = self.shared.payment.lock();
            let from = p.transition(to)?;
            (p.id, from, p.clone())
        };
        self.core.events.emit(PaymentEvent::StateChanged {
            payment_id,
            from,
            to,
        });

        if to.is_terminal() || to == PaymentState::PendingVerification {
            self.release_slot(payment_id);
            if let Err(e) = self.core.payments.save(&snapshot) {
                warn!(payment_id = %payment_id, error = %e, "failed to persist payment");
            }
        }
        Ok(())
    }

    fn release_slot(&self, payment_id: PaymentId) {
        let mut active = self.core.active.lock();
        if *active == Some(payment_id) {
            *active = None;
        }
    }

    /// Records a failure: error message, `failed` state, failure event.
    /// Returns the error for `return Err(...)` ergonomics.
    fn fail(&self, error: PaymentError) -> PaymentError {
        {
            self.shared.payment.lock().error = Some(error.to_string());
        }
        if let Err(transition_err) = self.transition(PaymentState::Failed) {
            warn!(payment_id = %self.id(), error = %transition_err,
                "could not mark payment failed");
        }
        warn!(payment_id = %self.id(), class = ?error.class(), error = %error,
            "payment failed");
        self.core.events.emit(PaymentEvent::Failed {
            payment_id: self.id(),
            class: error.class(),
            detail: error.to_string(),
        });
        error
    }

    /// Finalizes a cancellation observed at a gate.
    fn finalize_cancelled(&self) -> PaymentError {
        if self.transition(PaymentState::Cancelled).is_ok() {
            info!(payment_id = %self.id(), "payment cancelled");
            self.core.events.emit(PaymentEvent::Cancelled {
                payment_id: self.id(),
            });
        }
        PaymentError::Cancelled
    }
}

impl Drop for PaymentSession {
    /// Dropping the last handle to a session that never finished counts as
    /// walking away: the payment is cancelled and the terminal slot freed,
    /// so an abandoned session cannot brick the terminal.
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) != 1 {
            return;
        }
        let state = self.shared.payment.lock().state;
        if state.is_terminal() || state == PaymentState::PendingVerification {
            return;
        }
        debug!(payment_id = %self.id(), "abandoned session, cancelling");
        let _ = self.finalize_cancelled();
    }
}
