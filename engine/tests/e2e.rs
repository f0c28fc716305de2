//! End-to-end tests for the till payment engine.
//!
//! These tests exercise the full payment lifecycle against an in-process
//! scripted mint: session creation, token processing, overpayment
//! handling, offline acceptance, and queue reconciliation. They prove the
//! ordering guarantees the engine advertises — no mint call before the
//! local amount check, exactly one swap per completed payment, cancellation
//! refused mid-swap.
//!
//! Each test stands alone with its own terminal, stores, and mint. No
//! shared state, no test ordering dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use till_engine::config::{OfflinePolicy, ReconcilePolicy, TerminalConfig};
use till_engine::connectivity::{ConnectivityMonitor, ConnectivityProbe};
use till_engine::mint::{
    BlindError, BlindSignature, BlindedMessage, BlindingBackend, Keyset, MintClient,
    MintRejection, MintTransport, PreMint, PreMintSecrets, ProofState, TransportError,
};
use till_engine::payment::{
    ErrorClass, OverpaymentHandling, OverpaymentMode, OverpaymentPolicy, OverpaymentPrompter,
    PaymentError, PaymentEvent, PaymentId, PaymentState, TipFallbackPrompter,
};
use till_engine::queue::store::{MemoryStore, PaymentStore};
use till_engine::queue::OfflineQueue;
use till_engine::token::{self, KeysetId, Proof, Token};
use till_engine::Terminal;

const MINT_URL: &str = "https://mint.example";
const KEYSET_ID: &str = "009a1f293253e41e";

// ---------------------------------------------------------------------------
// Test Doubles
// ---------------------------------------------------------------------------

/// How the scripted mint answers swap requests.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SwapMode {
    /// Sign the outputs and consume the inputs.
    Honor,
    /// Answer with a transport timeout (status becomes ambiguous).
    Timeout,
    /// Refuse the connection (request never carried).
    Refuse,
    /// Sleep briefly, then honor. For exercising mid-swap behavior.
    Slow,
}

/// In-process mint with scriptable behavior and call counters.
struct ScriptedMint {
    keyset: Keyset,
    /// Per-secret spent state; missing means unspent.
    states: Mutex<HashMap<String, ProofState>>,
    swap_mode: Mutex<SwapMode>,
    /// When set, keyset and state queries fail with this flavor of
    /// unreachability.
    unreachable: AtomicBool,
    keyset_calls: AtomicUsize,
    state_calls: AtomicUsize,
    swap_calls: AtomicUsize,
    /// Total input value of every honored swap, in order.
    swapped_amounts: Mutex<Vec<u64>>,
}

impl ScriptedMint {
    fn new() -> Self {
        let keys = (0..18u32)
            .map(|bit| (1u64 << bit, format!("02{:064x}", bit)))
            .collect();
        Self {
            keyset: Keyset {
                id: KeysetId::from(KEYSET_ID),
                unit: "sat".into(),
                keys,
                active: true,
            },
            states: Mutex::new(HashMap::new()),
            swap_mode: Mutex::new(SwapMode::Honor),
            unreachable: AtomicBool::new(false),
            keyset_calls: AtomicUsize::new(0),
            state_calls: AtomicUsize::new(0),
            swap_calls: AtomicUsize::new(0),
            swapped_amounts: Mutex::new(Vec::new()),
        }
    }

    fn set_swap_mode(&self, mode: SwapMode) {
        *self.swap_mode.lock() = mode;
    }

    fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn mark_spent(&self, token: &Token) {
        let mut states = self.states.lock();
        for proof in &token.proofs {
            states.insert(proof.secret.clone(), ProofState::Spent);
        }
    }

    fn total_calls(&self) -> usize {
        self.keyset_calls.load(Ordering::SeqCst)
            + self.state_calls.load(Ordering::SeqCst)
            + self.swap_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MintTransport for ScriptedMint {
    async fn active_keyset(&self, _mint_url: &str) -> Result<Keyset, TransportError> {
        self.keyset_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        Ok(self.keyset.clone())
    }

    async fn check_state(
        &self,
        _mint_url: &str,
        proofs: &[Proof],
    ) -> Result<Vec<ProofState>, TransportError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        let states = self.states.lock();
        Ok(proofs
            .iter()
            .map(|p| states.get(&p.secret).copied().unwrap_or(ProofState::Unspent))
            .collect())
    }

    async fn swap(
        &self,
        _mint_url: &str,
        inputs: &[Proof],
        outputs: &[BlindedMessage],
    ) -> Result<Vec<BlindSignature>, TransportError> {
        self.swap_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.swap_mode.lock();
        match mode {
            SwapMode::Timeout => return Err(TransportError::Timeout),
            SwapMode::Refuse => {
                return Err(TransportError::Unavailable("connection refused".into()))
            }
            SwapMode::Slow => tokio::time::sleep(Duration::from_millis(250)).await,
            SwapMode::Honor => {}
        }

        let mut states = self.states.lock();
        if inputs
            .iter()
            .any(|p| states.get(&p.secret) == Some(&ProofState::Spent))
        {
            return Err(TransportError::Rejected(MintRejection::AlreadySpent));
        }
        for input in inputs {
            states.insert(input.secret.clone(), ProofState::Spent);
        }
        drop(states);

        self.swapped_amounts
            .lock()
            .push(inputs.iter().map(|p| p.amount).sum());

        Ok(outputs
            .iter()
            .enumerate()
            .map(|(i, out)| BlindSignature {
                amount: out.amount,
                keyset_id: out.keyset_id.clone(),
                c: format!("03{:064x}", i),
            })
            .collect())
    }
}

/// Deterministic blinding backend: fresh numbered secrets, no curves.
struct TestBlinder {
    counter: AtomicU64,
}

impl TestBlinder {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl BlindingBackend for TestBlinder {
    fn premint(&self, keyset: &Keyset, amounts: &[u64]) -> Result<PreMintSecrets, BlindError> {
        let outputs = amounts
            .iter()
            .map(|&amount| {
                if !keyset.supports_amount(amount) {
                    return Err(BlindError::UnsupportedAmount(amount));
                }
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(PreMint {
                    blinded: BlindedMessage {
                        amount,
                        keyset_id: keyset.id.clone(),
                        b: format!("02{n:064x}"),
                    },
                    secret: format!("fresh-{n:08}"),
                    r: format!("r-{n}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PreMintSecrets { outputs })
    }

    fn unblind(
        &self,
        pre: &PreMintSecrets,
        signatures: &[BlindSignature],
        _keyset: &Keyset,
    ) -> Result<Vec<Proof>, BlindError> {
        if signatures.len() != pre.len() {
            return Err(BlindError::SignatureMismatch(format!(
                "{} signatures for {} outputs",
                signatures.len(),
                pre.len()
            )));
        }
        Ok(pre
            .outputs
            .iter()
            .zip(signatures)
            .map(|(out, sig)| Proof {
                amount: sig.amount,
                keyset_id: sig.keyset_id.clone(),
                secret: out.secret.clone(),
                c: format!("02{:064x}", sig.amount),
            })
            .collect())
    }
}

/// Connectivity probe with a switch.
struct FlagProbe(AtomicBool);

#[async_trait]
impl ConnectivityProbe for FlagProbe {
    async fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    terminal: Terminal,
    mint: Arc<ScriptedMint>,
    store: Arc<MemoryStore>,
    queue: Arc<OfflineQueue>,
    probe: Arc<FlagProbe>,
}

impl Harness {
    fn with_config(config: TerminalConfig) -> Self {
        Self::build(config, Arc::new(TipFallbackPrompter))
    }

    fn build(config: TerminalConfig, prompter: Arc<dyn OverpaymentPrompter>) -> Self {
        let mint = Arc::new(ScriptedMint::new());
        let client = Arc::new(MintClient::new(
            mint.clone(),
            Arc::new(TestBlinder::new()),
            Duration::from_secs(5),
        ));
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(OfflineQueue::new(store.clone()));
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let connectivity = Arc::new(ConnectivityMonitor::new(probe.clone()));

        let terminal = Terminal::new(
            config,
            client,
            queue.clone(),
            store.clone(),
            connectivity,
            prompter,
        )
        .expect("valid config");

        Self {
            terminal,
            mint,
            store,
            queue,
            probe,
        }
    }

    fn online() -> Self {
        Self::with_config(base_config())
    }

    fn offline(max_amount: u64) -> Self {
        let harness = Self::with_config(TerminalConfig {
            offline: OfflinePolicy {
                enabled: true,
                max_amount,
            },
            ..base_config()
        });
        harness.probe.0.store(false, Ordering::SeqCst);
        harness
    }

    fn go_online(&self) {
        self.probe.0.store(true, Ordering::SeqCst);
    }
}

fn base_config() -> TerminalConfig {
    TerminalConfig {
        overpayment: OverpaymentPolicy::new(100, 1_000, OverpaymentMode::AutoTip).unwrap(),
        reconcile: ReconcilePolicy {
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(600),
            interval: Duration::from_secs(30),
        },
        ..TerminalConfig::default()
    }
    .with_trusted_mint(MINT_URL)
}

/// Builds a token whose proofs carry power-of-two denominations summing to
/// `amount`, signed under the scripted mint's keyset.
fn make_token(amount: u64, tag: &str) -> Token {
    let proofs = (0..u64::BITS)
        .map(|bit| 1u64 << bit)
        .filter(|d| amount & d != 0)
        .map(|d| Proof {
            amount: d,
            keyset_id: KeysetId::from(KEYSET_ID),
            secret: format!("{tag}-{d}"),
            c: format!("02{:064x}", d),
        })
        .collect();
    Token::new(MINT_URL, proofs, Some("sat".into()), None)
}

fn wire(amount: u64, tag: &str) -> String {
    token::encode(&make_token(amount, tag))
}

// ---------------------------------------------------------------------------
// 1. Online happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exact_amount_completes_with_one_swap() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(1000, "exact")).await.unwrap();

    assert_eq!(payment.state, PaymentState::Completed);
    assert_eq!(payment.received_amount, Some(1000));
    assert!(payment.overpayment.is_none());
    assert!(payment.transaction_id.is_some());
    assert!(payment.completed_at.is_some());

    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.mint.swapped_amounts.lock().as_slice(), &[1000]);

    // The merchant's fresh proofs conserve the token's value.
    let redeemed = session.take_redeemed_proofs().unwrap();
    assert_eq!(redeemed.iter().map(|p| p.amount).sum::<u64>(), 1000);
}

#[tokio::test]
async fn small_overpayment_kept_as_tip() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(1050, "tip")).await.unwrap();

    assert_eq!(payment.state, PaymentState::Completed);
    let over = payment.overpayment.expect("overpayment info");
    assert_eq!(over.amount, 50);
    assert_eq!(over.handling, OverpaymentHandling::Tip);
    assert!(over.change_token.is_none());

    // Tip path swaps everything in one call.
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.mint.swapped_amounts.lock().as_slice(), &[1050]);
}

#[tokio::test]
async fn large_overpayment_forces_change() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(5000, "change")).await.unwrap();

    assert_eq!(payment.state, PaymentState::Completed);
    let over = payment.overpayment.expect("overpayment info");
    assert_eq!(over.amount, 4000);
    assert_eq!(over.handling, OverpaymentHandling::Change);

    // The change token is a valid wire token worth exactly the excess,
    // drawn on the same mint.
    let change = token::parse(&over.change_token.expect("change token")).unwrap();
    assert_eq!(change.amount(), 4000);
    assert_eq!(change.mint_url, MINT_URL);

    // Split is still a single swap; the kept partition is the request.
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);
    let redeemed = session.take_redeemed_proofs().unwrap();
    assert_eq!(redeemed.iter().map(|p| p.amount).sum::<u64>(), 1000);
}

#[tokio::test]
async fn completed_event_carries_settlement_record() {
    let h = Harness::online();
    let mut events = h.terminal.subscribe();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    session.process_token(&wire(1000, "record")).await.unwrap();

    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        if let PaymentEvent::Completed { record } = event {
            assert_eq!(record.amount, 1000);
            assert_eq!(record.mint_url, MINT_URL);
            assert!(!record.transaction_id.is_empty());
            assert!(record.overpayment.is_none());
            saw_completed = true;
        }
    }
    assert!(saw_completed, "no Completed event observed");
}

// ---------------------------------------------------------------------------
// 2. Fail-fast paths (no mint traffic)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insufficient_amount_never_contacts_the_mint() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let err = session.process_token(&wire(900, "short")).await.unwrap_err();

    assert!(matches!(
        err,
        PaymentError::InsufficientAmount {
            requested: 1000,
            presented: 900
        }
    ));
    assert_eq!(session.state(), PaymentState::Failed);
    assert_eq!(h.mint.total_calls(), 0, "mint must not be contacted");
}

#[tokio::test]
async fn malformed_token_fails_fast() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let err = session.process_token("not a token").await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Format);
    assert_eq!(session.state(), PaymentState::Failed);
    assert_eq!(h.mint.total_calls(), 0);
}

#[tokio::test]
async fn foreign_unit_rejected_before_amount_comparison() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let mut token = make_token(1000, "usd");
    token.unit = Some("usd".into());
    let err = session
        .process_token(&token::encode(&token))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::UnitMismatch { .. }));
    assert_eq!(session.state(), PaymentState::Failed);
    assert_eq!(h.mint.total_calls(), 0);
}

#[tokio::test]
async fn untrusted_mint_rejected_before_any_network_call() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let mut token = make_token(1000, "foreign");
    token.mint_url = "https://rogue-mint.example".into();
    let err = session
        .process_token(&token::encode(&token))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::State);
    assert_eq!(session.state(), PaymentState::Failed);
    assert_eq!(h.mint.total_calls(), 0, "trust check precedes network");
}

#[tokio::test]
async fn spent_token_fails_without_swap_attempt() {
    let h = Harness::online();
    let token = make_token(1000, "spent");
    h.mint.mark_spent(&token);

    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    let err = session
        .process_token(&token::encode(&token))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Mint(till_engine::mint::MintError::AlreadySpent)
    ));
    assert_eq!(session.state(), PaymentState::Failed);
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// 3. Session exclusivity & idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_payment_is_rejected_while_one_is_active() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let err = h.terminal.start_payment(500, "sat", 1.0).unwrap_err();
    assert!(matches!(err, PaymentError::SessionBusy));

    // Finishing the first frees the terminal.
    session.process_token(&wire(1000, "busy")).await.unwrap();
    assert!(h.terminal.start_payment(500, "sat", 1.0).is_ok());
}

#[tokio::test]
async fn reprocessing_a_completed_session_never_swaps_again() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    session.process_token(&wire(1000, "once")).await.unwrap();
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);

    let err = session.process_token(&wire(1000, "again")).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InvalidState {
            state: PaymentState::Completed
        }
    ));
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// 4. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_before_processing_frees_the_terminal() {
    let h = Harness::online();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    session.cancel().unwrap();
    assert_eq!(session.state(), PaymentState::Cancelled);

    // Slot released; next customer can pay.
    assert!(h.terminal.start_payment(500, "sat", 1.0).is_ok());
    // Processing a cancelled session is refused without mint traffic.
    let err = session.process_token(&wire(1000, "late")).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));
    assert_eq!(h.mint.total_calls(), 0);
}

#[tokio::test]
async fn cancellation_is_refused_while_swap_is_in_flight() {
    let h = Harness::online();
    h.mint.set_swap_mode(SwapMode::Slow);

    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    let worker = session.clone();
    let handle =
        tokio::spawn(async move { worker.process_token(&wire(1000, "inflight")).await });

    // Give the pipeline time to submit the swap, then try to cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = session.cancel().unwrap_err();
    assert!(matches!(err, PaymentError::SwapInFlight));

    // The swap completes anyway: the operation finishes, it is not aborted.
    let payment = handle.await.unwrap().unwrap();
    assert_eq!(payment.state, PaymentState::Completed);
}

#[tokio::test]
async fn dropping_an_abandoned_session_cancels_it() {
    let h = Harness::online();
    {
        let _session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
        // Merchant walks away without cancelling.
    }
    // Slot is free again for the next customer.
    assert!(h.terminal.start_payment(500, "sat", 1.0).is_ok());
}

// ---------------------------------------------------------------------------
// 5. Operator prompts
// ---------------------------------------------------------------------------

/// Prompter that always answers with a fixed handling.
struct FixedPrompter(OverpaymentHandling);

#[async_trait]
impl OverpaymentPrompter for FixedPrompter {
    async fn resolve(&self, _payment_id: PaymentId, _amount: u64) -> OverpaymentHandling {
        self.0
    }
}

/// Prompter that never answers — models an operator who walked away.
struct StalledPrompter;

#[async_trait]
impl OverpaymentPrompter for StalledPrompter {
    async fn resolve(&self, _payment_id: PaymentId, _amount: u64) -> OverpaymentHandling {
        futures::future::pending().await
    }
}

fn prompt_config() -> TerminalConfig {
    TerminalConfig {
        overpayment: OverpaymentPolicy::new(100, 10_000, OverpaymentMode::Prompt).unwrap(),
        ..base_config()
    }
}

#[tokio::test]
async fn mid_range_overpayment_defers_to_the_operator() {
    let h = Harness::build(prompt_config(), Arc::new(FixedPrompter(OverpaymentHandling::Change)));
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(1500, "ask")).await.unwrap();

    let over = payment.overpayment.expect("overpayment info");
    assert_eq!(over.amount, 500);
    assert_eq!(over.handling, OverpaymentHandling::Change);
    let change = token::parse(&over.change_token.unwrap()).unwrap();
    assert_eq!(change.amount(), 500);
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_prompt() {
    let h = Harness::build(prompt_config(), Arc::new(StalledPrompter));
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let worker = session.clone();
    let handle = tokio::spawn(async move { worker.process_token(&wire(1500, "stall")).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.cancel().unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::Cancelled));
    assert_eq!(session.state(), PaymentState::Cancelled);
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// 6. Ambiguous swap outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn swap_timeout_is_status_unknown_not_clean_failure() {
    let h = Harness::with_config(TerminalConfig {
        // Offline acceptance is on — and must NOT be used for an
        // ambiguous swap: the inputs may already be consumed.
        offline: OfflinePolicy {
            enabled: true,
            max_amount: 10_000,
        },
        ..base_config()
    });
    h.mint.set_swap_mode(SwapMode::Timeout);

    let mut events = h.terminal.subscribe();
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    let err = session
        .process_token(&wire(1000, "ambiguous"))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Ambiguous);
    assert_eq!(session.state(), PaymentState::Failed);
    assert!(h.queue.is_empty().unwrap(), "ambiguous swap must not queue");

    let mut saw_ambiguous_failure = false;
    while let Ok(event) = events.try_recv() {
        if let PaymentEvent::Failed { class, .. } = event {
            saw_ambiguous_failure = class == ErrorClass::Ambiguous;
        }
    }
    assert!(saw_ambiguous_failure);
}

// ---------------------------------------------------------------------------
// 7. Offline acceptance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_payment_queues_durably_with_zero_mint_calls() {
    let h = Harness::offline(5000);
    let mut events = h.terminal.subscribe();
    let session = h.terminal.start_payment(3000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(3000, "offline")).await.unwrap();

    assert_eq!(payment.state, PaymentState::PendingVerification);
    assert!(payment.offline_queued);
    assert!(payment.overpayment.is_none());
    assert_eq!(h.queue.len().unwrap(), 1);
    assert_eq!(h.mint.total_calls(), 0, "no mint traffic at enqueue time");

    let mut saw_queued = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PaymentEvent::OfflineQueued { amount: 3000, .. }) {
            saw_queued = true;
        }
    }
    assert!(saw_queued, "no OfflineQueued event observed");

    // The slot frees when the payment parks for verification.
    assert!(h.terminal.start_payment(500, "sat", 1.0).is_ok());
}

#[tokio::test]
async fn offline_overpayment_is_always_a_tip() {
    let h = Harness::offline(5000);
    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();

    let payment = session.process_token(&wire(3000, "offtip")).await.unwrap();

    assert_eq!(payment.state, PaymentState::PendingVerification);
    let over = payment.overpayment.expect("overpayment info");
    assert_eq!(over.amount, 2000);
    assert_eq!(over.handling, OverpaymentHandling::Tip);
    assert!(over.change_token.is_none());
}

#[tokio::test]
async fn offline_ceiling_fails_instead_of_silently_queueing() {
    let h = Harness::offline(5000);
    let session = h.terminal.start_payment(9000, "sat", 1.0).unwrap();

    let err = session.process_token(&wire(9000, "big")).await.unwrap_err();

    assert!(matches!(
        err,
        PaymentError::OfflineCeilingExceeded {
            limit: 5000,
            presented: 9000
        }
    ));
    assert_eq!(session.state(), PaymentState::Failed);
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn offline_disabled_fails_the_payment() {
    let h = Harness::with_config(base_config());
    h.probe.0.store(false, Ordering::SeqCst);

    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    let err = session.process_token(&wire(1000, "noq")).await.unwrap_err();

    assert!(matches!(err, PaymentError::OfflineDisabled));
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn unreachable_mint_mid_validation_reroutes_to_queue() {
    // Connectivity looks fine, but the mint itself refuses connections:
    // the retryable failure reroutes to offline acceptance.
    let h = Harness::with_config(TerminalConfig {
        offline: OfflinePolicy {
            enabled: true,
            max_amount: 5000,
        },
        ..base_config()
    });
    h.mint.set_unreachable(true);

    let session = h.terminal.start_payment(1000, "sat", 1.0).unwrap();
    let payment = session.process_token(&wire(1000, "reroute")).await.unwrap();

    assert_eq!(payment.state, PaymentState::PendingVerification);
    assert_eq!(h.queue.len().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// 8. Reconciliation
// ---------------------------------------------------------------------------

/// Accepts a payment offline and returns its id plus the harness.
async fn accept_offline(h: &Harness, requested: u64, amount: u64, tag: &str) -> Token {
    let token = make_token(amount, tag);
    let session = h.terminal.start_payment(requested, "sat", 1.0).unwrap();
    let payment = session
        .process_token(&token::encode(&token))
        .await
        .unwrap();
    assert_eq!(payment.state, PaymentState::PendingVerification);
    token
}

#[tokio::test]
async fn reconcile_settles_queued_payment() {
    let h = Harness::offline(5000);
    let _token = accept_offline(&h, 3000, 3000, "settle").await;
    let payment_id = h.queue.pending().unwrap()[0].payment_id;

    h.go_online();
    let reconciler = h.terminal.reconciler();
    let summary = reconciler.reconcile().await;

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert!(h.queue.is_empty().unwrap());
    assert_eq!(h.mint.swapped_amounts.lock().as_slice(), &[3000]);

    let payment = h.store.get(&payment_id).unwrap().unwrap();
    assert_eq!(payment.state, PaymentState::Completed);
    assert!(payment.transaction_id.is_some());
}

#[tokio::test]
async fn reconcile_removes_spent_entries_without_retry() {
    let h = Harness::offline(5000);
    let token = accept_offline(&h, 3000, 3000, "gone").await;
    let payment_id = h.queue.pending().unwrap()[0].payment_id;

    // The customer double-spent the token elsewhere before we came back.
    h.mint.mark_spent(&token);
    h.go_online();

    let summary = h.terminal.reconciler().reconcile().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 0);
    assert!(
        h.queue.is_empty().unwrap(),
        "spent entries are removed, not retried"
    );
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 0);

    let payment = h.store.get(&payment_id).unwrap().unwrap();
    assert_eq!(payment.state, PaymentState::Failed);
}

#[tokio::test]
async fn reconcile_defers_on_transient_failure_with_backoff() {
    let h = Harness::offline(5000);
    accept_offline(&h, 1000, 1000, "later").await;

    // Connectivity is back but the mint still refuses connections.
    h.go_online();
    h.mint.set_unreachable(true);

    let reconciler = h.terminal.reconciler();
    let summary = reconciler.reconcile().await;
    assert_eq!(summary.deferred, 1);

    let entry = &h.queue.pending().unwrap()[0];
    assert_eq!(entry.retry_count, 1);
    assert!(entry.last_error.is_some());
    assert!(entry.next_attempt_at.is_some());

    // Immediately re-running skips the entry: backoff has not elapsed.
    let summary = reconciler.reconcile().await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.deferred, 0);

    // Once the mint answers again (and backoff passes), it settles.
    h.mint.set_unreachable(false);
    let entry = h.queue.pending().unwrap()[0].clone();
    h.queue.defer(entry, "fast-forward", chrono::Utc::now()).unwrap();
    let summary = reconciler.reconcile().await;
    assert_eq!(summary.completed, 1);
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn concurrent_reconcile_runs_process_each_entry_once() {
    let h = Harness::offline(5000);
    accept_offline(&h, 1000, 1000, "race").await;

    h.go_online();
    h.mint.set_swap_mode(SwapMode::Slow);

    let reconciler = Arc::new(h.terminal.reconciler());
    let (a, b) = tokio::join!(reconciler.reconcile(), reconciler.reconcile());

    // One run settled the entry, the other skipped it.
    assert_eq!(a.completed + b.completed, 1);
    assert_eq!(a.skipped + b.skipped, 1);
    assert_eq!(h.mint.swap_calls.load(Ordering::SeqCst), 1);
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn reconcile_isolates_failures_per_entry() {
    let h = Harness::offline(5000);
    // First entry will fail permanently (spent), second should settle.
    let spent = accept_offline(&h, 1000, 1000, "bad").await;
    accept_offline(&h, 2000, 2000, "good").await;
    h.mint.mark_spent(&spent);

    h.go_online();
    let summary = h.terminal.reconciler().reconcile().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);
    assert!(h.queue.is_empty().unwrap());
}
