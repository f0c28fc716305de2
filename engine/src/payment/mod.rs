//! # Payment Orchestration
//!
//! One payment is one pass through a small state machine:
//!
//! ```text
//!   pending ──► token_received ──► validating ──► processing ──► completed
//!      │               │               │              │       └─► failed
//!      │               │               │              └─► cancelled (pre-swap only)
//!      │               └───────────────┴──► pending_verification (offline)
//!      └──► cancelled / failed
//! ```
//!
//! `completed`, `failed`, and `cancelled` are terminal and immutable.
//! `pending_verification` parks the payment in the offline queue; the
//! reconciler later drives it to `completed` or `failed`.
//!
//! The orchestrator ([`session::Terminal`]) is explicitly constructed with
//! its collaborators — mint client, queue, stores, connectivity, prompter —
//! and exposes a multi-subscriber event channel. No singletons, no global
//! "current payment" flag: the single-payment-per-terminal rule is a lock
//! in the orchestrator, not ambient state.

pub mod error;
pub mod events;
pub mod policy;
pub mod session;
pub mod source;
pub mod types;

pub use error::{ErrorClass, PaymentError};
pub use events::{EventBus, PaymentEvent};
pub use policy::{
    OverpaymentDecision, OverpaymentMode, OverpaymentPolicy, OverpaymentPrompter,
    TipFallbackPrompter,
};
pub use session::{PaymentSession, Terminal};
pub use source::{SourceError, TokenSource};
pub use types::{
    OverpaymentHandling, OverpaymentInfo, Payment, PaymentId, PaymentRecord, PaymentState,
};
