//! # Network Reachability
//!
//! The payment session chooses the online or the offline path based on one
//! question: can the mint be reached right now? How that is answered — an
//! OS route check, a ping to the mint, a captive-portal probe — lives
//! behind [`ConnectivityProbe`]. The engine wraps the probe in a
//! [`ConnectivityMonitor`] that remembers the last answer in a watch
//! channel so the reconciler can react to offline→online edges without
//! polling the probe itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

/// Answers "is the network usable right now?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` when the mint is expected to be reachable. Should be
    /// quick and side-effect free; it is consulted on every payment.
    async fn is_online(&self) -> bool;
}

/// Probe wrapper with a watchable last-known state.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Wraps a probe. The initial state is offline until the first
    /// [`refresh`](Self::refresh) — pessimism is the safe default for a
    /// payment terminal.
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let (tx, _) = watch::channel(false);
        Self { probe, tx }
    }

    /// Re-queries the probe, publishes the answer, and returns it.
    pub async fn refresh(&self) -> bool {
        let online = self.probe.is_online().await;
        self.tx.send_if_modified(|state| {
            if *state != online {
                info!(online, "connectivity changed");
                *state = online;
                true
            } else {
                false
            }
        });
        online
    }

    /// Last published state without consulting the probe.
    pub fn current(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to connectivity changes (used by the reconciler to wake
    /// on restored connectivity).
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Polls the probe forever at `interval`. Run this as a background
    /// task when the embedding application has no better signal source.
    pub async fn run(&self, interval: Duration) {
        loop {
            self.refresh().await;
            tokio::time::sleep(interval).await;
        }
    }
}
