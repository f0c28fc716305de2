//! Hardware token source seam.
//!
//! NFC readers and QR scanners live outside this crate; the engine only
//! sees an async producer of raw token strings. The session races a read
//! against its own cancellation, so implementations may block until
//! hardware delivers.

use async_trait::async_trait;
use thiserror::Error;

/// Failures from the hardware token source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The read was cancelled by the hardware layer itself.
    #[error("hardware read cancelled")]
    Cancelled,

    /// The hardware failed to produce a token.
    #[error("hardware failure: {0}")]
    Hardware(String),
}

/// An async producer of raw token strings (NFC tap, scanned QR, ...).
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Waits for the next token presentation and returns its raw string.
    async fn read(&self) -> Result<String, SourceError>;
}
