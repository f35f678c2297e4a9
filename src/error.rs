//! Error types.
//!
//! Cancellation is never an `Err` here — it's the expected case, modeled as
//! an interrupt signal or a drained channel. `ConversationError` only covers
//! the handful of genuinely exceptional outcomes a caller must react to.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("transcriber failed to become ready on startup")]
    TranscriberStartupFailed,

    #[error("agent is unavailable: {0}")]
    AgentUnavailable(String),

    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("output device failed: {0}")]
    OutputDeviceFailed(String),

    #[error("conversation was already terminated")]
    AlreadyTerminated,
}
