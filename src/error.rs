//! Error taxonomy for the continuation engine
//!
//! Every failure surfaced by the engine, the codec, or a substrate lands
//! in `EngineError`. Nothing is swallowed; the only internal recovery is
//! the force-state path governed by `RecoveryPolicy`.

use thiserror::Error;

use crate::types::ContinuationState;

/// Which forbidden lifecycle state an operation observed.
///
/// This is a best-effort diagnostic: a concurrent racer may have moved
/// the state again between the failed transition and the error being
/// built, in which case `Unknown` is reported instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalStateKind {
    /// The continuation is currently executing on some thread.
    Running,
    /// The continuation already returned normally.
    Completed,
    /// The continuation already failed and must be discarded.
    Failed,
    /// A serialization or frame transfer holds the continuation.
    Locked,
    /// The continuation is half-built (deserialization never finished).
    Incomplete,
    /// A suspend was requested while the continuation was not running.
    NotRunning,
    /// A suspend was requested from a thread that does not own the
    /// current execution episode.
    ForeignThread,
    /// The state changed under a racer; no precise diagnosis available.
    Unknown,
}

impl IllegalStateKind {
    /// Classify the state witnessed by a failed resume transition.
    pub(crate) fn for_resume(witnessed: ContinuationState) -> IllegalStateKind {
        match witnessed {
            ContinuationState::Running => IllegalStateKind::Running,
            ContinuationState::Completed => IllegalStateKind::Completed,
            ContinuationState::Failed => IllegalStateKind::Failed,
            ContinuationState::Locked => IllegalStateKind::Locked,
            ContinuationState::Incomplete => IllegalStateKind::Incomplete,
            // New or Suspended here means a racer won the transition and
            // then moved the state back; report the generic message.
            _ => IllegalStateKind::Unknown,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            IllegalStateKind::Running => "continuation is currently running",
            IllegalStateKind::Completed => "continuation has already completed",
            IllegalStateKind::Failed => "continuation has failed and must be discarded",
            IllegalStateKind::Locked => "continuation is locked for serialization",
            IllegalStateKind::Incomplete => "continuation was never fully deserialized",
            IllegalStateKind::NotRunning => "continuation is not currently running",
            IllegalStateKind::ForeignThread => {
                "suspend requested from a thread that is not the exclusive owner"
            }
            IllegalStateKind::Unknown => "continuation is in an unexpected state",
        }
    }
}

impl std::fmt::Display for IllegalStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// All errors produced by the continuation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The execution substrate cannot support continuations at all.
    /// Fatal, not retryable.
    #[error("continuations are not supported by this execution substrate")]
    UnsupportedCapability,

    /// An operation was attempted in a lifecycle state that forbids it.
    #[error("illegal continuation state: {0}")]
    IllegalState(IllegalStateKind),

    /// The substrate rejected a frame chain (malformed or tampered data,
    /// or version skew in resume-point semantics).
    #[error("invalid frame record: {0}")]
    InvalidFrameRecord(String),

    /// Envelope or codec version mismatch.
    #[error("unsupported format version {found} (expected {expected})")]
    FormatVersion { found: u8, expected: u8 },

    /// The entry point raised an error that escaped to `resume()`.
    /// The continuation has been forced into `Failed`.
    #[error("continuation entry point failed")]
    ExecutionFailure(#[source] Box<EngineError>),

    /// An error raised by code running inside the entry point.
    #[error("raised by entry point: {0}")]
    Raised(String),

    /// The engine was assembled without a required component.
    #[error("engine configuration error: {0}")]
    Config(String),

    /// The frame codec could not resolve a method during decode.
    #[error("no method {method} with matching signature declared on {holder}")]
    NoSuchMethod { holder: String, method: String },

    #[error("codec i/o error")]
    Io(#[from] std::io::Error),

    /// Host object (de)serialization failed.
    #[error("host serialization error")]
    Host(#[from] serde_json::Error),
}

impl EngineError {
    /// A decode-side corruption error (bad tag bytes, unbound intern
    /// indices, truncated streams).
    pub(crate) fn corrupt(message: impl Into<String>) -> EngineError {
        EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.into(),
        ))
    }
}
