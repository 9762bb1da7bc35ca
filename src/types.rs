use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Lifecycle state of a continuation.
///
/// Transitions happen only through atomic compare-exchange or swap on the
/// state cell, never through a read-then-write sequence. `Completed` and
/// `Failed` are terminal; `Incomplete` marks a half-built (or poisoned)
/// instance produced during deserialization; `Locked` marks an in-progress
/// serialization or frame transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationState {
    Incomplete,
    Locked,
    New,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ContinuationState {
    /// Stable numeric encoding used by the atomic state cell.
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ContinuationState::Incomplete => 0,
            ContinuationState::Locked => 1,
            ContinuationState::New => 2,
            ContinuationState::Running => 3,
            ContinuationState::Suspended => 4,
            ContinuationState::Completed => 5,
            ContinuationState::Failed => 6,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> ContinuationState {
        match raw {
            0 => ContinuationState::Incomplete,
            1 => ContinuationState::Locked,
            2 => ContinuationState::New,
            3 => ContinuationState::Running,
            4 => ContinuationState::Suspended,
            5 => ContinuationState::Completed,
            _ => ContinuationState::Failed,
        }
    }
}

/// The callable a continuation runs: a routine name plus its arguments.
///
/// The substrate decides what the name means; the engine only stores it,
/// hands it to `begin`, and round-trips it through host serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub routine: String,
    pub args: JsonValue,
}

impl EntryPoint {
    pub fn new(routine: impl Into<String>, args: JsonValue) -> Self {
        Self {
            routine: routine.into(),
            args,
        }
    }
}

/// What to do when an internal consistency violation is detected
/// (a failed rollback after a rejected suspend, or a substrate reporting
/// an outcome the state machine never transitioned to).
///
/// `Strict` panics so the violation is caught during development;
/// `Lenient` forces a safe state and keeps going. The default follows
/// the build profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    Strict,
    Lenient,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            RecoveryPolicy::Strict
        } else {
            RecoveryPolicy::Lenient
        }
    }
}

impl RecoveryPolicy {
    /// Handle a consistency violation: panic under `Strict`, otherwise
    /// log and apply the best-effort fix.
    pub(crate) fn recover(self, context: &str, force: impl FnOnce()) {
        match self {
            RecoveryPolicy::Strict => {
                panic!("internal consistency violation: {context}");
            }
            RecoveryPolicy::Lenient => {
                tracing::error!(context, "recovering from consistency violation");
                force();
            }
        }
    }
}
