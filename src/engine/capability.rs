//! Suspend capability
//!
//! Suspension is capability-based: only code that was handed a
//! `SuspendCapability` by the engine can suspend, and only the
//! continuation the capability belongs to.

use crate::engine::Continuation;
use crate::error::EngineError;

/// Unforgeable token granting the right to suspend one continuation.
///
/// Deliberately not `Clone`: the substrate receives exactly one per
/// begin/resume episode and passes it down to the guest code it runs.
pub struct SuspendCapability {
    cont: Continuation,
}

impl SuspendCapability {
    pub(crate) fn new(cont: Continuation) -> Self {
        Self { cont }
    }

    /// Suspend the bound continuation.
    ///
    /// Must be called on the thread currently running it; any other
    /// thread gets an `IllegalState` and the continuation is unaffected.
    /// On success the substrate is committed to unwinding back to its
    /// begin/resume boundary. On rejection the continuation keeps
    /// running as if the call never happened.
    pub fn suspend(&self) -> Result<(), EngineError> {
        self.cont.try_suspend()
    }

    /// The continuation this capability is bound to.
    pub fn continuation(&self) -> &Continuation {
        &self.cont
    }
}

impl std::fmt::Debug for SuspendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendCapability")
            .field("continuation", &self.cont.id())
            .finish()
    }
}
