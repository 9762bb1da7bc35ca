//! Atomic state cell and exclusive-owner tracking
//!
//! The lifecycle state is a u8-encoded tagged enum behind compare-exchange
//! and swap. There is deliberately no mutex: a losing racer observes the
//! witnessed state and fails fast instead of blocking.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::types::ContinuationState;

/* ===================== State cell ===================== */

/// CAS cell holding a `ContinuationState`.
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: ContinuationState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> ContinuationState {
        ContinuationState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ContinuationState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Unconditional exchange; returns the previous state.
    pub(crate) fn swap(&self, state: ContinuationState) -> ContinuationState {
        ContinuationState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }

    /// Guarded transition. On failure returns the state actually
    /// witnessed, for best-effort diagnostics.
    pub(crate) fn transition(
        &self,
        from: ContinuationState,
        to: ContinuationState,
    ) -> Result<(), ContinuationState> {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ContinuationState::from_u8)
    }
}

impl std::fmt::Debug for AtomicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AtomicState({:?})", self.load())
    }
}

/* ===================== Thread tokens ===================== */

// `ThreadId` has no stable integer form, so threads are identified by a
// process-local token handed out on first use.
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Identity of the one thread allowed to request a suspend while the
/// continuation is running. This is a correctness assertion, not a lock:
/// its only job is to reject `suspend` calls from foreign threads.
pub(crate) struct OwnerCell(AtomicU64);

pub(crate) const NO_OWNER: u64 = 0;

impl OwnerCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(NO_OWNER))
    }

    pub(crate) fn set_current(&self) {
        self.0.store(current_thread_token(), Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.0.store(NO_OWNER, Ordering::Release);
    }

    pub(crate) fn is_current(&self) -> bool {
        self.0.load(Ordering::Acquire) == current_thread_token()
    }
}

impl std::fmt::Debug for OwnerCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OwnerCell({})", self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContinuationState::{New, Running, Suspended};

    #[test]
    fn test_transition_reports_witnessed_state() {
        let state = AtomicState::new(New);
        assert!(state.transition(New, Running).is_ok());
        assert_eq!(state.transition(New, Running), Err(Running));
        assert_eq!(state.swap(Suspended), Running);
    }

    #[test]
    fn test_thread_tokens_are_distinct() {
        let here = current_thread_token();
        let there = std::thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(here, there);
        assert_ne!(here, NO_OWNER);
    }

    #[test]
    fn test_owner_cell_tracks_current_thread() {
        let owner = OwnerCell::new();
        assert!(!owner.is_current());
        owner.set_current();
        assert!(owner.is_current());
        let elsewhere = std::thread::scope(|s| s.spawn(|| owner.is_current()).join().unwrap());
        assert!(!elsewhere);
        owner.clear();
        assert!(!owner.is_current());
    }
}
