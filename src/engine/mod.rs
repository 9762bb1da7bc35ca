//! Continuation engine
//!
//! The central state machine: owns the lifecycle state, the captured
//! stack (in substrate-internal or reified form, never both), and
//! orchestrates begin/resume/suspend/serialize/deserialize against the
//! injected substrate.
//!
//! Concurrency model: continuations run on whatever thread calls
//! `resume()`; the engine creates no threads. At most one thread is ever
//! inside a continuation, enforced by the state transitions themselves;
//! a losing racer gets a typed error instead of blocking.

pub mod capability;
pub mod generator;
pub mod state;

#[cfg(test)]
mod tests;

pub use capability::SuspendCapability;
pub use generator::Generator;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::codec::frame_codec;
use crate::codec::FORMAT_VERSION;
use crate::error::{EngineError, IllegalStateKind};
use crate::frames::FrameRecord;
use crate::host::{HostCodec, JsonHostCodec};
use crate::resolve::MethodResolver;
use crate::substrate::{CapturedStack, ExecutionSubstrate, RunOutcome};
use crate::types::{ContinuationState, EntryPoint, RecoveryPolicy};

use self::state::{AtomicState, OwnerCell};

use crate::types::ContinuationState::{
    Completed, Failed, Incomplete, Locked, New, Running, Suspended,
};

/* ===================== Engine ===================== */

/// Factory and serialization endpoint for continuations.
///
/// Wires together the execution substrate, the method-resolution oracle,
/// the host object codec, and the recovery policy.
pub struct Engine {
    substrate: Arc<dyn ExecutionSubstrate>,
    resolver: Arc<dyn MethodResolver>,
    host: Arc<dyn HostCodec>,
    policy: RecoveryPolicy,
}

impl Engine {
    pub fn new(
        substrate: Arc<dyn ExecutionSubstrate>,
        resolver: Arc<dyn MethodResolver>,
    ) -> Self {
        Self {
            substrate,
            resolver,
            host: Arc::new(JsonHostCodec),
            policy: RecoveryPolicy::default(),
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Whether the substrate supports continuations at all.
    pub fn is_supported(&self) -> bool {
        self.substrate.supports_continuations()
    }

    /// Create a fresh continuation around an entry point.
    ///
    /// Fails with `UnsupportedCapability` when the substrate cannot
    /// capture stacks. The result is in state `New`.
    pub fn create(&self, entry: EntryPoint) -> Result<Continuation, EngineError> {
        if !self.is_supported() {
            return Err(EngineError::UnsupportedCapability);
        }
        let cont = Continuation::with_entry(entry, self.substrate.clone(), self.policy);
        tracing::debug!(id = %cont.id(), routine = %cont.inner.entry_name(), "continuation created");
        Ok(cont)
    }

    /// Write the continuation envelope (format version 2).
    ///
    /// Layout: one header byte `(major << 4) | flags`, the pre-lock state
    /// and the entry point through host serialization, then (only when
    /// the continuation was suspended) the frame chain through the frame
    /// codec. The continuation is locked for the duration and its prior
    /// state is always restored, even on failure.
    pub fn serialize(
        &self,
        cont: &Continuation,
        sink: &mut dyn Write,
    ) -> Result<(), EngineError> {
        let prior = cont.lock_for_transfer()?;
        let result = self.write_locked(cont, prior, sink);
        cont.inner.state.store(prior);
        if result.is_ok() {
            tracing::debug!(id = %cont.id(), state = ?prior, "continuation serialized");
        }
        result
    }

    fn write_locked(
        &self,
        cont: &Continuation,
        prior: ContinuationState,
        sink: &mut dyn Write,
    ) -> Result<(), EngineError> {
        if prior == Suspended {
            cont.materialize_locked()?;
        }

        sink.write_all(&[FORMAT_VERSION << 4])?;
        self.host
            .write_value(sink, &serde_json::to_value(prior)?)?;
        let entry = cont.inner.entry_cloned()?;
        self.host
            .write_value(sink, &serde_json::to_value(&entry)?)?;

        if prior == Suspended {
            let cell = cont.inner.stack_cell();
            let StackForm::Materialized(chain) = &*cell else {
                return Err(EngineError::InvalidFrameRecord(
                    "suspended continuation has no frame chain to serialize".into(),
                ));
            };
            frame_codec::encode_chain(sink, chain, self.host.as_ref())?;
        }
        Ok(())
    }

    /// Read a continuation envelope using the engine's own resolver.
    pub fn deserialize(&self, source: &mut dyn Read) -> Result<Continuation, EngineError> {
        self.deserialize_with(source, None, |_| {})
    }

    /// Read a continuation envelope.
    ///
    /// `resolver` scopes method resolution for the frame chain; when
    /// absent, the engine's configured resolver is used. `register` is
    /// invoked with the half-built continuation (state `Incomplete`)
    /// before any bytes are read, so callers integrating with cyclic
    /// object-graph codecs can register the instance up front. On any
    /// failure the continuation is left poisoned in `Incomplete`.
    pub fn deserialize_with(
        &self,
        source: &mut dyn Read,
        resolver: Option<Arc<dyn MethodResolver>>,
        register: impl FnOnce(&Continuation),
    ) -> Result<Continuation, EngineError> {
        if !self.is_supported() {
            return Err(EngineError::UnsupportedCapability);
        }

        let cont = Continuation::incomplete(self.substrate.clone(), self.policy);
        register(&cont);

        match self.read_into(&cont, source, resolver) {
            Ok(state) => {
                cont.inner.state.store(state);
                tracing::debug!(id = %cont.id(), state = ?state, "continuation deserialized");
                Ok(cont)
            }
            Err(err) => {
                cont.inner.state.store(Incomplete);
                Err(err)
            }
        }
    }

    fn read_into(
        &self,
        cont: &Continuation,
        source: &mut dyn Read,
        resolver: Option<Arc<dyn MethodResolver>>,
    ) -> Result<ContinuationState, EngineError> {
        let mut header = [0u8; 1];
        source.read_exact(&mut header)?;
        let found = header[0] >> 4;
        if found != FORMAT_VERSION {
            return Err(EngineError::FormatVersion {
                found,
                expected: FORMAT_VERSION,
            });
        }

        let state: ContinuationState =
            serde_json::from_value(self.host.read_value(source)?)?;
        if state == Running {
            // A running continuation must never have been serialized.
            return Err(EngineError::IllegalState(IllegalStateKind::Running));
        }

        let entry: EntryPoint = serde_json::from_value(self.host.read_value(source)?)?;
        *cont.inner.entry_cell() = Some(entry);

        if state == Suspended {
            let resolver = resolver.unwrap_or_else(|| self.resolver.clone());
            let chain =
                frame_codec::decode_chain(source, self.host.as_ref(), resolver.as_ref())?;
            *cont.inner.stack_cell() = StackForm::Materialized(chain);
        }
        Ok(state)
    }
}

/* ===================== Engine builder ===================== */

/// Builder for wiring an `Engine`.
pub struct EngineBuilder {
    substrate: Option<Arc<dyn ExecutionSubstrate>>,
    resolver: Option<Arc<dyn MethodResolver>>,
    host: Arc<dyn HostCodec>,
    policy: RecoveryPolicy,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            substrate: None,
            resolver: None,
            host: Arc::new(JsonHostCodec),
            policy: RecoveryPolicy::default(),
        }
    }

    pub fn substrate(mut self, substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn MethodResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn host_codec(mut self, host: Arc<dyn HostCodec>) -> Self {
        self.host = host;
        self
    }

    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let substrate = self
            .substrate
            .ok_or_else(|| EngineError::Config("no execution substrate".into()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| EngineError::Config("no method resolver".into()))?;
        Ok(Engine {
            substrate,
            resolver,
            host: self.host,
            policy: self.policy,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Continuation ===================== */

/// Where the captured stack currently lives.
///
/// Single-owner semantics: the substrate's opaque capture or the reified
/// chain, never both. Ownership moves through the materialize and
/// dematerialize calls only.
enum StackForm {
    Empty,
    Captured(Box<dyn CapturedStack>),
    Materialized(Box<FrameRecord>),
}

impl StackForm {
    fn is_materialized(&self) -> bool {
        matches!(self, StackForm::Materialized(_))
    }
}

struct ContinuationInner {
    id: Uuid,
    state: AtomicState,
    owner: OwnerCell,
    entry: Mutex<Option<EntryPoint>>,
    stack: Mutex<StackForm>,
    yielded: Mutex<Option<JsonValue>>,
    result: Mutex<Option<JsonValue>>,
    substrate: Arc<dyn ExecutionSubstrate>,
    policy: RecoveryPolicy,
}

impl ContinuationInner {
    fn entry_cell(&self) -> MutexGuard<'_, Option<EntryPoint>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stack_cell(&self) -> MutexGuard<'_, StackForm> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_cloned(&self) -> Result<EntryPoint, EngineError> {
        self.entry_cell()
            .clone()
            .ok_or(EngineError::IllegalState(IllegalStateKind::Incomplete))
    }

    fn entry_name(&self) -> String {
        self.entry_cell()
            .as_ref()
            .map(|e| e.routine.clone())
            .unwrap_or_default()
    }
}

/// A suspendable, resumable, one-shot computation handle.
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<ContinuationInner>,
}

/// Clears the exclusive owner when a resume episode ends, on every path.
struct OwnerGuard<'a>(&'a OwnerCell);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

enum Episode {
    Begin,
    Continue,
}

impl Continuation {
    fn with_entry(
        entry: EntryPoint,
        substrate: Arc<dyn ExecutionSubstrate>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ContinuationInner {
                id: Uuid::new_v4(),
                state: AtomicState::new(New),
                owner: OwnerCell::new(),
                entry: Mutex::new(Some(entry)),
                stack: Mutex::new(StackForm::Empty),
                yielded: Mutex::new(None),
                result: Mutex::new(None),
                substrate,
                policy,
            }),
        }
    }

    fn incomplete(substrate: Arc<dyn ExecutionSubstrate>, policy: RecoveryPolicy) -> Self {
        Self {
            inner: Arc::new(ContinuationInner {
                id: Uuid::new_v4(),
                state: AtomicState::new(Incomplete),
                owner: OwnerCell::new(),
                entry: Mutex::new(None),
                stack: Mutex::new(StackForm::Empty),
                yielded: Mutex::new(None),
                result: Mutex::new(None),
                substrate,
                policy,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current lifecycle state (a racing snapshot, like any observer).
    pub fn state(&self) -> ContinuationState {
        self.inner.state.load()
    }

    /// True iff the continuation can be resumed right now.
    /// Never blocks, never fails.
    pub fn is_resumable(&self) -> bool {
        matches!(self.state(), New | Suspended)
    }

    /// True iff the continuation reached a terminal state.
    pub fn is_completed(&self) -> bool {
        matches!(self.state(), Completed | Failed)
    }

    /// The value emitted at the most recent suspend, if any.
    /// Taking it clears the slot.
    pub fn take_yielded(&self) -> Option<JsonValue> {
        self.inner
            .yielded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The value the entry point returned, once completed.
    pub fn result(&self) -> Option<JsonValue> {
        self.inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /* ===================== Resume ===================== */

    /// Run the continuation on the calling thread until it suspends,
    /// returns, or raises.
    ///
    /// Returns `Ok(true)` when execution suspended and `Ok(false)` when
    /// the entry point returned normally. Resuming in any other state
    /// fails immediately with a typed `IllegalState`; when the entry
    /// point raises, the continuation is forced into `Failed` and the
    /// error is rethrown wrapped as `ExecutionFailure`.
    pub fn resume(&self) -> Result<bool, EngineError> {
        if self.inner.state.transition(New, Running).is_ok() {
            return self.run_episode(Episode::Begin);
        }
        match self.inner.state.transition(Suspended, Running) {
            Ok(()) => self.run_episode(Episode::Continue),
            Err(witnessed) => Err(EngineError::IllegalState(IllegalStateKind::for_resume(
                witnessed,
            ))),
        }
    }

    fn run_episode(&self, episode: Episode) -> Result<bool, EngineError> {
        self.inner.owner.set_current();
        let _owner = OwnerGuard(&self.inner.owner);

        let outcome = match episode {
            Episode::Begin => {
                let entry = match self.inner.entry_cloned() {
                    Ok(entry) => entry,
                    Err(err) => {
                        self.inner.state.swap(Failed);
                        return Err(err);
                    }
                };
                tracing::debug!(id = %self.id(), routine = %entry.routine, "beginning execution");
                self.inner
                    .substrate
                    .begin(&entry, SuspendCapability::new(self.clone()))
            }
            Episode::Continue => {
                // Any reified chain goes back to the substrate first.
                // Resume already holds exclusivity, so no lock cycle here.
                if let Err(err) = self.dematerialize_running() {
                    self.inner.state.swap(Failed);
                    return Err(err);
                }
                let stack = match std::mem::replace(
                    &mut *self.inner.stack_cell(),
                    StackForm::Empty,
                ) {
                    StackForm::Captured(stack) => stack,
                    other => {
                        *self.inner.stack_cell() = other;
                        self.inner.state.swap(Failed);
                        return Err(EngineError::InvalidFrameRecord(
                            "suspended continuation has no captured stack".into(),
                        ));
                    }
                };
                tracing::debug!(id = %self.id(), "resuming execution");
                self.inner
                    .substrate
                    .resume(stack, SuspendCapability::new(self.clone()))
            }
        };

        match outcome {
            Ok(RunOutcome::Suspended { stack, yielded }) => {
                if self.state() != Suspended {
                    // The substrate reported a suspension the state
                    // machine never transitioned to.
                    self.inner.policy.recover(
                        "substrate suspended without a suspend transition",
                        || self.inner.state.store(Suspended),
                    );
                }
                *self.inner.stack_cell() = StackForm::Captured(stack);
                *self
                    .inner
                    .yielded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = yielded;
                tracing::debug!(id = %self.id(), "suspended");
                Ok(true)
            }
            Ok(RunOutcome::Returned(value)) => {
                *self
                    .inner
                    .result
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = value;
                if self.inner.state.transition(Running, Completed).is_err() {
                    self.inner.policy.recover(
                        "completion raced with a concurrent transition",
                        || self.inner.state.store(Completed),
                    );
                }
                tracing::debug!(id = %self.id(), "completed");
                Ok(false)
            }
            Err(err) => {
                // Force Failed even if a concurrent observer already
                // moved the state; a failed continuation is discarded.
                self.inner.state.swap(Failed);
                tracing::debug!(id = %self.id(), error = %err, "entry point failed");
                Err(EngineError::ExecutionFailure(Box::new(err)))
            }
        }
    }

    /* ===================== Suspend ===================== */

    /// Request a suspend from inside the running entry point. Reached
    /// only through the suspend capability.
    pub(crate) fn try_suspend(&self) -> Result<(), EngineError> {
        if !self.inner.owner.is_current() {
            return Err(EngineError::IllegalState(IllegalStateKind::ForeignThread));
        }
        if self.inner.state.transition(Running, Suspended).is_err() {
            return Err(EngineError::IllegalState(IllegalStateKind::NotRunning));
        }

        match self.inner.substrate.suspend_current() {
            Ok(()) => Ok(()),
            Err(rejection) => {
                // The substrate refused (forbidden frames, held locks).
                // Roll the state back and propagate the rejection.
                if self.inner.state.transition(Suspended, Running).is_err() {
                    self.inner.policy.recover(
                        "suspend rollback raced with a concurrent transition",
                        || self.inner.state.store(Running),
                    );
                }
                Err(rejection)
            }
        }
    }

    /* ===================== Frame transfer ===================== */

    /// Reify the substrate's capture into a `FrameRecord` chain.
    ///
    /// No-op when a chain is already present or the continuation is
    /// currently running (nothing to reify while it is on the real
    /// stack). Idempotent: a second call leaves the chain untouched.
    pub fn materialize(&self) -> Result<(), EngineError> {
        if self.inner.stack_cell().is_materialized() {
            return Ok(());
        }
        if self.state() == Running {
            return Ok(());
        }
        let prior = self.lock_for_transfer()?;
        let result = self.materialize_locked();
        self.inner.state.store(prior);
        result
    }

    fn materialize_locked(&self) -> Result<(), EngineError> {
        let mut cell = self.inner.stack_cell();
        match std::mem::replace(&mut *cell, StackForm::Empty) {
            StackForm::Captured(stack) => {
                let chain = self.inner.substrate.materialize_frames(stack)?;
                *cell = StackForm::Materialized(chain);
                Ok(())
            }
            other => {
                // Already materialized, or nothing captured (New).
                *cell = other;
                Ok(())
            }
        }
    }

    /// Hand a reified chain back to the substrate.
    ///
    /// No-op when no chain is present. On rejection the chain stays
    /// unset and the continuation should be discarded.
    pub fn dematerialize(&self) -> Result<(), EngineError> {
        if !self.inner.stack_cell().is_materialized() {
            return Ok(());
        }
        if self.state() == Running {
            return self.dematerialize_running();
        }
        let prior = self.lock_for_transfer()?;
        let result = self.dematerialize_locked();
        self.inner.state.store(prior);
        result
    }

    fn dematerialize_running(&self) -> Result<(), EngineError> {
        self.dematerialize_locked()
    }

    fn dematerialize_locked(&self) -> Result<(), EngineError> {
        let mut cell = self.inner.stack_cell();
        match std::mem::replace(&mut *cell, StackForm::Empty) {
            StackForm::Materialized(chain) => {
                let entry = self.inner.entry_cloned()?;
                let stack = self
                    .inner
                    .substrate
                    .dematerialize_frames(chain, &entry)?;
                *cell = StackForm::Captured(stack);
                Ok(())
            }
            other => {
                *cell = other;
                Ok(())
            }
        }
    }

    /* ===================== Locking ===================== */

    /// Take the `Locked` state for a serialization or frame transfer,
    /// returning the prior state so it can be restored.
    ///
    /// Only `New` and `Suspended` may be locked. `Running` is never
    /// locked (serializing a running continuation is rejected outright),
    /// and terminal or half-built states produce their own diagnostics.
    fn lock_for_transfer(&self) -> Result<ContinuationState, EngineError> {
        loop {
            let seen = self.inner.state.load();
            match seen {
                New | Suspended => {
                    if self.inner.state.transition(seen, Locked).is_ok() {
                        return Ok(seen);
                    }
                    // A racer moved the state; re-examine.
                }
                Running => {
                    return Err(EngineError::IllegalState(IllegalStateKind::Running));
                }
                other => {
                    return Err(EngineError::IllegalState(IllegalStateKind::for_resume(
                        other,
                    )));
                }
            }
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
