//! Execution substrate contract
//!
//! The substrate is the component that actually runs entry points and
//! owns the non-reified form of a captured stack. The engine drives it
//! through four primitives (begin, resume, suspend, and the frame
//! materialize/dematerialize pair) and treats everything behind them as
//! opaque.

use std::any::Any;
use std::fmt::Debug;

use serde_json::Value as JsonValue;

use crate::engine::SuspendCapability;
use crate::error::EngineError;
use crate::frames::FrameRecord;
use crate::types::EntryPoint;

/// A substrate-internal capture of a suspended execution.
///
/// The engine stores it without looking inside; only the substrate that
/// produced it may downcast it back.
pub trait CapturedStack: Any + Send + Debug {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// How one begin/resume episode ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The entry point suspended. `stack` is the substrate's internal
    /// capture; `yielded` is the value emitted at the suspend point, if
    /// the suspending code produced one.
    Suspended {
        stack: Box<dyn CapturedStack>,
        yielded: Option<JsonValue>,
    },
    /// The entry point returned normally.
    Returned(Option<JsonValue>),
}

/// The four primitives the continuation engine consumes.
///
/// Contract summary:
/// - `begin` / `resume` run guest code on the calling thread and return
///   when it suspends, returns, or raises. Guest errors propagate as
///   `Err` and force the continuation into `Failed`.
/// - `suspend_current` is invoked from inside `begin`/`resume` (via the
///   suspend capability) after the engine has transitioned the state to
///   `Suspended`. Returning `Ok` obliges the substrate to unwind its own
///   control structure back to the begin/resume boundary; returning
///   `Err` rejects the suspend (forbidden frames on the stack, held
///   locks) and triggers the engine's rollback.
/// - `materialize_frames` / `dematerialize_frames` convert between the
///   internal capture and the reified `FrameRecord` chain, transferring
///   ownership in both directions. Dematerialization enforces the frame
///   validity rules: the innermost resume point must address the
///   suspend-issuing call, every caller's resume point must address a
///   call whose symbolic target matches the callee's method identity
///   (with a type-compatible return), the slot layout must match the
///   method and offset, and the tail frame must be the entry routine.
pub trait ExecutionSubstrate: Send + Sync {
    /// Whether this substrate can capture and replay stacks at all.
    fn supports_continuations(&self) -> bool;

    fn begin(
        &self,
        entry: &EntryPoint,
        cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError>;

    fn resume(
        &self,
        stack: Box<dyn CapturedStack>,
        cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError>;

    fn suspend_current(&self) -> Result<(), EngineError>;

    fn materialize_frames(
        &self,
        stack: Box<dyn CapturedStack>,
    ) -> Result<Box<FrameRecord>, EngineError>;

    fn dematerialize_frames(
        &self,
        chain: Box<FrameRecord>,
        entry: &EntryPoint,
    ) -> Result<Box<dyn CapturedStack>, EngineError>;
}
