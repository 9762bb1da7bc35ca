//! Reference execution substrate
//!
//! A small stack-driven routine interpreter that implements the full
//! substrate contract: it runs registered routines on the calling thread,
//! captures its own frames on suspension, and converts them to and from
//! reified frame records with strict validation on the way back in. It
//! doubles as the method resolver for streams produced against it.

pub mod ops;


use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::engine::SuspendCapability;
use crate::error::EngineError;
use crate::frames::{FrameRecord, Method, MethodSignature, Slot};
use crate::resolve::MethodResolver;
use crate::substrate::{CapturedStack, ExecutionSubstrate, RunOutcome};
use crate::types::EntryPoint;

use self::ops::{Op, Routine};

/* ===================== Captured form ===================== */

/// One live interpreter frame.
#[derive(Debug)]
struct MachineFrame {
    routine: Arc<Routine>,
    /// Offset of the next op to execute.
    pc: usize,
    ptrs: Vec<Slot>,
    prims: Vec<u64>,
    stack: Vec<Slot>,
}

impl MachineFrame {
    fn fresh(routine: Arc<Routine>) -> Self {
        let ptrs = vec![Slot::Null; routine.ptr_slots];
        let prims = vec![0u64; routine.prim_slots];
        Self {
            routine,
            pc: 0,
            ptrs,
            prims,
            stack: Vec::new(),
        }
    }
}

/// The machine's internal capture: live frames, outermost first.
#[derive(Debug)]
pub struct MachineStack {
    frames: Vec<MachineFrame>,
}

impl CapturedStack for MachineStack {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/* ===================== Machine ===================== */

/// Routine registry and interpreter.
pub struct Machine {
    routines: HashMap<String, Arc<Routine>>,
    reject_suspend: AtomicBool,
    supported: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            routines: HashMap::new(),
            reject_suspend: AtomicBool::new(false),
            supported: true,
        }
    }

    /// A machine that refuses continuation capture outright.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Register a routine under its method name.
    pub fn register(&mut self, routine: Routine) {
        self.routines
            .insert(routine.method.name.clone(), Arc::new(routine));
    }

    /// Make the machine reject suspension requests, as if forbidden
    /// frames were on the stack.
    pub fn set_suspend_rejection(&self, reject: bool) {
        self.reject_suspend.store(reject, Ordering::Release);
    }

    fn routine(&self, name: &str) -> Result<Arc<Routine>, EngineError> {
        self.routines
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchMethod {
                holder: "machine".into(),
                method: name.into(),
            })
    }

    /* ===================== Interpreter loop ===================== */

    fn run(
        &self,
        mut stack: MachineStack,
        cap: &SuspendCapability,
    ) -> Result<RunOutcome, EngineError> {
        loop {
            let Some(frame) = stack.frames.last_mut() else {
                return Ok(RunOutcome::Returned(None));
            };

            // Running past the last op is an implicit bare return.
            let op = match frame.routine.code.get(frame.pc) {
                Some(op) => op.clone(),
                None => Op::Return,
            };
            frame.pc += 1;

            match op {
                Op::Push(slot) => frame.stack.push(slot),
                Op::Load(i) => {
                    let slot = frame
                        .ptrs
                        .get(i)
                        .cloned()
                        .ok_or_else(|| bad_slot(frame, i))?;
                    frame.stack.push(slot);
                }
                Op::Store(i) => {
                    let value = pop(frame)?;
                    if i >= frame.ptrs.len() {
                        return Err(bad_slot(frame, i));
                    }
                    frame.ptrs[i] = value;
                }
                Op::PushPrim(i) => {
                    let value = *frame.prims.get(i).ok_or_else(|| bad_slot(frame, i))?;
                    frame.stack.push(Slot::Value(JsonValue::from(value)));
                }
                Op::SetPrim(i, value) => {
                    if i >= frame.prims.len() {
                        return Err(bad_slot(frame, i));
                    }
                    frame.prims[i] = value;
                }
                Op::IncrPrim(i) => {
                    if i >= frame.prims.len() {
                        return Err(bad_slot(frame, i));
                    }
                    frame.prims[i] += 1;
                }
                Op::BranchPrimLt(i, bound, target) => {
                    let value = *frame.prims.get(i).ok_or_else(|| bad_slot(frame, i))?;
                    if value < bound {
                        frame.pc = target;
                    }
                }
                Op::Jump(target) => frame.pc = target,
                Op::Call(name) => {
                    let callee = self.routine(&name)?;
                    stack.frames.push(MachineFrame::fresh(callee));
                }
                Op::Yield => {
                    let value = match pop(frame)? {
                        Slot::Value(value) => value,
                        _ => JsonValue::Null,
                    };
                    cap.suspend()?;
                    return Ok(RunOutcome::Suspended {
                        stack: Box::new(stack),
                        yielded: Some(value),
                    });
                }
                Op::Suspend => {
                    cap.suspend()?;
                    return Ok(RunOutcome::Suspended {
                        stack: Box::new(stack),
                        yielded: None,
                    });
                }
                Op::Return => {
                    let value = stack
                        .frames
                        .last_mut()
                        .and_then(|f| f.stack.pop());
                    stack.frames.pop();
                    match stack.frames.last_mut() {
                        Some(caller) => {
                            if let Some(value) = value {
                                caller.stack.push(value);
                            }
                        }
                        None => {
                            let returned = match value {
                                Some(Slot::Value(value)) => Some(value),
                                Some(Slot::Null) | Some(Slot::ContinuationRef) | None => None,
                            };
                            return Ok(RunOutcome::Returned(returned));
                        }
                    }
                }
                Op::Fail(message) => return Err(EngineError::Raised(message)),
            }
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn pop(frame: &mut MachineFrame) -> Result<Slot, EngineError> {
    frame.stack.pop().ok_or_else(|| {
        EngineError::Raised(format!(
            "operand stack underflow in `{}`",
            frame.routine.method.name
        ))
    })
}

fn bad_slot(frame: &MachineFrame, index: usize) -> EngineError {
    EngineError::Raised(format!(
        "slot index {index} out of range in `{}`",
        frame.routine.method.name
    ))
}

fn downcast(stack: Box<dyn CapturedStack>) -> Result<Box<MachineStack>, EngineError> {
    stack.into_any().downcast::<MachineStack>().map_err(|_| {
        EngineError::InvalidFrameRecord("captured stack belongs to a different substrate".into())
    })
}

/* ===================== Substrate contract ===================== */

impl ExecutionSubstrate for Machine {
    fn supports_continuations(&self) -> bool {
        self.supported
    }

    fn begin(
        &self,
        entry: &EntryPoint,
        cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError> {
        let routine = self.routine(&entry.routine)?;
        let mut frame = MachineFrame::fresh(routine);
        if !entry.args.is_null() {
            if frame.ptrs.is_empty() {
                return Err(EngineError::Raised(format!(
                    "routine `{}` takes no arguments",
                    entry.routine
                )));
            }
            frame.ptrs[0] = Slot::Value(entry.args.clone());
        }
        self.run(MachineStack { frames: vec![frame] }, &cap)
    }

    fn resume(
        &self,
        stack: Box<dyn CapturedStack>,
        cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError> {
        self.run(*downcast(stack)?, &cap)
    }

    fn suspend_current(&self) -> Result<(), EngineError> {
        if self.reject_suspend.load(Ordering::Acquire) {
            return Err(EngineError::InvalidFrameRecord(
                "stack holds frames that cannot be captured".into(),
            ));
        }
        // The interpreter loop unwinds itself after this returns; the
        // suspension point and the loop share the host call stack.
        Ok(())
    }

    fn materialize_frames(
        &self,
        stack: Box<dyn CapturedStack>,
    ) -> Result<Box<FrameRecord>, EngineError> {
        let stack = downcast(stack)?;
        let mut chain: Option<Box<FrameRecord>> = None;
        // Outermost first, so each record links to the one before it.
        for frame in &stack.frames {
            if frame.pc == 0 {
                return Err(EngineError::InvalidFrameRecord(
                    "frame captured before its first instruction".into(),
                ));
            }
            let mut pointers = frame.ptrs.clone();
            pointers.extend(frame.stack.iter().cloned());
            let mut record = FrameRecord::new(
                pointers,
                frame.prims.clone(),
                frame.routine.method.clone(),
                (frame.pc - 1) as i32,
            );
            record.next = chain;
            chain = Some(Box::new(record));
        }
        chain.ok_or_else(|| EngineError::InvalidFrameRecord("captured stack is empty".into()))
    }

    fn dematerialize_frames(
        &self,
        chain: Box<FrameRecord>,
        entry: &EntryPoint,
    ) -> Result<Box<dyn CapturedStack>, EngineError> {
        let records: Vec<&FrameRecord> = chain.iter().collect();

        let tail = records[records.len() - 1];
        if tail.method.name != entry.routine {
            return Err(EngineError::InvalidFrameRecord(format!(
                "outermost frame is `{}`, expected entry routine `{}`",
                tail.method.name, entry.routine
            )));
        }

        let mut frames = Vec::with_capacity(records.len());
        for (depth, record) in records.iter().enumerate() {
            let frame = self.revive_frame(record, records.get(depth.wrapping_sub(1)))?;
            frames.push(frame);
        }
        frames.reverse();
        Ok(Box::new(MachineStack { frames }))
    }
}

impl Machine {
    /// Rebuild one live frame from its record. `callee` is the frame this
    /// one is suspended inside, present for every frame but the innermost.
    fn revive_frame(
        &self,
        record: &FrameRecord,
        callee: Option<&&FrameRecord>,
    ) -> Result<MachineFrame, EngineError> {
        let routine = self.routine(&record.method.name)?;
        if routine.method != record.method {
            return Err(EngineError::InvalidFrameRecord(format!(
                "method identity mismatch for `{}`",
                record.method.name
            )));
        }

        let resume_point = usize::try_from(record.resume_point).map_err(|_| {
            EngineError::InvalidFrameRecord(format!(
                "negative resume point in `{}`",
                record.method.name
            ))
        })?;
        let op = routine.code.get(resume_point).ok_or_else(|| {
            EngineError::InvalidFrameRecord(format!(
                "resume point {resume_point} out of range in `{}`",
                record.method.name
            ))
        })?;

        // The resume point must address the instruction execution is
        // parked on: a suspension op for the innermost frame, the call
        // into the next-inner frame for every other.
        match callee {
            None => {
                if !matches!(op, Op::Yield | Op::Suspend) {
                    return Err(EngineError::InvalidFrameRecord(format!(
                        "innermost resume point in `{}` is not a suspension op",
                        record.method.name
                    )));
                }
            }
            Some(callee) => match op {
                Op::Call(name) if *name == callee.method.name => {}
                _ => {
                    return Err(EngineError::InvalidFrameRecord(format!(
                        "resume point in `{}` does not call `{}`",
                        record.method.name, callee.method.name
                    )));
                }
            },
        }

        if record.pointers.len() < routine.ptr_slots {
            return Err(EngineError::InvalidFrameRecord(format!(
                "pointer slots truncated in `{}`",
                record.method.name
            )));
        }
        if record.primitives.len() != routine.prim_slots {
            return Err(EngineError::InvalidFrameRecord(format!(
                "primitive slot count mismatch in `{}`",
                record.method.name
            )));
        }

        let (ptrs, operand_stack) = record.pointers.split_at(routine.ptr_slots);
        Ok(MachineFrame {
            routine: routine.clone(),
            pc: resume_point + 1,
            ptrs: ptrs.to_vec(),
            prims: record.primitives.clone(),
            stack: operand_stack.to_vec(),
        })
    }
}

/* ===================== Resolution ===================== */

impl MethodResolver for Machine {
    fn resolve(&self, holder: &str, name: &str, signature: &MethodSignature) -> Option<Method> {
        self.routines
            .values()
            .map(|routine| &routine.method)
            .find(|m| m.holder == holder && m.name == name && &m.signature == signature)
            .cloned()
    }

    fn class_of(&self, receiver: &Slot) -> Option<String> {
        match receiver {
            Slot::Value(JsonValue::Object(map)) => map
                .get("class")
                .and_then(JsonValue::as_str)
                .map(str::to_owned),
            _ => None,
        }
    }
}
