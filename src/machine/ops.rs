//! Routine definitions for the stack machine
//!
//! A routine is a flat op list over two register files (pointer slots and
//! raw primitive slots) plus an operand stack. Ops are deliberately
//! coarse; this machine exists to exercise suspension, capture, and
//! replay, not to be a general-purpose instruction set.

use crate::frames::{Method, Slot};

/// One instruction. `usize` operands are slot indices or op offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Push a literal slot onto the operand stack.
    Push(Slot),
    /// Push pointer slot `i` onto the operand stack.
    Load(usize),
    /// Pop the operand stack into pointer slot `i`.
    Store(usize),
    /// Push primitive slot `i` onto the operand stack as a number.
    PushPrim(usize),
    /// Set primitive slot `i` to a constant.
    SetPrim(usize, u64),
    /// Increment primitive slot `i` by one.
    IncrPrim(usize),
    /// Jump to `target` when primitive slot `i` is strictly below `bound`.
    BranchPrimLt(usize, u64, usize),
    /// Unconditional jump.
    Jump(usize),
    /// Call the named zero-argument routine. The callee's return value,
    /// if any, lands on this frame's operand stack.
    Call(String),
    /// Pop a value and suspend the continuation, emitting it.
    Yield,
    /// Suspend the continuation without emitting a value.
    Suspend,
    /// Pop the return value (when the operand stack is non-empty) and
    /// leave the current frame.
    Return,
    /// Raise an error out of the entry point.
    Fail(String),
}

/// A registered routine: method identity, slot layout, and code.
#[derive(Debug, Clone)]
pub struct Routine {
    pub method: Method,
    pub ptr_slots: usize,
    pub prim_slots: usize,
    pub code: Vec<Op>,
}

impl Routine {
    pub fn new(method: Method, ptr_slots: usize, prim_slots: usize, code: Vec<Op>) -> Self {
        Self {
            method,
            ptr_slots,
            prim_slots,
            code,
        }
    }
}
