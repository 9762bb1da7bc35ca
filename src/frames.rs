//! Frame record data model
//!
//! A suspended continuation's captured stack, reified as an
//! ownership-linked chain of `FrameRecord`s. The chain is pure data:
//! the continuation owns it exclusively while it exists, and ownership
//! transfers atomically to the substrate on dematerialization.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/* ===================== Slots ===================== */

/// One object-reference slot in a captured frame.
///
/// `ContinuationRef` is the self-reference case: the continuation object
/// reachable from its own captured frames. It round-trips as a plain tag
/// so decoding never recurses into the object graph being rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Slot {
    Null,
    Value(JsonValue),
    ContinuationRef,
}

impl Slot {
    /// Whether the slot holds an actual reference (receiver detection).
    pub fn is_reference(&self) -> bool {
        !matches!(self, Slot::Null)
    }
}

/* ===================== Method identity ===================== */

/// Compact type tag for descriptor encoding: the primitive kinds plus
/// named reference types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Boolean,
    Double,
    Float,
    Long,
    Byte,
    Char,
    Short,
    Void,
    Reference(String),
}

impl TypeTag {
    /// The single ASCII byte for this tag (`L` for references, which are
    /// followed by an interned class name on the wire).
    pub fn tag_byte(&self) -> u8 {
        match self {
            TypeTag::Int => b'I',
            TypeTag::Boolean => b'Z',
            TypeTag::Double => b'D',
            TypeTag::Float => b'F',
            TypeTag::Long => b'J',
            TypeTag::Byte => b'B',
            TypeTag::Char => b'C',
            TypeTag::Short => b'S',
            TypeTag::Void => b'V',
            TypeTag::Reference(_) => b'L',
        }
    }
}

/// A method's parameter and return types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<TypeTag>,
    pub ret: TypeTag,
}

impl MethodSignature {
    /// Zero-argument signature returning a reference type.
    pub fn returning(ret: TypeTag) -> Self {
        Self { params: vec![], ret }
    }
}

/// Identity of the method a captured frame belongs to.
///
/// `hidden` marks a holder whose name cannot be used for resolution (a
/// synthesized closure type); such frames are encoded with the
/// derive-holder-from-receiver flag when a receiver slot is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub holder: String,
    pub name: String,
    pub signature: MethodSignature,
    pub hidden: bool,
}

impl Method {
    pub fn new(
        holder: impl Into<String>,
        name: impl Into<String>,
        signature: MethodSignature,
    ) -> Self {
        Self {
            holder: holder.into(),
            name: name.into(),
            signature,
            hidden: false,
        }
    }
}

/* ===================== Frame records ===================== */

/// One reified call frame.
///
/// `pointers` and `primitives` are the stack and local slots at the
/// capture point (unused pointer slots are `Null`). `resume_point` is the
/// opcode offset of the call instruction at which execution continues:
/// resuming means returning into this frame as if that call just
/// returned. `next` links to the caller's frame; the innermost frame is
/// the head of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub pointers: Vec<Slot>,
    pub primitives: Vec<u64>,
    pub method: Method,
    pub resume_point: i32,
    pub next: Option<Box<FrameRecord>>,
}

impl FrameRecord {
    pub fn new(
        pointers: Vec<Slot>,
        primitives: Vec<u64>,
        method: Method,
        resume_point: i32,
    ) -> Self {
        Self {
            pointers,
            primitives,
            method,
            resume_point,
            next: None,
        }
    }

    /// Iterate the chain from the innermost frame outward.
    pub fn iter(&self) -> FrameIter<'_> {
        FrameIter { next: Some(self) }
    }

    /// Number of frames in the chain (always at least one).
    pub fn len(&self) -> usize {
        self.iter().count()
    }
}

pub struct FrameIter<'a> {
    next: Option<&'a FrameRecord>,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a FrameRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next.as_deref();
        Some(current)
    }
}
