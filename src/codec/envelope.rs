//! Part-kind framing
//!
//! When continuations travel inside a larger object stream, each
//! engine-owned part is introduced by a one-byte kind tag. A continuation
//! part is followed by a full envelope; a suspend capability part is the
//! tag alone, since capabilities carry no transferable state and
//! deserialize to an inert marker.

use std::io::{Read, Write};

use crate::codec::{read_u8, write_u8};
use crate::engine::{Continuation, Engine};
use crate::error::EngineError;

const TAG_CONTINUATION: u8 = 1;
const TAG_SUSPEND_CAPABILITY: u8 = 2;

/// An engine-owned object pulled out of a mixed stream.
#[derive(Debug)]
pub enum Part {
    Continuation(Continuation),
    /// A stored capability. It grants nothing after transfer; holders
    /// must obtain a live capability from a resume episode.
    SuspendCapabilityMarker,
}

/// Write one engine-owned part with its kind tag.
pub fn write_part(
    engine: &Engine,
    sink: &mut dyn Write,
    part: &Part,
) -> Result<(), EngineError> {
    match part {
        Part::Continuation(cont) => {
            write_u8(sink, TAG_CONTINUATION)?;
            engine.serialize(cont, sink)
        }
        Part::SuspendCapabilityMarker => write_u8(sink, TAG_SUSPEND_CAPABILITY),
    }
}

/// Read one engine-owned part.
pub fn read_part(engine: &Engine, source: &mut dyn Read) -> Result<Part, EngineError> {
    match read_u8(source)? {
        TAG_CONTINUATION => Ok(Part::Continuation(engine.deserialize(source)?)),
        TAG_SUSPEND_CAPABILITY => Ok(Part::SuspendCapabilityMarker),
        other => Err(EngineError::corrupt(format!("unknown part kind tag {other}"))),
    }
}
