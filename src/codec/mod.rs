//! Wire codec for continuation envelopes
//!
//! - `intern`: bounded string interning shared by every frame in a stream
//! - `frame_codec`: versioned frame-chain encoding
//! - `envelope`: part-kind framing for mixed object streams
//!
//! All multi-byte integers on the wire are big-endian.

pub mod envelope;
pub mod frame_codec;
pub mod intern;

use std::io::{Read, Write};

use crate::error::EngineError;

/// Major format version carried in the envelope header nibble and bumped
/// on any incompatible layout change.
pub const FORMAT_VERSION: u8 = 2;

pub(crate) fn write_u8(sink: &mut dyn Write, value: u8) -> Result<(), EngineError> {
    sink.write_all(&[value])?;
    Ok(())
}

pub(crate) fn read_u8(source: &mut dyn Read) -> Result<u8, EngineError> {
    let mut buf = [0u8; 1];
    source.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn write_u16(sink: &mut dyn Write, value: u16) -> Result<(), EngineError> {
    sink.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub(crate) fn read_u16(source: &mut dyn Read) -> Result<u16, EngineError> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn write_i32(sink: &mut dyn Write, value: i32) -> Result<(), EngineError> {
    sink.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub(crate) fn read_i32(source: &mut dyn Read) -> Result<i32, EngineError> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}
