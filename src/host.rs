//! Host object serialization
//!
//! The engine never interprets the values captured in frame slots or the
//! entry point's arguments; it hands whole value graphs to an injected
//! `HostCodec`. The default codec writes length-prefixed JSON, which is
//! also how lifecycle state and entry points travel inside the envelope.

use std::io::{Read, Write};

use serde_json::Value as JsonValue;

use crate::error::EngineError;

/// Writes and reads arbitrary host value graphs.
///
/// Implementations must be self-delimiting: `read_value` consumes exactly
/// the bytes a matching `write_value` produced, so codec payloads can be
/// embedded mid-stream.
pub trait HostCodec: Send + Sync {
    fn write_value(&self, sink: &mut dyn Write, value: &JsonValue) -> Result<(), EngineError>;

    fn read_value(&self, source: &mut dyn Read) -> Result<JsonValue, EngineError>;
}

/// Default host codec: 4-byte big-endian length prefix + JSON bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHostCodec;

// Upper bound on a single embedded value, to fail fast on corrupt length
// prefixes instead of attempting a huge allocation.
const MAX_VALUE_BYTES: u32 = 256 * 1024 * 1024;

impl HostCodec for JsonHostCodec {
    fn write_value(&self, sink: &mut dyn Write, value: &JsonValue) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(value)?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| EngineError::corrupt("host value exceeds 4 GiB"))?;
        sink.write_all(&len.to_be_bytes())?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    fn read_value(&self, source: &mut dyn Read) -> Result<JsonValue, EngineError> {
        let mut prefix = [0u8; 4];
        source.read_exact(&mut prefix)?;
        let len = u32::from_be_bytes(prefix);
        if len > MAX_VALUE_BYTES {
            return Err(EngineError::corrupt(format!(
                "host value length {len} exceeds limit"
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        source.read_exact(&mut bytes)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
