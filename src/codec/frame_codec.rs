//! Versioned frame-chain codec
//!
//! Encodes a `FrameRecord` chain innermost-first. Per frame:
//!
//! 1. derive-holder flag byte (set when the holder's name is hidden and
//!    must be recovered from the receiver slot at decode time)
//! 2. interned holder name, unless the flag is set
//! 3. interned method name
//! 4. pointer slots, as one host-codec value
//! 5. primitive slots, as one host-codec value
//! 6. method descriptor: return tag, parameter count, parameter tags
//! 7. resume point, i32 big-endian
//! 8. more-frames flag byte
//!
//! The intern pool is shared across all frames of one chain. Decoding
//! re-resolves every method identity through the caller's resolver; a
//! stream naming a method the resolver cannot produce is rejected, never
//! trusted.

use std::io::{Read, Write};

use serde_json::Value as JsonValue;

use crate::codec::intern::{InternReader, InternWriter};
use crate::codec::{read_i32, read_u8, write_i32, write_u8};
use crate::error::EngineError;
use crate::frames::{FrameRecord, Method, MethodSignature, Slot, TypeTag};
use crate::host::HostCodec;
use crate::resolve::MethodResolver;

/* ===================== Encoding ===================== */

/// Encode a whole chain, innermost frame first.
pub fn encode_chain(
    sink: &mut dyn Write,
    chain: &FrameRecord,
    host: &dyn HostCodec,
) -> Result<(), EngineError> {
    let mut pool = InternWriter::new();
    let mut frames = chain.iter().peekable();
    while let Some(frame) = frames.next() {
        encode_frame(sink, frame, host, &mut pool)?;
        write_u8(sink, u8::from(frames.peek().is_some()))?;
    }
    tracing::trace!(frames = chain.len(), "frame chain encoded");
    Ok(())
}

fn encode_frame(
    sink: &mut dyn Write,
    frame: &FrameRecord,
    host: &dyn HostCodec,
    pool: &mut InternWriter,
) -> Result<(), EngineError> {
    // A hidden holder name is useless to the decoder; recover the holder
    // from the receiver instead, when one is present.
    let derive_holder =
        frame.method.hidden && frame.pointers.first().is_some_and(Slot::is_reference);
    write_u8(sink, u8::from(derive_holder))?;
    if !derive_holder {
        pool.write(sink, &frame.method.holder)?;
    }
    pool.write(sink, &frame.method.name)?;

    host.write_value(sink, &serde_json::to_value(&frame.pointers)?)?;
    host.write_value(sink, &JsonValue::from(frame.primitives.clone()))?;

    write_type_tag(sink, &frame.method.signature.ret, pool)?;
    let count = u8::try_from(frame.method.signature.params.len())
        .map_err(|_| EngineError::corrupt("method has more than 255 parameters"))?;
    write_u8(sink, count)?;
    for param in &frame.method.signature.params {
        write_type_tag(sink, param, pool)?;
    }

    write_i32(sink, frame.resume_point)
}

fn write_type_tag(
    sink: &mut dyn Write,
    tag: &TypeTag,
    pool: &mut InternWriter,
) -> Result<(), EngineError> {
    write_u8(sink, tag.tag_byte())?;
    if let TypeTag::Reference(name) = tag {
        pool.write(sink, name)?;
    }
    Ok(())
}

/* ===================== Decoding ===================== */

/// Decode a chain, resolving every method through `resolver`.
pub fn decode_chain(
    source: &mut dyn Read,
    host: &dyn HostCodec,
    resolver: &dyn MethodResolver,
) -> Result<Box<FrameRecord>, EngineError> {
    let mut pool = InternReader::new();
    let mut frames = Vec::new();
    loop {
        frames.push(decode_frame(source, host, resolver, &mut pool)?);
        if read_u8(source)? == 0 {
            break;
        }
    }

    tracing::trace!(frames = frames.len(), "frame chain decoded");

    // Innermost frame came first; link each frame to its caller.
    let mut chain: Option<Box<FrameRecord>> = None;
    for mut frame in frames.into_iter().rev() {
        frame.next = chain;
        chain = Some(Box::new(frame));
    }
    chain.ok_or_else(|| EngineError::corrupt("frame chain is empty"))
}

fn decode_frame(
    source: &mut dyn Read,
    host: &dyn HostCodec,
    resolver: &dyn MethodResolver,
    pool: &mut InternReader,
) -> Result<FrameRecord, EngineError> {
    let derive_holder = read_u8(source)? != 0;
    let stored_holder = if derive_holder {
        None
    } else {
        Some(pool.read(source)?)
    };
    let name = pool.read(source)?;

    let pointers: Vec<Slot> = serde_json::from_value(host.read_value(source)?)?;
    let primitives: Vec<u64> = serde_json::from_value(host.read_value(source)?)?;

    let ret = read_type_tag(source, pool)?;
    let count = read_u8(source)? as usize;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        params.push(read_type_tag(source, pool)?);
    }
    let signature = MethodSignature { params, ret };

    let holder = match stored_holder {
        Some(holder) => holder,
        None => {
            let receiver = pointers.first().ok_or_else(|| {
                EngineError::corrupt("derive-holder frame has no receiver slot")
            })?;
            resolver.class_of(receiver).ok_or_else(|| {
                EngineError::InvalidFrameRecord(format!(
                    "cannot derive holder of method `{name}` from its receiver"
                ))
            })?
        }
    };

    let method = resolver
        .resolve(&holder, &name, &signature)
        .ok_or_else(|| EngineError::NoSuchMethod {
            holder: holder.clone(),
            method: name.clone(),
        })?;

    let resume_point = read_i32(source)?;
    Ok(FrameRecord::new(pointers, primitives, method, resume_point))
}

fn read_type_tag(
    source: &mut dyn Read,
    pool: &mut InternReader,
) -> Result<TypeTag, EngineError> {
    Ok(match read_u8(source)? {
        b'I' => TypeTag::Int,
        b'Z' => TypeTag::Boolean,
        b'D' => TypeTag::Double,
        b'F' => TypeTag::Float,
        b'J' => TypeTag::Long,
        b'B' => TypeTag::Byte,
        b'C' => TypeTag::Char,
        b'S' => TypeTag::Short,
        b'V' => TypeTag::Void,
        b'L' => TypeTag::Reference(pool.read(source)?),
        other => return Err(EngineError::corrupt(format!("unknown type tag byte {other:#04x}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::JsonHostCodec;
    use serde_json::json;
    use std::io::Cursor;

    struct EchoResolver;

    impl MethodResolver for EchoResolver {
        fn resolve(
            &self,
            holder: &str,
            name: &str,
            signature: &MethodSignature,
        ) -> Option<Method> {
            if holder.starts_with("missing") {
                return None;
            }
            Some(Method::new(holder, name, signature.clone()))
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

    fn sample_chain() -> FrameRecord {
        let sig = MethodSignature {
            params: vec![TypeTag::Int, TypeTag::Reference("demo/Box".into())],
            ret: TypeTag::Long,
        };
        let mut inner = FrameRecord::new(
            vec![Slot::Value(json!({"class": "demo/Box", "n": 3})), Slot::Null],
            vec![7, u64::MAX],
            Method::new("demo/Box", "step", sig),
            12,
        );
        inner.next = Some(Box::new(FrameRecord::new(
            vec![Slot::ContinuationRef],
            vec![],
            Method::new(
                "demo/Main",
                "run",
                MethodSignature::returning(TypeTag::Void),
            ),
            40,
        )));
        inner
    }

    fn round_trip(chain: &FrameRecord) -> Box<FrameRecord> {
        let mut buf = Vec::new();
        encode_chain(&mut buf, chain, &JsonHostCodec).unwrap();
        decode_chain(&mut Cursor::new(buf), &JsonHostCodec, &EchoResolver).unwrap()
    }

    #[test]
    fn test_chain_round_trip() {
        let chain = sample_chain();
        let decoded = round_trip(&chain);
        assert_eq!(*decoded, chain);
    }

    #[test]
    fn test_hidden_holder_is_derived_from_receiver() {
        let mut chain = sample_chain();
        chain.method.hidden = true;
        let decoded = round_trip(&chain);
        // The resolver reconstructs the holder from the receiver's class.
        assert_eq!(decoded.method.holder, "demo/Box");
        assert_eq!(decoded.method.name, "step");
    }

    #[test]
    fn test_unresolvable_method_is_rejected() {
        let chain = FrameRecord::new(
            vec![],
            vec![],
            Method::new(
                "missing/Clazz",
                "gone",
                MethodSignature::returning(TypeTag::Void),
            ),
            0,
        );
        let mut buf = Vec::new();
        encode_chain(&mut buf, &chain, &JsonHostCodec).unwrap();
        let err = decode_chain(&mut Cursor::new(buf), &JsonHostCodec, &EchoResolver)
            .unwrap_err();
        assert!(matches!(err, EngineError::NoSuchMethod { .. }));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let chain = sample_chain();
        let mut first = Vec::new();
        let mut second = Vec::new();
        encode_chain(&mut first, &chain, &JsonHostCodec).unwrap();
        encode_chain(&mut second, &chain, &JsonHostCodec).unwrap();
        assert_eq!(first, second);
    }
}
