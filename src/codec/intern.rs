//! Bounded string interning
//!
//! Holder names, method names, and reference type names repeat heavily
//! across the frames of one stream. A 16-bit reference either reuses a
//! previously defined pool slot (high bit clear) or defines one inline
//! (high bit set, followed by a u16 length and UTF-8 bytes). The pool is
//! capped at 2^15 entries; a full writer pool evicts its oldest entry and
//! reuses that slot, so pathological streams degrade to inline defines
//! instead of failing.
//!
//! The reader holds no policy at all: it fills whatever slot a define
//! names, so any future writer eviction strategy decodes unchanged.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};

use crate::codec::{read_u16, write_u16};
use crate::error::EngineError;

/// High bit of a reference marks an inline definition.
const DEFINE_BIT: u16 = 0x8000;

/// 15-bit slot space.
pub(crate) const MAX_POOL: usize = 1 << 15;

/* ===================== Writer ===================== */

/// Encoding side of the intern pool.
pub struct InternWriter {
    slots: HashMap<String, u16>,
    // Definition order, oldest first; drives eviction when full.
    order: VecDeque<(u16, String)>,
    next_slot: u16,
}

impl InternWriter {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            next_slot: 0,
        }
    }

    /// Write a reference to `text`, defining it inline on first use.
    pub fn write(&mut self, sink: &mut dyn Write, text: &str) -> Result<(), EngineError> {
        if let Some(&slot) = self.slots.get(text) {
            return write_u16(sink, slot);
        }

        let len = u16::try_from(text.len())
            .map_err(|_| EngineError::corrupt(format!("interned string of {} bytes too long", text.len())))?;

        let slot = if (self.next_slot as usize) < MAX_POOL {
            let slot = self.next_slot;
            self.next_slot += 1;
            slot
        } else {
            // Pool full: reuse the oldest slot.
            let (slot, evicted) = self
                .order
                .pop_front()
                .ok_or_else(|| EngineError::corrupt("intern pool full yet empty"))?;
            self.slots.remove(&evicted);
            slot
        };

        self.slots.insert(text.to_owned(), slot);
        self.order.push_back((slot, text.to_owned()));

        write_u16(sink, DEFINE_BIT | slot)?;
        write_u16(sink, len)?;
        sink.write_all(text.as_bytes())?;
        Ok(())
    }
}

impl Default for InternWriter {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Reader ===================== */

/// Decoding side of the intern pool.
pub struct InternReader {
    slots: Vec<Option<String>>,
}

impl InternReader {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Read one reference, filling the pool on inline definitions.
    pub fn read(&mut self, source: &mut dyn Read) -> Result<String, EngineError> {
        let raw = read_u16(source)?;
        let slot = (raw & !DEFINE_BIT) as usize;

        if raw & DEFINE_BIT != 0 {
            let len = read_u16(source)? as usize;
            let mut bytes = vec![0u8; len];
            source.read_exact(&mut bytes)?;
            let text = String::from_utf8(bytes)
                .map_err(|_| EngineError::corrupt("interned string is not valid UTF-8"))?;
            if slot >= self.slots.len() {
                self.slots.resize(slot + 1, None);
            }
            self.slots[slot] = Some(text.clone());
            return Ok(text);
        }

        self.slots
            .get(slot)
            .and_then(|entry| entry.clone())
            .ok_or_else(|| EngineError::corrupt(format!("intern reference to undefined slot {slot}")))
    }
}

impl Default for InternReader {
    fn default() -> Self {
        Self::new()
    }
}
