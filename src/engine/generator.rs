//! Generator adapter
//!
//! A pull-based view over a continuation whose entry point emits values
//! at its suspend points. Each `next_value` call resumes the underlying
//! continuation and surfaces what it yielded.

use serde_json::Value as JsonValue;

use crate::engine::Continuation;
use crate::error::EngineError;

/// Pull-based iterator over a value-emitting continuation.
pub struct Generator {
    cont: Continuation,
}

impl Generator {
    pub fn new(cont: Continuation) -> Self {
        Self { cont }
    }

    /// Resume the continuation and return the value it yielded, or
    /// `Ok(None)` once it has run to completion.
    ///
    /// A suspend that emitted no value surfaces as `Null`, keeping the
    /// value stream aligned with the suspension stream.
    pub fn next_value(&mut self) -> Result<Option<JsonValue>, EngineError> {
        if !self.cont.is_resumable() {
            return Ok(None);
        }
        if self.cont.resume()? {
            Ok(Some(self.cont.take_yielded().unwrap_or(JsonValue::Null)))
        } else {
            Ok(None)
        }
    }

    pub fn continuation(&self) -> &Continuation {
        &self.cont
    }

    /// Tear down into the continuation, e.g. to serialize mid-stream.
    pub fn into_continuation(self) -> Continuation {
        self.cont
    }
}

impl Iterator for Generator {
    type Item = Result<JsonValue, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }
}

impl From<Continuation> for Generator {
    fn from(cont: Continuation) -> Self {
        Self::new(cont)
    }
}
