pub mod codec;
pub mod engine;
pub mod error;
pub mod frames;
pub mod host;
pub mod machine;
pub mod resolve;
pub mod substrate;
pub mod types;

// Re-export main types
pub use engine::{Continuation, Engine, EngineBuilder, Generator, SuspendCapability};
pub use error::{EngineError, IllegalStateKind};
pub use frames::{FrameRecord, Method, MethodSignature, Slot, TypeTag};
pub use substrate::{CapturedStack, ExecutionSubstrate, RunOutcome};
pub use types::{ContinuationState, EntryPoint, RecoveryPolicy};
