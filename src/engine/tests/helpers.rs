use std::sync::Arc;

use serde_json::json;

use crate::engine::{Continuation, Engine};
use crate::frames::{Method, MethodSignature, Slot, TypeTag};
use crate::machine::ops::{Op, Routine};
use crate::machine::Machine;
use crate::types::EntryPoint;

fn method(name: &str) -> Method {
    Method::new(
        "demo/Routines",
        name,
        MethodSignature::returning(TypeTag::Void),
    )
}

/// `count_up`: yields 0, 1, ... limit-1, then returns.
pub fn count_up(limit: u64) -> Routine {
    Routine::new(
        method("count_up"),
        0,
        1,
        vec![
            Op::SetPrim(0, 0),
            Op::BranchPrimLt(0, limit, 3),
            Op::Return,
            Op::PushPrim(0),
            Op::Yield,
            Op::IncrPrim(0),
            Op::Jump(1),
        ],
    )
}

/// `answer`: returns 42 without suspending.
pub fn answer() -> Routine {
    Routine::new(
        method("answer"),
        0,
        0,
        vec![Op::Push(Slot::Value(json!(42))), Op::Return],
    )
}

/// `explode`: raises immediately.
pub fn explode() -> Routine {
    Routine::new(method("explode"), 0, 0, vec![Op::Fail("boom".into())])
}

/// `yield_then_fail`: emits one value, raises on the next resume.
pub fn yield_then_fail() -> Routine {
    Routine::new(
        method("yield_then_fail"),
        0,
        0,
        vec![
            Op::Push(Slot::Value(json!("first"))),
            Op::Yield,
            Op::Fail("later".into()),
        ],
    )
}

/// `hold_ref`: stashes a self-reference and a null in its pointer slots,
/// suspends, then returns.
pub fn hold_ref() -> Routine {
    Routine::new(
        method("hold_ref"),
        2,
        0,
        vec![
            Op::Push(Slot::ContinuationRef),
            Op::Store(1),
            Op::Suspend,
            Op::Push(Slot::Value(json!("done"))),
            Op::Return,
        ],
    )
}

pub fn test_machine() -> Arc<Machine> {
    let mut m = Machine::new();
    m.register(count_up(3));
    m.register(answer());
    m.register(explode());
    m.register(yield_then_fail());
    m.register(hold_ref());
    Arc::new(m)
}

pub fn test_engine() -> (Arc<Machine>, Engine) {
    let machine = test_machine();
    let engine = Engine::new(machine.clone(), machine.clone());
    (machine, engine)
}

pub fn started(engine: &Engine, routine: &str) -> Continuation {
    engine
        .create(EntryPoint::new(routine, json!(null)))
        .unwrap()
}
