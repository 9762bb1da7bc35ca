use std::io::Cursor;
use std::sync::{Arc, Barrier};

use maplit::hashmap;
use serde_json::json;

use super::helpers::*;
use crate::codec::envelope::{read_part, write_part, Part};
use crate::codec::FORMAT_VERSION;
use crate::engine::{Engine, SuspendCapability};
use crate::error::{EngineError, IllegalStateKind};
use crate::frames::FrameRecord;
use crate::host::{HostCodec, JsonHostCodec};
use crate::substrate::{CapturedStack, ExecutionSubstrate, RunOutcome};
use crate::types::{ContinuationState, EntryPoint};

#[test]
fn test_round_trip_restores_a_suspended_continuation() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());
    assert_eq!(cont.take_yielded(), Some(json!(0)));

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();
    // Serialization must leave the original intact.
    assert_eq!(cont.state(), ContinuationState::Suspended);

    let restored = engine.deserialize(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(restored.state(), ContinuationState::Suspended);
    assert_ne!(restored.id(), cont.id());

    assert!(restored.resume().unwrap());
    assert_eq!(restored.take_yielded(), Some(json!(1)));
    assert!(restored.resume().unwrap());
    assert_eq!(restored.take_yielded(), Some(json!(2)));
    assert!(!restored.resume().unwrap());
    assert_eq!(restored.state(), ContinuationState::Completed);
}

#[test]
fn test_original_still_runs_after_being_serialized() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();

    assert!(cont.resume().unwrap());
    assert_eq!(cont.take_yielded(), Some(json!(1)));
}

#[test]
fn test_new_continuation_round_trips_without_frames() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "answer");

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();
    assert_eq!(cont.state(), ContinuationState::New);

    let restored = engine.deserialize(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(restored.state(), ContinuationState::New);
    assert!(!restored.resume().unwrap());
    assert_eq!(restored.result(), Some(json!(42)));
}

#[test]
fn test_serialization_is_repeatable_and_byte_identical() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());

    let mut first = Vec::new();
    engine.serialize(&cont, &mut first).unwrap();
    let mut second = Vec::new();
    engine.serialize(&cont, &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_self_reference_and_null_slots_round_trip() {
    let (_, engine) = test_engine();
    let args = serde_json::to_value(hashmap! {"seed" => 1}).unwrap();
    let cont = engine.create(EntryPoint::new("hold_ref", args)).unwrap();
    assert!(cont.resume().unwrap());

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();
    let restored = engine.deserialize(&mut Cursor::new(bytes)).unwrap();

    assert!(!restored.resume().unwrap());
    assert_eq!(restored.result(), Some(json!("done")));
}

#[test]
fn test_terminal_continuation_cannot_be_serialized() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "answer");
    cont.resume().unwrap();

    let mut bytes = Vec::new();
    let err = engine.serialize(&cont, &mut bytes).unwrap_err();
    assert!(matches!(
        err,
        EngineError::IllegalState(IllegalStateKind::Completed)
    ));
    assert!(bytes.is_empty());
}

#[test]
fn test_version_mismatch_is_rejected() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();
    bytes[0] = (FORMAT_VERSION + 1) << 4;

    let err = engine.deserialize(&mut Cursor::new(bytes)).unwrap_err();
    match err {
        EngineError::FormatVersion { found, expected } => {
            assert_eq!(found, FORMAT_VERSION + 1);
            assert_eq!(expected, FORMAT_VERSION);
        }
        other => panic!("expected FormatVersion, got {other:?}"),
    }
}

#[test]
fn test_stored_running_state_is_rejected() {
    let (_, engine) = test_engine();
    let host = JsonHostCodec;
    let mut bytes = vec![FORMAT_VERSION << 4];
    host.write_value(&mut bytes, &json!("running")).unwrap();
    host.write_value(&mut bytes, &json!({"routine": "count_up", "args": null}))
        .unwrap();

    let err = engine.deserialize(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::IllegalState(IllegalStateKind::Running)
    ));
}

#[test]
fn test_truncated_stream_is_rejected() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());

    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();
    bytes.truncate(bytes.len() / 2);
    assert!(engine.deserialize(&mut Cursor::new(bytes)).is_err());
}

#[test]
fn test_registration_callback_sees_an_incomplete_instance() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());
    let mut bytes = Vec::new();
    engine.serialize(&cont, &mut bytes).unwrap();

    let mut observed = None;
    let restored = engine
        .deserialize_with(&mut Cursor::new(bytes), None, |half_built| {
            observed = Some(half_built.state());
        })
        .unwrap();
    assert_eq!(observed, Some(ContinuationState::Incomplete));
    assert_eq!(restored.state(), ContinuationState::Suspended);
}

#[test]
fn test_part_framing_round_trips_mixed_parts() {
    let (_, engine) = test_engine();
    let cont = started(&engine, "count_up");
    assert!(cont.resume().unwrap());

    let mut bytes = Vec::new();
    write_part(&engine, &mut bytes, &Part::Continuation(cont)).unwrap();
    write_part(&engine, &mut bytes, &Part::SuspendCapabilityMarker).unwrap();

    let mut cursor = Cursor::new(bytes);
    let first = read_part(&engine, &mut cursor).unwrap();
    match first {
        Part::Continuation(restored) => {
            assert_eq!(restored.state(), ContinuationState::Suspended);
        }
        other => panic!("expected a continuation part, got {other:?}"),
    }
    assert!(matches!(
        read_part(&engine, &mut cursor).unwrap(),
        Part::SuspendCapabilityMarker
    ));
}

/* ===================== Serialize while running ===================== */

/// Substrate whose entry point blocks on barriers, keeping the
/// continuation observably `Running` from another thread.
#[derive(Debug)]
struct BlockingSubstrate {
    started: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl ExecutionSubstrate for BlockingSubstrate {
    fn supports_continuations(&self) -> bool {
        true
    }

    fn begin(
        &self,
        _entry: &EntryPoint,
        _cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError> {
        self.started.wait();
        self.release.wait();
        Ok(RunOutcome::Returned(None))
    }

    fn resume(
        &self,
        _stack: Box<dyn CapturedStack>,
        _cap: SuspendCapability,
    ) -> Result<RunOutcome, EngineError> {
        Err(EngineError::Raised("blocking substrate never suspends".into()))
    }

    fn suspend_current(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn materialize_frames(
        &self,
        _stack: Box<dyn CapturedStack>,
    ) -> Result<Box<FrameRecord>, EngineError> {
        Err(EngineError::InvalidFrameRecord("nothing to capture".into()))
    }

    fn dematerialize_frames(
        &self,
        _chain: Box<FrameRecord>,
        _entry: &EntryPoint,
    ) -> Result<Box<dyn CapturedStack>, EngineError> {
        Err(EngineError::InvalidFrameRecord("nothing to replay".into()))
    }
}

#[test]
fn test_serializing_a_running_continuation_writes_nothing() {
    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let substrate = Arc::new(BlockingSubstrate {
        started: started.clone(),
        release: release.clone(),
    });
    let resolver = test_machine();
    let engine = Engine::new(substrate, resolver);
    let cont = started_on(&engine);

    let runner = {
        let cont = cont.clone();
        std::thread::spawn(move || cont.resume())
    };

    started.wait();
    assert_eq!(cont.state(), ContinuationState::Running);
    let mut bytes = Vec::new();
    let err = engine.serialize(&cont, &mut bytes).unwrap_err();
    assert!(matches!(
        err,
        EngineError::IllegalState(IllegalStateKind::Running)
    ));
    assert!(bytes.is_empty());

    release.wait();
    assert!(!runner.join().unwrap().unwrap());
    assert_eq!(cont.state(), ContinuationState::Completed);
}

fn started_on(engine: &Engine) -> crate::engine::Continuation {
    engine
        .create(EntryPoint::new("blocker", json!(null)))
        .unwrap()
}
