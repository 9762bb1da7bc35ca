use std::io::Cursor;

use serde_json::json;

use super::helpers::*;
use crate::engine::Generator;
use crate::error::EngineError;

#[test]
fn test_generator_yields_each_value_then_exhausts() {
    let (_, engine) = test_engine();
    let mut gen = Generator::new(started(&engine, "count_up"));

    assert_eq!(gen.next_value().unwrap(), Some(json!(0)));
    assert_eq!(gen.next_value().unwrap(), Some(json!(1)));
    assert_eq!(gen.next_value().unwrap(), Some(json!(2)));
    assert_eq!(gen.next_value().unwrap(), None);
    // Exhaustion is stable.
    assert_eq!(gen.next_value().unwrap(), None);
    assert!(gen.continuation().is_completed());
}

#[test]
fn test_generator_as_iterator() {
    let (_, engine) = test_engine();
    let gen = Generator::from(started(&engine, "count_up"));
    let values: Result<Vec<_>, EngineError> = gen.collect();
    assert_eq!(values.unwrap(), vec![json!(0), json!(1), json!(2)]);
}

#[test]
fn test_generator_survives_serialization_mid_stream() {
    let (_, engine) = test_engine();
    let mut gen = Generator::new(started(&engine, "count_up"));
    assert_eq!(gen.next_value().unwrap(), Some(json!(0)));

    let mut bytes = Vec::new();
    engine.serialize(gen.continuation(), &mut bytes).unwrap();
    let restored = engine.deserialize(&mut Cursor::new(bytes)).unwrap();

    let mut resumed = Generator::new(restored);
    assert_eq!(resumed.next_value().unwrap(), Some(json!(1)));
    assert_eq!(resumed.next_value().unwrap(), Some(json!(2)));
    assert_eq!(resumed.next_value().unwrap(), None);
}

#[test]
fn test_generator_surfaces_entry_point_failures() {
    let (_, engine) = test_engine();
    let mut gen = Generator::new(started(&engine, "yield_then_fail"));

    assert_eq!(gen.next_value().unwrap(), Some(json!("first")));
    assert!(matches!(
        gen.next_value().unwrap_err(),
        EngineError::ExecutionFailure(_)
    ));
    // A failed generator stays exhausted.
    assert_eq!(gen.next_value().unwrap(), None);
}

#[test]
fn test_suspension_without_a_value_yields_null() {
    let (_, engine) = test_engine();
    let mut gen = Generator::new(started(&engine, "hold_ref"));
    assert_eq!(gen.next_value().unwrap(), Some(json!(null)));
    assert_eq!(gen.next_value().unwrap(), None);
}
