//! Submission, trackers, and session teardown.

use kiln_jit::engine::EngineError;
use pretty_assertions::assert_eq;

use crate::util::{call_i64, constant_unit, engine};

#[test]
fn second_submission_fails() {
    let engine = engine();
    let mut unit = constant_unit("once", "once_fn", 1);
    engine.add_module(&mut unit, None).unwrap();
    assert_eq!(
        engine.add_module(&mut unit, None),
        Err(EngineError::UnitConsumed {
            unit: "once".to_string()
        })
    );
}

#[test]
fn removing_tracker_unloads_its_units() {
    let engine = engine();
    let tracker = engine.create_resource_tracker();
    engine
        .add_module(&mut constant_unit("tracked", "tracked_fn", 5), Some(&tracker))
        .unwrap();
    engine
        .add_module(&mut constant_unit("kept", "kept_fn", 6), None)
        .unwrap();
    assert_eq!(call_i64(engine.lookup("tracked_fn").unwrap()), 5);

    tracker.remove().unwrap();
    assert!(tracker.is_defunct());
    assert!(matches!(
        engine.lookup("tracked_fn"),
        Err(EngineError::SymbolNotFound { .. })
    ));
    assert_eq!(call_i64(engine.lookup("kept_fn").unwrap()), 6);

    assert_eq!(
        engine.add_module(&mut constant_unit("late", "late_fn", 7), Some(&tracker)),
        Err(EngineError::TrackerDefunct)
    );
}

#[test]
fn removed_names_can_be_defined_again() {
    let engine = engine();
    let tracker = engine.create_resource_tracker();
    engine
        .add_module(&mut constant_unit("v1", "versioned", 1), Some(&tracker))
        .unwrap();
    assert_eq!(call_i64(engine.lookup("versioned").unwrap()), 1);
    tracker.remove().unwrap();

    engine
        .add_module(&mut constant_unit("v2", "versioned", 2), None)
        .unwrap();
    assert_eq!(call_i64(engine.lookup("versioned").unwrap()), 2);
}

#[test]
fn ended_session_rejects_units() {
    let engine = engine();
    engine
        .add_module(&mut constant_unit("before", "before_fn", 1), None)
        .unwrap();
    engine.end_session().unwrap();
    // Idempotent.
    engine.end_session().unwrap();

    assert_eq!(
        engine.add_module(&mut constant_unit("after", "after_fn", 2), None),
        Err(EngineError::SessionEnded)
    );
    assert!(engine.dump_execution_session().contains("[ended]"));
}

#[test]
fn dump_lists_units_and_symbols() {
    let engine = engine();
    engine
        .add_module(&mut constant_unit("dumped", "dumped_fn", 3), None)
        .unwrap();
    engine.lookup("dumped_fn").unwrap();

    let dump = engine.dump_execution_session();
    assert!(dump.contains("<main>"), "{dump}");
    assert!(dump.contains("dumped_fn"), "{dump}");
    assert!(dump.contains("unit dumped"), "{dump}");
    assert!(dump.contains("process-symbols"), "{dump}");
}
