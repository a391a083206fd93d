//! Concurrent submission and lookup against one engine.

use std::sync::{Arc, Barrier};
use std::thread;

use kiln_jit::engine::EngineError;
use pretty_assertions::assert_eq;

use crate::util::{call_i64, calling_unit, constant_unit, engine};

#[test]
fn threads_submit_and_resolve_independently() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..8i64)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let name = format!("worker_{i}");
                engine
                    .add_module(&mut constant_unit(&format!("unit_{i}"), &name, i * 10), None)
                    .unwrap();
                call_i64(engine.lookup(&name).unwrap())
            })
        })
        .collect();

    let results: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, (0..8).map(|i| i * 10).collect::<Vec<_>>());
}

#[test]
fn lookup_waits_for_pending_unit() {
    let engine = Arc::new(engine());
    engine
        .add_module(&mut constant_unit("slow", "slow_fn", 11), None)
        .unwrap();

    // Readers race the compile worker; each blocks until the code is ready.
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || call_i64(engine.lookup("slow_fn").unwrap()))
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 11);
    }
}

#[test]
fn dependent_units_submitted_back_to_back() {
    let engine = engine();
    engine
        .add_module(&mut constant_unit("dep_base", "dep_value", 21), None)
        .unwrap();
    engine
        .add_module(&mut calling_unit("dep_user", "dep_twice", "dep_value", &[]), None)
        .unwrap();
    // The user unit may compile before the base unit finishes; its external
    // resolves through a blocking lookup.
    assert_eq!(call_i64(engine.lookup("dep_twice").unwrap()), 21);
}

#[test]
fn lookups_racing_submission_see_absent_or_ready() {
    const READERS: usize = 6;
    let engine = Arc::new(engine());
    let start = Arc::new(Barrier::new(READERS + 1));

    let submitter = {
        let engine = Arc::clone(&engine);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            engine
                .add_module(&mut constant_unit("race_base", "race_value", 37), None)
                .unwrap();
            engine
                .add_module(
                    &mut calling_unit("race_user", "race_twice", "race_value", &[]),
                    None,
                )
                .unwrap();
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                // Before registration the symbol is absent. Once registered,
                // a lookup blocks until the code is callable.
                loop {
                    match engine.lookup("race_twice") {
                        Ok(def) => return call_i64(def),
                        Err(EngineError::SymbolNotFound { .. }) => thread::yield_now(),
                        Err(other) => panic!("lookup raced into {other}"),
                    }
                }
            })
        })
        .collect();

    submitter.join().unwrap();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 37);
    }
}
