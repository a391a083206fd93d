//! Symbol resolution across units, absolute symbols, and the process.

use kiln_jit::engine::{EngineError, ExecutorAddr, ExecutorSymbolDef, JitSymbolFlags};
use pretty_assertions::assert_eq;

use crate::util::{call_i64, calling_unit, constant_unit, engine};

extern "C" fn host_triple(x: i64) -> i64 {
    x * 3
}

#[test]
fn add_lookup_call() {
    let engine = engine();
    let mut unit = constant_unit("answer_unit", "answer", 42);
    engine.add_module(&mut unit, None).unwrap();
    assert!(unit.is_consumed());

    let def = engine.lookup("answer").unwrap();
    assert!(def.flags.contains(JitSymbolFlags::CALLABLE));
    assert_eq!(call_i64(def), 42);
}

#[test]
fn unknown_symbol() {
    let engine = engine();
    assert_eq!(
        engine.lookup("kiln_never_defined"),
        Err(EngineError::SymbolNotFound {
            symbol: engine.mangle("kiln_never_defined")
        })
    );
}

#[test]
fn later_unit_calls_earlier_unit() {
    let engine = engine();
    engine
        .add_module(&mut constant_unit("base", "base_value", 40), None)
        .unwrap();
    engine
        .add_module(&mut calling_unit("user", "use_base", "base_value", &[]), None)
        .unwrap();
    assert_eq!(call_i64(engine.lookup("use_base").unwrap()), 40);
}

#[test]
fn unresolved_external_is_rejected() {
    let engine = engine();
    let mut unit = calling_unit("orphan", "orphan_fn", "kiln_nowhere_to_be_found", &[]);
    assert_eq!(
        engine.add_module(&mut unit, None),
        Err(EngineError::UnresolvedExternal {
            unit: "orphan".to_string(),
            symbol: engine.mangle("kiln_nowhere_to_be_found"),
        })
    );
    // Nothing the rejected unit defines was claimed.
    assert!(matches!(
        engine.lookup("orphan_fn"),
        Err(EngineError::SymbolNotFound { .. })
    ));
}

#[test]
fn duplicate_definition_is_rejected() {
    let engine = engine();
    engine
        .add_module(&mut constant_unit("first", "dup", 1), None)
        .unwrap();
    assert_eq!(
        engine.add_module(&mut constant_unit("second", "dup", 2), None),
        Err(EngineError::DuplicateDefinition {
            unit: "second".to_string(),
            symbol: engine.mangle("dup"),
        })
    );
    assert_eq!(call_i64(engine.lookup("dup").unwrap()), 1);
}

#[test]
fn absolute_symbols_link_into_units() {
    let engine = engine();
    let def = ExecutorSymbolDef::new(
        ExecutorAddr::from_ptr(host_triple as *const ()),
        JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE,
    );
    engine.define_absolute(None, &[("host_triple", def)]).unwrap();

    let resolved = engine.lookup("host_triple").unwrap();
    assert_eq!(resolved.address, def.address);
    assert!(resolved.flags.contains(JitSymbolFlags::ABSOLUTE));

    engine
        .add_module(&mut calling_unit("tripler", "triple_14", "host_triple", &[14]), None)
        .unwrap();
    assert_eq!(call_i64(engine.lookup("triple_14").unwrap()), 42);
}

#[test]
fn process_symbols_are_visible() {
    let engine = engine();
    engine
        .add_module(&mut calling_unit("libc_user", "abs_of", "labs", &[-9]), None)
        .unwrap();
    assert_eq!(call_i64(engine.lookup("abs_of").unwrap()), 9);
}
