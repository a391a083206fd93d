use kiln_expr::{Expression, FnType, Param, TypeDescr};
use pretty_assertions::assert_eq;

use super::helper::{binary, codegen_error, pipeline, prim, run, run_in};
use crate::error::CodegenError;
use crate::native::Value;

#[test]
fn test_i64_arithmetic() {
    let mut pipeline = pipeline();
    let cases = [
        ("add_i64", 40, 2, 42),
        ("sub_i64", 40, 2, 38),
        ("mul_i64", -6, 7, -42),
        ("div_i64", -7, 2, -3),
        ("rem_i64", -7, 2, -1),
    ];
    for (op, a, b, expected) in cases {
        let expr = binary(op, Expression::i64(a), Expression::i64(b));
        assert_eq!(run_in(&mut pipeline, &expr), Value::I64(expected), "{op}");
    }
}

#[test]
fn test_integer_division_does_not_trap() {
    let mut pipeline = pipeline();
    let params = vec![Param::new("a", TypeDescr::I64), Param::new("b", TypeDescr::I64)];
    let body = |op: &str| {
        binary(
            op,
            Expression::var("a", TypeDescr::I64),
            Expression::var("b", TypeDescr::I64),
        )
    };
    let mut compile = |name: &str, op: &str| {
        let lambda = Expression::lambda(name, params.clone(), TypeDescr::I64, body(op));
        pipeline.codegen_toplevel(&lambda).unwrap()
    };
    let div = compile("div_at_runtime", "div_i64");
    let rem = compile("rem_at_runtime", "rem_i64");

    let cases = [
        (7, 2, 3, 1),
        (7, 0, 0, 0),
        (i64::MIN, -1, i64::MIN, 0),
        (i64::MIN, 0, 0, 0),
        (-9, 4, -2, -1),
    ];
    for (a, b, quotient, remainder) in cases {
        let args = [Value::I64(a), Value::I64(b)];
        assert_eq!(unsafe { div.call(&args) }, Ok(Value::I64(quotient)), "{a} / {b}");
        assert_eq!(unsafe { rem.call(&args) }, Ok(Value::I64(remainder)), "{a} % {b}");
    }
}

#[test]
fn test_i32_division_by_zero_folds_to_zero() {
    let expr = binary("div_i32", Expression::i32(i32::MIN), Expression::i32(0));
    assert_eq!(run(&expr), Value::I32(0));
    let expr = binary("div_i32", Expression::i32(i32::MIN), Expression::i32(-1));
    assert_eq!(run(&expr), Value::I32(i32::MIN));
}

#[test]
fn test_i32_arithmetic() {
    let expr = binary("mul_i32", Expression::i32(-300), Expression::i32(7));
    assert_eq!(run(&expr), Value::I32(-2100));
}

#[test]
fn test_f64_arithmetic() {
    let mut pipeline = pipeline();
    let cases = [
        ("add_f64", 1.5, 2.25, 3.75),
        ("sub_f64", 1.5, 2.25, -0.75),
        ("mul_f64", 1.5, -2.0, -3.0),
        ("div_f64", 1.0, 4.0, 0.25),
        ("rem_f64", 7.5, 2.0, 1.5),
    ];
    for (op, a, b, expected) in cases {
        let expr = binary(op, Expression::f64(a), Expression::f64(b));
        assert_eq!(run_in(&mut pipeline, &expr), Value::F64(expected), "{op}");
    }
}

#[test]
fn test_comparisons() {
    let mut pipeline = pipeline();
    let cases = [
        ("lt_i64", Expression::i64(-1), Expression::i64(0), true),
        ("ge_i64", Expression::i64(-1), Expression::i64(0), false),
        ("eq_i32", Expression::i32(5), Expression::i32(5), true),
        ("ne_i32", Expression::i32(5), Expression::i32(5), false),
        ("le_f64", Expression::f64(0.5), Expression::f64(0.5), true),
        ("gt_f64", Expression::f64(0.5), Expression::f64(0.25), true),
        ("ne_f64", Expression::f64(f64::NAN), Expression::f64(f64::NAN), true),
    ];
    for (op, a, b, expected) in cases {
        let expr = binary(op, a, b);
        assert_eq!(run_in(&mut pipeline, &expr), Value::Bool(expected), "{op}");
    }
}

#[test]
fn test_boolean_connectives() {
    let mut pipeline = pipeline();
    let t = Expression::bool(true);
    let f = Expression::bool(false);
    assert_eq!(run_in(&mut pipeline, &binary("and", t.clone(), f.clone())), Value::Bool(false));
    assert_eq!(run_in(&mut pipeline, &binary("or", t.clone(), f.clone())), Value::Bool(true));
    assert_eq!(run_in(&mut pipeline, &binary("xor", t.clone(), t.clone())), Value::Bool(false));
    let not = Expression::apply(prim("not"), vec![f]);
    assert_eq!(run_in(&mut pipeline, &not), Value::Bool(true));
}

#[test]
fn test_negation() {
    let mut pipeline = pipeline();
    let neg = Expression::apply(prim("neg_i64"), vec![Expression::i64(9)]);
    assert_eq!(run_in(&mut pipeline, &neg), Value::I64(-9));
    let fneg = Expression::apply(prim("neg_f64"), vec![Expression::f64(0.5)]);
    assert_eq!(run_in(&mut pipeline, &fneg), Value::F64(-0.5));
}

#[test]
fn test_native_primitive_from_process() {
    let expr = Expression::apply(prim("abs_i64"), vec![Expression::i64(-17)]);
    assert_eq!(run(&expr), Value::I64(17));
}

#[test]
fn test_primitive_as_value() {
    // ((lambda apply2 (f a b) (f a b)) #add_i64 3 4)
    let op_ty = TypeDescr::function(vec![TypeDescr::I64, TypeDescr::I64], TypeDescr::I64);
    let apply2 = Expression::lambda(
        "apply2",
        vec![
            Param::new("f", op_ty.clone()),
            Param::new("a", TypeDescr::I64),
            Param::new("b", TypeDescr::I64),
        ],
        TypeDescr::I64,
        Expression::apply(
            Expression::var("f", op_ty),
            vec![
                Expression::var("a", TypeDescr::I64),
                Expression::var("b", TypeDescr::I64),
            ],
        ),
    );
    let mut pipeline = pipeline();
    let sum = Expression::apply(
        apply2.clone(),
        vec![prim("add_i64"), Expression::i64(3), Expression::i64(4)],
    );
    assert_eq!(run_in(&mut pipeline, &sum), Value::I64(7));

    let product = Expression::apply(
        apply2,
        vec![prim("mul_i64"), Expression::i64(3), Expression::i64(4)],
    );
    assert_eq!(run_in(&mut pipeline, &product), Value::I64(12));
}

#[test]
fn test_primitive_toplevel_is_function_pointer() {
    let value = run(&prim("add_i64"));
    match value {
        Value::Fn(addr) => assert!(!addr.is_null()),
        other => panic!("expected a function pointer, got {other}"),
    }
}

#[test]
fn test_arity_mismatch() {
    let expr = Expression::apply(prim("add_i64"), vec![Expression::i64(1)]);
    assert_eq!(
        codegen_error(&expr),
        CodegenError::ArityMismatch {
            callee: "add_i64".to_string(),
            expected: 2,
            found: 1,
        }
    );
}

#[test]
fn test_argument_type_mismatch() {
    let expr = binary("add_i64", Expression::i64(1), Expression::f64(2.0));
    assert_eq!(
        codegen_error(&expr),
        CodegenError::ArgumentTypeMismatch {
            callee: "add_i64".to_string(),
            index: 1,
            expected: TypeDescr::I64,
            found: TypeDescr::F64,
        }
    );
}

#[test]
fn test_mislabelled_inline_primitive() {
    let mut forged = match prim("add_i64") {
        Expression::Primitive(p) => p,
        _ => unreachable!(),
    };
    forged.ty = FnType::new(vec![TypeDescr::F64, TypeDescr::F64], TypeDescr::F64);
    let expr = Expression::apply(
        Expression::Primitive(forged),
        vec![Expression::f64(1.0), Expression::f64(2.0)],
    );
    assert_eq!(
        codegen_error(&expr),
        CodegenError::UnknownPrimitive {
            name: "add_i64".to_string()
        }
    );
}

#[test]
fn test_deeply_nested_arithmetic() {
    const DEPTH: i64 = 20_000;
    let mut expr = Expression::i64(0);
    for _ in 0..DEPTH {
        expr = binary("add_i64", expr, Expression::i64(1));
    }
    assert_eq!(run(&expr), Value::I64(DEPTH));
    // Dropping a tree this deep recurses.
    std::mem::forget(expr);
}
