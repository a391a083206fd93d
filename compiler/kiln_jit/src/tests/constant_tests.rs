use kiln_expr::{Expression, Literal, TypeDescr};
use pretty_assertions::assert_eq;

use super::helper::{codegen_error, pipeline, run, run_in};
use crate::error::CodegenError;
use crate::native::Value;

#[test]
fn test_constants_round_trip() {
    let mut pipeline = pipeline();
    let cases = [
        (Expression::bool(true), Value::Bool(true)),
        (Expression::bool(false), Value::Bool(false)),
        (Expression::i32(-7), Value::I32(-7)),
        (Expression::i32(i32::MAX), Value::I32(i32::MAX)),
        (Expression::i64(42), Value::I64(42)),
        (Expression::i64(i64::MIN), Value::I64(i64::MIN)),
        (Expression::f64(2.5), Value::F64(2.5)),
        (Expression::f64(-0.125), Value::F64(-0.125)),
    ];
    for (expr, expected) in cases {
        assert_eq!(run_in(&mut pipeline, &expr), expected, "constant {expr}");
    }
}

#[test]
fn test_bool_widens_to_integer() {
    let expr = Expression::constant(Literal::Bool(true), TypeDescr::I64);
    assert_eq!(run(&expr), Value::I64(1));
}

#[test]
fn test_small_int_as_f64() {
    let expr = Expression::constant(Literal::Int(-3), TypeDescr::F64);
    assert_eq!(run(&expr), Value::F64(-3.0));
}

#[test]
fn test_i32_out_of_range() {
    let expr = Expression::constant(Literal::Int(1 << 40), TypeDescr::I32);
    assert_eq!(
        codegen_error(&expr),
        CodegenError::UnrepresentableConstant {
            literal: "1099511627776".to_string(),
            ty: TypeDescr::I32,
        }
    );
}

#[test]
fn test_unrepresentable_literals() {
    let fn_ty = TypeDescr::function(vec![], TypeDescr::I64);
    let cases = [
        Expression::constant(Literal::Float(1.5), TypeDescr::I64),
        Expression::constant(Literal::Bool(true), TypeDescr::F64),
        Expression::constant(Literal::Int(2), TypeDescr::Bool),
        Expression::constant(Literal::Int(0), fn_ty),
    ];
    let mut pipeline = pipeline();
    for expr in cases {
        let err = super::helper::codegen_error_in(&mut pipeline, &expr);
        assert!(
            matches!(err, CodegenError::UnrepresentableConstant { .. }),
            "{expr}: {err}"
        );
    }
    // The failures left nothing behind.
    assert!(pipeline.get_function_names().is_empty());
}
