use kiln_expr::{Expression, Param, TypeDescr};
use pretty_assertions::assert_eq;

use super::helper::{binary, codegen_error, pipeline, prim, run, run_in, var_i64};
use crate::error::CodegenError;
use crate::native::Value;

fn if_bool(cond: bool, then_branch: Expression, else_branch: Expression) -> Expression {
    Expression::if_expr(Expression::bool(cond), then_branch, else_branch)
}

#[test]
fn test_if_selects_arm() {
    let mut pipeline = pipeline();
    let taken = if_bool(true, Expression::i64(1), Expression::i64(2));
    let skipped = if_bool(false, Expression::i64(1), Expression::i64(2));
    assert_eq!(run_in(&mut pipeline, &taken), Value::I64(1));
    assert_eq!(run_in(&mut pipeline, &skipped), Value::I64(2));
}

#[test]
fn test_integer_arms_widen() {
    let expr = if_bool(false, Expression::i32(-5), Expression::i64(7));
    assert_eq!(expr.ty(), TypeDescr::I64);
    assert_eq!(run(&expr), Value::I64(7));

    let expr = if_bool(true, Expression::i32(-5), Expression::i64(7));
    assert_eq!(run(&expr), Value::I64(-5));
}

#[test]
fn test_integer_and_float_arms() {
    let expr = if_bool(true, Expression::i64(3), Expression::f64(0.5));
    assert_eq!(run(&expr), Value::F64(3.0));
}

#[test]
fn test_bool_arm_zero_extends() {
    let expr = if_bool(true, Expression::bool(true), Expression::i64(-1));
    assert_eq!(run(&expr), Value::I64(1));
}

#[test]
fn test_nested_conditionals() {
    // (lambda sign (x) (if (lt_i64 x 0) -1 (if (eq_i64 x 0) 0i32 1)))
    let sign = Expression::lambda(
        "sign",
        vec![Param::new("x", TypeDescr::I64)],
        TypeDescr::I64,
        Expression::if_expr(
            binary("lt_i64", var_i64("x"), Expression::i64(0)),
            Expression::i64(-1),
            Expression::if_expr(
                binary("eq_i64", var_i64("x"), Expression::i64(0)),
                Expression::i32(0),
                Expression::i64(1),
            ),
        ),
    );
    let mut pipeline = pipeline();
    for (arg, expected) in [(-9, -1), (0, 0), (12, 1)] {
        let expr = Expression::apply(sign.clone(), vec![Expression::i64(arg)]);
        assert_eq!(run_in(&mut pipeline, &expr), Value::I64(expected), "sign({arg})");
    }
}

#[test]
fn test_condition_must_be_bool() {
    let expr = Expression::if_expr(Expression::i64(1), Expression::i64(1), Expression::i64(2));
    assert_eq!(
        codegen_error(&expr),
        CodegenError::ConditionNotBool {
            found: TypeDescr::I64
        }
    );
}

#[test]
fn test_incompatible_arms() {
    let expr = if_bool(true, Expression::f64(1.0), prim("add_f64"));
    assert_eq!(
        codegen_error(&expr),
        CodegenError::BranchTypeMismatch {
            then_ty: TypeDescr::F64,
            else_ty: TypeDescr::function(vec![TypeDescr::F64, TypeDescr::F64], TypeDescr::F64),
        }
    );
}
