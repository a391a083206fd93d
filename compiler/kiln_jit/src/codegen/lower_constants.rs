//! Constant lowering.

use kiln_expr::{Constant, Literal, TypeDescr};

use super::Operand;
use crate::builder::Builder;
use crate::error::CodegenError;

/// Largest magnitude below which every integer has an exact `f64`.
const F64_EXACT_INT: i64 = 1 << 53;

impl<'ll> Builder<'_, 'll, '_> {
    /// Emit a constant as an immediate of its declared type.
    ///
    /// Booleans widen to either integer type. Integers become `Bool` only
    /// as 0 or 1, and `F64` only when exactly representable.
    pub(crate) fn compile_constant(
        &self,
        constant: &Constant,
    ) -> Result<Operand<'ll>, CodegenError> {
        let cx = self.cx();
        let ty = constant.ty.clone();
        let operand = match (&constant.value, &constant.ty) {
            (Literal::Bool(b), TypeDescr::Bool) => {
                Operand::new(cx.type_i1().const_int(u64::from(*b), false), ty)
            }
            (Literal::Bool(b), TypeDescr::I32) => {
                Operand::new(cx.type_i32().const_int(u64::from(*b), false), ty)
            }
            (Literal::Bool(b), TypeDescr::I64) => {
                Operand::new(cx.type_i64().const_int(u64::from(*b), false), ty)
            }
            (Literal::Int(n @ (0 | 1)), TypeDescr::Bool) => {
                Operand::new(cx.type_i1().const_int(*n as u64, false), ty)
            }
            (Literal::Int(n), TypeDescr::I32) if i32::try_from(*n).is_ok() => {
                Operand::new(cx.type_i32().const_int(*n as u64, true), ty)
            }
            (Literal::Int(n), TypeDescr::I64) => {
                Operand::new(cx.type_i64().const_int(*n as u64, true), ty)
            }
            (Literal::Int(n), TypeDescr::F64) if (-F64_EXACT_INT..=F64_EXACT_INT).contains(n) => {
                Operand::new(cx.type_f64().const_float(*n as f64), ty)
            }
            (Literal::Float(x), TypeDescr::F64) => Operand::new(cx.type_f64().const_float(*x), ty),
            _ => {
                return Err(CodegenError::UnrepresentableConstant {
                    literal: constant.value.to_string(),
                    ty,
                })
            }
        };
        Ok(operand)
    }
}
