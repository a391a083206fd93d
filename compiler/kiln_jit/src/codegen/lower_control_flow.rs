//! Conditional expressions.

use inkwell::values::BasicValueEnum;
use tracing::instrument;

use kiln_expr::{IfExpr, TypeDescr};

use super::Operand;
use crate::activation::EnvStack;
use crate::builder::Builder;
use crate::error::CodegenError;

impl<'ll> Builder<'_, 'll, '_> {
    /// Compile an if/else expression.
    ///
    /// Both arms are lowered before their exits branch to the merge block,
    /// so each value is converted to the unified type in the block that
    /// actually reaches the merge (nested conditionals move it).
    #[instrument(skip(self, if_expr, env), level = "debug")]
    pub(crate) fn compile_if(
        &self,
        if_expr: &IfExpr,
        env: &mut EnvStack<'ll>,
    ) -> Result<Operand<'ll>, CodegenError> {
        let cond = self.compile_expr(&if_expr.cond, env)?;
        if cond.ty != TypeDescr::Bool {
            return Err(CodegenError::ConditionNotBool { found: cond.ty });
        }

        let function = self.get_current_function();
        let then_bb = self.append_block(function, "then");
        let else_bb = self.append_block(function, "else");
        let merge_bb = self.append_block(function, "merge");
        self.cond_br(cond.value.into_int_value(), then_bb, else_bb);

        self.position_at_end(then_bb);
        let then_val = self.compile_expr(&if_expr.then_branch, env)?;
        let then_exit = self.current_block().expect("then arm has a block");

        self.position_at_end(else_bb);
        let else_val = self.compile_expr(&if_expr.else_branch, env)?;
        let else_exit = self.current_block().expect("else arm has a block");

        let ty = then_val
            .ty
            .unify(&else_val.ty)
            .ok_or_else(|| CodegenError::BranchTypeMismatch {
                then_ty: then_val.ty.clone(),
                else_ty: else_val.ty.clone(),
            })?;

        self.position_at_end(then_exit);
        let then_value = self.coerce_to(&then_val, &ty);
        self.br(merge_bb);

        self.position_at_end(else_exit);
        let else_value = self.coerce_to(&else_val, &ty);
        self.br(merge_bb);

        self.position_at_end(merge_bb);
        let phi = self.phi(self.cx().llvm_type(&ty), "if.result");
        self.add_incoming(phi, &[(&then_value, then_exit), (&else_value, else_exit)]);
        Ok(Operand::new(phi.as_basic_value(), ty))
    }

    /// Widen an integer-like operand to `target`.
    ///
    /// Booleans zero-extend, integers sign-extend; both convert to `F64` by
    /// value. Operands already of the target type pass through.
    pub(crate) fn coerce_to(&self, operand: &Operand<'ll>, target: &TypeDescr) -> BasicValueEnum<'ll> {
        if operand.ty == *target {
            return operand.value;
        }
        let cx = self.cx();
        let signed = operand.ty != TypeDescr::Bool;
        match target {
            TypeDescr::I32 | TypeDescr::I64 => {
                let int_ty = if *target == TypeDescr::I32 {
                    cx.type_i32()
                } else {
                    cx.type_i64()
                };
                self.int_widen(operand.value.into_int_value(), int_ty, signed)
                    .into()
            }
            TypeDescr::F64 => {
                self.int_to_float(operand.value.into_int_value(), cx.type_f64(), signed)
                    .into()
            }
            TypeDescr::Bool | TypeDescr::Function(_) => operand.value,
        }
    }
}
