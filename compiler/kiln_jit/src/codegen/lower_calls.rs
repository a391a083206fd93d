//! Function application.
//!
//! The callee is lowered first, then the arguments left to right. Inline
//! primitives are emitted in place; lambdas and functions declared in the
//! unit are called directly; anything else function-typed is called through
//! its pointer.

use inkwell::values::BasicValueEnum;
use tracing::trace;

use kiln_expr::{Apply, Expression, FnType, TypeDescr};

use super::lower_primitives::{resolve_primitive, PrimTarget};
use super::Operand;
use crate::activation::EnvStack;
use crate::builder::Builder;
use crate::context::DeclaredFn;
use crate::error::CodegenError;

/// Name used for a callee in diagnostics.
fn callee_label(callee: &Expression) -> String {
    match callee {
        Expression::Primitive(prim) => prim.name.clone(),
        Expression::Lambda(lambda) => lambda.name.clone(),
        Expression::Variable(var) => var.name.clone(),
        other => other.kind_name().to_string(),
    }
}

impl<'ll> Builder<'_, 'll, '_> {
    pub(crate) fn compile_apply(
        &self,
        apply: &Apply,
        env: &mut EnvStack<'ll>,
    ) -> Result<Operand<'ll>, CodegenError> {
        let label = callee_label(&apply.callee);

        if let Expression::Primitive(prim) = apply.callee.as_ref() {
            return match resolve_primitive(prim)? {
                PrimTarget::Inline(op) => {
                    let signature = op.signature();
                    let args = self.compile_args(&label, &signature, &apply.args, env)?;
                    Ok(Operand::new(self.emit_prim_op(op, &args), *signature.ret))
                }
                PrimTarget::Native { symbol } => {
                    let function = self.cx().declare_native(symbol, &prim.ty)?;
                    let args = self.compile_args(&label, &prim.ty, &apply.args, env)?;
                    let result = self.call(function, &args, "native").expect("non-void callee");
                    Ok(Operand::new(result, (*prim.ty.ret).clone()))
                }
            };
        }

        if let Some(declared) = self.direct_callee(&apply.callee, env)? {
            trace!(callee = %label, "direct call");
            let args = self.compile_args(&label, &declared.ty, &apply.args, env)?;
            let result = self
                .call(declared.value, &args, "call")
                .expect("non-void callee");
            return Ok(Operand::new(result, *declared.ty.ret));
        }

        let callee = self.compile_expr(&apply.callee, env)?;
        let TypeDescr::Function(fn_ty) = callee.ty else {
            return Err(CodegenError::NotCallable {
                callee: label,
                ty: callee.ty,
            });
        };
        trace!(callee = %label, "indirect call");
        let args = self.compile_args(&label, &fn_ty, &apply.args, env)?;
        let result = self
            .call_indirect(
                self.cx().llvm_fn_type(&fn_ty),
                callee.value.into_pointer_value(),
                &args,
                "call",
            )
            .expect("non-void callee");
        Ok(Operand::new(result, *fn_ty.ret))
    }

    /// The declared function a callee names, if it can be called directly.
    ///
    /// A variable bound in the current activation record holds a pointer and
    /// is never a direct callee.
    fn direct_callee(
        &self,
        callee: &Expression,
        env: &EnvStack<'ll>,
    ) -> Result<Option<DeclaredFn<'ll>>, CodegenError> {
        match callee {
            Expression::Lambda(lambda) => Ok(self.cx().get_function(&lambda.name)),
            Expression::Variable(var) if env.lookup(&var.name).is_none() => {
                let Some(declared) = self.cx().get_function(&var.name) else {
                    return Ok(None);
                };
                let found = TypeDescr::Function(declared.ty.clone());
                if var.ty != found {
                    return Err(CodegenError::VariableTypeMismatch {
                        name: var.name.clone(),
                        declared: var.ty.clone(),
                        found,
                    });
                }
                Ok(Some(declared))
            }
            _ => Ok(None),
        }
    }

    /// Lower arguments left to right, checking them against `signature`.
    fn compile_args(
        &self,
        callee: &str,
        signature: &FnType,
        args: &[Expression],
        env: &mut EnvStack<'ll>,
    ) -> Result<Vec<BasicValueEnum<'ll>>, CodegenError> {
        if args.len() != signature.arity() {
            return Err(CodegenError::ArityMismatch {
                callee: callee.to_string(),
                expected: signature.arity(),
                found: args.len(),
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for (index, (arg, expected)) in args.iter().zip(&signature.params).enumerate() {
            let operand = self.compile_expr(arg, env)?;
            if operand.ty != *expected {
                return Err(CodegenError::ArgumentTypeMismatch {
                    callee: callee.to_string(),
                    index,
                    expected: expected.clone(),
                    found: operand.ty,
                });
            }
            values.push(operand.value);
        }
        Ok(values)
    }
}
