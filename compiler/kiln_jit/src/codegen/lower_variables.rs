//! Variable references.
//!
//! Resolution order: the top activation record, then functions declared in
//! the unit, then the global environment. Outer activation records are never
//! searched.

use tracing::trace;

use kiln_expr::{Expression, TypeDescr, Variable};

use super::Operand;
use crate::activation::{ActivationRecord, EnvStack};
use crate::builder::Builder;
use crate::error::CodegenError;

fn check_annotation(var: &Variable, found: &TypeDescr) -> Result<(), CodegenError> {
    if var.ty == *found {
        Ok(())
    } else {
        Err(CodegenError::VariableTypeMismatch {
            name: var.name.clone(),
            declared: var.ty.clone(),
            found: found.clone(),
        })
    }
}

impl<'ll> Builder<'_, 'll, '_> {
    pub(crate) fn compile_variable(
        &self,
        var: &Variable,
        env: &mut EnvStack<'ll>,
    ) -> Result<Operand<'ll>, CodegenError> {
        if let Some(slot) = env.lookup(&var.name) {
            check_annotation(var, &slot.descr)?;
            let value = self.load(slot.ty, slot.ptr, &var.name);
            return Ok(Operand::new(value, slot.descr));
        }

        if let Some(declared) = self.cx().get_function(&var.name) {
            let ty = TypeDescr::Function(declared.ty);
            check_annotation(var, &ty)?;
            return Ok(Operand::new(
                declared.value.as_global_value().as_pointer_value(),
                ty,
            ));
        }

        if let Some(entry) = self.cx().globals.lookup(&var.name) {
            let operand = self.compile_global(&var.name, entry, env)?;
            check_annotation(var, &operand.ty)?;
            return Ok(operand);
        }

        Err(CodegenError::UnresolvedVariable {
            name: var.name.clone(),
        })
    }

    /// Lower a global entry in place, under an empty activation record so
    /// the current function's parameters stay invisible to it.
    fn compile_global(
        &self,
        name: &str,
        entry: &Expression,
        env: &mut EnvStack<'ll>,
    ) -> Result<Operand<'ll>, CodegenError> {
        let scope = format!("<global {name}>");
        if env.is_active(&scope) {
            return Err(CodegenError::CyclicGlobal {
                name: name.to_string(),
            });
        }
        trace!(global = name, "lowering global in place");

        env.push(ActivationRecord::new(scope));
        let result = self.compile_expr(entry, env);
        env.pop();
        result
    }
}
