//! Entry points and invoke adapters.
//!
//! A top-level expression becomes a parameterless function returning its
//! value. Every entry gets an adapter `<entry>$invoke(ptr argv, ptr ret)`
//! that reads each argument from an 8-byte slot of `argv`, calls the entry,
//! and writes the result, widened to 8 bytes, to `*ret`. The slot encoding
//! is documented on [`crate::native`].

use inkwell::values::{BasicValueEnum, FunctionValue};
use tracing::instrument;

use kiln_expr::{Expression, FnType, TypeDescr};

use super::Operand;
use crate::activation::{ActivationRecord, EnvStack};
use crate::builder::Builder;
use crate::error::CodegenError;

impl<'ll> Builder<'_, 'll, '_> {
    /// Wrap `expr` in a fresh parameterless function named `name`.
    #[instrument(skip(self, expr, env), level = "debug")]
    pub(crate) fn compile_toplevel(
        &self,
        name: &str,
        expr: &Expression,
        env: &mut EnvStack<'ll>,
    ) -> Result<(FunctionValue<'ll>, FnType), CodegenError> {
        let signature = FnType::new(Vec::new(), expr.ty());
        let function = self.cx().declare_fn(name, &signature);
        self.position_at_end(self.append_block(function, "entry"));

        env.push(ActivationRecord::new(name));
        let result = self.compile_expr(expr, env);
        env.pop();

        let value = self.coerce_return(name, &result?, &signature.ret)?;
        self.ret(value);
        Ok((function, signature))
    }

    /// Emit the uniform-signature adapter for `entry`.
    pub(crate) fn emit_invoke_adapter(
        &self,
        entry: FunctionValue<'ll>,
        signature: &FnType,
        name: &str,
    ) -> FunctionValue<'ll> {
        let cx = self.cx();
        let ptr_ty = cx.type_ptr();
        let adapter_ty = cx
            .llcx()
            .void_type()
            .fn_type(&[ptr_ty.into(), ptr_ty.into()], false);
        let adapter = cx.llmod().add_function(name, adapter_ty, None);
        self.position_at_end(self.append_block(adapter, "entry"));

        let argv = adapter
            .get_nth_param(0)
            .expect("adapter has argv")
            .into_pointer_value();
        let ret = adapter
            .get_nth_param(1)
            .expect("adapter has ret")
            .into_pointer_value();
        argv.set_name("argv");
        ret.set_name("ret");

        let args: Vec<BasicValueEnum<'ll>> = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let slot = self.slot_ptr(argv, i as u64, &format!("arg{i}.slot"));
                self.load_slot(slot, ty, &format!("arg{i}"))
            })
            .collect();

        let result = self.call(entry, &args, "result").expect("non-void entry");
        let widened = match signature.ret.as_ref() {
            TypeDescr::Bool | TypeDescr::I32 => {
                self.coerce_to(&Operand::new(result, (*signature.ret).clone()), &TypeDescr::I64)
            }
            TypeDescr::I64 | TypeDescr::F64 | TypeDescr::Function(_) => result,
        };
        self.store(widened, ret);
        self.ret_void();
        adapter
    }

    /// Read one argument of type `ty` from its slot.
    fn load_slot(
        &self,
        slot: inkwell::values::PointerValue<'ll>,
        ty: &TypeDescr,
        name: &str,
    ) -> BasicValueEnum<'ll> {
        let cx = self.cx();
        match ty {
            TypeDescr::Bool | TypeDescr::I32 => {
                let raw = self.load(cx.type_i64().into(), slot, name).into_int_value();
                let narrow = if *ty == TypeDescr::Bool {
                    cx.type_i1()
                } else {
                    cx.type_i32()
                };
                self.int_narrow(raw, narrow).into()
            }
            TypeDescr::I64 => self.load(cx.type_i64().into(), slot, name),
            TypeDescr::F64 => self.load(cx.type_f64().into(), slot, name),
            TypeDescr::Function(_) => self.load(cx.type_ptr().into(), slot, name),
        }
    }
}
