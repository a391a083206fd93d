//! Primitive operator lowering.
//!
//! Inline operators are emitted directly at the call site. Used as values,
//! they get a private wrapper function `__prim.<name>` (one per unit) whose
//! address is the value. Native primitives are external declarations
//! resolved from the host process.

use inkwell::module::Linkage;
use inkwell::values::{BasicValueEnum, FunctionValue};
use inkwell::{FloatPredicate, IntPredicate};
use tracing::trace;

use kiln_expr::{CmpOp, NumKind, PrimKind, PrimOp, Primitive, TypeDescr};

use super::Operand;
use crate::builder::Builder;
use crate::error::CodegenError;

/// How a primitive node is realised.
pub(crate) enum PrimTarget<'p> {
    Inline(PrimOp),
    Native { symbol: &'p str },
}

/// Check a primitive node against the catalog.
///
/// An inline primitive must carry its operator's own name and signature;
/// native primitives may name any process symbol.
pub(crate) fn resolve_primitive(prim: &Primitive) -> Result<PrimTarget<'_>, CodegenError> {
    match &prim.kind {
        PrimKind::Inline(op) if op.name() == prim.name && op.signature() == prim.ty => {
            Ok(PrimTarget::Inline(*op))
        }
        PrimKind::Inline(_) => Err(CodegenError::UnknownPrimitive {
            name: prim.name.clone(),
        }),
        PrimKind::Native { symbol } => Ok(PrimTarget::Native { symbol }),
    }
}

fn int_predicate(op: CmpOp) -> IntPredicate {
    match op {
        CmpOp::Eq => IntPredicate::EQ,
        CmpOp::Ne => IntPredicate::NE,
        CmpOp::Lt => IntPredicate::SLT,
        CmpOp::Le => IntPredicate::SLE,
        CmpOp::Gt => IntPredicate::SGT,
        CmpOp::Ge => IntPredicate::SGE,
    }
}

/// Ordered predicates, except `Ne` which holds for NaN operands.
fn float_predicate(op: CmpOp) -> FloatPredicate {
    match op {
        CmpOp::Eq => FloatPredicate::OEQ,
        CmpOp::Ne => FloatPredicate::UNE,
        CmpOp::Lt => FloatPredicate::OLT,
        CmpOp::Le => FloatPredicate::OLE,
        CmpOp::Gt => FloatPredicate::OGT,
        CmpOp::Ge => FloatPredicate::OGE,
    }
}

impl<'ll> Builder<'_, 'll, '_> {
    /// Emit `op` over already type-checked operands.
    pub(crate) fn emit_prim_op(
        &self,
        op: PrimOp,
        args: &[BasicValueEnum<'ll>],
    ) -> BasicValueEnum<'ll> {
        trace!(op = %op.name(), "emit primitive");
        match op {
            PrimOp::Arith(arith, NumKind::F64) => self
                .float_arith(arith, args[0].into_float_value(), args[1].into_float_value())
                .into(),
            PrimOp::Arith(arith, NumKind::I32 | NumKind::I64) => self
                .int_arith(arith, args[0].into_int_value(), args[1].into_int_value())
                .into(),
            PrimOp::Compare(cmp, NumKind::F64) => self
                .float_compare(
                    float_predicate(cmp),
                    args[0].into_float_value(),
                    args[1].into_float_value(),
                )
                .into(),
            PrimOp::Compare(cmp, NumKind::I32 | NumKind::I64) => self
                .int_compare(
                    int_predicate(cmp),
                    args[0].into_int_value(),
                    args[1].into_int_value(),
                )
                .into(),
            PrimOp::Logic(logic) => self
                .logic(logic, args[0].into_int_value(), args[1].into_int_value())
                .into(),
            PrimOp::Not => self.not(args[0].into_int_value()).into(),
            PrimOp::Neg(NumKind::F64) => self.float_neg(args[0].into_float_value()).into(),
            PrimOp::Neg(NumKind::I32 | NumKind::I64) => {
                self.int_neg(args[0].into_int_value()).into()
            }
        }
    }

    /// A primitive in value position: the address of a callable function.
    pub(crate) fn compile_primitive_value(
        &self,
        prim: &Primitive,
    ) -> Result<Operand<'ll>, CodegenError> {
        let function = match resolve_primitive(prim)? {
            PrimTarget::Inline(op) => self.prim_wrapper(op),
            PrimTarget::Native { symbol } => self.cx().declare_native(symbol, &prim.ty)?,
        };
        Ok(Operand::new(
            function.as_global_value().as_pointer_value(),
            TypeDescr::Function(prim.ty.clone()),
        ))
    }

    /// The unit's private wrapper for `op`, emitted on first use.
    fn prim_wrapper(&self, op: PrimOp) -> FunctionValue<'ll> {
        let cx = self.cx();
        if let Some(function) = cx.prim_wrapper(op) {
            return function;
        }

        let name = format!("{}{}", super::PRIM_WRAPPER_PREFIX, op.name());
        let function = cx.llmod().add_function(
            &name,
            cx.llvm_fn_type(&op.signature()),
            Some(Linkage::Private),
        );
        cx.register_prim_wrapper(op, function);

        let _guard = self.save_position();
        self.position_at_end(self.append_block(function, "entry"));
        let params: Vec<BasicValueEnum<'ll>> = function.get_param_iter().collect();
        let result = self.emit_prim_op(op, &params);
        self.ret(result);

        function
    }
}
