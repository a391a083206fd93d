//! Instruction Builder
//!
//! [`Builder`] owns the LLVM IR builder for one unit and tracks a single
//! insertion block. Instruction helpers are grouped by what the lowering
//! needs: operator families take the expression model's operator enums
//! directly, conversions take a signedness flag.
//!
//! Node lowering lives in `codegen/*.rs` as further `impl Builder` blocks.

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder as IrBuilder;
use inkwell::types::{BasicTypeEnum, FloatType, FunctionType, IntType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, CallSiteValue, FloatValue,
    FunctionValue, IntValue, PhiValue, PointerValue,
};
use inkwell::{FloatPredicate, IntPredicate};

use kiln_expr::{ArithOp, LogicOp};

use crate::context::CodegenCx;

pub struct Builder<'a, 'll, 'tcx> {
    ir: IrBuilder<'ll>,
    cx: &'a CodegenCx<'ll, 'tcx>,
}

/// Puts the builder back where it was when dropped.
pub struct RestorePosition<'a, 'b, 'll, 'tcx> {
    builder: &'a Builder<'b, 'll, 'tcx>,
    block: Option<BasicBlock<'ll>>,
}

impl Drop for RestorePosition<'_, '_, '_, '_> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            self.builder.position_at_end(block);
        }
    }
}

fn metadata_args<'ll>(args: &[BasicValueEnum<'ll>]) -> Vec<BasicMetadataValueEnum<'ll>> {
    args.iter().map(|&arg| arg.into()).collect()
}

fn call_result(site: CallSiteValue<'_>) -> Option<BasicValueEnum<'_>> {
    site.try_as_basic_value().basic()
}

impl<'a, 'll, 'tcx> Builder<'a, 'll, 'tcx> {
    /// A builder with no insertion block yet.
    pub fn new(cx: &'a CodegenCx<'ll, 'tcx>) -> Self {
        Self {
            ir: cx.llcx().create_builder(),
            cx,
        }
    }

    #[inline]
    pub fn cx(&self) -> &'a CodegenCx<'ll, 'tcx> {
        self.cx
    }

    // -- Position --

    pub fn current_block(&self) -> Option<BasicBlock<'ll>> {
        self.ir.get_insert_block()
    }

    pub fn get_current_function(&self) -> FunctionValue<'ll> {
        self.current_block()
            .and_then(BasicBlock::get_parent)
            .expect("builder is positioned inside a function")
    }

    pub fn position_at_end(&self, block: BasicBlock<'ll>) {
        self.ir.position_at_end(block);
    }

    /// Remember the current block until the returned guard drops.
    ///
    /// Wrapper functions are emitted mid-expression under one of these.
    pub fn save_position(&self) -> RestorePosition<'_, 'a, 'll, 'tcx> {
        RestorePosition {
            builder: self,
            block: self.current_block(),
        }
    }

    pub fn append_block(&self, function: FunctionValue<'ll>, name: &str) -> BasicBlock<'ll> {
        self.cx.llcx().append_basic_block(function, name)
    }

    // -- Control flow --

    pub fn ret(&self, value: BasicValueEnum<'ll>) {
        self.ir.build_return(Some(&value)).expect("ret");
    }

    pub fn ret_void(&self) {
        self.ir.build_return(None).expect("ret void");
    }

    pub fn br(&self, dest: BasicBlock<'ll>) {
        self.ir.build_unconditional_branch(dest).expect("br");
    }

    pub fn cond_br(&self, cond: IntValue<'ll>, then_bb: BasicBlock<'ll>, else_bb: BasicBlock<'ll>) {
        self.ir
            .build_conditional_branch(cond, then_bb, else_bb)
            .expect("br i1");
    }

    /// An empty phi; arms are attached with [`Self::add_incoming`].
    pub fn phi(&self, ty: BasicTypeEnum<'ll>, name: &str) -> PhiValue<'ll> {
        self.ir.build_phi(ty, name).expect("phi")
    }

    pub fn add_incoming(
        &self,
        phi: PhiValue<'ll>,
        incoming: &[(&dyn BasicValue<'ll>, BasicBlock<'ll>)],
    ) {
        phi.add_incoming(incoming);
    }

    // -- Operators --

    /// Signed integer arithmetic; division goes through [`Self::int_division`].
    pub fn int_arith(&self, op: ArithOp, lhs: IntValue<'ll>, rhs: IntValue<'ll>) -> IntValue<'ll> {
        let ir = &self.ir;
        let result = match op {
            ArithOp::Add => ir.build_int_add(lhs, rhs, "add"),
            ArithOp::Sub => ir.build_int_sub(lhs, rhs, "sub"),
            ArithOp::Mul => ir.build_int_mul(lhs, rhs, "mul"),
            ArithOp::Div | ArithOp::Rem => return self.int_division(op, lhs, rhs),
        };
        result.expect("integer arithmetic")
    }

    /// `sdiv`/`srem` that cannot trap.
    ///
    /// A zero divisor yields 0. `MIN / -1` wraps to `MIN` and `MIN % -1` is 0.
    /// Both cases divide by 1 instead, which gives the wrapped quotient and
    /// the zero remainder directly.
    fn int_division(&self, op: ArithOp, lhs: IntValue<'ll>, rhs: IntValue<'ll>) -> IntValue<'ll> {
        let ty = lhs.get_type();
        let zero = ty.const_zero();
        let min = ty.const_int(1 << (ty.get_bit_width() - 1), false);

        let by_zero = self.int_compare(IntPredicate::EQ, rhs, zero);
        let overflows = self.logic(
            LogicOp::And,
            self.int_compare(IntPredicate::EQ, lhs, min),
            self.int_compare(IntPredicate::EQ, rhs, ty.const_all_ones()),
        );
        let divisor = self.int_select(
            self.logic(LogicOp::Or, by_zero, overflows),
            ty.const_int(1, false),
            rhs,
        );

        if matches!(op, ArithOp::Rem) {
            return self
                .ir
                .build_int_signed_rem(lhs, divisor, "srem")
                .expect("srem");
        }
        let quotient = self
            .ir
            .build_int_signed_div(lhs, divisor, "sdiv")
            .expect("sdiv");
        self.int_select(by_zero, zero, quotient)
    }

    pub fn int_select(
        &self,
        cond: IntValue<'ll>,
        then_value: IntValue<'ll>,
        else_value: IntValue<'ll>,
    ) -> IntValue<'ll> {
        self.ir
            .build_select(cond, then_value, else_value, "select")
            .expect("select")
            .into_int_value()
    }

    pub fn float_arith(
        &self,
        op: ArithOp,
        lhs: FloatValue<'ll>,
        rhs: FloatValue<'ll>,
    ) -> FloatValue<'ll> {
        let ir = &self.ir;
        let result = match op {
            ArithOp::Add => ir.build_float_add(lhs, rhs, "fadd"),
            ArithOp::Sub => ir.build_float_sub(lhs, rhs, "fsub"),
            ArithOp::Mul => ir.build_float_mul(lhs, rhs, "fmul"),
            ArithOp::Div => ir.build_float_div(lhs, rhs, "fdiv"),
            ArithOp::Rem => ir.build_float_rem(lhs, rhs, "frem"),
        };
        result.expect("float arithmetic")
    }

    /// Bitwise connectives over `i1`.
    pub fn logic(&self, op: LogicOp, lhs: IntValue<'ll>, rhs: IntValue<'ll>) -> IntValue<'ll> {
        let ir = &self.ir;
        let result = match op {
            LogicOp::And => ir.build_and(lhs, rhs, "and"),
            LogicOp::Or => ir.build_or(lhs, rhs, "or"),
            LogicOp::Xor => ir.build_xor(lhs, rhs, "xor"),
        };
        result.expect("logic")
    }

    pub fn not(&self, value: IntValue<'ll>) -> IntValue<'ll> {
        self.ir.build_not(value, "not").expect("not")
    }

    pub fn int_neg(&self, value: IntValue<'ll>) -> IntValue<'ll> {
        self.ir.build_int_neg(value, "neg").expect("neg")
    }

    pub fn float_neg(&self, value: FloatValue<'ll>) -> FloatValue<'ll> {
        self.ir.build_float_neg(value, "fneg").expect("fneg")
    }

    pub fn int_compare(
        &self,
        pred: IntPredicate,
        lhs: IntValue<'ll>,
        rhs: IntValue<'ll>,
    ) -> IntValue<'ll> {
        self.ir
            .build_int_compare(pred, lhs, rhs, "icmp")
            .expect("icmp")
    }

    pub fn float_compare(
        &self,
        pred: FloatPredicate,
        lhs: FloatValue<'ll>,
        rhs: FloatValue<'ll>,
    ) -> IntValue<'ll> {
        self.ir
            .build_float_compare(pred, lhs, rhs, "fcmp")
            .expect("fcmp")
    }

    // -- Conversions --

    /// Extend to a wider integer; `signed` picks sext over zext.
    pub fn int_widen(&self, value: IntValue<'ll>, ty: IntType<'ll>, signed: bool) -> IntValue<'ll> {
        let result = if signed {
            self.ir.build_int_s_extend(value, ty, "sext")
        } else {
            self.ir.build_int_z_extend(value, ty, "zext")
        };
        result.expect("int widen")
    }

    pub fn int_narrow(&self, value: IntValue<'ll>, ty: IntType<'ll>) -> IntValue<'ll> {
        self.ir
            .build_int_truncate(value, ty, "trunc")
            .expect("trunc")
    }

    pub fn int_to_float(
        &self,
        value: IntValue<'ll>,
        ty: FloatType<'ll>,
        signed: bool,
    ) -> FloatValue<'ll> {
        let result = if signed {
            self.ir.build_signed_int_to_float(value, ty, "sitofp")
        } else {
            self.ir.build_unsigned_int_to_float(value, ty, "uitofp")
        };
        result.expect("int to float")
    }

    // -- Memory --

    pub fn load(
        &self,
        ty: BasicTypeEnum<'ll>,
        ptr: PointerValue<'ll>,
        name: &str,
    ) -> BasicValueEnum<'ll> {
        self.ir.build_load(ty, ptr, name).expect("load")
    }

    pub fn store(&self, value: BasicValueEnum<'ll>, ptr: PointerValue<'ll>) {
        self.ir.build_store(ptr, value).expect("store");
    }

    /// Address of the `index`-th 8-byte slot of an argument vector.
    pub fn slot_ptr(&self, base: PointerValue<'ll>, index: u64, name: &str) -> PointerValue<'ll> {
        let i64_ty = self.cx.type_i64();
        let index = i64_ty.const_int(index, false);
        let gep = unsafe { self.ir.build_in_bounds_gep(i64_ty, base, &[index], name) };
        gep.expect("gep")
    }

    /// A stack slot at the top of `function`'s entry block.
    ///
    /// Keeping every slot there lets `mem2reg` promote it.
    pub fn create_entry_alloca(
        &self,
        function: FunctionValue<'ll>,
        name: &str,
        ty: BasicTypeEnum<'ll>,
    ) -> PointerValue<'ll> {
        let entry = function
            .get_first_basic_block()
            .expect("function body has been started");
        let _restore = self.save_position();
        match entry.get_first_instruction() {
            Some(first) => self.ir.position_before(&first),
            None => self.position_at_end(entry),
        }
        self.ir.build_alloca(ty, name).expect("alloca")
    }

    // -- Calls --

    /// Direct call; `None` for a void callee.
    pub fn call(
        &self,
        callee: FunctionValue<'ll>,
        args: &[BasicValueEnum<'ll>],
        name: &str,
    ) -> Option<BasicValueEnum<'ll>> {
        let site = self
            .ir
            .build_call(callee, &metadata_args(args), name)
            .expect("call");
        call_result(site)
    }

    /// Call through a function pointer of type `fn_type`.
    pub fn call_indirect(
        &self,
        fn_type: FunctionType<'ll>,
        fn_ptr: PointerValue<'ll>,
        args: &[BasicValueEnum<'ll>],
        name: &str,
    ) -> Option<BasicValueEnum<'ll>> {
        let site = self
            .ir
            .build_indirect_call(fn_type, fn_ptr, &metadata_args(args), name)
            .expect("indirect call");
        call_result(site)
    }
}
