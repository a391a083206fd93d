//! Codegen Context
//!
//! - [`IrContext`]: the long-lived LLVM context. Types and constants are
//!   uniqued inside it, so every unit produced by one pipeline shares one
//!   canonical set. Not `Sync`.
//! - [`CodegenCx`]: per-unit state. One module, the name-keyed table of
//!   declared functions, and borrowed read-only views of the global
//!   environment.
//!
//! A `CodegenCx` lives exactly as long as one top-level expression's
//! lowering; the module is serialized and dropped afterwards.

use std::cell::RefCell;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{
    BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FloatType, FunctionType, IntType,
    PointerType,
};
use inkwell::values::FunctionValue;
use inkwell::AddressSpace;
use rustc_hash::FxHashMap;

use kiln_expr::{FnType, GlobalEnv, PrimOp, TypeDescr};

/// Owner of the LLVM context shared by every unit of a pipeline.
pub struct IrContext {
    context: Context,
}

impl IrContext {
    pub fn new() -> Self {
        Self {
            context: Context::create(),
        }
    }

    #[inline]
    pub fn llcx(&self) -> &Context {
        &self.context
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a declared function's body comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnOrigin {
    /// Body is emitted into this unit.
    Local,
    /// Body lives in an earlier unit and is linked by the engine.
    Linked,
    /// Host process function.
    Native,
}

/// Entry in the declared-function table.
#[derive(Clone, Debug)]
pub struct DeclaredFn<'ll> {
    pub value: FunctionValue<'ll>,
    pub ty: FnType,
    pub origin: FnOrigin,
}

/// Per-unit codegen context.
pub struct CodegenCx<'ll, 'tcx> {
    llcx: &'ll Context,
    llmod: Module<'ll>,
    /// Top-level definitions, consulted for unbound variables.
    pub globals: &'tcx GlobalEnv,
    /// Functions declared in this unit, keyed by source name.
    functions: RefCell<FxHashMap<String, DeclaredFn<'ll>>>,
    /// Private wrappers for inline primitives used as values.
    prim_wrappers: RefCell<FxHashMap<PrimOp, FunctionValue<'ll>>>,
}

impl<'ll, 'tcx> CodegenCx<'ll, 'tcx> {
    pub fn new(llcx: &'ll Context, module_name: &str, globals: &'tcx GlobalEnv) -> Self {
        Self {
            llcx,
            llmod: llcx.create_module(module_name),
            globals,
            functions: RefCell::new(FxHashMap::default()),
            prim_wrappers: RefCell::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn llcx(&self) -> &'ll Context {
        self.llcx
    }

    #[inline]
    pub fn llmod(&self) -> &Module<'ll> {
        &self.llmod
    }

    /// Give up the context, keeping only the module.
    pub fn into_module(self) -> Module<'ll> {
        self.llmod
    }

    // -- Function table --

    pub fn register_function(&self, name: &str, declared: DeclaredFn<'ll>) {
        self.functions
            .borrow_mut()
            .insert(name.to_string(), declared);
    }

    pub fn get_function(&self, name: &str) -> Option<DeclaredFn<'ll>> {
        self.functions.borrow().get(name).cloned()
    }

    /// Names of functions whose bodies are emitted into this unit.
    #[cfg(test)]
    pub(crate) fn local_function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .borrow()
            .iter()
            .filter(|(_, f)| f.origin == FnOrigin::Local)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn prim_wrapper(&self, op: PrimOp) -> Option<FunctionValue<'ll>> {
        self.prim_wrappers.borrow().get(&op).copied()
    }

    pub fn register_prim_wrapper(&self, op: PrimOp, func: FunctionValue<'ll>) {
        self.prim_wrappers.borrow_mut().insert(op, func);
    }

    // -- Types --

    #[inline]
    pub fn type_i1(&self) -> IntType<'ll> {
        self.llcx.bool_type()
    }

    #[inline]
    pub fn type_i32(&self) -> IntType<'ll> {
        self.llcx.i32_type()
    }

    #[inline]
    pub fn type_i64(&self) -> IntType<'ll> {
        self.llcx.i64_type()
    }

    #[inline]
    pub fn type_f64(&self) -> FloatType<'ll> {
        self.llcx.f64_type()
    }

    #[inline]
    pub fn type_ptr(&self) -> PointerType<'ll> {
        self.llcx.ptr_type(AddressSpace::default())
    }

    /// Native representation of a type descriptor.
    pub fn llvm_type(&self, ty: &TypeDescr) -> BasicTypeEnum<'ll> {
        match ty {
            TypeDescr::Bool => self.type_i1().into(),
            TypeDescr::I32 => self.type_i32().into(),
            TypeDescr::I64 => self.type_i64().into(),
            TypeDescr::F64 => self.type_f64().into(),
            TypeDescr::Function(_) => self.type_ptr().into(),
        }
    }

    /// LLVM function type for a signature.
    pub fn llvm_fn_type(&self, fn_ty: &FnType) -> FunctionType<'ll> {
        let params: Vec<BasicMetadataTypeEnum<'ll>> = fn_ty
            .params
            .iter()
            .map(|p| self.llvm_type(p).into())
            .collect();
        self.llvm_type(&fn_ty.ret).fn_type(&params, false)
    }
}
