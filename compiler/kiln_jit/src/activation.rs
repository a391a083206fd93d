//! Activation Records
//!
//! One [`ActivationRecord`] per function body being emitted, mapping each
//! parameter name to the entry-block stack slot holding its value. Records
//! stack up while a lambda body is emitted in the middle of another one; only
//! the top record is ever consulted.

use inkwell::types::BasicTypeEnum;
use inkwell::values::PointerValue;
use rustc_hash::FxHashMap;

use kiln_expr::TypeDescr;

/// A stack slot: the alloca, the LLVM type stored in it, and the source type
/// of the bound variable.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSlot<'ll> {
    pub ptr: PointerValue<'ll>,
    pub ty: BasicTypeEnum<'ll>,
    pub descr: TypeDescr,
}

/// Variable bindings of one function body.
#[derive(Debug, Clone, Default)]
pub struct ActivationRecord<'ll> {
    function: String,
    slots: FxHashMap<String, StackSlot<'ll>>,
}

impl<'ll> ActivationRecord<'ll> {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            slots: FxHashMap::default(),
        }
    }

    /// Name of the function this record belongs to.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Bind `name` to `slot`, returning the previous binding.
    ///
    /// A later parameter with the same name shadows the earlier one.
    pub fn bind(&mut self, name: impl Into<String>, slot: StackSlot<'ll>) -> Option<StackSlot<'ll>> {
        self.slots.insert(name.into(), slot)
    }

    pub fn lookup(&self, name: &str) -> Option<StackSlot<'ll>> {
        self.slots.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Stack of activation records for the unit being emitted.
#[derive(Debug, Default)]
pub struct EnvStack<'ll> {
    records: Vec<ActivationRecord<'ll>>,
}

impl<'ll> EnvStack<'ll> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ActivationRecord<'ll>) {
        self.records.push(record);
    }

    pub fn pop(&mut self) -> Option<ActivationRecord<'ll>> {
        self.records.pop()
    }

    pub fn top(&self) -> Option<&ActivationRecord<'ll>> {
        self.records.last()
    }

    /// Resolve `name` in the innermost record only.
    pub fn lookup(&self, name: &str) -> Option<StackSlot<'ll>> {
        self.top().and_then(|record| record.lookup(name))
    }

    /// Whether a record for `function` is anywhere on the stack.
    pub fn is_active(&self, function: &str) -> bool {
        self.records.iter().any(|record| record.function == function)
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;
    use pretty_assertions::assert_eq;

    fn slot<'ll>(
        builder: &inkwell::builder::Builder<'ll>,
        ty: BasicTypeEnum<'ll>,
        descr: TypeDescr,
        name: &str,
    ) -> StackSlot<'ll> {
        StackSlot {
            ptr: builder.build_alloca(ty, name).unwrap(),
            ty,
            descr,
        }
    }

    #[test]
    fn lookup_only_sees_top_record() {
        let context = Context::create();
        let module = context.create_module("activation");
        let i64_ty = context.i64_type();
        let f = module.add_function("f", i64_ty.fn_type(&[], false), None);
        let builder = context.create_builder();
        builder.position_at_end(context.append_basic_block(f, "entry"));

        let mut env = EnvStack::new();
        let mut outer = ActivationRecord::new("outer");
        outer.bind("x", slot(&builder, i64_ty.into(), TypeDescr::I64, "x"));
        env.push(outer);
        assert!(env.lookup("x").is_some());

        let mut inner = ActivationRecord::new("inner");
        inner.bind("y", slot(&builder, i64_ty.into(), TypeDescr::I64, "y"));
        env.push(inner);

        assert_eq!(env.depth(), 2);
        assert!(env.is_active("outer"));
        assert!(env.lookup("y").is_some());
        assert!(env.lookup("x").is_none());

        let popped = env.pop().unwrap();
        assert_eq!(popped.function(), "inner");
        assert!(env.lookup("x").is_some());
        assert!(env.lookup("y").is_none());
    }

    #[test]
    fn rebinding_shadows() {
        let context = Context::create();
        let module = context.create_module("activation");
        let i64_ty = context.i64_type();
        let f = module.add_function("f", i64_ty.fn_type(&[], false), None);
        let builder = context.create_builder();
        builder.position_at_end(context.append_basic_block(f, "entry"));

        let mut record = ActivationRecord::new("f");
        let first = slot(&builder, i64_ty.into(), TypeDescr::I64, "a");
        let second = slot(&builder, context.f64_type().into(), TypeDescr::F64, "a");
        assert!(record.bind("a", first.clone()).is_none());
        assert_eq!(record.bind("a", second.clone()), Some(first));
        assert_eq!(record.lookup("a"), Some(second));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn empty_stack_resolves_nothing() {
        let env = EnvStack::new();
        assert!(env.is_empty());
        assert!(env.lookup("anything").is_none());
        assert!(!env.is_active("anything"));
    }
}
