//! Expression Lowering
//!
//! Turns one top-level [`Expression`] into one compilation unit:
//!
//! 1. [`find_lambdas`] collects every lambda reachable from the expression,
//!    including lambdas of global entries it refers to.
//! 2. Every lambda is declared, then every lambda defined in this unit gets
//!    its body, each in a fresh activation record.
//! 3. The expression itself becomes `__toplevel_<n>`, unless it is a lambda,
//!    whose own function is then the entry.
//! 4. An invoke adapter is emitted for the entry and the unit is verified.
//!
//! Node kinds are lowered by `impl Builder` blocks, one file per kind.

mod invoke;
mod lower_calls;
mod lower_constants;
mod lower_control_flow;
mod lower_lambdas;
mod lower_primitives;
mod lower_variables;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::BasicValueEnum;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument};

use kiln_expr::{Expression, FnType, GlobalEnv, Lambda, TypeDescr};
use kiln_stack::ensure_sufficient_stack;

use crate::activation::EnvStack;
use crate::builder::Builder;
use crate::context::{CodegenCx, FnOrigin};
use crate::error::CodegenError;
use crate::native::INVOKE_SUFFIX;

pub use lower_lambdas::find_lambdas;

/// A lowered value together with its source-level type.
#[derive(Debug, Clone)]
pub struct Operand<'ll> {
    pub value: BasicValueEnum<'ll>,
    pub ty: TypeDescr,
}

impl<'ll> Operand<'ll> {
    pub fn new(value: impl Into<BasicValueEnum<'ll>>, ty: TypeDescr) -> Self {
        Self {
            value: value.into(),
            ty,
        }
    }
}

/// What earlier units of the same pipeline already define.
#[derive(Clone, Copy)]
pub struct PriorUnits<'p> {
    /// Lambdas by name.
    pub lambdas: &'p FxHashMap<String, Lambda>,
    /// Invoke adapters by IR name.
    pub adapters: &'p FxHashSet<String>,
}

/// A verified, not yet optimized unit.
pub struct LoweredUnit<'ll> {
    pub module: Module<'ll>,
    /// IR name of the entry function.
    pub entry: String,
    /// IR name of the entry's invoke adapter.
    pub adapter: String,
    pub signature: FnType,
    /// Whether the adapter is defined in this unit.
    pub emits_adapter: bool,
    /// Lambdas whose bodies this unit defines.
    pub lambdas: Vec<Lambda>,
    /// Source-level functions this unit defines, entry last.
    pub functions: Vec<String>,
}

/// Module name of the `index`-th unit.
pub fn unit_name(index: u64) -> String {
    format!("kiln_unit_{index}")
}

const TOPLEVEL_PREFIX: &str = "__toplevel_";
const PRIM_WRAPPER_PREFIX: &str = "__prim.";

/// Name of the synthetic entry wrapping the `index`-th top-level expression.
pub fn toplevel_name(index: u64) -> String {
    format!("{TOPLEVEL_PREFIX}{index}")
}

/// Whether `name` belongs to the functions lowering generates: entries,
/// primitive wrappers, and invoke adapters.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(TOPLEVEL_PREFIX)
        || name.starts_with(PRIM_WRAPPER_PREFIX)
        || name.ends_with(INVOKE_SUFFIX)
}

/// Lower `expr` into a fresh unit.
#[instrument(level = "debug", skip(llcx, globals, prior, expr), fields(kind = expr.kind_name()))]
pub fn lower_toplevel<'ll>(
    llcx: &'ll Context,
    globals: &GlobalEnv,
    prior: PriorUnits<'_>,
    index: u64,
    expr: &Expression,
) -> Result<LoweredUnit<'ll>, CodegenError> {
    let module_name = unit_name(index);
    let cx = CodegenCx::new(llcx, &module_name, globals);

    let (entry, signature, lambdas) = {
        let builder = Builder::new(&cx);
        let mut env = EnvStack::new();

        let found = find_lambdas(expr, globals)?;
        let mut local = Vec::new();
        for lambda in found {
            let declared = cx.declare_lambda(lambda, prior.lambdas)?;
            if declared.origin == FnOrigin::Local {
                local.push((lambda, declared.value));
            }
        }
        debug!(local = local.len(), "lambdas declared");

        for (lambda, function) in &local {
            builder.define_lambda(lambda, *function, &mut env)?;
        }

        let (entry, signature) = match expr {
            Expression::Lambda(lambda) => {
                let declared =
                    cx.get_function(&lambda.name)
                        .ok_or_else(|| CodegenError::UnresolvedVariable {
                            name: lambda.name.clone(),
                        })?;
                (declared.value, declared.ty)
            }
            _ => builder.compile_toplevel(&toplevel_name(index), expr, &mut env)?,
        };
        let lambdas: Vec<Lambda> = local.into_iter().map(|(l, _)| l.clone()).collect();
        (entry, signature, lambdas)
    };

    let entry_name = entry.get_name().to_string_lossy().into_owned();
    let adapter = format!("{entry_name}{INVOKE_SUFFIX}");
    let emits_adapter = !prior.adapters.contains(&adapter);
    if emits_adapter {
        Builder::new(&cx).emit_invoke_adapter(entry, &signature, &adapter);
    }

    cx.llmod()
        .verify()
        .map_err(|message| CodegenError::InvalidFunction {
            name: module_name.clone(),
            message: message.to_string(),
        })?;

    let mut functions: Vec<String> = lambdas.iter().map(|l| l.name.clone()).collect();
    if !entry.as_global_value().is_declaration() && !functions.contains(&entry_name) {
        functions.push(entry_name.clone());
    }

    debug!(unit = %module_name, entry = %entry_name, "unit lowered");
    Ok(LoweredUnit {
        module: cx.into_module(),
        entry: entry_name,
        adapter,
        signature,
        emits_adapter,
        lambdas,
        functions,
    })
}

impl<'ll> Builder<'_, 'll, '_> {
    /// Lower one node at the current insertion point.
    pub fn compile_expr(
        &self,
        expr: &Expression,
        env: &mut EnvStack<'ll>,
    ) -> Result<Operand<'ll>, CodegenError> {
        ensure_sufficient_stack(|| match expr {
            Expression::Constant(constant) => self.compile_constant(constant),
            Expression::Primitive(prim) => self.compile_primitive_value(prim),
            Expression::Apply(apply) => self.compile_apply(apply, env),
            Expression::Lambda(lambda) => self.compile_lambda_ref(lambda),
            Expression::Variable(var) => self.compile_variable(var, env),
            Expression::IfExpr(if_expr) => self.compile_if(if_expr, env),
        })
    }
}
