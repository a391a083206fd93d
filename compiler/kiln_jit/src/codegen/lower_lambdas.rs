//! Lambda compilation.
//!
//! Lambdas never capture: a body sees only its own parameters, functions
//! declared in the unit, and globals. Each lambda becomes one IR function
//! named after it, defined once per pipeline. A `Lambda` node in value
//! position evaluates to that function's address.

use inkwell::values::{BasicValueEnum, FunctionValue};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument};

use kiln_expr::{Expression, GlobalEnv, Lambda, TypeDescr};
use kiln_stack::ensure_sufficient_stack;

use super::Operand;
use crate::activation::{ActivationRecord, EnvStack, StackSlot};
use crate::builder::Builder;
use crate::error::CodegenError;

/// Collect every lambda reachable from `expr`, in first-seen order.
///
/// Variables not bound by the enclosing lambda's parameters are followed
/// into the global environment, each global at most once. The same lambda
/// reached twice is listed once; two different lambdas sharing a name are a
/// `DuplicateFunction`.
pub fn find_lambdas<'a>(
    expr: &'a Expression,
    globals: &'a GlobalEnv,
) -> Result<Vec<&'a Lambda>, CodegenError> {
    let mut collector = LambdaCollector {
        globals,
        found: Vec::new(),
        by_name: FxHashMap::default(),
        visited_globals: FxHashSet::default(),
    };
    collector.visit(expr, &[])?;
    Ok(collector.found)
}

struct LambdaCollector<'a> {
    globals: &'a GlobalEnv,
    found: Vec<&'a Lambda>,
    by_name: FxHashMap<&'a str, usize>,
    visited_globals: FxHashSet<&'a str>,
}

impl<'a> LambdaCollector<'a> {
    fn visit(&mut self, expr: &'a Expression, scope: &[&'a str]) -> Result<(), CodegenError> {
        ensure_sufficient_stack(|| match expr {
            Expression::Constant(_) | Expression::Primitive(_) => Ok(()),
            Expression::Apply(apply) => {
                self.visit(&apply.callee, scope)?;
                for arg in &apply.args {
                    self.visit(arg, scope)?;
                }
                Ok(())
            }
            Expression::Lambda(lambda) => {
                if !self.record(lambda)? {
                    return Ok(());
                }
                let params: Vec<&'a str> = lambda.params.iter().map(|p| p.name.as_str()).collect();
                self.visit(&lambda.body, &params)
            }
            Expression::Variable(var) => {
                if scope.contains(&var.name.as_str()) {
                    return Ok(());
                }
                self.visit_global(&var.name)
            }
            Expression::IfExpr(if_expr) => {
                self.visit(&if_expr.cond, scope)?;
                self.visit(&if_expr.then_branch, scope)?;
                self.visit(&if_expr.else_branch, scope)
            }
        })
    }

    fn visit_global(&mut self, name: &'a str) -> Result<(), CodegenError> {
        let globals = self.globals;
        let Some(entry) = globals.lookup(name) else {
            return Ok(());
        };
        if !self.visited_globals.insert(name) {
            return Ok(());
        }
        self.visit(entry, &[])
    }

    /// Returns `false` if this exact lambda was already recorded.
    fn record(&mut self, lambda: &'a Lambda) -> Result<bool, CodegenError> {
        match self.by_name.get(lambda.name.as_str()) {
            Some(&index) if self.found[index] == lambda => Ok(false),
            Some(_) => Err(CodegenError::DuplicateFunction {
                name: lambda.name.clone(),
            }),
            None => {
                self.by_name.insert(&lambda.name, self.found.len());
                self.found.push(lambda);
                Ok(true)
            }
        }
    }
}

impl<'ll> Builder<'_, 'll, '_> {
    /// Emit the body of a declared lambda.
    ///
    /// Every parameter is spilled to an entry-block slot and bound in a
    /// fresh activation record; `mem2reg` promotes the slots again.
    #[instrument(skip(self, lambda, function, env), fields(name = %lambda.name), level = "debug")]
    pub(crate) fn define_lambda(
        &self,
        lambda: &Lambda,
        function: FunctionValue<'ll>,
        env: &mut EnvStack<'ll>,
    ) -> Result<(), CodegenError> {
        let cx = self.cx();
        let entry = self.append_block(function, "entry");
        self.position_at_end(entry);

        let mut record = ActivationRecord::new(lambda.name.as_str());
        for (param, incoming) in lambda.params.iter().zip(function.get_param_iter()) {
            let ty = cx.llvm_type(&param.ty);
            incoming.set_name(&param.name);
            let ptr = self.create_entry_alloca(function, &format!("{}.addr", param.name), ty);
            self.store(incoming, ptr);
            record.bind(
                param.name.as_str(),
                StackSlot {
                    ptr,
                    ty,
                    descr: param.ty.clone(),
                },
            );
        }

        env.push(record);
        let body = self.compile_expr(&lambda.body, env);
        env.pop();

        let value = self.coerce_return(&lambda.name, &body?, &lambda.ret)?;
        self.ret(value);
        debug!(params = lambda.params.len(), "lambda defined");
        Ok(())
    }

    /// A lambda in value position: its function's address.
    pub(crate) fn compile_lambda_ref(&self, lambda: &Lambda) -> Result<Operand<'ll>, CodegenError> {
        let declared = self
            .cx()
            .get_function(&lambda.name)
            .ok_or_else(|| CodegenError::UnresolvedVariable {
                name: lambda.name.clone(),
            })?;
        Ok(Operand::new(
            declared.value.as_global_value().as_pointer_value(),
            TypeDescr::Function(declared.ty),
        ))
    }

    /// Convert a body's value to the declared return type.
    ///
    /// Widening follows conditional-arm unification; anything else is a
    /// mismatch.
    pub(crate) fn coerce_return(
        &self,
        function: &str,
        body: &Operand<'ll>,
        ret: &TypeDescr,
    ) -> Result<BasicValueEnum<'ll>, CodegenError> {
        if body.ty == *ret {
            return Ok(body.value);
        }
        match body.ty.unify(ret) {
            Some(unified) if unified == *ret => Ok(self.coerce_to(body, ret)),
            _ => Err(CodegenError::ReturnTypeMismatch {
                function: function.to_string(),
                expected: ret.clone(),
                found: body.ty.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_expr::Param;
    use pretty_assertions::assert_eq;

    fn lambda(name: &str, body: Expression) -> Expression {
        Expression::lambda(
            name,
            vec![Param::new("x", TypeDescr::I64)],
            TypeDescr::I64,
            body,
        )
    }

    fn names(found: &[&Lambda]) -> Vec<String> {
        found.iter().map(|l| l.name.clone()).collect()
    }

    #[test]
    fn finds_nested_lambdas_in_order() {
        let inner = lambda("inner", Expression::var("x", TypeDescr::I64));
        let outer = lambda(
            "outer",
            Expression::if_expr(Expression::bool(true), Expression::var("x", TypeDescr::I64), {
                Expression::apply(inner, vec![Expression::i64(1)])
            }),
        );
        let globals = GlobalEnv::new();
        let found = find_lambdas(&outer, &globals).unwrap();
        assert_eq!(names(&found), vec!["outer", "inner"]);
    }

    #[test]
    fn follows_globals_once() {
        let mut globals = GlobalEnv::new();
        let fn_ty = TypeDescr::function(vec![TypeDescr::I64], TypeDescr::I64);
        // `even` and `odd` refer to each other through the global environment.
        globals.define(
            "even",
            lambda(
                "even",
                Expression::apply(
                    Expression::var("odd", fn_ty.clone()),
                    vec![Expression::var("x", TypeDescr::I64)],
                ),
            ),
        );
        globals.define(
            "odd",
            lambda(
                "odd",
                Expression::apply(
                    Expression::var("even", fn_ty.clone()),
                    vec![Expression::var("x", TypeDescr::I64)],
                ),
            ),
        );

        let expr = Expression::apply(Expression::var("even", fn_ty), vec![Expression::i64(4)]);
        let found = find_lambdas(&expr, &globals).unwrap();
        assert_eq!(names(&found), vec!["even", "odd"]);
    }

    #[test]
    fn parameters_shadow_globals() {
        let mut globals = GlobalEnv::new();
        globals.define("x", lambda("never", Expression::i64(0)));
        let expr = lambda("uses_param", Expression::var("x", TypeDescr::I64));
        let found = find_lambdas(&expr, &globals).unwrap();
        assert_eq!(names(&found), vec!["uses_param"]);
    }

    #[test]
    fn same_lambda_twice_is_listed_once() {
        let id = lambda("id", Expression::var("x", TypeDescr::I64));
        let expr = Expression::apply(
            id.clone(),
            vec![Expression::apply(id, vec![Expression::i64(1)])],
        );
        let globals = GlobalEnv::new();
        assert_eq!(names(&find_lambdas(&expr, &globals).unwrap()), vec!["id"]);
    }

    #[test]
    fn conflicting_lambdas_are_rejected() {
        let a = lambda("f", Expression::var("x", TypeDescr::I64));
        let b = lambda("f", Expression::i64(0));
        let expr = Expression::apply(a, vec![Expression::apply(b, vec![Expression::i64(1)])]);
        let globals = GlobalEnv::new();
        assert_eq!(
            find_lambdas(&expr, &globals).unwrap_err(),
            CodegenError::DuplicateFunction {
                name: "f".to_string()
            }
        );
    }
}
