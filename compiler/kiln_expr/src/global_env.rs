//! Global Environment
//!
//! Top-level named definitions visible to every expression. Populated
//! before codegen; the JIT consults it when a variable is not bound in the
//! function whose body is being emitted.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::expr::{Expression, Lambda};

#[derive(Clone, Debug, Default)]
pub struct GlobalEnv {
    entries: FxHashMap<String, Arc<Expression>>,
}

impl GlobalEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any previous binding.
    ///
    /// Returns the previous binding, if any.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        expr: impl Into<Arc<Expression>>,
    ) -> Option<Arc<Expression>> {
        self.entries.insert(name.into(), expr.into())
    }

    /// Bind a lambda under its own name.
    pub fn define_lambda(&mut self, lambda: Lambda) -> Option<Arc<Expression>> {
        let name = lambda.name.clone();
        self.define(name, Expression::Lambda(lambda))
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<Expression>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound names in sorted order.
    #[cfg(test)]
    pub(crate) fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Param;
    use crate::types::TypeDescr;
    use pretty_assertions::assert_eq;

    #[test]
    fn define_and_lookup() {
        let mut env = GlobalEnv::new();
        assert!(env.is_empty());
        assert!(env.define("answer", Expression::i64(42)).is_none());
        assert_eq!(
            env.lookup("answer").map(|e| e.as_ref().clone()),
            Some(Expression::i64(42))
        );
        assert!(env.lookup("question").is_none());
    }

    #[test]
    fn redefinition_returns_previous() {
        let mut env = GlobalEnv::new();
        env.define("x", Expression::i64(1));
        let previous = env.define("x", Expression::i64(2));
        assert_eq!(previous.map(|e| e.as_ref().clone()), Some(Expression::i64(1)));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn define_lambda_uses_lambda_name() {
        let mut env = GlobalEnv::new();
        let Expression::Lambda(id) = Expression::lambda(
            "id",
            vec![Param::new("x", TypeDescr::I64)],
            TypeDescr::I64,
            Expression::var("x", TypeDescr::I64),
        ) else {
            unreachable!()
        };
        env.define_lambda(id);
        env.define("zero", Expression::i64(0));
        assert!(env.contains("id"));
        assert_eq!(env.names(), vec!["id", "zero"]);
    }
}
