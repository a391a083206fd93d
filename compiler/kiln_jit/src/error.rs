//! Codegen and pipeline errors.

use std::fmt;

use kiln_expr::TypeDescr;

use crate::engine::EngineError;
use crate::passes::OptimizationError;
use crate::target::TargetError;

/// Failure while lowering one expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CodegenError {
    /// Name bound neither in the current function, the unit, nor globally.
    UnresolvedVariable { name: String },
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },
    ArgumentTypeMismatch {
        callee: String,
        index: usize,
        expected: TypeDescr,
        found: TypeDescr,
    },
    NotCallable { callee: String, ty: TypeDescr },
    /// Literal does not fit the type it is declared as.
    UnrepresentableConstant { literal: String, ty: TypeDescr },
    /// Primitive name not in the catalog.
    UnknownPrimitive { name: String },
    /// Two different lambdas share a name.
    DuplicateFunction { name: String },
    /// A lambda is named like a function the pipeline synthesizes.
    ReservedName { name: String },
    BranchTypeMismatch {
        then_ty: TypeDescr,
        else_ty: TypeDescr,
    },
    ConditionNotBool { found: TypeDescr },
    /// A function body does not produce its declared return type.
    ReturnTypeMismatch {
        function: String,
        expected: TypeDescr,
        found: TypeDescr,
    },
    /// A variable reference is annotated with a type other than its binding's.
    VariableTypeMismatch {
        name: String,
        declared: TypeDescr,
        found: TypeDescr,
    },
    /// A global entry refers back to itself through non-function values.
    CyclicGlobal { name: String },
    /// The LLVM verifier rejected the emitted IR.
    InvalidFunction { name: String, message: String },
    /// The target could not stamp the unit.
    Target(TargetError),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedVariable { name } => write!(f, "unresolved variable '{name}'"),
            Self::ArityMismatch {
                callee,
                expected,
                found,
            } => write!(
                f,
                "'{callee}' expects {expected} argument(s), found {found}"
            ),
            Self::ArgumentTypeMismatch {
                callee,
                index,
                expected,
                found,
            } => write!(
                f,
                "argument {index} of '{callee}' has type {found}, expected {expected}"
            ),
            Self::NotCallable { callee, ty } => {
                write!(f, "'{callee}' of type {ty} is not callable")
            }
            Self::UnrepresentableConstant { literal, ty } => {
                write!(f, "constant {literal} is not representable as {ty}")
            }
            Self::UnknownPrimitive { name } => write!(f, "unknown primitive '{name}'"),
            Self::DuplicateFunction { name } => {
                write!(f, "function '{name}' is defined more than once")
            }
            Self::ReservedName { name } => {
                write!(f, "'{name}' is reserved for generated functions")
            }
            Self::BranchTypeMismatch { then_ty, else_ty } => write!(
                f,
                "conditional arms have incompatible types {then_ty} and {else_ty}"
            ),
            Self::ConditionNotBool { found } => {
                write!(f, "condition has type {found}, expected bool")
            }
            Self::ReturnTypeMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "body of '{function}' has type {found}, declared return type is {expected}"
            ),
            Self::VariableTypeMismatch {
                name,
                declared,
                found,
            } => write!(f, "variable '{name}' is annotated {declared} but bound as {found}"),
            Self::CyclicGlobal { name } => {
                write!(f, "global '{name}' depends on its own value")
            }
            Self::InvalidFunction { name, message } => {
                write!(f, "generated IR for '{name}' failed verification: {message}")
            }
            Self::Target(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Target(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TargetError> for CodegenError {
    fn from(e: TargetError) -> Self {
        Self::Target(e)
    }
}

/// Failure of a top-level `codegen_toplevel` request.
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Lowering failed; the unit was discarded.
    Codegen { expr: String, source: CodegenError },
    Optimization(OptimizationError),
    Engine(EngineError),
}

impl PipelineError {
    pub(crate) fn codegen(expr: &kiln_expr::Expression, source: CodegenError) -> Self {
        const MAX_RENDER: usize = 80;
        let mut rendered = expr.to_string();
        if rendered.len() > MAX_RENDER {
            let mut cut = MAX_RENDER;
            while !rendered.is_char_boundary(cut) {
                cut -= 1;
            }
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self::Codegen {
            expr: rendered,
            source,
        }
    }

    /// The codegen error, if this is one.
    pub fn as_codegen(&self) -> Option<&CodegenError> {
        match self {
            Self::Codegen { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codegen { expr, source } => write!(f, "codegen failed for {expr}: {source}"),
            Self::Optimization(e) => write!(f, "{e}"),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codegen { source, .. } => Some(source),
            Self::Optimization(e) => Some(e),
            Self::Engine(e) => Some(e),
        }
    }
}

impl From<OptimizationError> for PipelineError {
    fn from(e: OptimizationError) -> Self {
        Self::Optimization(e)
    }
}

impl From<EngineError> for PipelineError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_expr::Expression;
    use pretty_assertions::assert_eq;

    #[test]
    fn codegen_error_renders_expression() {
        let err = PipelineError::codegen(
            &Expression::var("nope", TypeDescr::I64),
            CodegenError::UnresolvedVariable {
                name: "nope".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "codegen failed for nope: unresolved variable 'nope'"
        );
        assert!(err.as_codegen().is_some());
        assert!(err.as_engine().is_none());
    }

    #[test]
    fn long_expressions_are_truncated() {
        let mut e = Expression::i64(0);
        for _ in 0..40 {
            e = Expression::if_expr(Expression::bool(true), e, Expression::i64(1));
        }
        let PipelineError::Codegen { expr, .. } = PipelineError::codegen(
            &e,
            CodegenError::ConditionNotBool {
                found: TypeDescr::I64,
            },
        ) else {
            unreachable!()
        };
        assert!(expr.ends_with("..."));
        assert_eq!(expr.len(), 83);
    }
}
