//! Expression Nodes
//!
//! The closed set of node kinds the JIT lowers. Trees are built upstream,
//! after type checking, and are never mutated afterwards.

use std::fmt;

use kiln_stack::ensure_sufficient_stack;

use crate::primitive::Primitive;
use crate::types::{FnType, TypeDescr};

/// Literal payload of a [`Constant`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
        }
    }
}

/// A literal together with the type it is materialised as.
///
/// The pair is not validated here: `Constant { value: Int(1 << 40), ty: I32 }`
/// is a well-formed node that the JIT rejects as unrepresentable.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub value: Literal,
    pub ty: TypeDescr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Apply {
    pub callee: Box<Expression>,
    pub args: Vec<Expression>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub ty: TypeDescr,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeDescr) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A named function definition.
///
/// Lambdas are identified by name: the JIT emits one native function per
/// distinct name. Bodies see only their own parameters (no capture).
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDescr,
    pub body: Box<Expression>,
}

impl Lambda {
    pub fn fn_type(&self) -> FnType {
        FnType::new(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.ret.clone(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub ty: TypeDescr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfExpr {
    pub cond: Box<Expression>,
    pub then_branch: Box<Expression>,
    pub else_branch: Box<Expression>,
}

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Constant(Constant),
    Primitive(Primitive),
    Apply(Apply),
    Lambda(Lambda),
    Variable(Variable),
    IfExpr(IfExpr),
}

impl Expression {
    pub fn bool(value: bool) -> Self {
        Self::constant(Literal::Bool(value), TypeDescr::Bool)
    }

    pub fn i32(value: i32) -> Self {
        Self::constant(Literal::Int(i64::from(value)), TypeDescr::I32)
    }

    pub fn i64(value: i64) -> Self {
        Self::constant(Literal::Int(value), TypeDescr::I64)
    }

    pub fn f64(value: f64) -> Self {
        Self::constant(Literal::Float(value), TypeDescr::F64)
    }

    pub fn constant(value: Literal, ty: TypeDescr) -> Self {
        Self::Constant(Constant { value, ty })
    }

    /// Primitive from the built-in catalog, `None` if the name is unknown.
    pub fn primitive(name: &str) -> Option<Self> {
        Primitive::lookup(name).map(Self::Primitive)
    }

    pub fn apply(callee: Expression, args: Vec<Expression>) -> Self {
        Self::Apply(Apply {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn lambda(
        name: impl Into<String>,
        params: Vec<Param>,
        ret: TypeDescr,
        body: Expression,
    ) -> Self {
        Self::Lambda(Lambda {
            name: name.into(),
            params,
            ret,
            body: Box::new(body),
        })
    }

    pub fn var(name: impl Into<String>, ty: TypeDescr) -> Self {
        Self::Variable(Variable {
            name: name.into(),
            ty,
        })
    }

    pub fn if_expr(cond: Expression, then_branch: Expression, else_branch: Expression) -> Self {
        Self::IfExpr(IfExpr {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    /// The type this node reports.
    ///
    /// Ill-typed trees still report something: an `Apply` whose callee is not
    /// a function reports the callee's type, an `IfExpr` whose arms do not
    /// unify reports the then-arm's type. Consumers that care reject such
    /// trees themselves.
    pub fn ty(&self) -> TypeDescr {
        ensure_sufficient_stack(|| match self {
            Self::Constant(c) => c.ty.clone(),
            Self::Primitive(p) => TypeDescr::Function(p.ty.clone()),
            Self::Apply(apply) => match apply.callee.ty() {
                TypeDescr::Function(fn_ty) => *fn_ty.ret,
                other => other,
            },
            Self::Lambda(lambda) => TypeDescr::Function(lambda.fn_type()),
            Self::Variable(var) => var.ty.clone(),
            Self::IfExpr(if_expr) => {
                let then_ty = if_expr.then_branch.ty();
                then_ty
                    .unify(&if_expr.else_branch.ty())
                    .unwrap_or(then_ty)
            }
        })
    }

    /// Short kind tag used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Primitive(_) => "primitive",
            Self::Apply(_) => "apply",
            Self::Lambda(_) => "lambda",
            Self::Variable(_) => "variable",
            Self::IfExpr(_) => "if",
        }
    }
}

/// S-expression rendering.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ensure_sufficient_stack(|| match self {
            Self::Constant(c) => write!(f, "{}", c.value),
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Apply(apply) => {
                write!(f, "({}", apply.callee)?;
                for arg in &apply.args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Self::Lambda(lambda) => {
                write!(f, "(lambda {} (", lambda.name)?;
                for (i, param) in lambda.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", param.name)?;
                }
                write!(f, ") {})", lambda.body)
            }
            Self::Variable(var) => write!(f, "{}", var.name),
            Self::IfExpr(if_expr) => write!(
                f,
                "(if {} {} {})",
                if_expr.cond, if_expr.then_branch, if_expr.else_branch
            ),
        })
    }
}
