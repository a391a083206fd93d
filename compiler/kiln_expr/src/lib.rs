//! Kiln Expression Model
//!
//! The typed expression tree handed to `kiln_jit` for native lowering:
//!
//! - [`Expression`]: constants, primitives, application, lambdas, variables,
//!   and conditionals
//! - [`TypeDescr`]: the type every node reports
//! - [`Primitive`]: the operator catalog
//! - [`GlobalEnv`]: top-level named definitions
//!
//! Trees are immutable once built and are borrowed, never owned, by the JIT.

mod expr;
mod global_env;
mod primitive;
mod types;

pub use expr::{Apply, Constant, Expression, IfExpr, Lambda, Literal, Param, Variable};
pub use global_env::GlobalEnv;
pub use primitive::{ArithOp, CmpOp, LogicOp, NumKind, PrimKind, PrimOp, Primitive};
pub use types::{FnType, TypeDescr};
