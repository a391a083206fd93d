//! Primitive Operators
//!
//! A primitive is either an operator the JIT emits inline ([`PrimOp`]) or a
//! C-ABI function already present in the host process ([`PrimKind::Native`]).
//!
//! Inline primitives are named `<op>_<operand>` (`add_i64`, `lt_f64`), except
//! the boolean connectives (`and`, `or`, `xor`, `not`).

use std::fmt;

use crate::types::{FnType, TypeDescr};

/// Numeric operand class of an arithmetic or comparison primitive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NumKind {
    I32,
    I64,
    F64,
}

impl NumKind {
    pub fn type_descr(self) -> TypeDescr {
        match self {
            Self::I32 => TypeDescr::I32,
            Self::I64 => TypeDescr::I64,
            Self::F64 => TypeDescr::F64,
        }
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F64 => "f64",
        }
    }

    const ALL: [NumKind; 3] = [Self::I32, Self::I64, Self::F64];
}

/// Arithmetic operator.
///
/// Integer arithmetic wraps. Integer `Div` and `Rem` never trap: a zero
/// divisor gives 0, and `MIN / -1` gives `MIN` with remainder 0. Float
/// operators follow IEEE 754.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    const ALL: [ArithOp; 5] = [Self::Add, Self::Sub, Self::Mul, Self::Div, Self::Rem];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    const ALL: [CmpOp; 6] = [Self::Eq, Self::Ne, Self::Lt, Self::Le, Self::Gt, Self::Ge];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }
}

/// Boolean connective.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

impl LogicOp {
    const ALL: [LogicOp; 3] = [Self::And, Self::Or, Self::Xor];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

/// Operator emitted inline by the JIT.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimOp {
    Arith(ArithOp, NumKind),
    Compare(CmpOp, NumKind),
    Logic(LogicOp),
    Not,
    Neg(NumKind),
}

impl PrimOp {
    /// Catalog name of this operator.
    pub fn name(self) -> String {
        match self {
            Self::Arith(op, kind) => format!("{}_{}", op.mnemonic(), kind.suffix()),
            Self::Compare(op, kind) => format!("{}_{}", op.mnemonic(), kind.suffix()),
            Self::Logic(op) => op.mnemonic().to_string(),
            Self::Not => "not".to_string(),
            Self::Neg(kind) => format!("neg_{}", kind.suffix()),
        }
    }

    pub fn signature(self) -> FnType {
        match self {
            Self::Arith(_, kind) => {
                let ty = kind.type_descr();
                FnType::new(vec![ty.clone(), ty.clone()], ty)
            }
            Self::Compare(_, kind) => {
                let ty = kind.type_descr();
                FnType::new(vec![ty.clone(), ty], TypeDescr::Bool)
            }
            Self::Logic(_) => FnType::new(vec![TypeDescr::Bool, TypeDescr::Bool], TypeDescr::Bool),
            Self::Not => FnType::new(vec![TypeDescr::Bool], TypeDescr::Bool),
            Self::Neg(kind) => FnType::new(vec![kind.type_descr()], kind.type_descr()),
        }
    }

    /// Every inline operator, in catalog order.
    pub fn all() -> impl Iterator<Item = PrimOp> {
        let arith = ArithOp::ALL
            .into_iter()
            .flat_map(|op| NumKind::ALL.into_iter().map(move |k| Self::Arith(op, k)));
        let cmp = CmpOp::ALL
            .into_iter()
            .flat_map(|op| NumKind::ALL.into_iter().map(move |k| Self::Compare(op, k)));
        let logic = LogicOp::ALL.into_iter().map(Self::Logic);
        let neg = NumKind::ALL.into_iter().map(Self::Neg);
        arith
            .chain(cmp)
            .chain(logic)
            .chain(std::iter::once(Self::Not))
            .chain(neg)
    }
}

/// How a primitive is realised in native code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimKind {
    /// Emitted inline as one or more IR instructions.
    Inline(PrimOp),
    /// A C-ABI function resolved from the host process by symbol name.
    Native { symbol: String },
}

/// A primitive function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Primitive {
    pub name: String,
    pub ty: FnType,
    pub kind: PrimKind,
}

impl Primitive {
    pub fn inline(op: PrimOp) -> Self {
        Self {
            name: op.name(),
            ty: op.signature(),
            kind: PrimKind::Inline(op),
        }
    }

    /// A primitive backed by a function exported from the host process.
    pub fn native(name: impl Into<String>, symbol: impl Into<String>, ty: FnType) -> Self {
        Self {
            name: name.into(),
            ty,
            kind: PrimKind::Native {
                symbol: symbol.into(),
            },
        }
    }

    /// Look up a primitive in the built-in catalog.
    ///
    /// Besides the inline operators, the catalog knows `abs_i64`, which is
    /// `llabs` from the C library.
    pub fn lookup(name: &str) -> Option<Primitive> {
        if name == "abs_i64" {
            return Some(Self::native(
                "abs_i64",
                "llabs",
                FnType::new(vec![TypeDescr::I64], TypeDescr::I64),
            ));
        }
        PrimOp::all().find(|op| op.name() == name).map(Self::inline)
    }

    pub fn as_inline(&self) -> Option<PrimOp> {
        match self.kind {
            PrimKind::Inline(op) => Some(op),
            PrimKind::Native { .. } => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_inline_ops() {
        let add = Primitive::lookup("add_i64").unwrap();
        assert_eq!(add.as_inline(), Some(PrimOp::Arith(ArithOp::Add, NumKind::I64)));
        assert_eq!(
            add.ty,
            FnType::new(vec![TypeDescr::I64, TypeDescr::I64], TypeDescr::I64)
        );

        let lt = Primitive::lookup("lt_f64").unwrap();
        assert_eq!(*lt.ty.ret, TypeDescr::Bool);

        assert_eq!(
            Primitive::lookup("not").unwrap().as_inline(),
            Some(PrimOp::Not)
        );
    }

    #[test]
    fn lookup_native() {
        let abs = Primitive::lookup("abs_i64").unwrap();
        assert_eq!(
            abs.kind,
            PrimKind::Native {
                symbol: "llabs".to_string()
            }
        );
        assert_eq!(abs.as_inline(), None);
    }

    #[test]
    fn lookup_unknown() {
        assert!(Primitive::lookup("frobnicate").is_none());
        assert!(Primitive::lookup("add_u8").is_none());
    }

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<String> = PrimOp::all().map(PrimOp::name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 15 + 18 + 3 + 1 + 3);
    }
}
