//! Type Descriptors
//!
//! Every expression reports a [`TypeDescr`]. The JIT derives native
//! representation and storage width from it:
//!
//! | Descriptor | Native |
//! |------------|--------|
//! | `Bool` | `i1` |
//! | `I32` | `i32` |
//! | `I64` | `i64` |
//! | `F64` | `double` |
//! | `Function` | opaque pointer |

use std::fmt;

/// Type of an expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescr {
    Bool,
    I32,
    I64,
    F64,
    Function(FnType),
}

impl TypeDescr {
    /// Create a function type descriptor.
    pub fn function(params: Vec<TypeDescr>, ret: TypeDescr) -> Self {
        Self::Function(FnType::new(params, ret))
    }

    /// Integer-like types: `Bool`, `I32`, `I64`.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Bool | Self::I32 | Self::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F64)
    }

    pub fn as_function(&self) -> Option<&FnType> {
        match self {
            Self::Function(fn_ty) => Some(fn_ty),
            _ => None,
        }
    }

    /// Width in bits of an integer-like type.
    pub fn int_width(&self) -> Option<u32> {
        match self {
            Self::Bool => Some(1),
            Self::I32 => Some(32),
            Self::I64 => Some(64),
            Self::F64 | Self::Function(_) => None,
        }
    }

    /// Unify the types of two conditional arms.
    ///
    /// Identical types unify to themselves. Integer-like types unify to the
    /// wider one. An integer-like type and `F64` unify to `F64`. Everything
    /// else is incompatible.
    pub fn unify(&self, other: &TypeDescr) -> Option<TypeDescr> {
        if self == other {
            return Some(self.clone());
        }
        match (self.int_width(), other.int_width()) {
            (Some(lhs), Some(rhs)) => Some(if lhs >= rhs {
                self.clone()
            } else {
                other.clone()
            }),
            (Some(_), None) if other.is_float() => Some(TypeDescr::F64),
            (None, Some(_)) if self.is_float() => Some(TypeDescr::F64),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F64 => write!(f, "f64"),
            Self::Function(fn_ty) => write!(f, "{fn_ty}"),
        }
    }
}

/// Signature of a function value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FnType {
    pub params: Vec<TypeDescr>,
    pub ret: Box<TypeDescr>,
}

impl FnType {
    pub fn new(params: Vec<TypeDescr>, ret: TypeDescr) -> Self {
        Self {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for FnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_types_unify() {
        assert_eq!(TypeDescr::I32.unify(&TypeDescr::I32), Some(TypeDescr::I32));
        let f = TypeDescr::function(vec![TypeDescr::I64], TypeDescr::I64);
        assert_eq!(f.unify(&f), Some(f.clone()));
    }

    #[test]
    fn integers_unify_to_wider() {
        assert_eq!(TypeDescr::I32.unify(&TypeDescr::I64), Some(TypeDescr::I64));
        assert_eq!(TypeDescr::I64.unify(&TypeDescr::Bool), Some(TypeDescr::I64));
        assert_eq!(TypeDescr::Bool.unify(&TypeDescr::I32), Some(TypeDescr::I32));
    }

    #[test]
    fn integer_and_float_unify_to_float() {
        assert_eq!(TypeDescr::I32.unify(&TypeDescr::F64), Some(TypeDescr::F64));
        assert_eq!(TypeDescr::F64.unify(&TypeDescr::I64), Some(TypeDescr::F64));
    }

    #[test]
    fn functions_do_not_unify_with_scalars() {
        let f = TypeDescr::function(vec![], TypeDescr::I64);
        let g = TypeDescr::function(vec![], TypeDescr::I32);
        assert_eq!(f.unify(&TypeDescr::I64), None);
        assert_eq!(f.unify(&g), None);
    }

    #[test]
    fn display() {
        let f = TypeDescr::function(vec![TypeDescr::I64, TypeDescr::F64], TypeDescr::Bool);
        assert_eq!(f.to_string(), "(i64, f64) -> bool");
    }
}
