//! Native Function Handles
//!
//! Every entry point the pipeline emits comes with an invoke adapter of
//! the uniform shape `void(ptr argv, ptr ret)`: arguments and the result
//! travel in 8-byte slots, so one Rust function pointer type calls any
//! signature.
//!
//! Slot encoding:
//!
//! | Type | Slot |
//! |------|------|
//! | `Bool` | `0` or `1` |
//! | `I32` | sign-extended to 64 bits |
//! | `I64` | as is |
//! | `F64` | IEEE-754 bits |
//! | `Function` | address |

use std::fmt;

use kiln_expr::{FnType, TypeDescr};

use crate::engine::ExecutorAddr;

/// Suffix of the invoke adapter generated for every entry point.
pub const INVOKE_SUFFIX: &str = "$invoke";

/// A value crossing the native boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    /// Address of a native function.
    Fn(ExecutorAddr),
}

impl Value {
    /// Whether this value can be passed where `ty` is expected.
    pub fn has_type(&self, ty: &TypeDescr) -> bool {
        matches!(
            (self, ty),
            (Self::Bool(_), TypeDescr::Bool)
                | (Self::I32(_), TypeDescr::I32)
                | (Self::I64(_), TypeDescr::I64)
                | (Self::F64(_), TypeDescr::F64)
                | (Self::Fn(_), TypeDescr::Function(_))
        )
    }

    #[allow(clippy::cast_sign_loss, reason = "slots carry raw bits")]
    fn to_slot(self) -> u64 {
        match self {
            Self::Bool(b) => u64::from(b),
            Self::I32(n) => i64::from(n) as u64,
            Self::I64(n) => n as u64,
            Self::F64(x) => x.to_bits(),
            Self::Fn(addr) => addr.value(),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "slots carry raw bits"
    )]
    fn from_slot(slot: u64, ty: &TypeDescr) -> Self {
        match ty {
            TypeDescr::Bool => Self::Bool(slot & 1 != 0),
            TypeDescr::I32 => Self::I32(slot as i32),
            TypeDescr::I64 => Self::I64(slot as i64),
            TypeDescr::F64 => Self::F64(f64::from_bits(slot)),
            TypeDescr::Function(_) => Self::Fn(ExecutorAddr::new(slot)),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(n) => Some(*n),
            Self::I32(n) => Some(i64::from(*n)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(n) => write!(f, "{n}i32"),
            Self::I64(n) => write!(f, "{n}"),
            Self::F64(x) => write!(f, "{x:?}"),
            Self::Fn(addr) => write!(f, "<fn {addr}>"),
        }
    }
}

/// Argument errors detected before entering native code.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeError {
    ArityMismatch {
        expected: usize,
        found: usize,
    },
    ArgumentTypeMismatch {
        index: usize,
        expected: TypeDescr,
        found: Value,
    },
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch { expected, found } => {
                write!(f, "expected {expected} argument(s), found {found}")
            }
            Self::ArgumentTypeMismatch {
                index,
                expected,
                found,
            } => write!(f, "argument {index} is {found}, expected {expected}"),
        }
    }
}

impl std::error::Error for InvokeError {}

type InvokeFn = unsafe extern "C" fn(*const u64, *mut u64);

/// A compiled entry point.
///
/// The handle holds raw addresses. It stays valid as long as the unit that
/// defines it is loaded: until its resource tracker is removed or the
/// engine's session ends.
#[derive(Clone, Debug)]
pub struct NativeFn {
    name: String,
    entry: ExecutorAddr,
    invoke: ExecutorAddr,
    signature: FnType,
}

impl NativeFn {
    pub(crate) fn new(
        name: impl Into<String>,
        entry: ExecutorAddr,
        invoke: ExecutorAddr,
        signature: FnType,
    ) -> Self {
        Self {
            name: name.into(),
            entry,
            invoke,
            signature,
        }
    }

    /// IR name of the entry function.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> ExecutorAddr {
        self.entry
    }

    pub fn signature(&self) -> &FnType {
        &self.signature
    }

    /// Call through the invoke adapter.
    ///
    /// # Safety
    ///
    /// The defining unit must still be loaded.
    pub unsafe fn call(&self, args: &[Value]) -> Result<Value, InvokeError> {
        if args.len() != self.signature.arity() {
            return Err(InvokeError::ArityMismatch {
                expected: self.signature.arity(),
                found: args.len(),
            });
        }
        for (index, (arg, expected)) in args.iter().zip(&self.signature.params).enumerate() {
            if !arg.has_type(expected) {
                return Err(InvokeError::ArgumentTypeMismatch {
                    index,
                    expected: expected.clone(),
                    found: *arg,
                });
            }
        }

        let slots: Vec<u64> = args.iter().map(|a| a.to_slot()).collect();
        let mut ret: u64 = 0;
        let invoke: InvokeFn = std::mem::transmute(self.invoke.as_ptr::<()>());
        invoke(slots.as_ptr(), &mut ret);
        Ok(Value::from_slot(ret, &self.signature.ret))
    }

    /// The entry point as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type matching
    /// [`signature`](Self::signature), and the defining unit must still be
    /// loaded.
    pub unsafe fn as_extern<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "as_extern requires a function pointer type"
        );
        let addr = self.entry.value() as usize;
        std::mem::transmute_copy(&addr)
    }
}

impl fmt::Display for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} @ {}", self.name, self.signature, self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slots_round_trip_each_type() {
        let cases = [
            (Value::Bool(true), TypeDescr::Bool),
            (Value::I32(-7), TypeDescr::I32),
            (Value::I64(i64::MIN), TypeDescr::I64),
            (Value::F64(-0.25), TypeDescr::F64),
            (
                Value::Fn(ExecutorAddr::new(0xdead_beef)),
                TypeDescr::function(vec![], TypeDescr::I64),
            ),
        ];
        for (value, ty) in cases {
            assert!(value.has_type(&ty));
            assert_eq!(Value::from_slot(value.to_slot(), &ty), value);
        }
    }

    #[test]
    fn i32_slots_are_sign_extended() {
        assert_eq!(Value::I32(-1).to_slot(), u64::MAX);
    }

    extern "C" fn add_adapter(argv: *const u64, ret: *mut u64) {
        unsafe {
            let a = *argv as i64;
            let b = *argv.add(1) as i64;
            *ret = (a + b) as u64;
        }
    }

    extern "C" fn add_entry(a: i64, b: i64) -> i64 {
        a + b
    }

    fn host_add() -> NativeFn {
        NativeFn::new(
            "add",
            ExecutorAddr::new(add_entry as usize as u64),
            ExecutorAddr::new(add_adapter as usize as u64),
            FnType::new(vec![TypeDescr::I64, TypeDescr::I64], TypeDescr::I64),
        )
    }

    #[test]
    fn call_goes_through_adapter() {
        let f = host_add();
        let result = unsafe { f.call(&[Value::I64(40), Value::I64(2)]) };
        assert_eq!(result, Ok(Value::I64(42)));
    }

    #[test]
    fn call_checks_arguments() {
        let f = host_add();
        assert_eq!(
            unsafe { f.call(&[Value::I64(1)]) },
            Err(InvokeError::ArityMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            unsafe { f.call(&[Value::I64(1), Value::F64(2.0)]) },
            Err(InvokeError::ArgumentTypeMismatch {
                index: 1,
                expected: TypeDescr::I64,
                found: Value::F64(2.0),
            })
        );
    }

    #[test]
    fn as_extern_yields_entry() {
        let f = host_add();
        let entry: extern "C" fn(i64, i64) -> i64 = unsafe { f.as_extern() };
        assert_eq!(entry(2, 3), 5);
    }
}
