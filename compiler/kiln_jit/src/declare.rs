//! Function Declaration Helpers
//!
//! Declarations create symbols without bodies; bodies are filled in during
//! the define phase. Two-phase codegen:
//!
//! 1. **Declare**: every lambda reachable from the top-level expression gets
//!    an IR function before any body is emitted.
//! 2. **Define**: bodies are generated, freely referring to each other.
//!
//! This is what lets mutually recursive lambdas call each other directly.

use inkwell::module::Linkage;
use inkwell::values::FunctionValue;
use rustc_hash::FxHashMap;
use tracing::trace;

use kiln_expr::{FnType, Lambda};

use crate::codegen::is_reserved_name;
use crate::context::{CodegenCx, DeclaredFn, FnOrigin};
use crate::error::CodegenError;

impl<'ll> CodegenCx<'ll, '_> {
    /// Declare a function with the given name and signature.
    ///
    /// If a function with this name already exists in the module, returns
    /// the existing declaration.
    pub fn declare_fn(&self, name: &str, ty: &FnType) -> FunctionValue<'ll> {
        if let Some(func) = self.llmod().get_function(name) {
            return func;
        }
        self.llmod()
            .add_function(name, self.llvm_fn_type(ty), None)
    }

    /// Declare a function whose body lives outside this unit.
    ///
    /// External functions are resolved by the engine at link time.
    pub fn declare_extern_fn(&self, name: &str, ty: &FnType) -> FunctionValue<'ll> {
        if let Some(func) = self.llmod().get_function(name) {
            return func;
        }
        self.llmod()
            .add_function(name, self.llvm_fn_type(ty), Some(Linkage::External))
    }

    /// Declare a lambda and enter it in the function table.
    ///
    /// `submitted` holds the lambdas earlier units of the same pipeline have
    /// defined. An equal definition there is linked instead of re-emitted; a
    /// different one under the same name is a duplicate.
    pub fn declare_lambda(
        &self,
        lambda: &Lambda,
        submitted: &FxHashMap<String, Lambda>,
    ) -> Result<DeclaredFn<'ll>, CodegenError> {
        if is_reserved_name(&lambda.name) {
            return Err(CodegenError::ReservedName {
                name: lambda.name.clone(),
            });
        }
        if self.get_function(&lambda.name).is_some() {
            return Err(CodegenError::DuplicateFunction {
                name: lambda.name.clone(),
            });
        }

        let ty = lambda.fn_type();
        let declared = match submitted.get(&lambda.name) {
            Some(previous) if previous == lambda => DeclaredFn {
                value: self.declare_extern_fn(&lambda.name, &ty),
                ty,
                origin: FnOrigin::Linked,
            },
            Some(_) => {
                return Err(CodegenError::DuplicateFunction {
                    name: lambda.name.clone(),
                })
            }
            None => DeclaredFn {
                value: self.declare_fn(&lambda.name, &ty),
                ty,
                origin: FnOrigin::Local,
            },
        };

        trace!(name = %lambda.name, origin = ?declared.origin, "declared lambda");
        self.register_function(&lambda.name, declared.clone());
        Ok(declared)
    }

    /// Declare a host process function by symbol name.
    pub fn declare_native(
        &self,
        symbol: &str,
        ty: &FnType,
    ) -> Result<FunctionValue<'ll>, CodegenError> {
        match self.get_function(symbol) {
            Some(existing) if existing.origin == FnOrigin::Native && existing.ty == *ty => {
                Ok(existing.value)
            }
            Some(_) => Err(CodegenError::DuplicateFunction {
                name: symbol.to_string(),
            }),
            None => {
                let value = self.declare_extern_fn(symbol, ty);
                self.register_function(
                    symbol,
                    DeclaredFn {
                        value,
                        ty: ty.clone(),
                        origin: FnOrigin::Native,
                    },
                );
                Ok(value)
            }
        }
    }
}
