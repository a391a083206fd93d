//! Compilation Units
//!
//! A unit crosses from the pipeline to the engine as bitcode inside a
//! [`ThreadSafeUnit`]: the pipeline's LLVM context never leaves its thread.
//! The engine reparses it into a context of its own ([`OwnedModule`]) which
//! then travels to a compile worker and, once code is emitted, lives on as a
//! [`LoadedObject`] until the unit is removed or the session ends.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::{Linkage, Module};
use inkwell::values::FunctionValue;

use super::error::EngineError;

/// A finished unit, ready for submission. Submission consumes it.
pub struct ThreadSafeUnit {
    name: String,
    bitcode: Option<Vec<u8>>,
}

impl ThreadSafeUnit {
    /// Serialize `module`. The module itself stays with the caller.
    pub fn from_module(module: &Module<'_>) -> Self {
        let buffer = module.write_bitcode_to_memory();
        Self {
            name: module.get_name().to_string_lossy().into_owned(),
            bitcode: Some(buffer.as_slice().to_vec()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the unit was already handed to an engine.
    pub fn is_consumed(&self) -> bool {
        self.bitcode.is_none()
    }

    pub(crate) fn take_bitcode(&mut self) -> Result<Vec<u8>, EngineError> {
        self.bitcode.take().ok_or(EngineError::UnitConsumed {
            unit: self.name.clone(),
        })
    }
}

impl fmt::Debug for ThreadSafeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeUnit")
            .field("name", &self.name)
            .field("bitcode_len", &self.bitcode.as_ref().map(Vec::len))
            .finish()
    }
}

/// A module in an engine-owned context.
///
/// The context is heap-allocated and freed after the module.
pub(crate) struct OwnedModule {
    module: ManuallyDrop<Module<'static>>,
    context: NonNull<Context>,
}

// SAFETY: the context is exclusively owned by this value and no other
// reference into it escapes; every LLVM object of that context moves with it.
unsafe impl Send for OwnedModule {}

impl OwnedModule {
    /// Parse and verify bitcode.
    pub fn parse(name: &str, bitcode: &[u8]) -> Result<Self, EngineError> {
        let context: &'static Context = Box::leak(Box::new(Context::create()));
        let context_ptr = NonNull::from(context);
        let buffer = MemoryBuffer::create_from_memory_range_copy(bitcode, name);

        let result = Module::parse_bitcode_from_buffer(&buffer, context)
            .map_err(|e| e.to_string())
            .and_then(|module| match module.verify() {
                Ok(()) => Ok(module),
                Err(e) => Err(e.to_string()),
            });

        match result {
            Ok(module) => Ok(Self {
                module: ManuallyDrop::new(module),
                context: context_ptr,
            }),
            Err(message) => {
                // SAFETY: no module of this context survived.
                unsafe { drop(Box::from_raw(context_ptr.as_ptr())) };
                Err(EngineError::Compile {
                    unit: name.to_string(),
                    message,
                })
            }
        }
    }

    pub fn module(&self) -> &Module<'static> {
        &self.module
    }

    /// Functions with a body in this unit.
    pub fn defined_functions(&self) -> impl Iterator<Item = FunctionValue<'static>> + '_ {
        self.module
            .get_functions()
            .filter(|f| !f.as_global_value().is_declaration())
    }

    /// Declarations that must be resolved from outside the unit.
    pub fn external_functions(&self) -> impl Iterator<Item = FunctionValue<'static>> + '_ {
        self.module.get_functions().filter(|f| {
            f.as_global_value().is_declaration()
                && !f.get_name().to_bytes().starts_with(b"llvm.")
                && !matches!(f.get_linkage(), Linkage::ExternalWeak)
        })
    }

    /// Attach the execution engine that now owns the module's code.
    pub fn into_loaded(self, engine: ExecutionEngine<'static>) -> LoadedObject {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the module is taken exactly once.
        let module = unsafe { ManuallyDrop::take(&mut this.module) };
        LoadedObject {
            engine: ManuallyDrop::new(engine),
            module: ManuallyDrop::new(module),
            context: this.context,
        }
    }
}

impl Drop for OwnedModule {
    fn drop(&mut self) {
        // SAFETY: the module is dropped before the context it lives in.
        unsafe {
            ManuallyDrop::drop(&mut self.module);
            drop(Box::from_raw(self.context.as_ptr()));
        }
    }
}

/// Machine code of one unit, mapped into process memory.
pub(crate) struct LoadedObject {
    engine: ManuallyDrop<ExecutionEngine<'static>>,
    module: ManuallyDrop<Module<'static>>,
    context: NonNull<Context>,
}

// SAFETY: see `OwnedModule`; the engine and module handles share
// non-atomic reference counts only with each other.
unsafe impl Send for LoadedObject {}

impl LoadedObject {
    pub fn engine(&self) -> &ExecutionEngine<'static> {
        &self.engine
    }

    pub fn module(&self) -> &Module<'static> {
        &self.module
    }
}

impl Drop for LoadedObject {
    fn drop(&mut self) {
        // SAFETY: engine and module release the code before the context goes.
        unsafe {
            ManuallyDrop::drop(&mut self.engine);
            ManuallyDrop::drop(&mut self.module);
            drop(Box::from_raw(self.context.as_ptr()));
        }
    }
}
