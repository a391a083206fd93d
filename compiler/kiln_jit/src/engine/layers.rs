//! Compile and Link Layers
//!
//! ```text
//! add_module ──▶ IrCompileLayer ──(FIFO channel)──▶ worker ──▶ ObjectLinkingLayer
//!                  parse, verify,                              emit machine code,
//!                  claim symbols                               map externals,
//!                                                              publish addresses
//! ```
//!
//! Workers pull units in submission order. A unit's externals can only be
//! defined by earlier units, which are already being compiled when the
//! later unit is picked up, so a worker blocking on them cannot deadlock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use inkwell::module::Linkage;
use inkwell::OptimizationLevel as CodegenOptLevel;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, warn};

use super::dylib::JitDylib;
use super::error::EngineError;
use super::mangle::MangleAndInterner;
use super::session::{ExecutionSession, UnitId, UnitInterface};
use super::symbol::{ExecutorAddr, ExecutorSymbolDef, JitSymbolFlags, SymbolStringPtr};
use super::tracker::ResourceTracker;
use super::unit::{LoadedObject, OwnedModule};

/// A parsed unit together with the symbols it claims and needs.
pub(crate) struct MaterializationUnit {
    module: OwnedModule,
    interface: UnitInterface,
    /// Mangled name to IR name, for both definitions and externals.
    ir_names: FxHashMap<SymbolStringPtr, String>,
}

/// Published symbols plus the code backing them.
type Emitted = (Vec<(SymbolStringPtr, ExecutorSymbolDef)>, LoadedObject);

/// Loads compiled units into process memory.
///
/// Backed by MCJIT with LLVM's default section memory manager, one
/// execution engine per unit.
pub struct ObjectLinkingLayer {
    opt_level: CodegenOptLevel,
    override_object_flags: bool,
    auto_claim_object_symbols: bool,
}

impl ObjectLinkingLayer {
    pub fn new(opt_level: CodegenOptLevel) -> Self {
        Self {
            opt_level,
            override_object_flags: false,
            auto_claim_object_symbols: false,
        }
    }

    /// Publish symbols with the flags the unit claimed, not the flags the
    /// emitted object reports.
    pub fn set_override_object_flags_with_responsibility_flags(&mut self, enable: bool) {
        self.override_object_flags = enable;
    }

    /// Claim emitted symbols the unit did not declare responsibility for.
    pub fn set_auto_claim_responsibility_for_object_symbols(&mut self, enable: bool) {
        self.auto_claim_object_symbols = enable;
    }

    pub fn overrides_object_flags(&self) -> bool {
        self.override_object_flags
    }

    pub fn auto_claims_object_symbols(&self) -> bool {
        self.auto_claim_object_symbols
    }

    /// Responsibility flags for a defined function, `None` if it stays
    /// local to the unit.
    pub fn responsibility_flags(&self, linkage: Linkage) -> Option<JitSymbolFlags> {
        let exported = JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE;
        match linkage {
            Linkage::Private => None,
            Linkage::Internal => self
                .auto_claim_object_symbols
                .then_some(JitSymbolFlags::CALLABLE),
            Linkage::WeakAny
            | Linkage::WeakODR
            | Linkage::LinkOnceAny
            | Linkage::LinkOnceODR
            | Linkage::Common => Some(exported | JitSymbolFlags::WEAK),
            _ => Some(exported),
        }
    }

    /// Flags published once code exists.
    ///
    /// Loaded objects report every emitted function as an exported callable;
    /// with the override on, the claimed flags are kept instead.
    fn published_flags(&self, claimed: JitSymbolFlags) -> JitSymbolFlags {
        if self.override_object_flags {
            claimed
        } else {
            JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE
        }
    }

    /// Compute what a parsed unit defines and needs.
    pub(crate) fn materialization_unit(
        &self,
        name: &str,
        module: OwnedModule,
        mangler: &MangleAndInterner,
    ) -> MaterializationUnit {
        let mut interface = UnitInterface {
            name: name.to_string(),
            ..UnitInterface::default()
        };
        let mut ir_names = FxHashMap::default();

        for function in module.defined_functions() {
            let Some(flags) = self.responsibility_flags(function.get_linkage()) else {
                continue;
            };
            let ir_name = function.get_name().to_string_lossy().into_owned();
            let symbol = mangler.mangle(&ir_name);
            interface.defines.push((symbol.clone(), flags));
            ir_names.insert(symbol, ir_name);
        }
        for function in module.external_functions() {
            let ir_name = function.get_name().to_string_lossy().into_owned();
            let symbol = mangler.mangle(&ir_name);
            interface.externals.push(symbol.clone());
            ir_names.insert(symbol, ir_name);
        }

        MaterializationUnit {
            module,
            interface,
            ir_names,
        }
    }

    /// Generate machine code for a unit and resolve its symbols.
    fn emit(
        &self,
        session: &ExecutionSession,
        dylib: &JitDylib,
        unit: MaterializationUnit,
    ) -> Result<Emitted, String> {
        let MaterializationUnit {
            module,
            interface,
            ir_names,
        } = unit;

        let engine = module
            .module()
            .create_jit_execution_engine(self.opt_level)
            .map_err(|e| e.to_string())?;
        let object = module.into_loaded(engine);

        for symbol in &interface.externals {
            let def = session.lookup(dylib, symbol).map_err(|e| e.to_string())?;
            let ir_name = &ir_names[symbol];
            if let Some(function) = object.module().get_function(ir_name) {
                object
                    .engine()
                    .add_global_mapping(&function, def.address.value() as usize);
            }
        }

        let mut defs = Vec::with_capacity(interface.defines.len());
        for (symbol, claimed) in &interface.defines {
            let ir_name = &ir_names[symbol];
            let address = object
                .engine()
                .get_function_address(ir_name)
                .map_err(|e| format!("'{ir_name}': {e}"))?;
            defs.push((
                symbol.clone(),
                ExecutorSymbolDef::new(
                    ExecutorAddr::new(address as u64),
                    self.published_flags(*claimed),
                ),
            ));
        }

        Ok((defs, object))
    }
}

struct CompileJob {
    unit: UnitId,
    dylib: JitDylib,
    materialization: MaterializationUnit,
}

/// Turns submitted units into machine code on a pool of worker threads.
pub struct IrCompileLayer {
    queue: Mutex<Option<Sender<CompileJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IrCompileLayer {
    /// Spawn `threads` compile workers (at least one).
    pub fn new(
        threads: usize,
        session: &Arc<ExecutionSession>,
        linker: &Arc<ObjectLinkingLayer>,
    ) -> Result<Self, EngineError> {
        let (tx, rx) = unbounded::<CompileJob>();
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let rx = rx.clone();
            let session = Arc::clone(session);
            let linker = Arc::clone(linker);
            let handle = thread::Builder::new()
                .name(format!("kiln-jit-{index}"))
                .spawn(move || compile_worker(&rx, &session, &linker))
                .map_err(|e| EngineError::Compile {
                    unit: "<worker>".to_string(),
                    message: format!("failed to spawn compile worker: {e}"),
                })?;
            workers.push(handle);
        }
        debug!(threads, "compile layer started");

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Parse, claim, and queue a unit.
    ///
    /// Registration and queueing happen under one lock so queue order
    /// always matches registration order.
    pub(crate) fn add(
        &self,
        session: &ExecutionSession,
        linker: &ObjectLinkingLayer,
        mangler: &MangleAndInterner,
        tracker: &ResourceTracker,
        name: &str,
        bitcode: &[u8],
    ) -> Result<(), EngineError> {
        let module = OwnedModule::parse(name, bitcode)?;
        let materialization = linker.materialization_unit(name, module, mangler);

        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(EngineError::SessionEnded);
        };
        let (unit, _) = session.register_unit(tracker.id(), &materialization.interface)?;
        let job = CompileJob {
            unit,
            dylib: tracker.dylib().clone(),
            materialization,
        };
        if tx.send(job).is_err() {
            session.complete_unit(unit, Err("compile queue closed".to_string()));
            return Err(EngineError::SessionEnded);
        }
        debug!(unit = name, "queued for compilation");
        Ok(())
    }

    /// Close the queue and join the workers once it drains.
    ///
    /// Returns one message per worker that panicked.
    pub(crate) fn shutdown(&self) -> Vec<String> {
        drop(self.queue.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        let mut errors = Vec::new();
        for handle in workers {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                errors.push(format!("compile worker {name} panicked"));
            }
        }
        errors
    }
}

fn compile_worker(
    rx: &Receiver<CompileJob>,
    session: &ExecutionSession,
    linker: &ObjectLinkingLayer,
) {
    for job in rx {
        let CompileJob {
            unit,
            dylib,
            materialization,
        } = job;
        let span = debug_span!("compile", unit = %materialization.interface.name);
        let _enter = span.enter();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            linker.emit(session, &dylib, materialization)
        }))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));

        match &outcome {
            Ok((defs, _)) => debug!(symbols = defs.len(), "materialized"),
            Err(message) => warn!(%message, "materialization failed"),
        }
        session.complete_unit(unit, outcome);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("compile worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("compile worker panicked: {s}")
    } else {
        "compile worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn linkage_decides_responsibility() {
        let layer = ObjectLinkingLayer::new(CodegenOptLevel::None);
        let exported = JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE;
        assert_eq!(layer.responsibility_flags(Linkage::External), Some(exported));
        assert_eq!(
            layer.responsibility_flags(Linkage::LinkOnceODR),
            Some(exported | JitSymbolFlags::WEAK)
        );
        assert_eq!(layer.responsibility_flags(Linkage::Private), None);
        assert_eq!(layer.responsibility_flags(Linkage::Internal), None);
    }

    #[test]
    fn auto_claim_takes_internal_symbols() {
        let mut layer = ObjectLinkingLayer::new(CodegenOptLevel::None);
        layer.set_auto_claim_responsibility_for_object_symbols(true);
        assert!(layer.auto_claims_object_symbols());
        assert_eq!(
            layer.responsibility_flags(Linkage::Internal),
            Some(JitSymbolFlags::CALLABLE)
        );
        assert_eq!(layer.responsibility_flags(Linkage::Private), None);
    }

    #[test]
    fn override_keeps_claimed_flags() {
        let mut layer = ObjectLinkingLayer::new(CodegenOptLevel::None);
        let weak = JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE | JitSymbolFlags::WEAK;
        assert_eq!(
            layer.published_flags(weak),
            JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE
        );
        layer.set_override_object_flags_with_responsibility_flags(true);
        assert!(layer.overrides_object_flags());
        assert_eq!(layer.published_flags(weak), weak);
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(
            panic_message(&"boom"),
            "compile worker panicked: boom"
        );
        assert_eq!(
            panic_message(&"bang".to_string()),
            "compile worker panicked: bang"
        );
        assert_eq!(panic_message(&42_u8), "compile worker panicked");
    }
}
