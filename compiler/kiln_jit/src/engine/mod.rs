//! In-Process Execution Engine
//!
//! Accepts finished units, compiles them on worker threads, links them
//! against the running process, and resolves names to native addresses.
//!
//! # Lifecycle
//!
//! [`JitEngine::create`] probes the host (fatal on failure), creates the
//! [`ExecutionSession`], the layers, and the `<main>` dylib with a
//! process-symbols generator. [`JitEngine::end_session`] (or `Drop`) drains
//! the compile queue, joins the workers, and unloads everything. Teardown
//! errors go to the session's error reporter when dropping.
//!
//! # Concurrency
//!
//! The engine is `Send + Sync`. [`JitEngine::add_module`] returns once the
//! unit is parsed and its symbols are claimed; [`JitEngine::lookup`] blocks
//! until the defining unit is compiled.

mod dylib;
mod error;
mod layers;
mod mangle;
mod session;
mod symbol;
mod tracker;
mod unit;

use std::sync::Arc;

use inkwell::OptimizationLevel as CodegenOptLevel;
use tracing::{debug, info, instrument, warn};

use crate::target::{JitTargetMachineBuilder, ObjectFormat};

pub use dylib::{DefinitionGenerator, DylibId, JitDylib, ProcessSymbolsGenerator};
pub use error::EngineError;
pub use layers::{IrCompileLayer, ObjectLinkingLayer};
pub use mangle::{global_prefix_from_data_layout, MangleAndInterner};
pub use session::{ErrorReporter, ExecutionSession, TrackerId, UnitId};
#[cfg(test)]
pub(crate) use session::UnitInterface;
pub use symbol::{ExecutorAddr, ExecutorSymbolDef, JitSymbolFlags, SymbolStringPool, SymbolStringPtr};
pub use tracker::ResourceTracker;
pub use unit::ThreadSafeUnit;

/// Name of the dylib user units go to by default.
pub const MAIN_DYLIB_NAME: &str = "<main>";

/// Environment variable overriding the compile worker count.
pub const THREADS_ENV_VAR: &str = "KILN_JIT_THREADS";

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of compile worker threads.
    pub compile_threads: usize,
    /// Machine code optimization level.
    pub codegen_opt_level: CodegenOptLevel,
}

impl EngineConfig {
    /// Defaults, with the worker count taken from `KILN_JIT_THREADS` if set.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(THREADS_ENV_VAR) {
            Ok(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.with_compile_threads(n),
                _ => {
                    warn!(%value, "ignoring invalid {THREADS_ENV_VAR}");
                    config
                }
            },
            Err(_) => config,
        }
    }

    #[must_use]
    pub fn with_compile_threads(mut self, threads: usize) -> Self {
        self.compile_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_codegen_opt_level(mut self, level: CodegenOptLevel) -> Self {
        self.codegen_opt_level = level;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compile_threads: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1),
            codegen_opt_level: CodegenOptLevel::Default,
        }
    }
}

/// The execution engine.
pub struct JitEngine {
    session: Arc<ExecutionSession>,
    target: JitTargetMachineBuilder,
    mangler: MangleAndInterner,
    linking_layer: Arc<ObjectLinkingLayer>,
    compile_layer: IrCompileLayer,
    main: JitDylib,
}

impl JitEngine {
    pub fn create() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::from_env())
    }

    #[instrument(level = "debug", skip_all, fields(threads = config.compile_threads))]
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let target =
            JitTargetMachineBuilder::detect_host()?.with_opt_level(config.codegen_opt_level);
        let session = Arc::new(ExecutionSession::new());
        let mangler =
            MangleAndInterner::new(Arc::clone(session.symbol_string_pool()), target.data_layout());

        let mut linking_layer = ObjectLinkingLayer::new(config.codegen_opt_level);
        if target.object_format() == ObjectFormat::Coff {
            linking_layer.set_override_object_flags_with_responsibility_flags(true);
            linking_layer.set_auto_claim_responsibility_for_object_symbols(true);
        }
        let linking_layer = Arc::new(linking_layer);
        let compile_layer =
            IrCompileLayer::new(config.compile_threads, &session, &linking_layer)?;

        let main = session.create_bare_jit_dylib(MAIN_DYLIB_NAME)?;
        session.add_generator(
            &main,
            Box::new(ProcessSymbolsGenerator::for_current_process(
                mangler.global_prefix(),
            )?),
        );

        info!(
            triple = target.triple(),
            cpu = target.cpu(),
            format = %target.object_format(),
            "JIT engine ready"
        );

        Ok(Self {
            session,
            target,
            mangler,
            linking_layer,
            compile_layer,
            main,
        })
    }

    // -- Accessors --

    pub fn session(&self) -> &Arc<ExecutionSession> {
        &self.session
    }

    pub fn target(&self) -> &JitTargetMachineBuilder {
        &self.target
    }

    pub fn target_triple(&self) -> &str {
        self.target.triple()
    }

    pub fn data_layout(&self) -> &str {
        self.target.data_layout()
    }

    pub fn main_dylib(&self) -> &JitDylib {
        &self.main
    }

    pub fn linking_layer(&self) -> &ObjectLinkingLayer {
        &self.linking_layer
    }

    /// Linker-level spelling of an IR name.
    pub fn mangle(&self, name: &str) -> String {
        self.mangler.mangle_str(name)
    }

    // -- Dylibs and trackers --

    pub fn create_jit_dylib(&self, name: &str) -> Result<JitDylib, EngineError> {
        self.session.create_bare_jit_dylib(name)
    }

    pub fn add_generator(&self, dylib: &JitDylib, generator: Box<dyn DefinitionGenerator>) {
        self.session.add_generator(dylib, generator);
    }

    /// New tracker for the main dylib.
    pub fn create_resource_tracker(&self) -> ResourceTracker {
        self.session.create_resource_tracker(&self.main)
    }

    pub fn create_resource_tracker_in(&self, dylib: &JitDylib) -> ResourceTracker {
        self.session.create_resource_tracker(dylib)
    }

    pub fn default_resource_tracker(&self) -> ResourceTracker {
        self.session.default_resource_tracker(&self.main)
    }

    /// Define host symbols by IR name. Goes to the main dylib's default
    /// tracker unless one is given.
    pub fn define_absolute(
        &self,
        tracker: Option<&ResourceTracker>,
        symbols: &[(&str, ExecutorSymbolDef)],
    ) -> Result<(), EngineError> {
        let default;
        let tracker = match tracker {
            Some(t) => t,
            None => {
                default = self.default_resource_tracker();
                &default
            }
        };
        self.session.define_absolute(
            tracker,
            symbols
                .iter()
                .map(|(name, def)| (self.mangler.mangle(name), *def)),
        )
    }

    // -- Units --

    /// Submit a unit. Consumes it; does not wait for machine code.
    ///
    /// Without a tracker the unit goes to the main dylib's default tracker.
    #[instrument(level = "debug", skip_all, fields(unit = unit.name()))]
    pub fn add_module(
        &self,
        unit: &mut ThreadSafeUnit,
        tracker: Option<&ResourceTracker>,
    ) -> Result<(), EngineError> {
        let bitcode = unit.take_bitcode()?;
        let default;
        let tracker = match tracker {
            Some(t) => t,
            None => {
                default = self.default_resource_tracker();
                &default
            }
        };
        self.compile_layer.add(
            &self.session,
            &self.linking_layer,
            &self.mangler,
            tracker,
            unit.name(),
            &bitcode,
        )
    }

    /// Resolve an IR name in the main dylib, blocking while it compiles.
    pub fn lookup(&self, name: &str) -> Result<ExecutorSymbolDef, EngineError> {
        self.lookup_in(&self.main, name)
    }

    pub fn lookup_in(&self, dylib: &JitDylib, name: &str) -> Result<ExecutorSymbolDef, EngineError> {
        let symbol = self.mangler.mangle(name);
        debug!(%symbol, dylib = dylib.name(), "lookup");
        self.session.lookup(dylib, &symbol)
    }

    pub fn dump_execution_session(&self) -> String {
        self.session.dump()
    }

    // -- Teardown --

    /// End the session: finish queued compilation, join the workers, and
    /// unload all code. Idempotent.
    pub fn end_session(&self) -> Result<(), EngineError> {
        if !self.session.begin_end() {
            return Ok(());
        }
        let errors = self.compile_layer.shutdown();
        self.session.clear();
        debug!("execution session ended");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Teardown { errors })
        }
    }
}

impl Drop for JitEngine {
    fn drop(&mut self) {
        if let Err(e) = self.end_session() {
            self.session.report_error(&e);
        }
    }
}
