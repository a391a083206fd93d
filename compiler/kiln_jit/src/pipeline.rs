//! The Codegen Pipeline
//!
//! [`JitPipeline`] owns the IR context, the global environment, and an
//! execution engine. Each call to [`JitPipeline::codegen_toplevel`] lowers
//! one expression into a fresh unit, optimizes it, submits it, and returns a
//! [`NativeFn`] for its entry.
//!
//! The pipeline is single-threaded: the IR context it owns is not `Send`.
//! The engine behind it is shared-safe and may be used from other threads
//! through [`JitPipeline::engine`].
//!
//! Lambdas are remembered only once their unit has materialized, and only
//! while the tracker the unit went into is live. Removing that tracker,
//! through [`JitPipeline::remove_submitted_units`] or directly on the
//! engine, makes later units define those lambdas again.

use std::fmt;

use inkwell::targets::TargetMachine;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, instrument};

use kiln_expr::{Expression, GlobalEnv, Lambda};

use crate::codegen::{self, LoweredUnit, PriorUnits};
use crate::context::IrContext;
use crate::engine::{
    EngineConfig, EngineError, ExecutorSymbolDef, JitEngine, ResourceTracker, ThreadSafeUnit,
};
use crate::error::PipelineError;
use crate::native::NativeFn;
use crate::passes::{run_optimization_passes, OptimizationConfig};

/// Environment variable enabling IR dumps before submission.
pub const DEBUG_IR_ENV_VAR: &str = "KILN_DEBUG_IR";

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub optimization: OptimizationConfig,
    /// Print each unit's IR to stderr before submission.
    pub dump_ir: bool,
}

impl PipelineConfig {
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_optimization(mut self, optimization: OptimizationConfig) -> Self {
        self.optimization = optimization;
        self
    }

    #[must_use]
    pub fn with_dump_ir(mut self, dump_ir: bool) -> Self {
        self.dump_ir = dump_ir;
        self
    }
}

impl Default for PipelineConfig {
    /// Engine settings and IR dumping follow the environment.
    fn default() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            optimization: OptimizationConfig::default(),
            dump_ir: std::env::var(DEBUG_IR_ENV_VAR).is_ok_and(|v| !v.is_empty()),
        }
    }
}

/// Expression-to-native-code pipeline.
pub struct JitPipeline {
    ir: IrContext,
    engine: JitEngine,
    target_machine: TargetMachine,
    config: PipelineConfig,
    globals: GlobalEnv,
    /// Tracker every unit is added under; starts as the main dylib's default.
    tracker: ResourceTracker,
    /// Lambdas defined by materialized units, by name.
    submitted: FxHashMap<String, Lambda>,
    /// Invoke adapters defined by submitted units.
    adapters: FxHashSet<String>,
    /// Source-level functions defined by submitted units, in order.
    functions: Vec<String>,
    /// Units lowered so far, failed ones included.
    units: u64,
    last_ir: Option<String>,
}

impl JitPipeline {
    pub fn create() -> Result<Self, PipelineError> {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let engine = JitEngine::with_config(config.engine)?;
        let target_machine = engine
            .target()
            .create_target_machine()
            .map_err(EngineError::from)?;
        info!(triple = engine.target_triple(), "pipeline ready");
        Ok(Self {
            ir: IrContext::new(),
            tracker: engine.default_resource_tracker(),
            engine,
            target_machine,
            config,
            globals: GlobalEnv::new(),
            submitted: FxHashMap::default(),
            adapters: FxHashSet::default(),
            functions: Vec::new(),
            units: 0,
            last_ir: None,
        })
    }

    pub fn global_env(&self) -> &GlobalEnv {
        &self.globals
    }

    /// Globals are read at codegen time; define them before lowering
    /// expressions that refer to them.
    pub fn global_env_mut(&mut self) -> &mut GlobalEnv {
        &mut self.globals
    }

    pub fn engine(&self) -> &JitEngine {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn target_triple(&self) -> &str {
        self.engine.target_triple()
    }

    /// Tracker the next unit will be added under.
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Unload every unit this pipeline submitted and forget their lambdas.
    ///
    /// The pipeline's tracker is the main dylib's default, so anything else
    /// added to the engine without a tracker is unloaded too.
    pub fn remove_submitted_units(&mut self) -> Result<(), EngineError> {
        self.tracker.remove()?;
        self.forget_unloaded_units();
        Ok(())
    }

    /// Drop what the pipeline knows about units its tracker no longer holds.
    fn forget_unloaded_units(&mut self) {
        if !self.tracker.is_defunct() {
            return;
        }
        debug!(
            lambdas = self.submitted.len(),
            "tracker removed, forgetting submitted units"
        );
        self.submitted.clear();
        self.adapters.clear();
        self.functions.clear();
        self.tracker = self.engine.default_resource_tracker();
    }

    /// Lower, optimize, and submit `expr`, then resolve its entry.
    ///
    /// On a codegen failure the unit is dropped unsubmitted and the pipeline
    /// stays usable.
    #[instrument(level = "debug", skip_all, fields(unit = self.units))]
    pub fn codegen_toplevel(&mut self, expr: &Expression) -> Result<NativeFn, PipelineError> {
        self.forget_unloaded_units();
        let index = self.units;
        self.units += 1;

        let prior = PriorUnits {
            lambdas: &self.submitted,
            adapters: &self.adapters,
        };
        let LoweredUnit {
            module,
            entry,
            adapter,
            signature,
            emits_adapter,
            lambdas,
            functions,
        } = codegen::lower_toplevel(self.ir.llcx(), &self.globals, prior, index, expr)
            .map_err(|e| PipelineError::codegen(expr, e))?;

        self.engine
            .target()
            .configure_module(&module)
            .map_err(|e| PipelineError::codegen(expr, e.into()))?;
        run_optimization_passes(&module, &self.target_machine, &self.config.optimization)?;

        let ir = module.print_to_string().to_string();
        if self.config.dump_ir {
            eprintln!("; ---- {} ----\n{ir}", codegen::unit_name(index));
        }
        self.last_ir = Some(ir);

        let mut unit = ThreadSafeUnit::from_module(&module);
        drop(module);
        self.engine.add_module(&mut unit, Some(&self.tracker))?;

        // A unit that fails to materialize defines nothing later units can
        // link against.
        let entry_def = self.engine.lookup(&entry)?;
        let adapter_def = self.engine.lookup(&adapter)?;
        debug!(%entry, address = %entry_def.address, "entry resolved");

        for lambda in lambdas {
            self.submitted.insert(lambda.name.clone(), lambda);
        }
        if emits_adapter {
            self.adapters.insert(adapter.clone());
        }
        self.functions.extend(functions);
        Ok(NativeFn::new(
            entry,
            entry_def.address,
            adapter_def.address,
            signature,
        ))
    }

    /// Resolve an IR name in the main dylib.
    pub fn lookup_symbol(&self, name: &str) -> Result<ExecutorSymbolDef, EngineError> {
        self.engine.lookup(name)
    }

    /// Linker-level spelling of an IR name.
    pub fn mangle(&self, name: &str) -> String {
        self.engine.mangle(name)
    }

    /// Textual IR of the most recently submitted unit, as optimized.
    pub fn dump_current_module(&self) -> Option<&str> {
        self.last_ir.as_deref()
    }

    pub fn dump_execution_session(&self) -> String {
        self.engine.dump_execution_session()
    }

    /// Functions defined by live submitted units, in submission order.
    pub fn get_function_names(&self) -> &[String] {
        if self.tracker.is_defunct() {
            return &[];
        }
        &self.functions
    }
}

impl fmt::Display for JitPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JitPipeline({}, {} unit(s), {} function(s))",
            self.target_triple(),
            self.units,
            self.get_function_names().len()
        )
    }
}
