//! Per-Unit Optimization
//!
//! Every unit goes through LLVM's new pass manager after verification and
//! before it is serialized for the engine. Lambda parameters live in stack
//! slots until this runs, so the default level is [`OptimizationLevel::Promote`]:
//! `mem2reg` followed by a short scalar cleanup.
//!
//! ```ignore
//! let config = OptimizationConfig::new(OptimizationLevel::Aggressive);
//! run_optimization_passes(&module, &target_machine, &config)?;
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::fmt;

use inkwell::module::Module;
use inkwell::targets::TargetMachine;
use llvm_sys::error::{LLVMDisposeErrorMessage, LLVMErrorRef, LLVMGetErrorMessage};
use llvm_sys::transforms::pass_builder::{
    LLVMCreatePassBuilderOptions, LLVMDisposePassBuilderOptions, LLVMPassBuilderOptionsRef,
    LLVMPassBuilderOptionsSetDebugLogging, LLVMPassBuilderOptionsSetInlinerThreshold,
    LLVMPassBuilderOptionsSetVerifyEach, LLVMRunPasses,
};
use tracing::{debug, trace};

/// Pass list behind [`OptimizationLevel::Promote`].
pub const PROMOTE_AND_SIMPLIFY: &str = "mem2reg,instcombine,reassociate,gvn,simplifycfg";

/// How hard to optimize each unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    /// Submit units exactly as emitted.
    None,
    /// Promote stack slots, then simplify.
    #[default]
    Promote,
    /// LLVM's `default<O2>` pipeline.
    Aggressive,
}

impl OptimizationLevel {
    fn pass_list(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Promote => Some(PROMOTE_AND_SIMPLIFY),
            Self::Aggressive => Some("default<O2>"),
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Promote => "promote",
            Self::Aggressive => "aggressive",
        })
    }
}

/// Pass pipeline settings for [`run_optimization_passes`].
#[derive(Debug, Clone, Default)]
pub struct OptimizationConfig {
    pub level: OptimizationLevel,
    /// Explicit pass list; overrides `level` unless the level is `None`.
    pub passes: Option<String>,
    pub inliner_threshold: Option<u32>,
    /// Verify the module after every pass.
    pub verify_each: bool,
    /// Have the pass manager print what it runs.
    pub debug_logging: bool,
}

impl OptimizationConfig {
    pub fn new(level: OptimizationLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self::new(OptimizationLevel::None)
    }

    #[must_use]
    pub fn with_passes(mut self, passes: impl Into<String>) -> Self {
        self.passes = Some(passes.into());
        self
    }

    #[must_use]
    pub fn with_inliner_threshold(mut self, threshold: u32) -> Self {
        self.inliner_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_verify_each(mut self, enable: bool) -> Self {
        self.verify_each = enable;
        self
    }

    #[must_use]
    pub fn with_debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// The pipeline string to run, or `None` if nothing runs.
    pub fn pipeline(&self) -> Option<Cow<'_, str>> {
        let level_passes = self.level.pass_list()?;
        Some(match &self.passes {
            Some(passes) => Cow::Borrowed(passes.as_str()),
            None => Cow::Borrowed(level_passes),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationError {
    /// LLVM could not allocate pass builder options.
    OptionsUnavailable,
    /// The pipeline string cannot cross the C API.
    InvalidPipeline { pipeline: String },
    /// The pass manager rejected the pipeline or a pass failed.
    PassesFailed { pipeline: String, message: String },
}

impl fmt::Display for OptimizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptionsUnavailable => write!(f, "could not create pass builder options"),
            Self::InvalidPipeline { pipeline } => {
                write!(f, "pass pipeline {pipeline:?} contains a nul byte")
            }
            Self::PassesFailed { pipeline, message } => {
                write!(f, "pass pipeline '{pipeline}' failed: {message}")
            }
        }
    }
}

impl std::error::Error for OptimizationError {}

/// Pass builder options, disposed on drop.
struct PassOptions(LLVMPassBuilderOptionsRef);

impl PassOptions {
    fn from_config(config: &OptimizationConfig) -> Result<Self, OptimizationError> {
        let raw = unsafe { LLVMCreatePassBuilderOptions() };
        if raw.is_null() {
            return Err(OptimizationError::OptionsUnavailable);
        }
        let options = Self(raw);
        unsafe {
            LLVMPassBuilderOptionsSetVerifyEach(raw, config.verify_each.into());
            LLVMPassBuilderOptionsSetDebugLogging(raw, config.debug_logging.into());
            if let Some(threshold) = config.inliner_threshold {
                LLVMPassBuilderOptionsSetInlinerThreshold(
                    raw,
                    i32::try_from(threshold).unwrap_or(i32::MAX),
                );
            }
        }
        Ok(options)
    }
}

impl Drop for PassOptions {
    fn drop(&mut self) {
        unsafe { LLVMDisposePassBuilderOptions(self.0) };
    }
}

/// Consume an `LLVMErrorRef` and return its message.
///
/// # Safety
/// `error` must be a live, non-null error that nothing else will consume.
unsafe fn consume_error(error: LLVMErrorRef) -> String {
    let raw = LLVMGetErrorMessage(error);
    if raw.is_null() {
        return "unknown LLVM error".to_string();
    }
    let message = CStr::from_ptr(raw).to_string_lossy().into_owned();
    LLVMDisposeErrorMessage(raw);
    message
}

/// Optimize `module` in place according to `config`.
pub fn run_optimization_passes(
    module: &Module<'_>,
    target_machine: &TargetMachine,
    config: &OptimizationConfig,
) -> Result<(), OptimizationError> {
    let Some(pipeline) = config.pipeline() else {
        trace!("optimization disabled");
        return Ok(());
    };
    let c_pipeline = CString::new(pipeline.as_bytes()).map_err(|_| {
        OptimizationError::InvalidPipeline {
            pipeline: pipeline.to_string(),
        }
    })?;
    let options = PassOptions::from_config(config)?;

    debug!(%pipeline, "running passes");
    let error = unsafe {
        LLVMRunPasses(
            module.as_mut_ptr(),
            c_pipeline.as_ptr(),
            target_machine.as_mut_ptr(),
            options.0,
        )
    };
    if error.is_null() {
        Ok(())
    } else {
        Err(OptimizationError::PassesFailed {
            pipeline: pipeline.into_owned(),
            message: unsafe { consume_error(error) },
        })
    }
}
