//! Host Target Probing
//!
//! The engine only ever compiles for the process it runs in, so there is a
//! single entry point: [`JitTargetMachineBuilder::detect_host`]. It reads the
//! default triple, host CPU and features, and derives the data layout from a
//! host target machine.
//!
//! Failure here is fatal for engine construction.

use std::fmt;
use std::sync::OnceLock;

use inkwell::module::Module;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// LLVM's native target could not be registered.
    NativeInit { message: String },
    /// The triple names no registered LLVM target.
    NoTarget { triple: String, message: String },
    /// LLVM refused to build a machine for the probed host.
    MachineUnavailable { triple: String, cpu: String },
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeInit { message } => {
                write!(f, "native target initialization failed: {message}")
            }
            Self::NoTarget { triple, message } => {
                write!(f, "no LLVM target for '{triple}': {message}")
            }
            Self::MachineUnavailable { triple, cpu } => {
                write!(f, "no target machine for {triple} ({cpu})")
            }
        }
    }
}

impl std::error::Error for TargetError {}

/// Container format the host's object files use.
///
/// Only COFF changes engine behaviour: its symbol tables under-report
/// flags, so the linking layer trusts the unit's declared symbols instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    MachO,
    Coff,
}

impl ObjectFormat {
    /// Classify by the OS component of `arch-vendor-os[-env]`.
    pub fn from_triple(triple: &str) -> Self {
        let mut components = triple.split('-').skip(1);
        let vendor = components.next().unwrap_or_default();
        let os = components.next().unwrap_or_default();
        let env = components.next();

        if vendor == "apple" || os.starts_with("darwin") || os.starts_with("macos") {
            Self::MachO
        } else if os.starts_with("windows") && env != Some("elf") {
            Self::Coff
        } else {
            Self::Elf
        }
    }
}

impl fmt::Display for ObjectFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elf => "ELF",
            Self::MachO => "Mach-O",
            Self::Coff => "COFF",
        })
    }
}

/// Description of the machine code the engine generates.
#[derive(Debug, Clone)]
pub struct JitTargetMachineBuilder {
    triple: String,
    cpu: String,
    features: String,
    data_layout: String,
    codegen_level: OptimizationLevel,
}

impl JitTargetMachineBuilder {
    /// Probe the host.
    pub fn detect_host() -> Result<Self, TargetError> {
        ensure_native_target()?;

        let default_triple = TargetMachine::get_default_triple();
        let mut host = Self {
            triple: default_triple.as_str().to_string_lossy().into_owned(),
            cpu: TargetMachine::get_host_cpu_name().to_string(),
            features: TargetMachine::get_host_cpu_features().to_string(),
            data_layout: String::new(),
            codegen_level: OptimizationLevel::Default,
        };
        let layout = host.create_target_machine()?.get_target_data().get_data_layout();
        host.data_layout = layout.as_str().to_string_lossy().into_owned();
        Ok(host)
    }

    #[must_use]
    pub fn with_opt_level(self, codegen_level: OptimizationLevel) -> Self {
        Self {
            codegen_level,
            ..self
        }
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn cpu(&self) -> &str {
        &self.cpu
    }

    /// Host data layout string; the mangler derives its prefix from it.
    pub fn data_layout(&self) -> &str {
        &self.data_layout
    }

    pub fn object_format(&self) -> ObjectFormat {
        ObjectFormat::from_triple(&self.triple)
    }

    /// A fresh machine for the host, JIT code model.
    pub fn create_target_machine(&self) -> Result<TargetMachine, TargetError> {
        let triple = TargetTriple::create(&self.triple);
        let target = Target::from_triple(&triple).map_err(|e| TargetError::NoTarget {
            triple: self.triple.clone(),
            message: e.to_string(),
        })?;
        let machine = target.create_target_machine(
            &triple,
            &self.cpu,
            &self.features,
            self.codegen_level,
            RelocMode::Default,
            CodeModel::JITDefault,
        );
        machine.ok_or_else(|| TargetError::MachineUnavailable {
            triple: self.triple.clone(),
            cpu: self.cpu.clone(),
        })
    }

    /// Stamp a module with the host triple and data layout.
    pub fn configure_module(&self, module: &Module<'_>) -> Result<(), TargetError> {
        let machine = self.create_target_machine()?;
        module.set_triple(&TargetTriple::create(&self.triple));
        module.set_data_layout(&machine.get_target_data().get_data_layout());
        Ok(())
    }
}

/// Register the native target, asm printer and parser once per process.
///
/// A failed registration is remembered and reported to every caller.
fn ensure_native_target() -> Result<(), TargetError> {
    static NATIVE: OnceLock<Result<(), String>> = OnceLock::new();
    NATIVE
        .get_or_init(|| Target::initialize_native(&InitializationConfig::default()))
        .clone()
        .map_err(|message| TargetError::NativeInit { message })
}
