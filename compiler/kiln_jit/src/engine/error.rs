use std::fmt;

use crate::target::TargetError;

/// Execution engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Host target could not be probed. Fatal: no engine exists.
    HostProbe(TargetError),
    /// The unit was already submitted.
    UnitConsumed { unit: String },
    /// The unit's IR could not be parsed, verified, or compiled.
    Compile { unit: String, message: String },
    /// The unit references a symbol nothing can provide.
    UnresolvedExternal { unit: String, symbol: String },
    /// The unit defines a symbol the dylib already has.
    DuplicateDefinition { unit: String, symbol: String },
    SymbolNotFound { symbol: String },
    /// The defining unit failed to compile or link.
    MaterializationFailed { symbol: String, message: String },
    /// The tracker was removed.
    TrackerDefunct,
    /// A dylib with this name already exists in the session.
    DuplicateDylib { name: String },
    /// The session was ended.
    SessionEnded,
    /// Errors collected while ending the session.
    Teardown { errors: Vec<String> },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostProbe(e) => write!(f, "host target detection failed: {e}"),
            Self::UnitConsumed { unit } => {
                write!(f, "unit '{unit}' was already submitted")
            }
            Self::Compile { unit, message } => {
                write!(f, "failed to compile unit '{unit}': {message}")
            }
            Self::UnresolvedExternal { unit, symbol } => {
                write!(f, "unit '{unit}' references undefined symbol '{symbol}'")
            }
            Self::DuplicateDefinition { unit, symbol } => {
                write!(f, "unit '{unit}' redefines symbol '{symbol}'")
            }
            Self::SymbolNotFound { symbol } => write!(f, "symbol '{symbol}' not found"),
            Self::MaterializationFailed { symbol, message } => {
                write!(f, "failed to materialize '{symbol}': {message}")
            }
            Self::TrackerDefunct => write!(f, "resource tracker has been removed"),
            Self::DuplicateDylib { name } => write!(f, "JITDylib '{name}' already exists"),
            Self::SessionEnded => write!(f, "execution session has ended"),
            Self::Teardown { errors } => {
                write!(f, "session teardown failed: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HostProbe(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TargetError> for EngineError {
    fn from(e: TargetError) -> Self {
        Self::HostProbe(e)
    }
}
