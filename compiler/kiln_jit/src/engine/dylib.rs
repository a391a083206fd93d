//! JIT Dylibs and Definition Generators
//!
//! A dylib is a symbol namespace inside the session. Names it does not
//! define are offered to its generators in attach order; the first one that
//! produces an address wins and the result is cached in the dylib.

use std::ffi::CString;
use std::fmt;
use std::sync::{Arc, Once};

use tracing::{debug, trace};

use super::error::EngineError;
use super::symbol::{ExecutorAddr, ExecutorSymbolDef, JitSymbolFlags, SymbolStringPtr};

/// Index of a dylib within its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DylibId(pub(crate) usize);

/// Handle to a dylib of a session.
#[derive(Clone)]
pub struct JitDylib {
    id: DylibId,
    name: Arc<str>,
}

impl JitDylib {
    pub(crate) fn new(id: DylibId, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> DylibId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for JitDylib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JITDylib({:?})", &*self.name)
    }
}

/// Produces definitions on demand for names a dylib does not define.
pub trait DefinitionGenerator: Send + Sync {
    /// Short name used in session dumps.
    fn name(&self) -> &str;

    /// Address for `symbol`, if this generator can provide it.
    fn try_to_generate(&self, symbol: &SymbolStringPtr) -> Option<ExecutorSymbolDef>;
}

type SymbolFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Exposes every symbol already loaded in the running process.
pub struct ProcessSymbolsGenerator {
    global_prefix: Option<char>,
    filter: Option<SymbolFilter>,
}

static PROCESS_SYMBOLS_LOAD: Once = Once::new();

impl ProcessSymbolsGenerator {
    /// Make the process's own symbol table searchable.
    ///
    /// Mangled names carry `global_prefix`; it is stripped before the
    /// process lookup.
    pub fn for_current_process(global_prefix: Option<char>) -> Result<Self, EngineError> {
        let mut failed = false;
        PROCESS_SYMBOLS_LOAD.call_once(|| {
            // A null filename loads the main program's symbols.
            failed = unsafe {
                llvm_sys::support::LLVMLoadLibraryPermanently(std::ptr::null()) != 0
            };
        });
        if failed {
            return Err(EngineError::Compile {
                unit: "<process>".to_string(),
                message: "could not load the process symbol table".to_string(),
            });
        }
        Ok(Self {
            global_prefix,
            filter: None,
        })
    }

    /// Only expose symbols for which `allow` returns true (builder pattern).
    ///
    /// The filter sees unprefixed names.
    #[must_use]
    pub fn with_filter(mut self, allow: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(allow));
        self
    }
}

impl DefinitionGenerator for ProcessSymbolsGenerator {
    fn name(&self) -> &str {
        "process-symbols"
    }

    fn try_to_generate(&self, symbol: &SymbolStringPtr) -> Option<ExecutorSymbolDef> {
        let name = match self.global_prefix {
            Some(prefix) => symbol.as_str().strip_prefix(prefix)?,
            None => symbol.as_str(),
        };
        if let Some(allow) = &self.filter {
            if !allow(name) {
                trace!(name, "process symbol filtered out");
                return None;
            }
        }
        let cname = CString::new(name).ok()?;
        let addr = unsafe { llvm_sys::support::LLVMSearchForAddressOfSymbol(cname.as_ptr()) };
        if addr.is_null() {
            return None;
        }
        debug!(name, "resolved from process");
        Some(ExecutorSymbolDef::new(
            ExecutorAddr::from_ptr(addr.cast_const()),
            JitSymbolFlags::EXPORTED | JitSymbolFlags::CALLABLE,
        ))
    }
}
