//! Symbol Mangling
//!
//! Linker-level names differ from IR names by the target's global prefix:
//! Mach-O and 32-bit Windows COFF prepend `_`, everything else uses the IR
//! name as is. The prefix is read from the `m:` component of the data layout.

use std::sync::Arc;

use super::symbol::{SymbolStringPool, SymbolStringPtr};

/// Global symbol prefix implied by a data layout string.
pub fn global_prefix_from_data_layout(data_layout: &str) -> Option<char> {
    data_layout
        .split('-')
        .find_map(|part| part.strip_prefix("m:"))
        .and_then(|mangling| match mangling {
            // Mach-O, Windows COFF x86-32
            "o" | "x" => Some('_'),
            _ => None,
        })
}

/// Mangles IR names for the host and interns them in the session pool.
#[derive(Clone)]
pub struct MangleAndInterner {
    pool: Arc<SymbolStringPool>,
    global_prefix: Option<char>,
}

impl MangleAndInterner {
    pub fn new(pool: Arc<SymbolStringPool>, data_layout: &str) -> Self {
        Self {
            pool,
            global_prefix: global_prefix_from_data_layout(data_layout),
        }
    }

    pub fn global_prefix(&self) -> Option<char> {
        self.global_prefix
    }

    /// Linker-level spelling of `name`.
    pub fn mangle_str(&self, name: &str) -> String {
        match self.global_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }

    pub fn mangle(&self, name: &str) -> SymbolStringPtr {
        self.pool.intern(&self.mangle_str(name))
    }

    /// Strip the global prefix to recover the name a C-level lookup expects.
    #[cfg(test)]
    pub(crate) fn demangle<'n>(&self, mangled: &'n str) -> Option<&'n str> {
        match self.global_prefix {
            Some(prefix) => mangled.strip_prefix(prefix),
            None => Some(mangled),
        }
    }
}
