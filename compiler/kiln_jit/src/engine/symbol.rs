//! Symbol Vocabulary
//!
//! Interned symbol names, native addresses, and symbol flags shared by the
//! session, the layers, and the lookup API.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Interned, already-mangled symbol name. Cheap to clone and compare.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolStringPtr(Arc<str>);

impl SymbolStringPtr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SymbolStringPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for SymbolStringPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pool of interned symbol names, one per session.
#[derive(Default)]
pub struct SymbolStringPool {
    strings: Mutex<FxHashSet<Arc<str>>>,
}

impl SymbolStringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, name: &str) -> SymbolStringPtr {
        let mut strings = self.strings.lock();
        if let Some(existing) = strings.get(name) {
            return SymbolStringPtr(Arc::clone(existing));
        }
        let interned: Arc<str> = Arc::from(name);
        strings.insert(Arc::clone(&interned));
        SymbolStringPtr(interned)
    }

    /// Drop entries no longer referenced outside the pool.
    pub fn clear_dead_entries(&self) {
        self.strings.lock().retain(|s| Arc::strong_count(s) > 1);
    }

    pub fn len(&self) -> usize {
        self.strings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.lock().is_empty()
    }
}

/// Address in the executing process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExecutorAddr(u64);

impl ExecutorAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }
}

impl fmt::Debug for ExecutorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for ExecutorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

bitflags! {
    /// Linkage-level properties of a symbol.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct JitSymbolFlags: u8 {
        const EXPORTED = 1 << 0;
        const CALLABLE = 1 << 1;
        const WEAK = 1 << 2;
        const ABSOLUTE = 1 << 3;
    }
}

impl fmt::Display for JitSymbolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        write!(f, "[{}]", names.join(", ").to_lowercase())
    }
}

/// A resolved symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutorSymbolDef {
    pub address: ExecutorAddr,
    pub flags: JitSymbolFlags,
}

impl ExecutorSymbolDef {
    pub const fn new(address: ExecutorAddr, flags: JitSymbolFlags) -> Self {
        Self { address, flags }
    }
}
