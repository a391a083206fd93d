//! Execution Session
//!
//! Process-wide registry of everything one engine has loaded: dylibs and
//! their symbol tables, submitted units, resource trackers, and the symbol
//! string pool.
//!
//! # Symbol lifecycle
//!
//! ```text
//! add_module ──▶ Pending ──(worker emits code)──▶ Ready(addr)
//!                   │
//!                   └──(compile/link error)─────▶ Failed(msg)
//! ```
//!
//! All state sits behind one mutex. [`ExecutionSession::lookup`] waits on a
//! condition variable while a symbol is pending; every completion notifies
//! all waiters.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

use super::dylib::{DefinitionGenerator, DylibId, JitDylib};
use super::error::EngineError;
use super::symbol::{ExecutorSymbolDef, JitSymbolFlags, SymbolStringPool, SymbolStringPtr};
use super::tracker::ResourceTracker;
use super::unit::LoadedObject;

/// Callback receiving errors that have no caller to return to.
pub type ErrorReporter = Box<dyn Fn(&EngineError) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerId(u64);

/// What a unit defines and what it needs, in mangled names.
#[derive(Debug, Clone, Default)]
pub(crate) struct UnitInterface {
    pub name: String,
    pub defines: Vec<(SymbolStringPtr, JitSymbolFlags)>,
    pub externals: Vec<SymbolStringPtr>,
}

#[derive(Debug, Clone)]
enum SymbolState {
    Pending,
    Ready(ExecutorSymbolDef),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolOwner {
    Unit(UnitId),
    Absolute(TrackerId),
    Generated,
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    state: SymbolState,
    flags: JitSymbolFlags,
    owner: SymbolOwner,
}

struct DylibState {
    handle: JitDylib,
    symbols: FxHashMap<SymbolStringPtr, SymbolEntry>,
    generators: Vec<Box<dyn DefinitionGenerator>>,
    default_tracker: TrackerId,
}

impl DylibState {
    /// Resolve through the generators, caching a hit.
    fn generate(&mut self, symbol: &SymbolStringPtr) -> Option<ExecutorSymbolDef> {
        let def = self
            .generators
            .iter()
            .find_map(|g| g.try_to_generate(symbol))?;
        self.symbols.insert(
            symbol.clone(),
            SymbolEntry {
                state: SymbolState::Ready(def),
                flags: def.flags,
                owner: SymbolOwner::Generated,
            },
        );
        Some(def)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitStatus {
    Pending,
    Ready,
    Failed(String),
}

struct UnitRecord {
    name: String,
    dylib: DylibId,
    tracker: TrackerId,
    symbols: Vec<SymbolStringPtr>,
    status: UnitStatus,
    object: Option<LoadedObject>,
}

struct TrackerState {
    dylib: DylibId,
    defunct: bool,
}

#[derive(Default)]
struct SessionState {
    dylibs: Vec<DylibState>,
    units: BTreeMap<UnitId, UnitRecord>,
    trackers: FxHashMap<TrackerId, TrackerState>,
    next_unit: u64,
    next_tracker: u64,
    ended: bool,
}

impl SessionState {
    fn new_tracker(&mut self, dylib: DylibId) -> TrackerId {
        let id = TrackerId(self.next_tracker);
        self.next_tracker += 1;
        self.trackers.insert(
            id,
            TrackerState {
                dylib,
                defunct: false,
            },
        );
        id
    }

    fn live_tracker(&self, tracker: TrackerId) -> Result<DylibId, EngineError> {
        match self.trackers.get(&tracker) {
            Some(state) if !state.defunct => Ok(state.dylib),
            _ => Err(EngineError::TrackerDefunct),
        }
    }
}

/// The process-wide registry owned by one engine.
pub struct ExecutionSession {
    state: Mutex<SessionState>,
    materialized: Condvar,
    pool: Arc<SymbolStringPool>,
    reporter: RwLock<ErrorReporter>,
}

impl ExecutionSession {
    /// New session with the tracing error reporter.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            materialized: Condvar::new(),
            pool: Arc::new(SymbolStringPool::new()),
            reporter: RwLock::new(Box::new(|e| error!(error = %e, "JIT session error"))),
        }
    }

    pub fn symbol_string_pool(&self) -> &Arc<SymbolStringPool> {
        &self.pool
    }

    pub fn intern(&self, name: &str) -> SymbolStringPtr {
        self.pool.intern(name)
    }

    /// Replace the error reporter.
    pub fn set_error_reporter(&self, reporter: impl Fn(&EngineError) + Send + Sync + 'static) {
        *self.reporter.write() = Box::new(reporter);
    }

    pub fn report_error(&self, err: &EngineError) {
        (self.reporter.read())(err);
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    // -- Dylibs --

    /// Create a dylib with no generators.
    pub fn create_bare_jit_dylib(&self, name: &str) -> Result<JitDylib, EngineError> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(EngineError::SessionEnded);
        }
        if state.dylibs.iter().any(|d| d.handle.name() == name) {
            return Err(EngineError::DuplicateDylib {
                name: name.to_string(),
            });
        }
        let id = DylibId(state.dylibs.len());
        let default_tracker = state.new_tracker(id);
        let handle = JitDylib::new(id, name);
        state.dylibs.push(DylibState {
            handle: handle.clone(),
            symbols: FxHashMap::default(),
            generators: Vec::new(),
            default_tracker,
        });
        debug!(name, "created JITDylib");
        Ok(handle)
    }

    pub fn get_jit_dylib_by_name(&self, name: &str) -> Option<JitDylib> {
        self.state
            .lock()
            .dylibs
            .iter()
            .find(|d| d.handle.name() == name)
            .map(|d| d.handle.clone())
    }

    pub fn add_generator(&self, dylib: &JitDylib, generator: Box<dyn DefinitionGenerator>) {
        debug!(dylib = dylib.name(), generator = generator.name(), "attached generator");
        self.state.lock().dylibs[dylib.id().0]
            .generators
            .push(generator);
    }

    // -- Trackers --

    pub fn default_resource_tracker(self: &Arc<Self>, dylib: &JitDylib) -> ResourceTracker {
        let id = self.state.lock().dylibs[dylib.id().0].default_tracker;
        ResourceTracker::new(Arc::clone(self), id, dylib.clone())
    }

    pub fn create_resource_tracker(self: &Arc<Self>, dylib: &JitDylib) -> ResourceTracker {
        let id = self.state.lock().new_tracker(dylib.id());
        ResourceTracker::new(Arc::clone(self), id, dylib.clone())
    }

    pub(crate) fn is_tracker_defunct(&self, tracker: TrackerId) -> bool {
        self.state.lock().live_tracker(tracker).is_err()
    }

    /// Remove everything associated with `tracker`.
    ///
    /// Waits for in-flight compilation of the tracker's units. The tracker is
    /// defunct afterwards; a dylib whose default tracker was removed gets a
    /// fresh one.
    pub(crate) fn remove_tracker(&self, tracker: TrackerId) -> Result<(), EngineError> {
        let unloaded = {
            let mut state = self.state.lock();
            let dylib = state.live_tracker(tracker)?;

            while state
                .units
                .values()
                .any(|u| u.tracker == tracker && u.status == UnitStatus::Pending)
            {
                self.materialized.wait(&mut state);
            }

            let unit_ids: Vec<UnitId> = state
                .units
                .iter()
                .filter(|(_, u)| u.tracker == tracker)
                .map(|(id, _)| *id)
                .collect();
            let mut unloaded = Vec::with_capacity(unit_ids.len());
            for id in unit_ids {
                if let Some(mut record) = state.units.remove(&id) {
                    let symbols = &mut state.dylibs[record.dylib.0].symbols;
                    for symbol in &record.symbols {
                        symbols.remove(symbol);
                    }
                    unloaded.extend(record.object.take());
                }
            }
            state.dylibs[dylib.0]
                .symbols
                .retain(|_, entry| entry.owner != SymbolOwner::Absolute(tracker));

            if let Some(t) = state.trackers.get_mut(&tracker) {
                t.defunct = true;
            }
            if state.dylibs[dylib.0].default_tracker == tracker {
                let fresh = state.new_tracker(dylib);
                state.dylibs[dylib.0].default_tracker = fresh;
            }
            unloaded
        };

        debug!(?tracker, units = unloaded.len(), "removed resource tracker");
        // Code is unmapped outside the lock.
        drop(unloaded);
        Ok(())
    }

    // -- Definitions --

    /// Register symbols with fixed addresses.
    pub fn define_absolute(
        &self,
        tracker: &ResourceTracker,
        symbols: impl IntoIterator<Item = (SymbolStringPtr, ExecutorSymbolDef)>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(EngineError::SessionEnded);
        }
        let dylib = state.live_tracker(tracker.id())?;
        let symbols: Vec<_> = symbols.into_iter().collect();
        let table = &mut state.dylibs[dylib.0].symbols;
        if let Some((name, _)) = symbols.iter().find(|(name, _)| table.contains_key(name)) {
            return Err(EngineError::DuplicateDefinition {
                unit: "<absolute>".to_string(),
                symbol: name.to_string(),
            });
        }
        for (name, def) in symbols {
            trace!(%name, address = %def.address, "defined absolute symbol");
            table.insert(
                name,
                SymbolEntry {
                    state: SymbolState::Ready(def),
                    flags: def.flags | JitSymbolFlags::ABSOLUTE,
                    owner: SymbolOwner::Absolute(tracker.id()),
                },
            );
        }
        Ok(())
    }

    /// Claim a unit's symbols as pending.
    ///
    /// Fails without side effects if the unit redefines a symbol or needs one
    /// nothing can provide.
    pub(crate) fn register_unit(
        &self,
        tracker: TrackerId,
        interface: &UnitInterface,
    ) -> Result<(UnitId, DylibId), EngineError> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(EngineError::SessionEnded);
        }
        let dylib_id = state.live_tracker(tracker)?;
        let dylib = &mut state.dylibs[dylib_id.0];

        // Symbols of a unit that failed to materialize may be defined again.
        if let Some((symbol, _)) = interface.defines.iter().find(|(symbol, _)| {
            dylib
                .symbols
                .get(symbol)
                .is_some_and(|entry| !matches!(entry.state, SymbolState::Failed(_)))
        }) {
            return Err(EngineError::DuplicateDefinition {
                unit: interface.name.clone(),
                symbol: symbol.to_string(),
            });
        }

        for symbol in &interface.externals {
            if !dylib.symbols.contains_key(symbol) && dylib.generate(symbol).is_none() {
                return Err(EngineError::UnresolvedExternal {
                    unit: interface.name.clone(),
                    symbol: symbol.to_string(),
                });
            }
        }

        let id = UnitId(state.next_unit);
        state.next_unit += 1;

        let symbols = &mut state.dylibs[dylib_id.0].symbols;
        let mut evicted = Vec::new();
        for (symbol, flags) in &interface.defines {
            let previous = symbols.insert(
                symbol.clone(),
                SymbolEntry {
                    state: SymbolState::Pending,
                    flags: *flags,
                    owner: SymbolOwner::Unit(id),
                },
            );
            if let Some(SymbolEntry {
                owner: SymbolOwner::Unit(owner),
                ..
            }) = previous
            {
                evicted.push((owner, symbol.clone()));
            }
        }
        // The failed unit no longer owns what it lost, so removing its
        // tracker leaves the new definitions alone.
        for (owner, symbol) in evicted {
            trace!(%symbol, ?owner, "redefining failed symbol");
            if let Some(record) = state.units.get_mut(&owner) {
                record.symbols.retain(|s| *s != symbol);
            }
        }
        state.units.insert(
            id,
            UnitRecord {
                name: interface.name.clone(),
                dylib: dylib_id,
                tracker,
                symbols: interface.defines.iter().map(|(s, _)| s.clone()).collect(),
                status: UnitStatus::Pending,
                object: None,
            },
        );
        debug!(unit = %interface.name, ?id, symbols = interface.defines.len(), "registered unit");
        Ok((id, dylib_id))
    }

    /// Publish the outcome of compiling a unit and wake every waiter.
    pub(crate) fn complete_unit(
        &self,
        unit: UnitId,
        outcome: Result<(Vec<(SymbolStringPtr, ExecutorSymbolDef)>, LoadedObject), String>,
    ) {
        let failure = {
            let mut state = self.state.lock();
            let Some(record) = state.units.get_mut(&unit) else {
                return;
            };
            let dylib = record.dylib;
            match outcome {
                Ok((defs, object)) => {
                    record.status = UnitStatus::Ready;
                    record.object = Some(object);
                    let symbols = &mut state.dylibs[dylib.0].symbols;
                    for (symbol, def) in defs {
                        if let Some(entry) = symbols.get_mut(&symbol) {
                            entry.state = SymbolState::Ready(def);
                        }
                    }
                    None
                }
                Err(message) => {
                    record.status = UnitStatus::Failed(message.clone());
                    let owned = record.symbols.clone();
                    let name = record.name.clone();
                    let symbols = &mut state.dylibs[dylib.0].symbols;
                    for symbol in &owned {
                        if let Some(entry) = symbols.get_mut(symbol) {
                            entry.state = SymbolState::Failed(message.clone());
                        }
                    }
                    Some(EngineError::Compile {
                        unit: name,
                        message,
                    })
                }
            }
        };

        self.materialized.notify_all();
        if let Some(err) = failure {
            self.report_error(&err);
        }
    }

    // -- Lookup --

    /// Resolve `symbol` in `dylib`, blocking while it is pending.
    pub fn lookup(
        &self,
        dylib: &JitDylib,
        symbol: &SymbolStringPtr,
    ) -> Result<ExecutorSymbolDef, EngineError> {
        let mut state = self.state.lock();
        loop {
            let dylib_state = &mut state.dylibs[dylib.id().0];
            match dylib_state.symbols.get(symbol).map(|e| &e.state) {
                Some(SymbolState::Ready(def)) => return Ok(*def),
                Some(SymbolState::Failed(message)) => {
                    return Err(EngineError::MaterializationFailed {
                        symbol: symbol.to_string(),
                        message: message.clone(),
                    })
                }
                Some(SymbolState::Pending) => {
                    trace!(%symbol, "waiting for materialization");
                    self.materialized.wait(&mut state);
                }
                None => {
                    return dylib_state
                        .generate(symbol)
                        .ok_or_else(|| EngineError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                }
            }
        }
    }

    // -- Teardown --

    /// Stop accepting definitions. Returns `false` if already ended.
    pub(crate) fn begin_end(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.ended, true)
    }

    /// Unload every unit and clear every dylib.
    pub(crate) fn clear(&self) {
        let unloaded: Vec<LoadedObject> = {
            let mut state = self.lock_for_clear();
            for dylib in &mut state.dylibs {
                dylib.symbols.clear();
                dylib.generators.clear();
            }
            std::mem::take(&mut state.units)
                .into_values()
                .filter_map(|mut record| record.object.take())
                .collect()
        };
        debug!(units = unloaded.len(), "unloading session");
        drop(unloaded);
        self.pool.clear_dead_entries();
    }

    fn lock_for_clear(&self) -> MutexGuard<'_, SessionState> {
        let mut state = self.state.lock();
        // Nothing can still be compiling once the workers are joined, but a
        // worker that died mid-unit leaves it pending forever; fail it here.
        for record in state.units.values_mut() {
            if record.status == UnitStatus::Pending {
                record.status = UnitStatus::Failed("session ended".to_string());
            }
        }
        self.materialized.notify_all();
        state
    }

    // -- Introspection --

    /// Text rendering of every dylib, symbol, unit, and tracker.
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "ExecutionSession ({}){}",
            plural(state.units.len(), "unit"),
            if state.ended { " [ended]" } else { "" }
        );

        for dylib in &state.dylibs {
            let _ = writeln!(
                out,
                "  JITDylib \"{}\" (default tracker {})",
                dylib.handle.name(),
                dylib.default_tracker.0
            );
            let generators: Vec<&str> = dylib.generators.iter().map(|g| g.name()).collect();
            if !generators.is_empty() {
                let _ = writeln!(out, "    generators: {}", generators.join(", "));
            }
            let mut symbols: Vec<_> = dylib.symbols.iter().collect();
            symbols.sort_by(|a, b| a.0.cmp(b.0));
            for (name, entry) in symbols {
                let state_str = match &entry.state {
                    SymbolState::Pending => "pending".to_string(),
                    SymbolState::Ready(def) => format!("ready {}", def.address),
                    SymbolState::Failed(_) => "failed".to_string(),
                };
                let owner = match entry.owner {
                    SymbolOwner::Unit(id) => state
                        .units
                        .get(&id)
                        .map_or_else(|| "unit ?".to_string(), |u| format!("unit {}", u.name)),
                    SymbolOwner::Absolute(t) => format!("absolute, tracker {}", t.0),
                    SymbolOwner::Generated => "generated".to_string(),
                };
                let _ = writeln!(out, "    {name}: {state_str} {} ({owner})", entry.flags);
            }
        }

        for (id, unit) in &state.units {
            let status = match &unit.status {
                UnitStatus::Pending => "pending".to_string(),
                UnitStatus::Ready => "ready".to_string(),
                UnitStatus::Failed(message) => format!("failed: {message}"),
            };
            let names: Vec<&str> = unit.symbols.iter().map(SymbolStringPtr::as_str).collect();
            let _ = writeln!(
                out,
                "  unit #{} {} [{status}] tracker {} dylib {}: {}",
                id.0,
                unit.name,
                unit.tracker.0,
                state.dylibs[unit.dylib.0].handle.name(),
                names.join(", ")
            );
        }
        out
    }
}

impl Default for ExecutionSession {
    fn default() -> Self {
        Self::new()
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
