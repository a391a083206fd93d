//! Resource Trackers
//!
//! A tracker names the code and symbols added under it so they can be
//! removed together. Every dylib has a default tracker for submissions that
//! do not name one.

use std::fmt;
use std::sync::Arc;

use super::dylib::JitDylib;
use super::error::EngineError;
use super::session::{ExecutionSession, TrackerId};

#[derive(Clone)]
pub struct ResourceTracker {
    session: Arc<ExecutionSession>,
    id: TrackerId,
    dylib: JitDylib,
}

impl ResourceTracker {
    pub(crate) fn new(session: Arc<ExecutionSession>, id: TrackerId, dylib: JitDylib) -> Self {
        Self { session, id, dylib }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// Dylib this tracker adds definitions to.
    pub fn dylib(&self) -> &JitDylib {
        &self.dylib
    }

    pub fn is_defunct(&self) -> bool {
        self.session.is_tracker_defunct(self.id)
    }

    /// Unload every unit and symbol added under this tracker.
    ///
    /// Blocks until any of the tracker's units still compiling are done.
    pub fn remove(&self) -> Result<(), EngineError> {
        self.session.remove_tracker(self.id)
    }
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("id", &self.id)
            .field("dylib", &self.dylib)
            .finish()
    }
}
