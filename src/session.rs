//! Session lifecycle.
//!
//! A session owns exactly one entity graph and one kernel adapter, both
//! behind a single async mutex: the dispatcher holds that lock for the full
//! validate / execute / commit / publish span, which is what serializes
//! operations within a session. The registry map has its own lock,
//! independent of any session's lock, so creating or destroying session B
//! never blocks an operation running in session A.

use crate::error::{CadError, CadResult};
use crate::graph::EntityGraph;
use crate::kernel::{GeometryKernel, KernelAdapter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Produces one kernel backend per session; backends are not assumed
/// thread-safe across sessions, so they are never shared.
pub type KernelFactory = Arc<dyn Fn() -> Box<dyn GeometryKernel> + Send + Sync>;

/// Mutable state of one session, guarded by the session lock.
pub struct SessionState {
    pub graph: EntityGraph,
    pub kernel: KernelAdapter,
}

pub struct SessionHandle {
    id: String,
    created_at: i64,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new(id: String, kernel: Box<dyn GeometryKernel>) -> Self {
        SessionHandle {
            id,
            created_at: crate::model::timestamp_now(),
            state: Mutex::new(SessionState {
                graph: EntityGraph::new(),
                kernel: KernelAdapter::new(kernel),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// The per-session serialization lock. Held for the full duration of an
    /// operation, including the synchronous kernel call.
    pub fn state(&self) -> &Mutex<SessionState> {
        &self.state
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    kernel_factory: KernelFactory,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(kernel_factory: KernelFactory, max_sessions: usize) -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            kernel_factory,
            max_sessions,
        }
    }

    /// Idempotent lookup-or-create. A destroyed session ID gets a fresh
    /// graph and kernel on its next reference; old entities never resurrect.
    pub fn get_or_create(&self, session_id: &str) -> CadResult<Arc<SessionHandle>> {
        if let Some(existing) = self.sessions.read().get(session_id) {
            return Ok(existing.clone());
        }

        let mut sessions = self.sessions.write();
        // Double-checked: another caller may have created it between locks.
        if let Some(existing) = sessions.get(session_id) {
            return Ok(existing.clone());
        }
        if sessions.len() >= self.max_sessions {
            return Err(CadError::invalid_params(format!(
                "session limit reached ({} active)",
                sessions.len()
            )));
        }
        let handle = Arc::new(SessionHandle::new(
            session_id.to_string(),
            (self.kernel_factory)(),
        ));
        sessions.insert(session_id.to_string(), handle.clone());
        info!(session_id, "session created");
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> CadResult<Arc<SessionHandle>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| CadError::SessionNotFound(session_id.to_string()))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Drop the registry's reference to a session. An operation already
    /// holding the handle finishes against the orphaned state; the kernel
    /// backend is released when the last reference goes away.
    pub fn destroy(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            debug!(session_id, "session destroyed");
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}
