//! Application state shared by all transports.

use crate::config::{KernelBackend, ServerConfig};
use crate::dispatch::{self, Operation, OperationOutcome};
use crate::error::CadResult;
use crate::kernel::{GeometryKernel, NullKernel, PlanarKernel};
use crate::publish::VisualizationPublisher;
use crate::session::{KernelFactory, SessionRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct AppState {
    config: Arc<ServerConfig>,
    sessions: SessionRegistry,
    publisher: VisualizationPublisher,
    /// Operations dispatched since startup, across all sessions.
    operations: AtomicU64,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let factory = kernel_factory(config.kernel_backend);
        Self::with_kernel_factory(config, factory)
    }

    /// Build state with a custom kernel factory; tests inject instrumented
    /// backends this way.
    pub fn with_kernel_factory(config: Arc<ServerConfig>, factory: KernelFactory) -> Self {
        let sessions = SessionRegistry::new(factory, config.max_sessions);
        AppState {
            config,
            sessions,
            publisher: VisualizationPublisher::new(),
            operations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn publisher(&self) -> &VisualizationPublisher {
        &self.publisher
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Route one operation into its session, creating the session on first
    /// reference.
    pub async fn apply(&self, session_id: &str, op: Operation) -> CadResult<OperationOutcome> {
        let session = self.sessions.get_or_create(session_id)?;
        self.operations.fetch_add(1, Ordering::Relaxed);
        let outcome = dispatch::apply(&session, &self.publisher, op).await;
        crate::metrics::METRICS.set_active_sessions(self.sessions.active_count());
        outcome
    }
}

fn kernel_factory(backend: KernelBackend) -> KernelFactory {
    match backend {
        KernelBackend::Planar => Arc::new(|| Box::new(PlanarKernel::new()) as Box<dyn GeometryKernel>),
        KernelBackend::Null => Arc::new(|| Box::new(NullKernel) as Box<dyn GeometryKernel>),
    }
}
