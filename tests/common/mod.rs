//! Shared harness for integration tests: an instrumented kernel wrapper and
//! state builders.
#![allow(dead_code)]

use cad_mcp::kernel::{GeometryKernel, KernelOp, KernelOutcome, PlanarKernel};
use cad_mcp::session::KernelFactory;
use cad_mcp::state::AppState;
use cad_mcp::{ServerConfig, TransportKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps the planar backend, counting calls and flagging any overlapping
/// `execute` on the same backend instance. One instance serves one session,
/// so a raised overlap flag means the per-session serialization broke.
pub struct ProbeKernel {
    inner: PlanarKernel,
    native_rectangles: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: AtomicBool,
    overlap: Arc<AtomicBool>,
}

impl GeometryKernel for ProbeKernel {
    fn name(&self) -> &str {
        "probe"
    }

    fn supports_rectangles(&self) -> bool {
        self.native_rectangles
    }

    fn execute(&mut self, op: KernelOp) -> KernelOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let result = self.inner.execute(op);
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Shared view into every probe created by a factory.
#[derive(Clone, Default)]
pub struct ProbeStats {
    calls: Arc<AtomicUsize>,
    overlaps: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ProbeStats {
    pub fn kernel_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// True when any session observed a second execute starting before the
    /// first returned.
    pub fn any_overlap(&self) -> bool {
        self.overlaps
            .lock()
            .iter()
            .any(|flag| flag.load(Ordering::SeqCst))
    }
}

pub fn probe_factory(stats: &ProbeStats, delay: Option<Duration>) -> KernelFactory {
    probe_factory_with(stats, delay, true)
}

pub fn probe_factory_with(
    stats: &ProbeStats,
    delay: Option<Duration>,
    native_rectangles: bool,
) -> KernelFactory {
    let stats = stats.clone();
    Arc::new(move || {
        let overlap = Arc::new(AtomicBool::new(false));
        stats.overlaps.lock().push(overlap.clone());
        Box::new(ProbeKernel {
            inner: PlanarKernel::new(),
            native_rectangles,
            delay,
            calls: stats.calls.clone(),
            in_flight: AtomicBool::new(false),
            overlap,
        })
    })
}

pub fn test_config() -> Arc<ServerConfig> {
    Arc::new(ServerConfig {
        transport: TransportKind::Stdio,
        ..ServerConfig::default()
    })
}

pub fn planar_state() -> Arc<AppState> {
    Arc::new(AppState::new(test_config()))
}

pub fn probed_state(stats: &ProbeStats, delay: Option<Duration>) -> Arc<AppState> {
    Arc::new(AppState::with_kernel_factory(
        test_config(),
        probe_factory(stats, delay),
    ))
}
