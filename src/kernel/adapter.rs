//! Normalizing wrapper around a geometry backend.
//!
//! The adapter owns one backend instance per session. Its job is narrow by
//! design: shape the operation for the backend (rectangle expansion when the
//! backend lacks native rectangle support), execute exactly once, and map
//! backend failures into the server's error taxonomy. CAD semantics are
//! validated by the dispatcher before any call lands here, and nothing is
//! retried afterwards: mutating kernel calls are not idempotent.

use super::{GeometryKernel, KernelError, KernelOp, KernelResult};
use crate::error::{CadError, CadResult};
use crate::model::ElementGeometry;
use tracing::debug;

pub struct KernelAdapter {
    backend: Box<dyn GeometryKernel>,
}

impl KernelAdapter {
    pub fn new(backend: Box<dyn GeometryKernel>) -> Self {
        KernelAdapter { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn execute(&mut self, op: KernelOp) -> CadResult<KernelResult> {
        let op = self.normalize(op);
        debug!(backend = self.backend.name(), ?op, "kernel execute");
        self.backend.execute(op).map_err(classify)
    }

    /// Drop all backend state; used by clear_all and session teardown.
    pub fn reset(&mut self) {
        self.backend.reset();
    }

    /// Expand rectangle sugar into the backend's line-based representation
    /// when it has no native rectangle primitive. Exactly one element handle
    /// comes back either way, so the entity graph keeps one rectangle entity.
    fn normalize(&self, op: KernelOp) -> KernelOp {
        match op {
            KernelOp::AddElement {
                sketch,
                geometry:
                    ElementGeometry::Rectangle {
                        corner,
                        width,
                        height,
                    },
            } if !self.backend.supports_rectangles() => KernelOp::AddElement {
                sketch,
                geometry: ElementGeometry::Polyline {
                    points: vec![
                        corner,
                        [corner[0] + width, corner[1]],
                        [corner[0] + width, corner[1] + height],
                        [corner[0], corner[1] + height],
                    ],
                    closed: true,
                },
            },
            other => other,
        }
    }
}

fn classify(error: KernelError) -> CadError {
    match error {
        KernelError::InvalidGeometry(message) => CadError::InvalidGeometry(message),
        KernelError::Unsupported(message) => CadError::UnsupportedOperation(message),
        KernelError::Unavailable(message) => CadError::KernelUnavailable(message),
        KernelError::Timeout(message) => CadError::Timeout(message),
    }
}
