//! Geometry kernel boundary.
//!
//! The server treats the kernel as an opaque capability: every geometric
//! construction goes through [`GeometryKernel::execute`] with a tagged
//! operation and comes back as a normalized [`KernelResult`]. Backends own
//! their shape state and hand out opaque [`ShapeHandle`]s; the entity graph
//! threads handles into later operations without ever inspecting them.
//!
//! Backends are not assumed thread-safe, so every session owns its own
//! backend instance produced by a factory. Calls are synchronous and must
//! never be retried: a mutating kernel call is not idempotent.

mod adapter;
mod planar;

pub use adapter::KernelAdapter;
pub use planar::PlanarKernel;

use crate::model::{
    BooleanKind, BoundingBox, ElementGeometry, ElementProfile, ExtrudeDirection, MeshPayload,
    PlaneFrame, PlaneType,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Opaque kernel-owned reference to a plane, sketch, curve, or solid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeHandle(pub String);

impl ShapeHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel operations, mirroring the dispatcher's operation catalog. All
/// entity references have already been resolved to shape handles.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelOp {
    CreatePlane {
        plane_type: PlaneType,
        origin: [f64; 3],
    },
    CreateSketch {
        plane: ShapeHandle,
    },
    AddElement {
        sketch: ShapeHandle,
        geometry: ElementGeometry,
    },
    AddFillet {
        sketch: ShapeHandle,
        element1: ShapeHandle,
        element2: ShapeHandle,
        radius: f64,
    },
    Extrude {
        sketch: ShapeHandle,
        element: Option<ShapeHandle>,
        distance: f64,
        direction: ExtrudeDirection,
    },
    Boolean {
        kind: BooleanKind,
        target: ShapeHandle,
        tool: ShapeHandle,
    },
    Tessellate {
        shape: ShapeHandle,
        quality: f64,
    },
}

/// Normalized result of a kernel call. Fields are populated per operation:
/// plane/sketch ops carry a frame, element ops a profile, solid-producing
/// ops a mesh and bounding box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelResult {
    pub shape: Option<ShapeHandle>,
    pub mesh: Option<MeshPayload>,
    pub bounding_box: Option<BoundingBox>,
    pub frame: Option<PlaneFrame>,
    pub profile: Option<ElementProfile>,
    /// True when the backend consumed the boolean tool shape destructively.
    pub tool_consumed: bool,
}

/// Kernel-side failure, classified by the adapter into the server taxonomy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("kernel unavailable: {0}")]
    Unavailable(String),

    #[error("kernel timeout: {0}")]
    Timeout(String),
}

pub type KernelOutcome = Result<KernelResult, KernelError>;

/// The kernel capability consumed by the dispatcher.
///
/// `execute` takes `&mut self`: a backend serves exactly one session, whose
/// operation serialization guarantees at most one in-flight call.
pub trait GeometryKernel: Send {
    /// Backend name for diagnostics and session info.
    fn name(&self) -> &str;

    /// Whether the backend can serve geometry requests at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Whether the backend accepts rectangle elements natively. When false
    /// the adapter expands rectangles into a closed polyline before the call.
    fn supports_rectangles(&self) -> bool {
        false
    }

    fn execute(&mut self, op: KernelOp) -> KernelOutcome;

    /// Drop all backend state for the owning session. Infallible: used by
    /// `clear_all` and session teardown, which always succeed.
    fn reset(&mut self);
}

/// Export formats of the external file-export collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExportFormat {
    Step,
    Stl,
    Obj,
    Iges,
}

/// Boundary of the export collaborator: given a feature's shape handle,
/// produce encoded bytes. Encoders live outside this crate.
pub trait ShapeExporter: Send + Sync {
    fn export(&self, shape: &ShapeHandle, format: ExportFormat) -> Result<Vec<u8>, KernelError>;
}

/// Backend that reports unavailability for every request. Used when the
/// server is configured without a geometry backend.
#[derive(Debug, Default)]
pub struct NullKernel;

impl GeometryKernel for NullKernel {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn execute(&mut self, _op: KernelOp) -> KernelOutcome {
        Err(KernelError::Unavailable(
            "no geometry backend configured".into(),
        ))
    }

    fn reset(&mut self) {}
}
