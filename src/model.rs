//! Shared data model: entity identifiers, geometry payloads, and the
//! response types returned by the MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier of an entity in a session's graph, e.g. `plane_1`, `sketch_2`.
///
/// The numeric suffix is one monotonic counter per session, shared across all
/// entity kinds so that IDs give a total creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

/// Entity kinds. The display form doubles as the ID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Plane,
    Sketch,
    Element,
    Fillet,
    Feature,
}

impl EntityKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::Plane => "plane",
            EntityKind::Sketch => "sketch",
            EntityKind::Element => "element",
            EntityKind::Fillet => "fillet",
            EntityKind::Feature => "feature",
        }
    }
}

/// Base plane orientation for sketching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum PlaneType {
    Xy,
    Xz,
    Yz,
}

impl PlaneType {
    /// Local frame of the plane: (normal, u axis, v axis).
    pub fn axes(&self) -> ([f64; 3], [f64; 3], [f64; 3]) {
        match self {
            PlaneType::Xy => ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            PlaneType::Xz => ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            PlaneType::Yz => ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        }
    }
}

/// Boolean operation kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BooleanKind {
    Union,
    Cut,
    Intersect,
}

/// Sketch element kinds accepted by `add_sketch_element`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElementKind {
    Line,
    Circle,
    Rectangle,
}

/// Extrusion direction relative to the sketch plane normal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExtrudeDirection {
    #[default]
    Normal,
    Reverse,
}

/// 2D geometry of a sketch element, in sketch-plane coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementGeometry {
    Line {
        start: [f64; 2],
        end: [f64; 2],
    },
    Circle {
        center: [f64; 2],
        radius: f64,
    },
    /// One canonical entity per rectangle, regardless of how the kernel
    /// represents it internally.
    Rectangle {
        corner: [f64; 2],
        width: f64,
        height: f64,
    },
    /// Closed or open polyline; produced when a rectangle is expanded for a
    /// backend without native rectangle support.
    Polyline { points: Vec<[f64; 2]>, closed: bool },
}

impl ElementGeometry {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementGeometry::Line { .. } => ElementKind::Line,
            ElementGeometry::Circle { .. } => ElementKind::Circle,
            ElementGeometry::Rectangle { .. } | ElementGeometry::Polyline { .. } => {
                ElementKind::Rectangle
            }
        }
    }
}

/// Triangle mesh in the wire format the viewer consumes: flat vertex,
/// index, and normal arrays plus tessellation metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MeshPayload {
    pub vertices: Vec<f64>,
    pub faces: Vec<u32>,
    pub normals: Vec<f64>,
    pub metadata: MeshMetadata,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MeshMetadata {
    pub vertex_count: usize,
    pub face_count: usize,
    pub tessellation_quality: f64,
}

impl MeshPayload {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.faces.len() / 3
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn from_vertices(vertices: &[f64]) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for chunk in vertices.chunks_exact(3) {
            for axis in 0..3 {
                min[axis] = min[axis].min(chunk[axis]);
                max[axis] = max[axis].max(chunk[axis]);
            }
        }
        Some(BoundingBox { min, max })
    }

    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// A box is degenerate when it encloses zero volume.
    pub fn is_degenerate(&self) -> bool {
        self.extent().iter().any(|side| *side <= 0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].min(other.min[axis]);
            max[axis] = max[axis].max(other.max[axis]);
        }
        BoundingBox { min, max }
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].max(other.min[axis]);
            max[axis] = max[axis].min(other.max[axis]);
            if min[axis] >= max[axis] {
                return None;
            }
        }
        Some(BoundingBox { min, max })
    }
}

/// Local coordinate frame of a plane or sketch, as sent to the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlaneFrame {
    pub origin: [f64; 3],
    pub normal: [f64; 3],
    pub u_axis: [f64; 3],
    pub v_axis: [f64; 3],
    /// Grid size hint for viewport rendering.
    pub size: f64,
}

impl PlaneFrame {
    pub fn new(plane_type: PlaneType, origin: [f64; 3]) -> Self {
        let (normal, u_axis, v_axis) = plane_type.axes();
        PlaneFrame {
            origin,
            normal,
            u_axis,
            v_axis,
            size: 100.0,
        }
    }
}

/// Segment of a 2D profile, for sketch element visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProfileSegment {
    Line {
        start: [f64; 2],
        end: [f64; 2],
    },
    Arc {
        center: [f64; 2],
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Circle {
        center: [f64; 2],
        radius: f64,
    },
}

/// 2D profile of one or more sketch elements in plane coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ElementProfile {
    pub segments: Vec<ProfileSegment>,
    pub closed: bool,
}

/// Event delivered to a session's visualization sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum VisualizationEvent {
    /// New or refreshed renderable data for a single entity.
    VisualizationData(VisualizationPayload),
    /// Incremental change to previously published entities.
    GeometryUpdate(GeometryDelta),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisualizationPayload {
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<PlaneFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ElementProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_data: Option<MeshPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometryDelta {
    /// Entities removed from the session.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub removed: Vec<EntityId>,
    /// Tool entities consumed by a boolean operation; still inspectable but
    /// no longer selectable as operands.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub consumed: Vec<EntityId>,
}

// ============================================================================
// Tool responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateSketchPlaneResponse {
    pub session_id: String,
    pub plane_id: EntityId,
    pub plane_type: PlaneType,
    pub origin: [f64; 3],
    pub visualization: PlaneFrame,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateSketchResponse {
    pub session_id: String,
    pub sketch_id: EntityId,
    pub plane_id: EntityId,
    pub visualization: PlaneFrame,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddSketchElementResponse {
    pub session_id: String,
    pub sketch_id: EntityId,
    pub element_id: EntityId,
    pub element_type: ElementKind,
    pub visualization: ElementProfile,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddFilletResponse {
    pub session_id: String,
    pub sketch_id: EntityId,
    pub fillet_id: EntityId,
    pub element1_id: EntityId,
    pub element2_id: EntityId,
    pub radius: f64,
    pub visualization: ElementProfile,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtrudeFeatureResponse {
    pub session_id: String,
    pub feature_id: EntityId,
    pub source_sketch_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_element_id: Option<EntityId>,
    pub distance: f64,
    pub direction: ExtrudeDirection,
    pub mesh_data: MeshPayload,
    pub bounding_box: BoundingBox,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BooleanOperationResponse {
    pub session_id: String,
    pub feature_id: EntityId,
    pub operation_type: BooleanKind,
    pub target_id: EntityId,
    pub tool_id: EntityId,
    pub tool_consumed: bool,
    pub mesh_data: MeshPayload,
    pub bounding_box: BoundingBox,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TessellateResponse {
    pub session_id: String,
    pub model_id: EntityId,
    pub mesh_data: MeshPayload,
    pub bounding_box: BoundingBox,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoveEntityResponse {
    pub session_id: String,
    pub removed: Vec<EntityId>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearSessionResponse {
    pub session_id: String,
    pub removed_count: usize,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityDescriptor {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub consumed: bool,
    pub has_shape: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListEntitiesResponse {
    pub session_id: String,
    pub entities: Vec<EntityDescriptor>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfoResponse {
    pub session_id: String,
    pub entity_count: usize,
    pub plane_ids: Vec<EntityId>,
    pub sketch_ids: Vec<EntityId>,
    pub feature_ids: Vec<EntityId>,
    pub kernel_backend: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteSessionResponse {
    pub session_id: String,
    pub removed: bool,
    pub timestamp: i64,
}

pub fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_type_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(PlaneType::from_str("XY").unwrap(), PlaneType::Xy);
        assert_eq!(PlaneType::from_str("yz").unwrap(), PlaneType::Yz);
        assert_eq!(PlaneType::Xz.to_string(), "XZ");
        assert!(PlaneType::from_str("XW").is_err());
    }

    #[test]
    fn bounding_box_degeneracy() {
        let flat = BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [10.0, 5.0, 0.0],
        };
        assert!(flat.is_degenerate());

        let solid = BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [10.0, 5.0, 3.0],
        };
        assert!(!solid.is_degenerate());
    }

    #[test]
    fn bounding_box_intersection() {
        let a = BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [10.0, 10.0, 10.0],
        };
        let b = BoundingBox {
            min: [5.0, 5.0, 5.0],
            max: [15.0, 15.0, 15.0],
        };
        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap.min, [5.0, 5.0, 5.0]);
        assert_eq!(overlap.max, [10.0, 10.0, 10.0]);

        let c = BoundingBox {
            min: [20.0, 20.0, 20.0],
            max: [30.0, 30.0, 30.0],
        };
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn visualization_event_wire_format() {
        let event = VisualizationEvent::GeometryUpdate(GeometryDelta {
            removed: vec![EntityId::from("feature_4")],
            consumed: vec![],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "geometry_update");
        assert_eq!(json["payload"]["removed"][0], "feature_4");
    }
}
