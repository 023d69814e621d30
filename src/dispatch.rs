//! Operation dispatcher: the per-session modeling state machine.
//!
//! Every operation moves through validate → execute → commit → publish under
//! the session's lock. Validation runs purely against the entity graph and
//! never touches the kernel; the graph is committed only after the kernel
//! call succeeds, so a failure at any stage leaves the graph exactly as it
//! was. The visualization payload produced by the commit is handed to the
//! publisher and also returned to the direct caller.

use crate::error::{CadError, CadResult};
use crate::graph::{EntityInit, EntitySpec, FeatureKind};
use crate::kernel::KernelOp;
use crate::model::{
    BooleanKind, BoundingBox, ElementGeometry, ElementKind, ElementProfile, EntityId, EntityKind,
    ExtrudeDirection, GeometryDelta, MeshPayload, PlaneFrame, PlaneType, VisualizationEvent,
    VisualizationPayload,
};
use crate::publish::VisualizationPublisher;
use crate::session::{SessionHandle, SessionState};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_TESSELLATION_QUALITY: f64 = 0.1;
pub const MIN_TESSELLATION_QUALITY: f64 = 0.001;
pub const MAX_TESSELLATION_QUALITY: f64 = 1.0;

/// The operation catalog, one variant per modeling request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateSketchPlane {
        plane_type: PlaneType,
        origin: Option<[f64; 3]>,
    },
    CreateSketch {
        plane_id: EntityId,
    },
    AddSketchElement {
        sketch_id: EntityId,
        geometry: ElementGeometry,
    },
    AddFillet {
        sketch_id: EntityId,
        element1_id: EntityId,
        element2_id: EntityId,
        radius: f64,
    },
    ExtrudeFeature {
        sketch_id: EntityId,
        element_id: Option<EntityId>,
        distance: f64,
        direction: ExtrudeDirection,
    },
    BooleanOperation {
        op: BooleanKind,
        target_id: EntityId,
        tool_id: EntityId,
    },
    TessellateModel {
        model_id: EntityId,
        quality: Option<f64>,
    },
    RemoveEntity {
        entity_id: EntityId,
        cascade: bool,
    },
    ClearAll,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateSketchPlane { .. } => "create_sketch_plane",
            Operation::CreateSketch { .. } => "create_sketch",
            Operation::AddSketchElement { .. } => "add_sketch_element",
            Operation::AddFillet { .. } => "add_fillet",
            Operation::ExtrudeFeature { .. } => "extrude_feature",
            Operation::BooleanOperation { .. } => "boolean_operation",
            Operation::TessellateModel { .. } => "tessellate_model",
            Operation::RemoveEntity { .. } => "remove_entity",
            Operation::ClearAll => "clear_all",
        }
    }
}

/// Result of a committed operation, carrying the data each tool response
/// and visualization event is built from.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    PlaneCreated {
        plane_id: EntityId,
        plane_type: PlaneType,
        origin: [f64; 3],
        frame: PlaneFrame,
    },
    SketchCreated {
        sketch_id: EntityId,
        plane_id: EntityId,
        frame: PlaneFrame,
    },
    ElementAdded {
        sketch_id: EntityId,
        element_id: EntityId,
        element_type: ElementKind,
        profile: ElementProfile,
    },
    FilletAdded {
        sketch_id: EntityId,
        fillet_id: EntityId,
        element1_id: EntityId,
        element2_id: EntityId,
        radius: f64,
        profile: ElementProfile,
    },
    FeatureExtruded {
        feature_id: EntityId,
        sketch_id: EntityId,
        element_id: Option<EntityId>,
        distance: f64,
        direction: ExtrudeDirection,
        mesh: MeshPayload,
        bounding_box: BoundingBox,
    },
    BooleanApplied {
        feature_id: EntityId,
        op: BooleanKind,
        target_id: EntityId,
        tool_id: EntityId,
        tool_consumed: bool,
        mesh: MeshPayload,
        bounding_box: BoundingBox,
    },
    Tessellated {
        model_id: EntityId,
        mesh: MeshPayload,
        bounding_box: BoundingBox,
    },
    EntityRemoved {
        removed: Vec<EntityId>,
    },
    Cleared {
        removed: Vec<EntityId>,
    },
}

/// Run one operation against a session, serialized by the session lock for
/// the full validate / execute / commit / publish span.
pub async fn apply(
    session: &Arc<SessionHandle>,
    publisher: &VisualizationPublisher,
    op: Operation,
) -> CadResult<OperationOutcome> {
    let op_name = op.name();
    let mut state = session.state().lock().await;
    debug!(session_id = session.id(), op = op_name, "operation start");

    let outcome = execute_locked(&mut state, op)?;
    for event in events_for(&outcome) {
        publisher.publish(session.id(), event);
    }

    info!(session_id = session.id(), op = op_name, "operation committed");
    Ok(outcome)
}

fn execute_locked(state: &mut SessionState, op: Operation) -> CadResult<OperationOutcome> {
    match op {
        Operation::CreateSketchPlane { plane_type, origin } => {
            let origin = origin.unwrap_or([0.0, 0.0, 0.0]);
            let result = state.kernel.execute(KernelOp::CreatePlane { plane_type, origin })?;
            let handle = expect_shape(result.shape)?;
            let frame = result
                .frame
                .unwrap_or_else(|| PlaneFrame::new(plane_type, origin));

            let plane_id = state.graph.add_entity(
                EntityInit::new(None, EntitySpec::Plane { plane_type, origin })
                    .with_handle(Some(handle)),
            )?;
            Ok(OperationOutcome::PlaneCreated {
                plane_id,
                plane_type,
                origin,
                frame,
            })
        }

        Operation::CreateSketch { plane_id } => {
            let plane = state.graph.resolve_kind(&plane_id, EntityKind::Plane)?;
            let plane_handle = plane
                .handle
                .clone()
                .ok_or_else(|| CadError::EntityNotFound(plane_id.clone()))?;
            let fallback_frame = match &plane.spec {
                EntitySpec::Plane { plane_type, origin } => PlaneFrame::new(*plane_type, *origin),
                _ => unreachable!("resolve_kind checked the entity kind"),
            };

            let result = state.kernel.execute(KernelOp::CreateSketch {
                plane: plane_handle,
            })?;
            let handle = expect_shape(result.shape)?;
            let frame = result.frame.unwrap_or(fallback_frame);

            let sketch_id = state.graph.add_entity(
                EntityInit::new(
                    Some(plane_id.clone()),
                    EntitySpec::Sketch {
                        plane_id: plane_id.clone(),
                    },
                )
                .with_handle(Some(handle)),
            )?;
            Ok(OperationOutcome::SketchCreated {
                sketch_id,
                plane_id,
                frame,
            })
        }

        Operation::AddSketchElement {
            sketch_id,
            geometry,
        } => {
            validate_geometry(&geometry)?;
            let sketch = state.graph.resolve_kind(&sketch_id, EntityKind::Sketch)?;
            let sketch_handle = sketch
                .handle
                .clone()
                .ok_or_else(|| CadError::EntityNotFound(sketch_id.clone()))?;

            let element_type = geometry.kind();
            let result = state.kernel.execute(KernelOp::AddElement {
                sketch: sketch_handle,
                geometry: geometry.clone(),
            })?;
            let handle = expect_shape(result.shape)?;
            let profile = result.profile.unwrap_or_default();

            let element_id = state.graph.add_entity(
                EntityInit::new(Some(sketch_id.clone()), EntitySpec::Element { geometry })
                    .with_handle(Some(handle)),
            )?;
            Ok(OperationOutcome::ElementAdded {
                sketch_id,
                element_id,
                element_type,
                profile,
            })
        }

        Operation::AddFillet {
            sketch_id,
            element1_id,
            element2_id,
            radius,
        } => {
            if radius <= 0.0 {
                return Err(CadError::invalid_params("fillet radius must be positive"));
            }
            if element1_id == element2_id {
                return Err(CadError::invalid_params(
                    "fillet requires two distinct elements",
                ));
            }
            let sketch = state.graph.resolve_kind(&sketch_id, EntityKind::Sketch)?;
            let sketch_handle = sketch
                .handle
                .clone()
                .ok_or_else(|| CadError::EntityNotFound(sketch_id.clone()))?;
            let e1 = sibling_element_handle(state, &sketch_id, &element1_id)?;
            let e2 = sibling_element_handle(state, &sketch_id, &element2_id)?;

            // Adjacency and radius fit are geometric questions; the kernel
            // answers them and a rejection leaves the graph untouched.
            let result = state.kernel.execute(KernelOp::AddFillet {
                sketch: sketch_handle,
                element1: e1,
                element2: e2,
                radius,
            })?;
            let handle = expect_shape(result.shape)?;
            let profile = result.profile.unwrap_or_default();

            let fillet_id = state.graph.add_entity(
                EntityInit::new(
                    Some(sketch_id.clone()),
                    EntitySpec::Fillet {
                        element1: element1_id.clone(),
                        element2: element2_id.clone(),
                        radius,
                    },
                )
                .with_handle(Some(handle)),
            )?;
            Ok(OperationOutcome::FilletAdded {
                sketch_id,
                fillet_id,
                element1_id,
                element2_id,
                radius,
                profile,
            })
        }

        Operation::ExtrudeFeature {
            sketch_id,
            element_id,
            distance,
            direction,
        } => {
            if distance <= 0.0 {
                return Err(CadError::invalid_params("extrude distance must be positive"));
            }
            let sketch = state.graph.resolve_kind(&sketch_id, EntityKind::Sketch)?;
            let sketch_handle = sketch
                .handle
                .clone()
                .ok_or_else(|| CadError::EntityNotFound(sketch_id.clone()))?;
            let element_handle = element_id
                .as_ref()
                .map(|id| sibling_element_handle(state, &sketch_id, id))
                .transpose()?;

            let result = state.kernel.execute(KernelOp::Extrude {
                sketch: sketch_handle,
                element: element_handle,
                distance,
                direction,
            })?;
            let handle = expect_shape(result.shape)?;
            let mesh = result.mesh.unwrap_or_default();
            let bounding_box = bounding_box_of(&result.bounding_box, &mesh);

            let parent = element_id.clone().unwrap_or_else(|| sketch_id.clone());
            let feature_id = state.graph.add_entity(
                EntityInit::new(
                    Some(parent),
                    EntitySpec::Feature {
                        kind: FeatureKind::Extrude {
                            sketch_id: sketch_id.clone(),
                            element_id: element_id.clone(),
                            distance,
                            direction,
                        },
                    },
                )
                .with_handle(Some(handle))
                .with_mesh(Some(mesh.clone()), Some(bounding_box)),
            )?;
            Ok(OperationOutcome::FeatureExtruded {
                feature_id,
                sketch_id,
                element_id,
                distance,
                direction,
                mesh,
                bounding_box,
            })
        }

        Operation::BooleanOperation {
            op,
            target_id,
            tool_id,
        } => {
            if target_id == tool_id {
                return Err(CadError::invalid_params(
                    "boolean target and tool must be distinct entities",
                ));
            }
            let target_handle = solid_operand(state, &target_id)?;
            let tool_handle = solid_operand(state, &tool_id)?;

            let result = state.kernel.execute(KernelOp::Boolean {
                kind: op,
                target: target_handle,
                tool: tool_handle,
            })?;
            let handle = expect_shape(result.shape)?;
            let mesh = result.mesh.unwrap_or_default();
            let bounding_box = bounding_box_of(&result.bounding_box, &mesh);
            let tool_consumed = result.tool_consumed;

            if tool_consumed {
                state.graph.mark_consumed(&tool_id)?;
            }
            let feature_id = state.graph.add_entity(
                EntityInit::new(
                    Some(target_id.clone()),
                    EntitySpec::Feature {
                        kind: FeatureKind::Boolean {
                            op,
                            target_id: target_id.clone(),
                            tool_id: tool_id.clone(),
                        },
                    },
                )
                .with_handle(Some(handle))
                .with_mesh(Some(mesh.clone()), Some(bounding_box)),
            )?;
            Ok(OperationOutcome::BooleanApplied {
                feature_id,
                op,
                target_id,
                tool_id,
                tool_consumed,
                mesh,
                bounding_box,
            })
        }

        Operation::TessellateModel { model_id, quality } => {
            let quality = quality.unwrap_or(DEFAULT_TESSELLATION_QUALITY);
            if !(MIN_TESSELLATION_QUALITY..=MAX_TESSELLATION_QUALITY).contains(&quality) {
                return Err(CadError::invalid_params(format!(
                    "tessellation quality {quality} outside [{MIN_TESSELLATION_QUALITY}, {MAX_TESSELLATION_QUALITY}]"
                )));
            }
            let shape = solid_operand(state, &model_id)?;

            // Pure read: no graph mutation.
            let result = state.kernel.execute(KernelOp::Tessellate { shape, quality })?;
            let mesh = result.mesh.unwrap_or_default();
            let bounding_box = bounding_box_of(&result.bounding_box, &mesh);
            Ok(OperationOutcome::Tessellated {
                model_id,
                mesh,
                bounding_box,
            })
        }

        Operation::RemoveEntity { entity_id, cascade } => {
            let removed = state.graph.remove(&entity_id, cascade)?;
            Ok(OperationOutcome::EntityRemoved { removed })
        }

        Operation::ClearAll => {
            // Always succeeds; the ID counter keeps running so fresh entities
            // never collide with in-flight client caches.
            state.kernel.reset();
            let removed = state.graph.clear();
            Ok(OperationOutcome::Cleared { removed })
        }
    }
}

/// Resolve a sketch child (line, circle, rectangle, or fillet) to its kernel
/// handle, checking the parent edge.
fn sibling_element_handle(
    state: &SessionState,
    sketch_id: &EntityId,
    element_id: &EntityId,
) -> CadResult<crate::kernel::ShapeHandle> {
    let entity = state.graph.resolve(element_id)?;
    if !matches!(entity.kind(), EntityKind::Element | EntityKind::Fillet) {
        return Err(CadError::invalid_params(format!(
            "entity '{}' is a {}, expected a sketch element",
            element_id,
            entity.kind()
        )));
    }
    if entity.parent.as_ref() != Some(sketch_id) {
        return Err(CadError::invalid_params(format!(
            "element '{element_id}' does not belong to sketch '{sketch_id}'"
        )));
    }
    entity
        .handle
        .clone()
        .ok_or_else(|| CadError::EntityNotFound(element_id.clone()))
}

/// Resolve a boolean/tessellation operand to its solid shape handle.
fn solid_operand(
    state: &SessionState,
    id: &EntityId,
) -> CadResult<crate::kernel::ShapeHandle> {
    let entity = state.graph.resolve(id)?;
    if entity.consumed {
        return Err(CadError::invalid_params(format!(
            "entity '{id}' was consumed by an earlier boolean operation"
        )));
    }
    entity.solid_handle().cloned().ok_or_else(|| {
        CadError::invalid_params(format!("entity '{id}' does not carry a solid shape"))
    })
}

fn validate_geometry(geometry: &ElementGeometry) -> CadResult<()> {
    match geometry {
        ElementGeometry::Line { start, end } => {
            if start == end {
                return Err(CadError::invalid_params("line endpoints must differ"));
            }
        }
        ElementGeometry::Circle { radius, .. } => {
            if *radius <= 0.0 {
                return Err(CadError::invalid_params("circle radius must be positive"));
            }
        }
        ElementGeometry::Rectangle { width, height, .. } => {
            if *width <= 0.0 || *height <= 0.0 {
                return Err(CadError::invalid_params(
                    "rectangle width and height must be positive",
                ));
            }
        }
        ElementGeometry::Polyline { points, .. } => {
            if points.len() < 2 {
                return Err(CadError::invalid_params(
                    "polyline needs at least two points",
                ));
            }
        }
    }
    Ok(())
}

fn expect_shape(shape: Option<crate::kernel::ShapeHandle>) -> CadResult<crate::kernel::ShapeHandle> {
    shape.ok_or_else(|| {
        CadError::UnsupportedOperation("backend returned no shape handle".into())
    })
}

fn bounding_box_of(reported: &Option<BoundingBox>, mesh: &MeshPayload) -> BoundingBox {
    reported
        .or_else(|| BoundingBox::from_vertices(&mesh.vertices))
        .unwrap_or(BoundingBox {
            min: [0.0; 3],
            max: [0.0; 3],
        })
}

/// Events published after commit, mirroring what the direct caller gets.
fn events_for(outcome: &OperationOutcome) -> Vec<VisualizationEvent> {
    match outcome {
        OperationOutcome::PlaneCreated { plane_id, frame, .. } => {
            vec![VisualizationEvent::VisualizationData(VisualizationPayload {
                entity_id: plane_id.clone(),
                frame: Some(frame.clone()),
                ..VisualizationPayload::default()
            })]
        }
        OperationOutcome::SketchCreated { sketch_id, frame, .. } => {
            vec![VisualizationEvent::VisualizationData(VisualizationPayload {
                entity_id: sketch_id.clone(),
                frame: Some(frame.clone()),
                ..VisualizationPayload::default()
            })]
        }
        OperationOutcome::ElementAdded {
            element_id,
            profile,
            ..
        } => vec![VisualizationEvent::VisualizationData(VisualizationPayload {
            entity_id: element_id.clone(),
            profile: Some(profile.clone()),
            ..VisualizationPayload::default()
        })],
        OperationOutcome::FilletAdded {
            fillet_id, profile, ..
        } => vec![VisualizationEvent::VisualizationData(VisualizationPayload {
            entity_id: fillet_id.clone(),
            profile: Some(profile.clone()),
            ..VisualizationPayload::default()
        })],
        OperationOutcome::FeatureExtruded {
            feature_id,
            mesh,
            bounding_box,
            ..
        } => vec![VisualizationEvent::VisualizationData(VisualizationPayload {
            entity_id: feature_id.clone(),
            mesh_data: Some(mesh.clone()),
            bounding_box: Some(*bounding_box),
            ..VisualizationPayload::default()
        })],
        OperationOutcome::BooleanApplied {
            feature_id,
            tool_id,
            tool_consumed,
            mesh,
            bounding_box,
            ..
        } => {
            let mut events = vec![VisualizationEvent::VisualizationData(VisualizationPayload {
                entity_id: feature_id.clone(),
                mesh_data: Some(mesh.clone()),
                bounding_box: Some(*bounding_box),
                ..VisualizationPayload::default()
            })];
            if *tool_consumed {
                events.push(VisualizationEvent::GeometryUpdate(GeometryDelta {
                    removed: vec![],
                    consumed: vec![tool_id.clone()],
                }));
            }
            events
        }
        OperationOutcome::Tessellated {
            model_id,
            mesh,
            bounding_box,
        } => vec![VisualizationEvent::VisualizationData(VisualizationPayload {
            entity_id: model_id.clone(),
            mesh_data: Some(mesh.clone()),
            bounding_box: Some(*bounding_box),
            ..VisualizationPayload::default()
        })],
        OperationOutcome::EntityRemoved { removed } | OperationOutcome::Cleared { removed } => {
            vec![VisualizationEvent::GeometryUpdate(GeometryDelta {
                removed: removed.clone(),
                consumed: vec![],
            })]
        }
    }
}
