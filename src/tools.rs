//! Tool parameter types and handlers.
//!
//! Each handler builds an [`Operation`], routes it through the session's
//! dispatcher via [`AppState::apply`], and shapes the committed outcome into
//! the tool's response. Element parameters arrive flattened (`x1`/`y1`/…)
//! the way modeling clients send them; assembly into typed geometry happens
//! here, before validation.

use crate::dispatch::{Operation, OperationOutcome};
use crate::error::{CadError, CadResult};
use crate::model::{
    AddFilletResponse, AddSketchElementResponse, BooleanKind, BooleanOperationResponse,
    ClearSessionResponse, CreateSketchPlaneResponse, CreateSketchResponse, DeleteSessionResponse,
    ElementGeometry, ElementKind, EntityDescriptor, EntityId, EntityKind, ExtrudeDirection,
    ExtrudeFeatureResponse, ListEntitiesResponse, PlaneType, RemoveEntityResponse,
    SessionInfoResponse, TessellateResponse, timestamp_now,
};
use crate::state::AppState;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSketchPlaneParams {
    pub session_id: String,
    /// One of XY, XZ, YZ.
    pub plane_type: PlaneType,
    /// Plane origin; defaults to the world origin.
    pub origin: Option<[f64; 3]>,
}

pub async fn create_sketch_plane(
    state: Arc<AppState>,
    params: CreateSketchPlaneParams,
) -> CadResult<CreateSketchPlaneResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::CreateSketchPlane {
                plane_type: params.plane_type,
                origin: params.origin,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::PlaneCreated {
            plane_id,
            plane_type,
            origin,
            frame,
        } => Ok(CreateSketchPlaneResponse {
            session_id: params.session_id,
            plane_id,
            plane_type,
            origin,
            visualization: frame,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("create_sketch_plane yields PlaneCreated"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSketchParams {
    pub session_id: String,
    pub plane_id: EntityId,
}

pub async fn create_sketch(
    state: Arc<AppState>,
    params: CreateSketchParams,
) -> CadResult<CreateSketchResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::CreateSketch {
                plane_id: params.plane_id,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::SketchCreated {
            sketch_id,
            plane_id,
            frame,
        } => Ok(CreateSketchResponse {
            session_id: params.session_id,
            sketch_id,
            plane_id,
            visualization: frame,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("create_sketch yields SketchCreated"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddSketchElementParams {
    pub session_id: String,
    pub sketch_id: EntityId,
    /// One of line, circle, rectangle.
    pub element_type: ElementKind,
    /// Line start/end, in sketch coordinates.
    pub x1: Option<f64>,
    pub y1: Option<f64>,
    pub x2: Option<f64>,
    pub y2: Option<f64>,
    /// Circle center and radius.
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    pub radius: Option<f64>,
    /// Rectangle corner and size.
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl AddSketchElementParams {
    fn geometry(&self) -> CadResult<ElementGeometry> {
        let require = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| {
                CadError::invalid_params(format!(
                    "{} element requires parameter '{}'",
                    self.element_type, name
                ))
            })
        };
        match self.element_type {
            ElementKind::Line => Ok(ElementGeometry::Line {
                start: [require(self.x1, "x1")?, require(self.y1, "y1")?],
                end: [require(self.x2, "x2")?, require(self.y2, "y2")?],
            }),
            ElementKind::Circle => Ok(ElementGeometry::Circle {
                center: [
                    require(self.center_x, "center_x")?,
                    require(self.center_y, "center_y")?,
                ],
                radius: require(self.radius, "radius")?,
            }),
            ElementKind::Rectangle => Ok(ElementGeometry::Rectangle {
                corner: [require(self.x, "x")?, require(self.y, "y")?],
                width: require(self.width, "width")?,
                height: require(self.height, "height")?,
            }),
        }
    }
}

pub async fn add_sketch_element(
    state: Arc<AppState>,
    params: AddSketchElementParams,
) -> CadResult<AddSketchElementResponse> {
    let geometry = params.geometry()?;
    let outcome = state
        .apply(
            &params.session_id,
            Operation::AddSketchElement {
                sketch_id: params.sketch_id,
                geometry,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::ElementAdded {
            sketch_id,
            element_id,
            element_type,
            profile,
        } => Ok(AddSketchElementResponse {
            session_id: params.session_id,
            sketch_id,
            element_id,
            element_type,
            visualization: profile,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("add_sketch_element yields ElementAdded"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddFilletParams {
    pub session_id: String,
    pub sketch_id: EntityId,
    pub element1_id: EntityId,
    pub element2_id: EntityId,
    pub radius: f64,
}

pub async fn add_fillet(
    state: Arc<AppState>,
    params: AddFilletParams,
) -> CadResult<AddFilletResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::AddFillet {
                sketch_id: params.sketch_id,
                element1_id: params.element1_id,
                element2_id: params.element2_id,
                radius: params.radius,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::FilletAdded {
            sketch_id,
            fillet_id,
            element1_id,
            element2_id,
            radius,
            profile,
        } => Ok(AddFilletResponse {
            session_id: params.session_id,
            sketch_id,
            fillet_id,
            element1_id,
            element2_id,
            radius,
            visualization: profile,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("add_fillet yields FilletAdded"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtrudeFeatureParams {
    pub session_id: String,
    pub sketch_id: EntityId,
    /// Extrude only this element instead of the full sketch profile.
    pub element_id: Option<EntityId>,
    pub distance: f64,
    /// "normal" (default) or "reverse".
    pub direction: Option<ExtrudeDirection>,
}

pub async fn extrude_feature(
    state: Arc<AppState>,
    params: ExtrudeFeatureParams,
) -> CadResult<ExtrudeFeatureResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::ExtrudeFeature {
                sketch_id: params.sketch_id,
                element_id: params.element_id,
                distance: params.distance,
                direction: params.direction.unwrap_or_default(),
            },
        )
        .await?;
    match outcome {
        OperationOutcome::FeatureExtruded {
            feature_id,
            sketch_id,
            element_id,
            distance,
            direction,
            mesh,
            bounding_box,
        } => Ok(ExtrudeFeatureResponse {
            session_id: params.session_id,
            feature_id,
            source_sketch_id: sketch_id,
            source_element_id: element_id,
            distance,
            direction,
            mesh_data: mesh,
            bounding_box,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("extrude_feature yields FeatureExtruded"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BooleanOperationParams {
    pub session_id: String,
    /// One of union, cut, intersect.
    pub operation_type: BooleanKind,
    pub target_id: EntityId,
    pub tool_id: EntityId,
}

pub async fn boolean_operation(
    state: Arc<AppState>,
    params: BooleanOperationParams,
) -> CadResult<BooleanOperationResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::BooleanOperation {
                op: params.operation_type,
                target_id: params.target_id,
                tool_id: params.tool_id,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::BooleanApplied {
            feature_id,
            op,
            target_id,
            tool_id,
            tool_consumed,
            mesh,
            bounding_box,
        } => Ok(BooleanOperationResponse {
            session_id: params.session_id,
            feature_id,
            operation_type: op,
            target_id,
            tool_id,
            tool_consumed,
            mesh_data: mesh,
            bounding_box,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("boolean_operation yields BooleanApplied"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TessellateParams {
    pub session_id: String,
    pub model_id: EntityId,
    /// Tessellation quality (deflection) in [0.001, 1.0]; defaults to 0.1.
    #[serde(alias = "tessellation_quality")]
    pub quality: Option<f64>,
}

pub async fn tessellate_model(
    state: Arc<AppState>,
    params: TessellateParams,
) -> CadResult<TessellateResponse> {
    let quality = params.quality.or(Some(state.config().default_quality));
    let outcome = state
        .apply(
            &params.session_id,
            Operation::TessellateModel {
                model_id: params.model_id,
                quality,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::Tessellated {
            model_id,
            mesh,
            bounding_box,
        } => Ok(TessellateResponse {
            session_id: params.session_id,
            model_id,
            mesh_data: mesh,
            bounding_box,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("tessellate_model yields Tessellated"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveEntityParams {
    pub session_id: String,
    pub entity_id: EntityId,
    /// Remove the whole subtree instead of requiring a leaf.
    #[serde(default)]
    pub cascade: bool,
}

pub async fn remove_entity(
    state: Arc<AppState>,
    params: RemoveEntityParams,
) -> CadResult<RemoveEntityResponse> {
    let outcome = state
        .apply(
            &params.session_id,
            Operation::RemoveEntity {
                entity_id: params.entity_id,
                cascade: params.cascade,
            },
        )
        .await?;
    match outcome {
        OperationOutcome::EntityRemoved { removed } => Ok(RemoveEntityResponse {
            session_id: params.session_id,
            removed,
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("remove_entity yields EntityRemoved"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearSessionParams {
    pub session_id: String,
}

pub async fn clear_session(
    state: Arc<AppState>,
    params: ClearSessionParams,
) -> CadResult<ClearSessionResponse> {
    let outcome = state.apply(&params.session_id, Operation::ClearAll).await?;
    match outcome {
        OperationOutcome::Cleared { removed } => Ok(ClearSessionResponse {
            session_id: params.session_id,
            removed_count: removed.len(),
            timestamp: timestamp_now(),
        }),
        _ => unreachable!("clear_session yields Cleared"),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionInfoParams {
    pub session_id: String,
}

pub async fn session_info(
    state: Arc<AppState>,
    params: SessionInfoParams,
) -> CadResult<SessionInfoResponse> {
    let session = state.sessions().get(&params.session_id)?;
    let guard = session.state().lock().await;
    Ok(SessionInfoResponse {
        session_id: params.session_id,
        entity_count: guard.graph.len(),
        plane_ids: guard.graph.ids_of_kind(EntityKind::Plane),
        sketch_ids: guard.graph.ids_of_kind(EntityKind::Sketch),
        feature_ids: guard.graph.ids_of_kind(EntityKind::Feature),
        kernel_backend: guard.kernel.backend_name().to_string(),
        timestamp: timestamp_now(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListEntitiesParams {
    pub session_id: String,
}

pub async fn list_entities(
    state: Arc<AppState>,
    params: ListEntitiesParams,
) -> CadResult<ListEntitiesResponse> {
    let session = state.sessions().get(&params.session_id)?;
    let guard = session.state().lock().await;
    let entities = guard
        .graph
        .iter()
        .map(|entity| EntityDescriptor {
            entity_id: entity.id.clone(),
            kind: entity.kind(),
            parent_id: entity.parent.clone(),
            consumed: entity.consumed,
            has_shape: entity.solid_handle().is_some(),
        })
        .collect();
    Ok(ListEntitiesResponse {
        session_id: params.session_id,
        entities,
        timestamp: timestamp_now(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteSessionParams {
    pub session_id: String,
}

pub async fn delete_session(
    state: Arc<AppState>,
    params: DeleteSessionParams,
) -> CadResult<DeleteSessionResponse> {
    let removed = state.sessions().destroy(&params.session_id);
    state.publisher().unsubscribe(&params.session_id);
    crate::metrics::METRICS.set_active_sessions(state.sessions().active_count());
    Ok(DeleteSessionResponse {
        session_id: params.session_id,
        removed,
        timestamp: timestamp_now(),
    })
}
