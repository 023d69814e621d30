//! Dispatcher behavior: transactional validation, entity identity, and the
//! full sketch-to-mesh workflow.

mod common;

use assert_matches::assert_matches;
use cad_mcp::dispatch::{Operation, OperationOutcome};
use cad_mcp::error::CadError;
use cad_mcp::model::{
    BooleanKind, ElementGeometry, EntityId, EntityKind, ExtrudeDirection, VisualizationEvent,
};
use cad_mcp::publish::ChannelSink;
use cad_mcp::state::AppState;
use common::{ProbeStats, planar_state, probe_factory_with, probed_state, test_config};
use std::sync::Arc;

const SESSION: &str = "test-session";

fn line_op(sketch_id: &EntityId, start: [f64; 2], end: [f64; 2]) -> Operation {
    Operation::AddSketchElement {
        sketch_id: sketch_id.clone(),
        geometry: ElementGeometry::Line { start, end },
    }
}

fn rectangle_op(sketch_id: &EntityId, corner: [f64; 2], width: f64, height: f64) -> Operation {
    Operation::AddSketchElement {
        sketch_id: sketch_id.clone(),
        geometry: ElementGeometry::Rectangle {
            corner,
            width,
            height,
        },
    }
}

async fn plane_and_sketch(state: &Arc<AppState>) -> (EntityId, EntityId) {
    let outcome = state
        .apply(
            SESSION,
            Operation::CreateSketchPlane {
                plane_type: cad_mcp::model::PlaneType::Xy,
                origin: None,
            },
        )
        .await
        .unwrap();
    let plane_id = match outcome {
        OperationOutcome::PlaneCreated { plane_id, .. } => plane_id,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let outcome = state
        .apply(
            SESSION,
            Operation::CreateSketch {
                plane_id: plane_id.clone(),
            },
        )
        .await
        .unwrap();
    let sketch_id = match outcome {
        OperationOutcome::SketchCreated { sketch_id, .. } => sketch_id,
        other => panic!("unexpected outcome: {other:?}"),
    };
    (plane_id, sketch_id)
}

async fn element_id_of(state: &Arc<AppState>, op: Operation) -> EntityId {
    match state.apply(SESSION, op).await.unwrap() {
        OperationOutcome::ElementAdded { element_id, .. } => element_id,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

async fn extrude_feature_id(state: &Arc<AppState>, sketch_id: &EntityId, element_id: Option<EntityId>) -> EntityId {
    let outcome = state
        .apply(
            SESSION,
            Operation::ExtrudeFeature {
                sketch_id: sketch_id.clone(),
                element_id,
                distance: 10.0,
                direction: ExtrudeDirection::Normal,
            },
        )
        .await
        .unwrap();
    match outcome {
        OperationOutcome::FeatureExtruded { feature_id, .. } => feature_id,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn entity_ids_are_ordered_across_kinds() {
    let state = planar_state();
    let (plane_id, sketch_id) = plane_and_sketch(&state).await;
    let line = element_id_of(&state, line_op(&sketch_id, [0.0, 0.0], [5.0, 0.0])).await;

    assert_eq!(plane_id.as_str(), "plane_1");
    assert_eq!(sketch_id.as_str(), "sketch_2");
    assert_eq!(line.as_str(), "element_3");
}

#[tokio::test]
async fn ids_keep_increasing_across_clear_all() {
    let state = planar_state();
    let (plane_id, _) = plane_and_sketch(&state).await;
    assert_eq!(plane_id.as_str(), "plane_1");

    let outcome = state.apply(SESSION, Operation::ClearAll).await.unwrap();
    assert_matches!(outcome, OperationOutcome::Cleared { ref removed } if removed.len() == 2);

    // The counter is not reset: fresh entities continue from the prior value.
    let (plane_id, sketch_id) = plane_and_sketch(&state).await;
    assert_eq!(plane_id.as_str(), "plane_3");
    assert_eq!(sketch_id.as_str(), "sketch_4");
}

#[tokio::test]
async fn rectangle_commits_as_a_single_entity() {
    let state = planar_state();
    let (_, sketch_id) = plane_and_sketch(&state).await;
    let element_id = element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 5.0, 3.0)).await;

    let session = state.sessions().get(SESSION).unwrap();
    let guard = session.state().lock().await;
    let entity = guard.graph.resolve(&element_id).unwrap();
    assert_eq!(entity.kind(), EntityKind::Element);
    assert_eq!(entity.parent.as_ref(), Some(&sketch_id));
    // Plane + sketch + one rectangle entity, not four lines.
    assert_eq!(guard.graph.len(), 3);
}

#[tokio::test]
async fn rectangle_stays_one_entity_when_the_backend_expands_it() {
    let stats = ProbeStats::default();
    let state = Arc::new(AppState::with_kernel_factory(
        test_config(),
        probe_factory_with(&stats, None, false),
    ));
    let (_, sketch_id) = plane_and_sketch(&state).await;
    let element_id = element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 5.0, 3.0)).await;

    let session = state.sessions().get(SESSION).unwrap();
    let guard = session.state().lock().await;
    assert_eq!(guard.graph.len(), 3);
    let entity = guard.graph.resolve(&element_id).unwrap();
    assert_matches!(
        entity.spec,
        cad_mcp::graph::EntitySpec::Element {
            geometry: ElementGeometry::Rectangle { .. }
        }
    );
    drop(guard);

    // The expanded rectangle still extrudes as one closed profile.
    let feature = extrude_feature_id(&state, &sketch_id, Some(element_id)).await;
    assert_eq!(feature.as_str(), "feature_4");
}

#[tokio::test]
async fn validation_failures_leave_graph_untouched_and_skip_the_kernel() {
    let stats = ProbeStats::default();
    let state = probed_state(&stats, None);
    let (plane_id, sketch_id) = plane_and_sketch(&state).await;
    let line = element_id_of(&state, line_op(&sketch_id, [0.0, 0.0], [5.0, 0.0])).await;

    let session = state.sessions().get(SESSION).unwrap();
    let before = session.state().lock().await.graph.clone();
    let calls_before = stats.kernel_calls();

    let rejected = [
        // unknown sketch
        line_op(&EntityId::from("sketch_99"), [0.0, 0.0], [1.0, 1.0]),
        // wrong kind: plane used as sketch
        line_op(&plane_id, [0.0, 0.0], [1.0, 1.0]),
        // non-positive radius
        Operation::AddFillet {
            sketch_id: sketch_id.clone(),
            element1_id: line.clone(),
            element2_id: line.clone(),
            radius: -1.0,
        },
        // identical fillet elements
        Operation::AddFillet {
            sketch_id: sketch_id.clone(),
            element1_id: line.clone(),
            element2_id: line.clone(),
            radius: 1.0,
        },
        // non-positive distance
        Operation::ExtrudeFeature {
            sketch_id: sketch_id.clone(),
            element_id: None,
            distance: 0.0,
            direction: ExtrudeDirection::Normal,
        },
        // element not a child of the sketch
        Operation::ExtrudeFeature {
            sketch_id: sketch_id.clone(),
            element_id: Some(plane_id.clone()),
            distance: 5.0,
            direction: ExtrudeDirection::Normal,
        },
        // out-of-range quality
        Operation::TessellateModel {
            model_id: line.clone(),
            quality: Some(2.0),
        },
        // entity with children removed without cascade
        Operation::RemoveEntity {
            entity_id: plane_id.clone(),
            cascade: false,
        },
    ];

    for op in rejected {
        let error = state
            .apply(SESSION, op)
            .await
            .expect_err("operation must fail validation");
        assert!(error.is_validation(), "expected validation error, got {error:?}");
    }

    let after = session.state().lock().await.graph.clone();
    assert_eq!(before, after);
    assert_eq!(stats.kernel_calls(), calls_before, "kernel must not be called");
}

#[tokio::test]
async fn boolean_with_identical_operands_fails_before_any_kernel_call() {
    let stats = ProbeStats::default();
    let state = probed_state(&stats, None);
    let (_, sketch_id) = plane_and_sketch(&state).await;
    element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 4.0, 4.0)).await;
    let feature = extrude_feature_id(&state, &sketch_id, None).await;

    let calls_before = stats.kernel_calls();
    let error = state
        .apply(
            SESSION,
            Operation::BooleanOperation {
                op: BooleanKind::Cut,
                target_id: feature.clone(),
                tool_id: feature,
            },
        )
        .await
        .expect_err("same-entity boolean must fail");

    assert_matches!(error, CadError::InvalidParameters(_));
    assert_eq!(stats.kernel_calls(), calls_before);
}

#[tokio::test]
async fn kernel_rejection_leaves_the_graph_unmutated() {
    let stats = ProbeStats::default();
    let state = probed_state(&stats, None);
    let (_, sketch_id) = plane_and_sketch(&state).await;
    // Two lines that never touch: adjacency is the kernel's verdict.
    let l1 = element_id_of(&state, line_op(&sketch_id, [0.0, 0.0], [1.0, 0.0])).await;
    let l2 = element_id_of(&state, line_op(&sketch_id, [5.0, 5.0], [6.0, 5.0])).await;

    let session = state.sessions().get(SESSION).unwrap();
    let before = session.state().lock().await.graph.clone();
    let calls_before = stats.kernel_calls();

    let error = state
        .apply(
            SESSION,
            Operation::AddFillet {
                sketch_id,
                element1_id: l1,
                element2_id: l2,
                radius: 0.5,
            },
        )
        .await
        .expect_err("non-adjacent fillet must fail");

    assert_matches!(error, CadError::InvalidGeometry(_));
    // The kernel was consulted, but the failure committed nothing.
    assert_eq!(stats.kernel_calls(), calls_before + 1);
    let after = session.state().lock().await.graph.clone();
    assert_eq!(before, after);
}

#[tokio::test]
async fn sketch_to_mesh_workflow_produces_a_solid_bounding_box() {
    let state = planar_state();
    let (_, sketch_id) = plane_and_sketch(&state).await;
    let l1 = element_id_of(&state, line_op(&sketch_id, [0.0, 0.0], [10.0, 0.0])).await;
    let l2 = element_id_of(&state, line_op(&sketch_id, [10.0, 0.0], [10.0, 10.0])).await;

    let outcome = state
        .apply(
            SESSION,
            Operation::AddFillet {
                sketch_id: sketch_id.clone(),
                element1_id: l1,
                element2_id: l2,
                radius: 1.0,
            },
        )
        .await
        .unwrap();
    let fillet_id = match outcome {
        OperationOutcome::FilletAdded { fillet_id, .. } => fillet_id,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(fillet_id.as_str(), "fillet_5");

    let feature = extrude_feature_id(&state, &sketch_id, None).await;

    let outcome = state
        .apply(
            SESSION,
            Operation::TessellateModel {
                model_id: feature,
                quality: Some(0.1),
            },
        )
        .await
        .unwrap();
    let (mesh, bounding_box) = match outcome {
        OperationOutcome::Tessellated {
            mesh, bounding_box, ..
        } => (mesh, bounding_box),
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert!(!mesh.is_empty());
    assert!(mesh.triangle_count() > 0);
    assert!(!bounding_box.is_degenerate(), "bounding box must enclose volume");
}

#[tokio::test]
async fn tessellate_does_not_mutate_the_graph() {
    let state = planar_state();
    let (_, sketch_id) = plane_and_sketch(&state).await;
    element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 4.0, 4.0)).await;
    let feature = extrude_feature_id(&state, &sketch_id, None).await;

    let session = state.sessions().get(SESSION).unwrap();
    let before = session.state().lock().await.graph.clone();

    state
        .apply(
            SESSION,
            Operation::TessellateModel {
                model_id: feature,
                quality: None,
            },
        )
        .await
        .unwrap();

    let after = session.state().lock().await.graph.clone();
    assert_eq!(before, after);
}

#[tokio::test]
async fn boolean_cut_consumes_the_tool_but_keeps_its_history() {
    let state = planar_state();
    let (_, sketch_id) = plane_and_sketch(&state).await;
    let r1 = element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 10.0, 10.0)).await;
    let r2 = element_id_of(&state, rectangle_op(&sketch_id, [5.0, 5.0], 10.0, 10.0)).await;
    let target = extrude_feature_id(&state, &sketch_id, Some(r1)).await;
    let tool = extrude_feature_id(&state, &sketch_id, Some(r2)).await;

    let outcome = state
        .apply(
            SESSION,
            Operation::BooleanOperation {
                op: BooleanKind::Cut,
                target_id: target.clone(),
                tool_id: tool.clone(),
            },
        )
        .await
        .unwrap();
    assert_matches!(
        outcome,
        OperationOutcome::BooleanApplied {
            tool_consumed: true,
            ..
        }
    );

    let session = state.sessions().get(SESSION).unwrap();
    {
        let guard = session.state().lock().await;
        let entity = guard.graph.resolve(&tool).unwrap();
        assert!(entity.consumed, "tool stays resolvable but is consumed");
    }

    // A consumed shape is no longer selectable as a boolean operand.
    let error = state
        .apply(
            SESSION,
            Operation::BooleanOperation {
                op: BooleanKind::Union,
                target_id: target,
                tool_id: tool,
            },
        )
        .await
        .expect_err("consumed tool must be rejected");
    assert_matches!(error, CadError::InvalidParameters(_));
}

#[tokio::test]
async fn remove_entity_honours_cascade_semantics() {
    let state = planar_state();
    let (plane_id, sketch_id) = plane_and_sketch(&state).await;
    let line = element_id_of(&state, line_op(&sketch_id, [0.0, 0.0], [1.0, 0.0])).await;

    let error = state
        .apply(
            SESSION,
            Operation::RemoveEntity {
                entity_id: plane_id.clone(),
                cascade: false,
            },
        )
        .await
        .expect_err("non-cascade removal of a parent must fail");
    assert_matches!(error, CadError::HasDependents { count: 1, .. });

    let outcome = state
        .apply(
            SESSION,
            Operation::RemoveEntity {
                entity_id: plane_id.clone(),
                cascade: true,
            },
        )
        .await
        .unwrap();
    let removed = match outcome {
        OperationOutcome::EntityRemoved { removed } => removed,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(removed, vec![plane_id, sketch_id, line]);

    let session = state.sessions().get(SESSION).unwrap();
    assert!(session.state().lock().await.graph.is_empty());
}

#[tokio::test]
async fn committed_payloads_reach_the_subscribed_sink() {
    let state = planar_state();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .publisher()
        .subscribe(SESSION, Arc::new(ChannelSink::new(tx)));

    let (_, sketch_id) = plane_and_sketch(&state).await;
    element_id_of(&state, rectangle_op(&sketch_id, [0.0, 0.0], 4.0, 4.0)).await;
    extrude_feature_id(&state, &sketch_id, None).await;

    let mut mesh_events = 0;
    let mut frame_events = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            VisualizationEvent::VisualizationData(payload) => {
                if payload.mesh_data.is_some() {
                    mesh_events += 1;
                }
                if payload.frame.is_some() {
                    frame_events += 1;
                }
            }
            VisualizationEvent::GeometryUpdate(_) => {}
        }
    }
    // Plane and sketch publish frames; the extrude publishes a mesh.
    assert_eq!(frame_events, 2);
    assert_eq!(mesh_events, 1);
}
