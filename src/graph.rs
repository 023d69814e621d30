//! Per-session entity graph.
//!
//! Entities live in an insertion-ordered arena keyed by ID, with explicit
//! parent-ID edges: the session owns the arena, there is no pointer sharing
//! and no cycle to worry about. The graph is a forest rooted at planes. IDs
//! come from one monotonic counter per session and are never reused, not
//! even after `clear`, so stale client caches can never collide with fresh
//! entities.

use crate::error::{CadError, CadResult};
use crate::kernel::ShapeHandle;
use crate::model::{
    BooleanKind, BoundingBox, ElementGeometry, EntityId, EntityKind, ExtrudeDirection,
    MeshPayload, PlaneType,
};
use indexmap::IndexMap;

/// One node in the session graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub parent: Option<EntityId>,
    pub spec: EntitySpec,
    /// Kernel-side handle backing this entity, opaque to the graph.
    pub handle: Option<ShapeHandle>,
    /// Set when a boolean operation consumed this entity's shape. The entity
    /// stays resolvable for history but is no longer a valid operand.
    pub consumed: bool,
    /// Cached visualization payload from the committing operation.
    pub mesh: Option<MeshPayload>,
    pub bounding_box: Option<BoundingBox>,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.spec.kind()
    }

    /// Handle usable as a boolean operand; only features carry solids.
    pub fn solid_handle(&self) -> Option<&ShapeHandle> {
        match self.spec {
            EntitySpec::Feature { .. } => self.handle.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntitySpec {
    Plane {
        plane_type: PlaneType,
        origin: [f64; 3],
    },
    Sketch {
        plane_id: EntityId,
    },
    Element {
        geometry: ElementGeometry,
    },
    Fillet {
        element1: EntityId,
        element2: EntityId,
        radius: f64,
    },
    Feature {
        kind: FeatureKind,
    },
}

impl EntitySpec {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySpec::Plane { .. } => EntityKind::Plane,
            EntitySpec::Sketch { .. } => EntityKind::Sketch,
            EntitySpec::Element { .. } => EntityKind::Element,
            EntitySpec::Fillet { .. } => EntityKind::Fillet,
            EntitySpec::Feature { .. } => EntityKind::Feature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    Extrude {
        sketch_id: EntityId,
        element_id: Option<EntityId>,
        distance: f64,
        direction: ExtrudeDirection,
    },
    Boolean {
        op: BooleanKind,
        target_id: EntityId,
        tool_id: EntityId,
    },
}

/// Everything needed to commit a new entity, minus the ID the graph assigns.
#[derive(Debug, Clone)]
pub struct EntityInit {
    pub parent: Option<EntityId>,
    pub spec: EntitySpec,
    pub handle: Option<ShapeHandle>,
    pub mesh: Option<MeshPayload>,
    pub bounding_box: Option<BoundingBox>,
}

impl EntityInit {
    pub fn new(parent: Option<EntityId>, spec: EntitySpec) -> Self {
        EntityInit {
            parent,
            spec,
            handle: None,
            mesh: None,
            bounding_box: None,
        }
    }

    pub fn with_handle(mut self, handle: Option<ShapeHandle>) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_mesh(mut self, mesh: Option<MeshPayload>, bounding_box: Option<BoundingBox>) -> Self {
        self.mesh = mesh;
        self.bounding_box = bounding_box;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityGraph {
    entities: IndexMap<String, Entity>,
    next_serial: u64,
}

impl Default for EntityGraph {
    fn default() -> Self {
        EntityGraph {
            entities: IndexMap::new(),
            next_serial: 1,
        }
    }
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of IDs issued so far.
    pub fn issued(&self) -> u64 {
        self.next_serial - 1
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn ids_of_kind(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.kind() == kind)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Add an entity, assigning the next monotonic ID. Fails with
    /// `ParentNotFound` when the parent is absent or already removed.
    pub fn add_entity(&mut self, init: EntityInit) -> CadResult<EntityId> {
        if let Some(parent) = &init.parent {
            if !self.entities.contains_key(parent.as_str()) {
                return Err(CadError::ParentNotFound(parent.clone()));
            }
        }
        let id = self.allocate_id(init.spec.kind());
        let entity = Entity {
            id: id.clone(),
            parent: init.parent,
            spec: init.spec,
            handle: init.handle,
            consumed: false,
            mesh: init.mesh,
            bounding_box: init.bounding_box,
        };
        self.entities.insert(id.0.clone(), entity);
        Ok(id)
    }

    pub fn resolve(&self, id: &EntityId) -> CadResult<&Entity> {
        self.entities
            .get(id.as_str())
            .ok_or_else(|| CadError::EntityNotFound(id.clone()))
    }

    /// Resolve and check the entity kind in one step; a kind mismatch is a
    /// validation failure, not a missing entity.
    pub fn resolve_kind(&self, id: &EntityId, kind: EntityKind) -> CadResult<&Entity> {
        let entity = self.resolve(id)?;
        if entity.kind() != kind {
            return Err(CadError::invalid_params(format!(
                "entity '{}' is a {}, expected a {}",
                id,
                entity.kind(),
                kind
            )));
        }
        Ok(entity)
    }

    /// Direct children of an entity, in insertion order.
    pub fn children(&self, id: &EntityId) -> CadResult<Vec<EntityId>> {
        self.resolve(id)?;
        Ok(self
            .entities
            .values()
            .filter(|e| e.parent.as_ref() == Some(id))
            .map(|e| e.id.clone())
            .collect())
    }

    /// Remove an entity. Without `cascade` the entity must be a leaf;
    /// with `cascade` the whole subtree goes. Returns every removed ID in
    /// insertion order.
    pub fn remove(&mut self, id: &EntityId, cascade: bool) -> CadResult<Vec<EntityId>> {
        let children = self.children(id)?;
        if !children.is_empty() && !cascade {
            return Err(CadError::HasDependents {
                id: id.clone(),
                count: children.len(),
            });
        }

        let mut doomed = vec![id.clone()];
        let mut queue = children;
        while let Some(next) = queue.pop() {
            queue.extend(self.children(&next)?);
            doomed.push(next);
        }

        // Preserve arena insertion order in the returned set.
        let doomed_keys: std::collections::HashSet<&str> =
            doomed.iter().map(|d| d.as_str()).collect();
        let ordered: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| doomed_keys.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        for removed in &ordered {
            self.entities.shift_remove(removed.as_str());
        }
        Ok(ordered)
    }

    /// Mark a boolean tool as consumed; it stays resolvable for history.
    pub fn mark_consumed(&mut self, id: &EntityId) -> CadResult<()> {
        let entity = self
            .entities
            .get_mut(id.as_str())
            .ok_or_else(|| CadError::EntityNotFound(id.clone()))?;
        entity.consumed = true;
        Ok(())
    }

    /// Drop every entity but keep the ID counter running.
    pub fn clear(&mut self) -> Vec<EntityId> {
        let removed = self.entities.values().map(|e| e.id.clone()).collect();
        self.entities.clear();
        removed
    }

    fn allocate_id(&mut self, kind: EntityKind) -> EntityId {
        let serial = self.next_serial;
        self.next_serial += 1;
        EntityId(format!("{}_{}", kind.id_prefix(), serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn plane_init() -> EntityInit {
        EntityInit::new(
            None,
            EntitySpec::Plane {
                plane_type: PlaneType::Xy,
                origin: [0.0, 0.0, 0.0],
            },
        )
    }

    fn sketch_init(plane: &EntityId) -> EntityInit {
        EntityInit::new(
            Some(plane.clone()),
            EntitySpec::Sketch {
                plane_id: plane.clone(),
            },
        )
    }

    fn line_init(sketch: &EntityId) -> EntityInit {
        EntityInit::new(
            Some(sketch.clone()),
            EntitySpec::Element {
                geometry: ElementGeometry::Line {
                    start: [0.0, 0.0],
                    end: [1.0, 0.0],
                },
            },
        )
    }

    #[test]
    fn ids_are_prefixed_and_share_one_counter() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        let sketch = graph.add_entity(sketch_init(&plane)).unwrap();
        let line = graph.add_entity(line_init(&sketch)).unwrap();

        assert_eq!(plane.as_str(), "plane_1");
        assert_eq!(sketch.as_str(), "sketch_2");
        assert_eq!(line.as_str(), "element_3");
        assert_eq!(graph.issued(), 3);
    }

    #[test]
    fn ids_survive_clear_without_reuse() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        assert_eq!(plane.as_str(), "plane_1");

        let removed = graph.clear();
        assert_eq!(removed, vec![plane]);
        assert!(graph.is_empty());

        let next = graph.add_entity(plane_init()).unwrap();
        assert_eq!(next.as_str(), "plane_2");
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut graph = EntityGraph::new();
        let missing = EntityId::from("plane_99");
        let result = graph.add_entity(sketch_init(&missing));
        assert_matches!(result, Err(CadError::ParentNotFound(id)) if id == missing);
    }

    #[test]
    fn resolve_kind_flags_mismatches_as_validation() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();

        assert!(graph.resolve_kind(&plane, EntityKind::Plane).is_ok());
        assert_matches!(
            graph.resolve_kind(&plane, EntityKind::Sketch),
            Err(CadError::InvalidParameters(_))
        );
        assert_matches!(
            graph.resolve_kind(&EntityId::from("sketch_7"), EntityKind::Sketch),
            Err(CadError::EntityNotFound(_))
        );
    }

    #[test]
    fn children_come_back_in_insertion_order() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        let sketch = graph.add_entity(sketch_init(&plane)).unwrap();
        let a = graph.add_entity(line_init(&sketch)).unwrap();
        let b = graph.add_entity(line_init(&sketch)).unwrap();
        let c = graph.add_entity(line_init(&sketch)).unwrap();

        assert_eq!(graph.children(&sketch).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn remove_without_cascade_requires_a_leaf() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        let sketch = graph.add_entity(sketch_init(&plane)).unwrap();
        let line = graph.add_entity(line_init(&sketch)).unwrap();

        assert_matches!(
            graph.remove(&plane, false),
            Err(CadError::HasDependents { count: 1, .. })
        );

        let removed = graph.remove(&line, false).unwrap();
        assert_eq!(removed, vec![line]);
    }

    #[test]
    fn cascade_remove_returns_the_full_subtree() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        let sketch = graph.add_entity(sketch_init(&plane)).unwrap();
        let line1 = graph.add_entity(line_init(&sketch)).unwrap();
        let line2 = graph.add_entity(line_init(&sketch)).unwrap();
        let other_plane = graph.add_entity(plane_init()).unwrap();

        let removed = graph.remove(&plane, true).unwrap();
        assert_eq!(removed, vec![plane, sketch, line1, line2]);
        assert_eq!(graph.len(), 1);
        assert!(graph.resolve(&other_plane).is_ok());
    }

    #[test]
    fn consumed_entities_stay_resolvable() {
        let mut graph = EntityGraph::new();
        let plane = graph.add_entity(plane_init()).unwrap();
        graph.mark_consumed(&plane).unwrap();

        let entity = graph.resolve(&plane).unwrap();
        assert!(entity.consumed);
    }

    #[test]
    fn failed_add_leaves_the_graph_structurally_identical() {
        let mut graph = EntityGraph::new();
        graph.add_entity(plane_init()).unwrap();
        let before = graph.clone();

        let result = graph.add_entity(sketch_init(&EntityId::from("plane_42")));
        assert!(result.is_err());
        assert_eq!(graph, before);
    }
}
