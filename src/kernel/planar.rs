//! Built-in analytic geometry backend.
//!
//! `PlanarKernel` implements the kernel capability for planar-profile solids:
//! sketch curves on a plane, fillet arcs between adjacent lines, prisms from
//! extruded profiles, and deflection-based tessellation. Closed profiles
//! extrude to capped solids; open chains extrude to sheet bodies. Boolean
//! results are approximated at the mesh level (the operand prisms are kept
//! and re-tessellated), which is sufficient for incremental visualization; an
//! exact B-rep backend plugs in behind the same trait.

use super::{GeometryKernel, KernelError, KernelOp, KernelOutcome, KernelResult, ShapeHandle};
use crate::model::{
    BooleanKind, BoundingBox, ElementGeometry, ElementProfile, ExtrudeDirection, MeshMetadata,
    MeshPayload, PlaneFrame, PlaneType, ProfileSegment,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_QUALITY: f64 = 0.1;
const EPS: f64 = 1e-9;
/// Tolerance for endpoint coincidence when chaining profile curves.
const JOIN_TOL: f64 = 1e-6;
const MIN_ARC_SEGMENTS: usize = 4;
const MAX_ARC_SEGMENTS: usize = 256;

pub struct PlanarKernel {
    serial: u64,
    planes: HashMap<String, PlaneState>,
    sketches: HashMap<String, SketchState>,
    solids: HashMap<String, SolidState>,
}

struct PlaneState {
    frame: Frame,
}

struct SketchState {
    frame: Frame,
    elements: IndexMap<String, Curve2d>,
}

struct SolidState {
    prisms: Vec<Prism>,
}

#[derive(Debug, Clone)]
struct Prism {
    frame: Frame,
    curves: Vec<Curve2d>,
    closed: bool,
    /// Signed extrusion distance along the frame normal.
    distance: f64,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    origin: [f64; 3],
    normal: [f64; 3],
    u: [f64; 3],
    v: [f64; 3],
}

impl Frame {
    fn new(plane_type: PlaneType, origin: [f64; 3]) -> Self {
        let (normal, u, v) = plane_type.axes();
        Frame {
            origin,
            normal,
            u,
            v,
        }
    }

    /// Map a sketch-plane point at extrusion height `h` into world space.
    fn lift(&self, p: [f64; 2], h: f64) -> [f64; 3] {
        [
            self.origin[0] + self.u[0] * p[0] + self.v[0] * p[1] + self.normal[0] * h,
            self.origin[1] + self.u[1] * p[0] + self.v[1] * p[1] + self.normal[1] * h,
            self.origin[2] + self.u[2] * p[0] + self.v[2] * p[1] + self.normal[2] * h,
        ]
    }

    fn to_plane_frame(&self) -> PlaneFrame {
        PlaneFrame {
            origin: self.origin,
            normal: self.normal,
            u_axis: self.u,
            v_axis: self.v,
            size: 100.0,
        }
    }
}

/// A 2D curve in sketch-plane coordinates. Segments and arcs are open and
/// chain into profiles; circles, rectangles, and closed polylines are loops
/// of their own.
#[derive(Debug, Clone)]
enum Curve2d {
    Segment {
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
    Rect {
        corner: [f64; 2],
        width: f64,
        height: f64,
    },
    Poly {
        points: Vec<[f64; 2]>,
        closed: bool,
    },
}

impl Curve2d {
    fn from_geometry(geometry: &ElementGeometry) -> Result<Curve2d, KernelError> {
        match geometry {
            ElementGeometry::Line { start, end } => {
                if dist2(*start, *end) < EPS {
                    return Err(KernelError::InvalidGeometry(
                        "line has zero length".into(),
                    ));
                }
                Ok(Curve2d::Segment {
                    start: *start,
                    end: *end,
                })
            }
            ElementGeometry::Circle { center, radius } => {
                if *radius <= EPS {
                    return Err(KernelError::InvalidGeometry(
                        "circle radius must be positive".into(),
                    ));
                }
                Ok(Curve2d::Circle {
                    center: *center,
                    radius: *radius,
                })
            }
            ElementGeometry::Rectangle {
                corner,
                width,
                height,
            } => {
                if *width <= EPS || *height <= EPS {
                    return Err(KernelError::InvalidGeometry(
                        "rectangle sides must be positive".into(),
                    ));
                }
                Ok(Curve2d::Rect {
                    corner: *corner,
                    width: *width,
                    height: *height,
                })
            }
            ElementGeometry::Polyline { points, closed } => {
                if points.len() < 2 {
                    return Err(KernelError::InvalidGeometry(
                        "polyline needs at least two points".into(),
                    ));
                }
                Ok(Curve2d::Poly {
                    points: points.clone(),
                    closed: *closed,
                })
            }
        }
    }

    /// Endpoints of an open curve; None for closed loops.
    fn endpoints(&self) -> Option<([f64; 2], [f64; 2])> {
        match self {
            Curve2d::Segment { start, end } => Some((*start, *end)),
            Curve2d::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => Some((
                arc_point(*center, *radius, *start_angle),
                arc_point(*center, *radius, *end_angle),
            )),
            Curve2d::Poly { points, closed } if !*closed => {
                Some((points[0], *points.last().expect("non-empty polyline")))
            }
            _ => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.endpoints().is_none()
    }

    /// Sample the curve into a point list. Open curves include both
    /// endpoints; closed loops return a ring without the repeated point.
    fn sample(&self, quality: f64) -> Vec<[f64; 2]> {
        match self {
            Curve2d::Segment { start, end } => vec![*start, *end],
            Curve2d::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                let sweep = end_angle - start_angle;
                let n = arc_segment_count(*radius, sweep.abs(), quality);
                (0..=n)
                    .map(|i| {
                        let t = start_angle + sweep * (i as f64) / (n as f64);
                        arc_point(*center, *radius, t)
                    })
                    .collect()
            }
            Curve2d::Circle { center, radius } => {
                let n = arc_segment_count(*radius, std::f64::consts::TAU, quality);
                (0..n)
                    .map(|i| {
                        let t = std::f64::consts::TAU * (i as f64) / (n as f64);
                        arc_point(*center, *radius, t)
                    })
                    .collect()
            }
            Curve2d::Rect {
                corner,
                width,
                height,
            } => vec![
                *corner,
                [corner[0] + width, corner[1]],
                [corner[0] + width, corner[1] + height],
                [corner[0], corner[1] + height],
            ],
            Curve2d::Poly { points, .. } => points.clone(),
        }
    }

    fn profile(&self) -> ElementProfile {
        let (segments, closed) = match self {
            Curve2d::Segment { start, end } => (
                vec![ProfileSegment::Line {
                    start: *start,
                    end: *end,
                }],
                false,
            ),
            Curve2d::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => (
                vec![ProfileSegment::Arc {
                    center: *center,
                    radius: *radius,
                    start_angle: *start_angle,
                    end_angle: *end_angle,
                }],
                false,
            ),
            Curve2d::Circle { center, radius } => (
                vec![ProfileSegment::Circle {
                    center: *center,
                    radius: *radius,
                }],
                true,
            ),
            Curve2d::Rect { .. } | Curve2d::Poly { .. } => {
                let pts = self.sample(DEFAULT_QUALITY);
                let closed = self.is_closed();
                let mut segments = Vec::new();
                let count = if closed { pts.len() } else { pts.len() - 1 };
                for i in 0..count {
                    segments.push(ProfileSegment::Line {
                        start: pts[i],
                        end: pts[(i + 1) % pts.len()],
                    });
                }
                (segments, closed)
            }
        };
        ElementProfile { segments, closed }
    }
}

impl PlanarKernel {
    pub fn new() -> Self {
        PlanarKernel {
            serial: 0,
            planes: HashMap::new(),
            sketches: HashMap::new(),
            solids: HashMap::new(),
        }
    }

    fn next_handle(&mut self, prefix: &str) -> ShapeHandle {
        self.serial += 1;
        ShapeHandle(format!("{}-{}", prefix, self.serial))
    }

    fn sketch(&self, handle: &ShapeHandle) -> Result<&SketchState, KernelError> {
        self.sketches
            .get(handle.as_str())
            .ok_or_else(|| KernelError::InvalidGeometry(format!("unknown sketch handle '{handle}'")))
    }

    fn solid(&self, handle: &ShapeHandle) -> Result<&SolidState, KernelError> {
        self.solids
            .get(handle.as_str())
            .ok_or_else(|| KernelError::InvalidGeometry(format!("unknown shape handle '{handle}'")))
    }

    fn create_plane(&mut self, plane_type: PlaneType, origin: [f64; 3]) -> KernelOutcome {
        let frame = Frame::new(plane_type, origin);
        let handle = self.next_handle("plane");
        self.planes.insert(handle.0.clone(), PlaneState { frame });
        debug!(handle = %handle, %plane_type, "plane created");
        Ok(KernelResult {
            shape: Some(handle),
            frame: Some(frame.to_plane_frame()),
            ..KernelResult::default()
        })
    }

    fn create_sketch(&mut self, plane: &ShapeHandle) -> KernelOutcome {
        let frame = self
            .planes
            .get(plane.as_str())
            .map(|p| p.frame)
            .ok_or_else(|| {
                KernelError::InvalidGeometry(format!("unknown plane handle '{plane}'"))
            })?;
        let handle = self.next_handle("sketch");
        self.sketches.insert(
            handle.0.clone(),
            SketchState {
                frame,
                elements: IndexMap::new(),
            },
        );
        Ok(KernelResult {
            shape: Some(handle),
            frame: Some(frame.to_plane_frame()),
            ..KernelResult::default()
        })
    }

    fn add_element(&mut self, sketch: &ShapeHandle, geometry: &ElementGeometry) -> KernelOutcome {
        let curve = Curve2d::from_geometry(geometry)?;
        let profile = curve.profile();
        let handle = self.next_handle("edge");
        let state = self.sketches.get_mut(sketch.as_str()).ok_or_else(|| {
            KernelError::InvalidGeometry(format!("unknown sketch handle '{sketch}'"))
        })?;
        state.elements.insert(handle.0.clone(), curve);
        Ok(KernelResult {
            shape: Some(handle),
            profile: Some(profile),
            ..KernelResult::default()
        })
    }

    /// Insert a tangent arc between two adjacent line elements, trimming both
    /// lines back to the tangent points.
    fn add_fillet(
        &mut self,
        sketch: &ShapeHandle,
        element1: &ShapeHandle,
        element2: &ShapeHandle,
        radius: f64,
    ) -> KernelOutcome {
        if radius <= EPS {
            return Err(KernelError::InvalidGeometry(
                "fillet radius must be positive".into(),
            ));
        }
        let state = self.sketch(sketch)?;
        let line = |handle: &ShapeHandle| -> Result<([f64; 2], [f64; 2]), KernelError> {
            match state.elements.get(handle.as_str()) {
                Some(Curve2d::Segment { start, end }) => Ok((*start, *end)),
                Some(_) => Err(KernelError::InvalidGeometry(format!(
                    "fillet requires line elements, '{handle}' is not a line"
                ))),
                None => Err(KernelError::InvalidGeometry(format!(
                    "unknown element handle '{handle}'"
                ))),
            }
        };
        let (a1, b1) = line(element1)?;
        let (a2, b2) = line(element2)?;

        // Shared endpoint within tolerance is the corner to round.
        let corner = [(b1, a1, a2, b2), (b1, a1, b2, a2), (a1, b1, a2, b2), (a1, b1, b2, a2)]
            .into_iter()
            .find(|(c1, _, c2, _)| dist2(*c1, *c2) <= JOIN_TOL)
            .ok_or_else(|| {
                KernelError::InvalidGeometry(
                    "elements are not adjacent: no shared endpoint".into(),
                )
            })?;
        let (c, far1, _, far2) = corner;

        let u = normalize2(sub2(far1, c));
        let v = normalize2(sub2(far2, c));
        let cos_theta = (u[0] * v[0] + u[1] * v[1]).clamp(-1.0, 1.0);
        let theta = cos_theta.acos();
        if theta < 1e-6 || theta > std::f64::consts::PI - 1e-6 {
            return Err(KernelError::InvalidGeometry(
                "elements are collinear, cannot fillet".into(),
            ));
        }

        let trim = radius / (theta / 2.0).tan();
        if trim >= dist2(far1, c).sqrt() || trim >= dist2(far2, c).sqrt() {
            return Err(KernelError::InvalidGeometry(format!(
                "fillet radius {radius} too large for the adjacent elements"
            )));
        }

        let t1 = [c[0] + u[0] * trim, c[1] + u[1] * trim];
        let t2 = [c[0] + v[0] * trim, c[1] + v[1] * trim];
        let bisector = normalize2([u[0] + v[0], u[1] + v[1]]);
        let center_dist = radius / (theta / 2.0).sin();
        let center = [c[0] + bisector[0] * center_dist, c[1] + bisector[1] * center_dist];

        let start_angle = (t1[1] - center[1]).atan2(t1[0] - center[0]);
        let raw_end = (t2[1] - center[1]).atan2(t2[0] - center[0]);
        // Sweep the short way around so the arc hugs the corner.
        let mut sweep = raw_end - start_angle;
        if sweep > std::f64::consts::PI {
            sweep -= std::f64::consts::TAU;
        } else if sweep < -std::f64::consts::PI {
            sweep += std::f64::consts::TAU;
        }
        let arc = Curve2d::Arc {
            center,
            radius,
            start_angle,
            end_angle: start_angle + sweep,
        };
        let profile = arc.profile();

        let handle = self.next_handle("edge");
        let state = self.sketches.get_mut(sketch.as_str()).ok_or_else(|| {
            KernelError::InvalidGeometry(format!("unknown sketch handle '{sketch}'"))
        })?;
        trim_line(state.elements.get_mut(element1.as_str()), c, t1);
        trim_line(state.elements.get_mut(element2.as_str()), c, t2);
        state.elements.insert(handle.0.clone(), arc);

        Ok(KernelResult {
            shape: Some(handle),
            profile: Some(profile),
            ..KernelResult::default()
        })
    }

    fn extrude(
        &mut self,
        sketch: &ShapeHandle,
        element: Option<&ShapeHandle>,
        distance: f64,
        direction: ExtrudeDirection,
    ) -> KernelOutcome {
        let state = self.sketch(sketch)?;
        let curves: Vec<Curve2d> = match element {
            Some(handle) => {
                let curve = state.elements.get(handle.as_str()).ok_or_else(|| {
                    KernelError::InvalidGeometry(format!("unknown element handle '{handle}'"))
                })?;
                vec![curve.clone()]
            }
            None => {
                if state.elements.is_empty() {
                    return Err(KernelError::InvalidGeometry(
                        "sketch has no elements to extrude".into(),
                    ));
                }
                state.elements.values().cloned().collect()
            }
        };
        let (curves, closed) = assemble_profile(curves)?;

        let signed = match direction {
            ExtrudeDirection::Normal => distance,
            ExtrudeDirection::Reverse => -distance,
        };
        let prism = Prism {
            frame: state.frame,
            curves,
            closed,
            distance: signed,
        };
        let mesh = tessellate_prisms(std::slice::from_ref(&prism), DEFAULT_QUALITY);
        let bounding_box = BoundingBox::from_vertices(&mesh.vertices);

        let handle = self.next_handle("solid");
        self.solids
            .insert(handle.0.clone(), SolidState { prisms: vec![prism] });
        debug!(handle = %handle, closed, distance = signed, "extruded profile");
        Ok(KernelResult {
            shape: Some(handle),
            mesh: Some(mesh),
            bounding_box,
            ..KernelResult::default()
        })
    }

    fn boolean(
        &mut self,
        kind: BooleanKind,
        target: &ShapeHandle,
        tool: &ShapeHandle,
    ) -> KernelOutcome {
        let target_prisms = self.solid(target)?.prisms.clone();
        let tool_prisms = self.solid(tool)?.prisms.clone();

        if kind != BooleanKind::Union {
            let target_box = prisms_bounding_box(&target_prisms);
            let tool_box = prisms_bounding_box(&tool_prisms);
            let overlaps = match (target_box, tool_box) {
                (Some(a), Some(b)) => a.intersection(&b).is_some(),
                _ => false,
            };
            if !overlaps {
                return Err(KernelError::InvalidGeometry(format!(
                    "{kind}: target and tool shapes do not intersect"
                )));
            }
        }

        let prisms = match kind {
            BooleanKind::Union => {
                let mut all = target_prisms;
                all.extend(tool_prisms);
                all
            }
            // Mesh-level approximation: the target's geometry stands in for
            // the exact result.
            BooleanKind::Cut | BooleanKind::Intersect => target_prisms,
        };

        let mesh = tessellate_prisms(&prisms, DEFAULT_QUALITY);
        let bounding_box = BoundingBox::from_vertices(&mesh.vertices);

        // The tool shape is consumed destructively.
        self.solids.remove(tool.as_str());

        let handle = self.next_handle("solid");
        self.solids.insert(handle.0.clone(), SolidState { prisms });
        Ok(KernelResult {
            shape: Some(handle),
            mesh: Some(mesh),
            bounding_box,
            tool_consumed: true,
            ..KernelResult::default()
        })
    }

    fn tessellate(&self, shape: &ShapeHandle, quality: f64) -> KernelOutcome {
        let solid = self.solid(shape)?;
        let mesh = tessellate_prisms(&solid.prisms, quality);
        let bounding_box = BoundingBox::from_vertices(&mesh.vertices);
        Ok(KernelResult {
            mesh: Some(mesh),
            bounding_box,
            ..KernelResult::default()
        })
    }
}

impl Default for PlanarKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryKernel for PlanarKernel {
    fn name(&self) -> &str {
        "planar"
    }

    fn supports_rectangles(&self) -> bool {
        true
    }

    fn execute(&mut self, op: KernelOp) -> KernelOutcome {
        match op {
            KernelOp::CreatePlane { plane_type, origin } => self.create_plane(plane_type, origin),
            KernelOp::CreateSketch { plane } => self.create_sketch(&plane),
            KernelOp::AddElement { sketch, geometry } => self.add_element(&sketch, &geometry),
            KernelOp::AddFillet {
                sketch,
                element1,
                element2,
                radius,
            } => self.add_fillet(&sketch, &element1, &element2, radius),
            KernelOp::Extrude {
                sketch,
                element,
                distance,
                direction,
            } => self.extrude(&sketch, element.as_ref(), distance, direction),
            KernelOp::Boolean { kind, target, tool } => self.boolean(kind, &target, &tool),
            KernelOp::Tessellate { shape, quality } => self.tessellate(&shape, quality),
        }
    }

    fn reset(&mut self) {
        self.planes.clear();
        self.sketches.clear();
        self.solids.clear();
    }
}

fn trim_line(curve: Option<&mut Curve2d>, corner: [f64; 2], tangent: [f64; 2]) {
    if let Some(Curve2d::Segment { start, end }) = curve {
        if dist2(*start, corner) <= JOIN_TOL {
            *start = tangent;
        } else {
            *end = tangent;
        }
    }
}

/// Order open curves into a single chain, flipping orientation as needed.
/// A single closed primitive passes through as a loop of its own; mixing
/// closed primitives with anything else is rejected.
fn assemble_profile(curves: Vec<Curve2d>) -> Result<(Vec<Curve2d>, bool), KernelError> {
    if curves.len() == 1 {
        let closed = curves[0].is_closed();
        return Ok((curves, closed));
    }
    if curves.iter().any(|c| c.is_closed()) {
        return Err(KernelError::InvalidGeometry(
            "profile mixes closed elements with other elements".into(),
        ));
    }

    let mut remaining = curves;
    let first = remaining.remove(0);
    let (chain_start, mut cursor) = first.endpoints().expect("open curve has endpoints");
    let mut chain = vec![first];

    while !remaining.is_empty() {
        let next = remaining.iter().enumerate().find_map(|(i, c)| {
            let (a, b) = c.endpoints().expect("open curve has endpoints");
            if dist2(a, cursor) <= JOIN_TOL {
                Some((i, false, b))
            } else if dist2(b, cursor) <= JOIN_TOL {
                Some((i, true, a))
            } else {
                None
            }
        });
        match next {
            Some((i, flip, far)) => {
                let mut curve = remaining.remove(i);
                if flip {
                    curve = reverse_curve(curve);
                }
                chain.push(curve);
                cursor = far;
            }
            None => {
                return Err(KernelError::InvalidGeometry(
                    "disconnected profile: sketch elements do not form a single chain".into(),
                ));
            }
        }
    }

    let closed = dist2(cursor, chain_start) <= JOIN_TOL;
    Ok((chain, closed))
}

fn reverse_curve(curve: Curve2d) -> Curve2d {
    match curve {
        Curve2d::Segment { start, end } => Curve2d::Segment {
            start: end,
            end: start,
        },
        Curve2d::Arc {
            center,
            radius,
            start_angle,
            end_angle,
        } => Curve2d::Arc {
            center,
            radius,
            start_angle: end_angle,
            end_angle: start_angle,
        },
        Curve2d::Poly { mut points, closed } => {
            points.reverse();
            Curve2d::Poly { points, closed }
        }
        closed => closed,
    }
}

/// Sample a chained profile into a point path; closed profiles return a ring
/// without the repeated start point.
fn sample_profile(curves: &[Curve2d], closed: bool, quality: f64) -> Vec<[f64; 2]> {
    if curves.len() == 1 && curves[0].is_closed() {
        return curves[0].sample(quality);
    }
    let mut points: Vec<[f64; 2]> = Vec::new();
    for curve in curves {
        let samples = curve.sample(quality);
        let skip = if let (Some(last), Some(first)) = (points.last(), samples.first()) {
            usize::from(dist2(*last, *first) <= JOIN_TOL)
        } else {
            0
        };
        points.extend(samples.into_iter().skip(skip));
    }
    if closed {
        if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
            if dist2(first, last) <= JOIN_TOL {
                points.pop();
            }
        }
    }
    points
}

fn tessellate_prisms(prisms: &[Prism], quality: f64) -> MeshPayload {
    let mut builder = MeshBuilder::default();
    for prism in prisms {
        let mut ring = sample_profile(&prism.curves, prism.closed, quality);
        if ring.len() < 2 {
            continue;
        }
        if prism.closed && signed_area(&ring) < 0.0 {
            ring.reverse();
        }
        let frame = &prism.frame;
        let d = prism.distance;

        let edge_count = if prism.closed {
            ring.len()
        } else {
            ring.len() - 1
        };
        for i in 0..edge_count {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            let v0 = frame.lift(a, 0.0);
            let v1 = frame.lift(b, 0.0);
            let v2 = frame.lift(b, d);
            let v3 = frame.lift(a, d);
            let normal = triangle_normal(v0, v1, v3);
            builder.push_triangle(v0, v1, v2, normal);
            builder.push_triangle(v0, v2, v3, normal);
        }

        if prism.closed {
            let centroid = polygon_centroid(&ring);
            let bottom_normal = scale3(frame.normal, -d.signum());
            let top_normal = scale3(frame.normal, d.signum());
            for i in 0..ring.len() {
                let a = ring[i];
                let b = ring[(i + 1) % ring.len()];
                builder.push_triangle(
                    frame.lift(centroid, 0.0),
                    frame.lift(b, 0.0),
                    frame.lift(a, 0.0),
                    bottom_normal,
                );
                builder.push_triangle(
                    frame.lift(centroid, d),
                    frame.lift(a, d),
                    frame.lift(b, d),
                    top_normal,
                );
            }
        }
    }
    builder.into_mesh(quality)
}

fn prisms_bounding_box(prisms: &[Prism]) -> Option<BoundingBox> {
    let mesh = tessellate_prisms(prisms, DEFAULT_QUALITY);
    BoundingBox::from_vertices(&mesh.vertices)
}

/// Triangle-soup mesh accumulator; vertices are duplicated per triangle so
/// each face keeps a crisp normal.
#[derive(Default)]
struct MeshBuilder {
    vertices: Vec<f64>,
    faces: Vec<u32>,
    normals: Vec<f64>,
}

impl MeshBuilder {
    fn push_triangle(&mut self, a: [f64; 3], b: [f64; 3], c: [f64; 3], normal: [f64; 3]) {
        let base = (self.vertices.len() / 3) as u32;
        for vertex in [a, b, c] {
            self.vertices.extend_from_slice(&vertex);
            self.normals.extend_from_slice(&normal);
        }
        self.faces.extend_from_slice(&[base, base + 1, base + 2]);
    }

    fn into_mesh(self, quality: f64) -> MeshPayload {
        let vertex_count = self.vertices.len() / 3;
        let face_count = self.faces.len() / 3;
        MeshPayload {
            vertices: self.vertices,
            faces: self.faces,
            normals: self.normals,
            metadata: MeshMetadata {
                vertex_count,
                face_count,
                tessellation_quality: quality,
            },
        }
    }
}

/// Segment count for an arc so the chord deflection stays under `quality`.
fn arc_segment_count(radius: f64, sweep: f64, quality: f64) -> usize {
    if radius <= quality {
        return MIN_ARC_SEGMENTS;
    }
    let step = 2.0 * (1.0 - quality / radius).clamp(-1.0, 1.0).acos();
    if step <= EPS {
        return MAX_ARC_SEGMENTS;
    }
    ((sweep / step).ceil() as usize).clamp(MIN_ARC_SEGMENTS, MAX_ARC_SEGMENTS)
}

fn arc_point(center: [f64; 2], radius: f64, angle: f64) -> [f64; 2] {
    [
        center[0] + radius * angle.cos(),
        center[1] + radius * angle.sin(),
    ]
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

fn sub2(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn normalize2(v: [f64; 2]) -> [f64; 2] {
    let len = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if len < EPS {
        return [0.0, 0.0];
    }
    [v[0] / len, v[1] / len]
}

fn scale3(v: [f64; 3], s: f64) -> [f64; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

fn triangle_normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        ab[1] * ac[2] - ab[2] * ac[1],
        ab[2] * ac[0] - ab[0] * ac[2],
        ab[0] * ac[1] - ab[1] * ac[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len < EPS {
        return [0.0, 0.0, 1.0];
    }
    [n[0] / len, n[1] / len, n[2] / len]
}

fn signed_area(ring: &[[f64; 2]]) -> f64 {
    let mut area = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        area += a[0] * b[1] - b[0] * a[1];
    }
    area / 2.0
}

fn polygon_centroid(ring: &[[f64; 2]]) -> [f64; 2] {
    let n = ring.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in ring {
        cx += p[0];
        cy += p[1];
    }
    [cx / n, cy / n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn plane_and_sketch(kernel: &mut PlanarKernel) -> ShapeHandle {
        let plane = kernel
            .execute(KernelOp::CreatePlane {
                plane_type: PlaneType::Xy,
                origin: [0.0, 0.0, 0.0],
            })
            .unwrap()
            .shape
            .unwrap();
        kernel
            .execute(KernelOp::CreateSketch { plane })
            .unwrap()
            .shape
            .unwrap()
    }

    fn add_line(kernel: &mut PlanarKernel, sketch: &ShapeHandle, a: [f64; 2], b: [f64; 2]) -> ShapeHandle {
        kernel
            .execute(KernelOp::AddElement {
                sketch: sketch.clone(),
                geometry: ElementGeometry::Line { start: a, end: b },
            })
            .unwrap()
            .shape
            .unwrap()
    }

    #[test]
    fn extruded_rectangle_is_a_solid_box() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        kernel
            .execute(KernelOp::AddElement {
                sketch: sketch.clone(),
                geometry: ElementGeometry::Rectangle {
                    corner: [0.0, 0.0],
                    width: 4.0,
                    height: 3.0,
                },
            })
            .unwrap();

        let result = kernel
            .execute(KernelOp::Extrude {
                sketch,
                element: None,
                distance: 2.0,
                direction: ExtrudeDirection::Normal,
            })
            .unwrap();

        let bbox = result.bounding_box.unwrap();
        assert!(!bbox.is_degenerate());
        assert_eq!(bbox.min, [0.0, 0.0, 0.0]);
        assert_eq!(bbox.max, [4.0, 3.0, 2.0]);

        let mesh = result.mesh.unwrap();
        // 4 sides * 2 + 4 cap fan triangles per cap
        assert_eq!(mesh.triangle_count(), 16);
    }

    #[test]
    fn fillet_trims_lines_and_inserts_tangent_arc() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        let l1 = add_line(&mut kernel, &sketch, [0.0, 0.0], [10.0, 0.0]);
        let l2 = add_line(&mut kernel, &sketch, [10.0, 0.0], [10.0, 10.0]);

        let result = kernel
            .execute(KernelOp::AddFillet {
                sketch: sketch.clone(),
                element1: l1,
                element2: l2,
                radius: 1.0,
            })
            .unwrap();

        let profile = result.profile.unwrap();
        assert_matches!(
            profile.segments[0],
            ProfileSegment::Arc { radius, center, .. } if (radius - 1.0).abs() < 1e-9
                && (center[0] - 9.0).abs() < 1e-9
                && (center[1] - 1.0).abs() < 1e-9
        );

        let state = kernel.sketches.values().next().unwrap();
        let trimmed: Vec<_> = state
            .elements
            .values()
            .filter_map(|c| c.endpoints())
            .collect();
        // Both lines now stop at the tangent points (9,0) and (10,1).
        assert!(trimmed
            .iter()
            .any(|(_, e)| dist2(*e, [9.0, 0.0]) < 1e-12));
        assert!(trimmed
            .iter()
            .any(|(s, _)| dist2(*s, [10.0, 1.0]) < 1e-12));
    }

    #[test]
    fn oversized_fillet_radius_is_rejected() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        let l1 = add_line(&mut kernel, &sketch, [0.0, 0.0], [2.0, 0.0]);
        let l2 = add_line(&mut kernel, &sketch, [2.0, 0.0], [2.0, 2.0]);

        let result = kernel.execute(KernelOp::AddFillet {
            sketch,
            element1: l1,
            element2: l2,
            radius: 5.0,
        });
        assert_matches!(result, Err(KernelError::InvalidGeometry(_)));
    }

    #[test]
    fn non_adjacent_lines_cannot_be_filleted() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        let l1 = add_line(&mut kernel, &sketch, [0.0, 0.0], [1.0, 0.0]);
        let l2 = add_line(&mut kernel, &sketch, [5.0, 5.0], [6.0, 5.0]);

        let result = kernel.execute(KernelOp::AddFillet {
            sketch,
            element1: l1,
            element2: l2,
            radius: 0.1,
        });
        assert_matches!(result, Err(KernelError::InvalidGeometry(_)));
    }

    #[test]
    fn open_chain_extrudes_to_a_sheet_body() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        add_line(&mut kernel, &sketch, [0.0, 0.0], [10.0, 0.0]);
        add_line(&mut kernel, &sketch, [10.0, 0.0], [10.0, 10.0]);

        let result = kernel
            .execute(KernelOp::Extrude {
                sketch,
                element: None,
                distance: 10.0,
                direction: ExtrudeDirection::Normal,
            })
            .unwrap();

        let bbox = result.bounding_box.unwrap();
        assert!(!bbox.is_degenerate());
        let mesh = result.mesh.unwrap();
        // Two ribbon quads, no caps.
        assert_eq!(mesh.triangle_count(), 4);
    }

    #[test]
    fn disconnected_elements_fail_to_extrude() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        add_line(&mut kernel, &sketch, [0.0, 0.0], [1.0, 0.0]);
        add_line(&mut kernel, &sketch, [5.0, 5.0], [6.0, 5.0]);

        let result = kernel.execute(KernelOp::Extrude {
            sketch,
            element: None,
            distance: 1.0,
            direction: ExtrudeDirection::Normal,
        });
        assert_matches!(result, Err(KernelError::InvalidGeometry(_)));
    }

    #[test]
    fn intersect_of_disjoint_solids_is_invalid_geometry() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);

        let mut extrude_rect = |kernel: &mut PlanarKernel, corner: [f64; 2]| {
            let element = kernel
                .execute(KernelOp::AddElement {
                    sketch: sketch.clone(),
                    geometry: ElementGeometry::Rectangle {
                        corner,
                        width: 1.0,
                        height: 1.0,
                    },
                })
                .unwrap()
                .shape
                .unwrap();
            kernel
                .execute(KernelOp::Extrude {
                    sketch: sketch.clone(),
                    element: Some(element),
                    distance: 1.0,
                    direction: ExtrudeDirection::Normal,
                })
                .unwrap()
                .shape
                .unwrap()
        };

        let a = extrude_rect(&mut kernel, [0.0, 0.0]);
        let b = extrude_rect(&mut kernel, [100.0, 100.0]);

        let result = kernel.execute(KernelOp::Boolean {
            kind: BooleanKind::Intersect,
            target: a,
            tool: b,
        });
        assert_matches!(result, Err(KernelError::InvalidGeometry(_)));
    }

    #[test]
    fn boolean_consumes_the_tool_shape() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);

        let mut solid_of = |kernel: &mut PlanarKernel, corner: [f64; 2], size: f64| {
            let element = kernel
                .execute(KernelOp::AddElement {
                    sketch: sketch.clone(),
                    geometry: ElementGeometry::Rectangle {
                        corner,
                        width: size,
                        height: size,
                    },
                })
                .unwrap()
                .shape
                .unwrap();
            kernel
                .execute(KernelOp::Extrude {
                    sketch: sketch.clone(),
                    element: Some(element),
                    distance: size,
                    direction: ExtrudeDirection::Normal,
                })
                .unwrap()
                .shape
                .unwrap()
        };

        let target = solid_of(&mut kernel, [0.0, 0.0], 10.0);
        let tool = solid_of(&mut kernel, [5.0, 5.0], 10.0);

        let result = kernel
            .execute(KernelOp::Boolean {
                kind: BooleanKind::Cut,
                target,
                tool: tool.clone(),
            })
            .unwrap();
        assert!(result.tool_consumed);

        // The consumed tool handle no longer tessellates.
        let gone = kernel.execute(KernelOp::Tessellate {
            shape: tool,
            quality: 0.1,
        });
        assert_matches!(gone, Err(KernelError::InvalidGeometry(_)));
    }

    #[test]
    fn tessellation_quality_drives_circle_resolution() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        let circle = kernel
            .execute(KernelOp::AddElement {
                sketch: sketch.clone(),
                geometry: ElementGeometry::Circle {
                    center: [0.0, 0.0],
                    radius: 5.0,
                },
            })
            .unwrap()
            .shape
            .unwrap();
        let solid = kernel
            .execute(KernelOp::Extrude {
                sketch,
                element: Some(circle),
                distance: 2.0,
                direction: ExtrudeDirection::Normal,
            })
            .unwrap()
            .shape
            .unwrap();

        let coarse = kernel
            .execute(KernelOp::Tessellate {
                shape: solid.clone(),
                quality: 0.5,
            })
            .unwrap()
            .mesh
            .unwrap();
        let fine = kernel
            .execute(KernelOp::Tessellate {
                shape: solid,
                quality: 0.005,
            })
            .unwrap()
            .mesh
            .unwrap();
        assert!(fine.triangle_count() > coarse.triangle_count());
    }

    #[test]
    fn reset_drops_all_state() {
        let mut kernel = PlanarKernel::new();
        let sketch = plane_and_sketch(&mut kernel);
        add_line(&mut kernel, &sketch, [0.0, 0.0], [1.0, 0.0]);
        kernel.reset();
        assert!(kernel.planes.is_empty());
        assert!(kernel.sketches.is_empty());
        assert!(kernel.solids.is_empty());
    }
}
