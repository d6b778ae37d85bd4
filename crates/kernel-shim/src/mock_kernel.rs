//! MockKernel — deterministic test double implementing `Kernel`.
//!
//! Produces synthetic topology with predictable element counts and
//! signatures. Used by topo-naming and doc-engine for unit testing.

use std::collections::HashMap;

use nalgebra::Matrix4;

use crate::topology::{Topology, TopologyBuilder};
use crate::traits::{ElementTrace, Kernel, OpOutcome, TraceStatus};
use crate::types::{ElementSignature, KernelError};
use tenon_types::{IndexedName, ShapeKind};

const MERGE_TOL: f64 = 1e-7;
const MERGE_ATOL: f64 = 1e-9;

/// Deterministic test double for the geometry kernel.
#[derive(Debug, Default)]
pub struct MockKernel {
    fail_next: Option<String>,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next mutating operation fail with the given message.
    pub fn fail_next_op(&mut self, reason: &str) {
        self.fail_next = Some(reason.to_string());
    }

    fn take_failure(&mut self) -> Option<String> {
        self.fail_next.take()
    }
}

impl Kernel for MockKernel {
    fn make_box(&mut self, w: f64, h: f64, d: f64) -> Result<Topology, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::Other { message: reason });
        }
        Ok(make_box_topology(w, h, d))
    }

    fn boolean_fuse(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::BooleanFailed { reason });
        }
        Ok(fuse(a, b))
    }

    fn boolean_cut(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::BooleanFailed { reason });
        }
        Ok(carry_with_tool_marks(a, b))
    }

    fn boolean_common(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::BooleanFailed { reason });
        }
        Ok(carry_with_tool_marks(a, b))
    }

    fn chamfer_edges(
        &mut self,
        base: &Topology,
        edges: &[IndexedName],
        size: f64,
    ) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::ChamferFailed { reason });
        }
        replace_edges_with_faces(base, edges, size, "planar")
            .ok_or_else(|| KernelError::ChamferFailed {
                reason: "edge not found in shape".to_string(),
            })
    }

    fn fillet_edges(
        &mut self,
        base: &Topology,
        edges: &[IndexedName],
        radius: f64,
    ) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::FilletFailed { reason });
        }
        replace_edges_with_faces(base, edges, radius, "cylindrical")
            .ok_or_else(|| KernelError::FilletFailed {
                reason: "edge not found in shape".to_string(),
            })
    }

    fn transformed(
        &mut self,
        base: &Topology,
        mat: &Matrix4<f64>,
    ) -> Result<Topology, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::TransformFailed { reason });
        }
        Ok(base.transformed(mat))
    }

    fn is_valid(&self, shape: &Topology) -> bool {
        shape.valid
    }

    fn fix(&mut self, shape: &Topology) -> Result<OpOutcome, KernelError> {
        if let Some(reason) = self.take_failure() {
            return Err(KernelError::FixFailed { reason });
        }
        let mut repaired = shape.clone();
        repaired.valid = true;
        let traces = identity_traces(shape);
        Ok(OpOutcome {
            topology: repaired,
            traces,
        })
    }
}

/// Box solid: 8 vertices, 12 edges, 6 faces, one shell, one solid.
/// Origin at (0,0,0), extending to (w,h,d).
fn make_box_topology(w: f64, h: f64, d: f64) -> Topology {
    let positions = [
        [0.0, 0.0, 0.0],
        [w, 0.0, 0.0],
        [w, h, 0.0],
        [0.0, h, 0.0],
        [0.0, 0.0, d],
        [w, 0.0, d],
        [w, h, d],
        [0.0, h, d],
    ];

    let mut b = TopologyBuilder::new(ShapeKind::Solid);
    let verts: Vec<IndexedName> = positions
        .iter()
        .map(|&p| b.add(ShapeKind::Vertex, ElementSignature::point(p), vec![]))
        .collect();

    // 4 bottom, 4 top, 4 vertical
    let edge_pairs = [
        (0, 1),
        (1, 2),
        (2, 3),
        (3, 0),
        (4, 5),
        (5, 6),
        (6, 7),
        (7, 4),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];
    let edges: Vec<IndexedName> = edge_pairs
        .iter()
        .map(|&(s, e)| {
            let sp = positions[s];
            let ep = positions[e];
            let mid = [
                (sp[0] + ep[0]) / 2.0,
                (sp[1] + ep[1]) / 2.0,
                (sp[2] + ep[2]) / 2.0,
            ];
            let len = ((ep[0] - sp[0]).powi(2) + (ep[1] - sp[1]).powi(2)
                + (ep[2] - sp[2]).powi(2))
            .sqrt();
            b.add(
                ShapeKind::Edge,
                ElementSignature::curve("line", mid, len),
                vec![verts[s], verts[e]],
            )
        })
        .collect();

    // (edge indices, vertex indices, normal, centroid, area)
    let face_defs: [(&[usize], &[usize], [f64; 3], [f64; 3], f64); 6] = [
        (
            &[0, 1, 2, 3],
            &[0, 1, 2, 3],
            [0.0, 0.0, -1.0],
            [w / 2.0, h / 2.0, 0.0],
            w * h,
        ),
        (
            &[4, 5, 6, 7],
            &[4, 5, 6, 7],
            [0.0, 0.0, 1.0],
            [w / 2.0, h / 2.0, d],
            w * h,
        ),
        (
            &[0, 9, 4, 8],
            &[0, 1, 5, 4],
            [0.0, -1.0, 0.0],
            [w / 2.0, 0.0, d / 2.0],
            w * d,
        ),
        (
            &[2, 10, 6, 11],
            &[2, 3, 7, 6],
            [0.0, 1.0, 0.0],
            [w / 2.0, h, d / 2.0],
            w * d,
        ),
        (
            &[3, 8, 7, 11],
            &[0, 3, 7, 4],
            [-1.0, 0.0, 0.0],
            [0.0, h / 2.0, d / 2.0],
            h * d,
        ),
        (
            &[1, 9, 5, 10],
            &[1, 2, 6, 5],
            [1.0, 0.0, 0.0],
            [w, h / 2.0, d / 2.0],
            h * d,
        ),
    ];

    let mut faces = Vec::new();
    for (fe, fv, normal, centroid, area) in face_defs {
        let mut contains: Vec<IndexedName> = fv.iter().map(|&i| verts[i]).collect();
        contains.extend(fe.iter().map(|&i| edges[i]));
        faces.push(b.add(
            ShapeKind::Face,
            ElementSignature::surface("planar", centroid, normal, area),
            contains,
        ));
    }

    let mut all: Vec<IndexedName> = verts.iter().chain(&edges).chain(&faces).copied().collect();
    let shell = b.add(
        ShapeKind::Shell,
        ElementSignature::curve("shell", [w / 2.0, h / 2.0, d / 2.0], 0.0),
        all.clone(),
    );
    all.push(shell);
    b.add(
        ShapeKind::Solid,
        ElementSignature::curve("solid", [w / 2.0, h / 2.0, d / 2.0], 0.0),
        all,
    );
    b.finish()
}

fn identity_traces(shape: &Topology) -> Vec<ElementTrace> {
    let mut traces = Vec::new();
    for kind in ShapeKind::ALL {
        for (name, _) in shape.elements(kind) {
            traces.push(ElementTrace {
                result: name,
                sources: vec![(0, name)],
                status: TraceStatus::Carried,
            });
        }
    }
    traces
}

/// Synthetic fuse: coincident face pairs vanish (they become interior),
/// coincident vertices and edges merge, everything else is carried, and a
/// fresh shell and solid span the union.
fn fuse(a: &Topology, b: &Topology) -> OpOutcome {
    let leaf_kinds = [
        ShapeKind::Vertex,
        ShapeKind::Edge,
        ShapeKind::Wire,
        ShapeKind::Face,
    ];

    // b element -> coincident a element, per leaf kind
    let mut merged: HashMap<IndexedName, IndexedName> = HashMap::new();
    for kind in leaf_kinds {
        for (bn, be) in b.elements(kind) {
            for (an, ae) in a.elements(kind) {
                if ae
                    .signature
                    .coincides(&be.signature, true, MERGE_TOL, MERGE_ATOL)
                {
                    merged.insert(bn, an);
                    break;
                }
            }
        }
    }
    let interior_a: Vec<IndexedName> = merged
        .iter()
        .filter(|(bn, _)| bn.kind == ShapeKind::Face)
        .map(|(_, an)| *an)
        .collect();

    let mut builder = TopologyBuilder::new(ShapeKind::Solid);
    let mut remap_a: HashMap<IndexedName, IndexedName> = HashMap::new();
    let mut remap_b: HashMap<IndexedName, IndexedName> = HashMap::new();

    for kind in leaf_kinds {
        for (an, _) in a.elements(kind) {
            if kind == ShapeKind::Face && interior_a.contains(&an) {
                continue;
            }
            remap_a.insert(an, builder.reserve(kind));
        }
        for (bn, _) in b.elements(kind) {
            if let Some(an) = merged.get(&bn) {
                if let Some(new) = remap_a.get(an) {
                    remap_b.insert(bn, *new);
                }
                continue;
            }
            remap_b.insert(bn, builder.reserve(kind));
        }
    }

    let mut fill = |topo: &Topology, remap: &HashMap<IndexedName, IndexedName>, own: bool| {
        for kind in leaf_kinds {
            for (old, elem) in topo.elements(kind) {
                let Some(&new) = remap.get(&old) else { continue };
                if !own && merged.contains_key(&old) {
                    continue; // filled from a's side
                }
                let contains = elem
                    .contains
                    .iter()
                    .filter_map(|c| remap.get(c).copied())
                    .collect();
                builder.fill(new, elem.signature.clone(), contains);
            }
        }
    };
    fill(a, &remap_a, true);
    fill(b, &remap_b, false);

    let mut all: Vec<IndexedName> = Vec::new();
    for kind in leaf_kinds {
        for (an, _) in a.elements(kind) {
            if let Some(&new) = remap_a.get(&an) {
                all.push(new);
            }
        }
        for (bn, _) in b.elements(kind) {
            if merged.contains_key(&bn) {
                continue;
            }
            if let Some(&new) = remap_b.get(&bn) {
                all.push(new);
            }
        }
    }

    let centroid = [0.0, 0.0, 0.0];
    let shell = builder.add(
        ShapeKind::Shell,
        ElementSignature::curve("shell", centroid, 0.0),
        all.clone(),
    );
    all.push(shell);
    let solid = builder.add(
        ShapeKind::Solid,
        ElementSignature::curve("solid", centroid, 0.0),
        all,
    );

    let mut traces = Vec::new();
    for kind in leaf_kinds {
        for (an, _) in a.elements(kind) {
            let Some(&new) = remap_a.get(&an) else { continue };
            let mut sources = vec![(0, an)];
            for (bn, _) in b.elements(kind) {
                if merged.get(&bn) == Some(&an) {
                    sources.push((1, bn));
                }
            }
            traces.push(ElementTrace {
                result: new,
                sources,
                status: TraceStatus::Carried,
            });
        }
        for (bn, _) in b.elements(kind) {
            if merged.contains_key(&bn) {
                continue;
            }
            let Some(&new) = remap_b.get(&bn) else { continue };
            traces.push(ElementTrace {
                result: new,
                sources: vec![(1, bn)],
                status: TraceStatus::Carried,
            });
        }
    }

    let mut upper_sources = Vec::new();
    for (i, topo) in [a, b].into_iter().enumerate() {
        for kind in [ShapeKind::Shell, ShapeKind::Solid] {
            for (name, _) in topo.elements(kind) {
                upper_sources.push((i, name));
            }
        }
    }
    traces.push(ElementTrace {
        result: shell,
        sources: upper_sources.clone(),
        status: TraceStatus::Generated,
    });
    traces.push(ElementTrace {
        result: solid,
        sources: upper_sources,
        status: TraceStatus::Generated,
    });

    OpOutcome {
        topology: builder.finish(),
        traces,
    }
}

/// Synthetic cut/common: the base survives unchanged; base faces touching
/// the tool are carried with the tool face recorded as an extra source.
fn carry_with_tool_marks(a: &Topology, b: &Topology) -> OpOutcome {
    let mut traces = identity_traces(a);
    for trace in traces.iter_mut() {
        if trace.result.kind != ShapeKind::Face {
            continue;
        }
        let Some(sig) = a.signature(trace.result) else { continue };
        for (bn, be) in b.elements(ShapeKind::Face) {
            if sig.coincides(&be.signature, true, MERGE_TOL, MERGE_ATOL) {
                trace.sources.push((1, bn));
            }
        }
    }
    OpOutcome {
        topology: a.clone(),
        traces,
    }
}

/// Chamfer/fillet: each listed edge is replaced by a generated face; the
/// remaining elements are carried with their indices compacted.
fn replace_edges_with_faces(
    base: &Topology,
    edges: &[IndexedName],
    size: f64,
    surface_type: &str,
) -> Option<OpOutcome> {
    for e in edges {
        if e.kind != ShapeKind::Edge || base.element(*e).is_none() {
            return None;
        }
    }

    let mut builder = TopologyBuilder::new(base.kind());
    let mut remap: HashMap<IndexedName, IndexedName> = HashMap::new();
    for kind in ShapeKind::ALL {
        for (old, _) in base.elements(kind) {
            if kind == ShapeKind::Edge && edges.contains(&old) {
                continue;
            }
            remap.insert(old, builder.reserve(kind));
        }
    }

    // One generated face per removed edge, appended after the carried faces.
    let mut new_faces = Vec::new();
    for e in edges {
        let elem = base.element(*e)?;
        let contains: Vec<IndexedName> = elem
            .contains
            .iter()
            .filter_map(|c| remap.get(c).copied())
            .collect();
        let sig = ElementSignature::surface(
            surface_type,
            elem.signature.centroid,
            [0.0, 0.0, 1.0],
            size * elem.signature.size,
        );
        new_faces.push((*e, builder.add(ShapeKind::Face, sig, contains)));
    }

    for kind in ShapeKind::ALL {
        for (old, elem) in base.elements(kind) {
            let Some(&new) = remap.get(&old) else { continue };
            let mut contains: Vec<IndexedName> = elem
                .contains
                .iter()
                .filter_map(|c| remap.get(c).copied())
                .collect();
            // Containers of a removed edge adopt its replacement face.
            if matches!(
                kind,
                ShapeKind::Shell | ShapeKind::Solid | ShapeKind::CompSolid | ShapeKind::Compound
            ) {
                for (e, f) in &new_faces {
                    if elem.contains.contains(e) {
                        contains.push(*f);
                    }
                }
            }
            builder.fill(new, elem.signature.clone(), contains);
        }
    }

    let mut traces: Vec<ElementTrace> = Vec::new();
    for kind in ShapeKind::ALL {
        for (old, _) in base.elements(kind) {
            let Some(&new) = remap.get(&old) else { continue };
            traces.push(ElementTrace {
                result: new,
                sources: vec![(0, old)],
                status: TraceStatus::Carried,
            });
        }
    }
    for (e, f) in &new_faces {
        traces.push(ElementTrace {
            result: *f,
            sources: vec![(0, *e)],
            status: TraceStatus::Generated,
        });
    }

    Some(OpOutcome {
        topology: builder.finish(),
        traces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_counts() {
        let mut k = MockKernel::new();
        let topo = k.make_box(1.0, 1.0, 1.0).unwrap();
        assert_eq!(topo.count(ShapeKind::Vertex), 8);
        assert_eq!(topo.count(ShapeKind::Edge), 12);
        assert_eq!(topo.count(ShapeKind::Face), 6);
        assert_eq!(topo.count(ShapeKind::Shell), 1);
        assert_eq!(topo.count(ShapeKind::Solid), 1);
    }

    #[test]
    fn fuse_drops_coincident_faces() {
        let mut k = MockKernel::new();
        let a = k.make_box(1.0, 1.0, 1.0).unwrap();
        // Box stacked on top of a: its bottom face coincides with a's top.
        let b = k
            .make_box(1.0, 1.0, 1.0)
            .unwrap()
            .transformed(&Matrix4::new_translation(&nalgebra::Vector3::new(
                0.0, 0.0, 1.0,
            )));
        let out = k.boolean_fuse(&a, &b).unwrap();
        assert_eq!(out.topology.count(ShapeKind::Face), 10);
        assert_eq!(out.topology.count(ShapeKind::Solid), 1);
        // Merged vertices: the 4 shared corners collapse.
        assert_eq!(out.topology.count(ShapeKind::Vertex), 12);
        assert_eq!(out.topology.count(ShapeKind::Edge), 20);
    }

    #[test]
    fn chamfer_replaces_edge_with_face() {
        let mut k = MockKernel::new();
        let base = k.make_box(2.0, 2.0, 2.0).unwrap();
        let edge = IndexedName::new(ShapeKind::Edge, 1);
        let out = k.chamfer_edges(&base, &[edge], 0.2).unwrap();
        assert_eq!(out.topology.count(ShapeKind::Edge), 11);
        assert_eq!(out.topology.count(ShapeKind::Face), 7);
        let generated: Vec<_> = out
            .traces
            .iter()
            .filter(|t| t.status == TraceStatus::Generated)
            .collect();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].sources, vec![(0, edge)]);
    }

    #[test]
    fn failure_knob_fires_once() {
        let mut k = MockKernel::new();
        k.fail_next_op("synthetic failure");
        let a = make_box_topology(1.0, 1.0, 1.0);
        let b = make_box_topology(1.0, 1.0, 1.0);
        assert!(matches!(
            k.boolean_fuse(&a, &b),
            Err(KernelError::BooleanFailed { .. })
        ));
        assert!(k.boolean_fuse(&a, &b).is_ok());
    }
}
