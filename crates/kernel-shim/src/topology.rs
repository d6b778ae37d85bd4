use std::collections::HashMap;

use nalgebra::Matrix4;

use crate::types::ElementSignature;
use tenon_types::{IndexedName, ShapeKind};

/// One topological entity inside a snapshot.
#[derive(Debug, Clone)]
pub struct Element {
    pub signature: ElementSignature,
    /// Every lower element this one contains, transitively, as indexed
    /// names of the owning snapshot.
    pub contains: Vec<IndexedName>,
}

/// Immutable B-rep snapshot handed out by the geometry kernel: the shape's
/// top-level kind plus ordered per-kind element tables. Enumeration order
/// is the kernel's shape order and is the meaning of every `IndexedName`
/// resolved against this snapshot.
#[derive(Debug, Clone)]
pub struct Topology {
    kind: ShapeKind,
    /// Kernel-level validity flag; cleared by a failed construction,
    /// restored by `Kernel::fix`.
    pub valid: bool,
    tables: [Vec<Element>; 8],
}

impl Topology {
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    pub fn count(&self, kind: ShapeKind) -> usize {
        self.tables[kind.slot()].len()
    }

    pub fn element(&self, name: IndexedName) -> Option<&Element> {
        self.tables[name.kind.slot()].get(name.index as usize - 1)
    }

    pub fn signature(&self, name: IndexedName) -> Option<&ElementSignature> {
        self.element(name).map(|e| &e.signature)
    }

    pub fn elements(&self, kind: ShapeKind) -> impl Iterator<Item = (IndexedName, &Element)> {
        self.tables[kind.slot()]
            .iter()
            .enumerate()
            .map(move |(i, e)| (IndexedName::new(kind, i as u32 + 1), e))
    }

    /// Indices (1-based, ascending) of the `ancestor` kind elements that
    /// contain `sub`. Ascending order is the pinned tie-break order for
    /// all disambiguation built on top of this query.
    pub fn find_ancestors(&self, sub: IndexedName, ancestor: ShapeKind) -> Vec<u32> {
        if ancestor == sub.kind {
            return if self.element(sub).is_some() {
                vec![sub.index]
            } else {
                Vec::new()
            };
        }
        self.elements(ancestor)
            .filter(|(_, e)| e.contains.contains(&sub))
            .map(|(n, _)| n.index)
            .collect()
    }

    /// Extracts the sub-tree rooted at the given element, re-enumerated in
    /// shape order. Returns the new snapshot plus the old-to-new index
    /// mapping so element map entries can follow. None when out of range.
    pub fn sub_topology(
        &self,
        kind: ShapeKind,
        index: u32,
    ) -> Option<(Topology, HashMap<IndexedName, IndexedName>)> {
        let root = IndexedName::new(kind, index);
        let root_elem = self.element(root)?;

        let mut included: Vec<IndexedName> = root_elem.contains.clone();
        included.push(root);
        included.sort();
        included.dedup();

        let mut builder = TopologyBuilder::new(kind);
        let mut remap = HashMap::new();
        for old in &included {
            let new = builder.reserve(old.kind);
            remap.insert(*old, new);
        }
        for old in &included {
            let elem = self.element(*old)?;
            let contains = elem
                .contains
                .iter()
                .filter_map(|c| remap.get(c).copied())
                .collect();
            builder.fill(remap[old], elem.signature.clone(), contains);
        }
        let mut topo = builder.finish();
        topo.valid = self.valid;
        Some((topo, remap))
    }

    /// Snapshot with every signature mapped through a placement.
    pub fn transformed(&self, mat: &Matrix4<f64>) -> Topology {
        let mut out = self.clone();
        for table in out.tables.iter_mut() {
            for elem in table.iter_mut() {
                elem.signature = elem.signature.transformed(mat);
            }
        }
        out
    }

    /// Builds a compound of the given snapshots, merging element tables
    /// with per-kind offsets and adding the compound root. Returns the
    /// merged snapshot plus one old-to-new index mapping per part.
    pub fn compound(parts: &[&Topology]) -> (Topology, Vec<HashMap<IndexedName, IndexedName>>) {
        let mut builder = TopologyBuilder::new(ShapeKind::Compound);
        let mut remaps = Vec::with_capacity(parts.len());
        let mut all = Vec::new();
        for part in parts {
            let mut remap = HashMap::new();
            for kind in ShapeKind::ALL {
                for (old, _) in part.elements(kind) {
                    let new = builder.reserve(kind);
                    remap.insert(old, new);
                    all.push(new);
                }
            }
            for kind in ShapeKind::ALL {
                for (old, elem) in part.elements(kind) {
                    let contains = elem
                        .contains
                        .iter()
                        .filter_map(|c| remap.get(c).copied())
                        .collect();
                    builder.fill(remap[&old], elem.signature.clone(), contains);
                }
            }
            remaps.push(remap);
        }
        builder.add(
            ShapeKind::Compound,
            ElementSignature::curve("compound", [0.0, 0.0, 0.0], 0.0),
            all,
        );
        (builder.finish(), remaps)
    }
}

/// Incremental construction of a snapshot; used by kernel implementations
/// and by tests that need hand-made topology.
#[derive(Debug)]
pub struct TopologyBuilder {
    kind: ShapeKind,
    tables: [Vec<Option<Element>>; 8],
}

impl TopologyBuilder {
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            tables: Default::default(),
        }
    }

    /// Appends an element and returns its indexed name.
    pub fn add(
        &mut self,
        kind: ShapeKind,
        signature: ElementSignature,
        contains: Vec<IndexedName>,
    ) -> IndexedName {
        let name = self.reserve(kind);
        self.fill(name, signature, contains);
        name
    }

    /// Reserves a slot, to be filled once the containment set is known.
    pub fn reserve(&mut self, kind: ShapeKind) -> IndexedName {
        let table = &mut self.tables[kind.slot()];
        table.push(None);
        IndexedName::new(kind, table.len() as u32)
    }

    pub fn fill(
        &mut self,
        name: IndexedName,
        signature: ElementSignature,
        contains: Vec<IndexedName>,
    ) {
        self.tables[name.kind.slot()][name.index as usize - 1] = Some(Element {
            signature,
            contains,
        });
    }

    pub fn finish(self) -> Topology {
        let tables = self.tables.map(|table| {
            table
                .into_iter()
                .map(|e| e.expect("unfilled topology slot"))
                .collect()
        });
        Topology {
            kind: self.kind,
            valid: true,
            tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_face() -> Topology {
        let mut b = TopologyBuilder::new(ShapeKind::Face);
        let v1 = b.add(ShapeKind::Vertex, ElementSignature::point([0.0, 0.0, 0.0]), vec![]);
        let v2 = b.add(ShapeKind::Vertex, ElementSignature::point([1.0, 0.0, 0.0]), vec![]);
        let e1 = b.add(
            ShapeKind::Edge,
            ElementSignature::curve("line", [0.5, 0.0, 0.0], 1.0),
            vec![v1, v2],
        );
        b.add(
            ShapeKind::Face,
            ElementSignature::surface("planar", [0.5, 0.5, 0.0], [0.0, 0.0, 1.0], 1.0),
            vec![v1, v2, e1],
        );
        b.finish()
    }

    #[test]
    fn ancestors_ascend_in_shape_order() {
        let topo = square_face();
        let v1 = IndexedName::new(ShapeKind::Vertex, 1);
        assert_eq!(topo.find_ancestors(v1, ShapeKind::Edge), vec![1]);
        assert_eq!(topo.find_ancestors(v1, ShapeKind::Face), vec![1]);
        assert_eq!(topo.find_ancestors(v1, ShapeKind::Vertex), vec![1]);
    }

    #[test]
    fn sub_topology_remaps_indices() {
        let topo = square_face();
        let (edge, remap) = topo.sub_topology(ShapeKind::Edge, 1).unwrap();
        assert_eq!(edge.kind(), ShapeKind::Edge);
        assert_eq!(edge.count(ShapeKind::Vertex), 2);
        assert_eq!(edge.count(ShapeKind::Edge), 1);
        assert_eq!(edge.count(ShapeKind::Face), 0);
        assert_eq!(
            remap[&IndexedName::new(ShapeKind::Edge, 1)],
            IndexedName::new(ShapeKind::Edge, 1)
        );
    }

    #[test]
    fn compound_offsets_indices() {
        let a = square_face();
        let b = square_face();
        let (comp, remaps) = Topology::compound(&[&a, &b]);
        assert_eq!(comp.kind(), ShapeKind::Compound);
        assert_eq!(comp.count(ShapeKind::Face), 2);
        assert_eq!(comp.count(ShapeKind::Vertex), 4);
        assert_eq!(
            remaps[1][&IndexedName::new(ShapeKind::Face, 1)],
            IndexedName::new(ShapeKind::Face, 2)
        );
    }
}
