use std::collections::HashMap;

use tenon_types::{IndexedName, MappedName, OpCode};

/// Provenance of one mapped name: which upstream feature produced it,
/// through which operation, and from which source names. `tag == 0` marks
/// an original leaf name with no recorded producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameOrigin {
    pub tag: i64,
    pub op: OpCode,
    /// Source names, most significant first. For synthesized combo names
    /// these are the component names; for operation-derived names the
    /// elements of the input shape(s) this element came from.
    pub sources: Vec<MappedName>,
    /// Names this element passed through within the same shape, newest
    /// first (local fix-up renames).
    pub intermediates: Vec<MappedName>,
}

/// One forward entry of the element name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub index: IndexedName,
    pub origin: Option<NameOrigin>,
}

/// The element name table of one shape: a bidirectional association
/// between persistent mapped names and snapshot-relative indexed names,
/// plus the provenance of every mapped name. Both directions are O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementMap {
    forward: HashMap<MappedName, MapEntry>,
    reverse: HashMap<IndexedName, MappedName>,
}

impl ElementMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Registers `name` for `index`, replacing any previous association of
    /// either side.
    pub fn set(&mut self, name: MappedName, index: IndexedName, origin: Option<NameOrigin>) {
        if let Some(old) = self.reverse.insert(index, name.clone()) {
            if old != name {
                self.forward.remove(&old);
            }
        }
        if let Some(old) = self.forward.insert(name.clone(), MapEntry { index, origin }) {
            if old.index != index && self.reverse.get(&old.index) == Some(&name) {
                self.reverse.remove(&old.index);
            }
        }
    }

    pub fn entry(&self, name: &MappedName) -> Option<&MapEntry> {
        self.forward.get(name)
    }

    pub fn indexed(&self, name: &MappedName) -> Option<IndexedName> {
        self.forward.get(name).map(|e| e.index)
    }

    pub fn mapped(&self, index: IndexedName) -> Option<&MappedName> {
        self.reverse.get(&index)
    }

    pub fn contains(&self, name: &MappedName) -> bool {
        self.forward.contains_key(name)
    }

    /// Re-stamps ownership provenance when a shape is re-owned by a
    /// different feature: entries stamped with the old owning tag move to
    /// the new one. Upstream source tags are left alone, so history
    /// through the re-owned shape still reaches the real producers.
    pub fn retag(&mut self, from: i64, to: i64) {
        if from == 0 {
            return;
        }
        for entry in self.forward.values_mut() {
            if let Some(origin) = entry.origin.as_mut() {
                if origin.tag == from {
                    origin.tag = to;
                }
            }
        }
    }

    /// Carries entries over to a re-enumerated snapshot. Entries whose
    /// index is not in the mapping are dropped (their elements are gone
    /// from the new snapshot).
    pub fn remapped(&self, remap: &HashMap<IndexedName, IndexedName>) -> Self {
        let mut out = Self::new();
        for (name, entry) in &self.forward {
            if let Some(&new_index) = remap.get(&entry.index) {
                out.set(name.clone(), new_index, entry.origin.clone());
            }
        }
        out
    }

    /// Entries in deterministic (index) order.
    pub fn iter_sorted(&self) -> Vec<(&MappedName, &MapEntry)> {
        let mut items: Vec<_> = self.forward.iter().collect();
        items.sort_by_key(|(_, e)| e.index);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenon_types::ShapeKind;

    fn face(i: u32) -> IndexedName {
        IndexedName::new(ShapeKind::Face, i)
    }

    #[test]
    fn both_directions_resolve() {
        let mut map = ElementMap::new();
        map.set(MappedName::from("F1;FUS:2"), face(3), None);
        assert_eq!(map.indexed(&MappedName::from("F1;FUS:2")), Some(face(3)));
        assert_eq!(map.mapped(face(3)), Some(&MappedName::from("F1;FUS:2")));
        assert_eq!(map.mapped(face(1)), None);
    }

    #[test]
    fn reassigning_an_index_drops_the_old_name() {
        let mut map = ElementMap::new();
        map.set(MappedName::from("a"), face(1), None);
        map.set(MappedName::from("b"), face(1), None);
        assert_eq!(map.mapped(face(1)), Some(&MappedName::from("b")));
        assert_eq!(map.indexed(&MappedName::from("a")), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remap_drops_vanished_elements() {
        let mut map = ElementMap::new();
        map.set(MappedName::from("a"), face(1), None);
        map.set(MappedName::from("b"), face(2), None);
        let mut remap = HashMap::new();
        remap.insert(face(2), face(1));
        let out = map.remapped(&remap);
        assert_eq!(out.len(), 1);
        assert_eq!(out.indexed(&MappedName::from("b")), Some(face(1)));
    }

    #[test]
    fn retag_moves_only_the_owning_tag() {
        let mut map = ElementMap::new();
        let origin = |tag| {
            Some(NameOrigin {
                tag,
                op: OpCode::Fuse,
                sources: vec![MappedName::from("Face1")],
                intermediates: vec![],
            })
        };
        map.set(MappedName::from("a"), face(1), origin(4));
        map.set(MappedName::from("b"), face(2), origin(2));
        map.retag(4, 9);
        let tag_of = |n: &str| {
            map.entry(&MappedName::from(n))
                .unwrap()
                .origin
                .as_ref()
                .unwrap()
                .tag
        };
        assert_eq!(tag_of("a"), 9);
        assert_eq!(tag_of("b"), 2);
    }
}
