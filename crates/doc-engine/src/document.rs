use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use nalgebra::Matrix4;
use uuid::Uuid;

use crate::types::{DocumentId, EngineError, ObjRef, ObjectKind};
use tenon_types::{split_sub_name, MappedElement, MappedName};
use topo_naming::{FixMode, HasherRef, SearchOptions, Shape, StringHasher};

/// The explicit registry context: all documents this engine instance can
/// see. Passed by reference everywhere; there is no process-wide state.
#[derive(Debug, Default)]
pub struct Workspace {
    documents: HashMap<DocumentId, Document>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, label: impl Into<String>) -> DocumentId {
        let id = Uuid::new_v4();
        self.documents.insert(id, Document::new(id, label.into()));
        id
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(&id)
    }

    pub fn object(&self, r: ObjRef) -> Option<&DocObject> {
        self.documents.get(&r.0)?.object(r.1)
    }

    /// Flattens a chain of links to the final target, crossing documents.
    /// Depth-guarded; a link cycle answers with the last object reached.
    pub fn linked_target(&self, r: ObjRef) -> ObjRef {
        let mut cur = r;
        for _ in 0..32 {
            match self.object(cur).map(|o| &o.kind) {
                Some(ObjectKind::Link { params }) => cur = params.target,
                _ => break,
            }
        }
        cur
    }

    /// Resolves a dotted sub-object path from `start`, accumulating child
    /// placements. The trailing element name must already be split off.
    /// None when any segment fails to resolve.
    pub fn resolve_sub_object(
        &self,
        start: ObjRef,
        path: &str,
    ) -> Option<(ObjRef, Matrix4<f64>)> {
        let mut cur = start;
        let mut mat = Matrix4::identity();
        if path.is_empty() {
            return Some((cur, mat));
        }
        for seg in path.split('.') {
            let child = self.resolve_child(cur, seg)?;
            let obj = self.object(child)?;
            mat *= obj.placement;
            cur = child;
        }
        Some((cur, mat))
    }

    /// Finds a direct child of `parent` by label, looking through a link
    /// to its target's children.
    pub fn resolve_child(&self, parent: ObjRef, label: &str) -> Option<ObjRef> {
        let resolved = self.linked_target(parent);
        let obj = self.object(resolved)?;
        if let ObjectKind::Group { params } = &obj.kind {
            for &cid in &params.children {
                if let Some(c) = self.document(resolved.0)?.object(cid) {
                    if c.label == label {
                        return Some((resolved.0, cid));
                    }
                }
            }
        }
        None
    }
}

/// One document: feature objects by integer id plus the shared string
/// hasher their shapes intern long names through.
#[derive(Debug)]
pub struct Document {
    pub id: DocumentId,
    pub label: String,
    hasher: HasherRef,
    objects: BTreeMap<i64, DocObject>,
    next_id: i64,
    /// Shape repair policy applied after feature execution.
    pub fix_mode: FixMode,
    /// When set, shapes handed out of this document carry no element map.
    pub element_mapping_disabled: bool,
}

impl Document {
    fn new(id: DocumentId, label: String) -> Self {
        Self {
            id,
            label,
            hasher: StringHasher::new(),
            objects: BTreeMap::new(),
            next_id: 1,
            fix_mode: FixMode::Disabled,
            element_mapping_disabled: false,
        }
    }

    pub fn hasher(&self) -> HasherRef {
        self.hasher.clone()
    }

    pub fn add_object(&mut self, label: impl Into<String>, kind: ObjectKind) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, DocObject::new(id, label.into(), kind));
        id
    }

    pub fn object(&self, id: i64) -> Option<&DocObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: i64) -> Option<&mut DocObject> {
        self.objects.get_mut(&id)
    }

    pub fn remove_object(&mut self, id: i64) -> Option<DocObject> {
        self.objects.remove(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &DocObject> {
        self.objects.values()
    }

    /// Installs a freshly computed shape, running the before-change cache
    /// invalidation first. Resolved-shape and related-element caches of
    /// every object in the document are dropped along with it: a group or
    /// link compound may embed the changed shape, and a stale hit is
    /// worse than a recomputation.
    pub fn set_shape(&mut self, id: i64, shape: Shape) -> Result<(), EngineError> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::ObjectNotFound { id })?;
        obj.on_before_shape_change();
        obj.shape = Some(shape);
        for other in self.objects.values() {
            let mut caches = other.caches.borrow_mut();
            caches.shape_cache.clear();
            caches.related_cache.clear();
        }
        Ok(())
    }

    /// Export-style element name on an object's shape: higher-level
    /// elements (wires, shells, solids) that only have an index get a
    /// combo name synthesized and registered on demand, which is why this
    /// takes the document mutably.
    pub fn export_element_name(&mut self, id: i64, name: &str) -> MappedElement {
        match self.objects.get_mut(&id).and_then(|o| o.shape.as_mut()) {
            Some(shape) => topo_naming::export_element_name(shape, name),
            None => MappedElement::default(),
        }
    }

    /// Registers a sub-element of `id` as referenced by a downstream
    /// feature; referenced elements are snapshotted before shape changes
    /// so they can be re-found geometrically afterwards.
    pub fn add_element_reference(&mut self, id: i64, subname: impl Into<String>) {
        if let Some(obj) = self.objects.get_mut(&id) {
            let subname = subname.into();
            if !obj.element_refs.contains(&subname) {
                obj.element_refs.push(subname);
            }
        }
    }
}

#[derive(Debug, Default)]
struct ObjectCaches {
    /// Resolved shapes keyed by sub-name; owned untransformed.
    shape_cache: HashMap<String, Shape>,
    /// Pre-change sub-shape snapshots for referenced elements, searched
    /// lazily on the first query after a change.
    element_cache: HashMap<String, ElementCacheEntry>,
    /// Related-element results keyed by (name, type-filter).
    related_cache: HashMap<(MappedName, bool), Vec<MappedElement>>,
}

#[derive(Debug)]
struct ElementCacheEntry {
    shape: Shape,
    names: Vec<MappedElement>,
    searched: bool,
}

/// One feature object. The shape slot is the authoritative output of the
/// object's operation; caches hang off an interior-mutable cell because
/// logically-const queries populate them lazily.
#[derive(Debug)]
pub struct DocObject {
    pub id: i64,
    pub label: String,
    pub kind: ObjectKind,
    pub visible: bool,
    /// Placement of this object's shape in its parent frame.
    pub placement: Matrix4<f64>,
    shape: Option<Shape>,
    /// Sub-element names downstream features reference on this object.
    pub element_refs: Vec<String>,
    /// Element-cache key prefixes registered for auxiliary shape slots.
    prefixes: Vec<String>,
    caches: RefCell<ObjectCaches>,
}

impl DocObject {
    fn new(id: i64, label: String, kind: ObjectKind) -> Self {
        Self {
            id,
            label,
            kind,
            visible: true,
            placement: Matrix4::identity(),
            shape: None,
            element_refs: Vec::new(),
            prefixes: Vec::new(),
            caches: RefCell::new(ObjectCaches::default()),
        }
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    pub fn register_element_cache_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    /// Cache invalidation run before the governing shape changes:
    /// coarse prefix-match purge of the element cache, a full clear when
    /// no prefixes are registered, and snapshots of every referenced
    /// sub-element so post-change searches still have the old geometry.
    fn on_before_shape_change(&mut self) {
        let mut caches = self.caches.borrow_mut();
        caches.shape_cache.clear();
        caches.related_cache.clear();
        if self.prefixes.is_empty() {
            caches.element_cache.clear();
        } else {
            let prefixes = &self.prefixes;
            caches
                .element_cache
                .retain(|key, _| !prefixes.iter().any(|p| key.starts_with(p.as_str())));
        }
        let Some(shape) = &self.shape else { return };
        for sub in &self.element_refs {
            let (_, element) = split_sub_name(sub);
            if element.is_empty() || element.starts_with(tenon_types::MISSING_PREFIX) {
                continue;
            }
            let snapshot = shape.sub_shape_by_name(element);
            if snapshot.is_null() {
                continue;
            }
            caches.element_cache.insert(
                element.to_string(),
                ElementCacheEntry {
                    shape: snapshot,
                    names: Vec::new(),
                    searched: false,
                },
            );
        }
    }

    /// Geometric re-identification of a referenced element against the
    /// current shape, from the snapshot taken before the last change.
    /// Searched once per change, then served from cache.
    pub fn search_element_cache(
        &self,
        element: &str,
        options: SearchOptions,
        tol: f64,
        atol: f64,
    ) -> Vec<MappedElement> {
        if element.is_empty() {
            return Vec::new();
        }
        let mut caches = self.caches.borrow_mut();
        let Some(entry) = caches.element_cache.get_mut(element) else {
            return Vec::new();
        };
        if entry.shape.is_null() {
            return Vec::new();
        }
        if !entry.searched {
            entry.searched = true;
            entry.names = match &self.shape {
                Some(shape) => shape.search_sub_shape(&entry.shape, options, tol, atol),
                None => Vec::new(),
            };
        }
        entry.names.clone()
    }

    pub(crate) fn cached_shape(&self, key: &str) -> Option<Shape> {
        self.caches.borrow().shape_cache.get(key).cloned()
    }

    pub(crate) fn cache_shape(&self, key: &str, shape: &Shape) {
        self.caches
            .borrow_mut()
            .shape_cache
            .insert(key.to_string(), shape.clone());
    }

    pub(crate) fn cached_related(
        &self,
        name: &MappedName,
        same_type: bool,
    ) -> Option<Vec<MappedElement>> {
        self.caches
            .borrow()
            .related_cache
            .get(&(name.clone(), same_type))
            .cloned()
    }

    pub(crate) fn cache_related(
        &self,
        name: &MappedName,
        same_type: bool,
        res: &[MappedElement],
    ) {
        self.caches
            .borrow_mut()
            .related_cache
            .insert((name.clone(), same_type), res.to_vec());
    }
}
