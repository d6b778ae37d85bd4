use std::collections::HashSet;

use crate::accessor::{get_topo_shape, ShapeOptions};
use crate::document::Workspace;
use crate::types::{DocumentId, ObjRef};
use tenon_types::{
    is_mapped_element, IndexedName, MappedName, ShapeKind, ELEMENT_MAP_PREFIX, MISSING_PREFIX,
};
use topo_naming::Shape;

/// One step of an element's ancestry chain.
#[derive(Debug, Clone)]
pub struct HistoryItem {
    /// The object owning the shape at this step; None when it has been
    /// deleted (the name could still be extracted, traversal stopped).
    pub owner: Option<ObjRef>,
    /// The element's name at this step.
    pub element: MappedName,
    /// The element's current index in that shape, when it resolves.
    pub index: Option<IndexedName>,
    /// Names the element passed through within the same shape.
    pub intermediates: Vec<MappedName>,
    /// Tag of the upstream producer recorded at this step; 0 at the root.
    pub tag: i64,
}

fn start_element(shape: &Shape, name: &str) -> MappedName {
    let t = name.strip_prefix(MISSING_PREFIX).unwrap_or(name);
    if let Some(idx) = IndexedName::parse(t) {
        if let Some(n) = shape.mapped_name(idx, true) {
            return n;
        }
    }
    if is_mapped_element(t) {
        return shape
            .get_element_name(t)
            .name
            .unwrap_or_else(|| MappedName::from(t.trim_start_matches(ELEMENT_MAP_PREFIX)));
    }
    MappedName::from(t)
}

/// The ordered ancestry of a named element, walked backward through the
/// feature dependency graph.
///
/// The walk stops at a root (tag 0), at a deleted owner (gracefully, with
/// what was collected), when a type filter prunes a cross-kind hop, or
/// when a (document, tag) pair repeats (cycle guard; logged, partial
/// history returned). With `recursive` false exactly one hop is taken.
pub fn element_history(
    ws: &Workspace,
    start: ObjRef,
    name: &str,
    recursive: bool,
    same_type: bool,
) -> Vec<HistoryItem> {
    let mut ret: Vec<HistoryItem> = Vec::new();
    if ws.object(start).is_none() {
        return ret;
    }
    let mut feature = start;
    let mut shape = get_topo_shape(ws, feature, "", ShapeOptions::default()).shape;
    let mut element = start_element(&shape, name);
    let element_type = if same_type {
        shape.element_kind(&element)
    } else {
        None
    };
    let mut prev_element: Option<MappedName> = None;
    let mut visited: HashSet<(DocumentId, i64)> = HashSet::new();

    loop {
        let mut item = HistoryItem {
            owner: Some(feature),
            element: element.clone(),
            index: None,
            intermediates: Vec::new(),
            tag: 0,
        };
        let hop = shape.element_history_heuristic(&element);
        let (tag, original) = match &hop {
            Some(h) => {
                item.intermediates = h.intermediates.clone();
                item.tag = h.tag;
                (h.tag, Some(h.original.clone()))
            }
            None => (0, None),
        };

        item.index = shape.indexed_name(&element);
        if item.index.is_none() {
            // A later intermediate may still resolve after a local
            // fix-up renamed the element; substitute it so the trace is
            // not lost.
            if let Some(prev) = &prev_element {
                if let Some(idx) = shape.indexed_name(prev) {
                    item.index = Some(idx);
                    item.intermediates.insert(0, element.clone());
                    item.element = prev.clone();
                }
            }
        }
        prev_element = item.intermediates.last().cloned();
        let intermediates = item.intermediates.clone();
        ret.push(item);

        if tag == 0 {
            break;
        }

        // Resolve the producing object, flattening link indirection so
        // the hop bottoms out at the real feature even across documents.
        let linked = ws.linked_target(feature);
        let owner_doc = linked.0;
        let obj = ws
            .document(owner_doc)
            .and_then(|d| d.object(tag.abs()))
            .map(|o| (owner_doc, o.id));

        if !recursive {
            ret.push(HistoryItem {
                owner: obj,
                element: original.unwrap_or_default(),
                index: None,
                intermediates: Vec::new(),
                tag,
            });
            return ret;
        }
        let Some(obj_ref) = obj else {
            // Deleted upstream object: record the dangling hop (the tag
            // is still known, its owner is not) and stop.
            ret.push(HistoryItem {
                owner: None,
                element: original.unwrap_or_default(),
                index: None,
                intermediates: Vec::new(),
                tag,
            });
            break;
        };
        if let Some(et) = element_type {
            if intermediates
                .iter()
                .any(|h| shape.element_kind(h) != Some(et))
            {
                return ret;
            }
        }
        if !visited.insert((obj_ref.0, tag.abs())) {
            tracing::warn!(tag, "circular element mapping");
            break;
        }

        feature = obj_ref;
        shape = get_topo_shape(ws, feature, "", ShapeOptions::default()).shape;
        element = original.unwrap_or_default();
        if shape.is_null() {
            break;
        }
        if let Some(et) = element_type {
            if shape.element_kind(&element) != Some(et) {
                break;
            }
        }
    }
    ret
}

/// The raw (tag, name) ancestry chain of an element, starting at the
/// element itself. Used by the related-element finder and source
/// matching; tolerates deleted owners and guards against cycles caused by
/// cross-document hash lookups.
pub fn element_source(
    ws: &Workspace,
    owner: Option<ObjRef>,
    shape: &Shape,
    name: &MappedName,
    kind_filter: Option<ShapeKind>,
) -> Vec<(i64, MappedName)> {
    let mut ret: Vec<(i64, MappedName)> = vec![(0, name.clone())];
    let mut visited: HashSet<(Option<DocumentId>, i64)> = HashSet::new();
    let mut owner = owner;
    let mut shape = shape.clone();
    let mut current = name.clone();
    let mut prev_tag: i64 = 0;

    loop {
        let Some(hop) = shape.element_history_heuristic(&current) else {
            break;
        };
        let mut doc: Option<DocumentId> = None;
        let mut obj: Option<ObjRef> = None;
        if let Some(o) = owner {
            let linked = ws.linked_target(o);
            doc = Some(linked.0);
            obj = ws
                .document(linked.0)
                .and_then(|d| d.object(hop.tag.abs()))
                .map(|found| (linked.0, found.id));
            if let Some(kf) = kind_filter {
                for h in &hop.intermediates {
                    if shape.element_kind(h) != Some(kf) {
                        return ret;
                    }
                }
            }
        }
        owner = None;
        match obj {
            None => {
                // The object may be deleted; the name itself was still
                // extracted above, but there is nothing left to walk.
                shape = Shape::null();
                doc = None;
            }
            Some(r) => {
                let rs = get_topo_shape(ws, r, "", ShapeOptions::default());
                shape = rs.shape;
                owner = rs.owner;
            }
        }
        if let Some(kf) = kind_filter {
            if !shape.is_null() && shape.element_kind(&hop.original) != Some(kf) {
                break;
            }
        }

        if hop.tag.abs() != prev_tag.abs() && !visited.insert((doc, hop.tag.abs())) {
            // A deleted link/binder can leave names decoded against the
            // wrong hash table; be prepared for a circular element map.
            tracing::warn!(tag = hop.tag, "circular element mapping");
            break;
        }
        prev_tag = hop.tag;
        current = hop.original.clone();
        ret.push((hop.tag, hop.original));
        if shape.is_null() {
            break;
        }
    }
    ret
}
