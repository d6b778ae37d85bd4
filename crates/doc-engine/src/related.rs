use std::collections::BTreeMap;

use crate::accessor::{get_topo_shape, ShapeOptions};
use crate::document::Workspace;
use crate::history::element_source;
use crate::types::ObjRef;
use tenon_types::{IndexedName, MappedElement};

/// Elements of the same shape sharing the given element's generative
/// ancestry — e.g. the mirrored hole's edge after selecting one hole's.
///
/// Fast path: the first chain entry that still resolves on the shape is
/// the answer (the naming itself disambiguates). Otherwise every element
/// of the same kind is scored by the length of the ancestry tail it
/// shares with the source, and the top-scoring group wins. Results are
/// cached per (element, type-filter) on the owning object and dropped
/// whenever its shape changes.
pub fn related_elements(
    ws: &Workspace,
    obj: ObjRef,
    name: &str,
    same_type: bool,
    with_cache: bool,
) -> Vec<MappedElement> {
    let rs = get_topo_shape(ws, obj, "", ShapeOptions::default());
    let shape = rs.shape;
    let owner = rs.owner;
    let Some(mapped_name) = shape.get_element_name(name).name else {
        return Vec::new();
    };
    if with_cache {
        if let Some(cached) = ws
            .object(obj)
            .and_then(|o| o.cached_related(&mapped_name, same_type))
        {
            return cached;
        }
    }
    let Some(kind) = shape.element_kind(&mapped_name) else {
        return Vec::new();
    };
    let filter = same_type.then_some(kind);

    let cache = |res: &[MappedElement]| {
        if let Some(o) = ws.object(obj) {
            o.cache_related(&mapped_name, same_type, res);
        }
    };

    let source = element_source(ws, owner, &shape, &mapped_name, filter);
    for (_, src_name) in &source {
        if let Some(idx) = shape.indexed_name(src_name) {
            let ret = vec![MappedElement {
                name: Some(src_name.clone()),
                index: Some(idx),
            }];
            cache(&ret);
            return ret;
        }
    }

    // Score every same-kind element by how much of the source chain's
    // tail (oldest hops first) it reproduces; lower divergence index
    // means a longer shared tail.
    let mut groups: BTreeMap<i64, Vec<MappedElement>> = BTreeMap::new();
    for i in 1..=shape.count_sub_shapes(kind) {
        let rel_idx = IndexedName::new(kind, i as u32);
        let Some(rel_name) = shape.mapped_name(rel_idx, false) else {
            continue;
        };
        let chain = element_source(ws, owner, &shape, &rel_name, filter);
        let mut idx: i64 = source.len() as i64 - 1;
        let mut it = chain.iter().rev();
        loop {
            if idx < 0 {
                break;
            }
            let Some(r) = it.next() else {
                break;
            };
            if r.1 != source[idx as usize].1 {
                idx += 1;
                break;
            }
            idx -= 1;
        }
        if idx < source.len() as i64 {
            groups.entry(idx).or_default().push(MappedElement {
                name: Some(rel_name),
                index: Some(rel_idx),
            });
        }
    }

    let ret = groups.into_iter().next().map(|(_, v)| v).unwrap_or_default();
    cache(&ret);
    ret
}
