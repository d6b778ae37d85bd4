use std::collections::HashSet;

use nalgebra::Matrix4;

use crate::document::Workspace;
use crate::types::{ObjRef, ObjectKind};
use tenon_types::{split_sub_name, ShapeKind};
use topo_naming::Shape;

/// Options for shape resolution.
#[derive(Debug, Clone, Copy)]
pub struct ShapeOptions {
    /// Resolve a trailing sub-element name into the returned shape.
    pub need_sub_element: bool,
    /// Report the link target instead of the link as the owner.
    pub resolve_link: bool,
    /// Apply the top-level placement to the returned shape.
    pub transform: bool,
    /// Strip the element map from the returned shape.
    pub no_element_map: bool,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            need_sub_element: false,
            resolve_link: true,
            transform: true,
            no_element_map: false,
        }
    }
}

/// Result of resolving an (object, sub-name) reference to a shape.
#[derive(Debug)]
pub struct ResolvedShape {
    pub shape: Shape,
    /// The object that actually owns the shape, after path and link
    /// resolution. None when resolution failed.
    pub owner: Option<ObjRef>,
    /// Accumulated placement of the returned shape.
    pub placement: Matrix4<f64>,
}

impl ResolvedShape {
    fn null() -> Self {
        Self {
            shape: Shape::null(),
            owner: None,
            placement: Matrix4::identity(),
        }
    }
}

/// Single entry point answering "what is the effective shape of object X,
/// optionally restricted to sub-element S, resolved through links and
/// groups?". Unresolvable references answer with a null shape, never an
/// error.
///
/// Shapes are cached untransformed and the top-level placement is applied
/// afterwards, so one cached shape serves every caller regardless of
/// placement.
pub fn get_topo_shape(ws: &Workspace, obj: ObjRef, subname: &str, opts: ShapeOptions) -> ResolvedShape {
    let Some(start) = ws.object(obj) else {
        return ResolvedShape::null();
    };

    let mut hiddens: HashSet<String> = HashSet::new();
    let mut last_link: Option<ObjRef> = None;
    if !check_link_visibility(ws, &mut hiddens, &mut last_link, obj, subname) {
        return ResolvedShape::null();
    }

    // Direct sub-element of a shape-bearing object: bypass composition
    // and caching entirely, sub-shape extraction is cheap and transform
    // sensitive.
    let (path, element) = split_sub_name(subname);
    if opts.need_sub_element && path.is_empty() && !element.is_empty() && start.has_shape() {
        let mut ts = start.shape().cloned().unwrap_or_default();
        ts = ts.sub_shape_by_name(element);
        if !ts.is_null() {
            if opts.no_element_map {
                ts.reset_element_map();
            }
            let mut placement = Matrix4::identity();
            if opts.transform {
                ts.transform_shape(&start.placement);
                placement = start.placement;
            }
            return ResolvedShape {
                shape: ts,
                owner: Some(obj),
                placement,
            };
        }
    }

    let mut res = resolve_inner(ws, obj, subname, opts, &hiddens, last_link);

    // A composite that collapsed to one sub-shape of a single kind is
    // unwrapped, so callers asking for a sub-element get "a solid", not
    // "a compound holding one solid".
    if opts.need_sub_element && res.shape.kind() == Some(ShapeKind::Compound) {
        for kind in [
            ShapeKind::Solid,
            ShapeKind::CompSolid,
            ShapeKind::Face,
            ShapeKind::Shell,
            ShapeKind::Edge,
            ShapeKind::Wire,
            ShapeKind::Vertex,
        ] {
            if res.shape.count_sub_shapes(kind) == 1 {
                res.shape = res.shape.sub_shape(kind, 1);
                break;
            }
        }
    }

    if opts.transform && !res.shape.is_null() {
        res.shape.transform_shape(&start.placement);
        res.placement = start.placement * res.placement;
    }
    res
}

fn resolve_inner(
    ws: &Workspace,
    obj: ObjRef,
    subname: &str,
    opts: ShapeOptions,
    hiddens: &HashSet<String>,
    last_link: Option<ObjRef>,
) -> ResolvedShape {
    let (path, element) = split_sub_name(subname);
    let cache_key = if opts.need_sub_element { subname } else { path };

    let Some((owner_ref, mat)) = ws.resolve_sub_object(obj, path) else {
        return ResolvedShape::null();
    };
    let Some(owner) = ws.object(owner_ref) else {
        return ResolvedShape::null();
    };
    let linked_ref = ws.linked_target(owner_ref);
    let reported_owner = if opts.resolve_link { linked_ref } else { owner_ref };

    // Caching is disabled whenever the resolution went through a link
    // with element-level visibility overrides: a cached shape must not
    // depend on a temporarily-hidden set of elements.
    let can_cache = !visibility_overrides_active(ws, hiddens, last_link);

    let strip = |mut shape: Shape| -> Shape {
        if opts.no_element_map
            || ws
                .document(owner_ref.0)
                .is_some_and(|d| d.element_mapping_disabled)
        {
            shape.reset_element_map();
        }
        shape
    };

    if can_cache {
        if let Some(start) = ws.object(obj) {
            if let Some(cached) = start.cached_shape(cache_key) {
                return ResolvedShape {
                    shape: strip(cached),
                    owner: Some(reported_owner),
                    placement: mat,
                };
            }
        }
    }

    // The owner carries its own shape.
    if let Some(s) = owner.shape() {
        let mut shape = s.clone();
        if opts.need_sub_element && !element.is_empty() {
            shape = shape.sub_shape_by_name(element);
            if shape.is_null() {
                return ResolvedShape::null();
            }
        }
        if owner_ref != obj {
            let scaled = shape.transform_shape(&mat);
            let cross_doc = owner_ref.0 != obj.0;
            if cross_doc {
                if let Some(doc) = ws.document(obj.0) {
                    shape.retag_element_map(obj.1, Some(doc.hasher()));
                }
            }
            // Scale-bearing transforms force a cache write: a scaled
            // shape cannot be re-derived cheaply from the unscaled one.
            if can_cache && (scaled || cross_doc) {
                if let Some(start) = ws.object(obj) {
                    start.cache_shape(cache_key, &shape);
                }
            }
        }
        return ResolvedShape {
            shape: strip(shape),
            owner: Some(reported_owner),
            placement: mat,
        };
    }

    // Nothing more can be done for sub-element references from here on.
    if opts.need_sub_element && !element.is_empty() {
        return ResolvedShape::null();
    }

    // A link without its own shape: take the target's shape, re-owned.
    // Hidden-element state travels into the recursion so overrides keep
    // filtering the composed result.
    if linked_ref != owner_ref {
        let sub = resolve_inner(
            ws,
            linked_ref,
            "",
            ShapeOptions {
                need_sub_element: false,
                resolve_link: false,
                transform: false,
                no_element_map: false,
            },
            hiddens,
            last_link,
        );
        if sub.shape.is_null() {
            return ResolvedShape::null();
        }
        let mut shape = sub.shape;
        if let Some(target) = ws.object(linked_ref) {
            shape.transform_shape(&target.placement);
        }
        if let Some(doc) = ws.document(owner_ref.0) {
            shape.retag_element_map(owner_ref.1, Some(doc.hasher()));
        }
        if can_cache {
            owner.cache_shape("", &shape);
        }
        if owner_ref != obj {
            shape.transform_shape(&mat);
        }
        return ResolvedShape {
            shape: strip(shape),
            owner: Some(reported_owner),
            placement: mat,
        };
    }

    // A group: compound of its visible children.
    if let ObjectKind::Group { params } = &owner.kind {
        let Some(doc) = ws.document(owner_ref.0) else {
            return ResolvedShape::null();
        };
        let mut cacheable = true;
        let mut parts: Vec<Shape> = Vec::new();
        for &cid in &params.children {
            let Some(child) = doc.object(cid) else {
                continue;
            };
            if hiddens.contains(&child.label) || hidden_by_link(ws, last_link, &child.label) {
                cacheable = false;
                continue;
            }
            if !child.visible {
                continue;
            }
            let sub = resolve_inner(
                ws,
                (owner_ref.0, cid),
                "",
                ShapeOptions {
                    need_sub_element: false,
                    resolve_link: true,
                    transform: false,
                    no_element_map: false,
                },
                hiddens,
                last_link,
            );
            if sub.shape.is_null() {
                continue;
            }
            let mut cs = sub.shape;
            cs.transform_shape(&child.placement);
            parts.push(cs);
        }
        if parts.is_empty() {
            return ResolvedShape::null();
        }
        let mut shape = Shape::make_compound(&parts, owner_ref.1, Some(doc.hasher()));
        if cacheable && can_cache {
            owner.cache_shape("", &shape);
        }
        if owner_ref != obj {
            let scaled = shape.transform_shape(&mat);
            if can_cache && cacheable && scaled {
                if let Some(start) = ws.object(obj) {
                    start.cache_shape(cache_key, &shape);
                }
            }
        }
        return ResolvedShape {
            shape: strip(shape),
            owner: Some(reported_owner),
            placement: mat,
        };
    }

    ResolvedShape::null()
}

fn visibility_overrides_active(
    ws: &Workspace,
    hiddens: &HashSet<String>,
    last_link: Option<ObjRef>,
) -> bool {
    if !hiddens.is_empty() {
        return true;
    }
    match last_link.and_then(|r| ws.object(r)).map(|o| &o.kind) {
        Some(ObjectKind::Link { params }) => params.has_overrides(),
        _ => false,
    }
}

fn hidden_by_link(ws: &Workspace, last_link: Option<ObjRef>, label: &str) -> bool {
    let Some(link) = last_link.and_then(|r| ws.object(r)) else {
        return false;
    };
    match &link.kind {
        ObjectKind::Link { params } => params.element_visibility.get(label) == Some(&false),
        _ => false,
    }
}

/// Walks the sub-name path collecting hidden-element overrides from the
/// links along it. False when the addressed path itself is hidden.
fn check_link_visibility(
    ws: &Workspace,
    hiddens: &mut HashSet<String>,
    last_link: &mut Option<ObjRef>,
    obj: ObjRef,
    subname: &str,
) -> bool {
    let Some(o) = ws.object(obj) else {
        return false;
    };
    if let ObjectKind::Link { params } = &o.kind {
        *last_link = Some(obj);
        hiddens.extend(params.hidden_subnames.iter().cloned());
    }
    let (path, _) = split_sub_name(subname);
    if path.is_empty() {
        return true;
    }
    let mut cur = obj;
    let mut walked = String::new();
    for seg in path.split('.') {
        walked.push_str(seg);
        if hiddens.contains(&walked) {
            return false;
        }
        let Some(child) = ws.resolve_child(cur, seg) else {
            return false;
        };
        if let Some(ObjectKind::Link { params }) = ws.object(child).map(|c| &c.kind) {
            *last_link = Some(child);
            for h in &params.hidden_subnames {
                hiddens.insert(format!("{}.{}", walked, h));
            }
        }
        walked.push('.');
        cur = child;
    }
    // Narrow the hidden set to what applies below the resolved path.
    let narrowed: HashSet<String> = hiddens
        .iter()
        .filter_map(|h| h.strip_prefix(&walked).map(str::to_string))
        .collect();
    *hiddens = narrowed;
    true
}
