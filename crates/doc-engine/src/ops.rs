use crate::accessor::{get_topo_shape, ShapeOptions};
use crate::document::Workspace;
use crate::types::{BooleanOp, DocumentId, EngineError, ObjRef, ObjectKind};
use kernel_shim::{Kernel, Topology};
use tenon_types::{split_sub_name, IndexedName, MappedElement, MappedName, OpCode};
use topo_naming::{SearchOptions, Shape};

const SEARCH_TOL: f64 = 1e-7;
const SEARCH_ATOL: f64 = 1e-9;

/// Executes one object's operation and installs the resulting shape.
/// Parameters are validated before the kernel is touched; kernel
/// failures come back as execution errors carrying the kernel's message.
/// Recompute ordering across objects is the document engine's concern —
/// callers invoke this in dependency order.
pub fn recompute(
    ws: &mut Workspace,
    doc_id: DocumentId,
    id: i64,
    kernel: &mut dyn Kernel,
) -> Result<(), EngineError> {
    let doc = ws
        .document(doc_id)
        .ok_or(EngineError::DocumentNotFound(doc_id))?;
    let obj = doc.object(id).ok_or(EngineError::ObjectNotFound { id })?;
    let kind = obj.kind.clone();
    let label = obj.label.clone();
    let fix_mode = doc.fix_mode;
    let hasher = doc.hasher();

    let exec_err = |reason: String| EngineError::ExecuteFailed {
        label: label.clone(),
        reason,
    };

    let mut shape = match kind {
        // Links and groups have no computed shape of their own; the
        // accessor composes theirs on demand. Plain bodies keep whatever
        // shape was assigned to them.
        ObjectKind::Body | ObjectKind::Link { .. } | ObjectKind::Group { .. } => return Ok(()),

        ObjectKind::Primitive { params } => {
            for (value, what) in [
                (params.width, "Width"),
                (params.height, "Height"),
                (params.depth, "Depth"),
            ] {
                if value <= 0.0 {
                    return Err(EngineError::InvalidParameter {
                        reason: format!("{} must be greater than zero", what),
                    });
                }
            }
            let topo = kernel
                .make_box(params.width, params.height, params.depth)
                .map_err(|e| exec_err(e.to_string()))?;
            let mut s = Shape::new(id, Some(hasher.clone()), topo);
            s.init_leaf_names();
            s
        }

        ObjectKind::Boolean { params } => {
            let base = resolve_input(ws, (doc_id, params.base), &label)?;
            let tool = resolve_input(ws, (doc_id, params.tool), &label)?;
            let bt = world_topology(&base);
            let tt = world_topology(&tool);
            let (op, outcome) = match params.op {
                BooleanOp::Fuse => (OpCode::Fuse, kernel.boolean_fuse(&bt, &tt)),
                BooleanOp::Cut => (OpCode::Cut, kernel.boolean_cut(&bt, &tt)),
                BooleanOp::Common => (OpCode::Common, kernel.boolean_common(&bt, &tt)),
            };
            let outcome = outcome.map_err(|e| exec_err(e.to_string()))?;
            Shape::from_op_result(op, &[&base, &tool], outcome, id, Some(hasher.clone()))
        }

        ObjectKind::Chamfer { params } => {
            if params.size <= 0.0 {
                return Err(EngineError::InvalidParameter {
                    reason: "Size must be greater than zero".to_string(),
                });
            }
            dress_up(ws, doc_id, id, kernel, OpCode::Chamfer, &params, &label, &hasher)?
        }

        ObjectKind::Fillet { params } => {
            if params.size <= 0.0 {
                return Err(EngineError::InvalidParameter {
                    reason: "Radius must be greater than zero".to_string(),
                });
            }
            dress_up(ws, doc_id, id, kernel, OpCode::Fillet, &params, &label, &hasher)?
        }
    };

    shape
        .fix(kernel, fix_mode)
        .map_err(|e| exec_err(e.to_string()))?;
    ws.document_mut(doc_id)
        .ok_or(EngineError::DocumentNotFound(doc_id))?
        .set_shape(id, shape)
}

#[allow(clippy::too_many_arguments)]
fn dress_up(
    ws: &mut Workspace,
    doc_id: DocumentId,
    id: i64,
    kernel: &mut dyn Kernel,
    op: OpCode,
    params: &crate::types::DressUpParams,
    label: &str,
    hasher: &topo_naming::HasherRef,
) -> Result<Shape, EngineError> {
    let base = resolve_input(ws, (doc_id, params.base), label)?;
    let mut edges: Vec<IndexedName> = Vec::new();
    for e in &params.edges {
        let idx = base
            .get_element_name(e)
            .index
            .ok_or_else(|| EngineError::ExecuteFailed {
                label: label.to_string(),
                reason: format!("broken edge reference '{}'", e),
            })?;
        edges.push(idx);
    }

    // Keep the base's edge references registered so its element cache
    // snapshots them ahead of shape changes.
    if let Some(doc) = ws.document_mut(doc_id) {
        for e in &params.edges {
            doc.add_element_reference(params.base, e.clone());
        }
    }

    let bt = world_topology(&base);
    let outcome = match op {
        OpCode::Chamfer => kernel.chamfer_edges(&bt, &edges, params.size),
        _ => kernel.fillet_edges(&bt, &edges, params.size),
    }
    .map_err(|e| EngineError::ExecuteFailed {
        label: label.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Shape::from_op_result(
        op,
        &[&base],
        outcome,
        id,
        Some(hasher.clone()),
    ))
}

fn resolve_input(ws: &Workspace, r: ObjRef, label: &str) -> Result<Shape, EngineError> {
    let rs = get_topo_shape(ws, r, "", ShapeOptions::default());
    if rs.shape.is_null() {
        return Err(EngineError::ExecuteFailed {
            label: label.to_string(),
            reason: format!("input object {} has no shape", r.1),
        });
    }
    Ok(rs.shape)
}

/// The shape's topology with its placement baked in, as the kernel wants
/// its inputs. Indices are preserved, so element maps stay valid.
fn world_topology(shape: &Shape) -> Topology {
    let topo = shape.topology().expect("checked non-null").clone();
    if *shape.placement() == nalgebra::Matrix4::identity() {
        topo
    } else {
        topo.transformed(shape.placement())
    }
}

/// Locates the elements of `obj`'s shape that originate from a given
/// element of `src`: first a count shortcut confirmed by history, then
/// geometric search, then a full same-kind history sweep (a compound of
/// an arrayed instance can match more than once). `single` stops at the
/// first hit.
pub fn element_from_source(
    ws: &Workspace,
    obj: ObjRef,
    subname: &str,
    src: ObjRef,
    src_sub: &str,
    single: bool,
) -> Vec<MappedElement> {
    let rs = get_topo_shape(
        ws,
        obj,
        subname,
        ShapeOptions {
            transform: false,
            ..Default::default()
        },
    );
    let shape = rs.shape;
    let owner = rs.owner;
    let src_rs = get_topo_shape(ws, src, src_sub, ShapeOptions::default());
    let src_shape = src_rs.shape;
    if shape.is_null() || src_shape.is_null() {
        return Vec::new();
    }

    let (_, src_element) = split_sub_name(src_sub);
    let resolved = src_shape.get_element_name(src_element);
    let src_owner_id = src_rs.owner.map(|r| r.1);

    let chain_matches = |chain: &[(i64, MappedName)]| {
        resolved.name.as_ref().is_some_and(|sname| {
            chain
                .iter()
                .any(|(t, n)| Some(t.abs()) == src_owner_id && n == sname)
        })
    };

    // Same sub-shape count (e.g. a compound operation): assume the index
    // held, but confirm through the history chain before trusting it.
    if let Some(sidx) = resolved.index {
        if resolved.name.is_some()
            && shape.count_sub_shapes(sidx.kind) == src_shape.count_sub_shapes(sidx.kind)
        {
            if let Some(mname) = shape.mapped_name(sidx, false) {
                let chain = crate::history::element_source(ws, owner, &shape, &mname, None);
                if chain_matches(&chain) {
                    return vec![MappedElement {
                        name: Some(mname),
                        index: Some(sidx),
                    }];
                }
            }
        }
    }

    // Geometry search next.
    let probe = get_topo_shape(
        ws,
        src,
        src_sub,
        ShapeOptions {
            need_sub_element: true,
            ..Default::default()
        },
    )
    .shape;
    if !probe.is_null() {
        let found = shape.search_sub_shape(
            &probe,
            SearchOptions {
                single,
                ..Default::default()
            },
            SEARCH_TOL,
            SEARCH_ATOL,
        );
        if !found.is_empty() {
            return found;
        }
    }

    // No shortcut: sweep every element of the same kind through history.
    let Some(kind) = resolved.index.map(|i| i.kind) else {
        return Vec::new();
    };
    let mut res = Vec::new();
    for i in 1..=shape.count_sub_shapes(kind) {
        let idx = IndexedName::new(kind, i as u32);
        let Some(mname) = shape.mapped_name(idx, false) else {
            continue;
        };
        let chain = crate::history::element_source(ws, owner, &shape, &mname, None);
        if chain_matches(&chain) {
            res.push(MappedElement {
                name: Some(mname),
                index: Some(idx),
            });
            if single {
                break;
            }
        }
    }
    res
}
