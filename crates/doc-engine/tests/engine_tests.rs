use doc_engine::*;
use kernel_shim::{Kernel, MockKernel, ShapeKind};
use nalgebra::{Matrix4, Vector3};
use tenon_types::{IndexedName, OpCode};
use topo_naming::{SearchOptions, Shape};

fn translation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
    Matrix4::new_translation(&Vector3::new(x, y, z))
}

fn box_params(size: f64) -> PrimitiveParams {
    PrimitiveParams {
        width: size,
        height: size,
        depth: size,
    }
}

fn add_box(ws: &mut Workspace, doc: DocumentId, k: &mut MockKernel, label: &str) -> i64 {
    let id = ws
        .document_mut(doc)
        .unwrap()
        .add_object(label, ObjectKind::Primitive { params: box_params(1.0) });
    recompute(ws, doc, id, k).unwrap();
    id
}

fn box_shape(k: &mut MockKernel, tag: i64, size: f64) -> Shape {
    let mut s = Shape::new(tag, None, k.make_box(size, size, size).unwrap());
    s.init_leaf_names();
    s
}

// ── Parameter validation ───────────────────────────────────────────────────

#[test]
fn negative_chamfer_size_never_reaches_the_kernel() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    let c = ws.document_mut(doc).unwrap().add_object(
        "Chamfer",
        ObjectKind::Chamfer {
            params: DressUpParams {
                base: a,
                edges: vec!["Edge1".to_string()],
                size: -1.0,
            },
        },
    );

    k.fail_next_op("kernel must not be reached");
    let err = recompute(&mut ws, doc, c, &mut k).unwrap_err();
    match err {
        EngineError::InvalidParameter { reason } => assert!(reason.contains("Size")),
        other => panic!("expected validation error, got {other}"),
    }
    // The failure knob is still armed: the kernel was never invoked.
    assert!(k.make_box(1.0, 1.0, 1.0).is_err());
}

#[test]
fn negative_fillet_radius_is_rejected() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    let c = ws.document_mut(doc).unwrap().add_object(
        "Fillet",
        ObjectKind::Fillet {
            params: DressUpParams {
                base: a,
                edges: vec!["Edge2".to_string()],
                size: 0.0,
            },
        },
    );
    let err = recompute(&mut ws, doc, c, &mut k).unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { reason } if reason.contains("Radius")));
}

#[test]
fn kernel_failure_becomes_execution_error_with_message() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    let c = ws.document_mut(doc).unwrap().add_object(
        "Chamfer",
        ObjectKind::Chamfer {
            params: DressUpParams {
                base: a,
                edges: vec!["Edge1".to_string()],
                size: 0.2,
            },
        },
    );
    k.fail_next_op("synthetic edge blend failure");
    let err = recompute(&mut ws, doc, c, &mut k).unwrap_err();
    match err {
        EngineError::ExecuteFailed { label, reason } => {
            assert_eq!(label, "Chamfer");
            assert!(reason.contains("synthetic edge blend failure"));
        }
        other => panic!("expected execution error, got {other}"),
    }
}

#[test]
fn broken_edge_reference_fails_execution() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    let c = ws.document_mut(doc).unwrap().add_object(
        "Chamfer",
        ObjectKind::Chamfer {
            params: DressUpParams {
                base: a,
                edges: vec!["Edge99".to_string()],
                size: 0.2,
            },
        },
    );
    let err = recompute(&mut ws, doc, c, &mut k).unwrap_err();
    assert!(matches!(err, EngineError::ExecuteFailed { reason, .. } if reason.contains("Edge99")));
}

// ── Feature execution & naming ─────────────────────────────────────────────

#[test]
fn chamfer_registers_edge_references_and_names_the_new_face() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    let c = ws.document_mut(doc).unwrap().add_object(
        "Chamfer",
        ObjectKind::Chamfer {
            params: DressUpParams {
                base: a,
                edges: vec!["Edge1".to_string()],
                size: 0.2,
            },
        },
    );
    recompute(&mut ws, doc, c, &mut k).unwrap();

    let shape = ws.object((doc, c)).unwrap().shape().unwrap();
    assert_eq!(shape.count_sub_shapes(ShapeKind::Face), 7);
    let name = shape
        .mapped_name(IndexedName::new(ShapeKind::Face, 7), false)
        .unwrap();
    assert!(name.as_str().contains(";CHF:"), "got {}", name);

    // the base now knows its edge is referenced downstream
    assert!(ws
        .object((doc, a))
        .unwrap()
        .element_refs
        .contains(&"Edge1".to_string()));
}

#[test]
fn export_name_is_synthesized_for_unnamed_higher_elements() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");

    let el = ws
        .document_mut(doc)
        .unwrap()
        .export_element_name(a, "Shell1");
    let name = el.name.expect("shell combo name");
    assert_eq!(el.index, Some(IndexedName::new(ShapeKind::Shell, 1)));

    // the registration is visible on the stored shape afterwards
    let shape = ws.object((doc, a)).unwrap().shape().unwrap();
    assert_eq!(
        shape.indexed_name(&name),
        Some(IndexedName::new(ShapeKind::Shell, 1))
    );
}

// ── Shape accessor ─────────────────────────────────────────────────────────

#[test]
fn accessor_returns_null_for_unresolvable_references() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");

    let rs = get_topo_shape(&ws, (doc, a), "Nowhere.Face1", ShapeOptions::default());
    assert!(rs.shape.is_null());
    assert!(rs.owner.is_none());

    let rs = get_topo_shape(&ws, (doc, 999), "", ShapeOptions::default());
    assert!(rs.shape.is_null());
}

#[test]
fn accessor_fast_path_extracts_sub_elements() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");

    let rs = get_topo_shape(
        &ws,
        (doc, a),
        "Face3",
        ShapeOptions {
            need_sub_element: true,
            ..Default::default()
        },
    );
    assert_eq!(rs.shape.kind(), Some(ShapeKind::Face));
    assert_eq!(rs.owner, Some((doc, a)));
}

#[test]
fn top_level_transform_is_applied_after_resolution() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "Box");
    ws.document_mut(doc)
        .unwrap()
        .object_mut(a)
        .unwrap()
        .placement = translation(2.0, 0.0, 0.0);

    let placed = get_topo_shape(&ws, (doc, a), "", ShapeOptions::default());
    assert_eq!(*placed.shape.placement(), translation(2.0, 0.0, 0.0));

    let raw = get_topo_shape(
        &ws,
        (doc, a),
        "",
        ShapeOptions {
            transform: false,
            ..Default::default()
        },
    );
    assert_eq!(*raw.shape.placement(), Matrix4::identity());
}

#[test]
fn group_composes_visible_children() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    let b = add_box(&mut ws, doc, &mut k, "B");
    ws.document_mut(doc)
        .unwrap()
        .object_mut(b)
        .unwrap()
        .placement = translation(3.0, 0.0, 0.0);
    let g = ws.document_mut(doc).unwrap().add_object(
        "Group",
        ObjectKind::Group {
            params: GroupParams {
                children: vec![a, b],
            },
        },
    );

    let rs = get_topo_shape(&ws, (doc, g), "", ShapeOptions::default());
    assert_eq!(rs.shape.kind(), Some(ShapeKind::Compound));
    assert_eq!(rs.shape.count_sub_shapes(ShapeKind::Face), 12);

    // plain visibility also filters
    ws.document_mut(doc).unwrap().object_mut(b).unwrap().visible = false;
    // a visibility flip is not a shape change; drop the cached compound
    // the way the document engine would on a property change
    let mut k2 = MockKernel::new();
    let fresh = box_shape(&mut k2, a, 1.0);
    ws.document_mut(doc).unwrap().set_shape(a, fresh).unwrap();
    let rs = get_topo_shape(&ws, (doc, g), "", ShapeOptions::default());
    assert_eq!(rs.shape.count_sub_shapes(ShapeKind::Face), 6);
}

#[test]
fn link_visibility_overrides_filter_and_disable_caching() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    let b = add_box(&mut ws, doc, &mut k, "B");
    let g = ws.document_mut(doc).unwrap().add_object(
        "Group",
        ObjectKind::Group {
            params: GroupParams {
                children: vec![a, b],
            },
        },
    );
    let mut link_params = LinkParams::to_target((doc, g));
    link_params.element_visibility.insert("B".to_string(), false);
    let l = ws
        .document_mut(doc)
        .unwrap()
        .add_object("Link", ObjectKind::Link { params: link_params });

    let filtered = get_topo_shape(&ws, (doc, l), "", ShapeOptions::default());
    assert_eq!(filtered.shape.count_sub_shapes(ShapeKind::Face), 6);

    // lifting the override must not serve the filtered compound from a
    // cache: resolutions under overrides are never cached
    if let ObjectKind::Link { params } = &mut ws
        .document_mut(doc)
        .unwrap()
        .object_mut(l)
        .unwrap()
        .kind
    {
        params.element_visibility.clear();
    }
    let full = get_topo_shape(&ws, (doc, l), "", ShapeOptions::default());
    assert_eq!(full.shape.count_sub_shapes(ShapeKind::Face), 12);
}

#[test]
fn shape_change_invalidates_composed_caches() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    let g = ws.document_mut(doc).unwrap().add_object(
        "Group",
        ObjectKind::Group {
            params: GroupParams { children: vec![a] },
        },
    );

    let before = get_topo_shape(&ws, (doc, g), "", ShapeOptions::default());
    assert_eq!(before.shape.count_sub_shapes(ShapeKind::Face), 6);

    // replace A's shape with a chamfered one (7 faces)
    let base = ws.object((doc, a)).unwrap().shape().unwrap().clone();
    let outcome = k
        .chamfer_edges(
            base.topology().unwrap(),
            &[IndexedName::new(ShapeKind::Edge, 1)],
            0.1,
        )
        .unwrap();
    let chamfered = Shape::from_op_result(OpCode::Chamfer, &[&base], outcome, a, None);
    ws.document_mut(doc).unwrap().set_shape(a, chamfered).unwrap();

    let after = get_topo_shape(&ws, (doc, g), "", ShapeOptions::default());
    assert_eq!(after.shape.count_sub_shapes(ShapeKind::Face), 7);
}

#[test]
fn single_child_compound_collapses_for_sub_element_queries() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    let g = ws.document_mut(doc).unwrap().add_object(
        "Group",
        ObjectKind::Group {
            params: GroupParams { children: vec![a] },
        },
    );

    let collapsed = get_topo_shape(
        &ws,
        (doc, g),
        "",
        ShapeOptions {
            need_sub_element: true,
            ..Default::default()
        },
    );
    assert_eq!(collapsed.shape.kind(), Some(ShapeKind::Solid));

    let wrapped = get_topo_shape(&ws, (doc, g), "", ShapeOptions::default());
    assert_eq!(wrapped.shape.kind(), Some(ShapeKind::Compound));
}

#[test]
fn no_element_map_option_strips_naming() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");

    let rs = get_topo_shape(
        &ws,
        (doc, a),
        "",
        ShapeOptions {
            no_element_map: false,
            ..Default::default()
        },
    );
    assert!(!rs.shape.element_map().is_empty());

    let stripped = get_topo_shape(
        &ws,
        (doc, a),
        "",
        ShapeOptions {
            no_element_map: true,
            ..Default::default()
        },
    );
    assert!(stripped.shape.element_map().is_empty());
    assert_eq!(stripped.shape.tag, 0);
}

// ── Element cache ──────────────────────────────────────────────────────────

#[test]
fn referenced_elements_are_refound_after_equivalent_rebuild() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    ws.document_mut(doc)
        .unwrap()
        .add_element_reference(a, "Edge1");

    // rebuild with identical geometry: the snapshot still matches
    let fresh = box_shape(&mut k, a, 1.0);
    ws.document_mut(doc).unwrap().set_shape(a, fresh).unwrap();
    let found = ws.object((doc, a)).unwrap().search_element_cache(
        "Edge1",
        SearchOptions::default(),
        1e-7,
        1e-9,
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].index, Some(IndexedName::new(ShapeKind::Edge, 1)));
}

#[test]
fn element_cache_never_returns_pre_mutation_results() {
    let mut ws = Workspace::new();
    let doc = ws.add_document("Main");
    let mut k = MockKernel::new();
    let a = add_box(&mut ws, doc, &mut k, "A");
    ws.document_mut(doc)
        .unwrap()
        .add_element_reference(a, "Edge1");

    // rebuild with different geometry: the old edge has no counterpart,
    // and the cache must say so instead of echoing stale matches
    let bigger = box_shape(&mut k, a, 3.0);
    ws.document_mut(doc).unwrap().set_shape(a, bigger).unwrap();
    let found = ws.object((doc, a)).unwrap().search_element_cache(
        "Edge1",
        SearchOptions::default(),
        1e-7,
        1e-9,
    );
    assert!(found.is_empty());
}

// ── Persisted reference types ──────────────────────────────────────────────

#[test]
fn feature_parameters_round_trip_through_json() {
    let kind = ObjectKind::Chamfer {
        params: DressUpParams {
            base: 4,
            edges: vec!["Edge3".to_string(), ";Face1;CMB".to_string()],
            size: 0.5,
        },
    };
    let text = serde_json::to_string(&kind).unwrap();
    let back: ObjectKind = serde_json::from_str(&text).unwrap();
    match back {
        ObjectKind::Chamfer { params } => {
            assert_eq!(params.base, 4);
            assert_eq!(params.edges.len(), 2);
            assert_eq!(params.edge_indices(), vec![3]);
        }
        other => panic!("wrong kind after round trip: {other:?}"),
    }
}
