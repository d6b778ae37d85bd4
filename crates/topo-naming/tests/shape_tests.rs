use kernel_shim::{ElementSignature, Kernel, MockKernel, TopologyBuilder};
use proptest::prelude::*;
use tenon_types::{IndexedName, MappedName, OpCode, ShapeKind};
use topo_naming::{
    export_element_name, ElementMap, FixMode, Shape, StringHasher, MIN_LOWER_TOPO_NAMES,
};

fn box_shape(tag: i64) -> Shape {
    let mut k = MockKernel::new();
    let mut s = Shape::new(tag, None, k.make_box(1.0, 1.0, 1.0).unwrap());
    s.init_leaf_names();
    s
}

fn face(i: u32) -> IndexedName {
    IndexedName::new(ShapeKind::Face, i)
}

fn solid(i: u32) -> IndexedName {
    IndexedName::new(ShapeKind::Solid, i)
}

/// Two solids sharing the same four faces; every face has the ancestor
/// set {1, 2}, so combo naming cannot avoid the disambiguation suffix.
fn shared_face_compsolid() -> Shape {
    let mut b = TopologyBuilder::new(ShapeKind::CompSolid);
    let faces: Vec<IndexedName> = (0..4)
        .map(|i| {
            b.add(
                ShapeKind::Face,
                ElementSignature::surface(
                    "planar",
                    [i as f64, 0.0, 0.0],
                    [0.0, 0.0, 1.0],
                    1.0,
                ),
                vec![],
            )
        })
        .collect();
    let s1 = b.add(
        ShapeKind::Solid,
        ElementSignature::curve("solid", [0.0, 0.0, 0.0], 0.0),
        faces.clone(),
    );
    let s2 = b.add(
        ShapeKind::Solid,
        ElementSignature::curve("solid", [1.0, 0.0, 0.0], 0.0),
        faces.clone(),
    );
    let mut all = faces;
    all.push(s1);
    all.push(s2);
    b.add(
        ShapeKind::CompSolid,
        ElementSignature::curve("compsolid", [0.5, 0.0, 0.0], 0.0),
        all,
    );
    let mut s = Shape::new(7, None, b.finish());
    s.init_leaf_names();
    s
}

// ── Round-trip & determinism ───────────────────────────────────────────────

#[test]
fn mapped_name_round_trip() {
    let s = box_shape(1);
    for i in 1..=6 {
        let name = s.mapped_name(face(i), false).unwrap();
        let idx = s.indexed_name(&name).unwrap();
        let name2 = s.mapped_name(idx, false).unwrap();
        assert_eq!(s.indexed_name(&name2), Some(idx));
        assert_eq!(idx, face(i));
    }
}

#[test]
fn combo_name_is_deterministic() {
    let comps = [
        MappedName::from("Face1"),
        MappedName::from("Face2;FUS:3"),
        MappedName::from("Face4"),
    ];
    let mut a = box_shape(1);
    let mut b = box_shape(1);
    let na = a.set_element_combo_name(solid(1), &comps, OpCode::Combo, ";i1");
    let nb = b.set_element_combo_name(solid(1), &comps, OpCode::Combo, ";i1");
    assert_eq!(na, nb);
    // registering again on the same shape yields the identical name too
    let na2 = a.set_element_combo_name(solid(1), &comps, OpCode::Combo, ";i1");
    assert_eq!(na, na2);
}

proptest! {
    #[test]
    fn combo_name_pure_function_of_inputs(
        comps in proptest::collection::vec("[A-Za-z0-9;:]{1,20}", 1..6),
        suffix in 0usize..8,
    ) {
        let names: Vec<MappedName> = comps.iter().map(|c| MappedName::from(c.as_str())).collect();
        let postfix = format!(";i{}", suffix);
        let ha = StringHasher::new();
        let hb = StringHasher::new();
        let mut k = MockKernel::new();
        let mut a = Shape::new(1, Some(ha), k.make_box(1.0, 1.0, 1.0).unwrap());
        let mut b = Shape::new(1, Some(hb), k.make_box(1.0, 1.0, 1.0).unwrap());
        let na = a.set_element_combo_name(solid(1), &names, OpCode::Combo, &postfix);
        let nb = b.set_element_combo_name(solid(1), &names, OpCode::Combo, &postfix);
        prop_assert_eq!(na, nb);
    }
}

// ── High-level name synthesis ──────────────────────────────────────────────

#[test]
fn synthesizer_stops_at_min_unique_components() {
    let mut s = box_shape(1);
    let el = export_element_name(&mut s, "Shell1");
    let name = el.name.expect("shell should get a combo name");
    let mut postfix = String::new();
    let comps = s.decode_element_combo_name(&name, &mut postfix);
    // every face of a box identifies its one shell; three samples suffice
    assert_eq!(comps.len(), MIN_LOWER_TOPO_NAMES);
    assert_eq!(comps[0].as_str(), "Face1");
    assert!(postfix.is_empty());
    assert_eq!(s.indexed_name(&name), Some(IndexedName::new(ShapeKind::Shell, 1)));
}

#[test]
fn synthesizer_is_idempotent() {
    let mut s = box_shape(1);
    let first = export_element_name(&mut s, "Solid1").name.unwrap();
    let second = export_element_name(&mut s, "Solid1").name.unwrap();
    assert_eq!(first, second);
}

#[test]
fn ancestor_tie_gets_distinct_suffixes() {
    let mut s = shared_face_compsolid();
    let n1 = export_element_name(&mut s, "Solid1").name.unwrap();
    let n2 = export_element_name(&mut s, "Solid2").name.unwrap();
    assert_ne!(n1, n2);
    assert!(n1.as_str().ends_with(";i0"), "got {}", n1);
    assert!(n2.as_str().ends_with(";i1"), "got {}", n2);
}

#[test]
fn wires_have_no_lower_names_without_edges() {
    let mut s = box_shape(1);
    // a box has no wires; asking for one yields no name and no index
    let el = export_element_name(&mut s, "Wire1");
    assert!(el.name.is_none());
    assert!(el.index.is_none());
}

#[test]
fn decode_rebinds_combo_name_on_a_rebuilt_shape() {
    let mut a = box_shape(1);
    let combo = export_element_name(&mut a, "Solid1").name.unwrap();

    // A rebuilt shape with the same leaf names but no entry for the
    // combo: the stored components single out the solid again.
    let mut b = box_shape(1);
    let el = export_element_name(&mut b, &format!(";{}.Solid1", combo));
    assert_eq!(el.index, Some(solid(1)));
}

#[test]
fn decode_out_of_range_suffix_reports_missing() {
    let mut s = shared_face_compsolid();
    // A combo whose stored disambiguation index is far out of bounds.
    let comps: Vec<MappedName> = (1..=4)
        .map(|i| s.mapped_name(face(i), false).unwrap())
        .collect();
    let name = s.set_element_combo_name(solid(1), &comps, OpCode::Combo, ";i9");
    let mut fresh = shared_face_compsolid();
    let el = export_element_name(&mut fresh, &format!(";{}.Solid1", name));
    assert!(el.index.is_none());
    assert!(el.name.unwrap().is_missing());
}

// ── Operation result naming & one-hop history ──────────────────────────────

#[test]
fn fuse_result_names_trace_back_one_hop() {
    let mut k = MockKernel::new();
    let a = box_shape(4);
    // stacked on top of a, sharing one face
    let lifted = k
        .make_box(1.0, 1.0, 1.0)
        .unwrap()
        .transformed(&nalgebra::Matrix4::new_translation(&nalgebra::Vector3::new(
            0.0, 0.0, 1.0,
        )));
    let mut b = Shape::new(5, None, lifted);
    b.init_leaf_names();
    let outcome = k
        .boolean_fuse(a.topology().unwrap(), b.topology().unwrap())
        .unwrap();
    let fused = Shape::from_op_result(OpCode::Fuse, &[&a, &b], outcome, 6, None);

    // a surviving face from A
    let name = fused.mapped_name(face(1), false).unwrap();
    assert!(name.as_str().contains(";FUS:4"), "got {}", name);
    let hop = fused.element_history(&name).unwrap();
    assert_eq!(hop.tag, 4);
    assert_eq!(a.indexed_name(&hop.original), Some(face(1)));

    // leaf names on the inputs have no recorded producer
    assert!(a.element_history(&a.mapped_name(face(1), false).unwrap()).is_none());
}

#[test]
fn compound_qualifies_child_names_by_tag() {
    let a = box_shape(2);
    let b = box_shape(3);
    let comp = Shape::make_compound(&[a.clone(), b.clone()], 9, None);
    assert_eq!(comp.kind(), Some(ShapeKind::Compound));
    assert_eq!(comp.count_sub_shapes(ShapeKind::Face), 12);

    let n7 = comp.mapped_name(face(7), false).unwrap();
    assert!(n7.as_str().contains(";CPD:3"), "got {}", n7);
    let hop = comp.element_history(&n7).unwrap();
    assert_eq!(hop.tag, 3);
    assert_eq!(b.indexed_name(&hop.original), Some(face(1)));
}

#[test]
fn retag_reowns_shape_without_breaking_history() {
    let a = box_shape(2);
    let mut comp = Shape::make_compound(&[a], 9, None);
    let name = comp.mapped_name(face(1), false).unwrap();
    comp.retag_element_map(42, None);
    assert_eq!(comp.tag, 42);
    // names and upstream provenance survive the re-owning
    assert_eq!(comp.mapped_name(face(1), false), Some(name.clone()));
    assert_eq!(comp.element_history(&name).unwrap().tag, 2);
}

#[test]
fn heuristic_history_decodes_unknown_names() {
    let s = box_shape(1);
    // a derived name this shape has never seen still yields its hop
    let hop = s
        .element_history_heuristic(&MappedName::from("Edge5;FUS:11;CHF:3"))
        .unwrap();
    assert_eq!(hop.tag, 3);
    assert_eq!(hop.original.as_str(), "Edge5;FUS:11");
    // names without an op tail have no producer
    assert!(s
        .element_history_heuristic(&MappedName::from("strange"))
        .is_none());
}

#[test]
fn fix_repairs_only_invalid_shapes() {
    let mut k = MockKernel::new();
    let mut topo = k.make_box(1.0, 1.0, 1.0).unwrap();
    topo.valid = false;
    let mut s = Shape::new(1, None, topo);
    s.init_leaf_names();

    assert!(!s.fix(&mut k, FixMode::Disabled).unwrap());
    assert!(s.fix(&mut k, FixMode::Enabled).unwrap());
    // names survive the repair
    assert_eq!(s.indexed_name(&MappedName::from("Face2")), Some(face(2)));
    // the shape is valid now, so Enabled no longer repairs
    assert!(!s.fix(&mut k, FixMode::Enabled).unwrap());
    // Always repairs regardless
    assert!(s.fix(&mut k, FixMode::Always).unwrap());
}

// ── Geometric search ───────────────────────────────────────────────────────

#[test]
fn search_finds_coincident_elements() {
    let s = box_shape(1);
    let one_face = s.sub_shape(ShapeKind::Face, 3);
    let found = s.search_sub_shape(&one_face, Default::default(), 1e-7, 1e-9);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].index, Some(face(3)));
    assert_eq!(found[0].name.as_ref().unwrap().as_str(), "Face3");
}

#[test]
fn search_respects_tolerance() {
    let a = box_shape(1);
    let mut b = box_shape(2);
    b.transform_shape(&nalgebra::Matrix4::new_translation(&nalgebra::Vector3::new(
        5.0, 0.0, 0.0,
    )));
    let probe = b.sub_shape(ShapeKind::Face, 1);
    assert!(a.search_sub_shape(&probe, Default::default(), 1e-7, 1e-9).is_empty());
}

// ── Map bookkeeping ────────────────────────────────────────────────────────

#[test]
fn element_map_starts_empty_and_fills_lazily() {
    let mut k = MockKernel::new();
    let s = Shape::new(1, None, k.make_box(1.0, 1.0, 1.0).unwrap());
    assert!(s.element_map().is_empty());
    assert_eq!(s.element_map(), &ElementMap::new());
}

#[test]
fn stale_names_resolve_to_nothing_after_sub_extraction() {
    let s = box_shape(1);
    let sub = s.sub_shape(ShapeKind::Face, 1);
    // names of faces outside the extracted one are gone from the trimmed map
    assert!(sub.indexed_name(&MappedName::from("Face2")).is_none());
    assert!(sub.indexed_name(&MappedName::from("Face1")).is_some());
}
