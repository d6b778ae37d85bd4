//! On-demand naming of higher-level elements (wires, shells, solids,
//! compounds) that have an index but no persistent name, by combining a
//! minimal disambiguating set of lower-element names. Using a minimal set
//! keeps the generated name stable under unrelated edits elsewhere in the
//! shape.

use crate::shape::Shape;
use tenon_types::{
    IndexedName, MappedElement, MappedName, OpCode, INDEX_POSTFIX, MISSING_PREFIX,
};

/// Lower elements to take at minimum, for robustness against model
/// changes; one uniquely-identifying element would do in theory.
pub const MIN_LOWER_TOPO_NAMES: usize = 3;
/// Cap on candidates; past this, the smallest disambiguating combination
/// is selected and an index suffix covers any remaining ambiguity.
pub const MAX_LOWER_TOPO_NAMES: usize = 10;

/// Resolves an element name for export, synthesizing a high-level combo
/// name when the element has an index but no mapped name yet, and
/// re-binding a stored combo name against the current topology when the
/// index side is lost. Ambiguity on the re-bind path is never guessed:
/// the element comes back flagged missing instead.
pub fn export_element_name(shape: &mut Shape, name: &str) -> MappedElement {
    let mapped = shape.get_element_name(name);
    match (mapped.name.clone(), mapped.index) {
        (None, Some(idx)) => synthesize(shape, idx).unwrap_or(mapped),
        (Some(n), None) => decode(shape, name, n.clone()).unwrap_or(MappedElement {
            name: Some(n.into_missing()),
            index: None,
        }),
        _ => mapped,
    }
}

fn synthesize(shape: &mut Shape, idx: IndexedName) -> Option<MappedElement> {
    let lower = idx.kind.lower()?;

    let children = {
        let topo = shape.topology()?;
        let elem = topo.element(idx)?;
        let mut ch: Vec<IndexedName> = elem
            .contains
            .iter()
            .copied()
            .filter(|c| c.kind == lower)
            .collect();
        ch.sort();
        ch
    };

    let mut names: Vec<MappedName> = Vec::new();
    let mut entries: Vec<Vec<u32>> = Vec::new();
    let mut unique_count = 0;
    for child in children {
        let Some(nm) = shape.mapped_name(child, false) else {
            continue;
        };
        let ancestors = shape.topology()?.find_ancestors(child, idx.kind);
        if ancestors.is_empty() {
            continue;
        }
        let is_unique = ancestors.len() == 1;
        names.push(nm);
        entries.push(ancestors);
        if is_unique {
            unique_count += 1;
            if unique_count >= MIN_LOWER_TOPO_NAMES {
                break;
            }
        }
        if names.len() >= MAX_LOWER_TOPO_NAMES {
            break;
        }
    }
    if names.is_empty() {
        return None;
    }

    let mut ancestors: Vec<u32> = Vec::new();
    if names.len() >= MAX_LOWER_TOPO_NAMES {
        // Too many candidates before reaching uniqueness: re-sort by
        // ascending ancestor count and greedily intersect, keeping the
        // entries that actually narrow the set.
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| entries[i].len());
        let mut sorted_names: Vec<MappedName> = Vec::new();
        let mut pos = 0;
        for i in order {
            let size = ancestors.len();
            if size == 0 {
                ancestors = entries[i].clone();
            } else if size > 1 {
                ancestors.retain(|a| entries[i].contains(a));
            }
            if size == 1 || size != ancestors.len() {
                sorted_names.insert(pos, names[i].clone());
                pos += 1;
            } else {
                sorted_names.push(names[i].clone());
            }
            if size == 1 && sorted_names.len() >= MIN_LOWER_TOPO_NAMES {
                break;
            }
        }
        names = sorted_names;
    } else {
        for e in &entries {
            if ancestors.is_empty() {
                ancestors = e.clone();
            } else if ancestors.len() > 1 {
                ancestors.retain(|a| e.contains(a));
            }
        }
    }
    names.truncate(MAX_LOWER_TOPO_NAMES);

    // The chosen elements may identify more than one candidate; an index
    // into the surviving set (shape-enumeration order) disambiguates.
    let mut postfix = String::new();
    if ancestors.len() > 1 {
        if let Some(p) = ancestors.iter().position(|&a| a == idx.index) {
            postfix = format!("{}{}", INDEX_POSTFIX, p);
        }
    }
    let name = shape.set_element_combo_name(idx, &names, OpCode::Combo, &postfix);
    Some(MappedElement {
        name: Some(name),
        index: Some(idx),
    })
}

/// Re-binds a stored combo name whose index was lost to a model change.
/// The old indexed name rides along after a dot as the decode hint.
fn decode(shape: &Shape, raw: &str, name: MappedName) -> Option<MappedElement> {
    let dot = raw.find('.')?;
    let hint = raw[dot + 1..].trim_start_matches(MISSING_PREFIX);
    let old_idx = IndexedName::parse(hint)?;

    let mut postfix = String::new();
    let comps = shape.decode_element_combo_name(&name, &mut postfix);
    if comps.is_empty() {
        return None;
    }

    let topo = shape.topology()?;
    let mut ancestors: Vec<u32> = Vec::new();
    for comp in &comps {
        let cidx = shape.indexed_name(comp)?;
        let current = topo.find_ancestors(cidx, old_idx.kind);
        if current.is_empty() {
            return None;
        }
        if ancestors.is_empty() {
            ancestors = current;
        } else {
            ancestors.retain(|a| current.contains(a));
            if ancestors.is_empty() {
                // model changed beyond recognition, bail
                return None;
            }
        }
    }

    if ancestors.len() > 1 && postfix.starts_with(INDEX_POSTFIX) {
        if let Ok(i) = postfix[INDEX_POSTFIX.len()..].parse::<usize>() {
            if i < ancestors.len() {
                let a = ancestors[i];
                ancestors = vec![a];
            }
        }
    }
    if ancestors.len() == 1 {
        Some(MappedElement {
            name: Some(name),
            index: Some(IndexedName::new(old_idx.kind, ancestors[0])),
        })
    } else {
        None
    }
}
