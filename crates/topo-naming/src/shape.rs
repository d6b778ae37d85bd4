use std::collections::HashSet;
use std::rc::Rc;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::element_map::{ElementMap, NameOrigin};
use crate::hasher::{HasherRef, HASH_THRESHOLD};
use kernel_shim::{has_scale, Kernel, KernelError, OpOutcome, Topology, TraceStatus};
use tenon_types::{
    IndexedName, MappedElement, MappedName, OpCode, ShapeKind, ELEMENT_MAP_PREFIX, INDEX_POSTFIX,
    MISSING_PREFIX,
};

/// Shape repair policy, applied after feature execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FixMode {
    /// Never repair.
    #[default]
    Disabled,
    /// Validate and repair only invalid shapes.
    Enabled,
    /// Repair without validating first.
    Always,
}

/// Options for geometric coincidence search.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Require matching surface/curve type and size, not just position.
    pub check_geometry: bool,
    /// Stop at the first match.
    pub single: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            check_geometry: true,
            single: false,
        }
    }
}

/// One hop of element provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHop {
    /// Tag of the feature object that produced the element.
    pub tag: i64,
    /// The element's name on the producing shape.
    pub original: MappedName,
    /// Names the element passed through within the queried shape.
    pub intermediates: Vec<MappedName>,
}

/// A B-rep shape snapshot plus its element name table.
///
/// The table is copy-on-write: cloning a Shape shares the map until one of
/// the clones mutates it, so "logically const" queries that register names
/// on a clone never affect the original.
#[derive(Debug, Clone)]
pub struct Shape {
    topo: Option<Rc<Topology>>,
    /// Tag of the owning feature object; 0 = untagged.
    pub tag: i64,
    /// The owning document's string hasher, if any.
    pub hasher: Option<HasherRef>,
    map: Rc<ElementMap>,
    placement: Matrix4<f64>,
}

impl Default for Shape {
    fn default() -> Self {
        Self::null()
    }
}

impl Shape {
    pub fn null() -> Self {
        Self {
            topo: None,
            tag: 0,
            hasher: None,
            map: Rc::new(ElementMap::new()),
            placement: Matrix4::identity(),
        }
    }

    pub fn new(tag: i64, hasher: Option<HasherRef>, topo: Topology) -> Self {
        Self {
            topo: Some(Rc::new(topo)),
            tag,
            hasher,
            map: Rc::new(ElementMap::new()),
            placement: Matrix4::identity(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.topo.is_none()
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topo.as_deref()
    }

    pub fn kind(&self) -> Option<ShapeKind> {
        self.topo.as_ref().map(|t| t.kind())
    }

    pub fn count_sub_shapes(&self, kind: ShapeKind) -> usize {
        self.topo.as_ref().map_or(0, |t| t.count(kind))
    }

    pub fn element_map(&self) -> &ElementMap {
        &self.map
    }

    pub fn placement(&self) -> &Matrix4<f64> {
        &self.placement
    }

    pub fn set_placement(&mut self, placement: Matrix4<f64>) {
        self.placement = placement;
    }

    /// Composes a transform onto the shape's placement. Returns whether
    /// the transform carried a scaling component (callers use this to
    /// force cache writes).
    pub fn transform_shape(&mut self, mat: &Matrix4<f64>) -> bool {
        self.placement = mat * self.placement;
        has_scale(mat)
    }

    fn element_exists(&self, index: IndexedName) -> bool {
        self.topo
            .as_ref()
            .is_some_and(|t| t.element(index).is_some())
    }

    fn map_mut(&mut self) -> &mut ElementMap {
        Rc::make_mut(&mut self.map)
    }

    fn intern_text(hasher: &Option<HasherRef>, text: String) -> MappedName {
        if text.len() > HASH_THRESHOLD {
            if let Some(h) = hasher {
                return MappedName::hashed(h.intern(&text));
            }
        }
        MappedName::from(text)
    }

    /// Registers a mapped name for an element of this shape.
    pub fn set_element_name(
        &mut self,
        index: IndexedName,
        text: impl Into<String>,
        origin: Option<NameOrigin>,
    ) -> MappedName {
        debug_assert!(self.element_exists(index), "name for a nonexistent element");
        let name = Self::intern_text(&self.hasher, text.into());
        self.map_mut().set(name.clone(), index, origin);
        name
    }

    /// Assigns leaf names to vertices, edges and faces of a freshly built
    /// primitive. Higher kinds stay unnamed; they are synthesized on
    /// demand.
    pub fn init_leaf_names(&mut self) {
        let Some(topo) = self.topo.clone() else { return };
        for kind in [ShapeKind::Vertex, ShapeKind::Edge, ShapeKind::Face] {
            for (idx, _) in topo.elements(kind) {
                self.set_element_name(
                    idx,
                    idx.to_string(),
                    Some(NameOrigin {
                        tag: 0,
                        op: OpCode::Primitive,
                        sources: Vec::new(),
                        intermediates: Vec::new(),
                    }),
                );
            }
        }
    }

    /// The mapped name registered for `index`. With `allow_unmapped`, an
    /// existing but unnamed element answers with its indexed name as an
    /// opaque identity.
    pub fn mapped_name(&self, index: IndexedName, allow_unmapped: bool) -> Option<MappedName> {
        if let Some(n) = self.map.mapped(index) {
            return Some(n.clone());
        }
        if allow_unmapped && self.element_exists(index) {
            return Some(MappedName::from(index));
        }
        None
    }

    /// The indexed name a mapped name currently resolves to. None when the
    /// element vanished from this snapshot (the name is then "missing").
    pub fn indexed_name(&self, name: &MappedName) -> Option<IndexedName> {
        let idx = if name.is_missing() {
            self.map.indexed(&MappedName::from(name.stripped()))?
        } else {
            self.map.indexed(name)?
        };
        self.element_exists(idx).then_some(idx)
    }

    /// The element kind a mapped name refers to, per the name table. For
    /// names no longer in the table, the kind encoded in the name text is
    /// the best-effort answer.
    pub fn element_kind(&self, name: &MappedName) -> Option<ShapeKind> {
        let key = MappedName::from(name.stripped());
        if let Some(e) = self.map.entry(&key) {
            return Some(e.index.kind);
        }
        let text = match &self.hasher {
            Some(h) => h.resolve_name(name)?,
            None => (!name.is_hashed()).then(|| name.stripped().to_string())?,
        };
        name_kind_hint(&text)
    }

    /// Parses an element name string of either style into its mapped and
    /// indexed sides. Index-style input looks up the registered mapped
    /// name; mapped-style input (with the `;` marker or any unrecognized
    /// text, which is treated as an opaque mapped name) looks up the
    /// current index.
    pub fn get_element_name(&self, text: &str) -> MappedElement {
        let t = text.strip_prefix(MISSING_PREFIX).unwrap_or(text);
        if let Some(idx) = IndexedName::parse(t) {
            return MappedElement {
                name: self.map.mapped(idx).cloned(),
                index: self.element_exists(idx).then_some(idx),
            };
        }
        let body = t.strip_prefix(ELEMENT_MAP_PREFIX).unwrap_or(t);
        // an appended ".IndexedName" hint is not part of the stored name
        let name_part = match body.find('.') {
            Some(dot)
                if IndexedName::parse(
                    body[dot + 1..].trim_start_matches(MISSING_PREFIX),
                )
                .is_some() =>
            {
                &body[..dot]
            }
            _ => body,
        };
        let name = MappedName::from(name_part);
        let index = self.indexed_name(&name);
        MappedElement {
            name: Some(name),
            index,
        }
    }

    /// Extracts the Nth sub-shape of the given kind, carrying a trimmed
    /// view of the element map so names keep resolving. Null when out of
    /// range.
    pub fn sub_shape(&self, kind: ShapeKind, index: u32) -> Shape {
        let Some(topo) = self.topology() else {
            return Shape::null();
        };
        let Some((sub, remap)) = topo.sub_topology(kind, index) else {
            return Shape::null();
        };
        Shape {
            topo: Some(Rc::new(sub)),
            tag: self.tag,
            hasher: self.hasher.clone(),
            map: Rc::new(self.map.remapped(&remap)),
            placement: self.placement,
        }
    }

    pub fn sub_shape_by_name(&self, name: &str) -> Shape {
        match self.get_element_name(name).index {
            Some(idx) => self.sub_shape(idx.kind, idx.index),
            None => Shape::null(),
        }
    }

    /// Decodes one hop of provenance for a mapped name. None when the name
    /// has no recorded producer (an original leaf name, a synthesized
    /// name, or an unknown string).
    pub fn element_history(&self, name: &MappedName) -> Option<ElementHop> {
        let key = MappedName::from(name.stripped());
        let origin = self.map.entry(&key)?.origin.as_ref()?;
        if origin.tag == 0 || origin.sources.is_empty() {
            return None;
        }
        Some(ElementHop {
            tag: origin.tag,
            original: origin.sources[0].clone(),
            intermediates: origin.intermediates.clone(),
        })
    }

    /// Like `element_history`, but falls back to decoding the hop out of
    /// the name text (de-hashed through the table if needed) when the
    /// name is no longer present in this shape's map. The fallback is a
    /// heuristic: a hashed name can decode against the wrong document's
    /// table, which is why traversals built on this carry cycle guards.
    pub fn element_history_heuristic(&self, name: &MappedName) -> Option<ElementHop> {
        let key = MappedName::from(name.stripped());
        if self.map.entry(&key).is_some() {
            return self.element_history(name);
        }
        let text = match &self.hasher {
            Some(h) => h.resolve_name(name)?,
            None => (!name.is_hashed()).then(|| name.stripped().to_string())?,
        };
        let (tag, original) = parse_name_hop(&text)?;
        Some(ElementHop {
            tag,
            original,
            intermediates: Vec::new(),
        })
    }

    /// Synthesizes and registers a persistent name for a higher-level
    /// element from the names of lower-level components. Deterministic:
    /// the resulting name is a pure function of the components, the op
    /// code and the suffix.
    pub fn set_element_combo_name(
        &mut self,
        index: IndexedName,
        names: &[MappedName],
        op: OpCode,
        postfix: &str,
    ) -> MappedName {
        let comps: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        let text = format!(
            "({});{}:{}{}",
            comps.join(","),
            op.code(),
            index.kind.as_str(),
            postfix
        );
        let origin = NameOrigin {
            tag: 0,
            op,
            sources: names.to_vec(),
            intermediates: Vec::new(),
        };
        self.set_element_name(index, text, Some(origin))
    }

    /// Parses a combo name back into its component names and suffix. When
    /// this shape still owns the entry, the recorded sources are
    /// authoritative; otherwise the text (possibly de-hashed, a
    /// best-effort path) is parsed.
    pub fn decode_element_combo_name(
        &self,
        name: &MappedName,
        postfix_out: &mut String,
    ) -> Vec<MappedName> {
        let text = match &self.hasher {
            Some(h) => h.resolve_name(name),
            None => (!name.is_hashed()).then(|| name.stripped().to_string()),
        };
        let Some(text) = text else {
            tracing::warn!(name = %name, "combo name does not resolve through this document's hasher");
            return Vec::new();
        };
        let Some((comps, postfix)) = parse_combo_text(&text) else {
            return Vec::new();
        };
        *postfix_out = postfix;
        if let Some(entry) = self.map.entry(&MappedName::from(name.stripped())) {
            if let Some(origin) = &entry.origin {
                if !origin.sources.is_empty() {
                    return origin.sources.clone();
                }
            }
        }
        comps
    }

    /// Geometry-based correlation: elements of this shape coincident with
    /// elements of `other`, within the tolerances. The fallback when
    /// name-based tracing fails.
    pub fn search_sub_shape(
        &self,
        other: &Shape,
        options: SearchOptions,
        tol: f64,
        atol: f64,
    ) -> Vec<MappedElement> {
        let mut res = Vec::new();
        let (Some(st), Some(ot)) = (self.topology(), other.topology()) else {
            return res;
        };
        let kind = ot.kind();
        for (_, other_elem) in ot.elements(kind) {
            let other_sig = other_elem.signature.transformed(&other.placement);
            for (idx, elem) in st.elements(kind) {
                let sig = elem.signature.transformed(&self.placement);
                if sig.coincides(&other_sig, options.check_geometry, tol, atol) {
                    res.push(MappedElement {
                        name: self.mapped_name(idx, true),
                        index: Some(idx),
                    });
                    if options.single {
                        return res;
                    }
                }
            }
        }
        res
    }

    /// Re-owns the shape under a different feature tag (e.g. through a
    /// link) without renaming anything: ownership provenance is
    /// re-stamped, upstream source tags stay intact.
    pub fn retag_element_map(&mut self, tag: i64, hasher: Option<HasherRef>) {
        let old = self.tag;
        self.tag = tag;
        if hasher.is_some() {
            self.hasher = hasher;
        }
        self.map_mut().retag(old, tag);
    }

    /// Drops the element map, tag and hasher; the shape becomes anonymous
    /// geometry.
    pub fn reset_element_map(&mut self) {
        self.map = Rc::new(ElementMap::new());
        self.tag = 0;
        self.hasher = None;
    }

    /// Kernel-level shape repair, gated by the fix policy. Carried
    /// elements keep their names; rewritten ones keep their provenance
    /// with the old name recorded as an intermediate.
    pub fn fix(&mut self, kernel: &mut dyn Kernel, mode: FixMode) -> Result<bool, KernelError> {
        let Some(topo) = self.topo.clone() else {
            return Ok(false);
        };
        let needed = match mode {
            FixMode::Disabled => false,
            FixMode::Always => true,
            FixMode::Enabled => !kernel.is_valid(&topo),
        };
        if !needed {
            return Ok(false);
        }
        let outcome = kernel.fix(&topo)?;
        let mut new_map = ElementMap::new();
        for trace in &outcome.traces {
            let Some(&(_, src_idx)) = trace.sources.first() else {
                continue;
            };
            let Some(old_name) = self.map.mapped(src_idx).cloned() else {
                continue;
            };
            let origin = self.map.entry(&old_name).and_then(|e| e.origin.clone());
            match trace.status {
                TraceStatus::Carried => {
                    new_map.set(old_name, trace.result, origin);
                }
                TraceStatus::Generated => {
                    let text = format!("{};{}", old_name, OpCode::Fix.code());
                    let mut origin = origin.unwrap_or_default();
                    origin.intermediates.insert(0, old_name);
                    let name = Self::intern_text(&self.hasher, text);
                    new_map.set(name, trace.result, Some(origin));
                }
            }
        }
        self.topo = Some(Rc::new(outcome.topology));
        self.map = Rc::new(new_map);
        Ok(true)
    }

    /// Builds the named result shape of a kernel operation: each traced
    /// element whose primary source carries a name gets a derived name
    /// that is a pure function of (source name, op code, source tag).
    pub fn from_op_result(
        op: OpCode,
        inputs: &[&Shape],
        outcome: OpOutcome,
        tag: i64,
        hasher: Option<HasherRef>,
    ) -> Shape {
        let mut shape = Shape::new(tag, hasher, outcome.topology);
        let mut seen: HashSet<String> = HashSet::new();
        for trace in &outcome.traces {
            let Some(&(src_i, src_idx)) = trace.sources.first() else {
                continue;
            };
            let Some(src_shape) = inputs.get(src_i) else {
                continue;
            };
            let Some(primary) = src_shape.mapped_name(src_idx, false) else {
                continue;
            };
            let sources: Vec<MappedName> = trace
                .sources
                .iter()
                .filter_map(|&(i, idx)| inputs.get(i).and_then(|s| s.mapped_name(idx, false)))
                .collect();
            let src_tag = src_shape.tag;
            let base = if src_tag != 0 {
                format!("{};{}:{}", primary, op.code(), src_tag)
            } else {
                format!("{};{}", primary, op.code())
            };
            let mut text = base.clone();
            let mut n = 0;
            while seen.contains(&text) {
                n += 1;
                text = format!("{}{}{}", base, INDEX_POSTFIX, n);
            }
            seen.insert(text.clone());
            shape.set_element_name(
                trace.result,
                text,
                Some(NameOrigin {
                    tag: src_tag,
                    op,
                    sources,
                    intermediates: Vec::new(),
                }),
            );
        }
        shape
    }

    /// Compound of the given shapes. Child placements are baked in, child
    /// maps merge with their names qualified by the child's tag so
    /// history hops lead back to the child.
    pub fn make_compound(parts: &[Shape], tag: i64, hasher: Option<HasherRef>) -> Shape {
        let baked: Vec<Topology> = parts
            .iter()
            .filter_map(|p| {
                let t = p.topology()?;
                Some(if p.placement == Matrix4::identity() {
                    t.clone()
                } else {
                    t.transformed(&p.placement)
                })
            })
            .collect();
        if baked.is_empty() {
            return Shape::null();
        }
        let refs: Vec<&Topology> = baked.iter().collect();
        let (topo, remaps) = Topology::compound(&refs);
        let mut shape = Shape::new(tag, hasher, topo);
        let live: Vec<&Shape> = parts.iter().filter(|p| !p.is_null()).collect();
        for (ordinal, (part, remap)) in live.iter().zip(&remaps).enumerate() {
            for (name, entry) in part.element_map().iter_sorted() {
                let Some(&new_idx) = remap.get(&entry.index) else {
                    continue;
                };
                let text = if part.tag != 0 {
                    format!("{};{}:{}", name, OpCode::Compound.code(), part.tag)
                } else {
                    format!("{};{}{}{}", name, OpCode::Compound.code(), INDEX_POSTFIX, ordinal)
                };
                shape.set_element_name(
                    new_idx,
                    text,
                    Some(NameOrigin {
                        tag: part.tag,
                        op: OpCode::Compound,
                        sources: vec![name.clone()],
                        intermediates: Vec::new(),
                    }),
                );
            }
        }
        shape
    }
}

const OP_CODES: [&str; 11] = [
    "PRI", "XTR", "FUS", "CUT", "CMN", "CHF", "FLT", "TRF", "CPD", "CMB", "FIX",
];

/// The element kind encoded in a name's text: the trailing kind marker of
/// a combo name, or the leading indexed name of a derived one.
fn name_kind_hint(text: &str) -> Option<ShapeKind> {
    if let Some(rest) = text.strip_prefix('(') {
        let close = rest.rfind(')')?;
        let tail = &rest[close + 1..];
        let kind_str = tail.split(':').nth(1)?.split(';').next()?;
        return ShapeKind::ALL.iter().copied().find(|k| k.as_str() == kind_str);
    }
    IndexedName::parse(text.split(';').next()?).map(|i| i.kind)
}

/// Best-effort decode of one provenance hop out of a derived name's text:
/// strips disambiguation postfixes, then splits the last `;OP:tag`
/// segment off. None when the tail is not an operation segment or carries
/// no producer tag.
fn parse_name_hop(text: &str) -> Option<(i64, MappedName)> {
    let mut t = text;
    loop {
        let pos = t.rfind(';')?;
        let seg = &t[pos + 1..];
        if seg.starts_with('i') && seg[1..].chars().all(|c| c.is_ascii_digit()) {
            t = &t[..pos];
            continue;
        }
        let (op, tag) = match seg.split_once(':') {
            Some((op, tag)) => (op, tag.parse::<i64>().ok()?),
            None => (seg, 0),
        };
        if !OP_CODES.contains(&op) || tag == 0 || pos == 0 {
            return None;
        }
        return Some((tag, MappedName::from(&t[..pos])));
    }
}

fn parse_combo_text(text: &str) -> Option<(Vec<MappedName>, String)> {
    let body = text.strip_prefix('(')?;
    let close = body.rfind(')')?;
    let comps = body[..close]
        .split(',')
        .filter(|s| !s.is_empty())
        .map(MappedName::from)
        .collect();
    let rest = &body[close + 1..];
    let postfix = rest
        .find(INDEX_POSTFIX)
        .map(|p| rest[p..].to_string())
        .unwrap_or_default();
    Some((comps, postfix))
}
