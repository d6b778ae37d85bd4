use serde::{Deserialize, Serialize};

use crate::kind::ShapeKind;

/// Marks the start of a mapped element inside a sub-name string.
pub const ELEMENT_MAP_PREFIX: &str = ";";
/// Flags a mapped name whose element could not be re-identified.
pub const MISSING_PREFIX: &str = "?";
/// Carries a disambiguation index appended to a synthesized name.
pub const INDEX_POSTFIX: &str = ";i";
/// Marks a name that was compacted through the string hasher.
pub const HASHED_PREFIX: &str = "#";

/// Transient, position-based identity of a sub-shape element ("Face7").
/// Valid only against one specific shape snapshot; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexedName {
    pub kind: ShapeKind,
    /// 1-based position in the shape's enumeration order.
    pub index: u32,
}

impl IndexedName {
    pub fn new(kind: ShapeKind, index: u32) -> Self {
        debug_assert!(index >= 1, "indexed names are 1-based");
        Self { kind, index }
    }

    /// Parse "Face7"-style text. Returns None for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        for kind in ShapeKind::ALL {
            if let Some(rest) = text.strip_prefix(kind.as_str()) {
                if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                    continue;
                }
                let index: u32 = rest.parse().ok()?;
                if index >= 1 {
                    return Some(Self { kind, index });
                }
            }
        }
        None
    }
}

impl std::fmt::Display for IndexedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.as_str(), self.index)
    }
}

/// Persistent symbolic identity for a sub-shape element, stable across
/// rebuilds while it can be resolved. Opaque to everyone but the element
/// name table that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappedName(String);

impl MappedName {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_missing(&self) -> bool {
        self.0.starts_with(MISSING_PREFIX)
    }

    /// The same name flagged as no longer resolvable.
    pub fn into_missing(self) -> Self {
        if self.is_missing() {
            self
        } else {
            Self(format!("{}{}", MISSING_PREFIX, self.0))
        }
    }

    /// Strips the missing marker, if any.
    pub fn stripped(&self) -> &str {
        self.0.strip_prefix(MISSING_PREFIX).unwrap_or(&self.0)
    }

    pub fn is_hashed(&self) -> bool {
        self.stripped().starts_with(HASHED_PREFIX)
    }

    /// The interning id of a hashed name.
    pub fn hashed_id(&self) -> Option<u32> {
        self.stripped().strip_prefix(HASHED_PREFIX)?.parse().ok()
    }

    pub fn hashed(id: u32) -> Self {
        Self(format!("{}{}", HASHED_PREFIX, id))
    }
}

impl std::fmt::Display for MappedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MappedName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MappedName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<IndexedName> for MappedName {
    fn from(idx: IndexedName) -> Self {
        Self(idx.to_string())
    }
}

/// The two faces of one element identity. Either side may be absent: a
/// freshly enumerated element has an index but no persistent name yet, and
/// a name that survived a model edit may have lost its index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedElement {
    pub name: Option<MappedName>,
    pub index: Option<IndexedName>,
}

impl MappedElement {
    pub fn new(name: Option<MappedName>, index: Option<IndexedName>) -> Self {
        Self { name, index }
    }
}

/// Whether a sub-name string addresses a mapped element.
pub fn is_mapped_element(text: &str) -> bool {
    text.starts_with(ELEMENT_MAP_PREFIX)
}

/// Byte offset where the trailing element name of a dotted sub-name path
/// starts, if there is one. Mapped elements begin at their `;` marker
/// (they may themselves contain dots); otherwise the last `.`-separated
/// segment counts when it parses as an indexed name.
pub fn find_element_name(sub: &str) -> Option<usize> {
    if let Some(pos) = sub.find(ELEMENT_MAP_PREFIX) {
        return Some(pos);
    }
    match sub.rfind('.') {
        Some(dot) => IndexedName::parse(&sub[dot + 1..]).map(|_| dot + 1),
        None => IndexedName::parse(sub).map(|_| 0),
    }
}

/// Splits a sub-name into (object path, element name). Either part may be
/// empty.
pub fn split_sub_name(sub: &str) -> (&str, &str) {
    match find_element_name(sub) {
        Some(pos) => {
            let path = sub[..pos].trim_end_matches('.');
            (path, &sub[pos..])
        }
        None => (sub.trim_end_matches('.'), ""),
    }
}
