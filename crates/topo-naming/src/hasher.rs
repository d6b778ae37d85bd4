use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tenon_types::MappedName;

/// How long a derived name may grow before it is interned.
pub const HASH_THRESHOLD: usize = 64;

/// Shared reference to a document's string hasher. One table per document,
/// shared by every shape that document owns.
pub type HasherRef = Rc<StringHasher>;

/// Append-only string interning table used to compact long derived names.
/// Entries are never mutated once added, so readers holding a `HasherRef`
/// never observe partial state; the engine runs one writer at a time, which
/// is what the interior `RefCell` relies on.
#[derive(Debug, Default)]
pub struct StringHasher {
    inner: RefCell<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    table: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringHasher {
    pub fn new() -> HasherRef {
        Rc::new(Self::default())
    }

    /// Interns `text`, returning its stable id. The same text always maps
    /// to the same id within one table.
    pub fn intern(&self, text: &str) -> u32 {
        let mut inner = self.inner.borrow_mut();
        if let Some(&id) = inner.index.get(text) {
            return id;
        }
        let id = inner.table.len() as u32;
        inner.table.push(text.to_string());
        inner.index.insert(text.to_string(), id);
        id
    }

    /// Looks a hashed id back up. None means the id belongs to a different
    /// table (a cross-document reference decoded against the wrong hasher);
    /// callers must treat any answer from here as best-effort.
    pub fn resolve(&self, id: u32) -> Option<String> {
        self.inner.borrow().table.get(id as usize).cloned()
    }

    /// Resolves a `#id` name to its full text. Non-hashed names pass
    /// through unchanged.
    pub fn resolve_name(&self, name: &MappedName) -> Option<String> {
        match name.hashed_id() {
            Some(id) => self.resolve(id),
            None => Some(name.stripped().to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let h = StringHasher::new();
        let a = h.intern("Face1;FUS:3");
        let b = h.intern("Face2;FUS:3");
        assert_ne!(a, b);
        assert_eq!(h.intern("Face1;FUS:3"), a);
        assert_eq!(h.resolve(a).as_deref(), Some("Face1;FUS:3"));
        assert_eq!(h.resolve(99), None);
    }

    #[test]
    fn resolve_name_passes_plain_names_through() {
        let h = StringHasher::new();
        let id = h.intern("some long name");
        assert_eq!(
            h.resolve_name(&MappedName::hashed(id)).as_deref(),
            Some("some long name")
        );
        assert_eq!(
            h.resolve_name(&MappedName::from("Edge4")).as_deref(),
            Some("Edge4")
        );
    }
}
