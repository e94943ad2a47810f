//! Minimal stand-in for the external string-interning service (§4.6).
//!
//! The real `StringHasher`/`StringID` pair lives outside this crate's scope;
//! what's load-bearing here is the *interface* `ElementMap` and the
//! serializer need: a way to turn a 64-bit content hash into a small
//! interned handle, check two handles came from the same hasher instance,
//! and mark/unmark a handle during the save pass (`beforeSave`'s "collect
//! sids that need saving as literals" sweep, §6.2).

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

/// An interned handle produced by a `StringHasher`. Cheap to clone (shares
/// the underlying cell), comparable by identity of the hasher that minted it
/// plus its numeric id.
#[derive(Debug, Clone)]
pub struct StringId {
    hasher_tag: u64,
    id: i64,
    marked: Rc<Cell<bool>>,
}

impl StringId {
    fn new(hasher_tag: u64, id: i64) -> Self {
        StringId { hasher_tag, id, marked: Rc::new(Cell::new(false)) }
    }

    /// Reconstruct an id read back from a save file, where the hasher tag
    /// is whatever the restoring process assigns rather than minted fresh.
    pub fn from_raw(hasher_tag: u64, id: i64) -> Self {
        StringId::new(hasher_tag, id)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn mark(&self) {
        self.marked.set(true);
    }

    pub fn unmark(&self) {
        self.marked.set(false);
    }

    pub fn is_marked(&self) -> bool {
        self.marked.get()
    }
}

impl PartialEq for StringId {
    fn eq(&self, other: &Self) -> bool {
        self.hasher_tag == other.hasher_tag && self.id == other.id
    }
}
impl Eq for StringId {}

impl std::hash::Hash for StringId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hasher_tag.hash(state);
        self.id.hash(state);
    }
}

/// Interning service contract `ElementMap` depends on.
pub trait StringHasher {
    /// Look up (or mint) the id for a 64-bit content hash, if this hasher
    /// instance is willing to hand one out.
    fn get_id(&self, hash: u64) -> Option<StringId>;

    /// True iff `id` was minted by this exact hasher instance — used to
    /// reject stale `StringId`s carried over from a different document.
    fn is_from_same_hasher(&self, id: &StringId) -> bool;
}

/// In-memory reference implementation: a simple hash -> id table, good
/// enough to drive tests and the CLI harness.
pub struct TableHasher {
    tag: u64,
    table: std::sync::Mutex<HashMap<u64, i64>>,
    next_id: std::sync::atomic::AtomicI64,
}

impl TableHasher {
    pub fn new(tag: u64) -> Self {
        TableHasher { tag, table: std::sync::Mutex::new(HashMap::new()), next_id: std::sync::atomic::AtomicI64::new(1) }
    }
}

impl StringHasher for TableHasher {
    fn get_id(&self, hash: u64) -> Option<StringId> {
        let mut table = self.table.lock().expect("string hasher table lock poisoned");
        let id = *table.entry(hash).or_insert_with(|| {
            self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        });
        Some(StringId::new(self.tag, id))
    }

    fn is_from_same_hasher(&self, id: &StringId) -> bool {
        id.hasher_tag == self.tag
    }
}

#[cfg(test)]
mod string_hasher_tests {
    use super::*;

    #[test]
    fn same_content_hash_yields_same_id() {
        let hasher = TableHasher::new(1);
        let a = hasher.get_id(42).unwrap();
        let b = hasher.get_id(42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_hashers_are_distinguishable() {
        let h1 = TableHasher::new(1);
        let h2 = TableHasher::new(2);
        let id = h1.get_id(42).unwrap();
        assert!(h1.is_from_same_hasher(&id));
        assert!(!h2.is_from_same_hasher(&id));
    }

    #[test]
    fn mark_state_is_independent_of_equality() {
        let hasher = TableHasher::new(1);
        let id = hasher.get_id(7).unwrap();
        assert!(!id.is_marked());
        id.mark();
        assert!(id.is_marked());
    }
}
