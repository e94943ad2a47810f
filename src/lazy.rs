use std::sync::Arc;

/// Copy-on-write byte buffer shared between `MappedName` instances.
///
/// The idea mirrors FreeCAD's `Lazy<T>`: a `LazyString` wraps an `Arc<String>`
/// plus an `owner` flag. Cloning a `LazyString` bumps the refcount and marks
/// the clone as non-owning; reading never allocates. The first call that
/// needs to mutate the buffer (`make_mut`) clones the underlying `String` if
/// this instance isn't already the sole owner, then flips `owner` to `true`.
///
/// There is no `Deref`/`DerefMut` impl on purpose: an implicit conversion to
/// the mutable form would silently copy on every write-shaped use, which is
/// exactly the bug this type exists to rule out. Callers must pick
/// `as_str()` (never copies) or `make_mut()` (copies only when shared).
#[derive(Debug)]
pub struct LazyString {
    handle: Arc<String>,
    owner: bool,
}

/// A clone is a share, not a deep copy: it bumps the `Arc` refcount and
/// marks itself non-owning, the same as `share()`. A derived `Clone` would
/// copy `owner` verbatim, leaving two instances both believing they own a
/// buffer with refcount 2 — the next `make_mut` would then find
/// `Arc::get_mut` returning `None` and panic instead of copying.
impl Clone for LazyString {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl LazyString {
    pub fn new() -> Self {
        LazyString { handle: Arc::new(String::new()), owner: true }
    }

    pub fn from_owned(s: String) -> Self {
        LazyString { handle: Arc::new(s), owner: true }
    }

    pub fn from_shared(handle: Arc<String>) -> Self {
        LazyString { handle, owner: false }
    }

    /// Read-only access. Never allocates.
    pub fn as_str(&self) -> &str {
        self.handle.as_str()
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn has_local_copy(&self) -> bool {
        self.owner
    }

    /// Ensure this instance owns its buffer, cloning it if it was shared.
    /// Called automatically by `make_mut`; exposed directly for callers that
    /// want to force the copy ahead of a batch of mutations.
    pub fn create_local_copy(&mut self) {
        if !self.owner {
            self.handle = Arc::new((*self.handle).clone());
            self.owner = true;
        }
    }

    /// Mutable access. Copies the buffer on the first call after a share;
    /// subsequent calls on the same instance are free.
    pub fn make_mut(&mut self) -> &mut String {
        self.create_local_copy();
        Arc::get_mut(&mut self.handle).expect("create_local_copy just made this the sole owner")
    }

    /// Share this buffer with a new handle, as a plain clone does.
    pub fn share(&self) -> Self {
        LazyString { handle: Arc::clone(&self.handle), owner: false }
    }
}

impl Default for LazyString {
    fn default() -> Self {
        LazyString::new()
    }
}

impl From<&str> for LazyString {
    fn from(s: &str) -> Self {
        LazyString::from_owned(s.to_owned())
    }
}

impl From<String> for LazyString {
    fn from(s: String) -> Self {
        LazyString::from_owned(s)
    }
}

/// Equality, ordering and hashing always go through the buffer contents,
/// never through the `owner` flag or `Arc` identity.
impl PartialEq for LazyString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}
impl Eq for LazyString {}

impl PartialOrd for LazyString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LazyString {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl std::hash::Hash for LazyString {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl std::fmt::Display for LazyString {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod lazy_tests {
    use super::*;

    #[test]
    fn copy_does_not_allocate_new_buffer() {
        let a = LazyString::from("TESTTESTTESTTEST");
        let b = a.share();
        assert!(a.has_local_copy());
        assert!(!b.has_local_copy());
        assert!(Arc::ptr_eq(&a.handle, &b.handle));
    }

    #[test]
    fn first_mutation_after_share_clones() {
        let a = LazyString::from("TEST");
        let mut b = a.share();
        assert!(Arc::ptr_eq(&a.handle, &b.handle));
        b.make_mut().push_str("MORE");
        assert!(!Arc::ptr_eq(&a.handle, &b.handle));
        assert_eq!(a.as_str(), "TEST");
        assert_eq!(b.as_str(), "TESTMORE");
        assert!(b.has_local_copy());
    }

    #[test]
    fn read_access_never_copies() {
        let a = LazyString::from("TEST");
        let b = a.share();
        let _ = b.as_str();
        assert!(Arc::ptr_eq(&a.handle, &b.handle));
        assert!(!b.has_local_copy());
    }

    #[test]
    fn equality_and_hash_ignore_sharing_state() {
        let a = LazyString::from("TEST");
        let mut b = a.share();
        b.make_mut();
        assert_eq!(a, b);
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
