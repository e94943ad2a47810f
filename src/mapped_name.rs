use std::cmp::Ordering;
use std::fmt;

use crate::consts::ELEMENT_MAP_PREFIX;
use crate::indexed_name::IndexedName;
use crate::lazy::LazyString;

/// A textual name tracking a topological element across operations.
///
/// Logically a single byte string; physically split at `postfix_start_idx`
/// into an immutable-once-built `data` portion (the "real" name, often an
/// encoded `IndexedName`) and an append-only `postfix` portion (the
/// operation-history suffix). `data` here names the *whole* buffer, exactly
/// as in the original `Lazy<std::string> data` member — `name()`/`postfix()`
/// are just substrings of it, never separate allocations. Equality,
/// ordering, hashing, indexing and `size()` all treat the name as that one
/// concatenation, so two `MappedName`s built with different split points
/// but equal bytes compare equal.
#[derive(Debug, Clone)]
pub struct MappedName {
    data: LazyString,
    postfix_start_idx: usize,
}

impl MappedName {
    pub fn empty() -> Self {
        MappedName { data: LazyString::new(), postfix_start_idx: 0 }
    }

    /// Build from raw bytes, stripping a leading `elementMapPrefix` if present.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let stripped = name.strip_prefix(ELEMENT_MAP_PREFIX).unwrap_or(name);
        let len = stripped.len();
        MappedName { data: LazyString::from(stripped), postfix_start_idx: len }
    }

    /// Encode an `IndexedName` as `<type>` (index == 0) or `<type><index>`.
    pub fn from_indexed_name(idx: &IndexedName) -> Self {
        let encoded = idx.to_string_encoded();
        let len = encoded.len();
        MappedName { data: LazyString::from(encoded), postfix_start_idx: len }
    }

    /// Build `base`'s data with `postfix` appended as postfix, in one shot
    /// (equivalent to `MappedName(const MappedName&, const char*)`).
    pub fn with_postfix(base: &MappedName, postfix: &str) -> Self {
        let mut s = String::with_capacity(base.len() + postfix.len());
        s.push_str(base.as_str());
        s.push_str(postfix);
        MappedName { data: LazyString::from(s), postfix_start_idx: base.len() }
    }

    /// Zero-copy-in-spirit subrange view: the codec's "slicing without
    /// copying" primitive (§4.2). `len = None` means "to the end".
    pub fn from_range(other: &MappedName, start: usize, len: Option<usize>) -> Self {
        let mut out = MappedName::empty();
        out.append_range(other, start, len);
        out
    }

    fn substr(&self, start: usize, len: Option<usize>) -> &str {
        let s = self.as_str();
        let start = start.min(s.len());
        let end = match len {
            Some(l) => (start + l).min(s.len()),
            None => s.len(),
        };
        &s[start..end]
    }

    /// Append raw bytes (optionally truncated to `max_len`) to this name's
    /// postfix. If this instance was empty, the appended bytes become the
    /// new `data` (so the whole name still reports an empty postfix).
    pub fn append_bytes(&mut self, bytes: &str, max_len: Option<usize>) {
        let slice = match max_len {
            Some(l) => &bytes[..l.min(bytes.len())],
            None => bytes,
        };
        if self.data.is_empty() {
            self.postfix_start_idx = slice.len();
        }
        self.data.make_mut().push_str(slice);
    }

    pub fn append_str(&mut self, s: &str) {
        self.append_bytes(s, None);
    }

    /// Append a subrange `[start, start+len)` of `other` to this name.
    /// If this instance is empty and `other`'s split point falls within the
    /// copied range, the split point is preserved (so copying a whole
    /// `MappedName` via `append_range(other, 0, None)` reproduces its
    /// `name()`/`postfix()` split instead of collapsing it into `data`).
    pub fn append_range(&mut self, other: &MappedName, start: usize, len: Option<usize>) {
        let chunk = other.substr(start, len).to_owned();
        if self.data.is_empty() && other.postfix_start_idx >= start {
            self.postfix_start_idx = other.postfix_start_idx - start;
        }
        self.data.make_mut().push_str(&chunk);
    }

    pub fn append_name(&mut self, other: &MappedName) {
        self.append_range(other, 0, None);
    }

    pub fn as_str(&self) -> &str {
        self.data.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_str().as_bytes()
    }

    pub fn name(&self) -> &str {
        &self.as_str()[..self.postfix_start_idx]
    }

    pub fn postfix(&self) -> &str {
        &self.as_str()[self.postfix_start_idx..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data = LazyString::new();
        self.postfix_start_idx = 0;
    }

    /// Returns the `IndexedName` encoded by `data`, iff there is no postfix
    /// and `data` matches `[A-Za-z_]+[0-9]*`.
    pub fn to_indexed_name(&self) -> Option<IndexedName> {
        if self.postfix_start_idx != self.len() {
            return None;
        }
        IndexedName::parse(self.as_str())
    }

    pub fn compare(&self, other: &MappedName) -> Ordering {
        self.as_str().cmp(other.as_str())
    }

    /// Find `needle` anywhere in the concatenated buffer, starting the
    /// search at byte offset `from`. May straddle the data/postfix
    /// boundary: the two segments are one byte array for search purposes.
    pub fn find(&self, needle: &str, from: usize) -> Option<usize> {
        let s = self.as_str();
        if from > s.len() {
            return None;
        }
        s[from..].find(needle).map(|p| p + from)
    }

    /// Find the last occurrence of `needle` at or before byte offset
    /// `before` (exclusive upper bound on the match's end), searching the
    /// whole concatenated buffer.
    pub fn rfind(&self, needle: &str, before: usize) -> Option<usize> {
        let s = self.as_str();
        let limit = before.min(s.len());
        s[..limit].rfind(needle)
    }

    pub fn rfind_to_end(&self, needle: &str) -> Option<usize> {
        self.as_str().rfind(needle)
    }

    pub fn starts_with(&self, needle: &str, offset: usize) -> bool {
        let s = self.as_str();
        offset <= s.len() && s[offset..].starts_with(needle)
    }

    pub fn ends_with(&self, needle: &str) -> bool {
        self.as_str().ends_with(needle)
    }

    pub fn byte_at(&self, index: usize) -> u8 {
        self.as_bytes()[index]
    }
}

impl Default for MappedName {
    fn default() -> Self {
        MappedName::empty()
    }
}

impl From<&IndexedName> for MappedName {
    fn from(idx: &IndexedName) -> Self {
        MappedName::from_indexed_name(idx)
    }
}

impl From<&str> for MappedName {
    fn from(s: &str) -> Self {
        MappedName::new(s)
    }
}

impl PartialEq for MappedName {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}
impl Eq for MappedName {}

impl PartialOrd for MappedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MappedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl std::hash::Hash for MappedName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.data.hash(state);
    }
}

impl std::ops::AddAssign<&str> for MappedName {
    fn add_assign(&mut self, rhs: &str) {
        self.append_str(rhs);
    }
}

impl std::ops::AddAssign<&MappedName> for MappedName {
    fn add_assign(&mut self, rhs: &MappedName) {
        self.append_name(rhs);
    }
}

impl std::ops::Add<&str> for MappedName {
    type Output = MappedName;
    fn add(mut self, rhs: &str) -> MappedName {
        self += rhs;
        self
    }
}

impl std::ops::Add<&MappedName> for MappedName {
    type Output = MappedName;
    fn add(mut self, rhs: &MappedName) -> MappedName {
        self += rhs;
        self
    }
}

impl fmt::Display for MappedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod mapped_name_tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        let m = MappedName::empty();
        assert!(m.is_empty());
        assert_eq!(m.len(), 0);
        assert_eq!(m.name(), "");
        assert_eq!(m.postfix(), "");
    }

    #[test]
    fn prefix_is_stripped() {
        let m = MappedName::new(";gFoo");
        assert_eq!(m.name(), "Foo");
        assert_eq!(m.postfix(), "");
    }

    #[test]
    fn append_creates_postfix() {
        let mut m = MappedName::new("TEST");
        m.append_str("X");
        assert_eq!(m.name(), "TEST");
        assert_eq!(m.postfix(), "X");
        assert_eq!(m.len(), 5);
        assert!(m.ends_with("X"));
    }

    #[test]
    fn append_to_empty_becomes_data() {
        let mut m = MappedName::empty();
        m.append_str("TEST");
        assert_eq!(m.name(), "TEST");
        assert_eq!(m.postfix(), "");
    }

    #[test]
    fn with_postfix_and_copy_of_copy() {
        let base = MappedName::new("TEST");
        let mut m = MappedName::with_postfix(&base, "POSTFIXTEST");
        assert_eq!(m.len(), 15);
        assert_eq!(m.name(), "TEST");
        assert_eq!(m.postfix(), "POSTFIXTEST");

        m = MappedName::with_postfix(&m, "ANOTHERPOSTFIX");
        assert_eq!(m.len(), 29);
        assert_eq!(m.name(), "TESTPOSTFIXTEST");
        assert_eq!(m.postfix(), "ANOTHERPOSTFIX");
    }

    #[test]
    fn from_range_preserves_split_point() {
        let base = MappedName::with_postfix(&MappedName::new("TEST"), "POSTFIXTEST");
        let sub = MappedName::from_range(&base, 2, None);
        assert_eq!(sub.len(), 13);
        assert_eq!(sub.name(), "ST");
        assert_eq!(sub.postfix(), "POSTFIXTEST");

        let sub2 = MappedName::from_range(&base, 2, Some(6));
        assert_eq!(sub2.len(), 6);
        assert_eq!(sub2.name(), "ST");
        assert_eq!(sub2.postfix(), "POST");
    }

    #[test]
    fn equality_depends_only_on_concatenation() {
        let a = MappedName::with_postfix(&MappedName::new("TEST"), "POSTFIXTEST");
        let b = MappedName::with_postfix(&MappedName::new("TEST"), "POSTFIXTEST");
        let c = MappedName::with_postfix(&MappedName::new("TESTPOST"), "FIXTEST");
        let d = MappedName::with_postfix(&MappedName::new("THIS"), "ISDIFFERENT");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.compare(&c), Ordering::Equal);
        assert_eq!(a.compare(&d), Ordering::Less);
    }

    #[test]
    fn to_indexed_name_requires_no_postfix_and_ascii_shape() {
        let plain = MappedName::new("MAPPED_NAME");
        assert!(plain.to_indexed_name().is_some());

        let invalid = MappedName::new("MAPPED-NAME");
        assert!(invalid.to_indexed_name().is_none());

        let mut with_postfix = MappedName::new("MAPPED_NAME");
        with_postfix.append_str("X");
        assert!(with_postfix.to_indexed_name().is_none());
    }

    #[test]
    fn find_can_straddle_the_boundary() {
        let m = MappedName::with_postfix(&MappedName::new("TEST"), "POSTFIXTEST");
        assert_eq!(m.find("", 0), Some(0));
        assert_eq!(m.find("TEST", 0), Some(0));
        assert_eq!(m.find("STPO", 0), Some(2));
        assert_eq!(m.find("POST", 0), Some(4));
        assert_eq!(m.find("POST", 4), Some(4));
        assert_eq!(m.find("POST", 5), None);
    }

    #[test]
    fn starts_and_ends_with() {
        let mut m = MappedName::new("TEST");
        assert!(m.starts_with("TEST", 0));
        assert!(!m.starts_with("WASD", 0));
        assert!(m.ends_with("TEST"));
        m.append_str("POSTFIX");
        assert!(!m.ends_with("TEST"));
        assert!(m.ends_with("FIX"));
    }
}
