//! Fixed byte sequences shared by `MappedName` and the name codec.
//!
//! These mirror `ComplexGeoData::elementMapPrefix()` / `tagPostfix()` in the
//! original: constants owned by the (external, out-of-scope) master-shape
//! collaborator, but needed unconditionally by `MappedName`'s own
//! constructor, so they live here as plain `&str` constants rather than
//! requiring a `GeoData` instance just to build a name.

/// Marks the start of an encoded mapped name; stripped by `MappedName::new`.
pub const ELEMENT_MAP_PREFIX: &str = ";g";

/// Hex-dialect tag-postfix prefix, e.g. `...;:H1b:10,F`.
pub const TAG_POSTFIX: &str = ";:H";

/// Decimal-dialect (older) tag-postfix prefix, e.g. `...;:12,F`.
pub const POSTFIX_DECIMAL_TAG: &str = ";:";

/// Threshold above which `addChildElements` tries to synthesize a single
/// parent-level postfix for a whole child group instead of expanding it
/// element by element.
pub const CHILD_GROUP_EXPANSION_THRESHOLD: i64 = 5;
