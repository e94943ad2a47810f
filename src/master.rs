//! The "master shape" collaborator (§6.1), the Rust analogue of
//! `ComplexGeoData`. Out of scope as a subsystem in its own right, but
//! `ElementMap::add_child_elements`/`hash_child_maps` call back into it, so
//! a concrete implementation is needed to exercise the rest of the crate.
//!
//! Modeled the way `nanoda::env::Env` stands in for "the document" with a
//! concrete type instead of an abstract one.

use std::cell::RefCell;
use std::rc::Rc;

use crate::codec;
use crate::consts::ELEMENT_MAP_PREFIX;
use crate::element_map::ElementMap;
use crate::indexed_name::IndexedName;
use crate::mapped_name::MappedName;
use crate::string_hasher::{StringHasher, StringId};

/// Operations `ElementMap` needs from the shape/document that owns it.
pub trait GeoData {
    /// Identifier of the operation that produced this shape; used as the
    /// default tag for freshly-composed names.
    fn tag(&self) -> i64;

    /// Fixed byte sequence marking the start of an encoded mapped name.
    fn element_map_prefix(&self) -> &str {
        ELEMENT_MAP_PREFIX
    }

    /// The string-hasher service backing this shape's sids, if any.
    fn hasher(&self) -> Option<&dyn StringHasher>;

    /// Build (or extend) `name` for `element`, appending `postfix` and a
    /// tag-postfix segment recording `tag` over the accumulated `op_codes`.
    /// If `name` is empty it is seeded from `element`'s encoding first.
    fn encode_element_name(
        &self,
        element: IndexedName,
        name: &mut MappedName,
        op_codes: &str,
        sids: Option<&mut Vec<StringId>>,
        postfix: Option<&str>,
        tag: i64,
        element_type: codec::ElementType,
    );

    /// Shorten a long postfix to a content hash, for `hash_child_maps`.
    fn hash_element_name(&self, postfix: &MappedName, sids: &[StringId]) -> MappedName;

    /// Record the final name for `idx` in whatever map owns this shape.
    fn set_element_name(&self, idx: IndexedName, name: &MappedName, sids: &[StringId]);
}

/// Reference `GeoData` implementation good enough to drive save/restore and
/// child-composition tests: owns the `ElementMap` it feeds back into and a
/// `TableHasher`-backed hasher.
pub struct SimpleGeoData<H: StringHasher> {
    tag: i64,
    hasher: Option<H>,
    map: Rc<RefCell<ElementMap>>,
}

impl<H: StringHasher> SimpleGeoData<H> {
    pub fn new(tag: i64, hasher: Option<H>, map: Rc<RefCell<ElementMap>>) -> Self {
        SimpleGeoData { tag, hasher, map }
    }

    pub fn map(&self) -> Rc<RefCell<ElementMap>> {
        Rc::clone(&self.map)
    }
}

impl<H: StringHasher> GeoData for SimpleGeoData<H> {
    fn tag(&self) -> i64 {
        self.tag
    }

    fn hasher(&self) -> Option<&dyn StringHasher> {
        self.hasher.as_ref().map(|h| h as &dyn StringHasher)
    }

    fn encode_element_name(
        &self,
        element: IndexedName,
        name: &mut MappedName,
        op_codes: &str,
        _sids: Option<&mut Vec<StringId>>,
        postfix: Option<&str>,
        tag: i64,
        element_type: codec::ElementType,
    ) {
        if name.is_empty() {
            *name = MappedName::from(&element);
        }
        if let Some(postfix) = postfix {
            name.append_str(postfix);
        }
        let effective_tag = if tag != 0 { tag } else { self.tag };
        *name = codec::encode_element_name(name, op_codes, effective_tag, element_type);
    }

    fn hash_element_name(&self, postfix: &MappedName, _sids: &[StringId]) -> MappedName {
        let digest = codec::hash_element_name(postfix);
        MappedName::new(format!("{:x}", digest))
    }

    fn set_element_name(&self, idx: IndexedName, name: &MappedName, sids: &[StringId]) {
        let _ = self.map.borrow_mut().add_name(name.clone(), idx, sids.to_vec(), true, None);
    }
}
