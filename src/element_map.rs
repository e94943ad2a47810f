//! The central bidirectional map (component C5): `MappedName` <-> `IndexedName`,
//! with hierarchical child-map composition so a derived shape's elements can
//! borrow names from the shapes that produced it instead of duplicating text.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use hashbrown::HashMap;
use log::{debug, warn};

use crate::codec::{self, ElementType};
use crate::consts::{CHILD_GROUP_EXPANSION_THRESHOLD, ELEMENT_MAP_PREFIX};
use crate::errors::ElementMapError;
use crate::indexed_name::IndexedName;
use crate::master::GeoData;
use crate::mapped_name::MappedName;
use crate::string_hasher::StringId;

/// One alternative mapped name for a given `IndexedName`, plus the sids
/// that relate it to the string-hasher service. `ElementMap` keeps these in
/// a plain `Vec` per index rather than a linked list of heap nodes — the
/// chains are short in practice and a `Vec` is simpler to reason about and
/// to serialize in order.
#[derive(Debug, Clone)]
pub struct MappedNameRef {
    pub name: MappedName,
    pub sids: Vec<StringId>,
}

/// Range of elements borrowed from another `ElementMap`, projected into this
/// map's index space.
#[derive(Debug, Clone)]
pub struct ChildElementGroup {
    pub element_map: Option<Rc<RefCell<ElementMap>>>,
    pub indexed_name: IndexedName,
    pub offset: i64,
    pub count: i64,
    pub tag: i64,
    pub postfix: String,
    pub sids: Vec<StringId>,
}

impl ChildElementGroup {
    pub fn new(indexed_name: IndexedName, count: i64) -> Self {
        ChildElementGroup {
            element_map: None,
            indexed_name,
            offset: 0,
            count,
            tag: 0,
            postfix: String::new(),
            sids: Vec::new(),
        }
    }
}

/// Reverse index from an encoded postfix back to the child group that
/// produced it, plus the disambiguation bookkeeping `addChildElements`
/// needs when the same tag+postfix shows up more than once.
#[derive(Debug, Clone, Default)]
struct ChildMapInfo {
    /// Type tag and upper-bound key of the owning `ChildElementGroup`, so we
    /// can look it up in `indexedNames[type].children` without holding a
    /// raw pointer into that map.
    group: Option<(String, i64)>,
    map_indices: HashMap<usize, i64>,
    index: i64,
}

#[derive(Debug, Default)]
struct TypeBucket {
    /// Dense chain-of-refs array, indexed by `IndexedName.index`.
    names: Vec<Vec<MappedNameRef>>,
    /// Keyed by exclusive upper bound in parent-index space.
    children: BTreeMap<i64, ChildElementGroup>,
}

impl TypeBucket {
    fn chain_mut(&mut self, index: usize) -> &mut Vec<MappedNameRef> {
        if self.names.len() <= index {
            self.names.resize_with(index + 1, Vec::new);
        }
        &mut self.names[index]
    }
}

fn element_map_ptr(map: &Option<Rc<RefCell<ElementMap>>>) -> usize {
    match map {
        Some(rc) => Rc::as_ptr(rc) as usize,
        None => 0,
    }
}

#[derive(Debug)]
pub struct ElementMap {
    mapped_names: BTreeMap<MappedName, IndexedName>,
    indexed_names: BTreeMap<String, TypeBucket>,
    child_elements: HashMap<String, ChildMapInfo>,
    child_element_size: i64,
    id: u64,
}

impl ElementMap {
    pub fn new() -> Self {
        ElementMap {
            mapped_names: BTreeMap::new(),
            indexed_names: BTreeMap::new(),
            child_elements: HashMap::new(),
            child_element_size: 0,
            id: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Assign a save-time identity the first time this map is saved.
    pub fn before_save(&mut self, next_id: impl FnOnce() -> u64) -> u64 {
        if self.id == 0 {
            self.id = next_id();
        }
        self.id
    }

    pub fn size(&self) -> u64 {
        self.mapped_names.len() as u64 + self.child_element_size as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mapped_names.is_empty() && self.child_element_size == 0
    }

    pub fn has_child_element_map(&self) -> bool {
        !self.child_elements.is_empty()
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Type tags in sorted order, for deterministic serialization (§5).
    pub fn type_tags(&self) -> Vec<String> {
        self.indexed_names.keys().cloned().collect()
    }

    /// Name chains for one type, indexed by `IndexedName.index`, in the
    /// dense order `names` is stored.
    pub fn name_chains(&self, type_tag: &str) -> Vec<Vec<MappedNameRef>> {
        match self.indexed_names.get(type_tag) {
            Some(bucket) => bucket.names.clone(),
            None => Vec::new(),
        }
    }

    /// Child groups for one type, in exclusive-upper-bound order.
    pub fn child_groups(&self, type_tag: &str) -> Vec<(i64, ChildElementGroup)> {
        match self.indexed_names.get(type_tag) {
            Some(bucket) => bucket.children.iter().map(|(k, v)| (*k, v.clone())).collect(),
            None => Vec::new(),
        }
    }

    pub fn mapped_name_count(&self) -> usize {
        self.mapped_names.len()
    }

    /// Rebuild the reverse indexes (`mapped_names`, `child_elements`) from a
    /// restored `IndexedName -> TypeBucket` table. Used only by the
    /// serializer's restore path, which reconstructs `indexed_names`
    /// directly from the file and then needs the derived indexes filled in.
    pub fn rebuild_from_restored(&mut self, bucket_by_type: BTreeMap<String, (Vec<Vec<MappedNameRef>>, Vec<(i64, ChildElementGroup)>)>) {
        for (type_tag, (chains, children)) in bucket_by_type {
            let bucket = self.indexed_names.entry(type_tag.clone()).or_default();
            for (index, chain) in chains.into_iter().enumerate() {
                for entry in &chain {
                    self.mapped_names.insert(entry.name.clone(), IndexedName::new(type_tag.clone(), index as i64));
                }
                bucket.names.push(chain);
            }
            for (upper, group) in children {
                self.child_element_size += group.count;
                let entry = self.child_elements.entry(group.postfix.clone()).or_default();
                entry.group = Some((type_tag.clone(), upper));
                bucket.children.insert(upper, group);
            }
        }
    }

    /// Insert a mapping for `idx`, returning the interned `MappedName`.
    /// See spec §4.4: no-op if already bound to `idx`; fails (reporting the
    /// existing binding via `existing`) unless `overwrite` is set.
    pub fn add_name(
        &mut self,
        mut name: MappedName,
        idx: IndexedName,
        sids: Vec<StringId>,
        overwrite: bool,
        mut existing: Option<&mut IndexedName>,
    ) -> Result<MappedName, ElementMapError> {
        if name.find("#", 0).is_some() && codec::find_tag_in_element_name(&name, false, true).is_none() {
            debug!("mapped name contains '#' with no discoverable tag postfix");
        }

        loop {
            if let Some(bound) = self.mapped_names.get(&name) {
                if *bound == idx {
                    return Ok(name);
                }
                if !overwrite {
                    if let Some(slot) = existing.as_deref_mut() {
                        *slot = bound.clone();
                    }
                    return Err(ElementMapError::NameConflict { name: name.as_str().to_owned() });
                }
                let stale_name = name.clone();
                self.erase_idx(&idx);
                self.erase_name(&stale_name);
                name = stale_name;
                continue;
            }

            self.mapped_names.insert(name.clone(), idx.clone());
            let bucket = self.indexed_names.entry(idx.kind().to_owned()).or_default();
            bucket
                .chain_mut(idx.index().max(0) as usize)
                .push(MappedNameRef { name: name.clone(), sids });
            return Ok(name);
        }
    }

    pub fn erase_name(&mut self, name: &MappedName) -> bool {
        match self.mapped_names.remove(name) {
            Some(idx) => {
                if let Some(bucket) = self.indexed_names.get_mut(idx.kind()) {
                    if let Some(chain) = bucket.names.get_mut(idx.index().max(0) as usize) {
                        chain.retain(|r| &r.name != name);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn erase_idx(&mut self, idx: &IndexedName) -> bool {
        let removed_names: Vec<MappedName> = match self.indexed_names.get_mut(idx.kind()) {
            Some(bucket) => match bucket.names.get_mut(idx.index().max(0) as usize) {
                Some(chain) => std::mem::take(chain).into_iter().map(|r| r.name).collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        let any = !removed_names.is_empty();
        for name in removed_names {
            self.mapped_names.remove(&name);
        }
        any
    }

    /// Forward lookup: `MappedName` -> `IndexedName`.
    pub fn find(&self, name: &MappedName, mut sids: Option<&mut Vec<StringId>>) -> Option<IndexedName> {
        if let Some(idx) = self.mapped_names.get(name) {
            if let Some(out) = sids.as_deref_mut() {
                if let Some(bucket) = self.indexed_names.get(idx.kind()) {
                    if let Some(chain) = bucket.names.get(idx.index().max(0) as usize) {
                        if let Some(r) = chain.iter().find(|r| &r.name == name) {
                            out.extend(r.sids.iter().cloned());
                        }
                    }
                }
            }
            return Some(idx.clone());
        }

        if self.child_elements.is_empty() {
            return None;
        }
        // Child groups are keyed by their own postfix text (the same bytes
        // `find_reverse` appends), so recovering one is a longest-suffix
        // match against the known keys rather than a codec tag lookup: a
        // child's own postfix never depends on whether the caller also
        // encoded a tag-history segment on top of it.
        let haystack = name.as_str();
        let (key_len, info) = self
            .child_elements
            .iter()
            .filter(|(key, _)| !key.is_empty() && haystack.ends_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, info)| (key.len(), info))?;
        let (type_tag, upper) = info.group.clone()?;
        let bucket = self.indexed_names.get(&type_tag)?;
        let group = bucket.children.get(&upper)?;

        let prefix = MappedName::new(&haystack[..haystack.len() - key_len]);
        let child_result = match &group.element_map {
            Some(child_map) => child_map.borrow().find(&prefix, sids)?,
            None => prefix.to_indexed_name()?,
        };
        if child_result.kind() != group.indexed_name.kind() {
            return None;
        }
        if child_result.index() < group.indexed_name.index()
            || child_result.index() >= group.indexed_name.index() + group.count
        {
            return None;
        }
        Some(child_result.shifted(group.offset))
    }

    /// Reverse lookup: `IndexedName` -> `MappedName`.
    pub fn find_reverse(&self, idx: &IndexedName, mut sids: Option<&mut Vec<StringId>>) -> Option<MappedName> {
        let bucket = self.indexed_names.get(idx.kind())?;
        let i = idx.index().max(0) as usize;
        if let Some(chain) = bucket.names.get(i) {
            if let Some(head) = chain.first() {
                if let Some(out) = sids.as_deref_mut() {
                    out.extend(head.sids.iter().cloned());
                }
                return Some(head.name.clone());
            }
        }

        let (_, group) = bucket.children.range(idx.index() + 1..).next()?;
        if group.indexed_name.index() + group.offset > idx.index() {
            return None;
        }
        let child_idx = IndexedName::new(idx.kind(), idx.index() - group.offset);
        let child_map = group.element_map.as_ref()?;
        let mut result = child_map.borrow().find_reverse(&child_idx, sids)?;
        result.append_str(&group.postfix);
        Some(result)
    }

    pub fn find_all(&self, idx: &IndexedName) -> Vec<MappedName> {
        if let Some(bucket) = self.indexed_names.get(idx.kind()) {
            if let Some(chain) = bucket.names.get(idx.index().max(0) as usize) {
                if !chain.is_empty() {
                    return chain.iter().map(|r| r.name.clone()).collect();
                }
            }
        }
        match self.find_reverse(idx, None) {
            Some(name) => vec![name],
            None => Vec::new(),
        }
    }

    /// Splits groups whose referenced child map itself has children so that
    /// runtime lookups never need to walk more than one level deep (spec
    /// §4.4, "grand-child flattening").
    fn flatten_grandchildren(children: Vec<ChildElementGroup>) -> Vec<ChildElementGroup> {
        let mut out: Vec<ChildElementGroup> = Vec::with_capacity(children.len());
        for child in children {
            let grandchild_bucket = child.element_map.as_ref().and_then(|m| {
                let borrowed = m.borrow();
                if borrowed.child_elements.is_empty() {
                    None
                } else {
                    borrowed
                        .indexed_names
                        .get(child.indexed_name.kind())
                        .filter(|b| !b.children.is_empty())
                        .map(|_| Rc::clone(m))
                }
            });

            let grandchild_map = match grandchild_bucket {
                Some(m) => m,
                None => {
                    out.push(child);
                    continue;
                }
            };

            let mut start = child.indexed_name.index();
            let end = start + child.count;
            let borrowed = grandchild_map.borrow();
            let bucket = borrowed.indexed_names.get(child.indexed_name.kind()).unwrap();

            for (_, grandchild) in bucket.children.range(start + 1..) {
                if end <= start {
                    break;
                }
                let istart = grandchild.indexed_name.index() + grandchild.offset;
                let iend = istart + grandchild.count;
                if end <= istart {
                    break;
                }
                if istart >= end {
                    break;
                }

                if istart > start {
                    let mut head = child.clone();
                    head.indexed_name.set_index(start);
                    head.count = istart - start;
                    out.push(head);
                }

                let piece_start = istart.max(start);
                let piece_end = iend.min(end);
                let mut piece = child.clone();
                piece.indexed_name.set_index(piece_start - grandchild.offset);
                piece.count = piece_end - piece_start;
                piece.offset += grandchild.offset;
                piece.element_map = grandchild.element_map.clone();
                piece.sids.extend(grandchild.sids.iter().cloned());
                if !grandchild.postfix.is_empty() {
                    if !piece.postfix.is_empty() && !piece.postfix.starts_with(ELEMENT_MAP_PREFIX) {
                        piece.postfix = format!("{}{}{}", grandchild.postfix, ELEMENT_MAP_PREFIX, piece.postfix);
                    } else {
                        piece.postfix = format!("{}{}", grandchild.postfix, piece.postfix);
                    }
                }
                out.push(piece);
                start = piece_end;
            }
            if start < end {
                let mut tail = child.clone();
                tail.indexed_name.set_index(start);
                tail.count = end - start;
                out.push(tail);
            }
        }
        out
    }

    /// Compose child-element groups produced by a derived shape into this
    /// map (spec §4.4, the largest single operation in the subsystem).
    pub fn add_child_elements(&mut self, master: &dyn GeoData, groups: Vec<ChildElementGroup>) {
        for child in Self::flatten_grandchildren(groups) {
            if child.indexed_name.is_null() || child.count <= 0 {
                warn!("invalid mapped child element");
                continue;
            }

            let use_child_map = child.count >= CHILD_GROUP_EXPANSION_THRESHOLD || child.element_map.is_none();
            let mut claimed: Option<(String, ChildElementGroup)> = None;

            if use_child_map {
                // Keyed by the group's own postfix text, not a master-encoded
                // tag string: `find` recovers a child group by matching this
                // same text as a trailing suffix of a candidate name, so the
                // key must be exactly what `find_reverse` appends.
                let key = child.postfix.clone();

                let ptr = element_map_ptr(&child.element_map);
                let entry = self.child_elements.entry(key.clone()).or_default();
                let map_index = *entry.map_indices.get(&ptr).unwrap_or(&0);
                entry.map_indices.insert(ptr, map_index + 1);
                entry.index += 1;

                if entry.index != 1 && child.element_map.is_some() && map_index == 0 {
                    // Same tag+postfix but a fresh child map: expand per-element instead.
                } else if entry.index != 1 {
                    let key2 = format!("{}{}:C{}", key, ELEMENT_MAP_PREFIX, entry.index - 1);
                    if self.child_elements.contains_key(&key2) {
                        warn!("duplicate mapped child element");
                        continue;
                    }
                    let mut disambiguated = child.clone();
                    disambiguated.postfix = key2.clone();
                    claimed = Some((key2, disambiguated));
                } else {
                    claimed = Some((key, child.clone()));
                }
            }

            let (key, group) = match claimed {
                Some(kg) => kg,
                None => {
                    self.expand_child_group_per_element(master, &child);
                    continue;
                }
            };

            let upper = group.indexed_name.index() + group.offset + group.count;
            let entry = self.child_elements.entry(key).or_default();
            entry.group = Some((group.indexed_name.kind().to_owned(), upper));

            let bucket = self.indexed_names.entry(group.indexed_name.kind().to_owned()).or_default();
            bucket.children.insert(upper, group);
            self.child_element_size += child.count;
        }
    }

    fn expand_child_group_per_element(&mut self, master: &dyn GeoData, child: &ChildElementGroup) {
        let child_map = match &child.element_map {
            Some(m) => m,
            None => {
                warn!("unmapped element with no child map to expand");
                return;
            }
        };
        for i in 0..child.count {
            let child_idx = child.indexed_name.shifted(i);
            let idx = IndexedName::new(child.indexed_name.kind(), child.indexed_name.index() + child.offset + i);
            let mut sids = Vec::new();
            let mut name = match child_map.borrow().find_reverse(&child_idx, Some(&mut sids)) {
                Some(n) => n,
                None => {
                    if child.tag == 0 || child.tag == master.tag() {
                        warn!("unmapped element");
                        continue;
                    }
                    MappedName::from(&child_idx)
                }
            };
            let element_type = ElementType::from_char(idx.kind().chars().next().unwrap_or('F')).unwrap_or(ElementType::Face);
            master.encode_element_name(idx.clone(), &mut name, "", Some(&mut sids), Some(&child.postfix), child.tag, element_type);
            master.set_element_name(idx, &name, &sids);
        }
    }

    /// Compaction pass: long child-group postfixes get re-hashed in place.
    pub fn hash_child_maps(&mut self, master: &dyn GeoData) {
        if self.child_elements.is_empty() || master.hasher().is_none() {
            return;
        }
        let mut rewrites: Vec<(String, String, String, i64)> = Vec::new();
        for (type_tag, bucket) in self.indexed_names.iter() {
            for (_, child) in bucket.children.iter() {
                let raw = MappedName::new(&child.postfix);
                if let Some(m) = codec::find_tag_in_element_name(&raw, false, false) {
                    if m.pos > 10 {
                        rewrites.push((type_tag.clone(), child.postfix.clone(), m.postfix.clone(), m.pos as i64));
                    }
                }
            }
        }
        for (type_tag, old_postfix, prefix_bytes, pos) in rewrites {
            let sids: Vec<StringId> = self
                .child_elements
                .get(&old_postfix)
                .map(|_| Vec::new())
                .unwrap_or_default();
            let hashed = master.hash_element_name(&MappedName::new(&prefix_bytes[..pos as usize]), &sids);
            let new_postfix = format!("{}{}", ELEMENT_MAP_PREFIX, hashed);

            if let Some(info) = self.child_elements.remove(&old_postfix) {
                if let Some((_, upper)) = &info.group {
                    if let Some(bucket) = self.indexed_names.get_mut(&type_tag) {
                        if let Some(group) = bucket.children.get_mut(upper) {
                            group.postfix = new_postfix.clone();
                        }
                    }
                }
                self.child_elements.insert(new_postfix, info);
            }
        }
    }
}

impl Default for ElementMap {
    fn default() -> Self {
        ElementMap::new()
    }
}

#[cfg(test)]
mod element_map_tests {
    use super::*;

    #[test]
    fn add_and_find_round_trips() {
        let mut map = ElementMap::new();
        let idx = IndexedName::new("Face", 1);
        let name = MappedName::from(&idx);
        let stored = map.add_name(name.clone(), idx.clone(), Vec::new(), false, None).unwrap();
        assert_eq!(map.find(&stored, None), Some(idx.clone()));
        assert!(map.find_all(&idx).contains(&stored));
    }

    #[test]
    fn add_name_no_op_when_already_bound() {
        let mut map = ElementMap::new();
        let idx = IndexedName::new("Face", 1);
        let name = MappedName::from(&idx);
        map.add_name(name.clone(), idx.clone(), Vec::new(), false, None).unwrap();
        let result = map.add_name(name, idx, Vec::new(), false, None);
        assert!(result.is_ok());
    }

    #[test]
    fn add_name_conflict_without_overwrite() {
        let mut map = ElementMap::new();
        let idx1 = IndexedName::new("Face", 1);
        let idx2 = IndexedName::new("Face", 2);
        let name = MappedName::new("SharedName");
        map.add_name(name.clone(), idx1.clone(), Vec::new(), false, None).unwrap();
        let mut existing = IndexedName::none();
        let result = map.add_name(name, idx2, Vec::new(), false, Some(&mut existing));
        assert!(result.is_err());
        assert_eq!(existing, idx1);
    }

    #[test]
    fn erase_removes_both_directions() {
        let mut map = ElementMap::new();
        let idx = IndexedName::new("Edge", 4);
        let name = MappedName::from(&idx);
        map.add_name(name.clone(), idx.clone(), Vec::new(), false, None).unwrap();
        assert!(map.erase_name(&name));
        assert_eq!(map.find(&name, None), None);
        assert!(map.find_all(&idx).is_empty());
    }

    #[test]
    fn find_reverse_uses_head_of_chain() {
        let mut map = ElementMap::new();
        let idx = IndexedName::new("Vertex", 0);
        let name = MappedName::new("V0");
        map.add_name(name.clone(), idx.clone(), Vec::new(), false, None).unwrap();
        assert_eq!(map.find_reverse(&idx, None), Some(name));
    }
}
