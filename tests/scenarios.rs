//! End-to-end scenarios spanning more than one module: child-map
//! projection (S5), save/restore identity sharing (S6), and
//! `addChildElements`'s two composition strategies.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use element_map::element_map::{ChildElementGroup, ElementMap};
use element_map::indexed_name::IndexedName;
use element_map::mapped_name::MappedName;
use element_map::master::{GeoData, SimpleGeoData};
use element_map::serializer;
use element_map::string_hasher::TableHasher;

fn child_map_with(face_names: &[(i64, &str)]) -> Rc<RefCell<ElementMap>> {
    let map = Rc::new(RefCell::new(ElementMap::new()));
    {
        let mut m = map.borrow_mut();
        for (index, name) in face_names {
            let idx = IndexedName::new("Face", *index);
            m.add_name(MappedName::new(*name), idx, Vec::new(), false, None).unwrap();
        }
    }
    map
}

/// Wire a single `ChildElementGroup` directly into `parent`'s structure, the
/// way a document deserializer would, without invoking the
/// `addChildElements` synthesis pipeline — used for scenarios that describe
/// a parent's pre-existing shape rather than the act of composing it.
fn wire_child_group(parent: &Rc<RefCell<ElementMap>>, type_tag: &str, group: ChildElementGroup) {
    let upper = group.indexed_name.index() + group.offset + group.count;
    let mut buckets = BTreeMap::new();
    buckets.insert(type_tag.to_owned(), (Vec::new(), vec![(upper, group)]));
    parent.borrow_mut().rebuild_from_restored(buckets);
}

#[test]
fn s5_child_map_projection() {
    let child = child_map_with(&[(3, "f3"), (4, "f4")]);
    let parent = Rc::new(RefCell::new(ElementMap::new()));

    let mut group = ChildElementGroup::new(IndexedName::new("Face", 3), 2);
    group.offset = 10;
    group.postfix = ":CH".to_owned();
    group.element_map = Some(Rc::clone(&child));
    wire_child_group(&parent, "Face", group);

    let p = parent.borrow();
    assert_eq!(p.find(&MappedName::new("f3:CH"), None), Some(IndexedName::new("Face", 13)));
    assert_eq!(p.find_reverse(&IndexedName::new("Face", 13), None), Some(MappedName::new("f3:CH")));
    assert_eq!(p.find_reverse(&IndexedName::new("Face", 14), None), Some(MappedName::new("f4:CH")));
    assert_eq!(p.find_reverse(&IndexedName::new("Face", 15), None), None);
}

#[test]
fn invariant_2_upper_bound_child_lookup() {
    let child = child_map_with(&[(0, "c0"), (1, "c1"), (2, "c2")]);
    let parent = Rc::new(RefCell::new(ElementMap::new()));

    let mut group = ChildElementGroup::new(IndexedName::new("Face", 0), 3);
    group.offset = 100;
    group.element_map = Some(Rc::clone(&child));
    wire_child_group(&parent, "Face", group);

    let p = parent.borrow();
    let groups = p.child_groups("Face");
    assert_eq!(groups.len(), 1);
    let (upper, g) = &groups[0];
    assert_eq!(*upper, g.indexed_name.index() + g.offset + g.count);
    assert_eq!(p.find_reverse(&IndexedName::new("Face", 100), None), Some(MappedName::new("c0")));
    assert_eq!(p.find_reverse(&IndexedName::new("Face", 102), None), Some(MappedName::new("c2")));
}

#[test]
fn s6_save_restore_identity_sharing() {
    let child = child_map_with(&[(0, "shared0"), (1, "shared1")]);

    let parent_a = Rc::new(RefCell::new(ElementMap::new()));
    let mut group_a = ChildElementGroup::new(IndexedName::new("Face", 0), 2);
    group_a.element_map = Some(Rc::clone(&child));
    wire_child_group(&parent_a, "Face", group_a);

    let parent_b = Rc::new(RefCell::new(ElementMap::new()));
    let mut group_b = ChildElementGroup::new(IndexedName::new("Face", 0), 2);
    group_b.element_map = Some(Rc::clone(&child));
    wire_child_group(&parent_b, "Face", group_b);

    // Wrap both parents under one root so a single `save` call covers the
    // whole shared graph, the way two document objects referencing a
    // common child shape would be saved together.
    let root = Rc::new(RefCell::new(ElementMap::new()));
    let mut wrap_a = ChildElementGroup::new(IndexedName::new("A", 0), 1);
    wrap_a.element_map = Some(Rc::clone(&parent_a));
    wire_child_group(&root, "A", wrap_a);
    let mut wrap_b = ChildElementGroup::new(IndexedName::new("B", 0), 1);
    wrap_b.element_map = Some(Rc::clone(&parent_b));
    wire_child_group(&root, "B", wrap_b);

    let mut buf = Vec::new();
    serializer::save(&root, &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    let restored = serializer::restore(&text).unwrap();
    let restored_groups_a = restored.borrow().child_groups("A");
    let restored_groups_b = restored.borrow().child_groups("B");
    let child_a = restored_groups_a[0].1.element_map.clone().unwrap();
    let child_b = restored_groups_b[0].1.element_map.clone().unwrap();

    let grandchild_a = child_a.borrow().child_groups("Face")[0].1.element_map.clone().unwrap();
    let grandchild_b = child_b.borrow().child_groups("Face")[0].1.element_map.clone().unwrap();

    assert!(Rc::ptr_eq(&grandchild_a, &grandchild_b));
}

#[test]
fn add_child_elements_expands_small_groups_per_element() {
    let child = child_map_with(&[(0, "c0"), (1, "c1")]);
    let parent = Rc::new(RefCell::new(ElementMap::new()));
    let geo = SimpleGeoData::new(0, Option::<TableHasher>::None, Rc::clone(&parent));

    let mut group = ChildElementGroup::new(IndexedName::new("Face", 0), 2);
    group.element_map = Some(Rc::clone(&child));
    parent.borrow_mut().add_child_elements(&geo, vec![group]);

    assert!(!parent.borrow().has_child_element_map());
    assert_eq!(parent.borrow().mapped_name_count(), 2);
}

#[test]
fn add_child_elements_synthesizes_group_above_threshold() {
    let names: Vec<(i64, String)> = (0..6).map(|i| (i, format!("c{}", i))).collect();
    let name_refs: Vec<(i64, &str)> = names.iter().map(|(i, s)| (*i, s.as_str())).collect();
    let child = child_map_with(&name_refs);
    let parent = Rc::new(RefCell::new(ElementMap::new()));
    let geo = SimpleGeoData::new(0, Option::<TableHasher>::None, Rc::clone(&parent));

    let mut group = ChildElementGroup::new(IndexedName::new("Face", 0), 6);
    group.element_map = Some(Rc::clone(&child));
    parent.borrow_mut().add_child_elements(&geo, vec![group]);

    assert!(parent.borrow().has_child_element_map());
    assert_eq!(parent.borrow().child_groups("Face").len(), 1);
}
