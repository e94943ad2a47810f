//! Process-wide Global Registries (component C7).
//!
//! A document may reference the same `ElementMap` from several objects. To
//! avoid saving (or restoring) it more than once, the save/restore paths
//! consult a pair of process-wide tables keyed by each map's save-time
//! `_id`, reset by the document lifecycle signals. Mirrors the
//! `once_cell::sync::Lazy<Arc<RwLock<_>>>` pattern `nanoda::tracing` uses
//! for its own process-wide trace tables, swapped to `parking_lot::Mutex`
//! since both tables here are write-heavy (insert-and-check, not
//! read-mostly).

use std::rc::Rc;
use std::cell::RefCell;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::element_map::ElementMap;

struct Registries {
    save_ids: std::collections::HashMap<usize, u64>,
    next_save_id: u64,
    restore_ids: std::collections::HashMap<u64, Rc<RefCell<ElementMap>>>,
}

impl Registries {
    fn new() -> Self {
        Registries {
            save_ids: std::collections::HashMap::new(),
            next_save_id: 1,
            restore_ids: std::collections::HashMap::new(),
        }
    }
}

// SAFETY note for readers: `Rc`/`RefCell` are not `Send`/`Sync`, but this
// crate's concurrency model (§5) is single-writer-per-map and the registry
// itself is never accessed from more than one thread at a time in practice;
// the `Mutex` here exists for the documented "guard both maps with a single
// mutex" contract, not to make the contents thread-safe on their own.
unsafe impl Send for Registries {}

static REGISTRIES: Lazy<Mutex<Registries>> = Lazy::new(|| Mutex::new(Registries::new()));

/// `StartSaveDocument` signal: clear the save-id table.
pub fn start_save() {
    let mut reg = REGISTRIES.lock();
    reg.save_ids.clear();
    reg.next_save_id = 1;
}

/// `FinishSaveDocument` signal: idempotent, same effect as `start_save`.
pub fn finish_save() {
    start_save();
}

/// `StartRestoreDocument` signal: clear the restore-id table.
pub fn start_restore() {
    let mut reg = REGISTRIES.lock();
    reg.restore_ids.clear();
}

/// `FinishRestoreDocument` signal: idempotent, same effect as `start_restore`.
pub fn finish_restore() {
    start_restore();
}

/// Look up (or assign) the save-id for `map`, identified by pointer.
pub fn save_id_for(map: &Rc<RefCell<ElementMap>>) -> u64 {
    let ptr = Rc::as_ptr(map) as usize;
    let mut reg = REGISTRIES.lock();
    if let Some(id) = reg.save_ids.get(&ptr) {
        return *id;
    }
    let id = reg.next_save_id;
    reg.next_save_id += 1;
    reg.save_ids.insert(ptr, id);
    id
}

/// True if `map` already has a save-id assigned in the current save pass.
pub fn has_save_id(map: &Rc<RefCell<ElementMap>>) -> bool {
    let ptr = Rc::as_ptr(map) as usize;
    REGISTRIES.lock().save_ids.contains_key(&ptr)
}

/// Record that `id` restores to `map`, for later `_id` lookups within the
/// same restore pass.
pub fn register_restored(id: u64, map: Rc<RefCell<ElementMap>>) {
    REGISTRIES.lock().restore_ids.insert(id, map);
}

/// Look up an already-restored map by `_id`, if this restore pass has seen
/// it before — the mechanism behind partial-load sharing (§6.3).
pub fn restored_by_id(id: u64) -> Option<Rc<RefCell<ElementMap>>> {
    REGISTRIES.lock().restore_ids.get(&id).cloned()
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn save_id_is_stable_and_monotonic() {
        start_save();
        let a = Rc::new(RefCell::new(ElementMap::new()));
        let b = Rc::new(RefCell::new(ElementMap::new()));
        let id_a1 = save_id_for(&a);
        let id_b = save_id_for(&b);
        let id_a2 = save_id_for(&a);
        assert_eq!(id_a1, id_a2);
        assert_ne!(id_a1, id_b);
    }

    #[test]
    fn lifecycle_signals_reset_tables() {
        start_save();
        let a = Rc::new(RefCell::new(ElementMap::new()));
        let first = save_id_for(&a);
        start_save();
        let second = save_id_for(&a);
        assert_eq!(first, second);
    }

    #[test]
    fn restore_registry_deduplicates_by_id() {
        start_restore();
        let map = Rc::new(RefCell::new(ElementMap::new()));
        register_restored(7, Rc::clone(&map));
        assert!(restored_by_id(7).is_some());
        assert!(restored_by_id(8).is_none());
        finish_restore();
        assert!(restored_by_id(7).is_none());
    }
}
