//! Rust port of FreeCAD's topological element-naming subsystem: a
//! `MappedName`/`IndexedName` codec plus the `ElementMap` bidirectional index
//! that lets derived shapes borrow element names from the shapes that
//! produced them, and the textual save/restore format that persists it.

pub mod codec;
pub mod consts;
pub mod element_map;
pub mod errors;
pub mod indexed_name;
pub mod lazy;
pub mod master;
pub mod mapped_name;
pub mod registry;
pub mod serializer;
pub mod string_hasher;

pub use element_map::ElementMap;
pub use errors::{ElementMapError, ElementMapResult};
pub use indexed_name::IndexedName;
pub use mapped_name::MappedName;
