//! structpatch-value - the dynamic value model shared by the structpatch crates.
//!
//! Provides [`Value`] and its declared type metadata, plus the deep-equal and
//! deep-copy collaborators used by the differencer and the applier.

pub mod copy;
pub mod equal;
pub mod error;
pub mod json;
pub mod reflect;
pub mod value;

pub use copy::{deep_copy, try_deep_copy, CopyOptions};
pub use equal::deep_equal;
pub use error::ValueError;
pub use json::{conform, from_json, to_json};
pub use reflect::{Reflect, ReflectKey};
pub use value::{
    CellId, FieldDef, FieldPolicy, Key, KeyKind, Map, Poly, PolyValue, Record, RecordType, Ref,
    Value,
};
