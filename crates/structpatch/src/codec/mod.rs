//! Wire formats for patches.
//!
//! - [`json`]: JSON-Patch style operation arrays, decoded through
//!   [`crate::PatchBuilder`] against a shape.
//! - [`structured`]: CBOR surrogates, decoded against an explicit
//!   [`structured::Registry`].

pub mod json;
pub mod structured;

pub use json::{from_json_patch, to_json_patch};
pub use structured::{decode, encode, CustomDecoder, Registry};
