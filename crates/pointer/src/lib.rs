//! Locations inside structpatch values.
//!
//! A location is written like a JSON Pointer (`/A/B/0`): parts are separated
//! by `/`, and `~` and `/` inside a part are escaped as `~0` and `~1`.
//!
//! # Example
//!
//! ```
//! use structpatch_pointer::{format, get, parse, set, PathPart};
//! use structpatch_value::Value;
//!
//! let path = parse("/items/1");
//! assert_eq!(path.parts(), &[PathPart::Key("items".into()), PathPart::Index(1)]);
//! assert_eq!(format(&path), "/items/1");
//!
//! let mut doc = Value::Map(
//!     structpatch_value::Map::new(structpatch_value::KeyKind::Str)
//!         .with("items", Value::list(["a", "b"])),
//! );
//! assert_eq!(get(&doc, &path), Some(Value::from("b")));
//! set(&mut doc, &path, Value::from("c")).unwrap();
//! assert_eq!(get(&doc, &path), Some(Value::from("c")));
//! ```

use thiserror::Error;

use structpatch_value::{Key, KeyKind, ValueError};

pub mod get;
pub mod set;
pub mod types;
pub mod validate;

pub use get::{contains, get, read, resolve};
pub use set::{delete, set, with_mut, with_mut_at, Follow};
pub use types::{Path, PathPart};
pub use validate::{parse_strict, validate_pointer};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PointerError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),
    #[error("INDEX_OUT_OF_RANGE: {index} >= {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("NOT_CONTAINER: {0}")]
    NotContainer(&'static str),
    #[error("FIXED_SIZE")]
    FixedSize,
    #[error("NO_PARENT")]
    NoParent,
    #[error("POINTER_INVALID")]
    PointerInvalid,
    #[error("POINTER_TOO_LONG")]
    PointerTooLong,
    #[error("PATH_TOO_LONG")]
    PathTooLong,
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Unescapes a location part: `~1` becomes `/` and `~0` becomes `~`.
///
/// ```
/// use structpatch_pointer::unescape_component;
///
/// assert_eq!(unescape_component("a~0b"), "a~b");
/// assert_eq!(unescape_component("c~1d"), "c/d");
/// ```
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    // ~1 first, so "~01" stays "~1"
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes a location part: `~` becomes `~0` and `/` becomes `~1`.
///
/// ```
/// use structpatch_pointer::escape_component;
///
/// assert_eq!(escape_component("a~b"), "a~0b");
/// assert_eq!(escape_component("c/d"), "c~1d");
/// ```
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Parses a location string.
///
/// - The empty string is the root.
/// - A leading `/` is optional.
/// - Parts that are valid indices become [`PathPart::Index`].
///
/// ```
/// use structpatch_pointer::{parse, PathPart};
///
/// assert!(parse("").is_root());
/// assert_eq!(parse("/a~1b/0").parts(), &[PathPart::Key("a/b".into()), PathPart::Index(0)]);
/// assert_eq!(parse("a/b"), parse("/a/b"));
/// ```
pub fn parse(text: &str) -> Path {
    if text.is_empty() {
        return Path::root();
    }
    let body = text.strip_prefix('/').unwrap_or(text);
    Path::from_parts(
        body.split('/')
            .map(|part| PathPart::canonical(&unescape_component(part)))
            .collect(),
    )
}

/// Formats a path as a location string. The root formats as `""`.
pub fn format(path: &Path) -> String {
    let mut out = String::new();
    for part in path {
        out.push('/');
        match part {
            PathPart::Key(k) => out.push_str(&escape_component(k)),
            PathPart::Index(i) => out.push_str(&i.to_string()),
        }
    }
    out
}

/// Check if a string is a valid non-negative index without leading zeros.
///
/// ```
/// use structpatch_pointer::is_valid_index;
///
/// assert!(is_valid_index("0"));
/// assert!(is_valid_index("123"));
/// assert!(!is_valid_index("01"));
/// assert!(!is_valid_index("-1"));
/// ```
pub fn is_valid_index(index: &str) -> bool {
    if index.is_empty() {
        return false;
    }
    let bytes = index.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_digit())
}

/// Check if `parent` is a strict prefix of `child`.
pub fn is_child(parent: &Path, child: &Path) -> bool {
    parent.len() < child.len() && child.starts_with(parent)
}

pub fn parent(path: &Path) -> Result<Path, PointerError> {
    match path.parts().split_last() {
        Some((_, init)) => Ok(Path::from_parts(init.to_vec())),
        None => Err(PointerError::NoParent),
    }
}

/// Removes `prefix` from the front of `path`.
pub fn strip_prefix(path: &Path, prefix: &Path) -> Option<Path> {
    path.parts()
        .strip_prefix(prefix.parts())
        .map(|rest| Path::from_parts(rest.to_vec()))
}

/// Longest common prefix of a set of paths, part by part. An empty set
/// yields the root.
///
/// ```
/// use structpatch_pointer::{common_prefix, parse};
///
/// let paths = [parse("/a/b/c"), parse("/a/b/d"), parse("/a/bc")];
/// assert_eq!(common_prefix(&paths), parse("/a"));
/// ```
pub fn common_prefix<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Path {
    let mut iter = paths.into_iter();
    let Some(first) = iter.next() else {
        return Path::root();
    };
    let mut len = first.len();
    for p in iter {
        len = first
            .parts()
            .iter()
            .zip(p.parts())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    Path::from_parts(first.parts()[..len].to_vec())
}

/// Converts a part to a map key of the given kind.
pub fn key_for(part: &PathPart, kind: KeyKind) -> Result<Key, PointerError> {
    Key::parse(&part.as_text(), kind).map_err(|_| PointerError::InvalidKey(part.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format_roundtrip() {
        for pointer in ["", "/", "/foo", "/foo/bar", "/a~0b/c~1d", "/arr/0", "/~0/~1"] {
            assert_eq!(format(&parse(pointer)), pointer);
        }
    }

    #[test]
    fn leading_zero_stays_a_key() {
        assert_eq!(parse("/007").parts(), &[PathPart::Key("007".into())]);
    }

    #[test]
    fn prefixes() {
        let a = parse("/a/b");
        let b = parse("/a/b/c");
        assert!(is_child(&a, &b));
        assert!(!is_child(&b, &a));
        assert!(!is_child(&a, &a));
        assert_eq!(strip_prefix(&b, &a), Some(parse("/c")));
        assert_eq!(strip_prefix(&a, &b), None);
        assert_eq!(common_prefix(std::iter::empty()), Path::root());
    }

    #[test]
    fn key_coercion() {
        assert_eq!(key_for(&PathPart::Index(4), KeyKind::Int).unwrap(), Key::Int(4));
        assert_eq!(key_for(&PathPart::Index(4), KeyKind::Str).unwrap(), Key::Str("4".into()));
        assert!(matches!(
            key_for(&PathPart::Key("x".into()), KeyKind::Uint),
            Err(PointerError::InvalidKey(_))
        ));
    }
}
