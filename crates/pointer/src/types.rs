//! Type definitions for locations.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use structpatch_value::Key;

/// One step of a [`Path`]: a field or map key name, or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathPart {
    Key(String),
    Index(usize),
}

impl PathPart {
    /// Builds a part from unescaped text, turning valid indices into
    /// [`PathPart::Index`].
    pub fn canonical(text: &str) -> PathPart {
        if crate::is_valid_index(text) {
            if let Ok(i) = text.parse() {
                return PathPart::Index(i);
            }
        }
        PathPart::Key(text.to_string())
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            PathPart::Key(k) => Cow::Borrowed(k),
            PathPart::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            PathPart::Index(i) => Some(*i),
            PathPart::Key(_) => None,
        }
    }
}

impl fmt::Display for PathPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPart::Key(k) => f.write_str(k),
            PathPart::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathPart {
    fn from(s: &str) -> Self {
        PathPart::canonical(s)
    }
}

impl From<String> for PathPart {
    fn from(s: String) -> Self {
        PathPart::canonical(&s)
    }
}

impl From<usize> for PathPart {
    fn from(i: usize) -> Self {
        PathPart::Index(i)
    }
}

impl From<&Key> for PathPart {
    fn from(k: &Key) -> Self {
        PathPart::canonical(&k.to_string())
    }
}

/// A parsed location: an ordered sequence of parts. The empty path is the
/// root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<PathPart>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn from_parts(parts: Vec<PathPart>) -> Self {
        Path(parts)
    }

    pub fn parts(&self) -> &[PathPart] {
        &self.0
    }

    pub fn into_parts(self) -> Vec<PathPart> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathPart> {
        self.0.last()
    }

    pub fn push(&mut self, part: impl Into<PathPart>) {
        self.0.push(part.into());
    }

    pub fn pop(&mut self) -> Option<PathPart> {
        self.0.pop()
    }

    /// A new path one step below this one.
    pub fn child(&self, part: impl Into<PathPart>) -> Path {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Path(parts)
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut parts = self.0.clone();
        parts.extend(other.0.iter().cloned());
        Path(parts)
    }

    pub fn parent(&self) -> Option<Path> {
        crate::parent(self).ok()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        crate::strip_prefix(self, prefix)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::format(self))
    }
}

impl FromStr for Path {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(crate::parse(s))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        crate::parse(s)
    }
}

impl From<Vec<PathPart>> for Path {
    fn from(parts: Vec<PathPart>) -> Self {
        Path(parts)
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a PathPart;
    type IntoIter = std::slice::Iter<'a, PathPart>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
