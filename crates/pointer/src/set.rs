//! Write access by location.
//!
//! Navigation holds at most one reference lock at a time: when a step
//! reaches an owned reference, the referent's handle is cloned, the lock on
//! the enclosing cell is released, and the walk continues inside the
//! referent under its own lock.

use std::collections::HashSet;

use structpatch_value::{CellId, Ref, Value};

use crate::{format, key_for, Path, PathPart, PointerError};

/// How many wrapper layers (owned references, polymorphic containers) to
/// strip from the target once all parts are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// The target is passed as stored.
    None,
    /// Exactly this many layers; fewer is an error.
    Layers(usize),
    /// Every layer.
    All,
}

struct Nav<'p> {
    parts: &'p [PathPart],
    pos: usize,
    follow: Follow,
    create: bool,
}

impl<'p> Nav<'p> {
    fn current(&self) -> Option<&'p PathPart> {
        self.parts.get(self.pos)
    }

    fn not_found(&self) -> PointerError {
        let end = (self.pos + 1).min(self.parts.len());
        PointerError::NotFound(format(&Path::from_parts(self.parts[..end].to_vec())))
    }

    fn wants_layer(&self, target: &Value) -> bool {
        match self.follow {
            Follow::None | Follow::Layers(0) => false,
            Follow::Layers(_) => true,
            Follow::All => matches!(target, Value::Ref(_) | Value::Poly(_)),
        }
    }

    fn take_layer(&mut self) {
        if let Follow::Layers(n) = &mut self.follow {
            *n -= 1;
        }
    }
}

enum Hop<R> {
    Done(R),
    Enter(Ref),
}

/// Runs `f` on the value stored at `path`.
pub fn with_mut<R>(
    root: &mut Value,
    path: &Path,
    f: impl FnOnce(&mut Value) -> Result<R, PointerError>,
) -> Result<R, PointerError> {
    with_mut_at(root, path, Follow::None, f)
}

/// Runs `f` on the value at `path`, after stripping `follow` wrapper layers
/// from it. Empty owned references on the way are allocated from their
/// declared shape.
pub fn with_mut_at<R>(
    root: &mut Value,
    path: &Path,
    follow: Follow,
    f: impl FnOnce(&mut Value) -> Result<R, PointerError>,
) -> Result<R, PointerError> {
    navigate(root, path.parts(), follow, true, f)
}

fn navigate<R, F>(
    root: &mut Value,
    parts: &[PathPart],
    follow: Follow,
    create: bool,
    f: F,
) -> Result<R, PointerError>
where
    F: FnOnce(&mut Value) -> Result<R, PointerError>,
{
    let mut nav = Nav { parts, pos: 0, follow, create };
    let mut f = Some(f);
    let mut seen: HashSet<CellId> = HashSet::new();
    let mut seen_at = 0;
    let mut hop = descend(root, &mut nav, &mut f)?;
    loop {
        hop = match hop {
            Hop::Done(out) => return Ok(out),
            Hop::Enter(cell) => {
                if seen_at != nav.pos {
                    seen.clear();
                    seen_at = nav.pos;
                }
                let id = cell.id().ok_or_else(|| nav.not_found())?;
                if !seen.insert(id) {
                    return Err(nav.not_found());
                }
                let mut guard = cell.write().ok_or_else(|| nav.not_found())?;
                let next = descend(&mut guard, &mut nav, &mut f)?;
                next
            }
        };
    }
}

fn descend<R, F>(
    root: &mut Value,
    nav: &mut Nav<'_>,
    f: &mut Option<F>,
) -> Result<Hop<R>, PointerError>
where
    F: FnOnce(&mut Value) -> Result<R, PointerError>,
{
    let mut current = root;
    loop {
        let Some(part) = nav.current() else {
            if !nav.wants_layer(current) {
                let f = f.take().ok_or_else(|| nav.not_found())?;
                return f(current).map(Hop::Done);
            }
            nav.take_layer();
            current = match current {
                Value::Ref(r) => return enter(r, nav),
                Value::Poly(p) => p.value_mut().ok_or_else(|| nav.not_found())?,
                other => return Err(PointerError::NotContainer(other.kind_name())),
            };
            continue;
        };
        current = match current {
            Value::Ref(r) => return enter(r, nav),
            Value::Poly(p) => p.value_mut().ok_or_else(|| nav.not_found())?,
            Value::Record(rec) => {
                let next = rec.get_mut(&part.as_text()).ok_or_else(|| nav.not_found())?;
                nav.pos += 1;
                next
            }
            Value::Array(items) | Value::List(items) => {
                let len = items.len();
                let index = part
                    .index()
                    .ok_or_else(|| PointerError::InvalidKey(part.to_string()))?;
                let next = items
                    .get_mut(index)
                    .ok_or(PointerError::IndexOutOfRange { index, len })?;
                nav.pos += 1;
                next
            }
            Value::Map(map) => {
                let key = key_for(part, map.key_kind())?;
                let next = map.get_mut(&key).ok_or_else(|| nav.not_found())?;
                nav.pos += 1;
                next
            }
            other => return Err(PointerError::NotContainer(other.kind_name())),
        };
    }
}

fn enter<R>(r: &mut Ref, nav: &Nav<'_>) -> Result<Hop<R>, PointerError> {
    if r.is_empty() && !(nav.create && r.allocate(None)) {
        return Err(nav.not_found());
    }
    Ok(Hop::Enter(r.clone()))
}

/// Stores `value` at `path`.
///
/// - Record fields must be declared.
/// - Map entries are inserted or replaced; the key is coerced to the map's
///   key kind.
/// - An index equal to a list's length (or `-`) appends.
pub fn set(root: &mut Value, path: &Path, value: Value) -> Result<(), PointerError> {
    let Some((last, init)) = path.parts().split_last() else {
        *root = value;
        return Ok(());
    };
    navigate(root, init, Follow::All, true, |parent| put(parent, last, value))
}

fn put(parent: &mut Value, part: &PathPart, value: Value) -> Result<(), PointerError> {
    match parent {
        Value::Record(rec) => {
            let name = part.as_text();
            rec.set(&name, value)
                .map(drop)
                .map_err(|_| PointerError::NotFound(name.into_owned()))
        }
        Value::Array(items) => {
            let len = items.len();
            let index = part
                .index()
                .ok_or_else(|| PointerError::InvalidKey(part.to_string()))?;
            let slot = items
                .get_mut(index)
                .ok_or(PointerError::IndexOutOfRange { index, len })?;
            *slot = value;
            Ok(())
        }
        Value::List(items) => {
            let len = items.len();
            let index = match part {
                PathPart::Index(i) => *i,
                PathPart::Key(k) if k == "-" => len,
                PathPart::Key(k) => return Err(PointerError::InvalidKey(k.clone())),
            };
            if index == len {
                items.push(value);
                return Ok(());
            }
            let slot = items
                .get_mut(index)
                .ok_or(PointerError::IndexOutOfRange { index, len })?;
            *slot = value;
            Ok(())
        }
        Value::Map(map) => {
            let key = key_for(part, map.key_kind())?;
            map.insert(key, value)?;
            Ok(())
        }
        other => Err(PointerError::NotContainer(other.kind_name())),
    }
}

/// Removes and returns the value at `path`.
///
/// List elements and map entries are removed; a record field is reset to
/// its zero value. Fixed arrays cannot shrink.
pub fn delete(root: &mut Value, path: &Path) -> Result<Value, PointerError> {
    let Some((last, init)) = path.parts().split_last() else {
        return Err(PointerError::NoParent);
    };
    let shown = format(path);
    navigate(root, init, Follow::All, false, |parent| match parent {
        Value::Record(rec) => {
            let slot = rec
                .get_mut(&last.as_text())
                .ok_or_else(|| PointerError::NotFound(shown.clone()))?;
            let zero = slot.zeroed();
            Ok(std::mem::replace(slot, zero))
        }
        Value::Array(_) => Err(PointerError::FixedSize),
        Value::List(items) => {
            let len = items.len();
            match last.index() {
                Some(index) if index < len => Ok(items.remove(index)),
                Some(index) => Err(PointerError::IndexOutOfRange { index, len }),
                None => Err(PointerError::InvalidKey(last.to_string())),
            }
        }
        Value::Map(map) => {
            let key = key_for(last, map.key_kind())?;
            map.remove(&key).ok_or_else(|| PointerError::NotFound(shown.clone()))
        }
        other => Err(PointerError::NotContainer(other.kind_name())),
    })
}
