//! Deep copy with preserved sharing.

use std::collections::HashMap;

use crate::error::ValueError;
use crate::value::{CellId, Map, Poly, Record, Ref, Value};

/// Options for [`try_deep_copy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Replace `Unsupported` values with `Null` instead of failing.
    pub zero_unsupported: bool,
}

/// Produces an independent copy of `value`.
///
/// Reference cells shared within the input are shared identically in the
/// output, and cycles are reproduced. `Unsupported` markers are copied
/// through unchanged.
pub fn deep_copy(value: &Value) -> Value {
    let mut copier = Copier { memo: HashMap::new(), strict: None };
    // Infallible: without `strict` the copier never errors.
    copier.copy(value).unwrap_or_default()
}

/// Like [`deep_copy`] but rejects `Unsupported` values unless
/// `options.zero_unsupported` is set.
pub fn try_deep_copy(value: &Value, options: CopyOptions) -> Result<Value, ValueError> {
    let mut copier = Copier { memo: HashMap::new(), strict: Some(options) };
    copier.copy(value)
}

struct Copier {
    memo: HashMap<CellId, Ref>,
    strict: Option<CopyOptions>,
}

impl Copier {
    fn copy(&mut self, value: &Value) -> Result<Value, ValueError> {
        Ok(match value {
            Value::Record(rec) => {
                let mut out = Record::new(rec.ty());
                for (name, v) in rec.fields() {
                    if let Some(slot) = out.get_mut(name) {
                        *slot = self.copy(v)?;
                    }
                }
                Value::Record(out)
            }
            Value::Array(items) => Value::Array(self.copy_all(items)?),
            Value::List(items) => Value::List(self.copy_all(items)?),
            Value::Map(map) => {
                let mut out = Map::new(map.key_kind());
                for (k, v) in map.iter() {
                    out.insert(k.clone(), self.copy(v)?)?;
                }
                Value::Map(out)
            }
            Value::Ref(r) => Value::Ref(self.copy_ref(r)?),
            Value::Poly(p) => match (p.type_name(), p.value()) {
                (Some(name), Some(v)) => Value::Poly(Poly::new(name, self.copy(v)?)),
                _ => Value::Poly(Poly::empty()),
            },
            Value::Unsupported(kind) => match self.strict {
                None => Value::Unsupported(kind.clone()),
                Some(opts) if opts.zero_unsupported => Value::Null,
                Some(_) => return Err(ValueError::Unsupported(kind.clone())),
            },
            scalar => scalar.clone(),
        })
    }

    fn copy_all(&mut self, items: &[Value]) -> Result<Vec<Value>, ValueError> {
        items.iter().map(|v| self.copy(v)).collect()
    }

    fn copy_ref(&mut self, r: &Ref) -> Result<Ref, ValueError> {
        let Some(id) = r.id() else {
            return Ok(Ref::from_parts(None, r.shape_arc().cloned()));
        };
        if let Some(done) = self.memo.get(&id) {
            return Ok(done.clone());
        }
        let out = Ref::from_parts(Some(Default::default()), r.shape_arc().cloned());
        self.memo.insert(id, out.clone());
        let inner = match r.read() {
            Some(guard) => self.copy(&guard)?,
            None => Value::Null,
        };
        if let Some(mut slot) = out.write() {
            *slot = inner;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deep_equal;

    #[test]
    fn copy_is_independent() {
        let original = Value::Ref(Ref::new(Value::list([1i64, 2])));
        let copy = deep_copy(&original);
        assert!(deep_equal(&original, &copy));
        if let Value::Ref(r) = &copy {
            r.clone().store(Value::Null);
        }
        assert!(!deep_equal(&original, &copy));
    }

    #[test]
    fn shared_cells_stay_shared() {
        let shared = Ref::new(5i64);
        let v = Value::list([Value::Ref(shared.clone()), Value::Ref(shared)]);
        let copy = deep_copy(&v);
        let items = copy.as_slice().unwrap();
        match (&items[0], &items[1]) {
            (Value::Ref(a), Value::Ref(b)) => assert!(a.ptr_eq(b)),
            _ => panic!("expected refs"),
        }
    }

    #[test]
    fn cycles_are_reproduced() {
        let node = Ref::new(Value::Null);
        node.clone().store(Value::list([Value::Ref(node.clone())]));
        let copy = deep_copy(&Value::Ref(node.clone()));
        let Value::Ref(root) = &copy else { panic!("expected ref") };
        assert!(!root.ptr_eq(&node));
        let inner = root.load().unwrap();
        match &inner.as_slice().unwrap()[0] {
            Value::Ref(back) => assert!(back.ptr_eq(root)),
            _ => panic!("expected ref"),
        }
    }

    #[test]
    fn unsupported_values_need_opt_in() {
        let v = Value::list([Value::Unsupported("chan".into())]);
        assert_eq!(
            try_deep_copy(&v, CopyOptions::default()),
            Err(ValueError::Unsupported("chan".into()))
        );
        let zeroed = try_deep_copy(&v, CopyOptions { zero_unsupported: true }).unwrap();
        assert!(deep_equal(&zeroed, &Value::list([Value::Null])));
    }
}
