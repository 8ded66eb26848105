use std::sync::Arc;

use proptest::prelude::*;
use structpatch::codec::{from_json_patch, to_json_patch, Registry};
use structpatch::{diff, EditKind, OpKind, Patch};
use structpatch_value::{deep_copy, FieldPolicy, Key, KeyKind, Map, Poly, Record, RecordType, Ref, Value};

fn item_type() -> Arc<RecordType> {
    RecordType::new("Item")
        .field("name")
        .field("count")
        .field("tags")
        .field("attrs")
        .field("members")
        .field("current")
        .field("shape")
        .shared()
}

fn member_type() -> Arc<RecordType> {
    RecordType::new("Member").field_with("id", FieldPolicy::key()).field("role").shared()
}

fn member(id: i64, role: &str) -> Value {
    Value::Record(Record::new(&member_type()).with("id", id).with("role", role))
}

fn registry() -> Registry {
    let mut registry = Registry::with_defaults();
    registry.register_record(item_type()).register_record(member_type());
    registry
}

/// Entities with unique keys in any order, possibly none.
fn arb_members() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_map(0i64..6, "[a-b]", 0..5)
        .prop_map(|m| m.into_iter().map(|(id, role)| member(id, &role)).collect::<Vec<_>>())
        .prop_shuffle()
}

fn arb_current() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(()).prop_map(|()| Value::Ref(Ref::empty())),
        (0i64..3, "[a-b]").prop_map(|(id, role)| Value::Ref(Ref::new(member(id, &role)))),
    ]
}

fn arb_shape() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(()).prop_map(|()| Value::Poly(Poly::empty())),
        (prop::sample::select(vec!["Circle", "Square"]), 0i64..3)
            .prop_map(|(name, size)| Value::Poly(Poly::new(name, size))),
    ]
}

fn arb_item() -> impl Strategy<Value = Value> {
    (
        "[a-c]{0,3}",
        0i64..4,
        prop::collection::vec("[a-d]", 0..6),
        prop::collection::btree_map("[a-c]", 0i64..3, 0..3),
        arb_members(),
        arb_current(),
        arb_shape(),
    )
        .prop_map(|(name, count, tags, attrs, members, current, shape)| {
            let mut map = Map::new(KeyKind::Str);
            for (k, v) in attrs {
                map.insert(Key::Str(k), Value::Int(v)).unwrap();
            }
            Value::Record(
                Record::new(&item_type())
                    .with("name", name)
                    .with("count", count)
                    .with("tags", Value::list(tags))
                    .with("attrs", map)
                    .with("members", Value::list(members))
                    .with("current", current)
                    .with("shape", shape),
            )
        })
}

proptest! {
    #[test]
    fn diff_of_a_value_with_itself_is_empty(a in arb_item()) {
        prop_assert!(diff(&a, &a).unwrap().is_none());
        prop_assert!(Patch::diff(&a, &deep_copy(&a)).unwrap().is_empty());
    }

    #[test]
    fn applying_a_diff_reaches_the_target(a in arb_item(), b in arb_item()) {
        let patch = Patch::diff(&a, &b).unwrap();
        let mut value = deep_copy(&a);
        patch.apply(&mut value).unwrap();
        prop_assert_eq!(value, b);
    }

    #[test]
    fn reversed_diff_restores_the_source(a in arb_item(), b in arb_item()) {
        let patch = Patch::diff(&a, &b).unwrap();
        let mut value = deep_copy(&b);
        patch.reverse().unwrap().apply(&mut value).unwrap();
        prop_assert_eq!(value, a);
    }

    #[test]
    fn strict_checked_application_is_not_repeatable(a in arb_item(), b in arb_item()) {
        let patch = Patch::diff(&a, &b).unwrap().strict(true);
        prop_assume!(!patch.is_empty());
        let mut value = deep_copy(&a);
        if patch.apply_checked(&mut value).is_ok() {
            prop_assert!(patch.apply_checked(&mut value).is_err());
            prop_assert_eq!(value, b);
        } else {
            // Rejected inserts leave the target untouched.
            prop_assert_eq!(value, a);
        }
    }

    #[test]
    fn strict_appends_apply_once(
        items in prop::collection::vec("[a-c]", 0..5),
        extra in prop::collection::vec("[a-c]", 1..4),
    ) {
        let a = Value::list(items.clone());
        let b = Value::list(items.into_iter().chain(extra));
        let patch = Patch::diff(&a, &b).unwrap().strict(true);
        let mut value = deep_copy(&a);
        patch.apply_checked(&mut value).unwrap();
        prop_assert!(patch.apply_checked(&mut value).is_err());
        prop_assert_eq!(value, b);
    }

    #[test]
    fn checked_reorders_are_not_repeatable(
        (a, b) in arb_members().prop_flat_map(|m| (Just(m.clone()), Just(m).prop_shuffle())),
    ) {
        let (a, b) = (Value::list(a), Value::list(b));
        let patch = Patch::diff(&a, &b).unwrap();
        prop_assume!(!patch.is_empty());
        let mut value = deep_copy(&a);
        patch.apply_checked(&mut value).unwrap();
        prop_assert_eq!(&value, &b);
        prop_assert!(patch.apply_checked(&mut value).is_err());
        prop_assert_eq!(value, b);
    }

    #[test]
    fn json_wire_round_trip_applies_like_the_patch(a in arb_item(), b in arb_item()) {
        let patch = Patch::diff(&a, &b).unwrap();
        let wire = to_json_patch(&patch).unwrap();
        let decoded = from_json_patch(&wire, &a, &registry()).unwrap();
        let mut value = deep_copy(&a);
        decoded.apply_checked(&mut value).unwrap();
        prop_assert_eq!(value, b);
    }

    #[test]
    fn single_insertion_is_a_single_add(
        items in prop::collection::vec("[a-z]{2}", 2..8),
        at in 1usize..7,
    ) {
        let at = at.min(items.len() - 1);
        let mut longer = items.clone();
        longer.insert(at, "new".to_string());

        let op = diff(&Value::list(items), &Value::list(longer)).unwrap();
        let Some(OpKind::List(edits)) = op.map(|o| o.kind) else {
            return Err(TestCaseError::fail("expected a list edit script"));
        };
        prop_assert_eq!(edits.len(), 1);
        prop_assert_eq!(edits[0].kind, EditKind::Add);
        prop_assert_eq!(edits[0].value.clone(), Some(Value::from("new")));
    }
}

fn entity(id: i64, name: &str) -> Value {
    let ty = RecordType::new("Entity")
        .field_with("id", FieldPolicy::key())
        .field("name")
        .shared();
    Value::Record(Record::new(&ty).with("id", id).with("name", name))
}

#[test]
fn swapped_entities_are_moved_untouched() {
    let a = Value::list([entity(1, "one"), entity(2, "two")]);
    let b = Value::list([entity(2, "two"), entity(1, "one")]);
    let patch = Patch::diff(&a, &b).unwrap();

    let mut touched = Vec::new();
    patch
        .walk(|c| {
            touched.push((c.kind, c.path.len()));
            Ok::<_, ()>(())
        })
        .unwrap();
    // Only list-level moves; no change reaches into an entity's fields.
    assert!(!touched.is_empty());
    assert!(touched.iter().all(|(kind, depth)| *kind == structpatch::ChangeKind::Move && *depth == 1));

    let mut value = deep_copy(&a);
    patch.apply(&mut value).unwrap();
    assert_eq!(value, b);
}
