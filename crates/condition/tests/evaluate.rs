use structpatch_condition::{all, any, field, not, parse_condition, CmpOp, Condition, ConditionError, TypeKind};
use structpatch_value::{KeyKind, Map, Record, RecordType, Ref, Value};

fn order() -> Value {
    let item = RecordType::new("Item").field("Name").field("Price").shared();
    let order = RecordType::new("Order").field("Id").field("Items").field("Tags").field("Owner").shared();
    Value::Record(
        Record::new(&order)
            .with("Id", 42i64)
            .with(
                "Items",
                Value::list([
                    Value::Record(Record::new(&item).with("Name", "Widget").with("Price", 12.5)),
                    Value::Record(Record::new(&item).with("Name", "gadget").with("Price", 3i64)),
                ]),
            )
            .with("Tags", Map::new(KeyKind::Str).with("prio", "high"))
            .with("Owner", Ref::new("alice")),
    )
}

fn eval(src: &str) -> Result<bool, ConditionError> {
    parse_condition(src)?.evaluate(&order())
}

#[test]
fn comparisons_through_lists_maps_and_refs() {
    assert_eq!(eval("Id == 42"), Ok(true));
    assert_eq!(eval("Items[0].Price > 10"), Ok(true));
    assert_eq!(eval("Items[1].Price >= Items[0].Price"), Ok(false));
    assert_eq!(eval("Tags.prio == 'high'"), Ok(true));
    assert_eq!(eval("Owner == \"alice\""), Ok(true));
    assert_eq!(eval("/Items/1/Name != 'Widget'"), Ok(true));
}

#[test]
fn missing_locations() {
    assert_eq!(eval("Items[5].Name"), Ok(false));
    assert_eq!(eval("undefined(Items[5])"), Ok(true));
    assert_eq!(eval("Items[5].Name == 'x'"), Ok(false));
    assert_eq!(eval("Items[5].Name != 'x'"), Ok(true));
    assert!(matches!(eval("Items[5].Price < 3"), Err(ConditionError::Incomparable { op: CmpOp::Lt, .. })));
}

#[test]
fn string_predicates_and_membership() {
    assert_eq!(eval("contains(Items[0].Name, 'idg')"), Ok(true));
    assert_eq!(eval("starts(Items[1].Name, 'GAD')"), Ok(false));
    assert_eq!(eval("starts(Items[1].Name, 'GAD', true)"), Ok(true));
    assert_eq!(eval("matches(Items[0].Name, '^W[a-z]+$')"), Ok(true));
    assert_eq!(eval("Tags.prio in ['low', 'high']"), Ok(true));
    assert_eq!(eval("in(Tags.prio, ['HIGH'], true)"), Ok(true));
    assert!(matches!(eval("matches(Items[0].Name, '(')"), Err(ConditionError::InvalidRegex(_))));
}

#[test]
fn types_and_logic() {
    assert_eq!(eval("type(Items, 'array') && type(Tags, 'object')"), Ok(true));
    assert_eq!(eval("type(Owner, 'string')"), Ok(true));
    assert_eq!(eval("NOT (Id < 10 OR Id > 100)"), Ok(true));
    assert_eq!(eval("false || true && !false"), Ok(true));

    let root = order();
    assert!(Condition::always().evaluate(&root).unwrap());
    assert!(!Condition::never().evaluate(&root).unwrap());
    let built = all([field("Id").eq(42i64), not(field("Owner").undefined())])
        .and(any([field("Items[0].Name").is_type(TypeKind::String), Condition::never()]));
    assert!(built.evaluate(&root).unwrap());
}

#[test]
fn short_circuit_skips_errors() {
    // The right operand would fail to compare; `||` never reaches it.
    assert_eq!(eval("Id == 42 || Items[9].Price < 1"), Ok(true));
    assert_eq!(eval("Id == 0 && Items[9].Price < 1"), Ok(false));
}
