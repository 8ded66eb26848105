use std::collections::BTreeMap;
use std::sync::Arc;

use structpatch::{
    merge, Clock, LastWriterWinsResolver, Operation, Outcome, Patch, Proposal, StateResolver,
};
use structpatch_pointer::{parse, Path};
use structpatch_value::{deep_copy, FieldPolicy, Record, RecordType, Value};

fn doc_type() -> Arc<RecordType> {
    RecordType::new("Doc").field("Name").field("Value").shared()
}

fn doc(name: &str, value: i64) -> Value {
    Value::Record(Record::new(&doc_type()).with("Name", name).with("Value", value))
}

fn stamped(a: &Value, b: &Value, clock: Clock) -> Patch {
    let mut patch = Patch::diff(a, b).unwrap();
    patch.stamp(clock);
    patch
}

fn applied(patch: &Patch, base: &Value) -> Value {
    let mut value = deep_copy(base);
    patch.apply(&mut value).unwrap();
    value
}

fn name_of(value: &Value) -> Option<&str> {
    value.as_record()?.get("Name")?.as_str()
}

#[test]
fn disjoint_changes_converge_in_either_order() {
    let base = doc("v1", 10);
    let ours = stamped(&base, &doc("v2", 10), Clock::new(1, 0, 1));
    let theirs = stamped(&base, &doc("v1", 20), Clock::new(1, 0, 2));

    let left = applied(&merge(&ours, &theirs, None), &base);
    let right = applied(&merge(&theirs, &ours, None), &base);
    assert_eq!(left, doc("v2", 20));
    assert_eq!(left, right);
}

#[test]
fn later_clock_wins_on_the_same_location() {
    let base = doc("v1", 10);
    let early = stamped(&base, &doc("early", 10), Clock::new(5, 0, 1));
    let late = stamped(&base, &doc("late", 10), Clock::new(5, 1, 2));

    for merged in [early.merge(&late, None), late.merge(&early, None)] {
        assert_eq!(name_of(&applied(&merged, &base)), Some("late"));
    }
}

#[test]
fn merge_resolver_overrides_clocks() {
    let base = doc("v1", 10);
    let early = stamped(&base, &doc("early", 10), Clock::new(1, 0, 1));
    let late = stamped(&base, &doc("late", 10), Clock::new(9, 0, 2));

    let keep_ours = |_: &Path, ours: &Operation, _: &Operation| ours.clone();
    let merged = early.merge(&late, Some(&keep_ours));
    assert_eq!(name_of(&applied(&merged, &base)), Some("early"));
}

#[test]
fn concurrent_entity_inserts_converge() {
    let ty = RecordType::new("Entity")
        .field_with("id", FieldPolicy::key())
        .field("name")
        .shared();
    let entity = |id: &str| Value::Record(Record::new(&ty).with("id", id).with("name", id));

    let base = Value::list([entity("a"), entity("d")]);
    let ours = stamped(&base, &Value::list([entity("a"), entity("c"), entity("d")]), Clock::new(1, 0, 1));
    let theirs = stamped(&base, &Value::list([entity("a"), entity("b"), entity("d")]), Clock::new(1, 0, 2));

    let left = applied(&merge(&ours, &theirs, None), &base);
    let right = applied(&merge(&theirs, &ours, None), &base);
    assert_eq!(left, right);

    let ids: Vec<&str> = left
        .as_slice()
        .unwrap()
        .iter()
        .filter_map(|e| e.as_record()?.get("id")?.as_str())
        .collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(ids.first(), Some(&"a"));
    assert!(ids.contains(&"b") && ids.contains(&"c"));
}

#[test]
fn last_writer_wins_drops_stale_writes() {
    let base = doc("v1", 10);
    let early = stamped(&base, &doc("early", 10), Clock::new(1, 0, 1));
    let late = stamped(&base, &doc("late", 10), Clock::new(2, 0, 2));

    let mut resolver = LastWriterWinsResolver::new();
    let mut value = deep_copy(&base);
    late.apply_resolved(&mut value, &mut resolver).unwrap();
    let report = early.apply_resolved(&mut value, &mut resolver).unwrap();

    assert_eq!(name_of(&value), Some("late"));
    assert!(matches!(report.outcome(&parse("/Name")), Some(Outcome::Skipped(_))));
    assert_eq!(resolver.clock_of(&parse("/Name")), Some(Clock::new(2, 0, 2)));
}

#[test]
fn state_resolver_compares_clock_maps() {
    let base = doc("v1", 10);
    let name = parse("/Name");
    let local = BTreeMap::from([(name.clone(), Clock::new(5, 0, 1))]);

    let stale = stamped(&base, &doc("stale", 10), Clock::new(3, 0, 2));
    let mut value = deep_copy(&base);
    stale.apply_resolved(&mut value, &mut StateResolver::new(local.clone(), BTreeMap::new())).unwrap();
    assert_eq!(name_of(&value), Some("v1"));

    let fresh = stamped(&base, &doc("fresh", 10), Clock::new(7, 0, 2));
    let mut resolver = StateResolver::new(local, BTreeMap::new());
    fresh.apply_resolved(&mut value, &mut resolver).unwrap();
    assert_eq!(name_of(&value), Some("fresh"));
    assert_eq!(resolver.local.get(&name), Some(&Clock::new(7, 0, 2)));
}

#[test]
fn closures_act_as_resolvers() {
    let base = doc("v1", 10);
    let patch = Patch::diff(&base, &doc("v2", 20)).unwrap();

    let mut seen = Vec::new();
    let mut only_name = |p: &Proposal<'_>| {
        seen.push(p.path.to_string());
        p.path.to_string() == "/Name"
    };
    let mut value = deep_copy(&base);
    patch.apply_resolved(&mut value, &mut only_name).unwrap();

    assert_eq!(value, doc("v2", 10));
    assert_eq!(seen, vec!["/Name".to_string(), "/Value".to_string()]);
}
