use structpatch_condition::{field, format_path_expr, parse_condition, parse_path_expr, Condition, ConditionError};
use structpatch_pointer::parse;

#[test]
fn precedence_and_grouping() {
    let c = parse_condition("a == 1 || b == 2 && c == 3").unwrap();
    let Condition::Or(items) = c else { panic!("expected or") };
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[1], Condition::And(inner) if inner.len() == 2));

    let c = parse_condition("(a == 1 || b == 2) && c == 3").unwrap();
    assert!(matches!(c, Condition::And(_)));
}

#[test]
fn parsed_and_built_conditions_agree() {
    assert_eq!(parse_condition("Items[0].Price > 10").unwrap(), field("Items[0].Price").gt(10i64));
    assert_eq!(parse_condition("10 < Items[0].Price").unwrap(), field("Items[0].Price").gt(10i64));
    assert_eq!(parse_condition("Name").unwrap(), field("Name").defined());
    assert_eq!(parse_condition("ends(Name, 'x')").unwrap(), field("Name").ends_with("x"));
}

#[test]
fn path_forms() {
    assert_eq!(parse_path_expr("A.B[2]['c.d']").unwrap(), parse("/A/B/2/c.d"));
    assert_eq!(parse_path_expr("$").unwrap(), parse(""));
    assert_eq!(parse_path_expr("/x~1y/0").unwrap(), parse("/x~1y/0"));
    assert_eq!(format_path_expr(&parse("/A/0/B")), "A[0].B");
}

#[test]
fn display_parses_back() {
    for src in ["a == 1 && !(b < 2)", "in(x, [1, 'two', null])", "type(a, 'number') || log('miss')"] {
        let c = parse_condition(src).unwrap();
        assert_eq!(parse_condition(&c.to_string()).unwrap(), c, "{src}");
    }
}

#[test]
fn errors_point_at_the_problem() {
    let err = parse_condition("a == ").unwrap_err();
    assert!(matches!(err, ConditionError::Parse { position: 5, .. }), "{err:?}");

    let err = parse_condition("a == 1 )").unwrap_err();
    let ConditionError::Parse { fragment, .. } = err else { panic!("parse error") };
    assert_eq!(fragment, ")");

    assert!(parse_condition("").is_err());
    assert!(parse_condition("1 == 2").is_err());
    assert!(parse_condition("frob(a)").is_err());
    assert!(parse_condition("type(a, 'shape')").is_err());
}
