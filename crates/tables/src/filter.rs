//! Row predicates.
//!
//! A missing column reads as `Null`. Range comparisons between values of
//! unrelated types never match; `!=` and `not in` do.

use std::cmp::Ordering;

use tabula_types::{FieldValue, Filter, FilterOp, Row, field};

fn equals(a: &FieldValue, b: &FieldValue) -> bool {
    a.compare(b) == Some(Ordering::Equal)
}

fn ordered(value: &FieldValue, operand: &FieldValue, accept: impl Fn(Ordering) -> bool) -> bool {
    value.compare(operand).is_some_and(accept)
}

/// Returns true if `row` satisfies `filter`.
pub fn matches(row: &Row, filter: &Filter) -> bool {
    let value = field(row, &filter.column);
    match &filter.op {
        FilterOp::Eq(operand) => equals(value, operand),
        FilterOp::NotEq(operand) => !equals(value, operand),
        FilterOp::Gt(operand) => ordered(value, operand, Ordering::is_gt),
        FilterOp::Gte(operand) => ordered(value, operand, Ordering::is_ge),
        FilterOp::Lt(operand) => ordered(value, operand, Ordering::is_lt),
        FilterOp::Lte(operand) => ordered(value, operand, Ordering::is_le),
        FilterOp::In(operands) => operands.iter().any(|operand| equals(value, operand)),
        FilterOp::NotIn(operands) => !operands.iter().any(|operand| equals(value, operand)),
    }
}

/// Returns true if `row` satisfies every filter. An empty list matches.
pub fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::from([
            ("status".to_string(), FieldValue::from("pending")),
            ("score".to_string(), FieldValue::Int(7)),
            ("ratio".to_string(), FieldValue::Float(0.5)),
        ])
    }

    #[test]
    fn test_comparisons() {
        let row = row();
        assert!(matches(&row, &Filter::eq("status", "pending")));
        assert!(matches(&row, &Filter::not_eq("status", "shipped")));
        assert!(matches(&row, &Filter::gt("score", 6i64)));
        assert!(matches(&row, &Filter::gte("score", 7i64)));
        assert!(!matches(&row, &Filter::lt("score", 7i64)));
        assert!(matches(&row, &Filter::lte("ratio", 0.5f64)));
    }

    #[test]
    fn test_numbers_compare_across_int_and_float() {
        let row = row();
        assert!(matches(&row, &Filter::eq("score", 7.0f64)));
        assert!(matches(&row, &Filter::lt("ratio", 1i64)));
    }

    #[test]
    fn test_membership() {
        let row = row();
        assert!(matches(&row, &Filter::is_in("status", ["pending", "shipped"])));
        assert!(!matches(&row, &Filter::not_in("status", ["pending"])));
        assert!(!matches(&row, &Filter::is_in("status", Vec::<FieldValue>::new())));
        assert!(matches(&row, &Filter::not_in("status", Vec::<FieldValue>::new())));
    }

    #[test]
    fn test_missing_column_reads_as_null() {
        let row = row();
        assert!(matches(&row, &Filter::eq("missing", FieldValue::Null)));
        assert!(!matches(&row, &Filter::gt("missing", 0i64)));
        assert!(matches(&row, &Filter::not_eq("missing", 0i64)));
    }

    #[test]
    fn test_mismatched_types_never_order() {
        let row = row();
        assert!(!matches(&row, &Filter::gt("status", 1i64)));
        assert!(!matches(&row, &Filter::lte("status", 1i64)));
        assert!(matches(&row, &Filter::not_eq("status", 1i64)));
    }

    #[test]
    fn test_conjunction() {
        let row = row();
        assert!(matches_all(&row, &[]));
        assert!(matches_all(&row, &[Filter::eq("status", "pending"), Filter::gt("score", 1i64)]));
        assert!(!matches_all(&row, &[Filter::eq("status", "pending"), Filter::gt("score", 9i64)]));
    }
}
