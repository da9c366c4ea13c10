//! Row filtering.
//!
//! Evaluates `where` predicate groups over rows: the terms of one
//! `where(...)` call AND together, separate calls OR together. The
//! executor resolves literals first (`last_insert_id`, link targets), so
//! this module only compares.

use crate::error::Error;
use crate::functions;
use crate::parser::{CmpOp, FieldExpr};
use crate::schema::{Row, TableDoc};
use crate::value::{coerce_scalar, Value};
use std::cmp::Ordering;

/// A `where` term whose value side is a concrete [`Value`].
#[derive(Debug, Clone)]
pub struct ResolvedCondition {
    pub field: FieldExpr,
    pub op: CmpOp,
    pub value: Value,
}

/// True when `row` satisfies the OR-of-AND groups. No groups means no
/// filter: every row matches.
pub fn row_matches(
    doc: &TableDoc,
    row: &Row,
    groups: &[Vec<ResolvedCondition>],
) -> Result<bool, Error> {
    if groups.is_empty() {
        return Ok(true);
    }
    for group in groups {
        let mut all = true;
        for cond in group {
            if !condition_matches(doc, row, cond)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluate a single term against a row.
///
/// Without a field function, the literal is coerced through the column's
/// type first, so `where(id='3')` and `where(id=3)` agree. With one, the
/// function output is compared to the literal as-is.
fn condition_matches(doc: &TableDoc, row: &Row, cond: &ResolvedCondition) -> Result<bool, Error> {
    let column = cond.field.column.as_str();
    let schema = doc
        .column(column)
        .ok_or_else(|| Error::UnknownField(column.to_string()))?;

    let row_value = row.get(column).cloned().unwrap_or(Value::Null);
    let (lhs, rhs) = match &cond.field.func {
        Some(func) => (functions::call(func, &[row_value])?, cond.value.clone()),
        None => {
            let literal = coerce_scalar(
                cond.value.clone(),
                column,
                &schema.column_type,
                schema.max_length,
            )?;
            (row_value, literal)
        }
    };

    Ok(match cond.op {
        CmpOp::Eq => lhs.eq_loose(&rhs),
        CmpOp::Ne => !lhs.eq_loose(&rhs),
        CmpOp::Lt => lhs.cmp_loose(&rhs) == Ordering::Less,
        CmpOp::Le => lhs.cmp_loose(&rhs) != Ordering::Greater,
        CmpOp::Gt => lhs.cmp_loose(&rhs) == Ordering::Greater,
        CmpOp::Ge => lhs.cmp_loose(&rhs) != Ordering::Less,
        CmpOp::DivisibleBy => divisible(&lhs, &rhs).unwrap_or(false),
        CmpOp::NotDivisibleBy => !divisible(&lhs, &rhs).unwrap_or(false),
    })
}

/// `None` when either side is non-numeric or the divisor is zero; the
/// callers above turn that into "not divisible".
fn divisible(value: &Value, by: &Value) -> Option<bool> {
    let value = value.as_number()? as i64;
    let by = by.as_number()? as i64;
    value.checked_rem(by).map(|rem| rem == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType, ROWID};
    use indexmap::indexmap;

    fn doc_and_row() -> (TableDoc, Row) {
        let doc = TableDoc::create(indexmap! {
            "id".to_string() => ColumnSchema::new(ColumnType::Int),
            "name".to_string() => ColumnSchema::new(ColumnType::String),
        })
        .unwrap();
        let mut row = Row::new();
        row.insert(ROWID.to_string(), Value::Int(1));
        row.insert("id".to_string(), Value::Int(6));
        row.insert("name".to_string(), Value::Str("na2axl".to_string()));
        (doc, row)
    }

    fn cond(column: &str, op: CmpOp, value: Value) -> ResolvedCondition {
        ResolvedCondition {
            field: FieldExpr {
                column: column.to_string(),
                func: None,
            },
            op,
            value,
        }
    }

    #[test]
    fn test_comparisons() {
        let (doc, row) = doc_and_row();
        let matches = |c: ResolvedCondition| row_matches(&doc, &row, &[vec![c]]).unwrap();

        assert!(matches(cond("id", CmpOp::Eq, Value::Int(6))));
        // Literal coerced through the column type.
        assert!(matches(cond("id", CmpOp::Eq, Value::Str("6".into()))));
        assert!(matches(cond("id", CmpOp::Ge, Value::Int(6))));
        assert!(matches(cond("id", CmpOp::Lt, Value::Int(7))));
        assert!(!matches(cond("id", CmpOp::Ne, Value::Int(6))));
        assert!(matches(cond("name", CmpOp::Gt, Value::Str("m".into()))));
    }

    #[test]
    fn test_divisibility() {
        let (doc, row) = doc_and_row();
        let matches = |c: ResolvedCondition| row_matches(&doc, &row, &[vec![c]]).unwrap();

        assert!(matches(cond("id", CmpOp::DivisibleBy, Value::Int(3))));
        assert!(!matches(cond("id", CmpOp::DivisibleBy, Value::Int(4))));
        assert!(matches(cond("id", CmpOp::NotDivisibleBy, Value::Int(4))));
        // x % 0 is never divisible.
        assert!(!matches(cond("id", CmpOp::DivisibleBy, Value::Int(0))));
        assert!(matches(cond("id", CmpOp::NotDivisibleBy, Value::Int(0))));
    }

    #[test]
    fn test_or_of_ands() {
        let (doc, row) = doc_and_row();
        // (id=5 AND name='na2axl') OR (id=6 AND name='na2axl') — second
        // group matches.
        let groups = vec![
            vec![
                cond("id", CmpOp::Eq, Value::Int(5)),
                cond("name", CmpOp::Eq, Value::Str("na2axl".into())),
            ],
            vec![
                cond("id", CmpOp::Eq, Value::Int(6)),
                cond("name", CmpOp::Eq, Value::Str("na2axl".into())),
            ],
        ];
        assert!(row_matches(&doc, &row, &groups).unwrap());

        // AND shortcut: one failing term sinks the group.
        let groups = vec![vec![
            cond("id", CmpOp::Eq, Value::Int(6)),
            cond("name", CmpOp::Eq, Value::Str("nope".into())),
        ]];
        assert!(!row_matches(&doc, &row, &groups).unwrap());
    }

    #[test]
    fn test_function_field() {
        let (doc, row) = doc_and_row();
        let c = ResolvedCondition {
            field: FieldExpr {
                column: "name".to_string(),
                func: Some("uppercase".to_string()),
            },
            op: CmpOp::Eq,
            value: Value::Str("NA2AXL".to_string()),
        };
        assert!(row_matches(&doc, &row, &[vec![c]]).unwrap());
    }

    #[test]
    fn test_unknown_field() {
        let (doc, row) = doc_and_row();
        let err = row_matches(&doc, &row, &[vec![cond("ghost", CmpOp::Eq, Value::Int(1))]])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField(_)));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let (doc, row) = doc_and_row();
        assert!(row_matches(&doc, &row, &[]).unwrap());
    }
}
