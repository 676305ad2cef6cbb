//! Field-level validation engine.
//!
//! Rules are declared on `FieldInfo` and checked against an entity's current
//! row, after each value is checked against its declared column kind. The
//! engine never short-circuits: every violation on every field is collected
//! so a failed commit can report the full picture at once.

use crate::error::{ValidationError, ViolationKind};
use crate::field::FieldInfo;
use crate::value::Value;

/// Validate a row against its field metadata.
///
/// `key` is the entity's store key if it has one, used only for reporting.
#[must_use]
pub fn validate_row(
    table: &'static str,
    key: Option<i64>,
    fields: &[FieldInfo],
    row: &[(&'static str, Value)],
) -> ValidationError {
    let mut errors = ValidationError::new();

    for field in fields {
        if field.key {
            continue;
        }
        let value = row
            .iter()
            .find(|(col, _)| *col == field.column)
            .map(|(_, v)| v);
        if let Some(value) = value {
            if !value.is_null() && !value.matches_kind(field.kind) {
                errors.add(
                    table,
                    key,
                    field.name,
                    ViolationKind::WrongKind,
                    format!(
                        "must be {}, got {}",
                        field.kind.name(),
                        value.type_name()
                    ),
                );
                continue;
            }
        }
        if field.has_rules() {
            check_field(table, key, field, value, &mut errors);
        }
    }

    if !errors.is_empty() {
        tracing::debug!(
            table,
            ?key,
            violations = errors.violations.len(),
            "Row failed validation"
        );
    }
    errors
}

fn check_field(
    table: &'static str,
    key: Option<i64>,
    field: &FieldInfo,
    value: Option<&Value>,
    errors: &mut ValidationError,
) {
    let absent = match value {
        None | Some(Value::Null) => true,
        Some(Value::Text(s)) => s.is_empty(),
        Some(_) => false,
    };

    if field.required && absent {
        errors.add(table, key, field.name, ViolationKind::Required, "is required");
        return;
    }
    let Some(value) = value else { return };
    if value.is_null() {
        return;
    }

    if let Value::Text(text) = value {
        let chars = text.chars().count();
        if let Some(min) = field.min_length {
            if chars < min {
                errors.add(
                    table,
                    key,
                    field.name,
                    ViolationKind::MinLength,
                    format!("must be at least {min} characters, got {chars}"),
                );
            }
        }
        if let Some(max) = field.max_length {
            if chars > max {
                errors.add(
                    table,
                    key,
                    field.name,
                    ViolationKind::MaxLength,
                    format!("must be at most {max} characters, got {chars}"),
                );
            }
        }
        if let Some(pattern) = field.pattern {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(text) {
                        errors.add(
                            table,
                            key,
                            field.name,
                            ViolationKind::Pattern,
                            format!("must match pattern '{pattern}'"),
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(field = field.name, pattern, %err, "Invalid field pattern");
                }
            }
        }
    }

    if let Some(n) = value.as_i64() {
        if let Some(min) = field.min {
            if n < min {
                errors.add(
                    table,
                    key,
                    field.name,
                    ViolationKind::Min,
                    format!("must be at least {min}, got {n}"),
                );
            }
        }
        if let Some(max) = field.max {
            if n > max {
                errors.add(
                    table,
                    key,
                    field.name,
                    ViolationKind::Max,
                    format!("must be at most {max}, got {n}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueKind;

    fn name_field() -> FieldInfo {
        FieldInfo::new("name", ValueKind::Text)
            .required(true)
            .max_length(10)
    }

    #[test]
    fn required_rejects_empty_text() {
        let fields = [name_field()];
        let row = [("name", Value::Text(String::new()))];
        let errs = validate_row("players", None, &fields, &row);
        assert_eq!(errs.violations.len(), 1);
        assert_eq!(errs.violations[0].kind, ViolationKind::Required);
    }

    #[test]
    fn required_rejects_missing_column() {
        let fields = [name_field()];
        let errs = validate_row("players", Some(1), &fields, &[]);
        assert_eq!(errs.violations.len(), 1);
        assert_eq!(errs.violations[0].key, Some(1));
    }

    #[test]
    fn max_length_enforced() {
        let fields = [name_field()];
        let row = [("name", Value::Text("a".repeat(11)))];
        let errs = validate_row("players", None, &fields, &row);
        assert_eq!(errs.violations[0].kind, ViolationKind::MaxLength);
    }

    #[test]
    fn pattern_enforced() {
        let fields = [FieldInfo::new("code", ValueKind::Text).pattern("^[A-Z]{3}$")];
        let ok = [("code", Value::Text("ABC".into()))];
        let bad = [("code", Value::Text("abc".into()))];
        assert!(validate_row("teams", None, &fields, &ok).is_empty());
        assert_eq!(
            validate_row("teams", None, &fields, &bad).violations[0].kind,
            ViolationKind::Pattern
        );
    }

    #[test]
    fn numeric_bounds_enforced() {
        let fields = [FieldInfo::new("age", ValueKind::Int).min(0).max(120)];
        let low = [("age", Value::Int(-1))];
        let high = [("age", Value::Int(130))];
        let fine = [("age", Value::Int(25))];
        assert_eq!(
            validate_row("players", None, &fields, &low).violations[0].kind,
            ViolationKind::Min
        );
        assert_eq!(
            validate_row("players", None, &fields, &high).violations[0].kind,
            ViolationKind::Max
        );
        assert!(validate_row("players", None, &fields, &fine).is_empty());
    }

    #[test]
    fn declared_kind_enforced() {
        let fields = [FieldInfo::new("age", ValueKind::Int).min(0)];
        let wrong = [("age", Value::Text("old".into()))];
        let errs = validate_row("players", None, &fields, &wrong);
        assert_eq!(errs.violations.len(), 1);
        assert_eq!(errs.violations[0].kind, ViolationKind::WrongKind);
        assert!(errs.violations[0].message.contains("INTEGER"));
    }

    #[test]
    fn kind_checked_even_without_rules() {
        let fields = [FieldInfo::new("coach", ValueKind::Text).nullable(true)];
        let wrong = [("coach", Value::Int(3))];
        assert_eq!(
            validate_row("teams", None, &fields, &wrong).violations[0].kind,
            ViolationKind::WrongKind
        );
        let null = [("coach", Value::Null)];
        assert!(validate_row("teams", None, &fields, &null).is_empty());
    }

    #[test]
    fn int_widens_into_bigint_column() {
        let fields = [FieldInfo::new("rank", ValueKind::BigInt)];
        let row = [("rank", Value::Int(5))];
        assert!(validate_row("players", None, &fields, &row).is_empty());
    }

    #[test]
    fn optional_field_skips_rules_when_null() {
        let fields = [FieldInfo::new("nick", ValueKind::Text)
            .nullable(true)
            .min_length(2)];
        let row = [("nick", Value::Null)];
        assert!(validate_row("players", None, &fields, &row).is_empty());
    }

    #[test]
    fn all_violations_reported_together() {
        let fields = [
            name_field(),
            FieldInfo::new("age", ValueKind::Int).min(0),
        ];
        let row = [
            ("name", Value::Text(String::new())),
            ("age", Value::Int(-3)),
        ];
        let errs = validate_row("players", None, &fields, &row);
        assert_eq!(errs.violations.len(), 2);
    }
}
