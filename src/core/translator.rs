//! Query-string to filter translation
//!
//! Only parameters named in the endpoint's allow-list are considered. The
//! parameter name selects both the field and the constraint:
//!
//! | Parameter | Constraint |
//! |---|---|
//! | `field=v` | equality (coerced by the field's declared kind) |
//! | `$in_field=a&$in_field=b` | `{"field": {"$in": [a, b]}}` |
//! | `$regex_field=v` / `$regexi_field=v` | `{"field": {"$regex": v, "$options": ""/"i"}}` |
//! | `$lt_`, `$lte_`, `$gt_`, `$gte_` | comparison against an integer, or a timestamp when the field is one |
//! | `$ltdate_`, `$ltedate_`, `$gtdate_`, `$gtedate_` | comparison always against a timestamp |
//!
//! Comparison values that do not parse as integers are dropped; the rest of
//! the filter is still built.

use chrono::DateTime;
use serde_json::Value;

use crate::core::error::EndpointError;
use crate::core::filter::{Comparison, Filter, date_value};
use crate::core::model::{FieldKind, Model};
use crate::core::object_id::ObjectId;
use crate::core::query::FULL_QUERY_PARAM;

/// How an allow-listed parameter constrains its field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Constraint {
    Equality,
    In,
    Regex { case_insensitive: bool },
    Compare { op: Comparison, force_date: bool },
}

const PREFIXES: &[(&str, Constraint)] = &[
    ("$in_", Constraint::In),
    ("$regexi_", Constraint::Regex { case_insensitive: true }),
    ("$regex_", Constraint::Regex { case_insensitive: false }),
    ("$lte_", Constraint::Compare { op: Comparison::Lte, force_date: false }),
    ("$lt_", Constraint::Compare { op: Comparison::Lt, force_date: false }),
    ("$gte_", Constraint::Compare { op: Comparison::Gte, force_date: false }),
    ("$gt_", Constraint::Compare { op: Comparison::Gt, force_date: false }),
    ("$ltedate_", Constraint::Compare { op: Comparison::Lte, force_date: true }),
    ("$ltdate_", Constraint::Compare { op: Comparison::Lt, force_date: true }),
    ("$gtedate_", Constraint::Compare { op: Comparison::Gte, force_date: true }),
    ("$gtdate_", Constraint::Compare { op: Comparison::Gt, force_date: true }),
];

fn split_param(param: &str) -> (Constraint, &str) {
    PREFIXES
        .iter()
        .find_map(|(prefix, constraint)| param.strip_prefix(prefix).map(|field| (*constraint, field)))
        .unwrap_or((Constraint::Equality, param))
}

/// Decode a raw query string into ordered pairs, keeping repeated keys
pub fn parse_query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect()
    })
    .unwrap_or_default()
}

/// Builds filter expressions for one endpoint
#[derive(Debug, Clone, Default)]
pub struct QueryTranslator {
    allowed: Vec<String>,
    allow_full_query: bool,
}

impl QueryTranslator {
    pub fn new(allowed: Vec<String>, allow_full_query: bool) -> Self {
        Self {
            allowed,
            allow_full_query,
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Translate query pairs into a filter.
    ///
    /// `instance` is a blank model used only to look up field kinds.
    pub fn translate<M: Model>(
        &self,
        pairs: &[(String, String)],
        instance: &M,
    ) -> Result<Filter, EndpointError> {
        if self.allow_full_query {
            if let Some((_, raw)) = pairs
                .iter()
                .find(|(k, v)| k == FULL_QUERY_PARAM && !v.is_empty())
            {
                return full_query(raw);
            }
        }

        let mut filter = Filter::new();

        for param in &self.allowed {
            let values: Vec<&str> = pairs
                .iter()
                .filter(|(k, v)| k == param && !v.is_empty())
                .map(|(_, v)| v.as_str())
                .collect();
            let Some(first) = values.first().copied() else {
                continue;
            };

            let (constraint, field) = split_param(param);
            if field.is_empty() {
                continue;
            }
            let kind = instance.field_kind(field);

            match constraint {
                Constraint::Equality => {
                    filter.insert(field, coerce_literal(first, kind));
                }
                Constraint::In => {
                    let members = values
                        .iter()
                        .map(|v| coerce_member(v, kind))
                        .collect::<Vec<_>>();
                    filter.add_operator(field, "$in", Value::Array(members));
                }
                Constraint::Regex { case_insensitive } => {
                    let options = if case_insensitive { "i" } else { "" };
                    filter.add_operator(field, "$regex", Value::String(first.to_string()));
                    filter.add_operator(field, "$options", Value::String(options.to_string()));
                }
                Constraint::Compare { op, force_date } => {
                    let as_date = force_date || kind == FieldKind::Timestamp;
                    match comparison_operand(first, as_date) {
                        Some(operand) => filter.add_operator(field, op.operator(), operand),
                        None => tracing::debug!(
                            param = %param,
                            value = %first,
                            "dropping malformed comparison constraint"
                        ),
                    }
                }
            }
        }

        Ok(filter)
    }
}

fn full_query(raw: &str) -> Result<Filter, EndpointError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| EndpointError::bad_request(format!("Invalid query: {e}")))?;
    Filter::from_value(value)
        .ok_or_else(|| EndpointError::bad_request("Invalid query: expected a JSON object"))
}

fn coerce_literal(raw: &str, kind: FieldKind) -> Value {
    match kind {
        FieldKind::ObjectId => ObjectId::parse_str(raw)
            .map(|id| id.to_extended_json())
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Boolean => raw
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

fn coerce_member(raw: &str, kind: FieldKind) -> Value {
    match ObjectId::parse_str(raw) {
        Ok(id) => id.to_extended_json(),
        Err(_) => coerce_literal(raw, kind),
    }
}

fn comparison_operand(raw: &str, as_date: bool) -> Option<Value> {
    let parsed = raw.trim().parse::<i64>().ok()?;
    if as_date {
        DateTime::from_timestamp(parsed, 0).map(|at| date_value(&at))
    } else {
        Some(Value::from(parsed))
    }
}
