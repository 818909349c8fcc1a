//! Filter expressions restricting vector index searches by chunk metadata.
//!
//! Constraints render to the boolean expression grammar understood by the
//! index backend:
//!
//! ```text
//! (<field> <op> <value>) and (<field> <op> <value>) ...
//! ```
//!
//! with `op` one of `==`, `like`, `in`. Predicates appear in the order the
//! caller supplied the constraints.
//!
//! # Example
//!
//! ```rust
//! use litrag::filter::{FieldConstraint, build_filter_expression};
//!
//! let expr = build_filter_expression(
//!     &[FieldConstraint::new("year", 2020), FieldConstraint::new("doi", "10.1/x")],
//!     false,
//! )
//! .unwrap();
//! assert_eq!(expr.as_str(), r#"(year == 2020) and (doi == "10.1/x")"#);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RetrievalError};

/// Field rendered as an unquoted number.
const NUMERIC_FIELD: &str = "year";

/// Field rendered with `like` when fuzzy matching is requested.
const FUZZY_FIELD: &str = "title";

/// A constraint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// An integer, e.g. a publication year.
    Integer(i64),
    /// A string, e.g. a DOI or section name.
    Text(String),
    /// A set of allowed values, rendered with `in`.
    List(Vec<FieldValue>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<&Value> for FieldValue {
    type Error = RetrievalError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Integer(i)),
                None => Ok(Self::Text(n.to_string())),
            },
            Value::Bool(b) => Ok(Self::Text(b.to_string())),
            Value::Array(items) => {
                items.iter().map(FieldValue::try_from).collect::<Result<Vec<_>>>().map(Self::List)
            }
            Value::Null | Value::Object(_) => Err(RetrievalError::InvalidFilter(format!(
                "unsupported constraint value: {value}"
            ))),
        }
    }
}

/// A named field constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
    /// Metadata field name.
    pub field: String,
    /// Required value.
    pub value: FieldValue,
}

impl FieldConstraint {
    /// Create a constraint.
    pub fn new(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self { field: field.into(), value: value.into() }
    }
}

/// Comparison operator of a single predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact equality.
    Eq,
    /// Wildcard match.
    Like,
    /// Set membership.
    In,
}

impl FilterOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Like => "like",
            Self::In => "in",
        }
    }
}

/// A rendered filter expression. Empty means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterExpression(String);

impl FilterExpression {
    /// The expression text passed to the vector index.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the expression constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` when the expression is empty, so callers can skip the filter.
    pub fn as_option(&self) -> Option<&str> {
        if self.is_empty() { None } else { Some(&self.0) }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render `constraints` as one ANDed expression.
///
/// - with `fuzzy`, a text `title` constraint becomes `(title like "%...%")`,
///   with `%`, `_` and `\` in the value escaped so they match literally
/// - `year` renders unquoted and must be an integer
/// - every other field renders as a quoted string
/// - a list value renders with `in`
///
/// An empty constraint slice yields an empty expression.
///
/// # Errors
///
/// Returns [`RetrievalError::InvalidFilter`] for malformed field names, a
/// non-integer `year`, empty or nested lists.
pub fn build_filter_expression(
    constraints: &[FieldConstraint],
    fuzzy: bool,
) -> Result<FilterExpression> {
    let predicates = constraints
        .iter()
        .map(|c| render_predicate(c, fuzzy))
        .collect::<Result<Vec<_>>>()?;
    Ok(FilterExpression(predicates.join(" and ")))
}

fn render_predicate(constraint: &FieldConstraint, fuzzy: bool) -> Result<String> {
    let field = constraint.field.as_str();
    validate_field_name(field)?;

    let (op, rendered) = match &constraint.value {
        FieldValue::List(items) => {
            if items.is_empty() {
                return Err(RetrievalError::InvalidFilter(format!(
                    "empty value list for field '{field}'"
                )));
            }
            let values =
                items.iter().map(|v| render_scalar(field, v)).collect::<Result<Vec<_>>>()?;
            (FilterOp::In, format!("[{}]", values.join(", ")))
        }
        FieldValue::Text(text) if fuzzy && field == FUZZY_FIELD => {
            (FilterOp::Like, quote(&format!("%{}%", escape_like(text))))
        }
        scalar => (FilterOp::Eq, render_scalar(field, scalar)?),
    };

    Ok(format!("({field} {} {rendered})", op.as_str()))
}

fn render_scalar(field: &str, value: &FieldValue) -> Result<String> {
    match (field == NUMERIC_FIELD, value) {
        (_, FieldValue::List(_)) => {
            Err(RetrievalError::InvalidFilter(format!("nested list for field '{field}'")))
        }
        (true, FieldValue::Integer(i)) => Ok(i.to_string()),
        (true, FieldValue::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map(|i| i.to_string())
            .map_err(|_| {
                RetrievalError::InvalidFilter(format!("{field} must be an integer, got '{text}'"))
            }),
        (false, FieldValue::Integer(i)) => Ok(quote(&i.to_string())),
        (false, FieldValue::Text(text)) => Ok(quote(text)),
    }
}

fn validate_field_name(field: &str) -> Result<()> {
    let mut chars = field.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(RetrievalError::InvalidFilter(format!("invalid field name '{field}'")))
    }
}

/// Backslash-escape `LIKE` wildcards and the escape character itself.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
