use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators understood by the encoded-query grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "NE")]
    Ne,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GE")]
    Ge,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LE")]
    Le,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "STARTSWITH")]
    StartsWith,
    #[serde(rename = "ENDSWITH")]
    EndsWith,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT_IN")]
    NotIn,
    #[serde(rename = "IS_EMPTY")]
    IsEmpty,
    #[serde(rename = "IS_NOT_EMPTY")]
    IsNotEmpty,
}

impl FilterOperator {
    /// Accepts both the symbolic form (`=`, `NOT IN`) and the enum names
    /// (`EQ`, `NOT_IN`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace('_', " ");
        let op = match normalized.as_str() {
            "=" | "==" | "EQ" => FilterOperator::Eq,
            "!=" | "<>" | "NE" => FilterOperator::Ne,
            ">" | "GT" => FilterOperator::Gt,
            ">=" | "GE" => FilterOperator::Ge,
            "<" | "LT" => FilterOperator::Lt,
            "<=" | "LE" => FilterOperator::Le,
            "LIKE" => FilterOperator::Like,
            "STARTSWITH" | "STARTS WITH" => FilterOperator::StartsWith,
            "ENDSWITH" | "ENDS WITH" => FilterOperator::EndsWith,
            "IN" => FilterOperator::In,
            "NOT IN" | "NOTIN" => FilterOperator::NotIn,
            "ISEMPTY" | "IS EMPTY" => FilterOperator::IsEmpty,
            "ISNOTEMPTY" | "IS NOT EMPTY" => FilterOperator::IsNotEmpty,
            _ => return None,
        };
        Some(op)
    }

    /// Token emitted between the field name and the value.
    pub fn token(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::StartsWith => "STARTSWITH",
            FilterOperator::EndsWith => "ENDSWITH",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOTIN",
            FilterOperator::IsEmpty => "ISEMPTY",
            FilterOperator::IsNotEmpty => "ISNOTEMPTY",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
        }
    }

    pub fn unary(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
        }
    }
}

/// Filter as it arrives from a caller: the operator is still free text and the
/// value may be any JSON scalar.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: Option<Value>,
}

fn default_operator() -> String {
    "=".to_string()
}

impl FilterSpec {
    /// Scalar values rendered the way they appear in an encoded query.
    pub fn value_text(&self) -> Option<String> {
        match &self.value {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// How consecutive clauses are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinOp {
    #[default]
    And,
    Or,
}

impl JoinOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" | "^" => Some(JoinOp::And),
            "OR" | "^OR" => Some(JoinOp::Or),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            JoinOp::And => "^",
            JoinOp::Or => "^OR",
        }
    }
}
