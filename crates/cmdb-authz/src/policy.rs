//! Policy expressions issued by IAM.
//!
//! # Purpose
//! Models the boolean expression tree IAM hands back for "list instances this
//! user may see" queries, and decodes it from the IAM wire shape:
//!
//! ```json
//! {"op": "AND", "content": [
//!     {"op": "eq", "field": "host.id", "value": 1},
//!     {"op": "starts_with", "field": "host._bk_iam_path_", "value": "/business,3/"}
//! ]}
//! ```
//!
//! # Notes
//! Operators form a closed set; an unknown `op` is rejected while decoding.
use crate::errors::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    In,
    NotIn,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    /// Leaf form of "any value"; decoded into [`Policy::Any`] at the tree level.
    Any,
}

const OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::NotEq,
    Operator::In,
    Operator::NotIn,
    Operator::Lt,
    Operator::Lte,
    Operator::Gt,
    Operator::Gte,
    Operator::Contains,
    Operator::NotContains,
    Operator::StartsWith,
    Operator::NotStartsWith,
    Operator::EndsWith,
    Operator::NotEndsWith,
    Operator::Any,
];

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::NotEq => "not_eq",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::NotStartsWith => "not_starts_with",
            Operator::EndsWith => "ends_with",
            Operator::NotEndsWith => "not_ends_with",
            Operator::Any => "any",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operator {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OPERATORS
            .iter()
            .copied()
            .find(|op| op.as_str() == value)
            .ok_or(())
    }
}

/// `<resource type>.<attribute>` reference inside a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub resource_type: String,
    pub attribute: String,
}

impl FieldRef {
    pub fn new(resource_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attribute: attribute.into(),
        }
    }

    fn parse(field: &str) -> AuthzResult<Self> {
        match field.split_once('.') {
            Some((resource_type, attribute)) if !resource_type.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(resource_type, attribute))
            }
            _ => Err(AuthzError::invalid_filter(format!("field {field} invalid"))),
        }
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.attribute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub field: FieldRef,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy", into = "RawPolicy")]
pub enum Policy {
    Any,
    And(Vec<Policy>),
    Or(Vec<Policy>),
    Field(FieldValue),
}

impl Policy {
    pub fn field(field: FieldRef, op: Operator, value: Value) -> Self {
        Policy::Field(FieldValue { field, op, value })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPolicy {
    op: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    content: Vec<RawPolicy>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    field: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
}

impl TryFrom<RawPolicy> for Policy {
    type Error = AuthzError;

    fn try_from(raw: RawPolicy) -> AuthzResult<Self> {
        match raw.op.as_str() {
            "AND" | "OR" => {
                let children = raw
                    .content
                    .into_iter()
                    .map(Policy::try_from)
                    .collect::<AuthzResult<Vec<_>>>()?;
                Ok(if raw.op == "AND" {
                    Policy::And(children)
                } else {
                    Policy::Or(children)
                })
            }
            "any" => Ok(Policy::Any),
            op => {
                let op = op.parse::<Operator>().map_err(|_| {
                    AuthzError::invalid_filter(format!("filter op {op} not supported"))
                })?;
                Ok(Policy::field(FieldRef::parse(&raw.field)?, op, raw.value))
            }
        }
    }
}

impl From<Policy> for RawPolicy {
    fn from(policy: Policy) -> Self {
        let (op, content, field, value) = match policy {
            Policy::Any => ("any".to_string(), Vec::new(), String::new(), Value::Null),
            Policy::And(children) => (
                "AND".to_string(),
                children.into_iter().map(RawPolicy::from).collect(),
                String::new(),
                Value::Null,
            ),
            Policy::Or(children) => (
                "OR".to_string(),
                children.into_iter().map(RawPolicy::from).collect(),
                String::new(),
                Value::Null,
            ),
            Policy::Field(leaf) => (
                leaf.op.to_string(),
                Vec::new(),
                leaf.field.to_string(),
                leaf.value,
            ),
        };
        RawPolicy {
            op,
            content,
            field,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_nested_expression() {
        let policy: Policy = serde_json::from_value(json!({
            "op": "OR",
            "content": [
                {"op": "eq", "field": "host.id", "value": 1},
                {"op": "AND", "content": [
                    {"op": "any", "field": "business.id", "value": []}
                ]}
            ]
        }))
        .expect("policy");

        let expected = Policy::Or(vec![
            Policy::field(FieldRef::new("host", "id"), Operator::Eq, json!(1)),
            Policy::And(vec![Policy::Any]),
        ]);
        assert_eq!(policy, expected);
    }

    #[test]
    fn rejects_unknown_operator_and_bad_field() {
        let err = serde_json::from_value::<Policy>(json!({
            "op": "regex", "field": "host.id", "value": "x"
        }))
        .expect_err("unknown op");
        assert!(err.to_string().contains("not supported"));

        assert!(
            serde_json::from_value::<Policy>(json!({"op": "eq", "field": "hostid", "value": 1}))
                .is_err()
        );
    }

    #[test]
    fn empty_combinator_content_decodes() {
        let policy: Policy =
            serde_json::from_value(json!({"op": "AND", "content": []})).expect("policy");
        assert_eq!(policy, Policy::And(Vec::new()));
    }

    #[test]
    fn encodes_to_wire_shape() {
        let policy = Policy::And(vec![Policy::field(
            FieldRef::new("host", "bk_host_innerip"),
            Operator::StartsWith,
            json!("10."),
        )]);
        let wire = serde_json::to_value(&policy).expect("json");
        assert_eq!(wire["op"], "AND");
        assert_eq!(wire["content"][0]["op"], "starts_with");
        assert_eq!(wire["content"][0]["field"], "host.bk_host_innerip");
    }

    #[test]
    fn operator_string_roundtrip() {
        for op in OPERATORS.iter().copied() {
            assert_eq!(op.as_str().parse::<Operator>().ok(), Some(op));
        }
        assert!("between".parse::<Operator>().is_err());
    }
}
