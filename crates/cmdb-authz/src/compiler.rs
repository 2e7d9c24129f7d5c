//! Policy-to-storage-query compiler.
//!
//! # Purpose and responsibility
//! Compiles an IAM [`Policy`] into a [`StorageCondition`] for one resource
//! type so "which instances may this user see" can be answered by the
//! resource store.
//!
//! # Where it fits
//! The pull-resource `list_instance_by_policy` method and the instance lister
//! call [`PolicyCompiler::compile`]. Hierarchical path attributes on hosts need
//! the module-host relation, which is reached through [`HostRelationSource`].
//!
//! # Key invariants and assumptions
//! - `Any` compiles to `MatchAll` without looking at children.
//! - A leaf on a different resource type compiles to `Unconstrained`.
//! - Combinators drop `Unconstrained` children; all-unconstrained collapses.
//! - Values are never coerced: mixed arrays and non-numeric comparisons fail.
//! - A host path that matches no relation rows is `Unconstrained`, not `MatchAll`.
use crate::condition::StorageCondition;
use crate::errors::{AuthzError, AuthzResult};
use crate::mapper::IAM_PATH_KEY;
use crate::policy::{FieldValue, Operator, Policy};
use crate::resource::{HOST_ID_FIELD, IamResourceType, IdKind};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

/// Lookup of host ids by topology condition.
#[async_trait]
pub trait HostRelationSource: Send + Sync {
    /// Host ids whose module-host relation rows match `condition`.
    async fn host_ids_matching(&self, condition: &Map<String, Value>) -> AuthzResult<Vec<i64>>;
}

/// One `type,id` segment of an ancestor path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub resource_type: IamResourceType,
    pub id: Value,
}

/// Parse `/type,id/type,id/` into its concrete segments, skipping `*` ids.
///
/// # Errors
/// - Segments that are not exactly `type,id`.
/// - Unknown resource types.
/// - Non-integer ids for integer-keyed types.
pub fn parse_iam_path(path: &str) -> AuthzResult<Vec<PathSegment>> {
    let mut segments = Vec::new();
    for item in path.trim_matches('/').split('/') {
        let parts: Vec<&str> = item.split(',').collect();
        let [type_id, id] = parts.as_slice() else {
            return Err(AuthzError::invalid_filter(format!("pathItem {item} invalid")));
        };
        if *id == "*" {
            continue;
        }
        let resource_type = type_id.parse::<IamResourceType>().map_err(|_| {
            AuthzError::invalid_filter(format!("pathItem {item} has unknown resource type"))
        })?;
        let id = match resource_type.id_kind() {
            IdKind::Str => Value::String((*id).to_string()),
            IdKind::Int => id.parse::<i64>().map(Value::from).map_err(|err| {
                AuthzError::invalid_filter(format!("id {id} parse int failed, error: {err}"))
            })?,
        };
        segments.push(PathSegment { resource_type, id });
    }
    Ok(segments)
}

fn path_document(path: &str, op: &str) -> AuthzResult<Map<String, Value>> {
    let mut document = Map::new();
    for segment in parse_iam_path(path)? {
        let mut inner = Map::new();
        inner.insert(op.to_string(), segment.id);
        document.insert(
            segment.resource_type.id_field().to_string(),
            Value::Object(inner),
        );
    }
    Ok(document)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Numeric,
    Text,
    Boolean,
}

fn value_kind(value: &Value) -> Option<ValueKind> {
    match value {
        Value::Number(_) => Some(ValueKind::Numeric),
        Value::String(_) => Some(ValueKind::Text),
        Value::Bool(_) => Some(ValueKind::Boolean),
        _ => None,
    }
}

fn comparison_op(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Eq => Some("$eq"),
        Operator::NotEq => Some("$ne"),
        Operator::In => Some("$in"),
        Operator::NotIn => Some("$nin"),
        Operator::Lt => Some("$lt"),
        Operator::Lte => Some("$lte"),
        Operator::Gt => Some("$gt"),
        Operator::Gte => Some("$gte"),
        Operator::Contains
        | Operator::NotContains
        | Operator::StartsWith
        | Operator::NotStartsWith
        | Operator::EndsWith
        | Operator::NotEndsWith
        | Operator::Any => None,
    }
}

fn comparison(attribute: &str, op: Operator, value: &Value) -> AuthzResult<StorageCondition> {
    let storage_op = comparison_op(op).ok_or_else(|| {
        AuthzError::invalid_filter(format!("filter op {op} isn't a comparison operator"))
    })?;
    Ok(StorageCondition::field(attribute, storage_op, value.clone()))
}

/// Anchored pattern for a text operator; rejected here when it doesn't compile.
fn regex_pattern(op: Operator, value: &str) -> AuthzResult<String> {
    let pattern = match op {
        Operator::StartsWith | Operator::NotStartsWith => format!("^{value}"),
        Operator::EndsWith | Operator::NotEndsWith => format!("{value}$"),
        _ => value.to_string(),
    };
    regex::Regex::new(&pattern).map_err(|err| {
        AuthzError::invalid_filter(format!("filter op {op} value {value} isn't a valid pattern: {err}"))
    })?;
    Ok(pattern)
}

fn string_value<'v>(op: Operator, value: &'v Value) -> AuthzResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| AuthzError::invalid_filter(format!("filter op {op} value {value} isn't string type")))
}

fn non_empty_array<'v>(op: Operator, value: &'v Value) -> AuthzResult<&'v Vec<Value>> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        _ => Err(AuthzError::invalid_filter(format!(
            "filter op {op} value {value} isn't array type or is empty"
        ))),
    }
}

pub struct PolicyCompiler<'r> {
    relations: &'r dyn HostRelationSource,
}

impl<'r> PolicyCompiler<'r> {
    pub fn new(relations: &'r dyn HostRelationSource) -> Self {
        Self { relations }
    }

    /// Compile `policy` into a storage condition for `resource_type`.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidFilter`] for empty combinators, wrong value types
    ///   and malformed paths.
    /// - [`AuthzError::Lookup`] when the host relation lookup fails.
    pub async fn compile(
        &self,
        policy: &Policy,
        resource_type: IamResourceType,
    ) -> AuthzResult<StorageCondition> {
        self.compile_node(policy, resource_type).await
    }

    fn compile_node<'a>(
        &'a self,
        policy: &'a Policy,
        resource_type: IamResourceType,
    ) -> BoxFuture<'a, AuthzResult<StorageCondition>> {
        async move {
            match policy {
                Policy::Any => Ok(StorageCondition::MatchAll),
                Policy::And(children) => {
                    self.compile_group("AND", "$and", children, resource_type)
                        .await
                }
                Policy::Or(children) => {
                    self.compile_group("OR", "$or", children, resource_type)
                        .await
                }
                Policy::Field(leaf) => self.compile_leaf(leaf, resource_type).await,
            }
        }
        .boxed()
    }

    async fn compile_group(
        &self,
        name: &str,
        combinator: &str,
        children: &[Policy],
        resource_type: IamResourceType,
    ) -> AuthzResult<StorageCondition> {
        if children.is_empty() {
            return Err(AuthzError::invalid_filter(format!(
                "filter op {name} content can't be empty"
            )));
        }
        let mut compiled = Vec::with_capacity(children.len());
        for child in children {
            compiled.push(self.compile_node(child, resource_type).await?);
        }
        Ok(StorageCondition::combine(combinator, compiled))
    }

    async fn compile_leaf(
        &self,
        leaf: &FieldValue,
        resource_type: IamResourceType,
    ) -> AuthzResult<StorageCondition> {
        if leaf.op == Operator::Any {
            return Ok(StorageCondition::MatchAll);
        }
        if leaf.field.resource_type != resource_type.to_string() {
            return Ok(StorageCondition::Unconstrained);
        }

        let attribute = match leaf.field.attribute.as_str() {
            "id" => resource_type.id_field(),
            "display_name" => resource_type.name_field(),
            other => other,
        };
        if attribute == IAM_PATH_KEY {
            return self.compile_path(leaf.op, &leaf.value, resource_type).await;
        }

        let op = leaf.op;
        let value = &leaf.value;
        match op {
            Operator::Eq | Operator::NotEq => {
                if value_kind(value).is_none() {
                    return Err(AuthzError::invalid_filter(format!(
                        "filter op {op} value {value} isn't string, numeric or boolean type"
                    )));
                }
                comparison(attribute, op, value)
            }
            Operator::In | Operator::NotIn => {
                let items = non_empty_array(op, value)?;
                let kind = value_kind(&items[0]).ok_or_else(|| {
                    AuthzError::invalid_filter(format!(
                        "filter op {op} value {value} isn't string, numeric or boolean array type"
                    ))
                })?;
                if items.iter().any(|item| value_kind(item) != Some(kind)) {
                    return Err(AuthzError::invalid_filter(format!(
                        "filter op {op} value {value} contains values with different types"
                    )));
                }
                comparison(attribute, op, value)
            }
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                if !value.is_number() {
                    return Err(AuthzError::invalid_filter(format!(
                        "filter op {op} value {value} isn't numeric type"
                    )));
                }
                comparison(attribute, op, value)
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let text = string_value(op, value)?;
                Ok(StorageCondition::field(
                    attribute,
                    "$regex",
                    Value::String(regex_pattern(op, text)?),
                ))
            }
            Operator::NotContains | Operator::NotStartsWith | Operator::NotEndsWith => {
                let text = string_value(op, value)?;
                let mut regex = Map::new();
                regex.insert(
                    "$regex".to_string(),
                    Value::String(regex_pattern(op, text)?),
                );
                Ok(StorageCondition::field(attribute, "$not", Value::Object(regex)))
            }
            Operator::Any => Ok(StorageCondition::MatchAll),
        }
    }

    async fn compile_path(
        &self,
        op: Operator,
        value: &Value,
        resource_type: IamResourceType,
    ) -> AuthzResult<StorageCondition> {
        let document = match op {
            Operator::Eq | Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                path_document(string_value(op, value)?, "$eq")?
            }
            Operator::NotEq
            | Operator::NotContains
            | Operator::NotStartsWith
            | Operator::NotEndsWith => path_document(string_value(op, value)?, "$ne")?,
            Operator::In | Operator::NotIn => {
                let (segment_op, combinator) = if op == Operator::In {
                    ("$eq", "$or")
                } else {
                    ("$ne", "$and")
                };
                let mut parts = Vec::new();
                for item in non_empty_array(op, value)? {
                    let path = string_value(op, item)?;
                    parts.push(Value::Object(path_document(path, segment_op)?));
                }
                let mut document = Map::new();
                document.insert(combinator.to_string(), Value::Array(parts));
                document
            }
            Operator::Any => return Ok(StorageCondition::MatchAll),
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                return Err(AuthzError::invalid_filter(format!(
                    "filter op {op} not supported"
                )));
            }
        };

        if resource_type != IamResourceType::Host {
            return Ok(StorageCondition::from_document(document));
        }

        // Hosts keep their topology in the relation collection.
        let host_ids = self.relations.host_ids_matching(&document).await?;
        if host_ids.is_empty() {
            tracing::debug!(condition = ?document, "host path matched no relations");
            return Ok(StorageCondition::Unconstrained);
        }
        Ok(StorageCondition::field(
            HOST_ID_FIELD,
            "$in",
            Value::from(host_ids),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FieldRef;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRelations {
        host_ids: Vec<i64>,
        seen: Mutex<Vec<Map<String, Value>>>,
    }

    #[async_trait]
    impl HostRelationSource for RecordingRelations {
        async fn host_ids_matching(
            &self,
            condition: &Map<String, Value>,
        ) -> AuthzResult<Vec<i64>> {
            self.seen.lock().expect("lock").push(condition.clone());
            Ok(self.host_ids.clone())
        }
    }

    fn leaf(field: &str, op: Operator, value: Value) -> Policy {
        let (resource_type, attribute) = field.split_once('.').expect("field");
        Policy::field(FieldRef::new(resource_type, attribute), op, value)
    }

    fn doc(value: Value) -> StorageCondition {
        StorageCondition::Filter(value.as_object().cloned().expect("object"))
    }

    async fn compile(policy: &Policy, resource_type: IamResourceType) -> AuthzResult<StorageCondition> {
        let relations = RecordingRelations::default();
        PolicyCompiler::new(&relations)
            .compile(policy, resource_type)
            .await
    }

    #[tokio::test]
    async fn any_matches_all_for_every_type() {
        for resource_type in [
            IamResourceType::Host,
            IamResourceType::Business,
            IamResourceType::SysInstance(3),
        ] {
            let condition = compile(&Policy::Any, resource_type).await.expect("any");
            assert_eq!(condition, StorageCondition::MatchAll);
        }
    }

    #[tokio::test]
    async fn foreign_leaf_is_unconstrained() {
        let policy = leaf("business.bk_biz_id", Operator::Eq, json!(3));
        let condition = compile(&policy, IamResourceType::Host).await.expect("leaf");
        assert!(condition.is_unconstrained());
    }

    #[tokio::test]
    async fn combinator_of_foreign_leaves_is_unconstrained() {
        let policy = Policy::And(vec![
            leaf("business.id", Operator::Eq, json!(3)),
            leaf("set.id", Operator::Eq, json!(4)),
        ]);
        let condition = compile(&policy, IamResourceType::Host).await.expect("and");
        assert!(condition.is_unconstrained());
    }

    #[tokio::test]
    async fn foreign_leaf_is_dropped_from_combinator() {
        let policy = Policy::And(vec![
            leaf("biz_custom_query.id", Operator::Eq, json!("7")),
            leaf("business.bk_biz_id", Operator::Eq, json!(3)),
        ]);
        let condition = compile(&policy, IamResourceType::BizCustomQuery)
            .await
            .expect("and");
        assert_eq!(condition, doc(json!({"$and": [{"id": {"$eq": "7"}}]})));

        let alone = Policy::And(vec![leaf("biz_custom_query.id", Operator::Eq, json!("7"))]);
        let expected = compile(&alone, IamResourceType::BizCustomQuery)
            .await
            .expect("alone");
        assert_eq!(condition, expected);
    }

    #[tokio::test]
    async fn empty_combinator_is_an_error() {
        let err = compile(&Policy::Or(Vec::new()), IamResourceType::Host)
            .await
            .expect_err("empty");
        assert!(err.to_string().contains("content can't be empty"));
    }

    #[tokio::test]
    async fn remaps_logical_attributes() {
        let policy = Policy::Or(vec![
            leaf("host.id", Operator::In, json!([1, 2])),
            leaf("host.display_name", Operator::StartsWith, json!("10.")),
        ]);
        let condition = compile(&policy, IamResourceType::Host).await.expect("or");
        assert_eq!(
            condition,
            doc(json!({"$or": [
                {"bk_host_id": {"$in": [1, 2]}},
                {"bk_host_innerip": {"$regex": "^10."}}
            ]}))
        );
    }

    #[tokio::test]
    async fn negated_string_ops_wrap_regex() {
        let policy = leaf("host.bk_host_name", Operator::NotEndsWith, json!("-dev"));
        let condition = compile(&policy, IamResourceType::Host).await.expect("not");
        assert_eq!(
            condition,
            doc(json!({"bk_host_name": {"$not": {"$regex": "-dev$"}}}))
        );
    }

    #[tokio::test]
    async fn comparison_ops_map_one_to_one() {
        let cases = [
            (Operator::Eq, "$eq"),
            (Operator::NotEq, "$ne"),
            (Operator::Lt, "$lt"),
            (Operator::Lte, "$lte"),
            (Operator::Gt, "$gt"),
            (Operator::Gte, "$gte"),
        ];
        for (op, storage_op) in cases {
            let condition = compile(&leaf("business.id", op, json!(5)), IamResourceType::Business)
                .await
                .expect("comparison");
            assert_eq!(condition, doc(json!({"bk_biz_id": {storage_op: 5}})));
        }
        assert_eq!(comparison_op(Operator::NotIn), Some("$nin"));
        assert_eq!(comparison_op(Operator::Contains), None);
        assert_eq!(comparison_op(Operator::Any), None);
    }

    #[tokio::test]
    async fn rejects_patterns_that_do_not_compile() {
        for op in [Operator::Contains, Operator::NotStartsWith, Operator::EndsWith] {
            let policy = leaf("host.bk_host_innerip", op, json!("a(b"));
            let err = compile(&policy, IamResourceType::Host)
                .await
                .expect_err("bad pattern");
            assert!(matches!(err, AuthzError::InvalidFilter(_)));
            assert!(err.is_caller_error());
        }
    }

    #[tokio::test]
    async fn rejects_wrong_value_types() {
        let cases = vec![
            leaf("host.id", Operator::In, json!([1, "a"])),
            leaf("host.id", Operator::NotIn, json!([])),
            leaf("host.id", Operator::Eq, json!({"a": 1})),
            leaf("host.id", Operator::Gt, json!("5")),
            leaf("host.bk_host_name", Operator::Contains, json!(5)),
        ];
        for policy in cases {
            let err = compile(&policy, IamResourceType::Host)
                .await
                .expect_err("type error");
            assert!(matches!(err, AuthzError::InvalidFilter(_)));
        }
    }

    #[tokio::test]
    async fn compile_is_deterministic() {
        let policy = Policy::Or(vec![
            leaf("business.id", Operator::NotIn, json!([1, 2])),
            leaf("business.bk_biz_name", Operator::Contains, json!("ops")),
            Policy::And(vec![leaf("business.id", Operator::Lte, json!(9))]),
        ]);
        let first = compile(&policy, IamResourceType::Business).await.expect("first");
        let second = compile(&policy, IamResourceType::Business).await.expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn business_path_compiles_to_segment_equality() {
        let policy = leaf(
            "biz_custom_query._bk_iam_path_",
            Operator::StartsWith,
            json!("/business,3/"),
        );
        let condition = compile(&policy, IamResourceType::BizCustomQuery)
            .await
            .expect("path");
        assert_eq!(condition, doc(json!({"bk_biz_id": {"$eq": 3}})));
    }

    #[tokio::test]
    async fn path_set_operators() {
        let policy = leaf(
            "biz_set_template._bk_iam_path_",
            Operator::In,
            json!(["/business,1/", "/business,2/"]),
        );
        let condition = compile(&policy, IamResourceType::BizSetTemplate)
            .await
            .expect("in");
        assert_eq!(
            condition,
            doc(json!({"$or": [{"bk_biz_id": {"$eq": 1}}, {"bk_biz_id": {"$eq": 2}}]}))
        );

        let policy = leaf(
            "biz_set_template._bk_iam_path_",
            Operator::NotIn,
            json!(["/business,1/"]),
        );
        let condition = compile(&policy, IamResourceType::BizSetTemplate)
            .await
            .expect("not in");
        assert_eq!(condition, doc(json!({"$and": [{"bk_biz_id": {"$ne": 1}}]})));
    }

    #[tokio::test]
    async fn host_path_resolves_through_relations() {
        let relations = RecordingRelations {
            host_ids: vec![11, 12],
            ..Default::default()
        };
        let policy = leaf("host._bk_iam_path_", Operator::Eq, json!("/business,3/host,*/"));
        let condition = PolicyCompiler::new(&relations)
            .compile(&policy, IamResourceType::Host)
            .await
            .expect("host path");
        assert_eq!(condition, doc(json!({"bk_host_id": {"$in": [11, 12]}})));
        let seen = relations.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(Value::Object(seen[0].clone()), json!({"bk_biz_id": {"$eq": 3}}));
    }

    #[tokio::test]
    async fn host_path_without_relations_is_unconstrained() {
        let policy = leaf("host._bk_iam_path_", Operator::Eq, json!("/business,3/"));
        let condition = compile(&policy, IamResourceType::Host).await.expect("host path");
        assert!(condition.is_unconstrained());
    }

    #[test]
    fn path_parsing_errors() {
        assert!(parse_iam_path("/business/").is_err());
        assert!(parse_iam_path("/business,x/").is_err());
        assert!(parse_iam_path("/galaxy,1/").is_err());
        let segments = parse_iam_path("/biz_custom_query,abc/business,*/").expect("segments");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id, json!("abc"));
    }
}
