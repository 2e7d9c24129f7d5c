//! Instance listing for the IAM pull-resource protocol.
//!
//! # Purpose and responsibility
//! Answers IAM's callbacks about CMDB resources: attribute names and values,
//! instance pages (optionally scoped by parent, searched by keyword and
//! annotated with ancestor paths), instance details, and the instances a
//! policy expression matches.
//!
//! # Where it fits
//! The pull-resource endpoint decodes the request and calls
//! [`InstanceLister::pull`]. Storage access goes through [`ResourceStore`],
//! policy expressions through [`PolicyCompiler`].
//!
//! # Key invariants and assumptions
//! - Every type resolves to one of four listing scopes: system (no parent),
//!   business (parent and ancestor search), model (parent must be a model) and
//!   host (topology read from the module-host relation).
//! - Parent, search or chain combinations a type cannot satisfy produce an
//!   empty page, never an error.
//! - Ancestor display names are resolved in one query per ancestor type.
//! - A page limit of zero or above the configured bound is rejected.
//! - A policy that says nothing about the type lists nothing.
use crate::model::ModelCache;
use crate::store::relations::StoreHostRelations;
use crate::store::{Document, FindResult, Page, ResourceStore, StoreError};
use cmdb_authz::{
    AuthzError, BUSINESS_ID_FIELD, HOST_ID_FIELD, IAM_PATH_KEY, IamResourceType, IdKind,
    MODEL_ATTRIBUTE_COLLECTION, MODEL_COLLECTION, MODULE_HOST_RELATION_COLLECTION,
    OBJECT_ID_FIELD, Policy, PolicyCompiler, business_path,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;

const SET_ID_FIELD: &str = "bk_set_id";
const MODULE_ID_FIELD: &str = "bk_module_id";
const OBJECT_NAME_FIELD: &str = "bk_obj_name";
const ASSOCIATION_COLLECTION: &str = "cc_ObjAsst";
const ASSOCIATION_KIND_FIELD: &str = "bk_asst_id";
const MAINLINE_ASSOCIATION: &str = "bk_mainline";
const INNER_OBJECTS: [&str; 4] = ["biz", "set", "module", "host"];
const UNLISTED_OBJECTS: [&str; 2] = ["process", "plat"];

#[derive(Debug, Error)]
pub enum ListError {
    #[error("resource type {0} is not supported")]
    UnsupportedType(String),
    #[error("method {method} is not supported for resource type {resource_type}")]
    UnsupportedMethod {
        resource_type: String,
        method: String,
    },
    #[error("page limit {limit} must be between 1 and {max}")]
    InvalidPage { limit: u64, max: u64 },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error(transparent)]
    Policy(#[from] AuthzError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encode pull response")]
    Encode(#[source] serde_json::Error),
}

impl ListError {
    /// Whether the request itself is at fault rather than a backend.
    pub fn is_caller_error(&self) -> bool {
        match self {
            ListError::Policy(err) => err.is_caller_error(),
            ListError::Store(_) | ListError::Encode(_) => false,
            _ => true,
        }
    }
}

pub type ListResult<T> = Result<T, ListError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PullMethod {
    ListAttr,
    ListAttrValue,
    ListInstance,
    FetchInstanceInfo,
    ListInstanceByPolicy,
}

impl PullMethod {
    pub fn parse(method: &str) -> Option<Self> {
        let method = match method {
            "list_attr" => PullMethod::ListAttr,
            "list_attr_value" => PullMethod::ListAttrValue,
            "list_instance" => PullMethod::ListInstance,
            "fetch_instance_info" => PullMethod::FetchInstanceInfo,
            "list_instance_by_policy" => PullMethod::ListInstanceByPolicy,
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PullMethod::ListAttr => "list_attr",
            PullMethod::ListAttrValue => "list_attr_value",
            PullMethod::ListInstance => "list_instance",
            PullMethod::FetchInstanceInfo => "fetch_instance_info",
            PullMethod::ListInstanceByPolicy => "list_instance_by_policy",
        }
    }
}

/// One pull-resource call as sent by IAM.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PullResourceRequest {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub method: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub filter: Value,
    #[serde(default)]
    pub page: Page,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ParentFilter {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainEntry {
    #[serde(default)]
    pub system_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListInstanceFilter {
    #[serde(default)]
    pub parent: Option<ParentFilter>,
    /// Keywords per resource type; the listed type itself or one of its ancestors.
    #[serde(default)]
    pub search: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub resource_type_chain: Vec<ChainEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListAttrValueFilter {
    pub attr: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub ids: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FetchInstanceInfoFilter {
    pub ids: Vec<String>,
    #[serde(default)]
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ListInstanceByPolicyFilter {
    #[schema(value_type = Object)]
    pub expression: Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InstancePath {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InstanceResource {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<InstancePath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListInstanceResult {
    pub count: u64,
    pub results: Vec<InstanceResource>,
}

impl ListInstanceResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttrResource {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttrValue {
    #[schema(value_type = Object)]
    pub id: Value,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ListAttrValueResult {
    pub count: u64,
    pub results: Vec<AttrValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    System,
    Business,
    Model,
    Host,
}

struct TypePlan {
    scope: Scope,
    /// Condition every listing of the type carries.
    extra: Document,
    /// CMDB object whose attributes IAM may filter on.
    object_id: Option<String>,
}

fn doc(field: &str, value: Value) -> Document {
    let mut document = Document::new();
    document.insert(field.to_string(), value);
    document
}

fn and_all(parts: Vec<Document>) -> Document {
    let mut parts: Vec<Document> = parts.into_iter().filter(|part| !part.is_empty()).collect();
    match parts.len() {
        0 => Document::new(),
        1 => parts.remove(0),
        _ => doc(
            "$and",
            Value::Array(parts.into_iter().map(Value::Object).collect()),
        ),
    }
}

fn keyword_condition(keywords: &[String]) -> Value {
    let pattern = keywords
        .iter()
        .map(|keyword| regex::escape(keyword))
        .collect::<Vec<_>>()
        .join("|");
    json!({ "$regex": format!("(?i){pattern}") })
}

fn either_matches(left: &str, right: &str, keywords: &[String]) -> Document {
    let keyword = keyword_condition(keywords);
    doc(
        "$or",
        Value::Array(vec![
            Value::Object(doc(left, keyword.clone())),
            Value::Object(doc(right, keyword)),
        ]),
    )
}

fn self_search(resource_type: IamResourceType, keywords: &[String]) -> Document {
    either_matches(resource_type.id_field(), resource_type.name_field(), keywords)
}

fn display(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_id(resource_type: IamResourceType, id: &str) -> Option<Value> {
    match resource_type.id_kind() {
        IdKind::Str => Some(Value::String(id.to_string())),
        IdKind::Int => id.parse::<i64>().ok().map(Value::from),
    }
}

fn id_name_fields(resource_type: IamResourceType) -> Vec<String> {
    vec![
        resource_type.id_field().to_string(),
        resource_type.name_field().to_string(),
    ]
}

fn collection(resource_type: IamResourceType) -> ListResult<&'static str> {
    resource_type
        .collection()
        .ok_or_else(|| ListError::UnsupportedType(resource_type.to_string()))
}

/// Relation field holding the id of a host ancestor.
fn relation_field(resource_type: IamResourceType) -> Option<&'static str> {
    match resource_type {
        IamResourceType::Business | IamResourceType::BusinessForHostTrans => {
            Some(BUSINESS_ID_FIELD)
        }
        IamResourceType::Set => Some(SET_ID_FIELD),
        IamResourceType::Module
        | IamResourceType::SysHostRscPoolDirectory
        | IamResourceType::SysResourcePoolDirectory => Some(MODULE_ID_FIELD),
        _ => None,
    }
}

fn host_ids_of(relations: &[Document]) -> BTreeSet<i64> {
    relations
        .iter()
        .filter_map(|relation| relation.get(HOST_ID_FIELD).and_then(Value::as_i64))
        .collect()
}

fn chain_types(chain: &[ChainEntry]) -> Vec<IamResourceType> {
    chain
        .iter()
        .filter_map(|entry| entry.id.parse::<IamResourceType>().ok())
        .collect()
}

fn decode<T>(filter: &Value) -> ListResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(filter.clone()).map_err(|err| ListError::InvalidFilter(err.to_string()))
}

fn encode<T>(value: &T) -> ListResult<Value>
where
    T: Serialize,
{
    serde_json::to_value(value).map_err(ListError::Encode)
}

/// Ancestor id to display name, per ancestor type.
type AncestorNames = HashMap<IamResourceType, HashMap<String, String>>;

#[derive(Clone)]
pub struct InstanceLister {
    store: Arc<dyn ResourceStore>,
    models: Arc<ModelCache>,
    max_page_size: u64,
}

impl InstanceLister {
    pub fn new(store: Arc<dyn ResourceStore>, models: Arc<ModelCache>, max_page_size: u64) -> Self {
        Self {
            store,
            models,
            max_page_size,
        }
    }

    /// Dispatch one pull-resource request and encode its answer.
    ///
    /// # Errors
    /// - [`ListError::UnsupportedType`] / [`ListError::UnsupportedMethod`] for
    ///   unknown types and methods a type does not offer.
    /// - [`ListError::InvalidFilter`] / [`ListError::InvalidPage`] for malformed input.
    /// - [`ListError::Store`] when the store fails.
    pub async fn pull(&self, request: &PullResourceRequest) -> ListResult<Value> {
        let resource_type = request
            .resource_type
            .parse::<IamResourceType>()
            .map_err(|_| ListError::UnsupportedType(request.resource_type.clone()))?;
        let method =
            PullMethod::parse(&request.method).ok_or_else(|| ListError::UnsupportedMethod {
                resource_type: request.resource_type.clone(),
                method: request.method.clone(),
            })?;

        match method {
            PullMethod::ListAttr => encode(&self.list_attr(resource_type).await?),
            PullMethod::ListAttrValue => {
                let filter: ListAttrValueFilter = decode(&request.filter)?;
                encode(
                    &self
                        .list_attr_value(resource_type, &filter, request.page)
                        .await?,
                )
            }
            PullMethod::ListInstance => {
                let filter: Option<ListInstanceFilter> = if request.filter.is_null() {
                    None
                } else {
                    Some(decode(&request.filter)?)
                };
                encode(
                    &self
                        .list_instance(resource_type, filter.as_ref(), request.page)
                        .await?,
                )
            }
            PullMethod::FetchInstanceInfo => {
                let filter: FetchInstanceInfoFilter = decode(&request.filter)?;
                encode(&self.fetch_instance_info(resource_type, &filter).await?)
            }
            PullMethod::ListInstanceByPolicy => {
                let filter: ListInstanceByPolicyFilter = decode(&request.filter)?;
                encode(
                    &self
                        .list_instance_by_policy(resource_type, &filter, request.page)
                        .await?,
                )
            }
        }
    }

    fn check_page(&self, page: Page) -> ListResult<()> {
        if page.limit == 0 || page.limit > self.max_page_size {
            return Err(ListError::InvalidPage {
                limit: page.limit,
                max: self.max_page_size,
            });
        }
        Ok(())
    }

    async fn plan(&self, resource_type: IamResourceType) -> ListResult<TypePlan> {
        use IamResourceType as T;

        let (scope, extra, object_id) = match resource_type {
            T::Host => (Scope::Host, Document::new(), Some("host".to_string())),
            T::Business | T::BusinessForHostTrans => (
                Scope::System,
                doc("default", json!({ "$ne": 1 })),
                Some("biz".to_string()),
            ),
            T::SysCloudArea => (
                Scope::System,
                doc("bk_cloud_id", json!({ "$ne": 0 })),
                Some("plat".to_string()),
            ),
            T::BizCustomQuery | T::BizProcessServiceTemplate | T::BizSetTemplate => {
                (Scope::Business, Document::new(), None)
            }
            T::SysModelGroup
            | T::SysCloudAccount
            | T::SysCloudResourceTask
            | T::InstAsstEvent
            | T::BizSet => (Scope::System, Document::new(), None),
            T::SysModel | T::SysInstanceModel | T::SysModelEvent | T::MainlineModelEvent => {
                (Scope::System, self.model_scope(resource_type).await?, None)
            }
            T::SysAssociationType => (Scope::System, doc("ispre", json!({ "$ne": true })), None),
            T::SysResourcePoolDirectory | T::SysHostRscPoolDirectory => (
                Scope::System,
                doc(BUSINESS_ID_FIELD, self.resource_pool_business().await?),
                None,
            ),
            T::SysInstance(model_id) => {
                let obj_id = self
                    .models
                    .obj_id(model_id, self.store.as_ref())
                    .await
                    .map_err(|err| match err {
                        StoreError::NotFound(_) => {
                            ListError::UnsupportedType(resource_type.to_string())
                        }
                        other => ListError::Store(other),
                    })?;
                (
                    Scope::Model,
                    doc(OBJECT_ID_FIELD, Value::String(obj_id.clone())),
                    Some(obj_id),
                )
            }
            other => return Err(ListError::UnsupportedType(other.to_string())),
        };
        Ok(TypePlan {
            scope,
            extra,
            object_id,
        })
    }

    async fn mainline_objects(&self) -> ListResult<Vec<Value>> {
        let condition = doc(
            ASSOCIATION_KIND_FIELD,
            Value::String(MAINLINE_ASSOCIATION.to_string()),
        );
        let objects = self
            .store
            .distinct(ASSOCIATION_COLLECTION, OBJECT_ID_FIELD, &condition)
            .await?;
        Ok(objects
            .into_iter()
            .filter(|object| {
                object
                    .as_str()
                    .is_some_and(|object| !INNER_OBJECTS.contains(&object))
            })
            .collect())
    }

    async fn model_scope(&self, resource_type: IamResourceType) -> ListResult<Document> {
        let mut excluded: Vec<Value> = UNLISTED_OBJECTS.iter().map(|id| Value::from(*id)).collect();
        let condition = match resource_type {
            IamResourceType::SysModelEvent | IamResourceType::SysInstanceModel => {
                excluded.extend(INNER_OBJECTS.iter().map(|id| Value::from(*id)));
                excluded.extend(self.mainline_objects().await?);
                json!({ "$nin": excluded })
            }
            IamResourceType::MainlineModelEvent => json!({ "$in": self.mainline_objects().await? }),
            _ => json!({ "$nin": excluded }),
        };
        Ok(doc(OBJECT_ID_FIELD, condition))
    }

    async fn resource_pool_business(&self) -> ListResult<Value> {
        let found = self
            .store
            .find(
                collection(IamResourceType::Business)?,
                &doc("default", json!(1)),
                &[BUSINESS_ID_FIELD.to_string()],
                Page {
                    limit: 1,
                    offset: 0,
                },
            )
            .await?;
        found
            .rows
            .first()
            .and_then(|row| row.get(BUSINESS_ID_FIELD))
            .cloned()
            .ok_or_else(|| StoreError::NotFound("resource pool business".to_string()).into())
    }

    pub async fn list_attr(&self, resource_type: IamResourceType) -> ListResult<Vec<AttrResource>> {
        let plan = self.plan(resource_type).await?;
        let object_id = plan.object_id.ok_or_else(|| ListError::UnsupportedMethod {
            resource_type: resource_type.to_string(),
            method: PullMethod::ListAttr.as_str().to_string(),
        })?;
        let condition = and_all(vec![
            doc(OBJECT_ID_FIELD, Value::String(object_id)),
            doc("bk_isapi", json!({ "$ne": true })),
        ]);
        let found = self
            .store
            .find(
                MODEL_ATTRIBUTE_COLLECTION,
                &condition,
                &["bk_property_id".to_string(), "bk_property_name".to_string()],
                Page::all(),
            )
            .await?;
        Ok(found
            .rows
            .iter()
            .map(|row| AttrResource {
                id: display(row.get("bk_property_id")),
                display_name: display(row.get("bk_property_name")),
            })
            .collect())
    }

    pub async fn list_attr_value(
        &self,
        resource_type: IamResourceType,
        filter: &ListAttrValueFilter,
        page: Page,
    ) -> ListResult<ListAttrValueResult> {
        self.check_page(page)?;
        let plan = self.plan(resource_type).await?;
        if plan.object_id.is_none() {
            return Err(ListError::UnsupportedMethod {
                resource_type: resource_type.to_string(),
                method: PullMethod::ListAttrValue.as_str().to_string(),
            });
        }
        if filter.attr.is_empty() {
            return Err(ListError::InvalidFilter("attr is required".to_string()));
        }

        let mut parts = vec![plan.extra];
        if !filter.keyword.is_empty() {
            parts.push(doc(
                &filter.attr,
                keyword_condition(std::slice::from_ref(&filter.keyword)),
            ));
        }
        if !filter.ids.is_empty() {
            parts.push(doc(&filter.attr, json!({ "$in": filter.ids })));
        }
        let values = self
            .store
            .distinct(collection(resource_type)?, &filter.attr, &and_all(parts))
            .await?;

        let count = values.len() as u64;
        let results = values
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|value| AttrValue {
                display_name: display(Some(&value)),
                id: value,
            })
            .collect();
        Ok(ListAttrValueResult { count, results })
    }

    pub async fn list_instance(
        &self,
        resource_type: IamResourceType,
        filter: Option<&ListInstanceFilter>,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        self.check_page(page)?;
        let plan = self.plan(resource_type).await?;
        let unfiltered = ListInstanceFilter::default();
        let filter = filter.unwrap_or(&unfiltered);
        match plan.scope {
            Scope::System => self.list_system(resource_type, plan.extra, filter, page).await,
            Scope::Business => {
                self.list_business(resource_type, plan.extra, filter, page)
                    .await
            }
            Scope::Model => self.list_model(resource_type, plan.extra, filter, page).await,
            Scope::Host => self.list_host(resource_type, filter, page).await,
        }
    }

    async fn page_of(
        &self,
        resource_type: IamResourceType,
        condition: &Document,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        let found = self
            .store
            .find(
                collection(resource_type)?,
                condition,
                &id_name_fields(resource_type),
                page,
            )
            .await?;
        Ok(ListInstanceResult {
            count: found.count,
            results: found
                .rows
                .iter()
                .map(|row| InstanceResource {
                    id: display(row.get(resource_type.id_field())),
                    display_name: display(row.get(resource_type.name_field())),
                    path: Vec::new(),
                })
                .collect(),
        })
    }

    async fn full_page(
        &self,
        resource_type: IamResourceType,
        condition: &Document,
        page: Page,
    ) -> ListResult<FindResult> {
        Ok(self
            .store
            .find(collection(resource_type)?, condition, &[], page)
            .await?)
    }

    /// Fill `names` with the display names of `ids` not yet known.
    async fn resolve_names(
        &self,
        resource_type: IamResourceType,
        ids: BTreeSet<String>,
        names: &mut HashMap<String, String>,
    ) -> ListResult<()> {
        let values: Vec<Value> = ids
            .iter()
            .filter(|id| !names.contains_key(*id))
            .filter_map(|id| parse_id(resource_type, id))
            .collect();
        let Some(collection) = resource_type.collection() else {
            return Ok(());
        };
        if values.is_empty() {
            return Ok(());
        }
        let found = self
            .store
            .find(
                collection,
                &doc(resource_type.id_field(), json!({ "$in": values })),
                &id_name_fields(resource_type),
                Page::all(),
            )
            .await?;
        for row in &found.rows {
            names.insert(
                display(row.get(resource_type.id_field())),
                display(row.get(resource_type.name_field())),
            );
        }
        Ok(())
    }

    /// Rows of `ancestor` matching `keywords`, recorded into `names`.
    async fn search_ancestor(
        &self,
        ancestor: IamResourceType,
        keywords: &[String],
        names: &mut HashMap<String, String>,
    ) -> ListResult<Vec<Value>> {
        let Some(collection) = ancestor.collection() else {
            return Ok(Vec::new());
        };
        let found = self
            .store
            .find(
                collection,
                &self_search(ancestor, keywords),
                &id_name_fields(ancestor),
                Page::all(),
            )
            .await?;
        let mut ids = Vec::new();
        for row in &found.rows {
            if let Some(id) = row.get(ancestor.id_field()) {
                names.insert(display(Some(id)), display(row.get(ancestor.name_field())));
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    async fn list_system(
        &self,
        resource_type: IamResourceType,
        extra: Document,
        filter: &ListInstanceFilter,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        if filter.parent.is_some() || !filter.resource_type_chain.is_empty() {
            return Ok(ListInstanceResult::empty());
        }
        let mut parts = vec![extra];
        for (search_type, keywords) in &filter.search {
            if *search_type != resource_type.to_string() {
                return Ok(ListInstanceResult::empty());
            }
            parts.push(self_search(resource_type, keywords));
        }
        self.page_of(resource_type, &and_all(parts), page).await
    }

    async fn list_business(
        &self,
        resource_type: IamResourceType,
        extra: Document,
        filter: &ListInstanceFilter,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        let mut parts = vec![extra];
        if let Some(parent) = &filter.parent {
            let Ok(parent_type) = parent.resource_type.parse::<IamResourceType>() else {
                return Ok(ListInstanceResult::empty());
            };
            let Some(parent_id) = parse_id(parent_type, &parent.id) else {
                return Ok(ListInstanceResult::empty());
            };
            parts.push(doc(parent_type.id_field(), parent_id));
        }

        let mut ancestors = AncestorNames::new();
        for (search_type, keywords) in &filter.search {
            if *search_type == resource_type.to_string() {
                parts.push(self_search(resource_type, keywords));
                continue;
            }
            let Ok(ancestor) = search_type.parse::<IamResourceType>() else {
                return Ok(ListInstanceResult::empty());
            };
            let ids = self
                .search_ancestor(ancestor, keywords, ancestors.entry(ancestor).or_default())
                .await?;
            if ids.is_empty() {
                return Ok(ListInstanceResult::empty());
            }
            parts.push(doc(ancestor.id_field(), json!({ "$in": ids })));
        }

        let condition = and_all(parts);
        if filter.resource_type_chain.is_empty() {
            return self.page_of(resource_type, &condition, page).await;
        }

        let found = self.full_page(resource_type, &condition, page).await?;
        let chain = chain_types(&filter.resource_type_chain);
        for ancestor in &chain {
            let ids = found
                .rows
                .iter()
                .map(|row| display(row.get(ancestor.id_field())))
                .filter(|id| !id.is_empty())
                .collect();
            self.resolve_names(*ancestor, ids, ancestors.entry(*ancestor).or_default())
                .await?;
        }

        let results = found
            .rows
            .iter()
            .map(|row| InstanceResource {
                id: display(row.get(resource_type.id_field())),
                display_name: display(row.get(resource_type.name_field())),
                path: chain
                    .iter()
                    .map(|ancestor| {
                        let id = display(row.get(ancestor.id_field()));
                        InstancePath {
                            resource_type: ancestor.to_string(),
                            display_name: ancestors
                                .get(ancestor)
                                .and_then(|names| names.get(&id))
                                .cloned()
                                .unwrap_or_default(),
                            id,
                        }
                    })
                    .collect(),
            })
            .collect();
        Ok(ListInstanceResult {
            count: found.count,
            results,
        })
    }

    async fn list_model(
        &self,
        resource_type: IamResourceType,
        extra: Document,
        filter: &ListInstanceFilter,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        let sys_model = IamResourceType::SysModel.to_string();
        let mut parts = vec![extra];
        if let Some(parent) = &filter.parent {
            if parent.resource_type != sys_model {
                return Ok(ListInstanceResult::empty());
            }
            parts.push(doc(OBJECT_ID_FIELD, Value::String(parent.id.clone())));
        }

        // Models are keyed by object id here, not by their numeric id.
        let mut models: HashMap<String, String> = HashMap::new();
        for (search_type, keywords) in &filter.search {
            if *search_type == resource_type.to_string() {
                parts.push(self_search(resource_type, keywords));
                continue;
            }
            if *search_type != sys_model {
                return Ok(ListInstanceResult::empty());
            }
            let found = self
                .store
                .find(
                    MODEL_COLLECTION,
                    &either_matches(OBJECT_ID_FIELD, OBJECT_NAME_FIELD, keywords),
                    &[OBJECT_ID_FIELD.to_string(), OBJECT_NAME_FIELD.to_string()],
                    Page::all(),
                )
                .await?;
            let mut obj_ids = Vec::new();
            for row in &found.rows {
                let obj_id = display(row.get(OBJECT_ID_FIELD));
                models.insert(obj_id.clone(), display(row.get(OBJECT_NAME_FIELD)));
                obj_ids.push(obj_id);
            }
            if obj_ids.is_empty() {
                return Ok(ListInstanceResult::empty());
            }
            parts.push(doc(OBJECT_ID_FIELD, json!({ "$in": obj_ids })));
        }

        let condition = and_all(parts);
        if filter.resource_type_chain.is_empty() {
            return self.page_of(resource_type, &condition, page).await;
        }

        let found = self.full_page(resource_type, &condition, page).await?;
        let with_model = filter
            .resource_type_chain
            .iter()
            .any(|entry| entry.id == sys_model);
        if with_model {
            let missing: Vec<String> = found
                .rows
                .iter()
                .map(|row| display(row.get(OBJECT_ID_FIELD)))
                .filter(|obj_id| !obj_id.is_empty() && !models.contains_key(obj_id))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !missing.is_empty() {
                let found = self
                    .store
                    .find(
                        MODEL_COLLECTION,
                        &doc(OBJECT_ID_FIELD, json!({ "$in": missing })),
                        &[OBJECT_ID_FIELD.to_string(), OBJECT_NAME_FIELD.to_string()],
                        Page::all(),
                    )
                    .await?;
                for row in &found.rows {
                    models.insert(
                        display(row.get(OBJECT_ID_FIELD)),
                        display(row.get(OBJECT_NAME_FIELD)),
                    );
                }
            }
        }

        let results = found
            .rows
            .iter()
            .map(|row| {
                let obj_id = display(row.get(OBJECT_ID_FIELD));
                let path = if with_model {
                    vec![InstancePath {
                        resource_type: sys_model.clone(),
                        display_name: models.get(&obj_id).cloned().unwrap_or_default(),
                        id: obj_id,
                    }]
                } else {
                    Vec::new()
                };
                InstanceResource {
                    id: display(row.get(resource_type.id_field())),
                    display_name: display(row.get(resource_type.name_field())),
                    path,
                }
            })
            .collect();
        Ok(ListInstanceResult {
            count: found.count,
            results,
        })
    }

    async fn list_host(
        &self,
        resource_type: IamResourceType,
        filter: &ListInstanceFilter,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        // `None` leaves the host set unconstrained.
        let mut host_ids: Option<BTreeSet<i64>> = None;
        if let Some(parent) = &filter.parent {
            let field = parent
                .resource_type
                .parse::<IamResourceType>()
                .ok()
                .and_then(relation_field);
            let (Some(field), Ok(parent_id)) = (field, parent.id.parse::<i64>()) else {
                return Ok(ListInstanceResult::empty());
            };
            let matched = host_ids_of(&self.relations(&doc(field, json!(parent_id))).await?);
            if matched.is_empty() {
                return Ok(ListInstanceResult::empty());
            }
            host_ids = Some(matched);
        }

        let mut parts = Vec::new();
        let mut ancestors = AncestorNames::new();
        for (search_type, keywords) in &filter.search {
            if *search_type == resource_type.to_string() {
                parts.push(self_search(resource_type, keywords));
                continue;
            }
            let Some((ancestor, field)) = search_type
                .parse::<IamResourceType>()
                .ok()
                .and_then(|ancestor| relation_field(ancestor).map(|field| (ancestor, field)))
            else {
                return Ok(ListInstanceResult::empty());
            };
            let ids: BTreeSet<i64> = self
                .search_ancestor(ancestor, keywords, ancestors.entry(ancestor).or_default())
                .await?
                .iter()
                .filter_map(Value::as_i64)
                .collect();
            if ids.is_empty() {
                return Ok(ListInstanceResult::empty());
            }
            let matched =
                host_ids_of(&self.relations(&doc(field, json!({ "$in": ids }))).await?);
            let narrowed: BTreeSet<i64> = match host_ids {
                None => matched,
                Some(current) => current.intersection(&matched).copied().collect(),
            };
            if narrowed.is_empty() {
                return Ok(ListInstanceResult::empty());
            }
            host_ids = Some(narrowed);
        }
        if let Some(ids) = &host_ids {
            parts.push(doc(HOST_ID_FIELD, json!({ "$in": ids })));
        }

        let condition = and_all(parts);
        if filter.resource_type_chain.is_empty() {
            return self.page_of(resource_type, &condition, page).await;
        }

        let found = self.full_page(resource_type, &condition, page).await?;
        let page_hosts: Vec<i64> = found
            .rows
            .iter()
            .filter_map(|row| row.get(HOST_ID_FIELD).and_then(Value::as_i64))
            .collect();
        let relations = self
            .relations(&doc(HOST_ID_FIELD, json!({ "$in": page_hosts })))
            .await?;
        let mut by_host: HashMap<i64, &Document> = HashMap::new();
        for relation in &relations {
            if let Some(host_id) = relation.get(HOST_ID_FIELD).and_then(Value::as_i64) {
                by_host.entry(host_id).or_insert(relation);
            }
        }
        let host_relation = |row: &Document| {
            row.get(HOST_ID_FIELD)
                .and_then(Value::as_i64)
                .and_then(|host_id| by_host.get(&host_id).copied())
        };

        let chain: Vec<(IamResourceType, &'static str)> = chain_types(&filter.resource_type_chain)
            .into_iter()
            .filter_map(|ancestor| relation_field(ancestor).map(|field| (ancestor, field)))
            .collect();
        for (ancestor, field) in &chain {
            let ids = found
                .rows
                .iter()
                .filter_map(|row| host_relation(row))
                .map(|relation| display(relation.get(*field)))
                .filter(|id| !id.is_empty())
                .collect();
            self.resolve_names(*ancestor, ids, ancestors.entry(*ancestor).or_default())
                .await?;
        }

        let results = found
            .rows
            .iter()
            .map(|row| {
                let relation = host_relation(row);
                InstanceResource {
                    id: display(row.get(resource_type.id_field())),
                    display_name: display(row.get(resource_type.name_field())),
                    path: chain
                        .iter()
                        .map(|(ancestor, field)| {
                            let id = display(relation.and_then(|relation| relation.get(*field)));
                            InstancePath {
                                resource_type: ancestor.to_string(),
                                display_name: ancestors
                                    .get(ancestor)
                                    .and_then(|names| names.get(&id))
                                    .cloned()
                                    .unwrap_or_default(),
                                id,
                            }
                        })
                        .collect(),
                }
            })
            .collect();
        Ok(ListInstanceResult {
            count: found.count,
            results,
        })
    }

    /// Module-host relation rows matching `condition`.
    async fn relations(&self, condition: &Document) -> ListResult<Vec<Document>> {
        Ok(self
            .store
            .find(MODULE_HOST_RELATION_COLLECTION, condition, &[], Page::all())
            .await?
            .rows)
    }

    /// Topology paths per host id, one per module the host belongs to.
    async fn host_paths(&self, rows: &[Document]) -> ListResult<HashMap<String, Vec<String>>> {
        let host_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get(HOST_ID_FIELD).and_then(Value::as_i64))
            .collect();
        let found = self
            .store
            .find(
                MODULE_HOST_RELATION_COLLECTION,
                &doc(HOST_ID_FIELD, json!({ "$in": host_ids })),
                &[],
                Page::all(),
            )
            .await?;
        let mut paths: HashMap<String, Vec<String>> = HashMap::new();
        for relation in &found.rows {
            let path = format!(
                "/{},{}/{},{}/{},{}/",
                IamResourceType::Business,
                display(relation.get(BUSINESS_ID_FIELD)),
                IamResourceType::Set,
                display(relation.get(SET_ID_FIELD)),
                IamResourceType::Module,
                display(relation.get(MODULE_ID_FIELD)),
            );
            paths
                .entry(display(relation.get(HOST_ID_FIELD)))
                .or_default()
                .push(path);
        }
        Ok(paths)
    }

    /// Instances by id with `id`, `display_name` and the requested attributes.
    pub async fn fetch_instance_info(
        &self,
        resource_type: IamResourceType,
        filter: &FetchInstanceInfoFilter,
    ) -> ListResult<Vec<Document>> {
        let plan = self.plan(resource_type).await?;
        let ids: Vec<Value> = filter
            .ids
            .iter()
            .filter_map(|id| parse_id(resource_type, id))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let condition = and_all(vec![
            plan.extra,
            doc(resource_type.id_field(), json!({ "$in": ids })),
        ]);
        let found = self.full_page(resource_type, &condition, Page::all()).await?;
        let wants_path = filter.attrs.iter().any(|attr| attr == IAM_PATH_KEY);
        let host_paths = if wants_path && resource_type == IamResourceType::Host {
            self.host_paths(&found.rows).await?
        } else {
            HashMap::new()
        };

        let mut results = Vec::with_capacity(found.rows.len());
        for row in &found.rows {
            let id = display(row.get(resource_type.id_field()));
            let mut info = Document::new();
            info.insert("id".to_string(), Value::String(id.clone()));
            info.insert(
                "display_name".to_string(),
                Value::String(display(row.get(resource_type.name_field()))),
            );
            for attr in &filter.attrs {
                match attr.as_str() {
                    "id" | "display_name" => {}
                    IAM_PATH_KEY => {
                        let paths = match resource_type {
                            IamResourceType::Host => host_paths.get(&id).cloned().unwrap_or_default(),
                            IamResourceType::SysInstance(model_id) => vec![format!(
                                "/{},{model_id}/",
                                IamResourceType::SysInstanceModel
                            )],
                            other if other.is_business_scoped() => row
                                .get(BUSINESS_ID_FIELD)
                                .and_then(Value::as_i64)
                                .map(|business_id| vec![business_path(business_id)])
                                .unwrap_or_default(),
                            _ => Vec::new(),
                        };
                        info.insert(IAM_PATH_KEY.to_string(), json!(paths));
                    }
                    other => {
                        if let Some(value) = row.get(other) {
                            info.insert(other.to_string(), value.clone());
                        }
                    }
                }
            }
            results.push(info);
        }
        Ok(results)
    }

    /// Instances of `resource_type` the policy expression allows.
    pub async fn list_instance_by_policy(
        &self,
        resource_type: IamResourceType,
        filter: &ListInstanceByPolicyFilter,
        page: Page,
    ) -> ListResult<ListInstanceResult> {
        self.check_page(page)?;
        let plan = self.plan(resource_type).await?;
        let relations = StoreHostRelations::new(self.store.clone());
        let compiled = PolicyCompiler::new(&relations)
            .compile(&filter.expression, resource_type)
            .await?;
        let Some(policy_condition) = compiled.to_document() else {
            return Ok(ListInstanceResult::empty());
        };
        self.page_of(
            resource_type,
            &and_all(vec![plan.extra, policy_condition]),
            page,
        )
        .await
    }
}
