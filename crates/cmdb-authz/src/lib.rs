//! CMDB to IAM authorization primitives shared by the auth server.
//!
//! # Purpose
//! Holds the resource vocabulary of both systems, the conversion tables
//! between them, the resource mapper used for access checks, the policy
//! model and its compiler into storage queries, and the catalog model used
//! to keep IAM's registered types and actions in step with CMDB models.
//!
//! # How it fits
//! The auth server maps every incoming check through [`ResourceMapper`],
//! compiles IAM policies with [`PolicyCompiler`] when listing instances, and
//! diffs [`desired_catalog`] against IAM with [`CatalogDiff`] during
//! reconciliation. Only the host path lookup reaches outside this crate, via
//! [`HostRelationSource`].
//!
//! # Key invariants
//! - Per-model types and actions use the `comobj_<model id>` convention.
//! - A compiled condition is `Unconstrained`, `MatchAll` or a non-empty filter;
//!   the three are never conflated.
//! - Catalog removal is restricted to per-model entries.
//!
//! # Examples
//! ```rust
//! use cmdb_authz::{CmdbAction, CmdbResourceType, IamAction, ResourceAttribute, ResourceMapper};
//!
//! let mapper = ResourceMapper::new("bk_cmdb");
//! let attr = ResourceAttribute::new(CmdbResourceType::Business, CmdbAction::Update)
//!     .with_instance(3);
//! let (action, resources) = mapper.adapt(&attr).expect("mapped");
//! assert_eq!(action, IamAction::EditBusiness);
//! assert_eq!(resources[0].id, "3");
//! ```
//!
//! # Common pitfalls
//! - Treating `Unconstrained` as "match everything" widens access; listing
//!   callers must return an empty page for it.
//! - Transfer actions need exactly two layers in their resource attribute.

mod action;
mod catalog;
mod cmdb;
mod compiler;
mod condition;
mod convert;
mod errors;
mod mapper;
mod policy;
mod resource;

pub use action::{IamAction, SysInstanceOp};
pub use catalog::{
    ActionGroup, ActionRef, CatalogDiff, CatalogRemoval, DesiredCatalog,
    InstanceSelectionEntry, MODEL_INSTANCE_GROUP_NAME, MODEL_INSTANCE_GROUP_NAME_EN,
    ModelObject, PROVIDER_PATH, ProviderConfig, RegisteredCatalog, RelatedResourceType,
    ResourceActionEntry, ResourceTypeEntry, SystemRef, desired_action_groups, desired_catalog,
    model_action_group, prune_action_groups,
};
pub use cmdb::{CmdbAction, CmdbResourceType, Layer, ResourceAttribute, SYS_INSTANCE_PREFIX};
pub use compiler::{HostRelationSource, PathSegment, PolicyCompiler, parse_iam_path};
pub use condition::StorageCondition;
pub use convert::{convert_resource_action, convert_resource_type};
pub use errors::{AuthzError, AuthzResult};
pub use mapper::{IAM_PATH_KEY, IamResource, ResourceMapper, business_path};
pub use policy::{FieldRef, FieldValue, Operator, Policy};
pub use resource::{
    BUSINESS_ID_FIELD, HOST_ID_FIELD, IamResourceType, IdKind, MODEL_ATTRIBUTE_COLLECTION,
    MODEL_COLLECTION, MODULE_HOST_RELATION_COLLECTION, OBJECT_ID_FIELD, is_dynamic_id,
    is_dynamic_type_id, model_id_from_sys_instance,
};
