//! CMDB-side vocabulary: resource types, actions and the per-check resource attribute.
//!
//! # Purpose
//! Names every CMDB resource/action tag a calling subsystem can hand to the
//! authorizer. Both axes are closed enums so conversion tables are checked for
//! exhaustiveness at compile time.
//!
//! # Notes
//! Per-model instance types are not enumerable; they follow the
//! `comobj_<model id>` naming convention and are carried as
//! [`CmdbResourceType::SysInstance`].
use crate::errors::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Prefix shared by CMDB and IAM for per-model instance types.
pub const SYS_INSTANCE_PREFIX: &str = "comobj_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CmdbResourceType {
    Business,
    BizSet,
    Model,
    ModelModule,
    ModelSet,
    MainlineInstance,
    MainlineInstanceTopology,
    MainlineModel,
    ModelTopology,
    ModelClassification,
    AssociationType,
    ModelAssociation,
    MainlineModelTopology,
    ModelInstanceTopology,
    ModelAttribute,
    ModelAttributeGroup,
    ModelUnique,
    CloudAreaInstance,
    HostInstance,
    HostFavorite,
    Process,
    DynamicGrouping,
    AuditLog,
    SystemBase,
    UserCustom,
    NetDataCollector,
    ProcessServiceTemplate,
    ProcessServiceCategory,
    ProcessServiceInstance,
    ProcessTemplate,
    BizTopology,
    SetTemplate,
    OperationStatistic,
    HostApply,
    ResourcePoolDirectory,
    CloudAccount,
    CloudResourceTask,
    EventWatch,
    ConfigAdmin,
    SystemConfig,
    /// Instances of one custom model, keyed by model id.
    SysInstance(i64),
}

const STATIC_RESOURCE_TYPES: &[CmdbResourceType] = &[
    CmdbResourceType::Business,
    CmdbResourceType::BizSet,
    CmdbResourceType::Model,
    CmdbResourceType::ModelModule,
    CmdbResourceType::ModelSet,
    CmdbResourceType::MainlineInstance,
    CmdbResourceType::MainlineInstanceTopology,
    CmdbResourceType::MainlineModel,
    CmdbResourceType::ModelTopology,
    CmdbResourceType::ModelClassification,
    CmdbResourceType::AssociationType,
    CmdbResourceType::ModelAssociation,
    CmdbResourceType::MainlineModelTopology,
    CmdbResourceType::ModelInstanceTopology,
    CmdbResourceType::ModelAttribute,
    CmdbResourceType::ModelAttributeGroup,
    CmdbResourceType::ModelUnique,
    CmdbResourceType::CloudAreaInstance,
    CmdbResourceType::HostInstance,
    CmdbResourceType::HostFavorite,
    CmdbResourceType::Process,
    CmdbResourceType::DynamicGrouping,
    CmdbResourceType::AuditLog,
    CmdbResourceType::SystemBase,
    CmdbResourceType::UserCustom,
    CmdbResourceType::NetDataCollector,
    CmdbResourceType::ProcessServiceTemplate,
    CmdbResourceType::ProcessServiceCategory,
    CmdbResourceType::ProcessServiceInstance,
    CmdbResourceType::ProcessTemplate,
    CmdbResourceType::BizTopology,
    CmdbResourceType::SetTemplate,
    CmdbResourceType::OperationStatistic,
    CmdbResourceType::HostApply,
    CmdbResourceType::ResourcePoolDirectory,
    CmdbResourceType::CloudAccount,
    CmdbResourceType::CloudResourceTask,
    CmdbResourceType::EventWatch,
    CmdbResourceType::ConfigAdmin,
    CmdbResourceType::SystemConfig,
];

impl CmdbResourceType {
    fn static_str(self) -> Option<&'static str> {
        let name = match self {
            CmdbResourceType::Business => "business",
            CmdbResourceType::BizSet => "biz_set",
            CmdbResourceType::Model => "model",
            CmdbResourceType::ModelModule => "model_module",
            CmdbResourceType::ModelSet => "model_set",
            CmdbResourceType::MainlineInstance => "mainline_instance",
            CmdbResourceType::MainlineInstanceTopology => "mainline_instance_topology",
            CmdbResourceType::MainlineModel => "mainline_model",
            CmdbResourceType::ModelTopology => "model_topology",
            CmdbResourceType::ModelClassification => "model_classification",
            CmdbResourceType::AssociationType => "association_type",
            CmdbResourceType::ModelAssociation => "model_association",
            CmdbResourceType::MainlineModelTopology => "mainline_model_topology",
            CmdbResourceType::ModelInstanceTopology => "model_instance_topology",
            CmdbResourceType::ModelAttribute => "model_attribute",
            CmdbResourceType::ModelAttributeGroup => "model_attribute_group",
            CmdbResourceType::ModelUnique => "model_unique",
            CmdbResourceType::CloudAreaInstance => "cloud_area_instance",
            CmdbResourceType::HostInstance => "host_instance",
            CmdbResourceType::HostFavorite => "host_favorite",
            CmdbResourceType::Process => "process",
            CmdbResourceType::DynamicGrouping => "dynamic_grouping",
            CmdbResourceType::AuditLog => "audit_log",
            CmdbResourceType::SystemBase => "system_base",
            CmdbResourceType::UserCustom => "user_custom",
            CmdbResourceType::NetDataCollector => "net_data_collector",
            CmdbResourceType::ProcessServiceTemplate => "process_service_template",
            CmdbResourceType::ProcessServiceCategory => "process_service_category",
            CmdbResourceType::ProcessServiceInstance => "process_service_instance",
            CmdbResourceType::ProcessTemplate => "process_template",
            CmdbResourceType::BizTopology => "biz_topology",
            CmdbResourceType::SetTemplate => "set_template",
            CmdbResourceType::OperationStatistic => "operation_statistic",
            CmdbResourceType::HostApply => "host_apply",
            CmdbResourceType::ResourcePoolDirectory => "resource_pool_directory",
            CmdbResourceType::CloudAccount => "cloud_account",
            CmdbResourceType::CloudResourceTask => "cloud_resource_task",
            CmdbResourceType::EventWatch => "event_watch",
            CmdbResourceType::ConfigAdmin => "config_admin",
            CmdbResourceType::SystemConfig => "system_config",
            CmdbResourceType::SysInstance(_) => return None,
        };
        Some(name)
    }

    pub fn is_sys_instance(self) -> bool {
        matches!(self, CmdbResourceType::SysInstance(_))
    }
}

impl std::fmt::Display for CmdbResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmdbResourceType::SysInstance(model_id) => {
                write!(f, "{SYS_INSTANCE_PREFIX}{model_id}")
            }
            other => f.write_str(other.static_str().unwrap_or_default()),
        }
    }
}

impl std::str::FromStr for CmdbResourceType {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(suffix) = value.strip_prefix(SYS_INSTANCE_PREFIX) {
            return suffix
                .parse::<i64>()
                .map(CmdbResourceType::SysInstance)
                .map_err(|_| AuthzError::InvalidSysInstance(value.to_string()));
        }
        STATIC_RESOURCE_TYPES
            .iter()
            .copied()
            .find(|candidate| candidate.static_str() == Some(value))
            .ok_or_else(|| AuthzError::UnsupportedResourceType(value.to_string()))
    }
}

impl TryFrom<String> for CmdbResourceType {
    type Error = AuthzError;

    fn try_from(value: String) -> AuthzResult<Self> {
        value.parse()
    }
}

impl From<CmdbResourceType> for String {
    fn from(value: CmdbResourceType) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdbAction {
    Create,
    CreateMany,
    Find,
    FindMany,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
    Archive,
    Execute,
    /// Pre-decided as authorized by the caller.
    #[serde(rename = "skip")]
    SkipAction,
    ViewBusinessResource,
    AccessBizSet,
    DefaultHostApply,
    MoveResPoolHostToBizIdleModule,
    MoveResPoolHostToDirectory,
    MoveBizHostFromModuleToResPool,
    AddHostToResourcePool,
    MoveHostToAnotherBizModule,
    ModelTopologyView,
    ModelTopologyOperation,
    WatchHost,
    WatchHostRelation,
    WatchBiz,
    WatchSet,
    WatchModule,
    WatchProcess,
    WatchCommonInstance,
    WatchMainlineInstance,
    WatchInstAsst,
    WatchBizSet,
}

impl CmdbAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CmdbAction::Create => "create",
            CmdbAction::CreateMany => "create_many",
            CmdbAction::Find => "find",
            CmdbAction::FindMany => "find_many",
            CmdbAction::Update => "update",
            CmdbAction::UpdateMany => "update_many",
            CmdbAction::Delete => "delete",
            CmdbAction::DeleteMany => "delete_many",
            CmdbAction::Archive => "archive",
            CmdbAction::Execute => "execute",
            CmdbAction::SkipAction => "skip",
            CmdbAction::ViewBusinessResource => "view_business_resource",
            CmdbAction::AccessBizSet => "access_biz_set",
            CmdbAction::DefaultHostApply => "default_host_apply",
            CmdbAction::MoveResPoolHostToBizIdleModule => "move_res_pool_host_to_biz_idle_module",
            CmdbAction::MoveResPoolHostToDirectory => "move_res_pool_host_to_directory",
            CmdbAction::MoveBizHostFromModuleToResPool => "move_biz_host_from_module_to_res_pool",
            CmdbAction::AddHostToResourcePool => "add_host_to_resource_pool",
            CmdbAction::MoveHostToAnotherBizModule => "move_host_to_another_biz_module",
            CmdbAction::ModelTopologyView => "model_topology_view",
            CmdbAction::ModelTopologyOperation => "model_topology_operation",
            CmdbAction::WatchHost => "watch_host",
            CmdbAction::WatchHostRelation => "watch_host_relation",
            CmdbAction::WatchBiz => "watch_biz",
            CmdbAction::WatchSet => "watch_set",
            CmdbAction::WatchModule => "watch_module",
            CmdbAction::WatchProcess => "watch_process",
            CmdbAction::WatchCommonInstance => "watch_common_instance",
            CmdbAction::WatchMainlineInstance => "watch_mainline_instance",
            CmdbAction::WatchInstAsst => "watch_inst_asst",
            CmdbAction::WatchBizSet => "watch_biz_set",
        }
    }

    /// Collapse the bulk variants onto their single-item action.
    pub fn canonical(self) -> Self {
        match self {
            CmdbAction::CreateMany => CmdbAction::Create,
            CmdbAction::FindMany => CmdbAction::Find,
            CmdbAction::DeleteMany => CmdbAction::Delete,
            CmdbAction::UpdateMany => CmdbAction::Update,
            other => other,
        }
    }
}

impl std::fmt::Display for CmdbAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ancestor of the checked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(rename = "type")]
    pub resource_type: CmdbResourceType,
    #[serde(default)]
    pub instance_id: i64,
}

/// A single access check as produced by a calling subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttribute {
    #[serde(rename = "type")]
    pub resource_type: CmdbResourceType,
    pub action: CmdbAction,
    /// `0` means global scope.
    #[serde(default)]
    pub business_id: i64,
    #[serde(default)]
    pub instance_id: i64,
    /// String-typed id for resources whose id is not numeric.
    #[serde(default)]
    pub instance_id_ex: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl ResourceAttribute {
    pub fn new(resource_type: CmdbResourceType, action: CmdbAction) -> Self {
        Self {
            resource_type,
            action,
            business_id: 0,
            instance_id: 0,
            instance_id_ex: String::new(),
            layers: Vec::new(),
        }
    }

    pub fn with_business(mut self, business_id: i64) -> Self {
        self.business_id = business_id;
        self
    }

    pub fn with_instance(mut self, instance_id: i64) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_layer(mut self, resource_type: CmdbResourceType, instance_id: i64) -> Self {
        self.layers.push(Layer {
            resource_type,
            instance_id,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_string_roundtrip() {
        for resource_type in STATIC_RESOURCE_TYPES.iter().copied() {
            let rendered = resource_type.to_string();
            assert_eq!(rendered.parse::<CmdbResourceType>().ok(), Some(resource_type));
        }
        let dynamic = CmdbResourceType::SysInstance(42);
        assert_eq!(dynamic.to_string(), "comobj_42");
        assert_eq!("comobj_42".parse::<CmdbResourceType>().ok(), Some(dynamic));
    }

    #[test]
    fn resource_type_rejects_unknown_and_malformed() {
        assert!(matches!(
            "kube_pod".parse::<CmdbResourceType>(),
            Err(AuthzError::UnsupportedResourceType(_))
        ));
        assert!(matches!(
            "comobj_abc".parse::<CmdbResourceType>(),
            Err(AuthzError::InvalidSysInstance(_))
        ));
    }

    #[test]
    fn canonical_collapses_bulk_actions() {
        assert_eq!(CmdbAction::CreateMany.canonical(), CmdbAction::Create);
        assert_eq!(CmdbAction::FindMany.canonical(), CmdbAction::Find);
        assert_eq!(CmdbAction::DeleteMany.canonical(), CmdbAction::Delete);
        assert_eq!(CmdbAction::UpdateMany.canonical(), CmdbAction::Update);
        assert_eq!(CmdbAction::Archive.canonical(), CmdbAction::Archive);
    }

    #[test]
    fn resource_attribute_deserializes_with_defaults() {
        let attr: ResourceAttribute = serde_json::from_value(serde_json::json!({
            "type": "host_instance",
            "action": "move_host_to_another_biz_module",
            "layers": [
                {"type": "business", "instance_id": 1},
                {"type": "business", "instance_id": 2}
            ]
        }))
        .expect("attribute");
        assert_eq!(attr.resource_type, CmdbResourceType::HostInstance);
        assert_eq!(attr.business_id, 0);
        assert_eq!(attr.layers.len(), 2);

        let skip: CmdbAction = serde_json::from_value(serde_json::json!("skip")).expect("skip");
        assert_eq!(skip, CmdbAction::SkipAction);
        assert_eq!(skip.as_str(), "skip");
    }
}
