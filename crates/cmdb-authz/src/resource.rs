//! IAM resource types and their storage schema.
//!
//! Each variant carries the lookup data the compiler and the lister need: the
//! document field holding the instance id, the field shown as display name,
//! whether the id is a string, and the collection the instances live in.
use crate::cmdb::SYS_INSTANCE_PREFIX;
use crate::errors::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Module-to-host relation collection; hosts do not store their topology inline.
pub const MODULE_HOST_RELATION_COLLECTION: &str = "cc_ModuleHostConfig";
/// Model definitions, one document per custom or built-in model.
pub const MODEL_COLLECTION: &str = "cc_ObjDes";
/// Model attribute definitions.
pub const MODEL_ATTRIBUTE_COLLECTION: &str = "cc_ObjAttDes";

pub const HOST_ID_FIELD: &str = "bk_host_id";
pub const BUSINESS_ID_FIELD: &str = "bk_biz_id";
pub const OBJECT_ID_FIELD: &str = "bk_obj_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Int,
    Str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IamResourceType {
    Business,
    BizSet,
    BusinessForHostTrans,
    BizCustomQuery,
    BizCustomField,
    BizProcessServiceTemplate,
    BizProcessServiceCategory,
    BizProcessServiceInstance,
    BizTopology,
    BizSetTemplate,
    BizHostApply,
    Set,
    Module,
    Host,
    SysModelGroup,
    SysModel,
    SysInstanceModel,
    SysModelEvent,
    MainlineModelEvent,
    InstAsstEvent,
    SysAssociationType,
    SysResourcePoolDirectory,
    SysHostRscPoolDirectory,
    SysCloudArea,
    SysCloudAccount,
    SysCloudResourceTask,
    SysEventWatch,
    SysAuditLog,
    SysOperationStatistic,
    UserCustom,
    SkipType,
    SysInstance(i64),
}

const STATIC_RESOURCE_TYPES: &[IamResourceType] = &[
    IamResourceType::Business,
    IamResourceType::BizSet,
    IamResourceType::BusinessForHostTrans,
    IamResourceType::BizCustomQuery,
    IamResourceType::BizCustomField,
    IamResourceType::BizProcessServiceTemplate,
    IamResourceType::BizProcessServiceCategory,
    IamResourceType::BizProcessServiceInstance,
    IamResourceType::BizTopology,
    IamResourceType::BizSetTemplate,
    IamResourceType::BizHostApply,
    IamResourceType::Set,
    IamResourceType::Module,
    IamResourceType::Host,
    IamResourceType::SysModelGroup,
    IamResourceType::SysModel,
    IamResourceType::SysInstanceModel,
    IamResourceType::SysModelEvent,
    IamResourceType::MainlineModelEvent,
    IamResourceType::InstAsstEvent,
    IamResourceType::SysAssociationType,
    IamResourceType::SysResourcePoolDirectory,
    IamResourceType::SysHostRscPoolDirectory,
    IamResourceType::SysCloudArea,
    IamResourceType::SysCloudAccount,
    IamResourceType::SysCloudResourceTask,
    IamResourceType::SysEventWatch,
    IamResourceType::SysAuditLog,
    IamResourceType::SysOperationStatistic,
    IamResourceType::UserCustom,
    IamResourceType::SkipType,
];

impl IamResourceType {
    fn static_str(self) -> Option<&'static str> {
        let id = match self {
            IamResourceType::Business => "business",
            IamResourceType::BizSet => "business_set",
            IamResourceType::BusinessForHostTrans => "biz_for_host_trans",
            IamResourceType::BizCustomQuery => "biz_custom_query",
            IamResourceType::BizCustomField => "biz_custom_field",
            IamResourceType::BizProcessServiceTemplate => "biz_process_service_template",
            IamResourceType::BizProcessServiceCategory => "biz_process_service_category",
            IamResourceType::BizProcessServiceInstance => "biz_process_service_instance",
            IamResourceType::BizTopology => "biz_topology",
            IamResourceType::BizSetTemplate => "biz_set_template",
            IamResourceType::BizHostApply => "biz_host_apply",
            IamResourceType::Set => "set",
            IamResourceType::Module => "module",
            IamResourceType::Host => "host",
            IamResourceType::SysModelGroup => "sys_model_group",
            IamResourceType::SysModel => "sys_model",
            IamResourceType::SysInstanceModel => "sys_instance_model",
            IamResourceType::SysModelEvent => "sys_model_event",
            IamResourceType::MainlineModelEvent => "mainline_model_event",
            IamResourceType::InstAsstEvent => "inst_asst_event",
            IamResourceType::SysAssociationType => "sys_association_type",
            IamResourceType::SysResourcePoolDirectory => "sys_resource_pool_directory",
            IamResourceType::SysHostRscPoolDirectory => "sys_host_rsc_pool_directory",
            IamResourceType::SysCloudArea => "sys_cloud_area",
            IamResourceType::SysCloudAccount => "sys_cloud_account",
            IamResourceType::SysCloudResourceTask => "sys_cloud_resource_task",
            IamResourceType::SysEventWatch => "sys_event_watch",
            IamResourceType::SysAuditLog => "sys_audit_log",
            IamResourceType::SysOperationStatistic => "sys_operation_statistic",
            IamResourceType::UserCustom => "usercustom",
            IamResourceType::SkipType => "skip_type",
            IamResourceType::SysInstance(_) => return None,
        };
        Some(id)
    }

    /// Per-model types are generated at runtime from the model set.
    pub fn is_dynamic(self) -> bool {
        matches!(self, IamResourceType::SysInstance(_))
    }

    pub fn id_field(self) -> &'static str {
        match self {
            IamResourceType::Host => HOST_ID_FIELD,
            IamResourceType::Business | IamResourceType::BusinessForHostTrans => BUSINESS_ID_FIELD,
            IamResourceType::BizSet => "bk_biz_set_id",
            IamResourceType::Set => "bk_set_id",
            IamResourceType::Module
            | IamResourceType::SysResourcePoolDirectory
            | IamResourceType::SysHostRscPoolDirectory => "bk_module_id",
            IamResourceType::SysCloudArea => "bk_cloud_id",
            IamResourceType::SysCloudAccount => "bk_account_id",
            IamResourceType::SysCloudResourceTask => "bk_task_id",
            IamResourceType::SysInstance(_) => "bk_inst_id",
            _ => "id",
        }
    }

    pub fn name_field(self) -> &'static str {
        match self {
            IamResourceType::Host => "bk_host_innerip",
            IamResourceType::Business | IamResourceType::BusinessForHostTrans => "bk_biz_name",
            IamResourceType::BizSet => "bk_biz_set_name",
            IamResourceType::Set => "bk_set_name",
            IamResourceType::Module
            | IamResourceType::SysResourcePoolDirectory
            | IamResourceType::SysHostRscPoolDirectory => "bk_module_name",
            IamResourceType::SysModelGroup => "bk_classification_name",
            IamResourceType::SysModel
            | IamResourceType::SysInstanceModel
            | IamResourceType::SysModelEvent
            | IamResourceType::MainlineModelEvent
            | IamResourceType::InstAsstEvent => "bk_obj_name",
            IamResourceType::SysAssociationType => "bk_asst_name",
            IamResourceType::SysCloudArea => "bk_cloud_name",
            IamResourceType::SysCloudAccount => "bk_account_name",
            IamResourceType::SysCloudResourceTask => "bk_task_name",
            IamResourceType::SysInstance(_) => "bk_inst_name",
            _ => "name",
        }
    }

    pub fn id_kind(self) -> IdKind {
        match self {
            IamResourceType::BizCustomQuery => IdKind::Str,
            _ => IdKind::Int,
        }
    }

    /// Backing collection, `None` for types that have no listable instances.
    pub fn collection(self) -> Option<&'static str> {
        let collection = match self {
            IamResourceType::Host => "cc_HostBase",
            IamResourceType::Business | IamResourceType::BusinessForHostTrans => {
                "cc_ApplicationBase"
            }
            IamResourceType::BizSet => "cc_BizSetBase",
            IamResourceType::BizCustomQuery => "cc_UserAPI",
            IamResourceType::BizProcessServiceTemplate => "cc_ServiceTemplate",
            IamResourceType::BizProcessServiceCategory => "cc_ServiceCategory",
            IamResourceType::BizProcessServiceInstance => "cc_ServiceInstance",
            IamResourceType::BizSetTemplate => "cc_SetTemplate",
            IamResourceType::Set => "cc_SetBase",
            IamResourceType::Module
            | IamResourceType::SysResourcePoolDirectory
            | IamResourceType::SysHostRscPoolDirectory => "cc_ModuleBase",
            IamResourceType::SysModelGroup => "cc_ObjClassification",
            IamResourceType::SysModel
            | IamResourceType::SysInstanceModel
            | IamResourceType::SysModelEvent
            | IamResourceType::MainlineModelEvent
            | IamResourceType::InstAsstEvent => MODEL_COLLECTION,
            IamResourceType::SysAssociationType => "cc_AsstDes",
            IamResourceType::SysCloudArea => "cc_PlatBase",
            IamResourceType::SysCloudAccount => "cc_CloudAccount",
            IamResourceType::SysCloudResourceTask => "cc_CloudSyncTask",
            IamResourceType::SysInstance(_) => "cc_ObjectBase",
            _ => return None,
        };
        Some(collection)
    }

    /// CMDB object whose attribute definitions describe this type.
    pub fn object_id(self) -> Option<&'static str> {
        match self {
            IamResourceType::Host => Some("host"),
            IamResourceType::Business => Some("biz"),
            IamResourceType::SysCloudArea => Some("plat"),
            _ => None,
        }
    }

    /// Types whose instances are scoped by a business id stored on each document.
    pub fn is_business_scoped(self) -> bool {
        matches!(
            self,
            IamResourceType::BizCustomQuery
                | IamResourceType::BizProcessServiceTemplate
                | IamResourceType::BizProcessServiceCategory
                | IamResourceType::BizProcessServiceInstance
                | IamResourceType::BizSetTemplate
        )
    }
}

impl std::fmt::Display for IamResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IamResourceType::SysInstance(model_id) => {
                write!(f, "{SYS_INSTANCE_PREFIX}{model_id}")
            }
            other => f.write_str(other.static_str().unwrap_or_default()),
        }
    }
}

impl std::str::FromStr for IamResourceType {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.starts_with(SYS_INSTANCE_PREFIX) {
            return model_id_from_sys_instance(value).map(IamResourceType::SysInstance);
        }
        STATIC_RESOURCE_TYPES
            .iter()
            .copied()
            .find(|candidate| candidate.static_str() == Some(value))
            .ok_or_else(|| AuthzError::UnsupportedResourceType(value.to_string()))
    }
}

impl TryFrom<String> for IamResourceType {
    type Error = AuthzError;

    fn try_from(value: String) -> AuthzResult<Self> {
        value.parse()
    }
}

impl From<IamResourceType> for String {
    fn from(value: IamResourceType) -> Self {
        value.to_string()
    }
}

/// Whether a resource type id follows the per-model naming convention.
pub fn is_dynamic_type_id(id: &str) -> bool {
    id.starts_with(SYS_INSTANCE_PREFIX)
}

/// Whether an action or instance-selection id references a per-model type.
pub fn is_dynamic_id(id: &str) -> bool {
    id.contains(SYS_INSTANCE_PREFIX)
}

/// Extract the model id from a `comobj_<id>` type or a `<op>_comobj_<id>` action.
///
/// # Errors
/// - [`AuthzError::InvalidSysInstance`] when the prefix is missing or the
///   suffix is not an integer.
pub fn model_id_from_sys_instance(id: &str) -> AuthzResult<i64> {
    let (_, suffix) = id
        .split_once(SYS_INSTANCE_PREFIX)
        .ok_or_else(|| AuthzError::InvalidSysInstance(id.to_string()))?;
    suffix
        .parse::<i64>()
        .map_err(|_| AuthzError::InvalidSysInstance(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_string_roundtrip() {
        for resource_type in STATIC_RESOURCE_TYPES.iter().copied() {
            let id = resource_type.to_string();
            assert_eq!(id.parse::<IamResourceType>().ok(), Some(resource_type));
        }
        assert_eq!(
            "comobj_7".parse::<IamResourceType>().ok(),
            Some(IamResourceType::SysInstance(7))
        );
    }

    #[test]
    fn schema_lookup_for_core_types() {
        assert_eq!(IamResourceType::Host.id_field(), "bk_host_id");
        assert_eq!(IamResourceType::Host.name_field(), "bk_host_innerip");
        assert_eq!(IamResourceType::Business.id_field(), "bk_biz_id");
        assert_eq!(IamResourceType::BizCustomQuery.id_kind(), IdKind::Str);
        assert_eq!(IamResourceType::SysModel.id_kind(), IdKind::Int);
        assert_eq!(IamResourceType::SysInstance(3).id_field(), "bk_inst_id");
        assert_eq!(
            IamResourceType::SysInstance(3).collection(),
            Some("cc_ObjectBase")
        );
        assert_eq!(IamResourceType::SysAuditLog.collection(), None);
    }

    #[test]
    fn dynamic_detection() {
        assert!(IamResourceType::SysInstance(1).is_dynamic());
        assert!(!IamResourceType::SysModel.is_dynamic());
        assert!(is_dynamic_type_id("comobj_1"));
        assert!(!is_dynamic_type_id("edit_comobj_1"));
        assert!(is_dynamic_id("edit_comobj_1"));
        assert!(!is_dynamic_id("edit_sys_model"));
    }

    #[test]
    fn model_id_parsing() {
        assert_eq!(model_id_from_sys_instance("comobj_12").ok(), Some(12));
        assert_eq!(model_id_from_sys_instance("delete_comobj_12").ok(), Some(12));
        assert!(matches!(
            model_id_from_sys_instance("comobj_x"),
            Err(AuthzError::InvalidSysInstance(_))
        ));
        assert!(model_id_from_sys_instance("sys_model").is_err());
    }
}
