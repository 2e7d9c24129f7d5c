use crate::cmdb::SYS_INSTANCE_PREFIX;
use crate::errors::{AuthzError, AuthzResult};
use crate::resource::model_id_from_sys_instance;
use serde::{Deserialize, Serialize};

/// Operation encoded in a per-model action id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SysInstanceOp {
    Create,
    Edit,
    Delete,
}

impl SysInstanceOp {
    pub const ALL: [SysInstanceOp; 3] = [
        SysInstanceOp::Create,
        SysInstanceOp::Edit,
        SysInstanceOp::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SysInstanceOp::Create => "create",
            SysInstanceOp::Edit => "edit",
            SysInstanceOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IamAction {
    CreateBusiness,
    EditBusiness,
    ArchiveBusiness,
    FindBusiness,
    ViewBusinessResource,
    CreateBizSet,
    EditBizSet,
    DeleteBizSet,
    ViewBizSet,
    AccessBizSet,
    CreateBusinessCustomQuery,
    EditBusinessCustomQuery,
    DeleteBusinessCustomQuery,
    EditBusinessCustomField,
    CreateBusinessServiceCategory,
    EditBusinessServiceCategory,
    DeleteBusinessServiceCategory,
    CreateBusinessServiceInstance,
    EditBusinessServiceInstance,
    DeleteBusinessServiceInstance,
    CreateBusinessServiceTemplate,
    EditBusinessServiceTemplate,
    DeleteBusinessServiceTemplate,
    CreateBusinessSetTemplate,
    EditBusinessSetTemplate,
    DeleteBusinessSetTemplate,
    CreateBusinessTopology,
    EditBusinessTopology,
    DeleteBusinessTopology,
    EditBusinessHostApply,
    EditBusinessHost,
    HostTransferAcrossBusiness,
    BusinessHostTransferToResourcePool,
    CreateResourcePoolHost,
    EditResourcePoolHost,
    DeleteResourcePoolHost,
    ResourcePoolHostTransferToBusiness,
    ResourcePoolHostTransferToDirectory,
    CreateResourcePoolDirectory,
    EditResourcePoolDirectory,
    DeleteResourcePoolDirectory,
    CreateSysModel,
    EditSysModel,
    DeleteSysModel,
    CreateModelGroup,
    EditModelGroup,
    DeleteModelGroup,
    CreateAssociationType,
    EditAssociationType,
    DeleteAssociationType,
    EditBusinessLayer,
    EditModelTopologyView,
    CreateCloudArea,
    EditCloudArea,
    DeleteCloudArea,
    CreateCloudAccount,
    EditCloudAccount,
    DeleteCloudAccount,
    FindCloudAccount,
    CreateCloudResourceTask,
    EditCloudResourceTask,
    DeleteCloudResourceTask,
    FindCloudResourceTask,
    FindAuditLog,
    FindOperationStatistic,
    EditOperationStatistic,
    GlobalSettings,
    WatchHostEvent,
    WatchHostRelationEvent,
    WatchBizEvent,
    WatchSetEvent,
    WatchModuleEvent,
    WatchProcessEvent,
    WatchCommonInstanceEvent,
    WatchMainlineInstanceEvent,
    WatchInstAsstEvent,
    WatchBizSetEvent,
    /// Pre-authorized; never sent to IAM.
    Skip,
    Unsupported,
    SysInstance {
        op: SysInstanceOp,
        model_id: i64,
    },
}

const STATIC_ACTIONS: &[IamAction] = &[
    IamAction::CreateBusiness,
    IamAction::EditBusiness,
    IamAction::ArchiveBusiness,
    IamAction::FindBusiness,
    IamAction::ViewBusinessResource,
    IamAction::CreateBizSet,
    IamAction::EditBizSet,
    IamAction::DeleteBizSet,
    IamAction::ViewBizSet,
    IamAction::AccessBizSet,
    IamAction::CreateBusinessCustomQuery,
    IamAction::EditBusinessCustomQuery,
    IamAction::DeleteBusinessCustomQuery,
    IamAction::EditBusinessCustomField,
    IamAction::CreateBusinessServiceCategory,
    IamAction::EditBusinessServiceCategory,
    IamAction::DeleteBusinessServiceCategory,
    IamAction::CreateBusinessServiceInstance,
    IamAction::EditBusinessServiceInstance,
    IamAction::DeleteBusinessServiceInstance,
    IamAction::CreateBusinessServiceTemplate,
    IamAction::EditBusinessServiceTemplate,
    IamAction::DeleteBusinessServiceTemplate,
    IamAction::CreateBusinessSetTemplate,
    IamAction::EditBusinessSetTemplate,
    IamAction::DeleteBusinessSetTemplate,
    IamAction::CreateBusinessTopology,
    IamAction::EditBusinessTopology,
    IamAction::DeleteBusinessTopology,
    IamAction::EditBusinessHostApply,
    IamAction::EditBusinessHost,
    IamAction::HostTransferAcrossBusiness,
    IamAction::BusinessHostTransferToResourcePool,
    IamAction::CreateResourcePoolHost,
    IamAction::EditResourcePoolHost,
    IamAction::DeleteResourcePoolHost,
    IamAction::ResourcePoolHostTransferToBusiness,
    IamAction::ResourcePoolHostTransferToDirectory,
    IamAction::CreateResourcePoolDirectory,
    IamAction::EditResourcePoolDirectory,
    IamAction::DeleteResourcePoolDirectory,
    IamAction::CreateSysModel,
    IamAction::EditSysModel,
    IamAction::DeleteSysModel,
    IamAction::CreateModelGroup,
    IamAction::EditModelGroup,
    IamAction::DeleteModelGroup,
    IamAction::CreateAssociationType,
    IamAction::EditAssociationType,
    IamAction::DeleteAssociationType,
    IamAction::EditBusinessLayer,
    IamAction::EditModelTopologyView,
    IamAction::CreateCloudArea,
    IamAction::EditCloudArea,
    IamAction::DeleteCloudArea,
    IamAction::CreateCloudAccount,
    IamAction::EditCloudAccount,
    IamAction::DeleteCloudAccount,
    IamAction::FindCloudAccount,
    IamAction::CreateCloudResourceTask,
    IamAction::EditCloudResourceTask,
    IamAction::DeleteCloudResourceTask,
    IamAction::FindCloudResourceTask,
    IamAction::FindAuditLog,
    IamAction::FindOperationStatistic,
    IamAction::EditOperationStatistic,
    IamAction::GlobalSettings,
    IamAction::WatchHostEvent,
    IamAction::WatchHostRelationEvent,
    IamAction::WatchBizEvent,
    IamAction::WatchSetEvent,
    IamAction::WatchModuleEvent,
    IamAction::WatchProcessEvent,
    IamAction::WatchCommonInstanceEvent,
    IamAction::WatchMainlineInstanceEvent,
    IamAction::WatchInstAsstEvent,
    IamAction::WatchBizSetEvent,
    IamAction::Skip,
    IamAction::Unsupported,
];

impl IamAction {
    fn static_str(self) -> Option<&'static str> {
        let id = match self {
            IamAction::CreateBusiness => "create_business",
            IamAction::EditBusiness => "edit_business",
            IamAction::ArchiveBusiness => "archive_business",
            IamAction::FindBusiness => "find_business",
            IamAction::ViewBusinessResource => "find_business_resource",
            IamAction::CreateBizSet => "create_business_set",
            IamAction::EditBizSet => "edit_business_set",
            IamAction::DeleteBizSet => "delete_business_set",
            IamAction::ViewBizSet => "view_business_set",
            IamAction::AccessBizSet => "access_business_set",
            IamAction::CreateBusinessCustomQuery => "create_biz_dynamic_query",
            IamAction::EditBusinessCustomQuery => "edit_biz_dynamic_query",
            IamAction::DeleteBusinessCustomQuery => "delete_biz_dynamic_query",
            IamAction::EditBusinessCustomField => "edit_biz_custom_field",
            IamAction::CreateBusinessServiceCategory => "create_biz_service_category",
            IamAction::EditBusinessServiceCategory => "edit_biz_service_category",
            IamAction::DeleteBusinessServiceCategory => "delete_biz_service_category",
            IamAction::CreateBusinessServiceInstance => "create_biz_service_instance",
            IamAction::EditBusinessServiceInstance => "edit_biz_service_instance",
            IamAction::DeleteBusinessServiceInstance => "delete_biz_service_instance",
            IamAction::CreateBusinessServiceTemplate => "create_biz_service_template",
            IamAction::EditBusinessServiceTemplate => "edit_biz_service_template",
            IamAction::DeleteBusinessServiceTemplate => "delete_biz_service_template",
            IamAction::CreateBusinessSetTemplate => "create_biz_set_template",
            IamAction::EditBusinessSetTemplate => "edit_biz_set_template",
            IamAction::DeleteBusinessSetTemplate => "delete_biz_set_template",
            IamAction::CreateBusinessTopology => "create_biz_topology",
            IamAction::EditBusinessTopology => "edit_biz_topology",
            IamAction::DeleteBusinessTopology => "delete_biz_topology",
            IamAction::EditBusinessHostApply => "edit_biz_host_apply",
            IamAction::EditBusinessHost => "edit_biz_host",
            IamAction::HostTransferAcrossBusiness => "host_transfer_across_business",
            IamAction::BusinessHostTransferToResourcePool => "unassign_biz_host",
            IamAction::CreateResourcePoolHost => "create_resource_pool_host",
            IamAction::EditResourcePoolHost => "edit_resource_pool_host",
            IamAction::DeleteResourcePoolHost => "delete_resource_pool_host",
            IamAction::ResourcePoolHostTransferToBusiness => "assign_host_to_biz",
            IamAction::ResourcePoolHostTransferToDirectory => "host_transfer_in_resource_pool",
            IamAction::CreateResourcePoolDirectory => "create_resource_pool_directory",
            IamAction::EditResourcePoolDirectory => "edit_resource_pool_directory",
            IamAction::DeleteResourcePoolDirectory => "delete_resource_pool_directory",
            IamAction::CreateSysModel => "create_sys_model",
            IamAction::EditSysModel => "edit_sys_model",
            IamAction::DeleteSysModel => "delete_sys_model",
            IamAction::CreateModelGroup => "create_model_group",
            IamAction::EditModelGroup => "edit_model_group",
            IamAction::DeleteModelGroup => "delete_model_group",
            IamAction::CreateAssociationType => "create_association_type",
            IamAction::EditAssociationType => "edit_association_type",
            IamAction::DeleteAssociationType => "delete_association_type",
            IamAction::EditBusinessLayer => "edit_business_layer",
            IamAction::EditModelTopologyView => "edit_model_topology_view",
            IamAction::CreateCloudArea => "create_cloud_area",
            IamAction::EditCloudArea => "edit_cloud_area",
            IamAction::DeleteCloudArea => "delete_cloud_area",
            IamAction::CreateCloudAccount => "create_cloud_account",
            IamAction::EditCloudAccount => "edit_cloud_account",
            IamAction::DeleteCloudAccount => "delete_cloud_account",
            IamAction::FindCloudAccount => "find_cloud_account",
            IamAction::CreateCloudResourceTask => "create_cloud_resource_task",
            IamAction::EditCloudResourceTask => "edit_cloud_resource_task",
            IamAction::DeleteCloudResourceTask => "delete_cloud_resource_task",
            IamAction::FindCloudResourceTask => "find_cloud_resource_task",
            IamAction::FindAuditLog => "find_audit_log",
            IamAction::FindOperationStatistic => "find_operation_statistic",
            IamAction::EditOperationStatistic => "edit_operation_statistic",
            IamAction::GlobalSettings => "global_settings",
            IamAction::WatchHostEvent => "watch_host_event",
            IamAction::WatchHostRelationEvent => "watch_host_relation_event",
            IamAction::WatchBizEvent => "watch_biz_event",
            IamAction::WatchSetEvent => "watch_set_event",
            IamAction::WatchModuleEvent => "watch_module_event",
            IamAction::WatchProcessEvent => "watch_process_event",
            IamAction::WatchCommonInstanceEvent => "watch_common_instance_event",
            IamAction::WatchMainlineInstanceEvent => "watch_mainline_instance_event",
            IamAction::WatchInstAsstEvent => "watch_inst_asst_event",
            IamAction::WatchBizSetEvent => "watch_biz_set_event",
            IamAction::Skip => "skip",
            IamAction::Unsupported => "unsupported",
            IamAction::SysInstance { .. } => return None,
        };
        Some(id)
    }

    pub fn sys_instance(op: SysInstanceOp, model_id: i64) -> Self {
        IamAction::SysInstance { op, model_id }
    }

    pub fn is_skip(self) -> bool {
        matches!(self, IamAction::Skip)
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, IamAction::SysInstance { .. })
    }

    /// Actions registered with IAM by the static catalog, excluding the sentinels.
    pub fn static_catalog() -> impl Iterator<Item = IamAction> {
        STATIC_ACTIONS
            .iter()
            .copied()
            .filter(|action| !matches!(action, IamAction::Skip | IamAction::Unsupported))
    }
}

impl std::fmt::Display for IamAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IamAction::SysInstance { op, model_id } => {
                write!(f, "{}_{SYS_INSTANCE_PREFIX}{model_id}", op.as_str())
            }
            other => f.write_str(other.static_str().unwrap_or_default()),
        }
    }
}

impl std::str::FromStr for IamAction {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(found) = STATIC_ACTIONS
            .iter()
            .copied()
            .find(|candidate| candidate.static_str() == Some(value))
        {
            return Ok(found);
        }
        for op in SysInstanceOp::ALL {
            let prefix = format!("{}_{SYS_INSTANCE_PREFIX}", op.as_str());
            if value.starts_with(&prefix) {
                let model_id = model_id_from_sys_instance(value)?;
                return Ok(IamAction::sys_instance(op, model_id));
            }
        }
        Err(AuthzError::UnsupportedAction {
            resource_type: String::new(),
            action: value.to_string(),
        })
    }
}

impl TryFrom<String> for IamAction {
    type Error = AuthzError;

    fn try_from(value: String) -> AuthzResult<Self> {
        value.parse()
    }
}

impl From<IamAction> for String {
    fn from(value: IamAction) -> Self {
        value.to_string()
    }
}
