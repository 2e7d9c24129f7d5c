//! CMDB to IAM type and action conversion.
//!
//! # Purpose
//! Total functions over the CMDB vocabulary: every known type/action pair
//! either maps to an IAM identifier, maps to the `skip` sentinel, or fails with
//! an "unsupported" error. Per-model instance types pass through with their
//! model id intact.
//!
//! # Notes
//! Scope-sensitive overrides (business-scoped attribute edits, host edits) are
//! applied before the static table so the table never needs to know about
//! business scope.
use crate::action::{IamAction, SysInstanceOp};
use crate::cmdb::{CmdbAction, CmdbResourceType};
use crate::errors::{AuthzError, AuthzResult};
use crate::resource::IamResourceType;

/// Convert a CMDB resource type to its IAM type.
///
/// # What it does
/// Returns `Ok(None)` for CMDB types that are authorized without an IAM
/// resource type (mainline model, topology views, system settings).
///
/// # Errors
/// - [`AuthzError::UnsupportedResourceType`] for types IAM does not model.
pub fn convert_resource_type(
    resource_type: CmdbResourceType,
    business_id: i64,
) -> AuthzResult<Option<IamResourceType>> {
    use CmdbResourceType as C;
    use IamResourceType as I;

    let converted = match resource_type {
        C::Business => I::Business,
        C::BizSet => I::BizSet,
        C::Model | C::ModelUnique | C::ModelAttributeGroup | C::ModelAssociation => I::SysModel,
        C::ModelAttribute if business_id > 0 => I::BizCustomField,
        C::ModelAttribute => I::SysModel,
        C::ModelModule
        | C::ModelSet
        | C::MainlineInstance
        | C::MainlineInstanceTopology
        | C::BizTopology => I::BizTopology,
        C::MainlineModel
        | C::ModelTopology
        | C::MainlineModelTopology
        | C::SystemBase
        | C::ConfigAdmin
        | C::SystemConfig => return Ok(None),
        C::ModelClassification => I::SysModelGroup,
        C::AssociationType => I::SysAssociationType,
        C::ModelInstanceTopology | C::HostFavorite => I::SkipType,
        C::CloudAreaInstance => I::SysCloudArea,
        C::HostInstance => I::Host,
        C::Process | C::ProcessServiceInstance => I::BizProcessServiceInstance,
        C::DynamicGrouping => I::BizCustomQuery,
        C::AuditLog => I::SysAuditLog,
        C::UserCustom => I::UserCustom,
        C::ProcessServiceTemplate | C::ProcessTemplate => I::BizProcessServiceTemplate,
        C::ProcessServiceCategory => I::BizProcessServiceCategory,
        C::SetTemplate => I::BizSetTemplate,
        C::OperationStatistic => I::SysOperationStatistic,
        C::HostApply => I::BizHostApply,
        C::ResourcePoolDirectory => I::SysResourcePoolDirectory,
        C::CloudAccount => I::SysCloudAccount,
        C::CloudResourceTask => I::SysCloudResourceTask,
        C::EventWatch => I::SysEventWatch,
        C::SysInstance(model_id) => I::SysInstance(model_id),
        C::NetDataCollector => {
            return Err(AuthzError::UnsupportedResourceType(
                resource_type.to_string(),
            ));
        }
    };
    Ok(Some(converted))
}

/// Convert a CMDB action on a resource type to an IAM action id.
///
/// # What it does
/// Canonicalizes bulk variants, applies the business-scope overrides, then
/// falls back to the static per-type table.
///
/// # Errors
/// - [`AuthzError::UnsupportedAction`] when no mapping exists.
pub fn convert_resource_action(
    resource_type: CmdbResourceType,
    action: CmdbAction,
    business_id: i64,
) -> AuthzResult<IamAction> {
    if action == CmdbAction::SkipAction {
        return Ok(IamAction::Skip);
    }

    let action = action.canonical();
    let is_mutation = matches!(
        action,
        CmdbAction::Create | CmdbAction::Update | CmdbAction::Delete
    );

    if matches!(
        resource_type,
        CmdbResourceType::ModelAttribute | CmdbResourceType::ModelAttributeGroup
    ) && is_mutation
    {
        return Ok(if business_id > 0 {
            IamAction::EditBusinessCustomField
        } else {
            IamAction::EditSysModel
        });
    }

    if resource_type == CmdbResourceType::HostInstance && action == CmdbAction::Update {
        return Ok(if business_id > 0 {
            IamAction::EditBusinessHost
        } else {
            IamAction::EditResourcePoolHost
        });
    }

    if let CmdbResourceType::SysInstance(model_id) = resource_type {
        return convert_sys_instance_action(model_id, resource_type, action);
    }

    static_action(resource_type, action)
        .filter(|mapped| *mapped != IamAction::Unsupported)
        .ok_or_else(|| AuthzError::UnsupportedAction {
            resource_type: resource_type.to_string(),
            action: action.to_string(),
        })
}

fn convert_sys_instance_action(
    model_id: i64,
    resource_type: CmdbResourceType,
    action: CmdbAction,
) -> AuthzResult<IamAction> {
    let op = match action {
        CmdbAction::Create => SysInstanceOp::Create,
        CmdbAction::Update => SysInstanceOp::Edit,
        CmdbAction::Delete => SysInstanceOp::Delete,
        CmdbAction::Find => return Ok(IamAction::Skip),
        other => {
            return Err(AuthzError::UnsupportedAction {
                resource_type: resource_type.to_string(),
                action: other.to_string(),
            });
        }
    };
    Ok(IamAction::sys_instance(op, model_id))
}

fn static_action(resource_type: CmdbResourceType, action: CmdbAction) -> Option<IamAction> {
    use CmdbAction as A;
    use CmdbResourceType as C;
    use IamAction as I;

    let mapped = match (resource_type, action) {
        (C::ModelAttributeGroup | C::ModelUnique, A::Create | A::Update | A::Delete) => {
            I::EditSysModel
        }
        (C::ModelAttributeGroup | C::ModelUnique, A::Find) => I::Skip,

        (C::Business, A::Archive) => I::ArchiveBusiness,
        (C::Business, A::Create) => I::CreateBusiness,
        (C::Business, A::Update) => I::EditBusiness,
        (C::Business, A::Find) => I::FindBusiness,
        (C::Business, A::ViewBusinessResource) => I::ViewBusinessResource,

        (C::BizSet, A::Create) => I::CreateBizSet,
        (C::BizSet, A::Update) => I::EditBizSet,
        (C::BizSet, A::Delete) => I::DeleteBizSet,
        (C::BizSet, A::Find) => I::ViewBizSet,
        (C::BizSet, A::AccessBizSet) => I::AccessBizSet,

        (C::DynamicGrouping, A::Delete) => I::DeleteBusinessCustomQuery,
        (C::DynamicGrouping, A::Update) => I::EditBusinessCustomQuery,
        (C::DynamicGrouping, A::Create) => I::CreateBusinessCustomQuery,
        (C::DynamicGrouping, A::Find | A::Execute) => I::ViewBusinessResource,

        (C::MainlineModel, A::Find) => I::Skip,
        (C::MainlineModel, A::Create | A::Delete) => I::EditBusinessLayer,
        (C::ModelTopology, A::Find | A::Update) => I::EditModelTopologyView,
        (C::MainlineModelTopology, A::Find) => I::Skip,

        (C::Process, A::Find) => I::Skip,
        (C::Process, A::Create | A::Delete | A::Update) => I::EditBusinessServiceInstance,

        (C::HostInstance, A::MoveResPoolHostToBizIdleModule) => {
            I::ResourcePoolHostTransferToBusiness
        }
        (C::HostInstance, A::MoveResPoolHostToDirectory) => I::ResourcePoolHostTransferToDirectory,
        (C::HostInstance, A::MoveBizHostFromModuleToResPool) => {
            I::BusinessHostTransferToResourcePool
        }
        (C::HostInstance, A::AddHostToResourcePool | A::Create) => I::CreateResourcePoolHost,
        (C::HostInstance, A::Delete) => I::DeleteResourcePoolHost,
        (C::HostInstance, A::MoveHostToAnotherBizModule) => I::HostTransferAcrossBusiness,
        (C::HostInstance, A::Find) => I::Skip,

        (C::ProcessServiceCategory, A::Delete) => I::DeleteBusinessServiceCategory,
        (C::ProcessServiceCategory, A::Update) => I::EditBusinessServiceCategory,
        (C::ProcessServiceCategory, A::Create) => I::CreateBusinessServiceCategory,
        (C::ProcessServiceCategory, A::Find) => I::Skip,

        (C::ProcessServiceInstance, A::Delete) => I::DeleteBusinessServiceInstance,
        (C::ProcessServiceInstance, A::Update) => I::EditBusinessServiceInstance,
        (C::ProcessServiceInstance, A::Create) => I::CreateBusinessServiceInstance,
        (C::ProcessServiceInstance, A::Find) => I::Skip,

        (C::ProcessServiceTemplate | C::ProcessTemplate, A::Delete) => {
            I::DeleteBusinessServiceTemplate
        }
        (C::ProcessServiceTemplate | C::ProcessTemplate, A::Update) => {
            I::EditBusinessServiceTemplate
        }
        (C::ProcessServiceTemplate | C::ProcessTemplate, A::Create) => {
            I::CreateBusinessServiceTemplate
        }
        (C::ProcessServiceTemplate | C::ProcessTemplate, A::Find) => I::Skip,

        (C::SetTemplate, A::Delete) => I::DeleteBusinessSetTemplate,
        (C::SetTemplate, A::Update) => I::EditBusinessSetTemplate,
        (C::SetTemplate, A::Create) => I::CreateBusinessSetTemplate,
        (C::SetTemplate, A::Find) => I::Skip,

        (C::ModelModule | C::ModelSet | C::MainlineInstance | C::BizTopology, A::Delete) => {
            I::DeleteBusinessTopology
        }
        (C::ModelModule | C::ModelSet | C::MainlineInstance | C::BizTopology, A::Update) => {
            I::EditBusinessTopology
        }
        (C::ModelModule | C::ModelSet | C::MainlineInstance | C::BizTopology, A::Create) => {
            I::CreateBusinessTopology
        }
        (C::ModelModule | C::ModelSet | C::MainlineInstance | C::BizTopology, A::Find) => I::Skip,
        (C::MainlineInstanceTopology, A::Create | A::Update | A::Delete | A::Find) => I::Skip,

        (C::HostApply, A::Create | A::Update | A::Delete) => I::EditBusinessHostApply,
        (C::HostApply, A::Find) => I::Skip,
        (C::HostApply, A::DefaultHostApply) => I::ViewBusinessResource,

        (C::ResourcePoolDirectory, A::Delete) => I::DeleteResourcePoolDirectory,
        (C::ResourcePoolDirectory, A::Update) => I::EditResourcePoolDirectory,
        (C::ResourcePoolDirectory, A::Create) => I::CreateResourcePoolDirectory,
        (C::ResourcePoolDirectory, A::AddHostToResourcePool) => I::CreateResourcePoolHost,
        (C::ResourcePoolDirectory, A::Find) => I::Skip,

        (C::CloudAreaInstance, A::Delete) => I::DeleteCloudArea,
        (C::CloudAreaInstance, A::Update) => I::EditCloudArea,
        (C::CloudAreaInstance, A::Create) => I::CreateCloudArea,
        (C::CloudAreaInstance, A::Find) => I::Skip,

        (C::CloudAccount, A::Delete) => I::DeleteCloudAccount,
        (C::CloudAccount, A::Update) => I::EditCloudAccount,
        (C::CloudAccount, A::Create) => I::CreateCloudAccount,
        (C::CloudAccount, A::Find) => I::FindCloudAccount,

        (C::CloudResourceTask, A::Delete) => I::DeleteCloudResourceTask,
        (C::CloudResourceTask, A::Update) => I::EditCloudResourceTask,
        (C::CloudResourceTask, A::Create) => I::CreateCloudResourceTask,
        (C::CloudResourceTask, A::Find) => I::FindCloudResourceTask,

        (C::Model, A::Delete) => I::DeleteSysModel,
        (C::Model, A::Update) => I::EditSysModel,
        (C::Model, A::Create) => I::CreateSysModel,
        (C::Model, A::Find) => I::Skip,

        (C::AssociationType, A::Delete) => I::DeleteAssociationType,
        (C::AssociationType, A::Update) => I::EditAssociationType,
        (C::AssociationType, A::Create) => I::CreateAssociationType,
        (C::AssociationType, A::Find) => I::Skip,

        (C::ModelClassification, A::Delete) => I::DeleteModelGroup,
        (C::ModelClassification, A::Update) => I::EditModelGroup,
        (C::ModelClassification, A::Create) => I::CreateModelGroup,
        (C::ModelClassification, A::Find) => I::Skip,

        (C::OperationStatistic, A::Create | A::Delete | A::Update) => I::EditOperationStatistic,
        (C::OperationStatistic, A::Find) => I::FindOperationStatistic,
        (C::AuditLog, A::Find) => I::FindAuditLog,

        (C::SystemBase, A::ModelTopologyView) => I::EditModelTopologyView,
        (C::SystemBase, A::ModelTopologyOperation) => I::EditBusinessLayer,

        (C::EventWatch, A::WatchHost) => I::WatchHostEvent,
        (C::EventWatch, A::WatchHostRelation) => I::WatchHostRelationEvent,
        (C::EventWatch, A::WatchBiz) => I::WatchBizEvent,
        (C::EventWatch, A::WatchSet) => I::WatchSetEvent,
        (C::EventWatch, A::WatchModule) => I::WatchModuleEvent,
        (C::EventWatch, A::WatchProcess) => I::WatchProcessEvent,
        (C::EventWatch, A::WatchCommonInstance) => I::WatchCommonInstanceEvent,
        (C::EventWatch, A::WatchMainlineInstance) => I::WatchMainlineInstanceEvent,
        (C::EventWatch, A::WatchInstAsst) => I::WatchInstAsstEvent,
        (C::EventWatch, A::WatchBizSet) => I::WatchBizSetEvent,

        (
            C::UserCustom | C::ModelInstanceTopology | C::HostFavorite | C::SystemConfig,
            A::Create | A::Update | A::Delete | A::Find,
        ) => I::Skip,

        (C::ModelAssociation, A::Find) => I::Skip,
        (C::ModelAssociation, A::Create | A::Update | A::Delete) => I::EditSysModel,
        (C::ModelAttribute, A::Find) => I::Skip,

        (C::ConfigAdmin, A::Find) => I::Skip,
        (C::ConfigAdmin, A::Update) => I::GlobalSettings,

        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_conversion_is_scope_sensitive() {
        assert_eq!(
            convert_resource_type(CmdbResourceType::ModelAttribute, 3).ok(),
            Some(Some(IamResourceType::BizCustomField))
        );
        assert_eq!(
            convert_resource_type(CmdbResourceType::ModelAttribute, 0).ok(),
            Some(Some(IamResourceType::SysModel))
        );
        assert_eq!(
            convert_resource_type(CmdbResourceType::SystemBase, 0).ok(),
            Some(None)
        );
        assert_eq!(
            convert_resource_type(CmdbResourceType::SysInstance(5), 0).ok(),
            Some(Some(IamResourceType::SysInstance(5)))
        );
        assert!(convert_resource_type(CmdbResourceType::NetDataCollector, 0).is_err());
    }

    #[test]
    fn bulk_actions_are_canonicalized() {
        let action =
            convert_resource_action(CmdbResourceType::Model, CmdbAction::DeleteMany, 0).ok();
        assert_eq!(action, Some(IamAction::DeleteSysModel));
    }

    #[test]
    fn scope_sensitive_overrides() {
        assert_eq!(
            convert_resource_action(CmdbResourceType::ModelAttribute, CmdbAction::Update, 2).ok(),
            Some(IamAction::EditBusinessCustomField)
        );
        assert_eq!(
            convert_resource_action(CmdbResourceType::ModelAttributeGroup, CmdbAction::Create, 0)
                .ok(),
            Some(IamAction::EditSysModel)
        );
        assert_eq!(
            convert_resource_action(CmdbResourceType::HostInstance, CmdbAction::UpdateMany, 4)
                .ok(),
            Some(IamAction::EditBusinessHost)
        );
        assert_eq!(
            convert_resource_action(CmdbResourceType::HostInstance, CmdbAction::Update, 0).ok(),
            Some(IamAction::EditResourcePoolHost)
        );
    }

    #[test]
    fn sys_instance_actions_are_synthesized() {
        let edit =
            convert_resource_action(CmdbResourceType::SysInstance(8), CmdbAction::Update, 0)
                .expect("edit");
        assert_eq!(edit.to_string(), "edit_comobj_8");
        let find = convert_resource_action(CmdbResourceType::SysInstance(8), CmdbAction::Find, 0)
            .expect("find");
        assert!(find.is_skip());
        assert!(
            convert_resource_action(CmdbResourceType::SysInstance(8), CmdbAction::Archive, 0)
                .is_err()
        );
    }

    #[test]
    fn skip_and_unsupported() {
        assert_eq!(
            convert_resource_action(CmdbResourceType::NetDataCollector, CmdbAction::SkipAction, 0)
                .ok(),
            Some(IamAction::Skip)
        );
        let err = convert_resource_action(CmdbResourceType::AuditLog, CmdbAction::Delete, 0)
            .expect_err("unsupported");
        assert!(matches!(err, AuthzError::UnsupportedAction { .. }));
        assert!(
            convert_resource_action(CmdbResourceType::ConfigAdmin, CmdbAction::Create, 0).is_err()
        );
    }
}
