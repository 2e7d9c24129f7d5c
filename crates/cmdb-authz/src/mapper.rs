//! Resource mapping from CMDB access checks to IAM resource references.
//!
//! # Purpose and responsibility
//! Turns one [`ResourceAttribute`] into the IAM action id plus the ordered list
//! of IAM resource references the decision service evaluates.
//!
//! # Where it fits
//! The batch authorizer calls [`ResourceMapper::adapt`] once per check. The
//! mapper is a pure function of its input and the static tables.
//!
//! # Key invariants and assumptions
//! - Transfer actions carry exactly two ancestor layers.
//! - Single-ancestor rules (model unique keys, model attributes) need one layer.
//! - An empty reference list means "authorize the action without instances".
//! - A reference with an empty id and no attribute targets the type itself.
use crate::action::IamAction;
use crate::cmdb::{CmdbAction, CmdbResourceType, ResourceAttribute};
use crate::convert::{convert_resource_action, convert_resource_type};
use crate::errors::{AuthzError, AuthzResult};
use crate::resource::IamResourceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute key under which IAM expects ancestor paths.
pub const IAM_PATH_KEY: &str = "_bk_iam_path_";

/// Reference to one IAM resource (or resource type when `id` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamResource {
    pub system: String,
    #[serde(rename = "type")]
    pub resource_type: IamResourceType,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attribute: BTreeMap<String, serde_json::Value>,
}

impl IamResource {
    /// Ancestor paths attached to this reference, if any.
    pub fn paths(&self) -> Vec<&str> {
        self.attribute
            .get(IAM_PATH_KEY)
            .and_then(|value| value.as_array())
            .map(|items| items.iter().filter_map(|item| item.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Maps CMDB access checks onto IAM actions and resources for one IAM system.
#[derive(Debug, Clone)]
pub struct ResourceMapper {
    system_id: String,
}

impl ResourceMapper {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Convert a check into its IAM action and resource references.
    ///
    /// # What it does
    /// Runs action conversion, type conversion and the per-type reference rule
    /// in that order, returning the first failure.
    ///
    /// # Errors
    /// - Unsupported type/action combinations.
    /// - [`AuthzError::NotEnoughLayer`] when ancestor layers are missing.
    /// - [`AuthzError::MissingBusiness`] for business-scoped rules without a business.
    ///
    /// # Example
    /// ```rust
    /// use cmdb_authz::{CmdbAction, CmdbResourceType, ResourceAttribute, ResourceMapper};
    ///
    /// let mapper = ResourceMapper::new("bk_cmdb");
    /// let attr = ResourceAttribute::new(CmdbResourceType::Business, CmdbAction::Update)
    ///     .with_instance(3);
    /// let (action, resources) = mapper.adapt(&attr).expect("mapped");
    /// assert_eq!(action.to_string(), "edit_business");
    /// assert_eq!(resources[0].id, "3");
    /// ```
    pub fn adapt(&self, attr: &ResourceAttribute) -> AuthzResult<(IamAction, Vec<IamResource>)> {
        let action = convert_resource_action(attr.resource_type, attr.action, attr.business_id)?;
        let resource_type = convert_resource_type(attr.resource_type, attr.business_id)?;
        let resources = self.map(action, resource_type, attr)?;
        Ok((action, resources))
    }

    /// Produce the resource references for an already converted action and type.
    pub fn map(
        &self,
        action: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        use CmdbResourceType as C;

        if action.is_skip() {
            return Ok(Vec::new());
        }

        match attr.resource_type {
            C::Business => self.owned(action, IamAction::CreateBusiness, resource_type, attr),
            C::BizSet => self.owned(action, IamAction::CreateBizSet, resource_type, attr),
            C::CloudAreaInstance => {
                self.owned(action, IamAction::CreateCloudArea, resource_type, attr)
            }
            C::CloudResourceTask => {
                self.owned(action, IamAction::CreateCloudResourceTask, resource_type, attr)
            }
            C::ResourcePoolDirectory => {
                self.owned(action, IamAction::CreateResourcePoolDirectory, resource_type, attr)
            }
            C::ModelClassification => {
                self.owned(action, IamAction::CreateModelGroup, resource_type, attr)
            }
            C::AssociationType => {
                self.owned(action, IamAction::CreateAssociationType, resource_type, attr)
            }
            C::CloudAccount => {
                if action == IamAction::CreateCloudAccount {
                    return Ok(Vec::new());
                }
                let native = native_type(resource_type, attr)?;
                Ok(vec![self.reference(native, attr.instance_id.to_string())])
            }
            C::DynamicGrouping => self.dynamic_grouping(action, resource_type, attr),
            C::EventWatch => Ok(self.watch(action, attr)),
            C::ProcessServiceTemplate | C::ProcessTemplate => self.business_template(
                action,
                IamAction::CreateBusinessServiceTemplate,
                resource_type,
                attr,
            ),
            C::SetTemplate => self.business_template(
                action,
                IamAction::CreateBusinessSetTemplate,
                resource_type,
                attr,
            ),
            C::HostApply
            | C::Process
            | C::ProcessServiceInstance
            | C::ProcessServiceCategory
            | C::ModelModule
            | C::ModelSet
            | C::MainlineInstance
            | C::MainlineInstanceTopology
            | C::BizTopology => Ok(vec![self.business_ref(attr.business_id)]),
            C::Model | C::ModelAssociation => self.model(action, resource_type, attr),
            C::ModelUnique => self.owning_model(attr),
            C::ModelAttributeGroup | C::ModelAttribute if attr.business_id > 0 => {
                Ok(vec![self.business_ref(attr.business_id)])
            }
            C::ModelAttributeGroup | C::ModelAttribute => self.owning_model(attr),
            C::HostInstance => self.host(action, resource_type, attr),
            C::SysInstance(_) => {
                if matches!(attr.action, CmdbAction::Create | CmdbAction::CreateMany) {
                    return Ok(Vec::new());
                }
                let native = native_type(resource_type, attr)?;
                Ok(vec![self.reference(native, positive_id(attr.instance_id))])
            }
            C::OperationStatistic
            | C::AuditLog
            | C::ConfigAdmin
            | C::MainlineModel
            | C::ModelTopology
            | C::SystemBase
            | C::ModelInstanceTopology
            | C::MainlineModelTopology
            | C::UserCustom
            | C::HostFavorite
            | C::SystemConfig => Ok(Vec::new()),
            C::NetDataCollector => Err(AuthzError::UnsupportedResourceType(
                attr.resource_type.to_string(),
            )),
        }
    }

    fn reference(&self, resource_type: IamResourceType, id: String) -> IamResource {
        IamResource {
            system: self.system_id.clone(),
            resource_type,
            id,
            attribute: BTreeMap::new(),
        }
    }

    fn with_path(&self, mut resource: IamResource, path: String) -> IamResource {
        resource.attribute.insert(
            IAM_PATH_KEY.to_string(),
            serde_json::Value::Array(vec![serde_json::Value::String(path)]),
        );
        resource
    }

    fn business_ref(&self, business_id: i64) -> IamResource {
        self.reference(IamResourceType::Business, positive_id(business_id))
    }

    fn layer_ref(&self, resource_type: IamResourceType, attr: &ResourceAttribute, index: usize) -> IamResource {
        let id = attr
            .layers
            .get(index)
            .map(|layer| layer.instance_id.to_string())
            .unwrap_or_default();
        self.reference(resource_type, id)
    }

    // Types whose own create action has no instance to authorize against.
    fn owned(
        &self,
        action: IamAction,
        create: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        if action == create {
            return Ok(Vec::new());
        }
        let native = native_type(resource_type, attr)?;
        Ok(vec![self.reference(native, positive_id(attr.instance_id))])
    }

    fn dynamic_grouping(
        &self,
        action: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        if attr.business_id <= 0 {
            return Err(AuthzError::MissingBusiness(attr.resource_type.to_string()));
        }
        if matches!(
            action,
            IamAction::CreateBusinessCustomQuery | IamAction::ViewBusinessResource
        ) {
            return Ok(vec![self.business_ref(attr.business_id)]);
        }
        let native = native_type(resource_type, attr)?;
        let resource = self.reference(native, attr.instance_id_ex.clone());
        Ok(vec![self.with_path(
            resource,
            business_path(attr.business_id),
        )])
    }

    fn watch(&self, action: IamAction, attr: &ResourceAttribute) -> Vec<IamResource> {
        let resource_type = match action {
            IamAction::WatchCommonInstanceEvent => IamResourceType::SysModelEvent,
            IamAction::WatchMainlineInstanceEvent => IamResourceType::MainlineModelEvent,
            IamAction::WatchInstAsstEvent => IamResourceType::InstAsstEvent,
            _ => return Vec::new(),
        };
        vec![self.reference(resource_type, positive_id(attr.instance_id))]
    }

    fn business_template(
        &self,
        action: IamAction,
        create: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        if action == create {
            if attr.business_id <= 0 {
                return Err(AuthzError::MissingBusiness(attr.resource_type.to_string()));
            }
            return Ok(vec![self.business_ref(attr.business_id)]);
        }
        let native = native_type(resource_type, attr)?;
        Ok(vec![self.reference(native, positive_id(attr.instance_id))])
    }

    fn model(
        &self,
        action: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        let native = native_type(resource_type, attr)?;
        if action == IamAction::CreateSysModel {
            if attr.layers.is_empty() {
                return Ok(vec![self.reference(native, String::new())]);
            }
            return Ok(vec![self.layer_ref(IamResourceType::SysModelGroup, attr, 0)]);
        }
        Ok(vec![self.reference(native, positive_id(attr.instance_id))])
    }

    fn owning_model(&self, attr: &ResourceAttribute) -> AuthzResult<Vec<IamResource>> {
        if attr.layers.is_empty() {
            return Err(AuthzError::NotEnoughLayer);
        }
        Ok(vec![self.layer_ref(IamResourceType::SysModel, attr, 0)])
    }

    fn host(
        &self,
        action: IamAction,
        resource_type: Option<IamResourceType>,
        attr: &ResourceAttribute,
    ) -> AuthzResult<Vec<IamResource>> {
        // Step 1: transfers name both containers, source first.
        let transfer = match action {
            IamAction::ResourcePoolHostTransferToDirectory => Some((
                IamResourceType::SysHostRscPoolDirectory,
                IamResourceType::SysResourcePoolDirectory,
            )),
            IamAction::ResourcePoolHostTransferToBusiness => Some((
                IamResourceType::SysHostRscPoolDirectory,
                IamResourceType::Business,
            )),
            IamAction::BusinessHostTransferToResourcePool => Some((
                IamResourceType::Business,
                IamResourceType::SysResourcePoolDirectory,
            )),
            IamAction::HostTransferAcrossBusiness => Some((
                IamResourceType::BusinessForHostTrans,
                IamResourceType::Business,
            )),
            _ => None,
        };
        if let Some((source, target)) = transfer {
            if attr.layers.len() != 2 {
                return Err(AuthzError::NotEnoughLayer);
            }
            return Ok(vec![
                self.layer_ref(source, attr, 0),
                self.layer_ref(target, attr, 1),
            ]);
        }

        // Step 2: pool host creation authorizes against the target directory.
        if action == IamAction::CreateResourcePoolHost {
            return Ok(vec![self.layer_ref(
                IamResourceType::SysResourcePoolDirectory,
                attr,
                0,
            )]);
        }

        // Step 3: edits carry the host's container as an ancestor path.
        let container = match action {
            IamAction::EditResourcePoolHost | IamAction::DeleteResourcePoolHost => {
                IamResourceType::SysHostRscPoolDirectory
            }
            IamAction::EditBusinessHost => IamResourceType::Business,
            _ => return Ok(Vec::new()),
        };
        let native = native_type(resource_type, attr)?;
        let resource = self.reference(native, positive_id(attr.instance_id));
        match attr.layers.first() {
            Some(layer) => Ok(vec![self.with_path(
                resource,
                format!("/{container},{}/", layer.instance_id),
            )]),
            None => Ok(vec![resource]),
        }
    }
}

fn native_type(
    resource_type: Option<IamResourceType>,
    attr: &ResourceAttribute,
) -> AuthzResult<IamResourceType> {
    resource_type.ok_or_else(|| AuthzError::UnsupportedResourceType(attr.resource_type.to_string()))
}

fn positive_id(id: i64) -> String {
    if id > 0 { id.to_string() } else { String::new() }
}

/// Ancestor path for a business-scoped resource.
pub fn business_path(business_id: i64) -> String {
    format!("/{},{business_id}/", IamResourceType::Business)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> ResourceMapper {
        ResourceMapper::new("bk_cmdb")
    }

    #[test]
    fn transfer_requires_exactly_two_layers() {
        let base = ResourceAttribute::new(
            CmdbResourceType::HostInstance,
            CmdbAction::MoveHostToAnotherBizModule,
        );
        for layers in [0, 1, 3] {
            let mut attr = base.clone();
            for index in 0..layers {
                attr = attr.with_layer(CmdbResourceType::Business, index + 1);
            }
            let err = mapper().adapt(&attr).expect_err("layers");
            assert!(matches!(err, AuthzError::NotEnoughLayer));
        }

        let attr = base
            .with_layer(CmdbResourceType::Business, 1)
            .with_layer(CmdbResourceType::Business, 2);
        let (action, resources) = mapper().adapt(&attr).expect("transfer");
        assert_eq!(action, IamAction::HostTransferAcrossBusiness);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].resource_type, IamResourceType::BusinessForHostTrans);
        assert_eq!(resources[0].id, "1");
        assert_eq!(resources[1].resource_type, IamResourceType::Business);
        assert_eq!(resources[1].id, "2");
    }

    #[test]
    fn pool_transfer_orders_source_then_target() {
        let attr = ResourceAttribute::new(
            CmdbResourceType::HostInstance,
            CmdbAction::MoveResPoolHostToBizIdleModule,
        )
        .with_layer(CmdbResourceType::ResourcePoolDirectory, 10)
        .with_layer(CmdbResourceType::Business, 20);
        let (_, resources) = mapper().adapt(&attr).expect("transfer");
        assert_eq!(
            resources[0].resource_type,
            IamResourceType::SysHostRscPoolDirectory
        );
        assert_eq!(resources[1].resource_type, IamResourceType::Business);
        assert_eq!(resources[1].id, "20");
    }

    #[test]
    fn create_actions_return_no_instances() {
        let attr = ResourceAttribute::new(CmdbResourceType::Business, CmdbAction::Create);
        let (action, resources) = mapper().adapt(&attr).expect("create");
        assert_eq!(action, IamAction::CreateBusiness);
        assert!(resources.is_empty());

        let attr = ResourceAttribute::new(CmdbResourceType::SysInstance(4), CmdbAction::CreateMany);
        let (action, resources) = mapper().adapt(&attr).expect("create many");
        assert_eq!(action.to_string(), "create_comobj_4");
        assert!(resources.is_empty());
    }

    #[test]
    fn model_create_authorizes_against_group() {
        let attr = ResourceAttribute::new(CmdbResourceType::Model, CmdbAction::Create)
            .with_layer(CmdbResourceType::ModelClassification, 6);
        let (_, resources) = mapper().adapt(&attr).expect("model");
        assert_eq!(resources[0].resource_type, IamResourceType::SysModelGroup);
        assert_eq!(resources[0].id, "6");
    }

    #[test]
    fn model_attribute_needs_owning_model_without_business() {
        let attr = ResourceAttribute::new(CmdbResourceType::ModelAttribute, CmdbAction::Update);
        assert!(matches!(
            mapper().adapt(&attr),
            Err(AuthzError::NotEnoughLayer)
        ));

        let attr = attr.with_layer(CmdbResourceType::Model, 9);
        let (action, resources) = mapper().adapt(&attr).expect("attribute");
        assert_eq!(action, IamAction::EditSysModel);
        assert_eq!(resources[0].resource_type, IamResourceType::SysModel);
        assert_eq!(resources[0].id, "9");

        let scoped = ResourceAttribute::new(CmdbResourceType::ModelAttribute, CmdbAction::Update)
            .with_business(5);
        let (action, resources) = mapper().adapt(&scoped).expect("scoped");
        assert_eq!(action, IamAction::EditBusinessCustomField);
        assert_eq!(resources[0].resource_type, IamResourceType::Business);
        assert_eq!(resources[0].id, "5");
    }

    #[test]
    fn dynamic_grouping_uses_business_scope() {
        let attr = ResourceAttribute::new(CmdbResourceType::DynamicGrouping, CmdbAction::Create);
        assert!(matches!(
            mapper().adapt(&attr),
            Err(AuthzError::MissingBusiness(_))
        ));

        let create = attr.clone().with_business(3);
        let (_, resources) = mapper().adapt(&create).expect("create");
        assert_eq!(resources[0].resource_type, IamResourceType::Business);
        assert_eq!(resources[0].id, "3");

        let mut edit = ResourceAttribute::new(CmdbResourceType::DynamicGrouping, CmdbAction::Update)
            .with_business(3);
        edit.instance_id_ex = "q-1".to_string();
        let (_, resources) = mapper().adapt(&edit).expect("edit");
        assert_eq!(resources[0].resource_type, IamResourceType::BizCustomQuery);
        assert_eq!(resources[0].id, "q-1");
        assert_eq!(resources[0].paths(), vec!["/business,3/"]);
    }

    #[test]
    fn business_host_edit_carries_path() {
        let attr = ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Update)
            .with_business(2)
            .with_instance(100)
            .with_layer(CmdbResourceType::Business, 2);
        let (action, resources) = mapper().adapt(&attr).expect("edit host");
        assert_eq!(action, IamAction::EditBusinessHost);
        assert_eq!(resources[0].id, "100");
        assert_eq!(resources[0].paths(), vec!["/business,2/"]);

        let pool = ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Delete)
            .with_instance(100)
            .with_layer(CmdbResourceType::ResourcePoolDirectory, 7);
        let (_, resources) = mapper().adapt(&pool).expect("delete host");
        assert_eq!(resources[0].paths(), vec!["/sys_host_rsc_pool_directory,7/"]);
    }

    #[test]
    fn skip_actions_produce_no_resources() {
        let attr = ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Find);
        let (action, resources) = mapper().adapt(&attr).expect("find");
        assert!(action.is_skip());
        assert!(resources.is_empty());
    }

    #[test]
    fn resource_serializes_with_iam_field_names() {
        let attr = ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Update)
            .with_business(2)
            .with_instance(100)
            .with_layer(CmdbResourceType::Business, 2);
        let (_, resources) = mapper().adapt(&attr).expect("edit host");
        let json = serde_json::to_value(&resources[0]).expect("json");
        assert_eq!(json["system"], "bk_cmdb");
        assert_eq!(json["type"], "host");
        assert_eq!(json["attribute"]["_bk_iam_path_"][0], "/business,2/");
    }
}
