//! IAM catalog entries and the diff that keeps them in sync with CMDB models.
//!
//! # Purpose and responsibility
//! Describes the catalog shapes IAM stores (resource types, instance
//! selections, actions, action groups), derives the per-model entries CMDB
//! wants registered, and computes what must be created, updated or removed.
//!
//! # Where it fits
//! The service's reconciler fetches the registered catalog, calls
//! [`desired_catalog`] and [`CatalogDiff::compute`], then applies the diff in
//! dependency order. Nothing in this module performs I/O.
//!
//! # Key invariants and assumptions
//! - Only entries following the per-model naming convention are ever removed.
//! - Instance selections reference resource types; actions reference
//!   instance selections. Callers delete actions first and create them last.
//! - Action groups are derived from the registered groups, so statically
//!   registered groups survive every pass.
use crate::action::{IamAction, SysInstanceOp};
use crate::errors::{AuthzError, AuthzResult};
use crate::resource::{IamResourceType, is_dynamic_id, is_dynamic_type_id};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Provider path IAM calls back on for per-model instance data.
pub const PROVIDER_PATH: &str = "/auth/v3/find/resource";
/// Top-level action group holding one sub-group per model.
pub const MODEL_INSTANCE_GROUP_NAME: &str = "模型实例管理";
pub const MODEL_INSTANCE_GROUP_NAME_EN: &str = "Model Instance Management";

const SELECTION_MODE_ALL: &str = "all";

/// A CMDB model definition as stored in the model collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: i64,
    pub bk_obj_id: String,
    pub bk_obj_name: String,
}

impl ModelObject {
    pub fn validate(&self) -> AuthzResult<()> {
        if self.id == 0 || self.bk_obj_id.is_empty() || self.bk_obj_name.is_empty() {
            return Err(AuthzError::InvalidModel(format!(
                "id {} obj_id {:?} name {:?}",
                self.id, self.bk_obj_id, self.bk_obj_name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRef {
    pub system_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeEntry {
    pub id: String,
    pub name: String,
    pub name_en: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<SystemRef>,
    #[serde(default)]
    pub provider_config: ProviderConfig,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSelectionEntry {
    pub id: String,
    pub name: String,
    pub name_en: String,
    #[serde(default)]
    pub resource_type_chain: Vec<SystemRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedResourceType {
    pub system_id: String,
    pub id: String,
    #[serde(default)]
    pub selection_mode: String,
    #[serde(default, rename = "related_instance_selections")]
    pub instance_selections: Vec<SystemRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceActionEntry {
    pub id: String,
    pub name: String,
    pub name_en: String,
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_resource_types: Vec<RelatedResourceType>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub name: String,
    pub name_en: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_groups: Vec<ActionGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRef>,
}

/// Catalog as reported by IAM for the CMDB system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisteredCatalog {
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeEntry>,
    #[serde(default)]
    pub instance_selections: Vec<InstanceSelectionEntry>,
    #[serde(default)]
    pub actions: Vec<ResourceActionEntry>,
    #[serde(default)]
    pub action_groups: Vec<ActionGroup>,
}

/// Per-model catalog entries CMDB wants registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredCatalog {
    pub resource_types: Vec<ResourceTypeEntry>,
    pub instance_selections: Vec<InstanceSelectionEntry>,
    pub actions: Vec<ResourceActionEntry>,
}

impl DesiredCatalog {
    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|action| action.id.as_str())
    }
}

/// Explicit removal request for catalog entries by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRemoval {
    #[serde(default)]
    pub action_ids: Vec<String>,
    #[serde(default)]
    pub instance_selection_ids: Vec<String>,
    #[serde(default)]
    pub type_ids: Vec<String>,
}

fn action_name(model: &ModelObject, op: SysInstanceOp) -> (String, String) {
    let verb = match op {
        SysInstanceOp::Create => "新建",
        SysInstanceOp::Edit => "编辑",
        SysInstanceOp::Delete => "删除",
    };
    (
        format!("{}实例{verb}", model.bk_obj_name),
        format!("{} {} instance", op.as_str(), model.bk_obj_id),
    )
}

/// Build the per-model entries for `models`.
///
/// # Errors
/// Returns [`AuthzError::InvalidModel`] when any model has a zero id or an
/// empty identifier or name; nothing is generated in that case.
pub fn desired_catalog(system_id: &str, models: &[ModelObject]) -> AuthzResult<DesiredCatalog> {
    for model in models {
        model.validate()?;
    }

    let mut catalog = DesiredCatalog::default();
    for model in models {
        let type_id = IamResourceType::SysInstance(model.id).to_string();
        let type_ref = SystemRef {
            system_id: system_id.to_string(),
            id: type_id.clone(),
        };

        catalog.resource_types.push(ResourceTypeEntry {
            id: type_id.clone(),
            name: model.bk_obj_name.clone(),
            name_en: model.bk_obj_id.clone(),
            parents: Vec::new(),
            provider_config: ProviderConfig {
                path: PROVIDER_PATH.to_string(),
            },
            version: 1,
        });

        // Selection ids share the type id.
        catalog.instance_selections.push(InstanceSelectionEntry {
            id: type_id.clone(),
            name: model.bk_obj_name.clone(),
            name_en: model.bk_obj_id.clone(),
            resource_type_chain: vec![type_ref.clone()],
        });

        let related = RelatedResourceType {
            system_id: system_id.to_string(),
            id: type_id.clone(),
            selection_mode: SELECTION_MODE_ALL.to_string(),
            instance_selections: vec![type_ref],
        };
        for op in SysInstanceOp::ALL {
            let (name, name_en) = action_name(model, op);
            let related_resource_types = match op {
                SysInstanceOp::Create => Vec::new(),
                SysInstanceOp::Edit | SysInstanceOp::Delete => vec![related.clone()],
            };
            catalog.actions.push(ResourceActionEntry {
                id: IamAction::sys_instance(op, model.id).to_string(),
                name,
                name_en,
                action_type: op.as_str().to_string(),
                related_resource_types,
                version: 1,
            });
        }
    }
    Ok(catalog)
}

/// Sub-group listing the three per-model actions.
pub fn model_action_group(model: &ModelObject) -> ActionGroup {
    ActionGroup {
        name: model.bk_obj_name.clone(),
        name_en: model.bk_obj_id.clone(),
        sub_groups: Vec::new(),
        actions: SysInstanceOp::ALL
            .iter()
            .map(|op| ActionRef {
                id: IamAction::sys_instance(*op, model.id).to_string(),
            })
            .collect(),
    }
}

fn strip_dynamic_actions(groups: &[ActionGroup]) -> Vec<ActionGroup> {
    groups
        .iter()
        .map(|group| ActionGroup {
            name: group.name.clone(),
            name_en: group.name_en.clone(),
            sub_groups: strip_dynamic_actions(&group.sub_groups),
            actions: group
                .actions
                .iter()
                .filter(|action| !is_dynamic_id(&action.id))
                .cloned()
                .collect(),
        })
        .collect()
}

/// Groups to publish: the registered groups without per-model actions, plus
/// one sub-group per model under the model-instance group.
pub fn desired_action_groups(registered: &[ActionGroup], models: &[ModelObject]) -> Vec<ActionGroup> {
    let mut groups = strip_dynamic_actions(registered);
    let model_groups: Vec<ActionGroup> = models.iter().map(model_action_group).collect();

    match groups
        .iter_mut()
        .find(|group| group.name_en == MODEL_INSTANCE_GROUP_NAME_EN)
    {
        Some(group) => {
            // Sub-groups emptied by the strip are dropped later by pruning.
            group.sub_groups.extend(model_groups);
        }
        None => groups.push(ActionGroup {
            name: MODEL_INSTANCE_GROUP_NAME.to_string(),
            name_en: MODEL_INSTANCE_GROUP_NAME_EN.to_string(),
            sub_groups: model_groups,
            actions: Vec::new(),
        }),
    }
    groups
}

/// Keep only actions in `existing`, dropping groups left without content.
pub fn prune_action_groups(groups: &[ActionGroup], existing: &HashSet<String>) -> Vec<ActionGroup> {
    let mut pruned = Vec::new();
    for group in groups {
        let actions: Vec<ActionRef> = group
            .actions
            .iter()
            .filter(|action| existing.contains(&action.id))
            .cloned()
            .collect();
        let sub_groups = prune_action_groups(&group.sub_groups, existing);
        if actions.is_empty() && sub_groups.is_empty() {
            continue;
        }
        pruned.push(ActionGroup {
            name: group.name.clone(),
            name_en: group.name_en.clone(),
            sub_groups,
            actions,
        });
    }
    pruned
}

/// Difference between the desired and the registered catalog.
///
/// Removal lists are sorted so the order of mutating calls is stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDiff {
    pub added_resource_types: Vec<ResourceTypeEntry>,
    pub changed_resource_types: Vec<ResourceTypeEntry>,
    pub removed_resource_types: Vec<String>,
    pub added_instance_selections: Vec<InstanceSelectionEntry>,
    pub changed_instance_selections: Vec<InstanceSelectionEntry>,
    pub removed_instance_selections: Vec<String>,
    pub added_actions: Vec<ResourceActionEntry>,
    pub changed_actions: Vec<ResourceActionEntry>,
    pub removed_actions: Vec<String>,
}

/// Split `desired` into (added, changed) against `registered`, and return the
/// registered ids that qualify for removal but are no longer desired.
fn diff_kind<T, F, R>(
    desired: &[T],
    registered: &[T],
    id_of: F,
    removable: R,
) -> (Vec<T>, Vec<T>, Vec<String>)
where
    T: Clone + PartialEq,
    F: Fn(&T) -> &str,
    R: Fn(&str) -> bool,
{
    let registered_by_id: BTreeMap<&str, &T> =
        registered.iter().map(|entry| (id_of(entry), entry)).collect();
    let desired_ids: HashSet<&str> = desired.iter().map(&id_of).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    for entry in desired {
        match registered_by_id.get(id_of(entry)) {
            None => added.push(entry.clone()),
            Some(current) if *current != entry => changed.push(entry.clone()),
            Some(_) => {}
        }
    }

    let removed = registered_by_id
        .keys()
        .filter(|id| removable(**id) && !desired_ids.contains(**id))
        .map(|id| id.to_string())
        .collect();
    (added, changed, removed)
}

fn present<'a>(requested: &'a [String], registered: impl Iterator<Item = &'a str>) -> Vec<String> {
    let registered: HashSet<&str> = registered.collect();
    let unique: BTreeSet<&String> = requested
        .iter()
        .filter(|id| registered.contains(id.as_str()))
        .collect();
    unique.into_iter().cloned().collect()
}

impl CatalogDiff {
    pub fn compute(desired: &DesiredCatalog, registered: &RegisteredCatalog) -> Self {
        let (added_resource_types, changed_resource_types, removed_resource_types) = diff_kind(
            &desired.resource_types,
            &registered.resource_types,
            |entry| entry.id.as_str(),
            is_dynamic_type_id,
        );
        let (added_instance_selections, changed_instance_selections, removed_instance_selections) =
            diff_kind(
                &desired.instance_selections,
                &registered.instance_selections,
                |entry| entry.id.as_str(),
                is_dynamic_id,
            );
        let (added_actions, changed_actions, removed_actions) = diff_kind(
            &desired.actions,
            &registered.actions,
            |entry| entry.id.as_str(),
            is_dynamic_id,
        );

        Self {
            added_resource_types,
            changed_resource_types,
            removed_resource_types,
            added_instance_selections,
            changed_instance_selections,
            removed_instance_selections,
            added_actions,
            changed_actions,
            removed_actions,
        }
    }

    /// Removal of explicitly named entries that IAM actually reports.
    pub fn removal(request: &CatalogRemoval, registered: &RegisteredCatalog) -> Self {
        Self {
            removed_actions: present(
                &request.action_ids,
                registered.actions.iter().map(|entry| entry.id.as_str()),
            ),
            removed_instance_selections: present(
                &request.instance_selection_ids,
                registered
                    .instance_selections
                    .iter()
                    .map(|entry| entry.id.as_str()),
            ),
            removed_resource_types: present(
                &request.type_ids,
                registered.resource_types.iter().map(|entry| entry.id.as_str()),
            ),
            ..Self::default()
        }
    }

    pub fn actions_changed(&self) -> bool {
        !self.added_actions.is_empty() || !self.removed_actions.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.added_resource_types.is_empty()
            && self.changed_resource_types.is_empty()
            && self.removed_resource_types.is_empty()
            && self.added_instance_selections.is_empty()
            && self.changed_instance_selections.is_empty()
            && self.removed_instance_selections.is_empty()
            && self.added_actions.is_empty()
            && self.changed_actions.is_empty()
            && self.removed_actions.is_empty()
    }
}
