//! Batch authorization against IAM.
//!
//! # Purpose and responsibility
//! Turns an ordered list of CMDB access checks into one IAM batch decision
//! call and returns one decision per check, in input order.
//!
//! # Where it fits
//! The batch authorization endpoints call [`BatchAuthorizer::authorize_batch`].
//! Mapping goes through [`ResourceMapper`]; decisions come from [`IamClient`].
//!
//! # Key invariants and assumptions
//! - The output always has the same length as the input.
//! - Skipped checks are decided locally as authorized and never sent to IAM.
//! - A single mapping failure fails the whole batch; nothing defaults to allow.
//! - IAM decisions fill the undecided slots in order. A count mismatch is an
//!   error rather than a partial answer.
use crate::iam::{
    ActionId, AuthorizeBatchRequest, AuthorizeItem, Decision, IamClient, IamError, Subject,
};
use cmdb_authz::{AuthzError, CmdbAction, ResourceAttribute, ResourceMapper};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("resource {index} cannot be mapped: {source}")]
    Mapping {
        index: usize,
        #[source]
        source: AuthzError,
    },
    #[error(transparent)]
    Iam(#[from] IamError),
    #[error("iam returned {actual} decisions for {expected} checks")]
    DecisionCount { expected: usize, actual: usize },
}

pub type AuthorizeResult<T> = Result<T, AuthorizeError>;

#[derive(Clone)]
pub struct BatchAuthorizer {
    enabled: bool,
    mapper: ResourceMapper,
    iam: Arc<dyn IamClient>,
}

impl BatchAuthorizer {
    pub fn new(enabled: bool, mapper: ResourceMapper, iam: Arc<dyn IamClient>) -> Self {
        Self {
            enabled,
            mapper,
            iam,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide every check in `resources` for `user`.
    ///
    /// `exact` asks IAM to require every listed resource; otherwise any grant
    /// on the action is enough.
    ///
    /// # Errors
    /// - [`AuthorizeError::Mapping`] for the first check that cannot be mapped.
    /// - [`AuthorizeError::Iam`] when the decision call fails.
    /// - [`AuthorizeError::DecisionCount`] when IAM answers the wrong number of items.
    pub async fn authorize_batch(
        &self,
        user: &str,
        resources: &[ResourceAttribute],
        exact: bool,
    ) -> AuthorizeResult<Vec<Decision>> {
        if !self.enabled {
            metrics::counter!("cmdb_auth_decisions_total", "outcome" => "disabled")
                .increment(resources.len() as u64);
            return Ok(vec![Decision { authorized: true }; resources.len()]);
        }

        let mut decisions: Vec<Option<Decision>> = vec![None; resources.len()];
        let mut batch = Vec::new();
        for (index, attr) in resources.iter().enumerate() {
            if attr.action == CmdbAction::SkipAction {
                decisions[index] = Some(Decision { authorized: true });
                continue;
            }
            let (action, refs) = self
                .mapper
                .adapt(attr)
                .map_err(|source| AuthorizeError::Mapping { index, source })?;
            if action.is_skip() {
                tracing::debug!(
                    index,
                    resource_type = %attr.resource_type,
                    action = %attr.action,
                    "authorization skipped"
                );
                decisions[index] = Some(Decision { authorized: true });
                continue;
            }
            batch.push(AuthorizeItem {
                action: ActionId {
                    id: action.to_string(),
                },
                resources: refs,
            });
        }

        let skipped = (resources.len() - batch.len()) as u64;
        metrics::counter!("cmdb_auth_decisions_total", "outcome" => "skipped").increment(skipped);
        if batch.is_empty() {
            return Ok(decisions.into_iter().flatten().collect());
        }

        let expected = batch.len();
        let request = AuthorizeBatchRequest {
            system: self.mapper.system_id().to_string(),
            subject: Subject::user(user),
            batch,
        };
        let answered = self.iam.authorize_batch(&request, exact).await?;
        if answered.len() != expected {
            return Err(AuthorizeError::DecisionCount {
                expected,
                actual: answered.len(),
            });
        }

        let mut answered = answered.into_iter();
        for slot in decisions.iter_mut().filter(|slot| slot.is_none()) {
            let decision = answered.next().unwrap_or_default();
            let outcome = if decision.authorized {
                "allowed"
            } else {
                "denied"
            };
            metrics::counter!("cmdb_auth_decisions_total", "outcome" => outcome).increment(1);
            *slot = Some(decision);
        }
        Ok(decisions.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::memory::{IamCall, InMemoryIam};
    use cmdb_authz::CmdbResourceType;

    fn authorizer(iam: Arc<InMemoryIam>, enabled: bool) -> BatchAuthorizer {
        BatchAuthorizer::new(enabled, ResourceMapper::new("bk_cmdb"), iam)
    }

    fn skip() -> ResourceAttribute {
        ResourceAttribute::new(CmdbResourceType::NetDataCollector, CmdbAction::SkipAction)
    }

    fn edit_business(id: i64) -> ResourceAttribute {
        ResourceAttribute::new(CmdbResourceType::Business, CmdbAction::Update).with_instance(id)
    }

    fn authorized(decisions: &[Decision]) -> Vec<bool> {
        decisions.iter().map(|decision| decision.authorized).collect()
    }

    #[tokio::test]
    async fn all_skipped_never_calls_iam() {
        let iam = Arc::new(InMemoryIam::new());
        let host_find =
            ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Find);
        let decisions = authorizer(iam.clone(), true)
            .authorize_batch("alice", &[skip(), host_find, skip()], true)
            .await
            .expect("decisions");
        assert_eq!(authorized(&decisions), vec![true, true, true]);
        assert!(iam.calls().await.is_empty());
    }

    #[tokio::test]
    async fn decisions_keep_input_positions() {
        let iam = Arc::new(InMemoryIam::new());
        iam.grant("alice", "edit_business", Some(vec!["3".to_string()]))
            .await;
        let decisions = authorizer(iam.clone(), true)
            .authorize_batch(
                "alice",
                &[skip(), edit_business(4), skip(), edit_business(3)],
                true,
            )
            .await
            .expect("decisions");
        assert_eq!(authorized(&decisions), vec![true, false, true, true]);
        assert_eq!(
            iam.calls().await,
            vec![IamCall::AuthorizeBatch {
                items: 2,
                exact: true
            }]
        );
    }

    #[tokio::test]
    async fn any_mode_accepts_partial_grants() {
        let iam = Arc::new(InMemoryIam::new());
        iam.grant("bob", "edit_business", Some(vec!["3".to_string()]))
            .await;
        let decisions = authorizer(iam, true)
            .authorize_batch("bob", &[edit_business(9)], false)
            .await
            .expect("decisions");
        assert_eq!(authorized(&decisions), vec![true]);
    }

    #[tokio::test]
    async fn disabled_allows_everything_without_mapping() {
        let iam = Arc::new(InMemoryIam::new());
        let unmappable = ResourceAttribute::new(CmdbResourceType::HostInstance, CmdbAction::Archive);
        let decisions = authorizer(iam.clone(), false)
            .authorize_batch("alice", &[unmappable, edit_business(1)], true)
            .await
            .expect("decisions");
        assert_eq!(authorized(&decisions), vec![true, true]);
        assert!(iam.calls().await.is_empty());
    }

    #[tokio::test]
    async fn mapping_failure_fails_whole_batch() {
        let iam = Arc::new(InMemoryIam::new());
        let transfer = ResourceAttribute::new(
            CmdbResourceType::HostInstance,
            CmdbAction::MoveHostToAnotherBizModule,
        )
        .with_layer(CmdbResourceType::Business, 1);
        let err = authorizer(iam.clone(), true)
            .authorize_batch("alice", &[edit_business(1), transfer], true)
            .await
            .expect_err("not enough layers");
        match err {
            AuthorizeError::Mapping { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(source, AuthzError::NotEnoughLayer));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(iam.calls().await.is_empty());
    }

    #[tokio::test]
    async fn iam_failure_propagates() {
        let iam = Arc::new(InMemoryIam::new());
        iam.fail_on("authorize_batch").await;
        let err = authorizer(iam, true)
            .authorize_batch("alice", &[edit_business(1)], true)
            .await
            .expect_err("iam down");
        assert!(matches!(err, AuthorizeError::Iam(IamError::Api { .. })));
    }
}
