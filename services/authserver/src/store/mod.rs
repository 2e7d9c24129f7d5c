//! Resource store abstraction.
//!
//! # Purpose
//! Read access to CMDB collections by storage condition. The lister, the
//! model cache and the host relation lookup all go through [`ResourceStore`].
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

pub mod memory;
pub mod relations;

/// A stored document.
pub type Document = Map<String, Value>;

/// Offset pagination; a zero limit returns every row after `offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Page {
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    /// Matching rows before pagination.
    pub count: u64,
    pub rows: Vec<Document>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Rows of `collection` matching `condition`, projected to `fields`
    /// (all fields when empty).
    async fn find(
        &self,
        collection: &str,
        condition: &Document,
        fields: &[String],
        page: Page,
    ) -> StoreResult<FindResult>;

    /// Distinct non-null values of `field` across matching rows, in first-seen order.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        condition: &Document,
    ) -> StoreResult<Vec<Value>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
