pub mod memory;
pub mod sqlite;
pub mod sqlite_schema;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{CompetencyDefinition, Level, Question, UserCompetencyRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("invalid stored level: {0}")]
    InvalidLevel(i64),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    TaskFailed(String),
}

impl StoreError {
    /// Transient failures the caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => true,
            Self::Sql(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            Self::InvalidLevel(_) | Self::Serialization(_) | Self::TaskFailed(_) => false,
        }
    }
}

/// Durable per-profile levels. Implementations only hold rows with a level
/// above zero.
#[async_trait]
pub trait CompetencyRepository: Send + Sync {
    async fn find_all_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UserCompetencyRecord>, StoreError>;

    async fn find_one(
        &self,
        profile_id: &str,
        competency_id: &str,
    ) -> Result<Option<UserCompetencyRecord>, StoreError>;

    async fn upsert(
        &self,
        profile_id: &str,
        competency_id: &str,
        level: Level,
    ) -> Result<UserCompetencyRecord, StoreError>;

    /// Deleting a missing row is not an error.
    async fn delete(&self, profile_id: &str, competency_id: &str) -> Result<(), StoreError>;

    async fn delete_all_for_profile(&self, profile_id: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait CompetencyCatalogRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<CompetencyDefinition>, StoreError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn find_by_competency(
        &self,
        competency_name: &str,
        limit: usize,
    ) -> Result<Vec<Question>, StoreError>;
}

/// Bounds a store call so a stalled backend surfaces as `StoreError::Timeout`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "store call timed out");
            Err(StoreError::Timeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
