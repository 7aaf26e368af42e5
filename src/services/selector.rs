use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::db::{with_timeout, QuestionRepository, StoreError};
use crate::services::allocation::AllocationPlan;
use crate::services::catalog::CompetencyCatalog;
use crate::types::QuestionWithLevel;

const MAX_CONCURRENT_FETCHES: usize = 4;

pub struct QuestionSelector {
    repository: Arc<dyn QuestionRepository>,
    store_timeout: Duration,
}

impl QuestionSelector {
    pub fn new(repository: Arc<dyn QuestionRepository>, store_timeout: Duration) -> Self {
        Self {
            repository,
            store_timeout,
        }
    }

    /// Fetches up to each competency's quota, in plan order. A short question
    /// bank yields fewer questions, not an error.
    pub async fn select(
        &self,
        catalog: &CompetencyCatalog,
        plan: &AllocationPlan,
    ) -> Result<Vec<QuestionWithLevel>, StoreError> {
        let requests = plan.iter().filter_map(|allocation| {
            let Some(definition) = catalog.get(&allocation.competency_id) else {
                tracing::warn!(
                    competency_id = %allocation.competency_id,
                    "allocated competency missing from catalog"
                );
                return None;
            };
            Some(async move {
                let questions = with_timeout(
                    "find_by_competency",
                    self.store_timeout,
                    self.repository
                        .find_by_competency(&definition.name, allocation.count),
                )
                .await?;

                if questions.len() < allocation.count {
                    tracing::debug!(
                        competency_id = %allocation.competency_id,
                        requested = allocation.count,
                        available = questions.len(),
                        "question bank shortfall"
                    );
                }

                Ok::<_, StoreError>(
                    questions
                        .into_iter()
                        .take(allocation.count)
                        .map(|question| QuestionWithLevel {
                            question,
                            competency_id: allocation.competency_id.clone(),
                            level: allocation.level,
                        })
                        .collect::<Vec<_>>(),
                )
            })
        });

        let batches: Vec<Vec<QuestionWithLevel>> = stream::iter(requests)
            .buffered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }
}
