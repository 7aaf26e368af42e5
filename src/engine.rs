use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheStats, Clock, CompetencyCache, SystemClock};
use crate::config::EngineConfig;
use crate::db::sqlite::SqliteCompetencyStore;
use crate::db::{CompetencyCatalogRepository, CompetencyRepository, QuestionRepository};
use crate::error::{EngineError, EngineResult};
use crate::services::allocation::{AllocationEngine, AllocationPlan};
use crate::services::catalog::{CatalogService, CompetencyCatalog};
use crate::services::level_updater::LevelUpdater;
use crate::services::selector::QuestionSelector;
use crate::types::{Level, LevelChange, LevelSummary, QuestionWithLevel};

/// Entry point for the surrounding service layer: question selection,
/// answer submission and level queries for learner profiles.
pub struct CompetencyEngine {
    config: EngineConfig,
    catalog: CatalogService,
    cache: Arc<CompetencyCache>,
    allocation: AllocationEngine,
    selector: QuestionSelector,
    updater: LevelUpdater,
}

impl CompetencyEngine {
    pub fn new(
        config: EngineConfig,
        competencies: Arc<dyn CompetencyRepository>,
        catalog: Arc<dyn CompetencyCatalogRepository>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self::with_clock(config, competencies, catalog, questions, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        competencies: Arc<dyn CompetencyRepository>,
        catalog: Arc<dyn CompetencyCatalogRepository>,
        questions: Arc<dyn QuestionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store_timeout = config.cache.store_timeout;
        let cache = Arc::new(CompetencyCache::with_clock(
            Arc::clone(&competencies),
            config.cache,
            clock,
        ));

        Self {
            catalog: CatalogService::new(catalog, store_timeout),
            allocation: AllocationEngine::new(config.weights),
            selector: QuestionSelector::new(questions, store_timeout),
            updater: LevelUpdater::new(competencies, Arc::clone(&cache), store_timeout),
            cache,
            config,
        }
    }

    /// Engine whose levels, catalog and questions all live in one SQLite store.
    pub fn from_sqlite(config: EngineConfig, store: SqliteCompetencyStore) -> Self {
        let store = Arc::new(store);
        Self::new(config, store.clone(), store.clone(), store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Questions for the profile's next practice round. `None` uses the
    /// configured default budget.
    pub async fn get_dynamic_questions(
        &self,
        profile_id: &str,
        max_questions: Option<usize>,
    ) -> EngineResult<Vec<QuestionWithLevel>> {
        let catalog = self.catalog.catalog().await?;
        let plan = self.plan_with(&catalog, profile_id, max_questions).await?;
        let questions = self.selector.select(&catalog, &plan).await?;
        tracing::debug!(
            profile_id,
            planned = plan.total(),
            selected = questions.len(),
            "dynamic questions selected"
        );
        Ok(questions)
    }

    pub async fn plan_questions(
        &self,
        profile_id: &str,
        max_questions: Option<usize>,
    ) -> EngineResult<AllocationPlan> {
        let catalog = self.catalog.catalog().await?;
        self.plan_with(&catalog, profile_id, max_questions).await
    }

    pub async fn submit_answer(
        &self,
        profile_id: &str,
        competency_id: &str,
        is_correct: bool,
    ) -> EngineResult<LevelChange> {
        validate_profile_id(profile_id)?;
        self.ensure_known(competency_id).await?;
        Ok(self
            .updater
            .apply_answer(profile_id, competency_id, is_correct)
            .await?)
    }

    /// Applies a batch of answers in order. Unknown competencies reject the
    /// whole batch before anything is written.
    pub async fn submit_answers(
        &self,
        profile_id: &str,
        answers: &[(String, bool)],
    ) -> EngineResult<Vec<LevelChange>> {
        validate_profile_id(profile_id)?;
        let catalog = self.catalog.catalog().await?;
        if let Some((unknown, _)) = answers.iter().find(|(id, _)| !catalog.contains(id)) {
            return Err(EngineError::UnknownCompetency(unknown.clone()));
        }
        Ok(self.updater.apply_answers(profile_id, answers).await?)
    }

    /// Level of every catalog competency, 0 for those with no stored level.
    pub async fn get_effective_levels(&self, profile_id: &str) -> EngineResult<BTreeMap<String, Level>> {
        validate_profile_id(profile_id)?;
        let catalog = self.catalog.catalog().await?;
        let levels = self.cache.get(profile_id).await?;
        Ok(catalog
            .iter()
            .map(|definition| (definition.id.clone(), levels.level(&definition.id)))
            .collect())
    }

    pub async fn get_level_summary(&self, profile_id: &str) -> EngineResult<LevelSummary> {
        validate_profile_id(profile_id)?;
        let catalog = self.catalog.catalog().await?;
        let levels = self.cache.get(profile_id).await?;
        let mut summary = LevelSummary::default();
        for definition in catalog.iter() {
            summary.record(levels.level(&definition.id));
        }
        Ok(summary)
    }

    pub async fn reset_profile(&self, profile_id: &str) -> EngineResult<u64> {
        validate_profile_id(profile_id)?;
        Ok(self.updater.reset_profile(profile_id).await?)
    }

    pub async fn reload_catalog(&self) -> EngineResult<usize> {
        let catalog = self.catalog.reload().await?;
        Ok(catalog.len())
    }

    pub async fn invalidate_profile(&self, profile_id: &str) {
        self.cache.invalidate(profile_id).await;
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn plan_with(
        &self,
        catalog: &CompetencyCatalog,
        profile_id: &str,
        max_questions: Option<usize>,
    ) -> EngineResult<AllocationPlan> {
        validate_profile_id(profile_id)?;
        let budget = self.resolve_budget(max_questions);
        if budget == 0 || catalog.is_empty() {
            return Ok(AllocationPlan::default());
        }
        let levels = self.cache.get(profile_id).await?;
        Ok(self.allocation.plan(catalog, &levels, budget))
    }

    fn resolve_budget(&self, max_questions: Option<usize>) -> usize {
        let requested = max_questions.unwrap_or(self.config.default_max_questions);
        if requested > self.config.max_questions_limit {
            tracing::warn!(
                requested,
                limit = self.config.max_questions_limit,
                "question budget clamped"
            );
            return self.config.max_questions_limit;
        }
        requested
    }

    async fn ensure_known(&self, competency_id: &str) -> EngineResult<()> {
        let catalog = self.catalog.catalog().await?;
        if catalog.contains(competency_id) {
            Ok(())
        } else {
            Err(EngineError::UnknownCompetency(competency_id.to_string()))
        }
    }
}

fn validate_profile_id(profile_id: &str) -> EngineResult<()> {
    if profile_id.trim().is_empty() {
        return Err(EngineError::Validation("profileId must not be empty".to_string()));
    }
    Ok(())
}
