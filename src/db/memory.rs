use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::db::{CompetencyCatalogRepository, CompetencyRepository, QuestionRepository, StoreError};
use crate::types::{CompetencyDefinition, Level, Question, UserCompetencyRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    profile_id: String,
    competency_id: String,
}

impl RecordKey {
    fn new(profile_id: &str, competency_id: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            competency_id: competency_id.to_string(),
        }
    }
}

/// Process-local competency store with call counters plus failure and
/// latency injection.
#[derive(Debug, Default)]
pub struct InMemoryCompetencyRepository {
    records: Mutex<HashMap<RecordKey, UserCompetencyRecord>>,
    profile_reads: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryCompetencyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels<'a, I>(profile_id: &str, levels: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u8)>,
    {
        let repo = Self::new();
        {
            let mut records = repo.records.lock();
            for (competency_id, value) in levels {
                let Some(level) = Level::new(value).filter(|level| !level.is_zero()) else {
                    continue;
                };
                records.insert(
                    RecordKey::new(profile_id, competency_id),
                    UserCompetencyRecord {
                        profile_id: profile_id.to_string(),
                        competency_id: competency_id.to_string(),
                        level,
                        last_evaluated_at: Utc::now(),
                    },
                );
            }
        }
        repo
    }

    /// Number of `find_all_for_profile` calls served so far.
    pub fn profile_reads(&self) -> u64 {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn contains(&self, profile_id: &str, competency_id: &str) -> bool {
        self.records
            .lock()
            .contains_key(&RecordKey::new(profile_id, competency_id))
    }

    pub fn row_count(&self) -> usize {
        self.records.lock().len()
    }

    async fn simulate_io(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CompetencyRepository for InMemoryCompetencyRepository {
    async fn find_all_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UserCompetencyRecord>, StoreError> {
        self.profile_reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;
        let records = self.records.lock();
        let mut out: Vec<UserCompetencyRecord> = records
            .values()
            .filter(|record| record.profile_id == profile_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.competency_id.cmp(&b.competency_id));
        Ok(out)
    }

    async fn find_one(
        &self,
        profile_id: &str,
        competency_id: &str,
    ) -> Result<Option<UserCompetencyRecord>, StoreError> {
        self.simulate_io().await?;
        Ok(self
            .records
            .lock()
            .get(&RecordKey::new(profile_id, competency_id))
            .cloned())
    }

    async fn upsert(
        &self,
        profile_id: &str,
        competency_id: &str,
        level: Level,
    ) -> Result<UserCompetencyRecord, StoreError> {
        if level.is_zero() {
            return Err(StoreError::InvalidLevel(0));
        }
        self.simulate_io().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let record = UserCompetencyRecord {
            profile_id: profile_id.to_string(),
            competency_id: competency_id.to_string(),
            level,
            last_evaluated_at: Utc::now(),
        };
        self.records
            .lock()
            .insert(RecordKey::new(profile_id, competency_id), record.clone());
        Ok(record)
    }

    async fn delete(&self, profile_id: &str, competency_id: &str) -> Result<(), StoreError> {
        self.simulate_io().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .remove(&RecordKey::new(profile_id, competency_id));
        Ok(())
    }

    async fn delete_all_for_profile(&self, profile_id: &str) -> Result<u64, StoreError> {
        self.simulate_io().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|key, _| key.profile_id != profile_id);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogRepository {
    definitions: Vec<CompetencyDefinition>,
    loads: AtomicU64,
}

impl InMemoryCatalogRepository {
    pub fn new(definitions: Vec<CompetencyDefinition>) -> Self {
        Self {
            definitions,
            loads: AtomicU64::new(0),
        }
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompetencyCatalogRepository for InMemoryCatalogRepository {
    async fn list_all(&self) -> Result<Vec<CompetencyDefinition>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.definitions.clone())
    }
}

/// Question bank keyed by competency name. Records every request it serves.
#[derive(Debug, Default)]
pub struct InMemoryQuestionRepository {
    by_competency: HashMap<String, Vec<Question>>,
    requests: Mutex<Vec<(String, usize)>>,
}

impl InMemoryQuestionRepository {
    pub fn new(questions: Vec<Question>) -> Self {
        let mut by_competency: HashMap<String, Vec<Question>> = HashMap::new();
        for question in questions {
            by_competency
                .entry(question.competency_name.clone())
                .or_default()
                .push(question);
        }
        Self {
            by_competency,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, usize)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl QuestionRepository for InMemoryQuestionRepository {
    async fn find_by_competency(
        &self,
        competency_name: &str,
        limit: usize,
    ) -> Result<Vec<Question>, StoreError> {
        self.requests
            .lock()
            .push((competency_name.to_string(), limit));
        Ok(self
            .by_competency
            .get(competency_name)
            .map(|questions| questions.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_rejects_level_zero() {
        let repo = InMemoryCompetencyRepository::new();
        let result = repo.upsert("p1", "c1", Level::ZERO).await;
        assert!(matches!(result, Err(StoreError::InvalidLevel(0))));
        assert_eq!(repo.row_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_noop() {
        let repo = InMemoryCompetencyRepository::new();
        repo.delete("p1", "c1").await.unwrap();
        assert_eq!(repo.row_count(), 0);
    }

    #[tokio::test]
    async fn test_seeded_zero_levels_are_skipped() {
        let repo = InMemoryCompetencyRepository::with_levels("p1", [("a", 0), ("b", 2)]);
        assert!(!repo.contains("p1", "a"));
        assert!(repo.contains("p1", "b"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let repo = InMemoryCompetencyRepository::new();
        repo.set_unavailable(true);
        assert!(repo.find_all_for_profile("p1").await.is_err());
        assert_eq!(repo.profile_reads(), 1);
    }
}
