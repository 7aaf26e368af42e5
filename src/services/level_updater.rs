use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::CompetencyCache;
use crate::db::{with_timeout, CompetencyRepository, StoreError};
use crate::types::{effective_level, LevelChange};

type ProfileLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Applies answer outcomes to stored levels. Writes for one profile are
/// serialized; every write is followed by a cache invalidation.
///
/// Each update runs on its own task, so a caller that stops waiting does not
/// cut a store write off from its invalidation.
pub struct LevelUpdater {
    inner: Arc<UpdaterInner>,
}

struct UpdaterInner {
    repository: Arc<dyn CompetencyRepository>,
    cache: Arc<CompetencyCache>,
    store_timeout: Duration,
    profile_locks: ProfileLocks,
}

impl LevelUpdater {
    pub fn new(
        repository: Arc<dyn CompetencyRepository>,
        cache: Arc<CompetencyCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                repository,
                cache,
                store_timeout,
                profile_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn apply_answer(
        &self,
        profile_id: &str,
        competency_id: &str,
        is_correct: bool,
    ) -> Result<LevelChange, StoreError> {
        let competency_id = competency_id.to_string();
        self.run_locked(profile_id, move |inner, profile_id| async move {
            let result = inner.transition(&profile_id, &competency_id, is_correct).await;
            inner.cache.invalidate(&profile_id).await;
            result
        })
        .await
    }

    /// Applies answers in order and invalidates once. Stops at the first
    /// store failure; answers before it stay applied.
    pub async fn apply_answers(
        &self,
        profile_id: &str,
        answers: &[(String, bool)],
    ) -> Result<Vec<LevelChange>, StoreError> {
        if answers.is_empty() {
            return Ok(Vec::new());
        }

        let answers = answers.to_vec();
        self.run_locked(profile_id, move |inner, profile_id| async move {
            let mut changes = Vec::with_capacity(answers.len());
            let mut failure = None;
            for (competency_id, is_correct) in &answers {
                match inner.transition(&profile_id, competency_id, *is_correct).await {
                    Ok(change) => changes.push(change),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            inner.cache.invalidate(&profile_id).await;
            match failure {
                Some(err) => Err(err),
                None => Ok(changes),
            }
        })
        .await
    }

    /// Removes every stored level for the profile, returning it to all zeros.
    pub async fn reset_profile(&self, profile_id: &str) -> Result<u64, StoreError> {
        let result = self
            .run_locked(profile_id, |inner, profile_id| async move {
                let result = with_timeout(
                    "delete_all_for_profile",
                    inner.store_timeout,
                    inner.repository.delete_all_for_profile(&profile_id),
                )
                .await;
                inner.cache.invalidate(&profile_id).await;
                result
            })
            .await;

        if let Ok(removed) = result {
            tracing::info!(profile_id, removed, "competency levels reset");
        }
        result
    }

    /// Runs `work` on a spawned task under the profile's write lock.
    async fn run_locked<T, F, Fut>(&self, profile_id: &str, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<UpdaterInner>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let profile_id = profile_id.to_string();
        let handle = tokio::spawn(async move {
            let lock = ProfileLock::acquire(&inner.profile_locks, &profile_id);
            let _held = lock.mutex.lock().await;
            work(Arc::clone(&inner), profile_id.clone()).await
        });

        match handle.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "level update task failed");
                Err(StoreError::TaskFailed(err.to_string()))
            }
        }
    }

    #[cfg(test)]
    fn tracked_profiles(&self) -> usize {
        self.inner.profile_locks.lock().len()
    }
}

impl UpdaterInner {
    async fn transition(
        &self,
        profile_id: &str,
        competency_id: &str,
        is_correct: bool,
    ) -> Result<LevelChange, StoreError> {
        let stored = with_timeout(
            "find_one",
            self.store_timeout,
            self.repository.find_one(profile_id, competency_id),
        )
        .await?;
        let had_row = stored.is_some();
        let previous_level = effective_level(stored.map(|record| record.level));
        let new_level = previous_level.after_answer(is_correct);

        if new_level.is_zero() {
            // No row means level 0 already.
            if had_row {
                with_timeout(
                    "delete",
                    self.store_timeout,
                    self.repository.delete(profile_id, competency_id),
                )
                .await?;
            }
        } else {
            // Also taken when the level stays at the top, to refresh lastEvaluatedAt.
            with_timeout(
                "upsert",
                self.store_timeout,
                self.repository.upsert(profile_id, competency_id, new_level),
            )
            .await?;
        }

        let change = LevelChange {
            previous_level,
            new_level,
        };
        if change.is_changed() {
            tracing::info!(
                profile_id,
                competency_id,
                previous = %previous_level,
                new = %new_level,
                "competency level changed"
            );
        } else {
            tracing::debug!(profile_id, competency_id, level = %new_level, "competency level unchanged");
        }
        Ok(change)
    }
}

/// One holder's share of a profile's write lock. Dropping it removes the map
/// entry once nobody else holds or waits on the lock.
struct ProfileLock<'a> {
    locks: &'a ProfileLocks,
    profile_id: &'a str,
    mutex: Arc<AsyncMutex<()>>,
}

impl<'a> ProfileLock<'a> {
    fn acquire(locks: &'a ProfileLocks, profile_id: &'a str) -> Self {
        let mutex = Arc::clone(locks.lock().entry(profile_id.to_string()).or_default());
        Self {
            locks,
            profile_id,
            mutex,
        }
    }
}

impl Drop for ProfileLock<'_> {
    // Clones are only handed out under the map mutex, so a count of two (the
    // map and this holder) is final.
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(self.profile_id)
            .map(|mutex| Arc::strong_count(mutex) == 2)
            .unwrap_or(false);
        if idle {
            locks.remove(self.profile_id);
        }
    }
}
