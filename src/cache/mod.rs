pub mod clock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::db::{with_timeout, CompetencyRepository, StoreError};
use crate::types::ProfileLevels;

pub use clock::{Clock, ManualClock, SystemClock};

struct CacheEntry {
    levels: Arc<ProfileLevels>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// One slot per profile. The async mutex is held across the store read, so
// concurrent misses for the same profile wait for the first read instead of
// issuing their own.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_reads: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub store_reads: u64,
    pub store_failures: u64,
    pub tracked_profiles: usize,
}

/// Read-through, TTL-bounded cache of per-profile competency levels.
pub struct CompetencyCache {
    repository: Arc<dyn CompetencyRepository>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    slots: RwLock<HashMap<String, Slot>>,
    counters: Counters,
}

impl CompetencyCache {
    pub fn new(repository: Arc<dyn CompetencyRepository>, config: CacheConfig) -> Self {
        Self::with_clock(repository, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<dyn CompetencyRepository>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            slots: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Levels for `profile_id`, rebuilt from the store when missing or expired.
    /// Store failures are returned as-is and leave the slot empty.
    pub async fn get(&self, profile_id: &str) -> Result<Arc<ProfileLevels>, StoreError> {
        let slot = self.slot(profile_id);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.is_fresh(self.clock.now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(profile_id, "competency cache hit");
                return Ok(Arc::clone(&cached.levels));
            }
            tracing::debug!(profile_id, expires_at = %cached.expires_at, "competency cache entry expired");
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        *entry = None;

        self.counters.store_reads.fetch_add(1, Ordering::Relaxed);
        let records = with_timeout(
            "find_all_for_profile",
            self.config.store_timeout,
            self.repository.find_all_for_profile(profile_id),
        )
        .await
        .map_err(|err| {
            self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(profile_id, error = %err, "failed to load competency levels");
            err
        })?;

        let levels = Arc::new(ProfileLevels::from_records(records));
        let expires_at = self.expiry_from(self.clock.now());
        tracing::debug!(
            profile_id,
            stored = levels.stored_count(),
            %expires_at,
            "competency cache populated"
        );

        *entry = Some(CacheEntry {
            levels: Arc::clone(&levels),
            expires_at,
        });
        Ok(levels)
    }

    /// Drops the cached entry. Waits for an in-flight population of the same
    /// profile to finish first, so it is never resurrected by that read.
    pub async fn invalidate(&self, profile_id: &str) {
        let slot = self.slots.read().get(profile_id).cloned();
        if let Some(slot) = slot {
            let mut entry = slot.lock().await;
            if entry.take().is_some() {
                tracing::debug!(profile_id, "competency cache entry invalidated");
            }
        }
    }

    pub fn clear(&self) {
        let mut slots = self.slots.write();
        let dropped = slots.len();
        slots.clear();
        tracing::debug!(dropped, "competency cache cleared");
    }

    /// Releases slots that hold nothing fresh and are not in use. Expiry is
    /// already enforced on read; this only bounds memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry.as_ref().map(|e| e.is_fresh(now)).unwrap_or(false),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            store_reads: self.counters.store_reads.load(Ordering::Relaxed),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
            tracked_profiles: self.slots.read().len(),
        }
    }

    fn slot(&self, profile_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(profile_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(profile_id.to_string()).or_default())
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = apply_ttl_jitter(self.config.ttl, self.config.ttl_jitter_ratio);
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Lengthens `ttl` by up to `ratio` of itself. Never shortens it, so an entry
/// always lives at least the configured TTL.
fn apply_ttl_jitter(ttl: Duration, ratio: f64) -> Duration {
    if ttl.is_zero() || !(ratio > 0.0) {
        return ttl;
    }
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0..=1.0 + ratio);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}
