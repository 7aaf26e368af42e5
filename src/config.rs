use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::{self, FileLogGuard};
use crate::types::Level;

const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;
const DEFAULT_TTL_JITTER_RATIO: f64 = 0.1;
const MAX_TTL_JITTER_RATIO: f64 = 0.5;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MAX_QUESTIONS: usize = 20;
const DEFAULT_MAX_QUESTIONS_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Fraction of `ttl` randomly added to each entry's expiry.
    pub ttl_jitter_ratio: f64,
    pub store_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            ttl_jitter_ratio: DEFAULT_TTL_JITTER_RATIO,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

/// Questions served per competency at each level, indexed by level value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationWeights(pub [usize; 4]);

impl AllocationWeights {
    pub fn weight(&self, level: Level) -> usize {
        self.0[level.value() as usize]
    }
}

impl Default for AllocationWeights {
    fn default() -> Self {
        Self([3, 2, 1, 0])
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub weights: AllocationWeights,
    pub default_max_questions: usize,
    pub max_questions_limit: usize,
    /// `EnvFilter` directive for [`EngineConfig::init_logging`], from `RUST_LOG`.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            weights: AllocationWeights::default(),
            default_max_questions: DEFAULT_MAX_QUESTIONS,
            max_questions_limit: DEFAULT_MAX_QUESTIONS_LIMIT,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads a `.env` file if present, then the process environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Installs the global tracing subscriber at `log_level`. Hosts that set
    /// up their own subscriber skip this. Keep the returned guard alive for
    /// as long as file logs should be written.
    pub fn init_logging(&self) -> Option<FileLogGuard> {
        logging::init_tracing(&self.log_level)
    }

    pub fn from_env() -> Self {
        let ttl_secs = env_u64("COMPETENCY_CACHE_TTL_SECS").unwrap_or(DEFAULT_CACHE_TTL_SECS);
        let ttl_jitter_ratio = env_f64("COMPETENCY_CACHE_TTL_JITTER")
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(0.0, MAX_TTL_JITTER_RATIO))
            .unwrap_or(DEFAULT_TTL_JITTER_RATIO);
        let store_timeout_ms = env_u64("COMPETENCY_STORE_TIMEOUT_MS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
        let max_questions_limit = env_u64("COMPETENCY_MAX_QUESTIONS_LIMIT")
            .map(|value| value as usize)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_QUESTIONS_LIMIT);
        let default_max_questions = env_u64("COMPETENCY_DEFAULT_MAX_QUESTIONS")
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_QUESTIONS)
            .min(max_questions_limit);
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            cache: CacheConfig {
                ttl: Duration::from_secs(ttl_secs),
                ttl_jitter_ratio,
                store_timeout: Duration::from_millis(store_timeout_ms),
            },
            weights: AllocationWeights::default(),
            default_max_questions,
            max_questions_limit,
            log_level,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn env_f64(key: &str) -> Option<f64> {
    let value = std::env::var(key).ok()?;
    value.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_favor_low_levels() {
        let weights = AllocationWeights::default();
        assert_eq!(weights.weight(Level::ZERO), 3);
        assert_eq!(weights.weight(Level::MAX), 0);
    }

    #[test]
    fn test_from_env_reads_overrides() {
        std::env::set_var("COMPETENCY_CACHE_TTL_SECS", "42");
        std::env::set_var("COMPETENCY_CACHE_TTL_JITTER", "3.0");
        std::env::set_var("COMPETENCY_STORE_TIMEOUT_MS", "not-a-number");
        std::env::set_var("COMPETENCY_DEFAULT_MAX_QUESTIONS", "500");
        std::env::set_var("COMPETENCY_MAX_QUESTIONS_LIMIT", "50");

        let config = EngineConfig::from_env();

        std::env::remove_var("COMPETENCY_CACHE_TTL_SECS");
        std::env::remove_var("COMPETENCY_CACHE_TTL_JITTER");
        std::env::remove_var("COMPETENCY_STORE_TIMEOUT_MS");
        std::env::remove_var("COMPETENCY_DEFAULT_MAX_QUESTIONS");
        std::env::remove_var("COMPETENCY_MAX_QUESTIONS_LIMIT");

        assert_eq!(config.cache.ttl, Duration::from_secs(42));
        assert_eq!(config.cache.ttl_jitter_ratio, MAX_TTL_JITTER_RATIO);
        assert_eq!(
            config.cache.store_timeout,
            Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS)
        );
        assert_eq!(config.max_questions_limit, 50);
        assert_eq!(config.default_max_questions, 50);
    }

    #[test]
    fn test_init_logging_tolerates_bad_directive() {
        let config = EngineConfig {
            log_level: "competency_engine=[nonsense".to_string(),
            ..EngineConfig::default()
        };
        let _first = config.init_logging();
        assert!(config.init_logging().is_none());
    }
}
