pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod services;
pub mod types;

pub use cache::{CompetencyCache, ManualClock, SystemClock};
pub use config::{AllocationWeights, CacheConfig, EngineConfig};
pub use engine::CompetencyEngine;
pub use error::{EngineError, EngineResult};
pub use services::allocation::{Allocation, AllocationEngine, AllocationPlan};
pub use types::{
    CompetencyDefinition, Level, LevelChange, LevelSummary, ProfileLevels, Question,
    QuestionWithLevel, UserCompetencyRecord,
};
