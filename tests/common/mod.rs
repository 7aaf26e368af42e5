#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use competency_engine::cache::ManualClock;
use competency_engine::db::memory::{
    InMemoryCatalogRepository, InMemoryCompetencyRepository, InMemoryQuestionRepository,
};
use competency_engine::{CacheConfig, CompetencyDefinition, CompetencyEngine, EngineConfig, Question};

pub const CATALOG: [(&str, &str); 4] = [
    ("comp-a", "Fractions"),
    ("comp-b", "Decimals"),
    ("comp-c", "Percentages"),
    ("comp-d", "Ratios"),
];

pub struct Harness {
    pub engine: CompetencyEngine,
    pub levels: Arc<InMemoryCompetencyRepository>,
    pub catalog: Arc<InMemoryCatalogRepository>,
    pub questions: Arc<InMemoryQuestionRepository>,
    pub clock: Arc<ManualClock>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        cache: CacheConfig {
            ttl: Duration::from_secs(300),
            ttl_jitter_ratio: 0.0,
            store_timeout: Duration::from_millis(250),
        },
        ..EngineConfig::default()
    }
}

pub fn definitions() -> Vec<CompetencyDefinition> {
    CATALOG
        .iter()
        .map(|(id, name)| CompetencyDefinition {
            id: id.to_string(),
            code: name.to_uppercase(),
            name: name.to_string(),
            description: Some(format!("Practice {name}")),
        })
        .collect()
}

pub fn question_bank(per_competency: usize) -> Vec<Question> {
    CATALOG
        .iter()
        .flat_map(|(_, name)| {
            (0..per_competency).map(move |idx| Question {
                id: format!("{name}-{idx}"),
                competency_name: name.to_string(),
                content: serde_json::json!({ "prompt": format!("{name} question {idx}") }),
            })
        })
        .collect()
}

pub fn harness(levels: InMemoryCompetencyRepository) -> Harness {
    harness_with(levels, question_bank(20))
}

pub fn harness_with(levels: InMemoryCompetencyRepository, bank: Vec<Question>) -> Harness {
    competency_engine::logging::init_test_tracing();

    let levels = Arc::new(levels);
    let catalog = Arc::new(InMemoryCatalogRepository::new(definitions()));
    let questions = Arc::new(InMemoryQuestionRepository::new(bank));
    let clock = Arc::new(ManualClock::default());
    let engine = CompetencyEngine::with_clock(
        test_config(),
        levels.clone(),
        catalog.clone(),
        questions.clone(),
        clock.clone(),
    );

    Harness {
        engine,
        levels,
        catalog,
        questions,
        clock,
    }
}
