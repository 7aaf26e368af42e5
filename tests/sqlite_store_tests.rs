mod common;

use std::path::PathBuf;

use competency_engine::db::sqlite::SqliteCompetencyStore;
use competency_engine::db::CompetencyRepository;
use competency_engine::{CompetencyEngine, Level};
use tempfile::TempDir;

use common::{definitions, question_bank, test_config};

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("competency.db")
}

async fn seeded_store(path: &PathBuf) -> SqliteCompetencyStore {
    let store = SqliteCompetencyStore::open(path).await.expect("open store");
    for (idx, definition) in definitions().iter().enumerate() {
        store
            .insert_definition(definition, idx as i64)
            .await
            .expect("insert definition");
    }
    for question in question_bank(10) {
        store.insert_question(&question).await.expect("insert question");
    }
    store
}

#[tokio::test]
async fn test_open_creates_schema_and_version() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCompetencyStore::open(&db_path(&dir)).await.unwrap();

    let version: String = sqlx::query_scalar(
        r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();

    assert_eq!(version, "1.0.0");
    assert!(db_path(&dir).exists());
}

#[tokio::test]
async fn test_migrate_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&db_path(&dir)).await;

    store.migrate().await.unwrap();

    let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "competency_definitions""#)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_levels_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let store = SqliteCompetencyStore::open(&path).await.unwrap();
    store.upsert("p1", "comp-a", Level::TWO).await.unwrap();
    store.upsert("p1", "comp-b", Level::ONE).await.unwrap();
    store.pool().close().await;

    let reopened = SqliteCompetencyStore::open(&path).await.unwrap();
    let records = reopened.find_all_for_profile("p1").await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].competency_id, "comp-a");
    assert_eq!(records[0].level, Level::TWO);
}

#[tokio::test]
async fn test_delete_all_for_profile_counts_rows() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCompetencyStore::open(&db_path(&dir)).await.unwrap();
    store.upsert("p1", "comp-a", Level::ONE).await.unwrap();
    store.upsert("p1", "comp-b", Level::MAX).await.unwrap();
    store.upsert("p2", "comp-a", Level::ONE).await.unwrap();

    assert_eq!(store.delete_all_for_profile("p1").await.unwrap(), 2);
    assert!(store.find_all_for_profile("p1").await.unwrap().is_empty());
    assert_eq!(store.find_all_for_profile("p2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_engine_end_to_end_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let store = seeded_store(&path).await;
    store.upsert("p1", "comp-a", Level::TWO).await.unwrap();
    store.upsert("p1", "comp-b", Level::ONE).await.unwrap();

    let engine = CompetencyEngine::from_sqlite(test_config(), store.clone());

    let questions = engine.get_dynamic_questions("p1", Some(5)).await.unwrap();
    assert_eq!(questions.len(), 5);
    assert_eq!(questions[0].question.competency_name, "Fractions");
    assert_eq!(questions[0].level, Level::TWO);

    let change = engine.submit_answer("p1", "comp-b", false).await.unwrap();
    assert_eq!(change.new_level, Level::ZERO);
    assert!(store.find_one("p1", "comp-b").await.unwrap().is_none());

    let levels = engine.get_effective_levels("p1").await.unwrap();
    assert_eq!(levels["comp-a"], Level::TWO);
    assert_eq!(levels["comp-b"], Level::ZERO);
}

#[tokio::test]
async fn test_upsert_refreshes_evaluation_time() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCompetencyStore::open(&db_path(&dir)).await.unwrap();

    let first = store.upsert("p1", "comp-a", Level::MAX).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = store.upsert("p1", "comp-a", Level::MAX).await.unwrap();

    assert_eq!(second.level, Level::MAX);
    assert!(second.last_evaluated_at > first.last_evaluated_at);
}
