use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::sqlite_schema::{split_sql_statements, COMPETENCY_SCHEMA_SQL, SCHEMA_VERSION};
use crate::db::{CompetencyCatalogRepository, CompetencyRepository, QuestionRepository, StoreError};
use crate::types::{CompetencyDefinition, Level, Question, UserCompetencyRecord};

/// SQLite-backed implementation of every repository the engine consumes.
#[derive(Debug, Clone)]
pub struct SqliteCompetencyStore {
    pool: SqlitePool,
}

impl SqliteCompetencyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) a database file and applies the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection is kept open for the
    /// pool's lifetime, otherwise the database would vanish with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in split_sql_statements(COMPETENCY_SCHEMA_SQL) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#)
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert_definition(
        &self,
        definition: &CompetencyDefinition,
        sort_order: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "competency_definitions" ("id","code","name","description","sortOrder")
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT ("id") DO UPDATE SET
              "code" = excluded."code",
              "name" = excluded."name",
              "description" = excluded."description",
              "sortOrder" = excluded."sortOrder"
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.code)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_question(&self, question: &Question) -> Result<(), StoreError> {
        let content = serde_json::to_string(&question.content)?;
        sqlx::query(
            r#"
            INSERT INTO "questions" ("id","competencyName","content")
            VALUES (?, ?, ?)
            ON CONFLICT ("id") DO UPDATE SET
              "competencyName" = excluded."competencyName",
              "content" = excluded."content"
            "#,
        )
        .bind(&question.id)
        .bind(&question.competency_name)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CompetencyRepository for SqliteCompetencyStore {
    async fn find_all_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<Vec<UserCompetencyRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "profileId","competencyId","level","lastEvaluatedAt"
            FROM "user_competencies"
            WHERE "profileId" = ?
              AND "level" > 0
            ORDER BY "competencyId" ASC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_record_row).collect()
    }

    async fn find_one(
        &self,
        profile_id: &str,
        competency_id: &str,
    ) -> Result<Option<UserCompetencyRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT "profileId","competencyId","level","lastEvaluatedAt"
            FROM "user_competencies"
            WHERE "profileId" = ?
              AND "competencyId" = ?
            LIMIT 1
            "#,
        )
        .bind(profile_id)
        .bind(competency_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_record_row).transpose()
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

        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO "user_competencies"
              ("id","profileId","competencyId","level","lastEvaluatedAt")
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT ("profileId","competencyId") DO UPDATE SET
              "level" = excluded."level",
              "lastEvaluatedAt" = excluded."lastEvaluatedAt"
            RETURNING "profileId","competencyId","level","lastEvaluatedAt"
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(profile_id)
        .bind(competency_id)
        .bind(i64::from(level))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        map_record_row(&row)
    }

    async fn delete(&self, profile_id: &str, competency_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM "user_competencies"
            WHERE "profileId" = ?
              AND "competencyId" = ?
            "#,
        )
        .bind(profile_id)
        .bind(competency_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_all_for_profile(&self, profile_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(r#"DELETE FROM "user_competencies" WHERE "profileId" = ?"#)
            .bind(profile_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CompetencyCatalogRepository for SqliteCompetencyStore {
    async fn list_all(&self) -> Result<Vec<CompetencyDefinition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "id","code","name","description"
            FROM "competency_definitions"
            ORDER BY "sortOrder" ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CompetencyDefinition, StoreError> {
                Ok(CompetencyDefinition {
                    id: row.try_get("id")?,
                    code: row.try_get("code")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl QuestionRepository for SqliteCompetencyStore {
    async fn find_by_competency(
        &self,
        competency_name: &str,
        limit: usize,
    ) -> Result<Vec<Question>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT "id","competencyName","content"
            FROM "questions"
            WHERE "competencyName" = ?
            ORDER BY "createdAt" ASC, "id" ASC
            LIMIT ?
            "#,
        )
        .bind(competency_name)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Question, StoreError> {
                let id: String = row.try_get("id")?;
                let raw: String = row.try_get("content")?;
                let content = match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(question_id = %id, error = %err, "question content is not valid JSON; serving it as text");
                        serde_json::Value::String(raw)
                    }
                };
                Ok(Question {
                    id,
                    competency_name: row.try_get("competencyName")?,
                    content,
                })
            })
            .collect()
    }
}

fn map_record_row(row: &SqliteRow) -> Result<UserCompetencyRecord, StoreError> {
    let raw_level: i64 = row.try_get("level")?;
    let level = Level::try_from(raw_level).map_err(|_| StoreError::InvalidLevel(raw_level))?;
    let last_evaluated_at: DateTime<Utc> = row.try_get("lastEvaluatedAt")?;
    Ok(UserCompetencyRecord {
        profile_id: row.try_get("profileId")?,
        competency_id: row.try_get("competencyId")?,
        level,
        last_evaluated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_then_find_one() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        let level = Level::new(2).unwrap();
        store.upsert("p1", "c1", level).await.unwrap();

        let found = store.find_one("p1", "c1").await.unwrap().unwrap();
        assert_eq!(found.level, level);
        assert!(store.find_one("p1", "c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing_row() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        store.upsert("p1", "c1", Level::new(1).unwrap()).await.unwrap();
        store.upsert("p1", "c1", Level::new(3).unwrap()).await.unwrap();

        let all = store.find_all_for_profile("p1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].level, Level::MAX);
    }

    #[tokio::test]
    async fn test_zero_level_cannot_be_stored() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        assert!(matches!(
            store.upsert("p1", "c1", Level::ZERO).await,
            Err(StoreError::InvalidLevel(0))
        ));

        let raw = sqlx::query(
            r#"INSERT INTO "user_competencies" ("id","profileId","competencyId","level","lastEvaluatedAt")
               VALUES ('x','p1','c1',0,'2024-01-01T00:00:00Z')"#,
        )
        .execute(store.pool())
        .await;
        assert!(raw.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_ok() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        store.delete("p1", "nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_catalog_keeps_sort_order() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        for (idx, id) in ["z", "a", "m"].iter().enumerate() {
            let definition = CompetencyDefinition {
                id: id.to_string(),
                code: format!("CODE_{id}"),
                name: format!("Name {id}"),
                description: None,
            };
            store.insert_definition(&definition, idx as i64).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_question_limit_and_content() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        for idx in 0..3 {
            store
                .insert_question(&Question {
                    id: format!("q{idx}"),
                    competency_name: "Fractions".to_string(),
                    content: serde_json::json!({ "prompt": format!("question {idx}") }),
                })
                .await
                .unwrap();
        }

        let questions = store.find_by_competency("Fractions", 2).await.unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].content["prompt"], "question 0");
        assert!(store.find_by_competency("Fractions", 0).await.unwrap().is_empty());
        assert!(store.find_by_competency("Unknown", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_content_is_served_as_text() {
        let store = SqliteCompetencyStore::in_memory().await.unwrap();
        sqlx::query(
            r#"INSERT INTO "questions" ("id","competencyName","content") VALUES ('bad','Fractions','not json {')"#,
        )
        .execute(store.pool())
        .await
        .unwrap();

        let questions = store.find_by_competency("Fractions", 5).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].content, serde_json::Value::String("not json {".to_string()));
    }
}
