//! PostgreSQL backend for the test store

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::storage::TestStore;
use crate::test_model::{AnswerKey, Attachment, AttachmentKind, FeedbackMode, Test, TestCode};

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tests (
            test_code VARCHAR(10) PRIMARY KEY,
            teacher_id BIGINT NOT NULL,
            answer_key TEXT,
            feedback_mode VARCHAR(50),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create tests table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS tests_teacher_id_idx ON tests (teacher_id)")
        .execute(pool)
        .await
        .context("Failed to create teacher index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS test_files (
            id BIGSERIAL PRIMARY KEY,
            test_code VARCHAR(10) NOT NULL REFERENCES tests (test_code) ON DELETE CASCADE,
            file_id TEXT NOT NULL,
            file_name TEXT,
            mime_type TEXT,
            kind VARCHAR(16) NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create test_files table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Test store backed by the `tests` and `test_files` tables
#[derive(Debug, Clone)]
pub struct PgTestStore {
    pool: PgPool,
}

impl PgTestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and make sure the schema exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        init_database_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn files_for(&self, codes: &[String]) -> Result<HashMap<String, Vec<Attachment>>> {
        let rows = sqlx::query(
            "SELECT test_code, file_id, file_name, mime_type, kind
             FROM test_files WHERE test_code = ANY($1) ORDER BY id",
        )
        .bind(codes)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read test files")?;

        let mut files: HashMap<String, Vec<Attachment>> = HashMap::new();
        for row in rows {
            let code: String = row.try_get("test_code")?;
            let kind: String = row.try_get("kind")?;
            let attachment = Attachment {
                file_id: row.try_get("file_id")?,
                file_name: row.try_get("file_name")?,
                mime_type: row.try_get("mime_type")?,
                kind: kind.parse::<AttachmentKind>().map_err(|e| anyhow!(e))?,
            };
            files.entry(code).or_default().push(attachment);
        }
        Ok(files)
    }
}

fn test_from_row(row: &PgRow, files: Vec<Attachment>) -> Result<Test> {
    let raw_code: String = row.try_get("test_code")?;
    let code = TestCode::parse(&raw_code)
        .ok_or_else(|| anyhow!("Stored test code is malformed: {raw_code}"))?;

    let answer_key = row
        .try_get::<Option<String>, _>("answer_key")?
        .map(|key| AnswerKey::parse(&key).map_err(|e| anyhow!("Stored key for {code} is {e}")))
        .transpose()?;

    let feedback_mode = row
        .try_get::<Option<String>, _>("feedback_mode")?
        .map(|mode| mode.parse::<FeedbackMode>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Test {
        code,
        owner_id: row.try_get("teacher_id")?,
        files,
        answer_key,
        feedback_mode,
        created_at,
    })
}

impl TestStore for PgTestStore {
    async fn create(&self, code: &TestCode, owner_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tests (test_code, teacher_id) VALUES ($1, $2)
             ON CONFLICT (test_code) DO NOTHING",
        )
        .bind(code.as_str())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .context("Failed to insert test")?;

        let created = result.rows_affected() == 1;
        debug!(code = %code, owner_id, created, "Test code reservation");
        Ok(created)
    }

    async fn append_file(&self, code: &TestCode, file: &Attachment) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO test_files (test_code, file_id, file_name, mime_type, kind)
             SELECT $1, $2, $3, $4, $5
             WHERE EXISTS (SELECT 1 FROM tests WHERE test_code = $1 AND answer_key IS NULL)",
        )
        .bind(code.as_str())
        .bind(&file.file_id)
        .bind(file.file_name.as_deref())
        .bind(file.mime_type.as_deref())
        .bind(file.kind.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to insert test file")?;

        if result.rows_affected() == 0 {
            bail!("Test {code} does not accept files");
        }
        Ok(())
    }

    async fn set_key(&self, code: &TestCode, key: &AnswerKey) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tests SET answer_key = $2 WHERE test_code = $1 AND feedback_mode IS NULL",
        )
        .bind(code.as_str())
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update answer key")?;

        if result.rows_affected() == 0 {
            bail!("Test {code} is missing or finalized");
        }
        Ok(())
    }

    async fn set_feedback_mode(&self, code: &TestCode, mode: FeedbackMode) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tests SET feedback_mode = $2
             WHERE test_code = $1 AND answer_key IS NOT NULL AND feedback_mode IS NULL",
        )
        .bind(code.as_str())
        .bind(mode.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update feedback mode")?;

        if result.rows_affected() == 0 {
            bail!("Test {code} cannot be finalized");
        }
        Ok(())
    }

    async fn get(&self, code: &TestCode) -> Result<Option<Test>> {
        let row = sqlx::query(
            "SELECT test_code, teacher_id, answer_key, feedback_mode, created_at
             FROM tests WHERE test_code = $1",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read test")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut files = self.files_for(&[code.as_str().to_string()]).await?;
        let test = test_from_row(&row, files.remove(code.as_str()).unwrap_or_default())?;
        Ok(Some(test))
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Test>> {
        let rows = sqlx::query(
            "SELECT test_code, teacher_id, answer_key, feedback_mode, created_at
             FROM tests WHERE teacher_id = $1 ORDER BY created_at, test_code",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tests")?;

        let codes = rows
            .iter()
            .map(|row| row.try_get::<String, _>("test_code"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut files = self.files_for(&codes).await?;

        rows.iter()
            .zip(codes.iter())
            .map(|(row, code)| test_from_row(row, files.remove(code).unwrap_or_default()))
            .collect()
    }

    async fn discard_draft(&self, code: &TestCode) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM tests WHERE test_code = $1 AND feedback_mode IS NULL")
                .bind(code.as_str())
                .execute(&self.pool)
                .await
                .context("Failed to delete draft")?;

        Ok(result.rows_affected() > 0)
    }
}
