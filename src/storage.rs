//! # Test Storage Module
//!
//! The persistence contract the session state machine depends on, and two
//! embedded backends: a process-local map and a JSON document on disk.
//! The PostgreSQL backend lives in [`crate::db`].
//!
//! All backends share the same rules: codes are inserted only if absent,
//! files can be appended until the key is set, and a test is immutable once
//! its feedback mode is set.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::test_model::{AnswerKey, Attachment, FeedbackMode, Test, TestCode};

/// Persistence contract for tests, keyed by code
///
/// The code doubles as the handle returned by `create`.
pub trait TestStore: Send + Sync + 'static {
    /// Reserve `code` for a new draft owned by `owner_id`
    ///
    /// Returns `false` without touching anything when the code is taken.
    fn create(&self, code: &TestCode, owner_id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Append a file to a draft whose key is not set yet
    fn append_file(
        &self,
        code: &TestCode,
        file: &Attachment,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Set the answer key of a draft
    fn set_key(&self, code: &TestCode, key: &AnswerKey) -> impl Future<Output = Result<()>> + Send;

    /// Set the feedback mode, which finalizes the test
    fn set_feedback_mode(
        &self,
        code: &TestCode,
        mode: FeedbackMode,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, code: &TestCode) -> impl Future<Output = Result<Option<Test>>> + Send;

    /// Tests owned by `owner_id`, oldest first
    fn list_by_owner(&self, owner_id: i64) -> impl Future<Output = Result<Vec<Test>>> + Send;

    /// Delete a draft; finalized tests are left alone
    ///
    /// Returns whether something was deleted.
    fn discard_draft(&self, code: &TestCode) -> impl Future<Output = Result<bool>> + Send;
}

/// Map of tests with the shared mutation rules
#[derive(Debug, Clone, Default)]
pub struct TestTable {
    tests: HashMap<TestCode, Test>,
}

impl TestTable {
    pub fn from_tests(tests: Vec<Test>) -> Self {
        Self {
            tests: tests.into_iter().map(|t| (t.code.clone(), t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn create(&mut self, code: &TestCode, owner_id: i64) -> bool {
        if self.tests.contains_key(code) {
            return false;
        }
        self.tests
            .insert(code.clone(), Test::new(code.clone(), owner_id));
        true
    }

    fn draft_mut(&mut self, code: &TestCode) -> Result<&mut Test> {
        let Some(test) = self.tests.get_mut(code) else {
            bail!("Test {code} does not exist");
        };
        if test.is_finalized() {
            bail!("Test {code} is finalized and cannot change");
        }
        Ok(test)
    }

    pub fn append_file(&mut self, code: &TestCode, file: &Attachment) -> Result<()> {
        let test = self.draft_mut(code)?;
        if test.answer_key.is_some() {
            bail!("Test {code} no longer accepts files");
        }
        test.files.push(file.clone());
        Ok(())
    }

    pub fn set_key(&mut self, code: &TestCode, key: &AnswerKey) -> Result<()> {
        let test = self.draft_mut(code)?;
        test.answer_key = Some(key.clone());
        Ok(())
    }

    pub fn set_feedback_mode(&mut self, code: &TestCode, mode: FeedbackMode) -> Result<()> {
        let test = self.draft_mut(code)?;
        if test.answer_key.is_none() {
            bail!("Test {code} has no answer key yet");
        }
        test.feedback_mode = Some(mode);
        Ok(())
    }

    pub fn get(&self, code: &TestCode) -> Option<Test> {
        self.tests.get(code).cloned()
    }

    pub fn list_by_owner(&self, owner_id: i64) -> Vec<Test> {
        let mut tests: Vec<Test> = self
            .tests
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        tests.sort_by(|a, b| (a.created_at, &a.code).cmp(&(b.created_at, &b.code)));
        tests
    }

    pub fn discard_draft(&mut self, code: &TestCode) -> bool {
        match self.tests.get(code) {
            Some(test) if !test.is_finalized() => {
                self.tests.remove(code);
                true
            }
            _ => false,
        }
    }

    /// Every test, ordered by code, for serialization
    pub fn snapshot(&self) -> Vec<Test> {
        let mut tests: Vec<Test> = self.tests.values().cloned().collect();
        tests.sort_by(|a, b| a.code.cmp(&b.code));
        tests
    }
}

/// Process-local store; everything is lost on restart
#[derive(Debug, Default)]
pub struct InMemTestStore {
    table: Mutex<TestTable>,
}

impl InMemTestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestStore for InMemTestStore {
    async fn create(&self, code: &TestCode, owner_id: i64) -> Result<bool> {
        Ok(self.table.lock().await.create(code, owner_id))
    }

    async fn append_file(&self, code: &TestCode, file: &Attachment) -> Result<()> {
        self.table.lock().await.append_file(code, file)
    }

    async fn set_key(&self, code: &TestCode, key: &AnswerKey) -> Result<()> {
        self.table.lock().await.set_key(code, key)
    }

    async fn set_feedback_mode(&self, code: &TestCode, mode: FeedbackMode) -> Result<()> {
        self.table.lock().await.set_feedback_mode(code, mode)
    }

    async fn get(&self, code: &TestCode) -> Result<Option<Test>> {
        Ok(self.table.lock().await.get(code))
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Test>> {
        Ok(self.table.lock().await.list_by_owner(owner_id))
    }

    async fn discard_draft(&self, code: &TestCode) -> Result<bool> {
        Ok(self.table.lock().await.discard_draft(code))
    }
}

/// Embedded store keeping every test in one JSON document
///
/// Each write goes to a temporary file in the same directory which then
/// replaces the document, so a crash leaves either the old or the new
/// version on disk. A failed write leaves the in-memory table unchanged.
#[derive(Debug)]
pub struct JsonFileTestStore {
    path: PathBuf,
    table: Mutex<TestTable>,
}

impl JsonFileTestStore {
    /// Open the document at `path`, starting empty if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read test store {}", path.display()))?;
            let tests: Vec<Test> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse test store {}", path.display()))?;
            info!(path = %path.display(), tests = tests.len(), "Loaded JSON test store");
            TestTable::from_tests(tests)
        } else {
            info!(path = %path.display(), "Starting new JSON test store");
            TestTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Write the whole document through a temporary file in the same directory
    fn write_document(path: &Path, json: &str) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp_file = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        temp_file
            .write_all(json.as_bytes())
            .context("Failed to write tests")?;
        temp_file
            .persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Persist `table`; file IO runs on the blocking pool
    async fn persist(&self, table: &TestTable) -> Result<()> {
        let json = serde_json::to_string_pretty(&table.snapshot())
            .context("Failed to serialize tests")?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_document(&path, &json))
            .await
            .context("Test store write task failed")??;

        debug!(path = %self.path.display(), tests = table.len(), "Test store persisted");
        Ok(())
    }

    /// Apply `change` to a copy of the table and keep it only once it is on disk
    ///
    /// The lock is held across the write so documents reach the disk in
    /// mutation order.
    async fn mutate<T>(&self, change: impl FnOnce(&mut TestTable) -> Result<T>) -> Result<T> {
        let mut table = self.table.lock().await;
        let mut updated = table.clone();
        let outcome = change(&mut updated)?;
        self.persist(&updated).await?;
        *table = updated;
        Ok(outcome)
    }
}

impl TestStore for JsonFileTestStore {
    async fn create(&self, code: &TestCode, owner_id: i64) -> Result<bool> {
        self.mutate(|table| Ok(table.create(code, owner_id))).await
    }

    async fn append_file(&self, code: &TestCode, file: &Attachment) -> Result<()> {
        self.mutate(|table| table.append_file(code, file)).await
    }

    async fn set_key(&self, code: &TestCode, key: &AnswerKey) -> Result<()> {
        self.mutate(|table| table.set_key(code, key)).await
    }

    async fn set_feedback_mode(&self, code: &TestCode, mode: FeedbackMode) -> Result<()> {
        self.mutate(|table| table.set_feedback_mode(code, mode)).await
    }

    async fn get(&self, code: &TestCode) -> Result<Option<Test>> {
        Ok(self.table.lock().await.get(code))
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Test>> {
        Ok(self.table.lock().await.list_by_owner(owner_id))
    }

    async fn discard_draft(&self, code: &TestCode) -> Result<bool> {
        self.mutate(|table| Ok(table.discard_draft(code))).await
    }
}
