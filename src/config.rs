//! # Bot Configuration Module
//!
//! This module defines configuration structures for the exam bot,
//! including the teacher secret, test code settings, storage selection
//! and storage recovery parameters.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

// Constants for bot configuration
pub const DEFAULT_TEACHER_SECRET: &str = "2308";
pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 10; // tests.test_code is VARCHAR(10)
pub const DEFAULT_MAX_FILES_PER_TEST: usize = 10;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Recovery configuration for storage failures
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive storage failures before the circuit opens
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
    /// How many fresh codes to try when a generated code is already taken
    pub code_generation_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60, // 1 minute
            code_generation_attempts: 5,
        }
    }
}

/// Which storage backend the bot runs on
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    /// PostgreSQL, selected by `DATABASE_URL`
    Postgres(String),
    /// Single JSON document on disk, selected by `STORAGE_PATH`
    JsonFile(PathBuf),
    /// Process-local map, lost on restart
    Memory,
}

/// Configuration structure for the exam bot
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Shared secret a teacher types to unlock the upload flow
    pub teacher_secret: String,
    /// Length of generated test codes
    pub code_length: usize,
    /// Maximum number of images a teacher may attach to one test
    pub max_files_per_test: usize,
    /// Language used when the user's Telegram language is unsupported
    pub default_language: String,
    /// Storage backend selection
    pub storage: StorageBackend,
    /// Recovery and error handling configuration
    pub recovery: RecoveryConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            teacher_secret: DEFAULT_TEACHER_SECRET.to_string(),
            code_length: DEFAULT_CODE_LENGTH,
            max_files_per_test: DEFAULT_MAX_FILES_PER_TEST,
            default_language: DEFAULT_LANGUAGE.to_string(),
            storage: StorageBackend::Memory,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl BotConfig {
    /// Build the configuration from environment variables
    ///
    /// Unset variables keep their defaults. `DATABASE_URL` wins over
    /// `STORAGE_PATH`; with neither set the bot keeps tests in memory.
    ///
    /// # Errors
    ///
    /// Returns an error when a numeric variable cannot be parsed or the
    /// teacher secret is set but blank.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secret) = lookup("TEACHER_SECRET") {
            let secret = secret.trim();
            if secret.is_empty() {
                anyhow::bail!("TEACHER_SECRET must not be blank");
            }
            config.teacher_secret = secret.to_string();
        }

        if let Some(raw) = lookup("TEST_CODE_LENGTH") {
            let length: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("TEST_CODE_LENGTH is not a number: {raw}"))?;
            config.code_length = length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH);
        }

        if let Some(raw) = lookup("MAX_FILES_PER_TEST") {
            config.max_files_per_test = raw
                .trim()
                .parse()
                .with_context(|| format!("MAX_FILES_PER_TEST is not a number: {raw}"))?;
        }

        if let Some(language) = lookup("DEFAULT_LANGUAGE") {
            config.default_language = language.trim().to_lowercase();
        }

        config.storage = match (lookup("DATABASE_URL"), lookup("STORAGE_PATH")) {
            (Some(url), _) if !url.trim().is_empty() => StorageBackend::Postgres(url),
            (_, Some(path)) if !path.trim().is_empty() => {
                StorageBackend::JsonFile(PathBuf::from(path))
            }
            _ => StorageBackend::Memory,
        };

        Ok(config)
    }
}
