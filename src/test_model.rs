//! # Test Data Model
//!
//! This module defines the records a teacher creates and a student grades
//! against: the test itself, its short code, its answer key, the feedback
//! mode and the file attachments that make up the exam.
//!
//! ## Usage
//!
//! ```rust
//! use answerkey::test_model::{AnswerKey, FeedbackMode, TestCode};
//!
//! let code = TestCode::parse(" ab12cd ").unwrap();
//! assert_eq!(code.as_str(), "AB12CD");
//!
//! let key = AnswerKey::parse("abcd").unwrap();
//! assert_eq!(key.len(), 4);
//!
//! let mode: FeedbackMode = "full".parse().unwrap();
//! assert_eq!(mode, FeedbackMode::Full);
//! ```

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters used for generated codes (no 0/O or 1/I look-alikes)
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

// Accepted shape of a code typed by a student, after upper-casing
pub const CODE_PATTERN: &str = r"^[A-Z0-9]{4,10}$";

lazy_static! {
    static ref CODE_REGEX: Regex = Regex::new(CODE_PATTERN).expect("Test code pattern should be valid");
}

/// Short alphanumeric identifier of a test
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCode(String);

impl TestCode {
    /// Generate a random code of `length` characters
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, length: usize) -> Self {
        let code = (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        TestCode(code)
    }

    /// Normalize and validate user input; `None` if it cannot be a code
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_uppercase();
        if CODE_REGEX.is_match(&normalized) {
            Some(TestCode(normalized))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered answers, one character per question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKey(String);

impl AnswerKey {
    /// Store the trimmed literal answer string
    ///
    /// The only rule is that something is left after trimming; letters,
    /// digits and Cyrillic are all taken as typed.
    pub fn parse(input: &str) -> Result<Self, &'static str> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("empty");
        }
        Ok(AnswerKey(trimmed.to_string()))
    }

    /// Number of questions
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How much grading detail a student sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackMode {
    /// Score only
    Short,
    /// Score and a mark per question
    Detailed,
    /// Marks plus the correct answer for every wrong question
    Full,
}

impl FeedbackMode {
    pub const ALL: [FeedbackMode; 3] = [FeedbackMode::Short, FeedbackMode::Detailed, FeedbackMode::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackMode::Short => "short",
            FeedbackMode::Detailed => "detailed",
            FeedbackMode::Full => "full",
        }
    }

    /// Whether wrong items reveal the correct answer
    pub fn reveals_answers(&self) -> bool {
        matches!(self, FeedbackMode::Full)
    }
}

impl fmt::Display for FeedbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short" | "краткий" => Ok(FeedbackMode::Short),
            "detailed" | "подробный" => Ok(FeedbackMode::Detailed),
            "full" | "полный" => Ok(FeedbackMode::Full),
            other => Err(format!("unknown feedback mode: {other}")),
        }
    }
}

/// How the file reached the bot, which decides how it is sent back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Document,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Photo => "photo",
            AttachmentKind::Document => "document",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(AttachmentKind::Photo),
            "document" => Ok(AttachmentKind::Document),
            other => Err(format!("unknown attachment kind: {other}")),
        }
    }
}

/// Reference to a file stored by the chat platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Platform file identifier, enough to send the file again
    pub file_id: String,
    /// Suggested file name, when the sender provided one
    pub file_name: Option<String>,
    /// MIME type reported by the platform
    pub mime_type: Option<String>,
    pub kind: AttachmentKind,
}

impl Attachment {
    pub fn photo(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: None,
            mime_type: Some("image/jpeg".to_string()),
            kind: AttachmentKind::Photo,
        }
    }

    pub fn document(
        file_id: impl Into<String>,
        file_name: Option<String>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_name,
            mime_type,
            kind: AttachmentKind::Document,
        }
    }

    /// Photos and image documents; several of them make one exam
    pub fn is_image(&self) -> bool {
        match self.kind {
            AttachmentKind::Photo => true,
            AttachmentKind::Document => self
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/")),
        }
    }

    /// A PDF document, which is a whole exam on its own
    pub fn is_pdf(&self) -> bool {
        if self.kind != AttachmentKind::Document {
            return false;
        }
        let pdf_mime = self.mime_type.as_deref() == Some("application/pdf");
        let pdf_name = self
            .file_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().ends_with(".pdf"));
        pdf_mime || pdf_name
    }
}

/// An exam unit identified by a short code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub code: TestCode,
    /// Chat id of the teacher who created it
    pub owner_id: i64,
    pub files: Vec<Attachment>,
    pub answer_key: Option<AnswerKey>,
    pub feedback_mode: Option<FeedbackMode>,
    pub created_at: DateTime<Utc>,
}

impl Test {
    /// Fresh draft with nothing attached yet
    pub fn new(code: TestCode, owner_id: i64) -> Self {
        Self {
            code,
            owner_id,
            files: Vec::new(),
            answer_key: None,
            feedback_mode: None,
            created_at: Utc::now(),
        }
    }

    /// Both the key and the feedback mode are set; students may take it
    pub fn is_finalized(&self) -> bool {
        self.answer_key.is_some() && self.feedback_mode.is_some()
    }

    pub fn question_count(&self) -> usize {
        self.answer_key.as_ref().map_or(0, AnswerKey::len)
    }
}
