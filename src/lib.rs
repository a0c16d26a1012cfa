//! # Exam Checking Telegram Bot
//!
//! Teachers upload a test (images or one PDF) with an answer key and pick how
//! much feedback students get; students enter the test code and their answers
//! and receive a score.

pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod grading;
pub mod localization;
pub mod session;
pub mod storage;
pub mod test_model;
