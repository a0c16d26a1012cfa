//! # Grading Module
//!
//! Position-by-position comparison of a submitted answer string against a
//! test's answer key, and rendering of the result for each feedback mode.

use tracing::debug;

use crate::errors::SessionError;
use crate::localization::{t_args_lang, t_lang};
use crate::test_model::{AnswerKey, FeedbackMode};

pub const CORRECT_MARK: &str = "✓";
pub const WRONG_MARK: &str = "✗";

/// Outcome of grading one submission
#[derive(Debug, Clone, PartialEq)]
pub struct GradingResult {
    /// Number of positions where the submission matches the key
    pub score: usize,
    /// Number of questions
    pub total: usize,
    /// Correctness per question, in order
    pub marks: Vec<bool>,
    /// The key itself, present only when the mode reveals answers
    pub revealed: Option<Vec<char>>,
}

impl GradingResult {
    pub fn wrong_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.marks
            .iter()
            .enumerate()
            .filter(|(_, correct)| !**correct)
            .map(|(i, _)| i)
    }
}

/// Grade `submitted` against `key`
///
/// The submission is trimmed, then must have exactly as many characters as
/// the key; otherwise nothing is scored.
pub fn grade(
    key: &AnswerKey,
    submitted: &str,
    mode: FeedbackMode,
) -> Result<GradingResult, SessionError> {
    let submitted = submitted.trim();
    let expected = key.len();
    let actual = submitted.chars().count();

    if actual != expected {
        debug!(expected, actual, "Rejecting submission with wrong length");
        return Err(SessionError::AnswerLengthMismatch { expected, actual });
    }

    let marks: Vec<bool> = key
        .chars()
        .zip(submitted.chars())
        .map(|(expected, given)| expected == given)
        .collect();
    let score = marks.iter().filter(|correct| **correct).count();

    Ok(GradingResult {
        score,
        total: expected,
        marks,
        revealed: mode.reveals_answers().then(|| key.chars().collect()),
    })
}

/// Render a grading result as the message a student receives
pub fn render_feedback(
    result: &GradingResult,
    mode: FeedbackMode,
    language_code: Option<&str>,
) -> String {
    let score_line = t_args_lang(
        "result-score",
        &[
            ("score", &result.score.to_string()),
            ("total", &result.total.to_string()),
        ],
        language_code,
    );

    if mode == FeedbackMode::Short {
        return score_line;
    }

    let mut lines = vec![score_line, String::new()];
    for (i, correct) in result.marks.iter().enumerate() {
        let number = i + 1;
        let line = match (correct, &result.revealed) {
            (true, _) => format!("{number}. {CORRECT_MARK}"),
            (false, Some(key)) if mode == FeedbackMode::Full => {
                format!("{number}. {WRONG_MARK} → {}", key[i])
            }
            (false, _) => format!("{number}. {WRONG_MARK}"),
        };
        lines.push(line);
    }

    if mode == FeedbackMode::Detailed && result.score < result.total {
        lines.push(String::new());
        lines.push(t_lang("result-answers-hidden", language_code));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AnswerKey {
        AnswerKey::parse(s).unwrap()
    }

    #[test]
    fn test_score_counts_matching_positions() {
        let result = grade(&key("abcd"), "abcc", FeedbackMode::Short).unwrap();
        assert_eq!(result.score, 3);
        assert_eq!(result.total, 4);
        assert_eq!(result.marks, vec![true, true, true, false]);
        assert!(result.revealed.is_none());
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = grade(&key("abcd"), "abc", FeedbackMode::Full).unwrap_err();
        assert_eq!(
            err,
            SessionError::AnswerLengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let result = grade(&key("abcd"), "ABCD", FeedbackMode::Short).unwrap();
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_full_mode_reveals_key() {
        let result = grade(&key("abcd"), "abcc", FeedbackMode::Full).unwrap();
        assert_eq!(result.revealed, Some(vec!['a', 'b', 'c', 'd']));
        assert_eq!(result.wrong_positions().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_render_short_has_no_item_lines() {
        let result = grade(&key("abcd"), "abcc", FeedbackMode::Short).unwrap();
        let text = render_feedback(&result, FeedbackMode::Short, Some("en"));
        assert!(text.contains("3/4"));
        assert!(!text.contains(CORRECT_MARK));
        assert!(!text.contains(WRONG_MARK));
    }

    #[test]
    fn test_render_detailed_hides_answers() {
        let result = grade(&key("abcd"), "abcc", FeedbackMode::Detailed).unwrap();
        let text = render_feedback(&result, FeedbackMode::Detailed, Some("en"));
        assert!(text.contains("1. ✓"));
        assert!(text.contains("4. ✗"));
        assert!(!text.contains("→ d"));
    }

    #[test]
    fn test_render_full_shows_correct_answer() {
        let result = grade(&key("abcd"), "abcc", FeedbackMode::Full).unwrap();
        let text = render_feedback(&result, FeedbackMode::Full, Some("en"));
        assert!(text.contains("3/4"));
        assert!(text.contains("4. ✗ → d"));
        assert!(text.contains("3. ✓"));
    }
}
