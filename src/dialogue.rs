//! Exam dialogue module for handling per-user conversation state.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

use crate::test_model::TestCode;

/// Role a user plays in the current session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Unset,
    Student,
    Teacher,
}

/// Represents the conversation state for the exam dialogue
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ExamDialogueState {
    #[default]
    SelectRole,
    TeacherAuth,
    UploadFiles {
        code: TestCode,
        /// Images attached so far; zero until the first file arrives
        uploaded: usize,
    },
    EnterKey {
        code: TestCode,
    },
    SelectFeedbackMode {
        code: TestCode,
        question_count: usize,
    },
    StudentEnterCode,
    StudentEnterAnswers {
        code: TestCode,
        question_count: usize,
    },
    Done {
        role: Role,
    },
}

impl ExamDialogueState {
    /// Role implied by the current stage
    pub fn role(&self) -> Role {
        match self {
            ExamDialogueState::SelectRole | ExamDialogueState::TeacherAuth => Role::Unset,
            ExamDialogueState::UploadFiles { .. }
            | ExamDialogueState::EnterKey { .. }
            | ExamDialogueState::SelectFeedbackMode { .. } => Role::Teacher,
            ExamDialogueState::StudentEnterCode | ExamDialogueState::StudentEnterAnswers { .. } => {
                Role::Student
            }
            ExamDialogueState::Done { role } => *role,
        }
    }

    /// Code of a test the teacher is still building, if any
    pub fn draft_code(&self) -> Option<&TestCode> {
        match self {
            ExamDialogueState::UploadFiles { code, .. }
            | ExamDialogueState::EnterKey { code }
            | ExamDialogueState::SelectFeedbackMode { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Type alias for our exam dialogue
pub type ExamDialogue = Dialogue<ExamDialogueState, InMemStorage<ExamDialogueState>>;

/// Validates teacher secret input
pub fn validate_teacher_secret(input: &str, secret: &str) -> bool {
    input.trim() == secret
}
