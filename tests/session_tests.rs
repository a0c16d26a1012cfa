use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

use answerkey::config::BotConfig;
use answerkey::dialogue::{ExamDialogueState, Role};
use answerkey::session::{
    Command, Input, Reply, SessionMachine, Step, BUTTON_ROLE_STUDENT, BUTTON_ROLE_TEACHER,
    BUTTON_UPLOAD_DONE, BUTTON_UPLOAD_MORE,
};
use answerkey::storage::{InMemTestStore, TestStore};
use answerkey::test_model::{AnswerKey, Attachment, FeedbackMode, Test, TestCode};

const TEACHER: i64 = 100;
const STUDENT: i64 = 200;
const LANG: Option<&str> = Some("en");

fn machine() -> SessionMachine<InMemTestStore> {
    SessionMachine::new(InMemTestStore::new(), BotConfig::default())
}

fn text(s: &str) -> Input {
    Input::from_text(s)
}

fn button(data: &str) -> Input {
    Input::Button(data.to_string())
}

fn draft_code(step: &Step) -> TestCode {
    step.state.draft_code().cloned().expect("state carries a draft code")
}

/// Drive a teacher from role selection up to the upload stage
async fn authenticate<S: TestStore>(machine: &SessionMachine<S>) -> Step {
    let step = machine
        .handle(TEACHER, LANG, ExamDialogueState::SelectRole, button(BUTTON_ROLE_TEACHER))
        .await;
    assert_eq!(step.state, ExamDialogueState::TeacherAuth);
    machine.handle(TEACHER, LANG, step.state, text("2308")).await
}

/// Full teacher flow with one photo; returns the published code
async fn publish_test<S: TestStore>(machine: &SessionMachine<S>, key: &str, mode: &str) -> TestCode {
    let step = authenticate(machine).await;
    let code = draft_code(&step);

    let step = machine
        .handle(TEACHER, LANG, step.state, Input::File(Attachment::photo("photo-1")))
        .await;
    let step = machine.handle(TEACHER, LANG, step.state, button(BUTTON_UPLOAD_DONE)).await;
    let step = machine.handle(TEACHER, LANG, step.state, text(key)).await;
    let step = machine.handle(TEACHER, LANG, step.state, button(mode)).await;

    assert_eq!(step.state, ExamDialogueState::Done { role: Role::Teacher });
    assert!(step.text().contains(code.as_str()));
    code
}

#[tokio::test]
async fn test_teacher_then_student_full_feedback() -> Result<()> {
    let machine = machine();
    let code = publish_test(&machine, "abcd", "mode_full").await;

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::SelectRole, button(BUTTON_ROLE_STUDENT))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);

    // Codes are case-insensitive for students
    let typed = code.as_str().to_lowercase();
    let step = machine.handle(STUDENT, LANG, step.state, text(&typed)).await;
    assert_eq!(
        step.state,
        ExamDialogueState::StudentEnterAnswers {
            code: code.clone(),
            question_count: 4
        }
    );
    assert!(step
        .replies
        .iter()
        .any(|reply| matches!(reply, Reply::File(file) if file.file_id == "photo-1")));

    let step = machine.handle(STUDENT, LANG, step.state, text("abcc")).await;
    assert_eq!(step.state, ExamDialogueState::Done { role: Role::Student });
    let feedback = step.text();
    assert!(feedback.contains("3/4"));
    assert!(feedback.contains("→ d"));

    Ok(())
}

#[tokio::test]
async fn test_short_feedback_hides_marks() -> Result<()> {
    let machine = machine();
    let code = publish_test(&machine, "abcd", "mode_short").await;

    let state = ExamDialogueState::StudentEnterAnswers {
        code,
        question_count: 4,
    };
    let step = machine.handle(STUDENT, LANG, state, text("abcc")).await;
    assert!(step.text().contains("3/4"));
    assert!(!step.text().contains('✗'));
    Ok(())
}

#[tokio::test]
async fn test_wrong_teacher_secret_continues_as_student() -> Result<()> {
    let machine = machine();

    let step = machine
        .handle(TEACHER, LANG, ExamDialogueState::TeacherAuth, text("1234"))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert!(machine.store().list_by_owner(TEACHER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_code_reprompts() -> Result<()> {
    let machine = machine();

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text("ZZZZ99"))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert!(step.text().contains("ZZZZ99"));

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text("??"))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    Ok(())
}

#[tokio::test]
async fn test_draft_is_not_gradable() -> Result<()> {
    let machine = machine();
    let step = authenticate(&machine).await;
    let code = draft_code(&step);

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text(code.as_str()))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert!(step.text().contains("not ready"));
    Ok(())
}

#[tokio::test]
async fn test_length_mismatch_keeps_answer_stage() -> Result<()> {
    let machine = machine();
    let code = publish_test(&machine, "abcd", "mode_detailed").await;
    let state = ExamDialogueState::StudentEnterAnswers {
        code,
        question_count: 4,
    };

    let step = machine.handle(STUDENT, LANG, state.clone(), text("abc")).await;
    assert_eq!(step.state, state);
    assert!(step.text().contains('4'));

    let step = machine.handle(STUDENT, LANG, state, text("abcd")).await;
    assert!(step.text().contains("4/4"));
    Ok(())
}

#[tokio::test]
async fn test_reset_discards_draft() -> Result<()> {
    let machine = machine();
    let step = authenticate(&machine).await;
    let code = draft_code(&step);
    assert!(machine.store().get(&code).await?.is_some());

    let step = machine
        .handle(TEACHER, LANG, step.state, Input::Command(Command::Reset))
        .await;
    assert_eq!(step.state, ExamDialogueState::SelectRole);
    assert!(machine.store().get(&code).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_upload_rules() -> Result<()> {
    let config = BotConfig {
        max_files_per_test: 2,
        ..BotConfig::default()
    };
    let machine = SessionMachine::new(InMemTestStore::new(), config);
    let step = authenticate(&machine).await;
    let code = draft_code(&step);

    // Text instead of a file
    let step = machine.handle(TEACHER, LANG, step.state, text("hello")).await;
    assert_eq!(
        step.state,
        ExamDialogueState::UploadFiles {
            code: code.clone(),
            uploaded: 0
        }
    );

    let mut state = step.state;
    for id in ["p1", "p2", "p3"] {
        state = machine
            .handle(TEACHER, LANG, state, Input::File(Attachment::photo(id)))
            .await
            .state;
    }
    assert_eq!(
        state,
        ExamDialogueState::UploadFiles {
            code: code.clone(),
            uploaded: 2
        }
    );

    // A PDF cannot join images
    let pdf = Attachment::document("doc", Some("exam.pdf".to_string()), Some("application/pdf".to_string()));
    let step = machine.handle(TEACHER, LANG, state, Input::File(pdf)).await;
    let step = machine.handle(TEACHER, LANG, step.state, button(BUTTON_UPLOAD_MORE)).await;
    assert!(matches!(step.state, ExamDialogueState::UploadFiles { uploaded: 2, .. }));

    let test = machine.store().get(&code).await?.unwrap();
    assert_eq!(test.files.len(), 2);
    assert!(test.files.iter().all(|file| file.is_image()));
    Ok(())
}

#[tokio::test]
async fn test_single_pdf_moves_to_key() -> Result<()> {
    let machine = machine();
    let step = authenticate(&machine).await;
    let code = draft_code(&step);

    let pdf = Attachment::document("doc", Some("exam.pdf".to_string()), Some("application/pdf".to_string()));
    let step = machine.handle(TEACHER, LANG, step.state, Input::File(pdf)).await;
    assert_eq!(step.state, ExamDialogueState::EnterKey { code });
    Ok(())
}

#[tokio::test]
async fn test_invalid_feedback_mode_reprompts() -> Result<()> {
    let machine = machine();
    let step = authenticate(&machine).await;
    let step = machine.handle(TEACHER, LANG, step.state, button(BUTTON_UPLOAD_DONE)).await;
    let step = machine.handle(TEACHER, LANG, step.state, text("   ")).await;
    assert!(matches!(step.state, ExamDialogueState::EnterKey { .. }));

    let step = machine.handle(TEACHER, LANG, step.state, text("abc")).await;
    let expected = step.state.clone();
    assert!(matches!(
        expected,
        ExamDialogueState::SelectFeedbackMode { question_count: 3, .. }
    ));

    let step = machine.handle(TEACHER, LANG, step.state, text("everything")).await;
    assert_eq!(step.state, expected);
    Ok(())
}

#[tokio::test]
async fn test_mytests_lists_own_tests() -> Result<()> {
    let machine = machine();
    let first = publish_test(&machine, "abcd", "mode_full").await;
    let second = publish_test(&machine, "xyz", "mode_short").await;

    let state = ExamDialogueState::Done { role: Role::Teacher };
    let step = machine
        .handle(TEACHER, LANG, state.clone(), Input::Command(Command::MyTests))
        .await;
    assert_eq!(step.state, state);
    assert!(step.text().contains(first.as_str()));
    assert!(step.text().contains(second.as_str()));

    let again = machine
        .handle(TEACHER, LANG, state, Input::Command(Command::MyTests))
        .await;
    assert_eq!(again.replies, step.replies);

    let student = machine
        .handle(STUDENT, LANG, ExamDialogueState::default(), Input::Command(Command::MyTests))
        .await;
    assert!(student.text().contains("no tests"));
    Ok(())
}

#[tokio::test]
async fn test_newtest_requires_teacher_role() -> Result<()> {
    let machine = machine();

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, Input::Command(Command::NewTest))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);

    let done = ExamDialogueState::Done { role: Role::Teacher };
    let step = machine
        .handle(TEACHER, LANG, done, Input::Command(Command::NewTest))
        .await;
    assert!(matches!(step.state, ExamDialogueState::UploadFiles { uploaded: 0, .. }));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_input_keeps_state() -> Result<()> {
    let machine = machine();
    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, Input::Unsupported)
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert_eq!(step.replies.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_buttons_are_ignored() -> Result<()> {
    let machine = machine();
    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, button("mode_full"))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert!(step.replies.is_empty());
    Ok(())
}

/// Store whose every call fails, counting how often it is reached
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    }
}

impl TestStore for FailingStore {
    async fn create(&self, _code: &TestCode, _owner_id: i64) -> Result<bool> {
        self.fail()
    }

    async fn append_file(&self, _code: &TestCode, _file: &Attachment) -> Result<()> {
        self.fail()
    }

    async fn set_key(&self, _code: &TestCode, _key: &AnswerKey) -> Result<()> {
        self.fail()
    }

    async fn set_feedback_mode(&self, _code: &TestCode, _mode: FeedbackMode) -> Result<()> {
        self.fail()
    }

    async fn get(&self, _code: &TestCode) -> Result<Option<Test>> {
        self.fail()
    }

    async fn list_by_owner(&self, _owner_id: i64) -> Result<Vec<Test>> {
        self.fail()
    }

    async fn discard_draft(&self, _code: &TestCode) -> Result<bool> {
        self.fail()
    }
}

#[tokio::test]
async fn test_storage_failure_is_reported_and_circuit_opens() -> Result<()> {
    let machine = SessionMachine::new(FailingStore::default(), BotConfig::default());
    let threshold = machine.config().recovery.circuit_breaker_threshold as usize;

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text("ABCD12"))
        .await;
    assert_eq!(step.state, ExamDialogueState::StudentEnterCode);
    assert!(step.text().contains("unavailable"));

    let step = machine
        .handle(TEACHER, LANG, ExamDialogueState::TeacherAuth, text("2308"))
        .await;
    assert_eq!(step.state, ExamDialogueState::Done { role: Role::Teacher });

    for _ in 0..threshold {
        machine
            .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text("ABCD12"))
            .await;
    }
    // Once open, the store is no longer reached
    assert_eq!(machine.store().calls.load(Ordering::SeqCst), threshold);

    let step = machine
        .handle(STUDENT, LANG, ExamDialogueState::StudentEnterCode, text("ABCD12"))
        .await;
    assert!(step.text().contains("unavailable"));
    Ok(())
}

/// In-memory store whose first `collisions` reservations report a taken code
struct CollidingStore {
    inner: InMemTestStore,
    collisions: AtomicUsize,
    create_calls: AtomicUsize,
}

impl CollidingStore {
    fn new(collisions: usize) -> Self {
        Self {
            inner: InMemTestStore::new(),
            collisions: AtomicUsize::new(collisions),
            create_calls: AtomicUsize::new(0),
        }
    }
}

impl TestStore for CollidingStore {
    async fn create(&self, code: &TestCode, owner_id: i64) -> Result<bool> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let taken = self
            .collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if taken {
            return Ok(false);
        }
        self.inner.create(code, owner_id).await
    }

    async fn append_file(&self, code: &TestCode, file: &Attachment) -> Result<()> {
        self.inner.append_file(code, file).await
    }

    async fn set_key(&self, code: &TestCode, key: &AnswerKey) -> Result<()> {
        self.inner.set_key(code, key).await
    }

    async fn set_feedback_mode(&self, code: &TestCode, mode: FeedbackMode) -> Result<()> {
        self.inner.set_feedback_mode(code, mode).await
    }

    async fn get(&self, code: &TestCode) -> Result<Option<Test>> {
        self.inner.get(code).await
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Test>> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn discard_draft(&self, code: &TestCode) -> Result<bool> {
        self.inner.discard_draft(code).await
    }
}

#[tokio::test]
async fn test_code_collision_retries_with_fresh_code() -> Result<()> {
    let attempts = BotConfig::default().recovery.code_generation_attempts as usize;
    let machine = SessionMachine::new(CollidingStore::new(attempts - 1), BotConfig::default());

    let step = machine
        .handle(TEACHER, LANG, ExamDialogueState::TeacherAuth, text("2308"))
        .await;
    let code = draft_code(&step);
    assert!(matches!(step.state, ExamDialogueState::UploadFiles { uploaded: 0, .. }));
    assert_eq!(machine.store().create_calls.load(Ordering::SeqCst), attempts);
    assert!(machine.store().get(&code).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_code_collisions_exhaust_attempts() -> Result<()> {
    let attempts = BotConfig::default().recovery.code_generation_attempts as usize;
    let machine = SessionMachine::new(CollidingStore::new(attempts), BotConfig::default());

    let step = machine
        .handle(TEACHER, LANG, ExamDialogueState::TeacherAuth, text("2308"))
        .await;
    assert_eq!(step.state, ExamDialogueState::Done { role: Role::Teacher });
    assert!(step.text().contains("unavailable"));
    assert_eq!(machine.store().create_calls.load(Ordering::SeqCst), attempts);
    assert!(machine.store().list_by_owner(TEACHER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_new_code_replaces_stale_drafts() -> Result<()> {
    let machine = machine();
    let published = publish_test(&machine, "abcd", "mode_short").await;

    // Dialogue state lost, e.g. by a restart, leaves the first draft behind
    let first = draft_code(&authenticate(&machine).await);
    let second = draft_code(&authenticate(&machine).await);
    assert_ne!(first, second);

    let tests = machine.store().list_by_owner(TEACHER).await?;
    let codes: Vec<&TestCode> = tests.iter().map(|test| &test.code).collect();
    assert_eq!(tests.len(), 2);
    assert!(codes.contains(&&published));
    assert!(codes.contains(&&second));
    assert!(machine.store().get(&first).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_slash_key_gets_a_hint() -> Result<()> {
    let machine = machine();
    let step = authenticate(&machine).await;
    let step = machine.handle(TEACHER, LANG, step.state, button(BUTTON_UPLOAD_DONE)).await;
    let state = step.state.clone();
    assert!(step.text().contains("cannot start with \"/\""));

    let step = machine.handle(TEACHER, LANG, state.clone(), text("/abc")).await;
    assert_eq!(step.state, state);
    assert_eq!(step.replies.len(), 2);
    assert!(step.text().contains("An answer key cannot start with"));
    Ok(())
}
