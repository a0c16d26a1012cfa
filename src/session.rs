//! # Session State Machine
//!
//! Transport-agnostic core of the bot. Each inbound event is turned into an
//! [`Input`], run against the user's current [`ExamDialogueState`], and
//! produces a [`Step`]: the next state plus the replies to send.
//!
//! ```text
//! SelectRole ─┬─ teacher ─> TeacherAuth ─> UploadFiles ─> EnterKey ─> SelectFeedbackMode ─> Done
//!             └─ student ─> StudentEnterCode ─> StudentEnterAnswers ─> Done
//! ```
//!
//! Failures never end the session: they are reported and the user lands on
//! the same or an earlier stage.

use anyhow::Result;
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::BotConfig;
use crate::dialogue::{validate_teacher_secret, ExamDialogueState, Role};
use crate::errors::SessionError;
use crate::grading::{grade, render_feedback};
use crate::localization::{get_localization_manager, t_args_lang, t_lang};
use crate::storage::TestStore;
use crate::test_model::{AnswerKey, Attachment, FeedbackMode, Test, TestCode};

// Inline keyboard callback data
pub const BUTTON_ROLE_STUDENT: &str = "role_student";
pub const BUTTON_ROLE_TEACHER: &str = "role_teacher";
pub const BUTTON_UPLOAD_MORE: &str = "upload_more";
pub const BUTTON_UPLOAD_DONE: &str = "upload_done";
pub const BUTTON_MODE_PREFIX: &str = "mode_";

/// Slash commands understood in every stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
    Help,
    NewTest,
    MyTests,
    Unknown(String),
}

impl Command {
    /// Parse `/name` or `/name@botname`; `None` for ordinary text
    pub fn parse(text: &str) -> Option<Command> {
        let word = text.trim().strip_prefix('/')?.split_whitespace().next().unwrap_or("");
        let name = word.split('@').next().unwrap_or(word).to_lowercase();

        Some(match name.as_str() {
            "start" => Command::Start,
            "reset" => Command::Reset,
            "help" => Command::Help,
            "newtest" => Command::NewTest,
            "mytests" => Command::MyTests,
            _ => Command::Unknown(name),
        })
    }
}

/// One inbound event from the chat transport
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    /// Callback data of a pressed inline button
    Button(String),
    Command(Command),
    File(Attachment),
    /// Stickers, voice messages and everything else without a use here
    Unsupported,
}

impl Input {
    /// Classify a text message as a command or plain text
    pub fn from_text(text: &str) -> Self {
        match Command::parse(text) {
            Some(command) => Input::Command(command),
            None => Input::Text(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Inline keyboard, row by row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Every callback value on the keyboard, in order
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .map(|button| button.data.as_str())
            .collect()
    }
}

/// One outbound message to the user who sent the input
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        keyboard: Option<Keyboard>,
    },
    /// Send a stored exam file back
    File(Attachment),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text { text, .. } => Some(text),
            Reply::File(_) => None,
        }
    }
}

/// Result of handling one input
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: ExamDialogueState,
    pub replies: Vec<Reply>,
}

impl Step {
    pub fn new(state: ExamDialogueState, replies: Vec<Reply>) -> Self {
        Self { state, replies }
    }

    /// No reply, no transition
    pub fn ignore(state: ExamDialogueState) -> Self {
        Self::new(state, Vec::new())
    }

    /// All text replies joined, handy for logging and assertions
    pub fn text(&self) -> String {
        self.replies
            .iter()
            .filter_map(Reply::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn role_keyboard(language_code: Option<&str>) -> Keyboard {
    Keyboard::default()
        .row(vec![Button::new(
            t_lang("role-button-student", language_code),
            BUTTON_ROLE_STUDENT,
        )])
        .row(vec![Button::new(
            t_lang("role-button-teacher", language_code),
            BUTTON_ROLE_TEACHER,
        )])
}

pub fn upload_keyboard(language_code: Option<&str>) -> Keyboard {
    Keyboard::default().row(vec![
        Button::new(t_lang("upload-button-more", language_code), BUTTON_UPLOAD_MORE),
        Button::new(t_lang("upload-button-done", language_code), BUTTON_UPLOAD_DONE),
    ])
}

pub fn mode_keyboard(language_code: Option<&str>) -> Keyboard {
    FeedbackMode::ALL.iter().fold(Keyboard::default(), |keyboard, mode| {
        keyboard.row(vec![Button::new(
            t_lang(&format!("mode-button-{mode}"), language_code),
            format!("{BUTTON_MODE_PREFIX}{mode}"),
        )])
    })
}

/// User-facing text for an error kind
pub fn error_text(err: &SessionError, language_code: Option<&str>) -> String {
    let key = err.message_key();
    match err {
        SessionError::UnknownTestCode(code) | SessionError::TestNotReady(code) => {
            t_args_lang(key, &[("code", code)], language_code)
        }
        SessionError::AnswerLengthMismatch { expected, actual } => t_args_lang(
            key,
            &[
                ("expected", &expected.to_string()),
                ("actual", &actual.to_string()),
            ],
            language_code,
        ),
        _ => t_lang(key, language_code),
    }
}

pub fn error_reply(err: &SessionError, language_code: Option<&str>) -> Reply {
    Reply::text(error_text(err, language_code))
}

fn new_code(length: usize) -> TestCode {
    TestCode::generate(&mut rand::thread_rng(), length)
}

/// The state machine, holding the injected test store
pub struct SessionMachine<S> {
    store: S,
    config: BotConfig,
    breaker: CircuitBreaker,
}

impl<S: TestStore> SessionMachine<S> {
    pub fn new(store: S, config: BotConfig) -> Self {
        let breaker = CircuitBreaker::new(config.recovery.clone());
        Self {
            store,
            config,
            breaker,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Run one input against the user's current state
    pub async fn handle(
        &self,
        user_id: i64,
        language_code: Option<&str>,
        state: ExamDialogueState,
        input: Input,
    ) -> Step {
        let lang = match language_code {
            Some(code) if get_localization_manager().is_language_supported(code) => Some(code),
            _ => Some(self.config.default_language.as_str()),
        };
        debug!(user_id, state = ?state, input = ?input, "Handling session input");

        if let Input::Command(command) = input {
            return self.handle_command(user_id, lang, state, command).await;
        }

        if input == Input::Unsupported && !matches!(state, ExamDialogueState::UploadFiles { .. }) {
            return Step::new(state, vec![Reply::text(t_lang("unsupported-message", lang))]);
        }

        match state {
            ExamDialogueState::SelectRole | ExamDialogueState::Done { role: Role::Unset } => {
                self.select_role(lang, state, input)
            }
            ExamDialogueState::TeacherAuth => self.teacher_auth(user_id, lang, input).await,
            ExamDialogueState::UploadFiles { code, uploaded } => {
                self.upload_files(lang, code, uploaded, input).await
            }
            ExamDialogueState::EnterKey { code } => self.enter_key(lang, code, input).await,
            ExamDialogueState::SelectFeedbackMode {
                code,
                question_count,
            } => self.select_mode(user_id, lang, code, question_count, input).await,
            ExamDialogueState::StudentEnterCode => {
                self.student_code(user_id, lang, ExamDialogueState::StudentEnterCode, input)
                    .await
            }
            ExamDialogueState::StudentEnterAnswers {
                code,
                question_count,
            } => {
                self.student_answers(user_id, lang, code, question_count, input)
                    .await
            }
            ExamDialogueState::Done {
                role: Role::Student,
            } => {
                let state = ExamDialogueState::Done {
                    role: Role::Student,
                };
                self.student_code(user_id, lang, state, input).await
            }
            ExamDialogueState::Done {
                role: Role::Teacher,
            } => self.teacher_idle(lang, input),
        }
    }

    /// Run a storage call through the circuit breaker
    async fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T, SessionError> {
        if self.breaker.is_open() {
            warn!(operation, "Storage circuit open, failing fast");
            return Err(SessionError::StorageUnavailable(
                "storage circuit breaker is open".to_string(),
            ));
        }

        match call.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(operation, error = %e, "Storage operation failed");
                Err(SessionError::from(e))
            }
        }
    }

    /// Reserve a fresh code, retrying on collisions
    async fn reserve_code(&self, owner_id: i64) -> Result<TestCode, SessionError> {
        let attempts = self.config.recovery.code_generation_attempts.max(1);
        for attempt in 1..=attempts {
            let code = new_code(self.config.code_length);
            if self.guarded("create", self.store.create(&code, owner_id)).await? {
                info!(user_id = owner_id, code = %code, "Reserved test code");
                self.discard_stale_drafts(owner_id, &code).await;
                return Ok(code);
            }
            debug!(code = %code, attempt, "Generated test code already taken");
        }
        Err(SessionError::StorageUnavailable(format!(
            "no free test code after {attempts} attempts"
        )))
    }

    /// Drop the owner's unfinalized tests other than `keep`
    ///
    /// Drafts outlive the in-memory dialogue when the store is persistent, so
    /// a teacher only ever has the draft of the current session.
    async fn discard_stale_drafts(&self, owner_id: i64, keep: &TestCode) {
        let tests = match self.guarded("list_by_owner", self.store.list_by_owner(owner_id)).await {
            Ok(tests) => tests,
            Err(e) => {
                warn!(user_id = owner_id, error = %e, "Could not look up stale drafts");
                return;
            }
        };

        for test in tests.iter().filter(|test| !test.is_finalized() && &test.code != keep) {
            match self.guarded("discard_draft", self.store.discard_draft(&test.code)).await {
                Ok(deleted) => debug!(code = %test.code, deleted, "Discarded stale draft"),
                Err(e) => warn!(code = %test.code, error = %e, "Could not discard stale draft"),
            }
        }
    }

    async fn discard_draft(&self, state: &ExamDialogueState) {
        if let Some(code) = state.draft_code() {
            match self.guarded("discard_draft", self.store.discard_draft(code)).await {
                Ok(deleted) => debug!(code = %code, deleted, "Discarded draft test"),
                Err(e) => warn!(code = %code, error = %e, "Could not discard draft test"),
            }
        }
    }

    async fn handle_command(
        &self,
        user_id: i64,
        lang: Option<&str>,
        state: ExamDialogueState,
        command: Command,
    ) -> Step {
        match command {
            Command::Start | Command::Reset => {
                self.discard_draft(&state).await;
                info!(user_id, command = ?command, "Session reset");

                let intro = if command == Command::Start {
                    format!(
                        "{}\n\n{}",
                        t_lang("welcome-title", lang),
                        t_lang("welcome-description", lang)
                    )
                } else {
                    t_lang("reset-done", lang)
                };
                Step::new(
                    ExamDialogueState::SelectRole,
                    vec![
                        Reply::text(intro),
                        Reply::with_keyboard(t_lang("role-prompt", lang), role_keyboard(lang)),
                    ],
                )
            }
            Command::Help => {
                let help_message = [
                    t_lang("help-title", lang),
                    t_lang("help-teacher", lang),
                    t_lang("help-student", lang),
                    t_lang("help-commands", lang),
                ]
                .join("\n\n");
                Step::new(state, vec![Reply::text(help_message)])
            }
            Command::NewTest => {
                if state.role() != Role::Teacher {
                    return Step::new(state, vec![Reply::text(t_lang("newtest-teacher-only", lang))]);
                }
                // Reserving a code also drops the previous draft
                match self.reserve_code(user_id).await {
                    Ok(code) => {
                        let replies = vec![
                            Reply::text(t_args_lang("newtest-started", &[("code", code.as_str())], lang)),
                            self.upload_prompt(lang),
                        ];
                        Step::new(ExamDialogueState::UploadFiles { code, uploaded: 0 }, replies)
                    }
                    Err(e) => Step::new(state, vec![error_reply(&e, lang)]),
                }
            }
            Command::MyTests => {
                match self.guarded("list_by_owner", self.store.list_by_owner(user_id)).await {
                    Ok(tests) => Step::new(state, vec![Reply::text(format_test_list(&tests, lang))]),
                    Err(e) => Step::new(state, vec![error_reply(&e, lang)]),
                }
            }
            Command::Unknown(name) => {
                debug!(user_id, command = %name, "Unknown command");
                let mut replies = vec![Reply::text(t_lang("unknown-command", lang))];
                if matches!(state, ExamDialogueState::EnterKey { .. }) {
                    replies.push(Reply::text(t_lang("key-no-slash", lang)));
                }
                Step::new(state, replies)
            }
        }
    }

    fn upload_prompt(&self, lang: Option<&str>) -> Reply {
        Reply::text(t_args_lang(
            "upload-prompt",
            &[("max", &self.config.max_files_per_test.to_string())],
            lang,
        ))
    }

    fn select_role(&self, lang: Option<&str>, state: ExamDialogueState, input: Input) -> Step {
        match input {
            Input::Button(data) if data == BUTTON_ROLE_TEACHER => Step::new(
                ExamDialogueState::TeacherAuth,
                vec![Reply::text(t_lang("teacher-auth-prompt", lang))],
            ),
            Input::Button(data) if data == BUTTON_ROLE_STUDENT => Step::new(
                ExamDialogueState::StudentEnterCode,
                vec![Reply::text(t_lang("student-code-prompt", lang))],
            ),
            Input::Button(_) => Step::ignore(state),
            _ => Step::new(
                ExamDialogueState::SelectRole,
                vec![Reply::with_keyboard(t_lang("role-prompt", lang), role_keyboard(lang))],
            ),
        }
    }

    async fn teacher_auth(&self, user_id: i64, lang: Option<&str>, input: Input) -> Step {
        let text = match input {
            Input::Text(text) => text,
            Input::Button(_) => return Step::ignore(ExamDialogueState::TeacherAuth),
            _ => {
                return Step::new(
                    ExamDialogueState::TeacherAuth,
                    vec![Reply::text(t_lang("teacher-auth-prompt", lang))],
                )
            }
        };

        if !validate_teacher_secret(&text, &self.config.teacher_secret) {
            warn!(user_id, "Teacher authentication failed, continuing as student");
            return Step::new(
                ExamDialogueState::StudentEnterCode,
                vec![
                    error_reply(&SessionError::InvalidTeacherCode, lang),
                    Reply::text(t_lang("student-code-prompt", lang)),
                ],
            );
        }

        info!(user_id, "Teacher authenticated");
        match self.reserve_code(user_id).await {
            Ok(code) => {
                let replies = vec![
                    Reply::text(t_args_lang("teacher-auth-success", &[("code", code.as_str())], lang)),
                    self.upload_prompt(lang),
                ];
                Step::new(ExamDialogueState::UploadFiles { code, uploaded: 0 }, replies)
            }
            Err(e) => Step::new(
                ExamDialogueState::Done {
                    role: Role::Teacher,
                },
                vec![error_reply(&e, lang)],
            ),
        }
    }

    async fn upload_files(
        &self,
        lang: Option<&str>,
        code: TestCode,
        uploaded: usize,
        input: Input,
    ) -> Step {
        let stay = |code: TestCode, replies| {
            Step::new(ExamDialogueState::UploadFiles { code, uploaded }, replies)
        };
        // Offer add-more / continue only once something is attached
        let nudge = |text: String| {
            if uploaded > 0 {
                Reply::with_keyboard(text, upload_keyboard(lang))
            } else {
                Reply::text(text)
            }
        };

        match input {
            Input::File(file) if file.is_image() => {
                if uploaded >= self.config.max_files_per_test {
                    let text = t_args_lang(
                        "upload-limit-reached",
                        &[("max", &self.config.max_files_per_test.to_string())],
                        lang,
                    );
                    return stay(code, vec![Reply::with_keyboard(text, upload_keyboard(lang))]);
                }
                if let Err(e) = self.guarded("append_file", self.store.append_file(&code, &file)).await {
                    return stay(code, vec![error_reply(&e, lang)]);
                }
                let uploaded = uploaded + 1;
                info!(code = %code, uploaded, "Image attached to test");
                let text = t_args_lang("upload-photo-received", &[("count", &uploaded.to_string())], lang);
                Step::new(
                    ExamDialogueState::UploadFiles { code, uploaded },
                    vec![Reply::with_keyboard(text, upload_keyboard(lang))],
                )
            }
            Input::File(file) if file.is_pdf() => {
                if uploaded > 0 {
                    return stay(code, vec![nudge(t_lang("upload-mixed-not-allowed", lang))]);
                }
                if let Err(e) = self.guarded("append_file", self.store.append_file(&code, &file)).await {
                    return stay(code, vec![error_reply(&e, lang)]);
                }
                info!(code = %code, "Document attached to test");
                Step::new(
                    ExamDialogueState::EnterKey { code },
                    vec![
                        Reply::text(t_lang("upload-pdf-received", lang)),
                        Reply::text(t_lang("key-prompt", lang)),
                    ],
                )
            }
            Input::Button(data) if data == BUTTON_UPLOAD_MORE => {
                stay(code, vec![Reply::text(t_lang("upload-more-prompt", lang))])
            }
            Input::Button(data) if data == BUTTON_UPLOAD_DONE => Step::new(
                ExamDialogueState::EnterKey { code },
                vec![Reply::text(t_lang("key-prompt", lang))],
            ),
            Input::Button(_) => stay(code, Vec::new()),
            _ => {
                let text = error_text(&SessionError::MissingAttachment, lang);
                stay(code, vec![nudge(text)])
            }
        }
    }

    async fn enter_key(&self, lang: Option<&str>, code: TestCode, input: Input) -> Step {
        let text = match input {
            Input::Text(text) => text,
            Input::Button(_) => return Step::ignore(ExamDialogueState::EnterKey { code }),
            _ => {
                return Step::new(
                    ExamDialogueState::EnterKey { code },
                    vec![Reply::text(t_lang("key-prompt", lang))],
                )
            }
        };

        let key = match AnswerKey::parse(&text) {
            Ok(key) => key,
            Err(_) => {
                return Step::new(
                    ExamDialogueState::EnterKey { code },
                    vec![Reply::text(t_lang("error-key-empty", lang))],
                )
            }
        };

        if let Err(e) = self.guarded("set_key", self.store.set_key(&code, &key)).await {
            return Step::new(ExamDialogueState::EnterKey { code }, vec![error_reply(&e, lang)]);
        }

        let question_count = key.len();
        info!(code = %code, question_count, "Answer key stored");
        Step::new(
            ExamDialogueState::SelectFeedbackMode {
                code,
                question_count,
            },
            vec![
                Reply::text(t_args_lang("key-saved", &[("count", &question_count.to_string())], lang)),
                Reply::with_keyboard(t_lang("mode-prompt", lang), mode_keyboard(lang)),
            ],
        )
    }

    async fn select_mode(
        &self,
        user_id: i64,
        lang: Option<&str>,
        code: TestCode,
        question_count: usize,
        input: Input,
    ) -> Step {
        let parsed = match &input {
            Input::Button(data) => match data.strip_prefix(BUTTON_MODE_PREFIX) {
                Some(mode) => mode.parse::<FeedbackMode>().ok(),
                None => {
                    return Step::ignore(ExamDialogueState::SelectFeedbackMode {
                        code,
                        question_count,
                    })
                }
            },
            Input::Text(text) => text.parse::<FeedbackMode>().ok(),
            _ => None,
        };

        let Some(mode) = parsed else {
            return Step::new(
                ExamDialogueState::SelectFeedbackMode {
                    code,
                    question_count,
                },
                vec![Reply::with_keyboard(t_lang("mode-invalid", lang), mode_keyboard(lang))],
            );
        };

        if let Err(e) = self
            .guarded("set_feedback_mode", self.store.set_feedback_mode(&code, mode))
            .await
        {
            return Step::new(
                ExamDialogueState::SelectFeedbackMode {
                    code,
                    question_count,
                },
                vec![error_reply(&e, lang)],
            );
        }

        info!(user_id, code = %code, mode = %mode, question_count, "Test finalized");
        let mode_name = t_lang(&format!("mode-name-{mode}"), lang);
        Step::new(
            ExamDialogueState::Done {
                role: Role::Teacher,
            },
            vec![
                Reply::text(t_args_lang("test-saved", &[("code", code.as_str())], lang)),
                Reply::text(t_args_lang(
                    "test-saved-details",
                    &[("count", &question_count.to_string()), ("mode", &mode_name)],
                    lang,
                )),
                Reply::text(t_lang("done-teacher-hint", lang)),
            ],
        )
    }

    /// Look up a gradable test by user-typed code
    async fn find_test(&self, input: &str) -> Result<Test, SessionError> {
        let Some(code) = TestCode::parse(input) else {
            return Err(SessionError::UnknownTestCode(input.trim().to_string()));
        };
        match self.guarded("get", self.store.get(&code)).await? {
            None => Err(SessionError::UnknownTestCode(code.to_string())),
            Some(test) if !test.is_finalized() => Err(SessionError::TestNotReady(code.to_string())),
            Some(test) => Ok(test),
        }
    }

    async fn student_code(
        &self,
        user_id: i64,
        lang: Option<&str>,
        state: ExamDialogueState,
        input: Input,
    ) -> Step {
        let text = match input {
            Input::Text(text) => text,
            Input::Button(_) => return Step::ignore(state),
            _ => {
                return Step::new(state, vec![Reply::text(t_lang("student-code-prompt", lang))])
            }
        };

        let test = match self.find_test(&text).await {
            Ok(test) => test,
            Err(e) => {
                info!(user_id, error = %e, "Test lookup failed");
                return Step::new(ExamDialogueState::StudentEnterCode, vec![error_reply(&e, lang)]);
            }
        };

        let question_count = test.question_count();
        info!(user_id, code = %test.code, "Student opened test");

        let mut replies = vec![Reply::text(t_args_lang(
            "student-test-found",
            &[
                ("code", test.code.as_str()),
                ("count", &question_count.to_string()),
            ],
            lang,
        ))];
        replies.extend(test.files.iter().cloned().map(Reply::File));
        replies.push(Reply::text(t_args_lang(
            "student-answers-prompt",
            &[("count", &question_count.to_string())],
            lang,
        )));

        Step::new(
            ExamDialogueState::StudentEnterAnswers {
                code: test.code,
                question_count,
            },
            replies,
        )
    }

    async fn student_answers(
        &self,
        user_id: i64,
        lang: Option<&str>,
        code: TestCode,
        question_count: usize,
        input: Input,
    ) -> Step {
        let stay = |code: TestCode, replies| {
            Step::new(
                ExamDialogueState::StudentEnterAnswers {
                    code,
                    question_count,
                },
                replies,
            )
        };

        let submitted = match input {
            Input::Text(text) => text,
            Input::Button(_) => return stay(code, Vec::new()),
            _ => {
                let prompt = t_args_lang(
                    "student-answers-prompt",
                    &[("count", &question_count.to_string())],
                    lang,
                );
                return stay(code, vec![Reply::text(prompt)]);
            }
        };

        let test = match self.find_test(code.as_str()).await {
            Ok(test) => test,
            Err(e) if e.aborts_operation() => return stay(code, vec![error_reply(&e, lang)]),
            Err(e) => {
                return Step::new(ExamDialogueState::StudentEnterCode, vec![error_reply(&e, lang)])
            }
        };

        let (Some(key), Some(mode)) = (test.answer_key.as_ref(), test.feedback_mode) else {
            let e = SessionError::TestNotReady(code.to_string());
            return Step::new(ExamDialogueState::StudentEnterCode, vec![error_reply(&e, lang)]);
        };

        match grade(key, &submitted, mode) {
            Ok(result) => {
                info!(
                    user_id,
                    code = %code,
                    score = result.score,
                    total = result.total,
                    "Submission graded"
                );
                Step::new(
                    ExamDialogueState::Done {
                        role: Role::Student,
                    },
                    vec![
                        Reply::text(render_feedback(&result, mode, lang)),
                        Reply::text(t_lang("student-next-hint", lang)),
                    ],
                )
            }
            Err(e) => {
                debug!(user_id, code = %code, error = %e, "Submission rejected");
                stay(code, vec![error_reply(&e, lang)])
            }
        }
    }

    fn teacher_idle(&self, lang: Option<&str>, input: Input) -> Step {
        let state = ExamDialogueState::Done {
            role: Role::Teacher,
        };
        match input {
            Input::Button(_) => Step::ignore(state),
            _ => Step::new(state, vec![Reply::text(t_lang("done-teacher-hint", lang))]),
        }
    }
}

/// Render the `/mytests` listing
pub fn format_test_list(tests: &[Test], language_code: Option<&str>) -> String {
    if tests.is_empty() {
        return t_lang("mytests-empty", language_code);
    }

    let mut lines = vec![t_lang("mytests-title", language_code)];
    for test in tests {
        let mode = match test.feedback_mode {
            Some(mode) if test.is_finalized() => t_lang(&format!("mode-name-{mode}"), language_code),
            _ => t_lang("mytests-draft", language_code),
        };
        lines.push(format!(
            "• {}",
            t_args_lang(
                "mytests-item",
                &[
                    ("code", test.code.as_str()),
                    ("count", &test.question_count().to_string()),
                    ("mode", &mode),
                ],
                language_code,
            )
        ));
    }
    lines.join("\n")
}
