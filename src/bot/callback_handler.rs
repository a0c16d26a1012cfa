//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use crate::dialogue::ExamDialogue;
use crate::session::{Input, SessionMachine};
use crate::storage::TestStore;

use super::ui_builder::send_replies;

/// Only buttons under a message in a private chat drive a session
pub fn is_private_callback(q: &CallbackQuery) -> bool {
    q.message
        .as_ref()
        .is_some_and(|message| message.chat().is_private())
}

/// Handle callback queries from inline keyboards
pub async fn callback_handler<S: TestStore>(
    bot: Bot,
    q: CallbackQuery,
    machine: Arc<SessionMachine<S>>,
    dialogue: ExamDialogue,
) -> Result<()> {
    // Stop the client-side spinner whatever happens next
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    let user_id = dialogue.chat_id().0;
    debug!(user_id, data = %data, "Received callback query");

    let state = dialogue.get_or_default().await?;
    let step = machine
        .handle(user_id, q.from.language_code.as_deref(), state, Input::Button(data))
        .await;
    dialogue.update(step.state.clone()).await?;

    send_replies(&bot, dialogue.chat_id(), &step.replies).await
}
