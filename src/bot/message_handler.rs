//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, error};

use crate::dialogue::ExamDialogue;
use crate::session::{Input, SessionMachine};
use crate::storage::TestStore;
use crate::test_model::Attachment;

use super::ui_builder::send_replies;

/// Sessions and test ownership are per user, so only private chats are served
pub fn is_private_message(msg: &Message) -> bool {
    msg.chat.is_private()
}

/// Classify a Telegram message as a session input
pub fn message_input(msg: &Message) -> Input {
    if let Some(text) = msg.text() {
        Input::from_text(text)
    } else if let Some(photos) = msg.photo() {
        // Telegram lists sizes from smallest to largest
        match photos.last() {
            Some(photo) => Input::File(Attachment::photo(photo.file.id.0.clone())),
            None => Input::Unsupported,
        }
    } else if let Some(document) = msg.document() {
        Input::File(Attachment::document(
            document.file.id.0.clone(),
            document.file_name.clone(),
            document.mime_type.as_ref().map(|mime| mime.to_string()),
        ))
    } else {
        Input::Unsupported
    }
}

pub async fn message_handler<S: TestStore>(
    bot: Bot,
    msg: Message,
    machine: Arc<SessionMachine<S>>,
    dialogue: ExamDialogue,
) -> Result<()> {
    // In a private chat the chat id is the sender's user id
    let user_id = msg.chat.id.0;
    let language_code = msg.from.as_ref().and_then(|user| user.language_code.clone());
    let input = message_input(&msg);
    debug!(user_id, input = ?input, "Received message");

    let state = dialogue.get_or_default().await?;
    let step = machine
        .handle(user_id, language_code.as_deref(), state, input)
        .await;
    dialogue.update(step.state.clone()).await?;

    if let Err(e) = send_replies(&bot, msg.chat.id, &step.replies).await {
        error!(user_id, error = %e, "Failed to send replies");
        return Err(e);
    }
    Ok(())
}
