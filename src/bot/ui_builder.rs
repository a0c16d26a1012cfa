//! UI Builder module for turning session replies into Telegram messages

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use tracing::debug;

use crate::session::{Keyboard, Reply};
use crate::test_model::{Attachment, AttachmentKind};

/// Convert a session keyboard into Telegram inline markup
pub fn inline_keyboard(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.data.clone()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    InlineKeyboardMarkup::new(rows)
}

async fn send_attachment(bot: &Bot, chat_id: ChatId, file: &Attachment) -> Result<()> {
    let input = InputFile::file_id(FileId(file.file_id.clone()));
    match file.kind {
        AttachmentKind::Photo => {
            bot.send_photo(chat_id, input).await?;
        }
        AttachmentKind::Document => {
            bot.send_document(chat_id, input).await?;
        }
    }
    Ok(())
}

/// Send every reply of a step, in order
pub async fn send_replies(bot: &Bot, chat_id: ChatId, replies: &[Reply]) -> Result<()> {
    for reply in replies {
        match reply {
            Reply::Text {
                text,
                keyboard: Some(keyboard),
            } => {
                bot.send_message(chat_id, text)
                    .reply_markup(inline_keyboard(keyboard))
                    .await?;
            }
            Reply::Text { text, keyboard: None } => {
                bot.send_message(chat_id, text).await?;
            }
            Reply::File(file) => {
                debug!(user_id = %chat_id, file_id = %file.file_id, "Forwarding test file");
                send_attachment(bot, chat_id, file).await?;
            }
        }
    }
    Ok(())
}
