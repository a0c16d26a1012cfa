//! Bot module for handling Telegram interactions
//!
//! Thin adapter over [`crate::session`]:
//! - `message_handler`: Turns text, photo, and document messages into session inputs
//! - `callback_handler`: Turns inline keyboard presses into session inputs
//! - `ui_builder`: Sends session replies back as Telegram messages

pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

pub use callback_handler::{callback_handler, is_private_callback};
pub use message_handler::{is_private_message, message_handler, message_input};
pub use ui_builder::{inline_keyboard, send_replies};
