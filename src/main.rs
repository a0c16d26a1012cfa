use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use answerkey::bot;
use answerkey::config::{BotConfig, StorageBackend};
use answerkey::db::PgTestStore;
use answerkey::dialogue::ExamDialogueState;
use answerkey::localization::init_localization;
use answerkey::session::SessionMachine;
use answerkey::storage::{InMemTestStore, JsonFileTestStore, TestStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting exam checking bot");

    init_localization().context("Failed to load localization resources")?;
    let config = BotConfig::from_env()?;

    let bot_token = env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
    let bot = Bot::new(bot_token);

    match config.storage.clone() {
        StorageBackend::Postgres(database_url) => {
            info!("Using PostgreSQL test storage");
            let store = PgTestStore::connect(&database_url).await?;
            run(bot, store, config).await
        }
        StorageBackend::JsonFile(path) => {
            info!(path = %path.display(), "Using JSON file test storage");
            let store = JsonFileTestStore::open(&path)?;
            run(bot, store, config).await
        }
        StorageBackend::Memory => {
            info!("Using in-memory test storage; tests are lost on restart");
            run(bot, InMemTestStore::new(), config).await
        }
    }
}

async fn run<S: TestStore>(bot: Bot, store: S, config: BotConfig) -> Result<()> {
    let machine = Arc::new(SessionMachine::new(store, config));

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message| bot::is_private_message(&msg))
                .enter_dialogue::<Message, InMemStorage<ExamDialogueState>, ExamDialogueState>()
                .endpoint(bot::message_handler::<S>),
        )
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery| bot::is_private_callback(&q))
                .enter_dialogue::<CallbackQuery, InMemStorage<ExamDialogueState>, ExamDialogueState>()
                .endpoint(bot::callback_handler::<S>),
        );

    info!("Bot initialized, starting dispatcher");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![InMemStorage::<ExamDialogueState>::new(), machine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
