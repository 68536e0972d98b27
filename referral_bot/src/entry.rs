use std::sync::Arc;
use teloxide::{dptree::deps, prelude::*, types::BotCommand};

use crate::{
    config::Config,
    database::Database,
    handlers::{self, callbacks::handle_callback_query},
    ledger::Ledger,
    oracle::TelegramOracle,
    presentation::{Presentation, TelegramNotifier},
};

/// # Panics
///
/// Panics if there's no key file, no valid config, or the database can't be opened.
pub async fn entry() {
    let key = bot_commons::load_bot_key().expect("Could not load bot key file!");
    let config = Arc::new(Config::load().expect("Could not load the config!"));
    log::info!(
        "Loaded config with {} required channels.",
        config.required_channels.len()
    );

    let bot = Bot::new(key);

    let me = bot.get_me().await.expect("Failed to get info about the bot!");

    bot.set_my_commands([BotCommand::new("start", "Take part in the giveaway")])
        .await
        .expect("Failed to set bot commands!");

    let database = Database::new(&config.database)
        .await
        .expect("Could not init the database!");

    let ledger = Arc::new(Ledger::new(database, config.clone()));
    let presentation = Arc::new(Presentation::new(config, me.username()));
    let oracle = Arc::new(TelegramOracle::new(bot.clone()));
    let notifier = Arc::new(TelegramNotifier::new(bot.clone(), presentation.clone()));

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query))
        .branch(Update::filter_chat_member().endpoint(handlers::handle_chat_member));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![ledger, presentation, oracle, notifier])
        .distribution_function(handlers::distribution_key)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
