use std::sync::Arc;

use bot_commons::useful_methods::BotStuff;
use teloxide::{
    prelude::*,
    types::{CallbackQuery, ChatId},
    RequestError,
};

use crate::{
    ledger::{Ledger, LedgerError, SyncReport},
    oracle::TelegramOracle,
    presentation::{Action, Presentation, TelegramNotifier},
    types::TransitionOrigin,
};

use super::{reply_to_sync, something_went_wrong};

pub async fn handle_callback_query(
    bot: Bot,
    query: CallbackQuery,
    ledger: Arc<Ledger>,
    presentation: Arc<Presentation>,
    oracle: Arc<TelegramOracle>,
    notifier: Arc<TelegramNotifier>,
) -> Result<(), RequestError> {
    // Stop the loading spinner on the button regardless of what happens next.
    bot.answer_callback_query(query.id.clone()).await?;

    let Some(action) = query.data.as_deref().and_then(Action::from_data) else {
        log::debug!("Unknown callback data: {:?}", query.data);
        return Ok(());
    };

    let user = query.from.id;
    let chat = ChatId::from(user);

    // Everything here only makes sense for registered users.
    let points = match ledger.get_points(user).await {
        Ok(Some(points)) => points,
        Ok(None) => {
            bot.send_html(chat, &ledger.config().messages.missing_command, None)
                .await?;
            return Ok(());
        }
        Err(e) => {
            log::error!("Failed to get points of user {user}: {e}");
            return something_went_wrong(&bot, &ledger, chat).await;
        }
    };

    match action {
        Action::Points => {
            bot.send_html(chat, &presentation.points_text(points), None)
                .await?;
        }
        Action::Rating => match ledger.get_rating(ledger.config().rating_limit).await {
            Ok(rows) => {
                bot.send_html(chat, &presentation.rating_text(&rows), None)
                    .await?;
            }
            Err(e) => {
                log::error!("Failed to get the rating: {e}");
                something_went_wrong(&bot, &ledger, chat).await?;
            }
        },
        Action::Info => {
            bot.send_html(
                chat,
                &presentation.start_text(None),
                Some(presentation.main_keyboard(user)),
            )
            .await?;
        }
        Action::CheckSubscription => {
            match ledger
                .sync_with_oracle(&*oracle, &*notifier, user, TransitionOrigin::Resync)
                .await
            {
                Ok(report) => {
                    reply_to_sync(&bot, &ledger, &presentation, user, &report).await?;
                }
                // Can't tell, so not subscribed.
                Err(LedgerError::OracleUnavailable(e)) => {
                    log::warn!("Could not check subscriptions of user {user}: {e}");
                    let report = SyncReport {
                        missing: ledger.config().required_channels.clone(),
                        milestone: false,
                    };
                    reply_to_sync(&bot, &ledger, &presentation, user, &report).await?;
                }
                Err(e) => {
                    log::error!("Failed to resync user {user}: {e}");
                    something_went_wrong(&bot, &ledger, chat).await?;
                }
            }
        }
    }

    Ok(())
}
