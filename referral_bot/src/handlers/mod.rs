use std::sync::Arc;

use bot_commons::useful_methods::{BotStuff, MessageStuff, UserStuff};
use teloxide::{
    prelude::*,
    types::{ChatId, ChatMemberUpdated, Me, Update, UpdateKind, User, UserId},
    RequestError,
};

use crate::{
    ledger::{Ledger, StartOutcome, SyncReport},
    oracle::TelegramOracle,
    presentation::{Presentation, TelegramNotifier},
    types::{SubscriptionEvent, Transition, TransitionOrigin},
};

pub mod callbacks;

/// Key the dispatcher uses to order updates: everything about one user is
/// handled in sequence, different users are handled concurrently.
///
/// Membership updates are keyed by the member, not whoever caused the change.
pub fn distribution_key(update: &Update) -> Option<UserId> {
    match &update.kind {
        UpdateKind::Message(message) => message.from.as_ref().map(|user| user.id),
        UpdateKind::CallbackQuery(query) => Some(query.from.id),
        UpdateKind::ChatMember(updated) => Some(updated.new_chat_member.user.id),
        _ => None,
    }
}

/// Referrer ID out of the `/start` argument. Anything unparsable means no referrer.
fn parse_referrer(args: &str) -> Option<UserId> {
    let id: u64 = args.split_whitespace().next()?.parse().ok()?;
    (id != 0).then_some(UserId(id))
}

/// Tell the user that we messed up.
pub(crate) async fn something_went_wrong(
    bot: &Bot,
    ledger: &Ledger,
    chat: ChatId,
) -> Result<(), RequestError> {
    bot.send_html(chat, &ledger.config().messages.something_went_wrong, None)
        .await?;
    Ok(())
}

/// Tell the user where they stand after a sync with the oracle.
/// If the sync reached the milestone, the user has already been told.
pub(crate) async fn reply_to_sync(
    bot: &Bot,
    ledger: &Ledger,
    presentation: &Presentation,
    user: UserId,
    report: &SyncReport,
) -> Result<(), RequestError> {
    if report.milestone {
        return Ok(());
    }

    if report.subscribed_to_all() {
        bot.send_html(
            ChatId::from(user),
            &ledger.config().messages.subscribed_to_all,
            Some(presentation.main_keyboard(user)),
        )
        .await?;
    } else {
        bot.send_html(
            ChatId::from(user),
            &presentation.subscribe_text(&report.missing),
            Some(presentation.check_keyboard()),
        )
        .await?;
    }
    Ok(())
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    ledger: Arc<Ledger>,
    presentation: Arc<Presentation>,
    oracle: Arc<TelegramOracle>,
    notifier: Arc<TelegramNotifier>,
) -> Result<(), RequestError> {
    // The giveaway happens in private chats only.
    if !message.chat.is_private() {
        return Ok(());
    }
    let Some(user) = &message.from else {
        return Ok(());
    };

    if let Some(command) = message.command(&me) {
        if command.name.eq_ignore_ascii_case("/start") {
            let referrer = parse_referrer(command.args);
            return handle_start(&bot, user, referrer, &ledger, &presentation, &oracle, &notifier)
                .await;
        }
    }

    bot.send_html(
        message.chat.id,
        &ledger.config().messages.missing_command,
        None,
    )
    .await?;
    Ok(())
}

async fn handle_start(
    bot: &Bot,
    user: &User,
    referrer: Option<UserId>,
    ledger: &Ledger,
    presentation: &Presentation,
    oracle: &TelegramOracle,
    notifier: &TelegramNotifier,
) -> Result<(), RequestError> {
    let chat = ChatId::from(user.id);

    let sync = match ledger
        .start(oracle, notifier, user.id, &user.handle(), referrer)
        .await
    {
        Ok(StartOutcome::Registered { sync }) => sync,
        Ok(StartOutcome::AlreadyRegistered { subscribed_to_all }) => {
            bot.send_html(
                chat,
                &ledger.config().messages.already_registered,
                Some(presentation.registered_keyboard(user.id, subscribed_to_all)),
            )
            .await?;
            return Ok(());
        }
        Err(e) => {
            log::error!("Failed to register user {}: {e}", user.id);
            return something_went_wrong(bot, ledger, chat).await;
        }
    };

    // Couldn't check, so show everything and let them press the button.
    let report = sync.unwrap_or_else(|| SyncReport {
        missing: ledger.config().required_channels.clone(),
        milestone: false,
    });
    reply_to_sync(bot, ledger, presentation, user.id, &report).await
}

/// Someone joined or left a chat the bot is an admin of.
pub async fn handle_chat_member(
    updated: ChatMemberUpdated,
    ledger: Arc<Ledger>,
    notifier: Arc<TelegramNotifier>,
) -> Result<(), RequestError> {
    let Some(channel) = ledger
        .config()
        .required_channels
        .iter()
        .find(|channel| channel.matches(&updated.chat))
    else {
        return Ok(());
    };

    let member = &updated.new_chat_member.user;
    if member.is_bot {
        return Ok(());
    }

    let Some(transition) = Transition::from_presence(
        updated.old_chat_member.is_present(),
        updated.new_chat_member.is_present(),
    ) else {
        return Ok(());
    };

    let event = SubscriptionEvent {
        user: member.id,
        channel: channel.clone(),
        transition,
    };
    let delta = ledger.config().points_delta(transition);

    if let Err(e) = ledger
        .apply_transition(&*notifier, &event, delta, TransitionOrigin::MembershipUpdate)
        .await
    {
        log::error!(
            "Failed to apply user {} having {transition} {channel}: {e}",
            member.id
        );
    }

    Ok(())
}
