use std::{fmt::Write, sync::Arc};

use bot_commons::useful_methods::BotStuff;
use teloxide::{
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, UserId},
    Bot,
};

use crate::{
    config::{fill, Config},
    database::RatingRow,
    notify::{Notice, Notifier},
    types::{BoxError, Channel},
};

/// Callback data of the inline keyboard buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Points,
    Rating,
    Info,
    CheckSubscription,
}

impl Action {
    pub fn data(self) -> &'static str {
        match self {
            Action::Points => "POINTS",
            Action::Rating => "RATING",
            Action::Info => "INFO",
            Action::CheckSubscription => "CHECK",
        }
    }

    pub fn from_data(data: &str) -> Option<Self> {
        Some(match data {
            "POINTS" => Action::Points,
            "RATING" => Action::Rating,
            "INFO" => Action::Info,
            "CHECK" => Action::CheckSubscription,
            _ => return None,
        })
    }
}

/// Turns config strings and ledger results into message texts and keyboards.
pub struct Presentation {
    config: Arc<Config>,
    bot_username: String,
}

impl Presentation {
    pub fn new(config: Arc<Config>, bot_username: &str) -> Self {
        Presentation {
            config,
            bot_username: bot_username.to_string(),
        }
    }

    /// Link that starts this bot with `user` as the referrer.
    pub fn invite_link(&self, user: UserId) -> String {
        format!("https://t.me/{}?start={}", self.bot_username, user)
    }

    /// Keyboard for users taking part in the giveaway.
    pub fn main_keyboard(&self, user: UserId) -> InlineKeyboardMarkup {
        let buttons = &self.config.buttons;
        let link = self.invite_link(user);
        let personal_link = fill(&self.config.format_strings.personal_link, &[("link", link.as_str())]);

        InlineKeyboardMarkup::new([
            vec![InlineKeyboardButton::switch_inline_query(
                buttons.invite.clone(),
                personal_link,
            )],
            vec![
                InlineKeyboardButton::callback(buttons.points.clone(), Action::Points.data()),
                InlineKeyboardButton::callback(buttons.rating.clone(), Action::Rating.data()),
            ],
            vec![InlineKeyboardButton::callback(
                buttons.info.clone(),
                Action::Info.data(),
            )],
        ])
    }

    /// Main keyboard, plus the check button for users that aren't in
    /// every required channel yet.
    pub fn registered_keyboard(&self, user: UserId, subscribed_to_all: bool) -> InlineKeyboardMarkup {
        let keyboard = self.main_keyboard(user);
        match subscribed_to_all {
            true => keyboard,
            false => keyboard.append_row([InlineKeyboardButton::callback(
                self.config.buttons.check_subscription.clone(),
                Action::CheckSubscription.data(),
            )]),
        }
    }

    /// Keyboard for users that still have channels to subscribe to.
    pub fn check_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
            self.config.buttons.check_subscription.clone(),
            Action::CheckSubscription.data(),
        )]])
    }

    /// Greeting, with who invited the user if anyone did.
    pub fn start_text(&self, inviter: Option<&str>) -> String {
        let start = &self.config.messages.start;
        match inviter {
            Some(inviter) => {
                let invited = fill(
                    &self.config.format_strings.you_were_invited,
                    &[("inviter", &*html_escape::encode_text(inviter))],
                );
                format!("{invited}\n\n{start}")
            }
            None => start.clone(),
        }
    }

    /// What to subscribe to, and how to tell the bot it's done.
    pub fn subscribe_text(&self, missing: &[Channel]) -> String {
        let channels = missing
            .iter()
            .map(Channel::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let missing = fill(
            &self.config.format_strings.channels_missing,
            &[("channels", channels.as_str())],
        );
        format!("{}\n\n{missing}", self.config.messages.subscribe_to_join)
    }

    pub fn points_text(&self, points: i64) -> String {
        fill(
            &self.config.format_strings.points,
            &[("points", points.to_string().as_str())],
        )
    }

    /// Monospace table of the top users.
    pub fn rating_text(&self, rows: &[RatingRow]) -> String {
        let name_width = rows
            .iter()
            .map(|row| row.username.chars().count())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut text = String::from("<pre>");
        let _ = writeln!(text, "{:>3}  {:<name_width$}  {}", "#", "Name", "Points");
        for (place, row) in rows.iter().enumerate() {
            // Padding has to be computed before escaping.
            let padding = name_width - row.username.chars().count();
            let _ = writeln!(
                text,
                "{:>3}  {}{}  {}",
                place + 1,
                html_escape::encode_text(&row.username),
                " ".repeat(padding),
                row.points
            );
        }
        text.push_str("</pre>");
        text
    }

    /// Text and keyboard for a ledger notice sent to `to`.
    pub fn notice(&self, to: UserId, notice: &Notice) -> (String, Option<InlineKeyboardMarkup>) {
        let strings = &self.config.format_strings;
        match notice {
            Notice::Welcome { inviter } => (self.start_text(inviter.as_deref()), None),
            Notice::FullySubscribed => (
                self.config.messages.subscribed_to_all.clone(),
                Some(self.main_keyboard(to)),
            ),
            Notice::FriendCompleted { friend } => (
                fill(
                    &strings.friend_subscribed_to_all,
                    &[("friend", &*html_escape::encode_text(friend))],
                ),
                None,
            ),
            Notice::FriendLeft {
                friend,
                channel,
                points,
            } => (
                fill(
                    &strings.friend_unsubscribed,
                    &[
                        ("friend", &*html_escape::encode_text(friend)),
                        ("channel", channel.as_str()),
                        ("points", points.to_string().as_str()),
                    ],
                ),
                None,
            ),
            Notice::Unsubscribed { channel } => (
                fill(&strings.unsubscribed, &[("channel", channel.as_str())]),
                Some(self.check_keyboard()),
            ),
        }
    }
}

/// Sends ledger notices as Telegram messages.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    presentation: Arc<Presentation>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, presentation: Arc<Presentation>) -> Self {
        TelegramNotifier { bot, presentation }
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, to: UserId, notice: Notice) -> Result<(), BoxError> {
        let (text, keyboard) = self.presentation.notice(to, &notice);
        self.bot.send_html(ChatId::from(to), &text, keyboard).await?;
        Ok(())
    }
}
