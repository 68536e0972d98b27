use std::{future::Future, time::Duration};

use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    types::{InlineKeyboardMarkup, Me, Message, ParseMode, Recipient, User},
    Bot, RequestError,
};

/// A bot command split out of a message, like `/start 12345`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Command with the leading slash, like `/start`.
    /// A trailing `@botname` addressed at this bot is trimmed.
    pub name: &'a str,
    /// Everything after the command, with surrounding whitespace trimmed.
    pub args: &'a str,
}

/// Split `text` into a command and its arguments, if it looks like a command
/// addressed at the bot with username `bot_username`.
///
/// Returns `None` if it's not a command, or if it's a `/command@otherbot`.
#[must_use]
pub fn parse_command<'a>(text: &'a str, bot_username: &str) -> Option<ParsedCommand<'a>> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }
    let command = text.split_whitespace().next()?;
    let args = text[command.len()..].trim();

    let name = match command.split_once('@') {
        Some((name, addressee)) => {
            if !addressee.eq_ignore_ascii_case(bot_username) {
                return None;
            }
            name
        }
        None => command,
    };

    Some(ParsedCommand { name, args })
}

pub trait MessageStuff {
    /// Command in this message addressed at this bot, if any.
    fn command<'a>(&'a self, me: &Me) -> Option<ParsedCommand<'a>>;
}

impl MessageStuff for Message {
    fn command<'a>(&'a self, me: &Me) -> Option<ParsedCommand<'a>> {
        parse_command(self.text()?, me.username())
    }
}

pub trait UserStuff {
    /// `@username` if the user has one, full name otherwise.
    fn handle(&self) -> String;
}

impl UserStuff for User {
    fn handle(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.full_name(),
        }
    }
}

pub trait BotStuff {
    /// Opinionated method to send a message, with HTML markup, an optional
    /// inline keyboard, and retries due to flood waiting or any other issues.
    fn send_html(
        &self,
        to_where: impl Into<Recipient> + Send,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> impl Future<Output = Result<Message, RequestError>> + Send;
}

impl BotStuff for Bot {
    async fn send_html(
        &self,
        to_where: impl Into<Recipient> + Send,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<Message, RequestError> {
        let to_where: Recipient = to_where.into();

        // Try up to 3 times lol
        let mut looped: u8 = 0;
        loop {
            looped += 1;
            let mut request = self
                .send_message(to_where.clone(), text)
                .parse_mode(ParseMode::Html);
            if let Some(keyboard) = &keyboard {
                request = request.reply_markup(keyboard.clone());
            }

            let error = match request.await {
                Ok(message) => return Ok(message),
                Err(e) => e,
            };

            if looped >= 3 {
                return Err(error);
            }

            if let RequestError::RetryAfter(seconds) = &error {
                log::debug!("Flood wait for {} seconds.", seconds.seconds());
                tokio::time::sleep(seconds.duration()).await;
            } else {
                log::debug!("Send attempt {looped} failed: {error}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, ParsedCommand};

    #[test]
    fn plain_commands() {
        assert_eq!(
            parse_command("/start", "giveaway_bot"),
            Some(ParsedCommand {
                name: "/start",
                args: ""
            })
        );
        assert_eq!(
            parse_command("/start   12345 ", "giveaway_bot"),
            Some(ParsedCommand {
                name: "/start",
                args: "12345"
            })
        );
        assert_eq!(parse_command("start", "giveaway_bot"), None);
        assert_eq!(parse_command("hi /start", "giveaway_bot"), None);
    }

    #[test]
    fn addressed_commands() {
        assert_eq!(
            parse_command("/start@Giveaway_Bot 42", "giveaway_bot"),
            Some(ParsedCommand {
                name: "/start",
                args: "42"
            })
        );
        assert_eq!(parse_command("/start@other_bot 42", "giveaway_bot"), None);
    }
}
