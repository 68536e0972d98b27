use std::fmt::Display;

use serde::{Deserialize, Serialize};
use teloxide::types::{Chat, ChatId, Recipient, UserId};

/// Error type for the collaborators the ledger talks to.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A channel (or group) identifier, as written in the config:
/// either `@username` or a numeric chat ID like `-1001234567890`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    /// Parse a channel identifier. Usernames get an `@` prepended if it's missing
    /// and are lowercased, since Telegram usernames are case-insensitive.
    pub fn new(string: &str) -> Option<Self> {
        let string = string.trim();
        if string.is_empty() {
            return None;
        }
        if string.parse::<i64>().is_ok() {
            return Some(Self(string.to_string()));
        }

        let username = string.strip_prefix('@').unwrap_or(string);
        if username.is_empty()
            || !username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return None;
        }
        Some(Self(format!("@{}", username.to_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Where to send API requests about this channel.
    pub fn recipient(&self) -> Recipient {
        match self.0.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => Recipient::ChannelUsername(self.0.clone()),
        }
    }

    /// Returns `true` if this identifier refers to the given chat.
    pub fn matches(&self, chat: &Chat) -> bool {
        match self.0.strip_prefix('@') {
            Some(username) => chat
                .username()
                .is_some_and(|u| u.eq_ignore_ascii_case(username)),
            None => self.0.parse::<i64>().is_ok_and(|id| id == chat.id.0),
        }
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for Channel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Channel::new(&value).ok_or_else(|| format!("Not a channel identifier: {value:?}"))
    }
}

impl From<Channel> for String {
    fn from(value: Channel) -> Self {
        value.0
    }
}

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Transition {
    Joined,
    Left,
}

impl Transition {
    /// Value of the subscription flag after this transition.
    pub fn subscribed(self) -> bool {
        self == Transition::Joined
    }

    /// Classify a membership change from whether the user was present
    /// in the chat before and after it. `None` if nothing changed.
    pub fn from_presence(was_present: bool, is_present: bool) -> Option<Self> {
        match (was_present, is_present) {
            (false, true) => Some(Transition::Joined),
            (true, false) => Some(Transition::Left),
            _ => None,
        }
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Joined => write!(f, "joined"),
            Transition::Left => write!(f, "left"),
        }
    }
}

/// A user joining or leaving a tracked channel. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub user: UserId,
    pub channel: Channel,
    pub transition: Transition,
}

/// Where a transition came from. Some notices only make sense for one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// Evaluating the requirement set right after `/start`.
    Registration,
    /// A membership update from Telegram.
    MembershipUpdate,
    /// The user asked to re-check their subscriptions.
    Resync,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parsing() {
        assert_eq!(Channel::new("@TheOpenArt").unwrap().as_str(), "@theopenart");
        assert_eq!(Channel::new("nvbet").unwrap().as_str(), "@nvbet");
        assert_eq!(
            Channel::new(" -1001234567890 ").unwrap().as_str(),
            "-1001234567890"
        );
        assert_eq!(Channel::new(""), None);
        assert_eq!(Channel::new("@"), None);
        assert_eq!(Channel::new("@not a channel"), None);
    }

    #[test]
    fn channel_recipients() {
        assert_eq!(
            Channel::new("@nvbet").unwrap().recipient(),
            Recipient::ChannelUsername("@nvbet".to_string())
        );
        assert_eq!(
            Channel::new("-100123").unwrap().recipient(),
            Recipient::Id(ChatId(-100123))
        );
    }

    #[test]
    fn channel_deserializing() {
        let channels: Vec<Channel> = serde_json::from_str(r#"["@A_b", "-42"]"#).unwrap();
        assert_eq!(channels[0].as_str(), "@a_b");
        assert_eq!(channels[1].as_str(), "-42");
        assert!(serde_json::from_str::<Vec<Channel>>(r#"["bad name"]"#).is_err());
    }

    #[test]
    fn presence_transitions() {
        assert_eq!(
            Transition::from_presence(false, true),
            Some(Transition::Joined)
        );
        assert_eq!(Transition::from_presence(true, false), Some(Transition::Left));
        assert_eq!(Transition::from_presence(true, true), None);
        assert_eq!(Transition::from_presence(false, false), None);
    }
}
