use std::path::Path;

use serde::Deserialize;

use crate::types::{BoxError, Channel};

/// Environment variable that overrides where the config is read from.
pub const CONFIG_PATH_VAR: &str = "REFERRAL_BOT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Everything about a giveaway that isn't code.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// sqlx connection URL of the sqlite database.
    #[serde(default = "default_database")]
    pub database: String,
    /// Channels a user must be in to take part in the giveaway, in display order.
    pub required_channels: Vec<Channel>,
    #[serde(default)]
    pub points: PointsConfig,
    /// Whether to tell the referrer that their friend left a channel.
    #[serde(default = "default_true")]
    pub notify_referrer_on_leave: bool,
    /// How many rows the rating table shows.
    #[serde(default = "default_rating_limit")]
    pub rating_limit: u32,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default)]
    pub format_strings: FormatStrings,
    #[serde(default)]
    pub buttons: Buttons,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Awarded to the referrer when their friend joins a required channel.
    pub join: i64,
    /// Awarded to the referrer when their friend leaves one. Usually negative.
    pub leave: i64,
    /// Never let a balance go below zero.
    pub clamp_at_zero: bool,
}

impl Default for PointsConfig {
    fn default() -> Self {
        PointsConfig {
            join: 50,
            leave: -50,
            clamp_at_zero: false,
        }
    }
}

/// Fixed texts. HTML formatting is allowed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub start: String,
    pub subscribe_to_join: String,
    pub subscribed_to_all: String,
    pub already_registered: String,
    pub missing_command: String,
    pub something_went_wrong: String,
}

impl Default for Messages {
    fn default() -> Self {
        Messages {
            start: concat!(
                "Welcome to the giveaway!\n\n",
                "Take part by subscribing to the channels below. ",
                "Invite friends to earn points: more points, better odds."
            )
            .to_string(),
            subscribe_to_join: concat!(
                "To take part, subscribe to all the required channels, ",
                "then press the button below. ",
                "Stay subscribed until the giveaway ends!"
            )
            .to_string(),
            subscribed_to_all: concat!(
                "✨ Congratulations! You are now taking part in the giveaway.\n",
                "Invite friends with your personal link to earn points, but make ",
                "sure they stay subscribed, or the points will be taken back!"
            )
            .to_string(),
            already_registered: "You are already registered for the giveaway!".to_string(),
            missing_command: "Sorry, I don't know that command. Try /start.".to_string(),
            something_went_wrong: "Something went wrong! Please try again later.".to_string(),
        }
    }
}

/// Texts with `{placeholders}` in them. See [`fill`] for how they're filled in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatStrings {
    /// `{channel}`
    pub unsubscribed: String,
    /// `{friend}`, `{channel}`, `{points}`
    pub friend_unsubscribed: String,
    /// `{friend}`
    pub friend_subscribed_to_all: String,
    /// `{points}`
    pub points: String,
    /// `{link}`
    pub personal_link: String,
    /// `{inviter}`
    pub you_were_invited: String,
    /// `{channels}`
    pub channels_missing: String,
}

impl Default for FormatStrings {
    fn default() -> Self {
        FormatStrings {
            unsubscribed: concat!(
                "You unsubscribed from {channel} and are no longer taking part ",
                "in the giveaway. Subscribe again to get back in."
            )
            .to_string(),
            friend_unsubscribed: concat!(
                "Your friend {friend} unsubscribed from {channel} and is no longer ",
                "taking part in the giveaway. {points} points were taken back :("
            )
            .to_string(),
            friend_subscribed_to_all: concat!(
                "Your friend {friend} subscribed to all the required channels ",
                "and is now taking part in the giveaway!"
            )
            .to_string(),
            points: "You have {points} points.".to_string(),
            personal_link: "Your personal invite link:\n\n{link}".to_string(),
            you_were_invited: "You were invited by your friend {inviter}!".to_string(),
            channels_missing: "You are still not subscribed to: {channels}".to_string(),
        }
    }
}

/// Inline keyboard button labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Buttons {
    pub invite: String,
    pub points: String,
    pub rating: String,
    pub info: String,
    pub check_subscription: String,
}

impl Default for Buttons {
    fn default() -> Self {
        Buttons {
            invite: "Invite a friend".to_string(),
            points: "My points".to_string(),
            rating: "Rating".to_string(),
            info: "Info".to_string(),
            check_subscription: "I subscribed!".to_string(),
        }
    }
}

fn default_database() -> String {
    "sqlite:referral_bot.sqlite".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rating_limit() -> u32 {
    10
}

impl Config {
    /// Read the config from the path in [`CONFIG_PATH_VAR`], or `config.json`.
    ///
    /// # Errors
    ///
    /// Errors if the file can't be read, parsed or is invalid.
    pub fn load() -> Result<Config, BoxError> {
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .unwrap_or_else(|| std::ffi::OsString::from(DEFAULT_CONFIG_PATH));
        Self::from_file(Path::new(&path))
    }

    /// # Errors
    ///
    /// Errors if the file can't be read, parsed or is invalid.
    pub fn from_file(path: &Path) -> Result<Config, BoxError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Could not read config {}: {e}", path.display()))?;
        Self::from_json(&text)
    }

    /// # Errors
    ///
    /// Errors if the text isn't a valid config.
    pub fn from_json(text: &str) -> Result<Config, BoxError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.required_channels.is_empty() {
            return Err("At least one required channel must be configured".into());
        }
        for (i, channel) in self.required_channels.iter().enumerate() {
            if self.required_channels[..i].contains(channel) {
                return Err(format!("Channel {channel} is listed twice").into());
            }
        }
        if self.rating_limit == 0 {
            return Err("Rating limit must be at least 1".into());
        }
        Ok(())
    }

    /// Returns `true` if this channel is one of the required ones.
    pub fn is_required(&self, channel: &Channel) -> bool {
        self.required_channels.contains(channel)
    }

    /// Point delta for a referrer when their friend goes through `transition`.
    pub fn points_delta(&self, transition: crate::types::Transition) -> i64 {
        match transition {
            crate::types::Transition::Joined => self.points.join,
            crate::types::Transition::Left => self.points.leave,
        }
    }
}

/// Replace every `{name}` in `template` with its value from `values`.
/// Unknown placeholders are left as they are.
///
/// Values are inserted as-is and never scanned again, so a user name
/// containing `{channel}` stays that way.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let placeholder = &rest[open + 1..];

        let value = placeholder.find('}').and_then(|close| {
            let name = &placeholder[..close];
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, value)| (*value, close + 1))
        });

        match value {
            Some((value, skip)) => {
                output.push_str(value);
                rest = &placeholder[skip..];
            }
            None => {
                output.push('{');
                rest = placeholder;
            }
        }
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
pub(crate) fn test_config(channels: &[&str]) -> Config {
    let channels = channels
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Config::from_json(&format!(r#"{{ "required_channels": [{channels}] }}"#))
        .expect("Test config is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transition;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_json(r#"{ "required_channels": ["@req1"] }"#).unwrap();
        assert_eq!(config.database, "sqlite:referral_bot.sqlite");
        assert_eq!(config.points.join, 50);
        assert_eq!(config.points.leave, -50);
        assert!(!config.points.clamp_at_zero);
        assert!(config.notify_referrer_on_leave);
        assert_eq!(config.rating_limit, 10);
        assert_eq!(config.points_delta(Transition::Joined), 50);
        assert_eq!(config.points_delta(Transition::Left), -50);
        assert!(config.is_required(&Channel::new("@REQ1").unwrap()));
        assert!(!config.is_required(&Channel::new("@req2").unwrap()));
    }

    #[test]
    fn full_config() {
        let config = Config::from_json(
            r#"{
                "database": "sqlite:other.sqlite",
                "required_channels": ["@theopenart", "-1001"],
                "points": { "join": 100, "leave": -100, "clamp_at_zero": true },
                "notify_referrer_on_leave": false,
                "rating_limit": 3,
                "messages": { "start": "hi" },
                "buttons": { "rating": "Top" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.required_channels.len(), 2);
        assert_eq!(config.points.join, 100);
        assert!(config.points.clamp_at_zero);
        assert!(!config.notify_referrer_on_leave);
        assert_eq!(config.messages.start, "hi");
        assert_eq!(
            config.messages.already_registered,
            Messages::default().already_registered
        );
        assert_eq!(config.buttons.rating, "Top");
        assert_eq!(config.buttons.points, Buttons::default().points);
    }

    #[test]
    fn invalid_configs() {
        assert!(Config::from_json(r#"{ "required_channels": [] }"#).is_err());
        assert!(Config::from_json(r#"{ "required_channels": ["@a", "@A"] }"#).is_err());
        assert!(Config::from_json(r#"{ "required_channels": ["@a"], "rating_limit": 0 }"#).is_err());
        assert!(Config::from_json(r#"{ "rating_limit": 5 }"#).is_err());
    }

    #[test]
    fn filling_templates() {
        assert_eq!(
            fill(
                "{friend} left {channel}, {points} points gone, {unknown}",
                &[("friend", "@bob"), ("channel", "@req1"), ("points", "50")]
            ),
            "@bob left @req1, 50 points gone, {unknown}"
        );
        assert_eq!(fill("{{points}} {", &[("points", "5")]), "{5} {");
    }

    #[test]
    fn filled_values_are_not_filled_again() {
        assert_eq!(
            fill(
                "{friend} left {channel}",
                &[("friend", "Bob {channel}"), ("channel", "@req1")]
            ),
            "Bob {channel} left @req1"
        );
        assert_eq!(
            fill("{a}{b}", &[("a", "{b}"), ("b", "{a}")]),
            "{b}{a}"
        );
    }
}
