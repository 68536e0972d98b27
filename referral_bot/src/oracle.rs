use std::future::Future;

use teloxide::{prelude::Requester, types::UserId, Bot};

use crate::types::{BoxError, Channel};

/// Something that can tell whether a user is currently in a channel.
pub trait SubscriptionOracle {
    fn is_subscribed(
        &self,
        user: UserId,
        channel: &Channel,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send;
}

/// Asks Telegram. The bot has to be an admin of the channel for this to work.
#[derive(Clone)]
pub struct TelegramOracle {
    bot: Bot,
}

impl TelegramOracle {
    pub fn new(bot: Bot) -> Self {
        TelegramOracle { bot }
    }
}

impl SubscriptionOracle for TelegramOracle {
    async fn is_subscribed(&self, user: UserId, channel: &Channel) -> Result<bool, BoxError> {
        let member = self.bot.get_chat_member(channel.recipient(), user).await?;
        Ok(member.is_present())
    }
}

/// Check every channel at once. Results are in the same order as `channels`.
///
/// # Errors
///
/// If any single check fails, the whole batch fails: we can't tell what the
/// user's status is if we don't know about one of the channels.
pub async fn memberships<O: SubscriptionOracle + Sync>(
    oracle: &O,
    user: UserId,
    channels: &[Channel],
) -> Result<Vec<bool>, BoxError> {
    futures::future::join_all(
        channels
            .iter()
            .map(|channel| oracle.is_subscribed(user, channel)),
    )
    .await
    .into_iter()
    .collect()
}

/// Returns `true` if the user is in every one of `channels`.
///
/// # Errors
///
/// Fails closed, see [`memberships`]. An error wins over a `false`.
pub async fn is_subscribed_to_all<O: SubscriptionOracle + Sync>(
    oracle: &O,
    user: UserId,
    channels: &[Channel],
) -> Result<bool, BoxError> {
    Ok(memberships(oracle, user, channels)
        .await?
        .into_iter()
        .all(|subscribed| subscribed))
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;

    /// Answers from a table. Channels missing from it are an error.
    #[derive(Default)]
    pub(crate) struct FakeOracle {
        answers: Mutex<HashMap<(UserId, Channel), bool>>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeOracle {
        pub(crate) fn set(&self, user: UserId, channel: &str, subscribed: bool) {
            self.answers
                .lock()
                .unwrap()
                .insert((user, Channel::new(channel).unwrap()), subscribed);
        }
    }

    impl SubscriptionOracle for FakeOracle {
        async fn is_subscribed(&self, user: UserId, channel: &Channel) -> Result<bool, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .lock()
                .unwrap()
                .get(&(user, channel.clone()))
                .copied();
            answer.ok_or_else(|| format!("chat {channel} is inaccessible").into())
        }
    }

    fn channels(names: &[&str]) -> Vec<Channel> {
        names.iter().map(|n| Channel::new(n).unwrap()).collect()
    }

    #[tokio::test]
    async fn all_subscribed() {
        let oracle = FakeOracle::default();
        oracle.set(UserId(1), "@a", true);
        oracle.set(UserId(1), "@b", true);

        let req = channels(&["@a", "@b"]);
        assert!(is_subscribed_to_all(&oracle, UserId(1), &req).await.unwrap());
        assert_eq!(
            memberships(&oracle, UserId(1), &req).await.unwrap(),
            [true, true]
        );
    }

    #[tokio::test]
    async fn one_missing_is_false() {
        let oracle = FakeOracle::default();
        oracle.set(UserId(1), "@a", true);
        oracle.set(UserId(1), "@b", false);
        oracle.set(UserId(1), "@c", true);

        let req = channels(&["@a", "@b", "@c"]);
        assert!(!is_subscribed_to_all(&oracle, UserId(1), &req).await.unwrap());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_fail_closed() {
        let oracle = FakeOracle::default();
        oracle.set(UserId(1), "@a", false);
        // "@b" errors.
        oracle.set(UserId(1), "@c", true);

        let req = channels(&["@a", "@b", "@c"]);
        assert!(is_subscribed_to_all(&oracle, UserId(1), &req).await.is_err());
        assert!(memberships(&oracle, UserId(1), &req).await.is_err());

        let req = channels(&["@b", "@c"]);
        assert!(is_subscribed_to_all(&oracle, UserId(1), &req).await.is_err());
    }

    #[tokio::test]
    async fn nothing_required() {
        let oracle = FakeOracle::default();
        assert!(is_subscribed_to_all(&oracle, UserId(1), &[]).await.unwrap());
    }
}
