use std::future::Future;

use teloxide::types::UserId;

use crate::types::{BoxError, Channel};

/// Something the ledger wants a user to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Greeting for a user that just registered, with whoever invited them.
    Welcome { inviter: Option<String> },
    /// The user is now in every required channel.
    FullySubscribed,
    /// A user this one invited is now in every required channel.
    FriendCompleted { friend: String },
    /// A user this one invited left a required channel and `points` were taken back.
    FriendLeft {
        friend: String,
        channel: Channel,
        points: i64,
    },
    /// The user left a required channel and no longer takes part.
    Unsubscribed { channel: Channel },
}

/// Delivers notices. Delivery is best effort: a failure here never undoes
/// whatever happened in the database before it.
pub trait Notifier {
    fn notify(
        &self,
        to: UserId,
        notice: Notice,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}
