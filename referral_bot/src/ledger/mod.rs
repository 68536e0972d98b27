//! Referral ledger: registration, subscription flags and referrer points.

mod error;
pub use error::*;

use std::sync::Arc;

use teloxide::types::UserId;

use crate::{
    config::Config,
    database::{Database, FlagChange, RatingRow, RegisterResult},
    notify::{Notice, Notifier},
    oracle::{memberships, SubscriptionOracle},
    types::{Channel, SubscriptionEvent, Transition, TransitionOrigin},
};

/// Shown in place of a name that couldn't be looked up.
pub const UNKNOWN_NAME: &str = "a friend";

/// What [`Ledger::apply_transition`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Not a required channel. Nothing was done.
    NotRequired,
    /// The user never registered. Nothing was done.
    UnknownUser,
    /// The flag already had this value. Nothing was done.
    Unchanged,
    /// The flag flipped. The referrer, if any, had their points adjusted.
    Applied {
        referrer: Option<UserId>,
        /// This transition made the user subscribed to every required channel.
        milestone: bool,
    },
}

/// What [`Ledger::sync_with_oracle`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Required channels the user is not in, in config order.
    pub missing: Vec<Channel>,
    /// Some transition during the sync reached the milestone, so the user
    /// has already been told.
    pub milestone: bool,
}

impl SyncReport {
    pub fn subscribed_to_all(&self) -> bool {
        self.missing.is_empty()
    }
}

/// What [`Ledger::start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The user was registered before. Nothing was changed.
    AlreadyRegistered {
        /// Persisted flags say the user is in every required channel.
        subscribed_to_all: bool,
    },
    /// The user is now registered. `sync` is `None` if their channels
    /// couldn't be checked, in which case none were credited yet.
    Registered { sync: Option<SyncReport> },
}

pub struct Ledger {
    db: Database,
    config: Arc<Config>,
}

/// Deliver a notice, logging instead of failing.
async fn send<N: Notifier + Sync>(notifier: &N, to: UserId, notice: Notice) {
    log::debug!("Notifying {to}: {notice:?}");
    if let Err(e) = notifier.notify(to, notice).await {
        log::warn!("Failed to notify user {to}: {e}");
    }
}

impl Ledger {
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        Ledger { db, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a new user. Self-invites are discarded.
    ///
    /// This doesn't look at channel memberships; follow it up with
    /// [`Self::sync_with_oracle`] to credit channels the user is already in.
    pub async fn register(
        &self,
        user: UserId,
        username: &str,
        referrer: Option<UserId>,
    ) -> Result<RegisterResult, LedgerError> {
        let result = self
            .db
            .register(user, username, referrer, &self.config.required_channels)
            .await?;

        match result {
            RegisterResult::Created { invited_by } => {
                log::info!("Registered user {user} ({username}), invited by {invited_by:?}.");
            }
            RegisterResult::AlreadyRegistered => {
                log::debug!("User {user} ({username}) is already registered.");
            }
        }

        Ok(result)
    }

    /// Handle a user asking to take part: register them, greet them, and
    /// credit the channels they're already in.
    ///
    /// Once the user is created, nothing stops the sync from running:
    /// a failed greeting is only logged, and a failed sync is reported as
    /// `sync: None` so the user can retry it.
    ///
    /// # Errors
    ///
    /// Only if the registration itself fails.
    pub async fn start<O, N>(
        &self,
        oracle: &O,
        notifier: &N,
        user: UserId,
        username: &str,
        referrer: Option<UserId>,
    ) -> Result<StartOutcome, LedgerError>
    where
        O: SubscriptionOracle + Sync,
        N: Notifier + Sync,
    {
        let invited_by = match self.register(user, username, referrer).await? {
            RegisterResult::Created { invited_by } => invited_by,
            RegisterResult::AlreadyRegistered => {
                let subscribed_to_all = self
                    .db
                    .is_subscribed_to_all(user, &self.config.required_channels)
                    .await
                    .unwrap_or_else(|e| {
                        log::warn!("Failed to read subscriptions of user {user}: {e}");
                        false
                    });
                return Ok(StartOutcome::AlreadyRegistered { subscribed_to_all });
            }
        };

        let inviter = match invited_by {
            Some(inviter) => Some(self.display_name(inviter).await),
            None => None,
        };
        send(notifier, user, Notice::Welcome { inviter }).await;

        let sync = match self
            .sync_with_oracle(oracle, notifier, user, TransitionOrigin::Registration)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!("Could not check subscriptions of new user {user}: {e}");
                None
            }
        };

        Ok(StartOutcome::Registered { sync })
    }

    /// Apply a user joining or leaving a channel, in this order:
    ///
    /// 1. Store the user's flag for the channel. If it didn't change, stop here.
    /// 2. Add `points_delta` to the referrer's points, and tell them if their
    ///    friend left.
    /// 3. On a join that leaves the user in every required channel, tell the user
    ///    and the referrer. This happens once per time the user gets there.
    /// 4. On a leave, tell the user they're out, unless this is part of registration.
    ///
    /// Any step failing aborts the rest; what was already stored stays stored.
    /// Failing to deliver a notice is only logged.
    pub async fn apply_transition<N: Notifier + Sync>(
        &self,
        notifier: &N,
        event: &SubscriptionEvent,
        points_delta: i64,
        origin: TransitionOrigin,
    ) -> Result<TransitionOutcome, LedgerError> {
        let SubscriptionEvent {
            user,
            channel,
            transition,
        } = event;
        let (user, transition) = (*user, *transition);

        if !self.config.is_required(channel) {
            log::debug!("Ignoring user {user} who {transition} {channel}, not a required channel.");
            return Ok(TransitionOutcome::NotRequired);
        }

        match self
            .db
            .set_subscription(user, channel, transition.subscribed())
            .await?
        {
            FlagChange::Changed => {
                log::debug!("User {user} {transition} {channel}.");
            }
            FlagChange::Unchanged => {
                log::debug!("User {user} {transition} {channel} again, nothing to do.");
                return Ok(TransitionOutcome::Unchanged);
            }
            FlagChange::UnknownUser => {
                log::debug!("Unregistered user {user} {transition} {channel}.");
                return Ok(TransitionOutcome::UnknownUser);
            }
        }

        if transition == Transition::Left {
            self.db.clear_fully_subscribed(user).await?;
        }

        let referrer = self.db.get_invited_by(user).await?;

        if let Some(referrer) = referrer {
            let balance = self
                .db
                .add_points(referrer, points_delta, self.config.points.clamp_at_zero)
                .await?;
            log::debug!("Referrer {referrer} got {points_delta} points, balance is now {balance:?}.");

            if transition == Transition::Left && self.config.notify_referrer_on_leave {
                let notice = Notice::FriendLeft {
                    friend: self.display_name(user).await,
                    channel: channel.clone(),
                    points: points_delta.abs(),
                };
                send(notifier, referrer, notice).await;
            }
        }

        let mut milestone = false;
        if transition == Transition::Joined
            && self
                .db
                .is_subscribed_to_all(user, &self.config.required_channels)
                .await?
            && self.db.mark_fully_subscribed(user).await?
        {
            milestone = true;
            log::info!("User {user} is now subscribed to every required channel.");

            send(notifier, user, Notice::FullySubscribed).await;

            if let Some(referrer) = referrer {
                let notice = Notice::FriendCompleted {
                    friend: self.display_name(user).await,
                };
                send(notifier, referrer, notice).await;
            }
        }

        if transition == Transition::Left && origin != TransitionOrigin::Registration {
            let notice = Notice::Unsubscribed {
                channel: channel.clone(),
            };
            send(notifier, user, notice).await;
        }

        Ok(TransitionOutcome::Applied {
            referrer,
            milestone,
        })
    }

    /// Ask the oracle about every required channel and apply a transition
    /// wherever the stored flag disagrees with it. Right after registration
    /// only joins are applied.
    ///
    /// # Errors
    ///
    /// If the oracle fails for any channel, nothing is applied.
    pub async fn sync_with_oracle<O, N>(
        &self,
        oracle: &O,
        notifier: &N,
        user: UserId,
        origin: TransitionOrigin,
    ) -> Result<SyncReport, LedgerError>
    where
        O: SubscriptionOracle + Sync,
        N: Notifier + Sync,
    {
        let required = &self.config.required_channels;
        let statuses = memberships(oracle, user, required)
            .await
            .map_err(LedgerError::OracleUnavailable)?;

        let mut report = SyncReport {
            missing: Vec::new(),
            milestone: false,
        };
        for (channel, subscribed) in required.iter().zip(statuses) {
            if !subscribed {
                report.missing.push(channel.clone());
                if origin == TransitionOrigin::Registration {
                    continue;
                }
            }

            let transition = match subscribed {
                true => Transition::Joined,
                false => Transition::Left,
            };
            let event = SubscriptionEvent {
                user,
                channel: channel.clone(),
                transition,
            };
            let outcome = self
                .apply_transition(notifier, &event, self.config.points_delta(transition), origin)
                .await?;
            if let TransitionOutcome::Applied {
                milestone: true, ..
            } = outcome
            {
                report.milestone = true;
            }
        }

        Ok(report)
    }

    /// Name to show for a user, for presentation only. Never fails,
    /// falls back to [`UNKNOWN_NAME`].
    pub async fn display_name(&self, user: UserId) -> String {
        match self.db.get_username(user).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_NAME.to_string(),
            Err(e) => {
                log::warn!("Failed to look up the name of user {user}: {e}");
                UNKNOWN_NAME.to_string()
            }
        }
    }

    /// Points of this user, `None` if they aren't registered.
    pub async fn get_points(&self, user: UserId) -> Result<Option<i64>, LedgerError> {
        Ok(self.db.get_points(user).await?)
    }

    /// Top `limit` users by points.
    pub async fn get_rating(&self, limit: u32) -> Result<Vec<RatingRow>, LedgerError> {
        Ok(self.db.get_rating(limit).await?)
    }
}
