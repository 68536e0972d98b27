use teloxide::types::UserId;

/// Result of [`Database::register`].
///
/// [`Database::register`]: super::Database::register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterResult {
    /// A new user was created, with the referrer that was recorded for them.
    Created { invited_by: Option<UserId> },
    /// This user already exists. Nothing was changed.
    AlreadyRegistered,
}

/// Result of [`Database::set_subscription`].
///
/// [`Database::set_subscription`]: super::Database::set_subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagChange {
    /// The flag flipped to the requested value.
    Changed,
    /// The flag already had the requested value.
    Unchanged,
    /// There is no such user.
    UnknownUser,
}

/// A single row of the rating table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatingRow {
    pub user: UserId,
    pub username: String,
    pub points: i64,
}

