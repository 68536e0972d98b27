mod types;
pub use types::*;

use std::{str::FromStr, sync::atomic::AtomicBool};

use chrono::Utc;
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};
use teloxide::types::UserId;

use crate::types::Channel;

type Pool = sqlx::Pool<Sqlite>;
static WAS_CONSTRUCTED: AtomicBool = AtomicBool::new(false);

/// sqlite stores integers as `i64`, Telegram user IDs are `u64` but fit anyway.
#[allow(clippy::cast_possible_wrap)]
fn uid(user: UserId) -> i64 {
    user.0 as i64
}

#[allow(clippy::cast_sign_loss)]
fn uid_from(value: i64) -> UserId {
    UserId(value as u64)
}

/// Persistent user store. Every method is a single atomic operation against the
/// database, so concurrent handlers for the same user can't race each other.
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Open (and create, if needed) the database at this sqlx URL.
    ///
    /// # Panics
    ///
    /// Panics if a database was already constructed in this process.
    pub async fn new(url: &str) -> Result<Database, Error> {
        assert!(
            !WAS_CONSTRUCTED.swap(true, std::sync::atomic::Ordering::SeqCst),
            "Second database was constructed. This is not allowed."
        );

        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect_with(
                SqliteConnectOptions::from_str(url)?
                    .pragma("cache_size", "-32768")
                    .busy_timeout(std::time::Duration::from_secs(600)),
            )
            .await?;

        Self::with_pool(pool).await
    }

    /// A fresh database that lives in memory only.
    #[cfg(test)]
    pub(crate) async fn new_in_memory() -> Result<Database, Error> {
        // Every connection to ":memory:" gets its own database, so keep exactly one around.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool) -> Result<Database, Error> {
        // USERS:
        // user_id (primary key, telegram user ID)
        // username (@handle or full name at registration time, advisory only)
        // invited_by (user ID of the referrer, NULL if none)
        // points (may be negative)
        // fully_subscribed (0 for no, 1 for yes; set once the user is in every required channel)
        // registered_at (date+time in UTC)
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY NOT NULL,
                    username TEXT NOT NULL,
                    invited_by INTEGER NULL REFERENCES users(user_id),
                    points INTEGER NOT NULL DEFAULT 0,
                    fully_subscribed INTEGER NOT NULL DEFAULT 0,
                    registered_at TEXT NOT NULL
                ) STRICT;",
        ))
        .await?;

        // SUBSCRIPTIONS:
        // user_id (user this flag is about)
        // channel (channel identifier as in the config)
        // subscribed (0 for no, 1 for yes)
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS subscriptions (
                    user_id INTEGER NOT NULL REFERENCES users(user_id),
                    channel TEXT NOT NULL COLLATE NOCASE,
                    subscribed INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, channel)
                ) STRICT;",
        ))
        .await?;

        // Will fail harmlessly if the index already exists.
        let _ = sqlx::query("CREATE INDEX users_points ON users(points DESC, user_id);")
            .execute(&pool)
            .await;

        Ok(Database { pool })
    }

    /// Create a user with zero points, all subscription flags for `channels`
    /// cleared, and the given referrer. The referrer is dropped if it's the user
    /// themselves or isn't a registered user.
    ///
    /// Either the whole user is created or nothing is.
    pub async fn register(
        &self,
        user: UserId,
        username: &str,
        referrer: Option<UserId>,
        channels: &[Channel],
    ) -> Result<RegisterResult, Error> {
        let referrer = referrer.filter(|r| *r != user);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO users(user_id, username, invited_by, points, registered_at)
            VALUES (?, ?, (SELECT user_id FROM users WHERE user_id=?), 0, ?)
        ON CONFLICT(user_id) DO NOTHING;",
        )
        .bind(uid(user))
        .bind(username)
        .bind(referrer.map(uid))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(RegisterResult::AlreadyRegistered);
        }

        for channel in channels {
            sqlx::query(
                "INSERT INTO subscriptions(user_id, channel, subscribed)
                VALUES (?, ?, 0)
            ON CONFLICT DO NOTHING;",
            )
            .bind(uid(user))
            .bind(channel.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let invited_by = sqlx::query("SELECT invited_by FROM users WHERE user_id=?;")
            .bind(uid(user))
            .map(|row: SqliteRow| row.get::<Option<i64>, _>(0).map(uid_from))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(RegisterResult::Created { invited_by })
    }

    /// Set the subscription flag of this user for this channel.
    ///
    /// This is a compare-and-set: of several concurrent calls setting the same
    /// value, exactly one sees [`FlagChange::Changed`].
    pub async fn set_subscription(
        &self,
        user: UserId,
        channel: &Channel,
        subscribed: bool,
    ) -> Result<FlagChange, Error> {
        // Channels added to the config after the user registered have no row yet.
        sqlx::query(
            "INSERT INTO subscriptions(user_id, channel, subscribed)
            SELECT user_id, ?, 0 FROM users WHERE user_id=?
        ON CONFLICT DO NOTHING;",
        )
        .bind(channel.as_str())
        .bind(uid(user))
        .execute(&self.pool)
        .await?;

        let changed = sqlx::query(
            "UPDATE subscriptions SET subscribed=?
            WHERE user_id=? AND channel=? AND subscribed<>?;",
        )
        .bind(subscribed)
        .bind(uid(user))
        .bind(channel.as_str())
        .bind(subscribed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if changed > 0 {
            return Ok(FlagChange::Changed);
        }

        if self.user_exists(user).await? {
            Ok(FlagChange::Unchanged)
        } else {
            Ok(FlagChange::UnknownUser)
        }
    }

    pub async fn user_exists(&self, user: UserId) -> Result<bool, Error> {
        sqlx::query("SELECT 1 FROM users WHERE user_id=?;")
            .bind(uid(user))
            .fetch_optional(&self.pool)
            .await
            .map(|x| x.is_some())
    }

    /// Returns `true` if the persisted flags say this user is in every one of `channels`.
    pub async fn is_subscribed_to_all(
        &self,
        user: UserId,
        channels: &[Channel],
    ) -> Result<bool, Error> {
        let subscribed: Vec<String> =
            sqlx::query("SELECT channel FROM subscriptions WHERE user_id=? AND subscribed=1;")
                .bind(uid(user))
                .map(|row: SqliteRow| row.get::<String, _>(0))
                .fetch_all(&self.pool)
                .await?;

        Ok(channels.iter().all(|channel| {
            subscribed
                .iter()
                .any(|s| s.eq_ignore_ascii_case(channel.as_str()))
        }))
    }

    /// Mark the user as being in every required channel.
    /// Returns `true` only for the call that actually set the mark.
    pub async fn mark_fully_subscribed(&self, user: UserId) -> Result<bool, Error> {
        sqlx::query("UPDATE users SET fully_subscribed=1 WHERE user_id=? AND fully_subscribed=0;")
            .bind(uid(user))
            .execute(&self.pool)
            .await
            .map(|x| x.rows_affected() > 0)
    }

    pub async fn clear_fully_subscribed(&self, user: UserId) -> Result<(), Error> {
        sqlx::query("UPDATE users SET fully_subscribed=0 WHERE user_id=?;")
            .bind(uid(user))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add `delta` to the user's points and return the new balance,
    /// or `None` if there's no such user.
    pub async fn add_points(
        &self,
        user: UserId,
        delta: i64,
        clamp_at_zero: bool,
    ) -> Result<Option<i64>, Error> {
        let query = match clamp_at_zero {
            true => "UPDATE users SET points=MAX(points + ?, 0) WHERE user_id=? RETURNING points;",
            false => "UPDATE users SET points=points + ? WHERE user_id=? RETURNING points;",
        };
        sqlx::query(query)
            .bind(delta)
            .bind(uid(user))
            .map(|row: SqliteRow| row.get::<i64, _>(0))
            .fetch_optional(&self.pool)
            .await
    }

    /// Who invited this user. `None` if nobody did or there's no such user.
    pub async fn get_invited_by(&self, user: UserId) -> Result<Option<UserId>, Error> {
        sqlx::query("SELECT invited_by FROM users WHERE user_id=?;")
            .bind(uid(user))
            .map(|row: SqliteRow| row.get::<Option<i64>, _>(0))
            .fetch_optional(&self.pool)
            .await
            .map(|x| x.flatten().map(uid_from))
    }

    pub async fn get_username(&self, user: UserId) -> Result<Option<String>, Error> {
        sqlx::query("SELECT username FROM users WHERE user_id=?;")
            .bind(uid(user))
            .map(|row: SqliteRow| row.get::<String, _>(0))
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_points(&self, user: UserId) -> Result<Option<i64>, Error> {
        sqlx::query("SELECT points FROM users WHERE user_id=?;")
            .bind(uid(user))
            .map(|row: SqliteRow| row.get::<i64, _>(0))
            .fetch_optional(&self.pool)
            .await
    }

    /// Top `limit` users by points, highest first. Ties go to the lower user ID.
    pub async fn get_rating(&self, limit: u32) -> Result<Vec<RatingRow>, Error> {
        sqlx::query(
            "SELECT user_id, username, points FROM users
            ORDER BY points DESC, user_id ASC
            LIMIT ?;",
        )
        .bind(i64::from(limit))
        .map(|row: SqliteRow| RatingRow {
            user: uid_from(row.get(0)),
            username: row.get(1),
            points: row.get(2),
        })
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn channels(names: &[&str]) -> Vec<Channel> {
        names.iter().map(|n| Channel::new(n).unwrap()).collect()
    }

    #[tokio::test]
    async fn registering_twice() {
        let db = Database::new_in_memory().await.unwrap();
        let req = channels(&["@req1"]);

        assert_eq!(
            db.register(UserId(1), "@alice", None, &req).await.unwrap(),
            RegisterResult::Created { invited_by: None }
        );
        db.add_points(UserId(1), 30, false).await.unwrap();
        db.set_subscription(UserId(1), &req[0], true).await.unwrap();

        assert_eq!(
            db.register(UserId(1), "@alice_renamed", Some(UserId(2)), &req)
                .await
                .unwrap(),
            RegisterResult::AlreadyRegistered
        );
        assert_eq!(db.get_points(UserId(1)).await.unwrap(), Some(30));
        assert_eq!(
            db.get_username(UserId(1)).await.unwrap().as_deref(),
            Some("@alice")
        );
        assert_eq!(db.get_invited_by(UserId(1)).await.unwrap(), None);
        assert!(db.is_subscribed_to_all(UserId(1), &req[..1]).await.unwrap());
    }

    #[tokio::test]
    async fn referrers() {
        let db = Database::new_in_memory().await.unwrap();
        let req = channels(&["@req1"]);

        // Inviting yourself doesn't count.
        assert_eq!(
            db.register(UserId(1), "@alice", Some(UserId(1)), &req)
                .await
                .unwrap(),
            RegisterResult::Created { invited_by: None }
        );
        assert_eq!(db.get_invited_by(UserId(1)).await.unwrap(), None);

        // Neither does being invited by someone who never registered.
        assert_eq!(
            db.register(UserId(2), "@bob", Some(UserId(404)), &req)
                .await
                .unwrap(),
            RegisterResult::Created { invited_by: None }
        );

        assert_eq!(
            db.register(UserId(3), "@carol", Some(UserId(1)), &req)
                .await
                .unwrap(),
            RegisterResult::Created {
                invited_by: Some(UserId(1))
            }
        );
        assert_eq!(db.get_invited_by(UserId(3)).await.unwrap(), Some(UserId(1)));
        assert_eq!(db.get_invited_by(UserId(404)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscription_flags_flip_once() {
        let db = Database::new_in_memory().await.unwrap();
        let req = channels(&["@req1", "@req2"]);
        db.register(UserId(1), "@alice", None, &req).await.unwrap();

        assert!(!db.is_subscribed_to_all(UserId(1), &req[..1]).await.unwrap());
        assert_eq!(
            db.set_subscription(UserId(1), &req[0], false).await.unwrap(),
            FlagChange::Unchanged
        );
        assert_eq!(
            db.set_subscription(UserId(1), &req[0], true).await.unwrap(),
            FlagChange::Changed
        );
        assert_eq!(
            db.set_subscription(UserId(1), &req[0], true).await.unwrap(),
            FlagChange::Unchanged
        );
        assert!(!db.is_subscribed_to_all(UserId(1), &req).await.unwrap());

        assert_eq!(
            db.set_subscription(UserId(1), &req[1], true).await.unwrap(),
            FlagChange::Changed
        );
        assert!(db.is_subscribed_to_all(UserId(1), &req).await.unwrap());

        assert_eq!(
            db.set_subscription(UserId(1), &req[0], false).await.unwrap(),
            FlagChange::Changed
        );
        assert!(!db.is_subscribed_to_all(UserId(1), &req).await.unwrap());

        assert_eq!(
            db.set_subscription(UserId(2), &req[0], true).await.unwrap(),
            FlagChange::UnknownUser
        );
    }

    #[tokio::test]
    async fn channels_added_later() {
        let db = Database::new_in_memory().await.unwrap();
        let old = channels(&["@req1"]);
        let new = channels(&["@req1", "@req2"]);
        db.register(UserId(1), "@alice", None, &old).await.unwrap();
        db.set_subscription(UserId(1), &old[0], true).await.unwrap();

        assert!(!db.is_subscribed_to_all(UserId(1), &new).await.unwrap());
        assert_eq!(
            db.set_subscription(UserId(1), &new[1], false).await.unwrap(),
            FlagChange::Unchanged
        );
        assert_eq!(
            db.set_subscription(UserId(1), &new[1], true).await.unwrap(),
            FlagChange::Changed
        );
        assert!(db.is_subscribed_to_all(UserId(1), &new).await.unwrap());
    }

    #[tokio::test]
    async fn fully_subscribed_mark() {
        let db = Database::new_in_memory().await.unwrap();
        db.register(UserId(1), "@alice", None, &[]).await.unwrap();

        assert!(db.mark_fully_subscribed(UserId(1)).await.unwrap());
        assert!(!db.mark_fully_subscribed(UserId(1)).await.unwrap());
        db.clear_fully_subscribed(UserId(1)).await.unwrap();
        assert!(db.mark_fully_subscribed(UserId(1)).await.unwrap());
        assert!(!db.mark_fully_subscribed(UserId(2)).await.unwrap());
    }

    #[tokio::test]
    async fn points() {
        let db = Database::new_in_memory().await.unwrap();
        db.register(UserId(1), "@alice", None, &[]).await.unwrap();

        assert_eq!(db.add_points(UserId(1), 50, false).await.unwrap(), Some(50));
        assert_eq!(
            db.add_points(UserId(1), -80, false).await.unwrap(),
            Some(-30)
        );
        assert_eq!(db.add_points(UserId(1), 40, true).await.unwrap(), Some(10));
        assert_eq!(db.add_points(UserId(1), -50, true).await.unwrap(), Some(0));
        assert_eq!(db.get_points(UserId(1)).await.unwrap(), Some(0));

        assert_eq!(db.add_points(UserId(2), 50, false).await.unwrap(), None);
        assert_eq!(db.get_points(UserId(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rating_is_limited_and_sorted() {
        let db = Database::new_in_memory().await.unwrap();
        for (id, name, points) in [
            (1, "@a", 10),
            (2, "@b", 50),
            (3, "@c", 30),
            (4, "@d", 50),
            (5, "@e", 0),
        ] {
            db.register(UserId(id), name, None, &[]).await.unwrap();
            db.add_points(UserId(id), points, false).await.unwrap();
        }

        let rating = db.get_rating(3).await.unwrap();
        assert_eq!(rating.len(), 3);
        let names: Vec<&str> = rating.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, ["@b", "@d", "@c"]);
        assert_eq!(rating[0].points, 50);
        assert_eq!(rating[2].points, 30);

        assert_eq!(db.get_rating(3).await.unwrap(), rating);
        assert_eq!(db.get_rating(100).await.unwrap().len(), 5);
    }
}
