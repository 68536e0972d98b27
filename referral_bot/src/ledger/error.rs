use std::fmt::Display;

use crate::{database, types::BoxError};

/// Why an event couldn't be processed. Neither is fatal to the bot:
/// the event that hit it is dropped and the next one is processed as usual.
#[derive(Debug)]
pub enum LedgerError {
    /// The database failed. Worth retrying later.
    StoreUnavailable(database::Error),
    /// Telegram couldn't tell whether the user is in a channel.
    OracleUnavailable(BoxError),
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::StoreUnavailable(e) => write!(f, "Database is unavailable: {e}"),
            LedgerError::OracleUnavailable(e) => {
                write!(f, "Could not check channel membership: {e}")
            }
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::StoreUnavailable(e) => Some(e),
            LedgerError::OracleUnavailable(e) => Some(&**e),
        }
    }
}

impl From<database::Error> for LedgerError {
    fn from(value: database::Error) -> Self {
        LedgerError::StoreUnavailable(value)
    }
}
