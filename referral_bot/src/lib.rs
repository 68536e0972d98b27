//! Source code for a Telegram giveaway bot: users join by subscribing to a set
//! of channels and earn points for every friend they bring in.

/// Various types used throughout.
pub mod types;

/// Giveaway configuration and user-facing texts.
pub mod config;

/// The database.
pub mod database;

/// Channel membership checks.
pub mod oracle;

/// Notices the ledger sends out.
pub mod notify;

/// Registration, subscription flags and points.
pub mod ledger;

/// Rendering of messages and keyboards.
pub mod presentation;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
