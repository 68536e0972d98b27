//! Boilerplate shared by the bots in this workspace: logger and runtime
//! start-up, bot key loading, and a few helper traits over teloxide types.

pub mod useful_methods;

use std::future::Future;

/// Initialize logging and start the `closure` in an async runtime.
/// Logging is enabled by default on level `info` unless overridden
/// by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
///
/// # Panics
///
/// Panics if the tokio runtime can't be built.
pub fn start_everything(closure: impl Future<Output = ()>) {
    let log_level = std::env::var_os("RUST_LOG")
        .unwrap_or_else(|| std::ffi::OsString::from("info"))
        .into_string()
        .unwrap_or_else(|_| String::from("info"));

    // journald adds its own timestamps.
    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("Logger is up, starting the runtime.");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the tokio runtime!")
        .block_on(closure);
}

/// Name of the file the bot token is read from.
/// Debug builds use a separate key so a test bot can run next to the real one.
#[must_use]
pub fn bot_key_path() -> &'static str {
    match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    }
}

/// Read the bot token from [`bot_key_path`], trimming the trailing newline
/// editors like to leave behind.
///
/// # Errors
///
/// Errors if the file can't be read.
pub fn load_bot_key() -> std::io::Result<String> {
    let key = std::fs::read_to_string(bot_key_path())?;
    Ok(key.trim().to_string())
}
