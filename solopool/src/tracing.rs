//! Logging setup.
//!
//! [`init`] is called once by the daemon at startup; the rest of the
//! crate imports `crate::tracing::prelude::*` for the level macros.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Install the process-wide subscriber.
///
/// Under systemd (the `JOURNAL_STREAM` socket variable is set) events go
/// to journald, which records its own timestamps and severity metadata.
/// Everywhere else they go to stdout, timestamped to the second in local
/// time when the offset is determinable and UTC when it is not. `RUST_LOG`
/// overrides the default `info` level in both modes.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                return;
            }
            // Not installed yet, so the notice goes to stderr directly.
            Err(e) => eprintln!("solopoold: journald unavailable ({e}), logging to stdout"),
        }
    }

    let clock = time::macros::format_description!("[hour]:[minute]:[second]");
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(OffsetTime::new(offset, clock))
        .init();
}
