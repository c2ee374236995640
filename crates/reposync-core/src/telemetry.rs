//! Tracing initialisation for the `reposync` binary.
//!
//! reposync splits its two output channels:
//!
//! * **stdout** carries only the sync report (text or `--format json`), so it
//!   can be piped into `jq` or stored as an artifact untouched.
//! * **stderr** carries every diagnostic: the `sync.*` and `repo.*`
//!   lifecycle events from [`crate::obs`] plus git command traces at `debug`.
//!
//! `--json` switches the stderr stream to newline-delimited JSON for log
//! shippers; it has no effect on the report format.

use std::io;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence (e.g. `RUST_LOG=reposync_core=debug`);
/// otherwise everything at `level` and above is shown. Returns `false` when a
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
    });

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .json()
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(false).with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        init_tracing(false, Level::INFO);
        assert!(!init_tracing(true, Level::DEBUG));
    }
}
