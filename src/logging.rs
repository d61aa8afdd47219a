//! Structured logging for harness runs.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, FmtSubscriber};

/// Crates whose events are shown at the requested level.
const TARGET_CRATES: &[&str] = &["rollup_hive"];

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides `level` when set. Later calls are no-ops, so every test may
/// call this without coordinating with the others.
pub fn init(level: LevelFilter) {
    let filter = build_tracing_filter(level);
    let _ = FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(filter)
        .with_ansi(enable_ansi())
        .with_test_writer()
        .try_init();
}

/// Colors only when both stdout and stderr are terminals.
pub fn enable_ansi() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal() && std::io::stderr().is_terminal()
}

pub fn default_directive(level: LevelFilter) -> String {
    TARGET_CRATES
        .iter()
        .map(|c| format!("{c}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_tracing_filter(level: LevelFilter) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(default_directive(level))
}
