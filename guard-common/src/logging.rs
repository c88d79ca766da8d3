//! Process-wide logging setup.
//!
//! Two modes, selected by the CLI's `--json-logs` flag: structured JSON
//! records (for shipping to a log aggregator) or a plain human-readable
//! format for a terminal. Either way this must be called exactly once,
//! before the first `tracing` event is emitted.

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the global `tracing` subscriber. Safe to call more than
/// once per process only in tests, where `try_init` silently no-ops on
/// the second call.
pub fn init(json: bool) {
    let registry = tracing_subscriber::fmt().with_env_filter(env_filter());

    if json {
        let _ = registry.json().with_target(true).try_init();
    } else {
        let _ = registry.with_target(false).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_when_called_twice() {
        init(false);
        init(false);
    }
}
