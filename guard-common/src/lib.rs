//! Ambient stack shared by every `guard-*` crate: logging setup, graceful
//! shutdown, backoff math, token-bucket rate limiting, and config-file
//! loading. Nothing here knows about clusters, checks, or Istio.

pub mod config;
pub mod logging;
pub mod rate_limit;
pub mod shutdown;
pub mod wait;

pub fn init(json_logs: bool) {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
    logging::init(json_logs);
}
