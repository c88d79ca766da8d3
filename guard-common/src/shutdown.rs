use owo_colors::OwoColorize;

/// Resolves once SIGINT or SIGTERM arrives (or Ctrl+C on non-Unix), so a
/// long-running batch can wire it into a `CancellationToken` via
/// `tokio::select!` at the call site.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => eprintln!("{}", "received SIGINT, shutting down".red()),
            _ = sigterm.recv() => eprintln!("{}", "received SIGTERM, shutting down".red()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
