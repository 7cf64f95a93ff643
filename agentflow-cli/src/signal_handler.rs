use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on Ctrl-C or SIGTERM
///
/// The listener runs in the background; a second Ctrl-C after cancellation is
/// left to the default handler.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = terminate.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C signal, cancelling the run...");
            },
            _ = terminate => {
                info!("Received terminate signal, cancelling the run...");
            },
            _ = token.cancelled() => return,
        }
        token.cancel();
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_setup_does_not_cancel() {
        let token = CancellationToken::new();
        cancel_on_shutdown_signal(token.clone()).unwrap();

        let result = timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(result.is_err(), "token should stay live without a signal");
        token.cancel();
    }

    #[tokio::test]
    async fn test_listener_stops_when_run_ends() {
        let token = CancellationToken::new();
        let start = std::time::Instant::now();
        cancel_on_shutdown_signal(token.clone()).unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        token.cancel();
        assert!(token.is_cancelled());
    }
}
