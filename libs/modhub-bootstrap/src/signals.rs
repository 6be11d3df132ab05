use anyhow::{Context, Result};
use tokio::signal;

/// Resolves on the first Ctrl+C (or SIGTERM on Unix).
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let mut terminate =
            unix_signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        let source = tokio::select! {
            res = signal::ctrl_c() => {
                res.context("listening for Ctrl+C")?;
                "SIGINT"
            }
            _ = terminate.recv() => "SIGTERM",
        };
        tracing::info!(signal = source, "Stopping modhub");
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("listening for Ctrl+C")?;
        tracing::info!(signal = "ctrl_c", "Stopping modhub");
    }

    Ok(())
}
