//! Root cancellation for a host process.

use std::{future::Future, pin::Pin};

use tokio_util::sync::CancellationToken;

/// Source of the stop request.
pub enum ShutdownOptions {
    /// Ctrl+C, plus SIGTERM on Unix.
    Signals,
    /// Caller owns the token; it is returned unchanged.
    Token(CancellationToken),
    /// Stop once this future resolves.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Root token observed by the runtime, module contexts and the HTTP server.
pub fn shutdown_token(opts: ShutdownOptions) -> CancellationToken {
    match opts {
        ShutdownOptions::Token(token) => token,
        ShutdownOptions::Signals => cancel_after(async {
            if let Err(e) = modhub_bootstrap::wait_for_shutdown().await {
                tracing::warn!(error = %e, "signal handlers unavailable, waiting on ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }),
        ShutdownOptions::Future(waiter) => cancel_after(async move {
            waiter.await;
            tracing::info!("shutdown requested by host future");
        }),
    }
}

fn cancel_after<F>(waiter: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        waiter.await;
        trigger.cancel();
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn future_completion_cancels_token() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let token = shutdown_token(ShutdownOptions::Future(Box::pin(async move {
            let _ = rx.await;
        })));
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn external_token_is_used_as_is() {
        let external = CancellationToken::new();
        let token = shutdown_token(ShutdownOptions::Token(external.clone()));
        external.cancel();
        assert!(token.is_cancelled());
    }
}
