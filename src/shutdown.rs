use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and Ctrl-C.
///
/// The returned token is cancelled on the first signal. Feed handles and exam
/// runners derive child tokens from it, so one signal closes every
/// subscription and stops every exam runner.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));
    token
}

async fn cancel_on_signal(token: CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Ctrl-C listener failed");
            }
            tracing::info!("Received interrupt, shutting down");
        }
        // Cancelled by the owner; nothing left to do.
        _ = token.cancelled() => return,
    }

    token.cancel();
}
