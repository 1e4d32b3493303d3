use staleward_core::ShutdownSignal;
use tracing::{info, warn};

/// Triggers `signal` on Ctrl-C or SIGTERM. The run stops at the next chunk
/// boundary.
pub fn install(signal: ShutdownSignal) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                info!("shutdown signal received, finishing current chunk");
                signal.trigger();
            }
            _ = signal.triggered() => {}
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            wait_for_ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
