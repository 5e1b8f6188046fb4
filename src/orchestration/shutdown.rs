//! Graceful shutdown handler.

use tokio::sync::watch;
use tracing::{info, warn};

/// Both halves of a two-stage shutdown.
///
/// `stop` asks the crawl loop to finish at its next iteration. `abort`
/// additionally cancels a fetch that is still in flight. Either way the
/// loop flushes its state before returning.
pub struct ShutdownSignals {
    pub stop_tx: watch::Sender<bool>,
    pub stop_rx: watch::Receiver<bool>,
    pub abort_rx: watch::Receiver<bool>,
}

/// First Ctrl+C stops the loop, the second cancels the in-flight request,
/// the third exits immediately without flushing.
pub fn setup_shutdown_handler() -> ShutdownSignals {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (abort_tx, abort_rx) = watch::channel(false);
    let signal_tx = stop_tx.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("received Ctrl+C, finishing the current page and flushing state");
        eprintln!("\nPress Ctrl+C again to cancel the current request");
        let _ = signal_tx.send(true);

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("second Ctrl+C, cancelling the in-flight request");
        eprintln!("\nCancelling the current request; press Ctrl+C again to quit without saving");
        let _ = abort_tx.send(true);

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("force quit requested, exiting without flush");
            std::process::exit(130);
        }
    });

    ShutdownSignals {
        stop_tx,
        stop_rx,
        abort_rx,
    }
}

/// Resolves once shutdown is requested. If every sender is gone nobody can
/// request it any more, so this never resolves.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_shutdown_sees_signal() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = tx.send(true);
        });
        tokio::time::timeout(Duration::from_secs(5), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown_pends_without_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx)).await;
        assert!(waited.is_err());
    }
}
