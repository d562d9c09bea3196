use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!(target: "system", "Shutdown signal received, stopping...");
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(target: "system", "Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Wall-clock limit on a run. When it fires it cancels the run token and
/// marks itself reached, so callers can tell it apart from a signal.
pub struct RuntimeCap {
    reached: CancellationToken,
    handle: JoinHandle<()>,
}

impl RuntimeCap {
    pub fn spawn(token: CancellationToken, limit: Duration) -> Self {
        let reached = CancellationToken::new();
        let marker = reached.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    tracing::info!(target: "system", "Runtime limit of {:?} reached, stopping...", limit);
                    marker.cancel();
                    token.cancel();
                }
            }
        });

        Self { reached, handle }
    }

    /// Cancelled once the limit has passed.
    pub fn reached(&self) -> CancellationToken {
        self.reached.clone()
    }

    pub fn is_reached(&self) -> bool {
        self.reached.is_cancelled()
    }

    pub fn abort(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_runtime_cap_cancels_token() {
        let token = CancellationToken::new();
        let cap = RuntimeCap::spawn(token.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!token.is_cancelled());
        assert!(!cap.is_reached());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(token.is_cancelled());
        assert!(cap.is_reached());
        cap.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_cap_not_reached_when_token_cancelled() {
        let token = CancellationToken::new();
        let cap = RuntimeCap::spawn(token.clone(), Duration::from_secs(3600));
        token.cancel();

        let reached = cap.reached();
        cap.handle.await.unwrap();
        assert!(!reached.is_cancelled());
    }
}
