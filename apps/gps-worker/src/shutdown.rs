use crate::node::IngestNode;
use futures::future;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
}

/// Resolves on the first SIGTERM or Ctrl-C.
pub async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => tracing::info!(signal = "SIGINT", "termination signal received"),
                    _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "termination signal received"),
                }
            }
            Err(err) => {
                tracing::warn!(error=%err, "failed to install SIGTERM handler; waiting for Ctrl-C only");
                ctrl_c().await;
                tracing::info!(signal = "SIGINT", "termination signal received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        tracing::info!(signal = "SIGINT", "termination signal received");
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error=%err, "failed to listen for Ctrl-C");
        future::pending::<()>().await;
    }
}

/// Turns a termination signal into the drain sequence: flip to DRAINING,
/// wait out the drain window, flush the pending buffer, close the
/// subscriber channel, then cancel the HTTP acceptance loop.
pub struct ShutdownCoordinator {
    node: IngestNode,
    drain_window: Duration,
    accept: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(node: IngestNode, drain_window: Duration, accept: CancellationToken) -> Self {
        Self {
            node,
            drain_window,
            accept,
        }
    }

    pub async fn run<F>(self, signal: F) -> FlushReport
    where
        F: Future<Output = ()>,
    {
        signal.await;

        let Some(guard) = self.node.begin_draining() else {
            tracing::warn!("node already draining; ignoring repeated termination");
            return FlushReport { flushed: 0 };
        };
        tracing::info!(
            drain_window_ms = self.drain_window.as_millis() as u64,
            pending = self.node.pending_len(),
            "entered draining mode"
        );

        if !self.drain_window.is_zero() {
            tokio::time::sleep(self.drain_window).await;
        }

        let flushed = guard.flush();
        tracing::info!(flushed, "flushed pending GPS reports");

        self.node.close_subscribers();
        self.accept.cancel();
        FlushReport { flushed }
    }
}
