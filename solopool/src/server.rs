//! Stratum TCP server.
//!
//! Owns the accept loop and the lifecycle of session tasks. Shutdown is
//! staged: stop accepting, ask every miner to reconnect elsewhere, give
//! write buffers a bounded drain window, then cut the remaining sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::stratum::{SessionContext, session_task};
use crate::tracing::prelude::*;

/// How long draining sessions may flush before being cut.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// Accepts miner connections and spawns session tasks.
pub struct Server {
    ctx: Arc<SessionContext>,
    listener: TcpListener,
}

impl Server {
    /// The listener is bound by the caller so a port conflict surfaces as
    /// a startup error rather than a background task death.
    pub fn new(ctx: Arc<SessionContext>, listener: TcpListener) -> Self {
        Self { ctx, listener }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "Stratum listener ready");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if self.ctx.registry.len() >= self.ctx.stratum.max_connections {
                                warn!(%peer, "connection limit reached, refusing");
                                continue;
                            }
                            // Share responses are small and latency-bound.
                            let _ = stream.set_nodelay(true);
                            tracker.spawn(session_task(self.ctx.clone(), stream, peer));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        let live = self.ctx.registry.len();
        if live > 0 {
            info!(sessions = live, "draining sessions");
            self.ctx.registry.broadcast_reconnect();
            tokio::time::sleep(DRAIN_DEADLINE).await;
        }
        self.ctx.registry.kill_all();

        tracker.close();
        tracker.wait().await;
        trace!("Stratum server stopped");
    }
}
