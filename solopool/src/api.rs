//! HTTP status API.
//!
//! Read-only operational visibility: one pool-level snapshot endpoint and
//! a health check. Disabled unless `api.listen` is configured.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use bitcoin::Network;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::jobs::JobStore;
use crate::stats::PoolCounters;
use crate::stratum::SessionRegistry;
use crate::tracing::prelude::*;

/// Pool-level snapshot returned by `/api/v0/pool`.
#[derive(Debug, Clone, Serialize)]
pub struct PoolState {
    pub uptime_secs: u64,
    pub network: String,
    /// Height of the block currently being worked on.
    pub height: Option<u64>,
    pub sessions: usize,
    pub authorized_sessions: usize,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub blocks_found: u64,
    pub best_share_difficulty: f64,
    pub workers: Vec<WorkerState>,
}

/// Per-session detail inside [`PoolState`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub session_id: u64,
    pub peer: String,
    pub worker: Option<String>,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub best_share_difficulty: f64,
}

/// Shared handles the endpoints read from.
#[derive(Clone)]
pub struct ApiState {
    pub network: Network,
    pub counters: Arc<PoolCounters>,
    pub registry: Arc<SessionRegistry>,
    pub jobs: Arc<JobStore>,
}

impl ApiState {
    fn pool_state(&self) -> PoolState {
        let workers = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| s.authorized)
            .map(|s| WorkerState {
                session_id: s.id,
                peer: s.peer.to_string(),
                worker: s.worker,
                accepted_shares: s.accepted,
                rejected_shares: s.rejected,
                best_share_difficulty: s.best_difficulty,
            })
            .collect();

        PoolState {
            uptime_secs: self.counters.uptime_secs(),
            network: self.network.to_string(),
            height: self.jobs.current().map(|job| job.template.height),
            sessions: self.registry.len(),
            authorized_sessions: self.registry.authorized_count(),
            accepted_shares: self.counters.accepted(),
            rejected_shares: self.counters.rejected(),
            blocks_found: self.counters.blocks(),
            best_share_difficulty: self.counters.best_difficulty(),
            workers,
        }
    }
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v0/pool", get(get_pool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn get_pool(State(state): State<ApiState>) -> Json<PoolState> {
    Json(state.pool_state())
}

/// Serve the API until shutdown.
pub async fn serve(listen: String, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(addr = %listen, "Status API ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    trace!("Status API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_state_reflects_counters() {
        let state = ApiState {
            network: Network::Regtest,
            counters: Arc::new(PoolCounters::new()),
            registry: Arc::new(SessionRegistry::new()),
            jobs: Arc::new(JobStore::new()),
        };

        state.counters.record_accepted(42.0);
        state.counters.record_rejected();
        state
            .jobs
            .insert(Arc::new(crate::jobs::tests::test_job(1)));

        let pool = state.pool_state();
        assert_eq!(pool.network, "regtest");
        assert_eq!(pool.accepted_shares, 1);
        assert_eq!(pool.rejected_shares, 1);
        assert_eq!(pool.best_share_difficulty, 42.0);
        assert_eq!(pool.height, Some(840_000));
        assert!(pool.workers.is_empty());
    }
}
