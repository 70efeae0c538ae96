//! The authoritative set of live sessions.
//!
//! Each connection registers a handle carrying its outbound event queue.
//! Broadcast is fan-out from the single job-producing task: events are
//! enqueued non-blocking, and a session whose queue is full is a slow
//! consumer and gets disconnected rather than allowed to stall the
//! broadcast.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::jobs::Job;
use crate::stats::SessionStats;
use crate::tracing::prelude::*;

/// Bound on each session's outbound event queue.
pub const SEND_QUEUE_DEPTH: usize = 256;

/// Events delivered to a session task for rendering and transmission.
///
/// Rendering happens in the session task because `mining.notify` is
/// per-session (the coinbase carries the session's payout script).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new job to announce.
    Job(Arc<Job>),
    /// Difficulty override; delivered before any later job event.
    SetDifficulty(f64),
    /// Ask the miner to reconnect (shutdown drain).
    Reconnect,
}

/// Registry-side view of one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub peer: SocketAddr,
    pub authorized: Arc<AtomicBool>,
    pub events: mpsc::Sender<SessionEvent>,
    pub kill: CancellationToken,
    pub stats: Arc<SessionStats>,
}

/// Point-in-time view of a session for the status API.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: u64,
    pub peer: SocketAddr,
    pub authorized: bool,
    pub worker: Option<String>,
    pub accepted: u64,
    pub rejected: u64,
    pub best_difficulty: f64,
}

/// Process-wide session map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next session id.
    ///
    /// Ids are never reused within a process, which also keeps extranonce1
    /// values (derived from the id) unique across live sessions.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(&self, handle: SessionHandle) {
        self.sessions.write().insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) {
        self.sessions.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn authorized_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|handle| handle.authorized.load(Ordering::Relaxed))
            .count()
    }

    /// Fan a new job out to every authorized session.
    pub fn broadcast_job(&self, job: &Arc<Job>) {
        self.broadcast(SessionEvent::Job(job.clone()), true);
    }

    /// Push a difficulty change to every authorized session.
    pub fn broadcast_difficulty(&self, difficulty: f64) {
        self.broadcast(SessionEvent::SetDifficulty(difficulty), true);
    }

    /// Ask every session to reconnect; used while draining for shutdown.
    pub fn broadcast_reconnect(&self) {
        self.broadcast(SessionEvent::Reconnect, false);
    }

    /// Cancel every session's task.
    pub fn kill_all(&self) {
        for handle in self.sessions.read().values() {
            handle.kill.cancel();
        }
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .values()
            .map(|handle| SessionSnapshot {
                id: handle.id,
                peer: handle.peer,
                authorized: handle.authorized.load(Ordering::Relaxed),
                worker: handle.stats.worker(),
                accepted: handle.stats.accepted(),
                rejected: handle.stats.rejected(),
                best_difficulty: handle.stats.best_difficulty(),
            })
            .collect()
    }

    fn broadcast(&self, event: SessionEvent, authorized_only: bool) {
        for handle in self.sessions.read().values() {
            if authorized_only && !handle.authorized.load(Ordering::Relaxed) {
                continue;
            }
            match handle.events.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session = handle.id,
                        peer = %handle.peer,
                        "slow consumer, disconnecting"
                    );
                    handle.kill.cancel();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Session task already exiting; it removes itself.
                }
            }
        }
    }
}
