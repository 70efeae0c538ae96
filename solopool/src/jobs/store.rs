//! Bounded buffer of recently broadcast jobs.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Job;

/// Number of jobs kept for late submissions.
///
/// Shares addressed to a job that has fallen out of this window are
/// rejected as unknown, which is how stale work ages out.
pub const JOB_BACKLOG: usize = 5;

/// The authoritative set of jobs miners may still submit against.
///
/// Only the job builder inserts; validators resolve a job id to an
/// `Arc<Job>` and drop the lock before doing any hashing.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<VecDeque<Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly built job, evicting the oldest beyond the backlog.
    pub fn insert(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.write();
        jobs.push_back(job);
        while jobs.len() > JOB_BACKLOG {
            jobs.pop_front();
        }
    }

    /// Look up a job by its Stratum id.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().iter().find(|job| job.id == id).cloned()
    }

    /// The most recently built job, if any.
    pub fn current(&self) -> Option<Arc<Job>> {
        self.jobs.read().back().cloned()
    }

    /// Number of jobs currently retained.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
