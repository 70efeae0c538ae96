//! Job construction and retention.
//!
//! A [`Job`] is the immutable unit of work broadcast to miners: one
//! `mining.notify` payload plus the back-reference to the template it was
//! derived from, which block submission needs. Jobs are numbered
//! monotonically for the process lifetime and retained in a bounded store
//! so late shares against recent work still validate.

mod coinbase;
mod merkle;
mod store;

pub use coinbase::CoinbaseTemplate;
pub use merkle::{branches_for_coinbase, fold};
pub use store::{JOB_BACKLOG, JobStore};

use std::sync::Arc;

use bitcoin::Txid;
use bitcoin::hashes::Hash;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::hashing::{U256, flipped_32};
use crate::node::{NewTemplate, Template};
use crate::stratum::SessionRegistry;
use crate::tracing::prelude::*;

/// An immutable work unit derived from one template.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stratum job id, unique within the process lifetime.
    pub id: String,

    /// Previous block hash in ckpool wire form (word-swapped), as it
    /// appears in `mining.notify` and in the header miners hash.
    pub prevhash_wire: [u8; 32],

    /// Coinbase halves, parameterized by payout script.
    pub coinbase: CoinbaseTemplate,

    /// Merkle branches the coinbase txid folds through, natural order.
    pub merkle_branches: Vec<[u8; 32]>,

    /// Block version miners start from.
    pub version: i32,

    /// Compact network target.
    pub nbits: u32,

    /// Template timestamp miners may roll forward from.
    pub ntime: u32,

    /// Whether miners must abandon work on earlier jobs.
    pub clean: bool,

    /// The template this job was built from.
    pub template: Arc<Template>,
}

impl Job {
    /// Build job number `seq` from a template.
    pub fn build(seq: u64, template: &Arc<Template>, clean: bool) -> Result<Self> {
        let coinbase = CoinbaseTemplate::new(
            template.height,
            template.coinbase_value,
            &template.coinbase_aux,
            template.witness_commitment.clone(),
        )?;

        let txids: Vec<Txid> = template.transactions.iter().map(|tx| tx.txid).collect();

        Ok(Self {
            id: format!("{seq:x}"),
            prevhash_wire: flipped_32(template.prev_blockhash.to_byte_array()),
            coinbase,
            merkle_branches: branches_for_coinbase(&txids),
            version: template.version,
            nbits: template.bits.to_consensus(),
            ntime: template.cur_time,
            clean,
            template: template.clone(),
        })
    }

    /// Full network target this job's block must meet.
    pub fn network_target(&self) -> U256 {
        self.template.network_target
    }
}

/// Convert templates into jobs and fan them out.
///
/// The single producer for the job store: each new template becomes the
/// next job, is inserted into the store (so it is submittable before any
/// miner can address it), and is then broadcast to every authorized
/// session.
pub async fn builder_task(
    mut template_rx: mpsc::Receiver<NewTemplate>,
    store: Arc<JobStore>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    let mut seq: u64 = 1;

    loop {
        tokio::select! {
            update = template_rx.recv() => {
                let Some(update) = update else { break };

                let job = match Job::build(seq, &update.template, update.clean) {
                    Ok(job) => Arc::new(job),
                    Err(e) => {
                        warn!(height = update.template.height, error = %e,
                              "failed to build job from template");
                        continue;
                    }
                };
                seq += 1;

                store.insert(job.clone());
                registry.broadcast_job(&job);
                debug!(
                    job_id = %job.id,
                    height = job.template.height,
                    clean = job.clean,
                    branches = job.merkle_branches.len(),
                    "Broadcast job"
                );
            }
            _ = shutdown.cancelled() => break,
        }
    }

    trace!("Job builder stopped");
}
