//! Share validation.
//!
//! Every `mining.submit` lands here with the submitting session's payout
//! script and negotiated state. The validator reconstructs the exact
//! coinbase and header the miner hashed, recomputes the hash under the
//! ckpool byte conventions, and classifies the result. Shares meeting the
//! full network target are handed to the block sink before the miner sees
//! the response.

use std::collections::HashSet;
use std::sync::Arc;

use crate::hashing::{
    U256, diff1_target, dsha256, flip_80, flipped_32, wire_header_hash,
};
use crate::jobs::{JobStore, fold};
use crate::node::BlockSink;
use crate::payout::Payout;
use crate::records::{BlockRecord, RecordWriter, ShareRecord};
use crate::stats::{PoolCounters, SessionStats};
use crate::tracing::prelude::*;
use crate::types::now_unix;
use crate::{EXTRANONCE1_SIZE, EXTRANONCE2_SIZE};

/// Consensus allowance for block timestamps in the future, in seconds.
const MAX_FUTURE_TIME: u64 = 7200;

/// Raw `mining.submit` fields, hex as received.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: String,
    pub extranonce2: String,
    pub ntime: String,
    pub nonce: String,
    pub version: Option<String>,
}

/// At-most-once key for a submission within a session.
///
/// The version component is the effective (mask-applied) version so that
/// equivalent submissions written differently still collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    job_id: String,
    extranonce2: [u8; EXTRANONCE2_SIZE],
    ntime: u32,
    nonce: u32,
    version: u32,
}

/// Why a share was refused, with the ckpool-conventional wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    BadTime,
    Malformed,
    InvalidJob,
    Stale,
    Duplicate,
    LowDifficulty,
    Unauthorized,
}

impl Reject {
    pub fn code(self) -> i32 {
        match self {
            Reject::BadTime | Reject::Malformed => 20,
            Reject::InvalidJob | Reject::Stale => 21,
            Reject::Duplicate => 22,
            Reject::LowDifficulty => 23,
            Reject::Unauthorized => 24,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Reject::BadTime => "Ntime out of range",
            Reject::Malformed => "Malformed share",
            Reject::InvalidJob => "Job not found",
            Reject::Stale => "Stale share",
            Reject::Duplicate => "Duplicate share",
            Reject::LowDifficulty => "Low difficulty",
            Reject::Unauthorized => "Unauthorized worker",
        }
    }
}

/// Validation result for one submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShareOutcome {
    /// Met the session share target.
    Accepted { share_difficulty: f64 },
    /// Met the network target; the block was handed to the sink.
    AcceptedBlock { share_difficulty: f64 },
    Rejected(Reject),
}

/// The per-session view the validator needs for one submission.
pub struct MinerContext<'a> {
    pub extranonce1: [u8; EXTRANONCE1_SIZE],
    pub payout: &'a Payout,
    pub difficulty: f64,
    pub share_target: U256,
    pub version_mask: Option<u32>,
    pub seen: &'a mut HashSet<Fingerprint>,
    pub stats: &'a SessionStats,
}

/// Validates shares and routes solved blocks to the sink.
pub struct ShareValidator {
    jobs: Arc<JobStore>,
    sink: Arc<dyn BlockSink>,
    records: Arc<RecordWriter>,
    counters: Arc<PoolCounters>,
}

impl ShareValidator {
    pub fn new(
        jobs: Arc<JobStore>,
        sink: Arc<dyn BlockSink>,
        records: Arc<RecordWriter>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            jobs,
            sink,
            records,
            counters,
        }
    }

    /// Validate one submission against the session it arrived on.
    ///
    /// Every failing step short-circuits; the fingerprint is only recorded
    /// for shares that reach the target comparison and pass it.
    pub async fn validate(
        &self,
        miner: MinerContext<'_>,
        submission: &Submission,
    ) -> ShareOutcome {
        let Some(job) = self.jobs.get(&submission.job_id) else {
            return self.reject(&miner, Reject::InvalidJob);
        };

        let Some(extranonce2) = parse_extranonce2(&submission.extranonce2) else {
            return self.reject(&miner, Reject::Malformed);
        };
        let Some(ntime) = parse_hex_u32(&submission.ntime) else {
            return self.reject(&miner, Reject::Malformed);
        };
        let Some(nonce) = parse_hex_u32(&submission.nonce) else {
            return self.reject(&miner, Reject::Malformed);
        };
        let version = match &submission.version {
            None => None,
            Some(raw) => match parse_hex_u32(raw) {
                Some(v) => Some(v),
                None => return self.reject(&miner, Reject::Malformed),
            },
        };

        if (ntime as u64) < (job.template.min_time as u64)
            || (ntime as u64) > now_unix() + MAX_FUTURE_TIME
        {
            return self.reject(&miner, Reject::BadTime);
        }

        let effective_version =
            match effective_version(job.version, miner.version_mask, version) {
                Ok(v) => v,
                Err(r) => return self.reject(&miner, r),
            };

        let fingerprint = Fingerprint {
            job_id: submission.job_id.clone(),
            extranonce2,
            ntime,
            nonce,
            version: effective_version,
        };
        if miner.seen.contains(&fingerprint) {
            return self.reject(&miner, Reject::Duplicate);
        }

        // Rebuild exactly what the miner hashed: its own payout script in
        // the coinbase, its extranonces, the job's branches.
        let script = miner.payout.script_pubkey();
        let coinbase = job
            .coinbase
            .assemble(script, &miner.extranonce1, &extranonce2);
        let merkle_root = fold(dsha256(&coinbase), &job.merkle_branches);

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&effective_version.to_le_bytes());
        header[4..36].copy_from_slice(&job.prevhash_wire);
        header[36..68].copy_from_slice(&flipped_32(merkle_root));
        header[68..72].copy_from_slice(&ntime.to_le_bytes());
        header[72..76].copy_from_slice(&job.nbits.to_le_bytes());
        header[76..80].copy_from_slice(&nonce.to_le_bytes());

        let (hash_value, digest) = wire_header_hash(&header);

        if hash_value > miner.share_target {
            return self.reject(&miner, Reject::LowDifficulty);
        }

        miner.seen.insert(fingerprint);

        let share_difficulty = difficulty_of_hash(hash_value);
        self.counters.record_accepted(share_difficulty);
        miner.stats.record_accepted(share_difficulty);

        let block_found = hash_value <= job.network_target();
        if block_found {
            let mut display = digest;
            display.reverse();
            let block_hash = hex::encode(display);
            info!(
                height = job.template.height,
                hash = %block_hash,
                worker = miner.payout.worker(),
                "BLOCK FOUND"
            );

            let mut natural = header;
            flip_80(&mut natural);
            let coinbase_tx = job.coinbase.to_transaction(
                script,
                &miner.extranonce1,
                &extranonce2,
            );
            let coinbase_bytes = bitcoin::consensus::encode::serialize(&coinbase_tx);

            self.sink
                .submit(natural, coinbase_bytes, job.template.clone())
                .await;

            self.counters.record_block();
            self.records
                .block(&BlockRecord {
                    ts: now_unix(),
                    height: job.template.height,
                    hash: block_hash,
                    finder_address: miner.payout.address().to_string(),
                    worker: miner.payout.worker().to_string(),
                    reward: job.coinbase.value_sats(),
                })
                .await;
        }

        self.records
            .share(&ShareRecord {
                ts: now_unix(),
                worker: miner.payout.worker().to_string(),
                address: miner.payout.address().to_string(),
                difficulty: miner.difficulty,
                block_found,
            })
            .await;

        if block_found {
            ShareOutcome::AcceptedBlock { share_difficulty }
        } else {
            ShareOutcome::Accepted { share_difficulty }
        }
    }

    fn reject(&self, miner: &MinerContext<'_>, reject: Reject) -> ShareOutcome {
        self.counters.record_rejected();
        miner.stats.record_rejected();
        ShareOutcome::Rejected(reject)
    }
}

/// Apply the negotiated version-rolling mask.
///
/// With a mask `M`, only bits inside `M` may differ from the job version.
/// Without one, a supplied version must match the job exactly.
pub fn effective_version(
    job_version: i32,
    mask: Option<u32>,
    submitted: Option<u32>,
) -> Result<u32, Reject> {
    let base = job_version as u32;
    match (mask, submitted) {
        (_, None) => Ok(base),
        (Some(m), Some(v)) => Ok((base & !m) | (v & m)),
        (None, Some(v)) if v == base => Ok(base),
        (None, Some(_)) => Err(Reject::Malformed),
    }
}

/// The difficulty a hash value actually achieved, relative to diff 1.
pub fn difficulty_of_hash(value: U256) -> f64 {
    if value.is_zero() {
        return f64::MAX;
    }
    u256_to_f64(diff1_target()) / u256_to_f64(value)
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .to_be_bytes::<32>()
        .iter()
        .fold(0.0, |acc, &b| acc * 256.0 + b as f64)
}

fn parse_hex_u32(raw: &str) -> Option<u32> {
    if raw.len() != 8 {
        return None;
    }
    u32::from_str_radix(raw, 16).ok()
}

fn parse_extranonce2(raw: &str) -> Option<[u8; EXTRANONCE2_SIZE]> {
    if raw.len() != EXTRANONCE2_SIZE * 2 {
        return None;
    }
    hex::decode(raw).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0x2000_0000, 0x1fffe000, 0x2080_0000, 0x2080_0000; "bitaxe rolled bits")]
    #[test_case(0x2000_0000, 0x1fffe000, 0xffff_ffff, 0x3fff_e000; "mask confines rolling")]
    #[test_case(0x2000_0000, 0x1fffe000, 0x0000_0000, 0x2000_0000; "zero rolls nothing")]
    fn effective_version_respects_mask(job: i32, mask: u32, submitted: u32, expected: u32) {
        let v = effective_version(job, Some(mask), Some(submitted)).unwrap();
        assert_eq!(v, expected);
        // Bits outside the mask always equal the job version's bits.
        assert_eq!(v & !mask, job as u32 & !mask);
    }

    #[test]
    fn version_without_mask_must_match_job() {
        assert_eq!(
            effective_version(0x2000_0000, None, Some(0x2000_0000)),
            Ok(0x2000_0000)
        );
        assert_eq!(
            effective_version(0x2000_0000, None, Some(0x2080_0000)),
            Err(Reject::Malformed)
        );
        assert_eq!(effective_version(0x2000_0000, None, None), Ok(0x2000_0000));
    }

    #[test]
    fn reject_codes_follow_ckpool_convention() {
        assert_eq!(Reject::InvalidJob.code(), 21);
        assert_eq!(Reject::Stale.code(), 21);
        assert_eq!(Reject::Duplicate.code(), 22);
        assert_eq!(Reject::LowDifficulty.code(), 23);
        assert_eq!(Reject::Unauthorized.code(), 24);
        assert_eq!(Reject::BadTime.code(), 20);
        assert_eq!(Reject::Malformed.code(), 20);
    }

    #[test]
    fn field_parsers_demand_exact_width() {
        assert_eq!(parse_hex_u32("0000abcd"), Some(0xabcd));
        assert_eq!(parse_hex_u32("abcd"), None);
        assert_eq!(parse_hex_u32("0000abcdef"), None);
        assert_eq!(parse_hex_u32("zzzzzzzz"), None);

        assert_eq!(parse_extranonce2("00000001"), Some([0, 0, 0, 1]));
        assert_eq!(parse_extranonce2("0001"), None);
        assert_eq!(parse_extranonce2("000000010f"), None);
    }

    #[test]
    fn hash_difficulty_is_inverse_of_target() {
        let at_diff1 = difficulty_of_hash(diff1_target());
        assert!((at_diff1 - 1.0).abs() < 1e-9);

        let at_diff1k = difficulty_of_hash(diff1_target() / U256::from(1000u64));
        assert!((at_diff1k - 1000.0).abs() < 0.01);

        assert_eq!(difficulty_of_hash(U256::ZERO), f64::MAX);
    }
}
