//! Per-connection Stratum session.
//!
//! Each TCP connection gets one task owning all of its protocol state; the
//! only cross-task inputs are [`SessionEvent`]s from the registry. The
//! state machine itself ([`Session`]) is free of I/O so tests can drive it
//! line by line.
//!
//! Framing is one UTF-8 JSON object per newline-terminated line, capped at
//! 64 KiB. Framing violations (oversize lines, non-JSON) close the
//! connection without a response; semantic errors get a JSON-RPC error and
//! keep the session, unless they repeat often enough to look hostile.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bitcoin::Network;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::messages::{
    self, ERR_UNKNOWN_METHOD, MAX_LINE_LENGTH, Request,
};
use super::registry::{SEND_QUEUE_DEPTH, SessionEvent, SessionHandle, SessionRegistry};
use crate::EXTRANONCE1_SIZE;
use crate::config::StratumConfig;
use crate::hashing::U256;
use crate::jobs::JobStore;
use crate::payout::Payout;
use crate::share::{Fingerprint, MinerContext, Reject, ShareOutcome, ShareValidator, Submission};
use crate::stats::{PoolCounters, SessionStats};
use crate::tracing::prelude::*;
use crate::types::Difficulty;

/// Protocol-semantic errors tolerated per window before disconnecting.
const ERROR_LIMIT: usize = 5;
const ERROR_WINDOW: Duration = Duration::from_secs(60);

/// Shared dependencies handed to every session.
pub struct SessionContext {
    pub network: Network,
    pub stratum: StratumConfig,
    pub registry: Arc<SessionRegistry>,
    pub validator: Arc<ShareValidator>,
    pub jobs: Arc<JobStore>,
    pub counters: Arc<PoolCounters>,
}

/// Lifecycle of a session, in order. `Configured` is tracked separately
/// since `mining.configure` may arrive at any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Connected,
    Subscribed,
    Authorized,
    Active,
}

/// Why a session is being closed by the protocol layer.
#[derive(Debug)]
pub enum SessionClose {
    /// Unparseable line; no response owed.
    Framing(String),
    /// Too many semantic errors inside the window.
    ErrorFlood,
}

/// The Stratum v1 state machine for one connection.
pub struct Session {
    ctx: Arc<SessionContext>,
    id: u64,
    extranonce1: [u8; EXTRANONCE1_SIZE],
    phase: Phase,
    version_mask: Option<u32>,
    payout: Option<Payout>,
    difficulty: Difficulty,
    share_target: U256,
    seen: HashSet<Fingerprint>,
    errors: VecDeque<Instant>,
    draining: bool,
    stats: Arc<SessionStats>,
    authorized_flag: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        ctx: Arc<SessionContext>,
        id: u64,
        stats: Arc<SessionStats>,
        authorized_flag: Arc<AtomicBool>,
    ) -> Self {
        let difficulty = Difficulty::new(ctx.stratum.difficulty);
        Self {
            id,
            // Derived from the process-unique session id, so concurrently
            // live sessions can never collide.
            extranonce1: (id as u32).to_be_bytes(),
            phase: Phase::Connected,
            version_mask: None,
            payout: None,
            difficulty,
            share_target: difficulty.target(),
            seen: HashSet::new(),
            errors: VecDeque::new(),
            draining: false,
            stats,
            authorized_flag,
            ctx,
        }
    }

    pub fn extranonce1(&self) -> [u8; EXTRANONCE1_SIZE] {
        self.extranonce1
    }

    /// Process one line, returning the lines to send back in order.
    pub async fn handle_line(&mut self, line: &str) -> Result<Vec<String>, SessionClose> {
        let request = messages::parse_request(line)
            .map_err(|e| SessionClose::Framing(e.to_string()))?;

        match request.method.as_str() {
            "mining.subscribe" => Ok(self.on_subscribe(&request)),
            "mining.configure" => Ok(self.on_configure(&request)),
            "mining.authorize" => self.on_authorize(&request),
            "mining.suggest_difficulty" => self.on_suggest_difficulty(&request),
            "mining.extranonce.subscribe" => {
                Ok(vec![messages::response_ok(&request.id, json!(true))])
            }
            "mining.submit" => self.on_submit(&request).await,
            other => {
                trace!(session = self.id, method = other, "unknown method");
                self.semantic_error()?;
                Ok(vec![messages::response_err(
                    &request.id,
                    ERR_UNKNOWN_METHOD,
                    "Method not found",
                )])
            }
        }
    }

    /// Process one registry event, returning the lines to send.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::Job(job) => match &self.payout {
                Some(payout) if self.phase >= Phase::Authorized => {
                    vec![messages::notify_line(
                        &job,
                        payout.script_pubkey(),
                        job.clean,
                    )]
                }
                _ => Vec::new(),
            },
            SessionEvent::SetDifficulty(difficulty) => {
                self.set_difficulty(Difficulty::new(difficulty));
                vec![messages::set_difficulty_line(self.difficulty.value())]
            }
            SessionEvent::Reconnect => {
                self.draining = true;
                vec![messages::client_reconnect_line()]
            }
        }
    }

    fn on_subscribe(&mut self, request: &Request) -> Vec<String> {
        if self.phase == Phase::Connected {
            self.phase = Phase::Subscribed;
        }
        // Re-subscription repeats the same answer; extranonce1 is fixed
        // for the life of the connection.
        vec![messages::response_ok(
            &request.id,
            messages::subscribe_result(self.id, &self.extranonce1),
        )]
    }

    fn on_configure(&mut self, request: &Request) -> Vec<String> {
        let features = request.params.get(0).and_then(Value::as_array);
        let options = request.params.get(1);

        let mut result = serde_json::Map::new();
        for feature in features.into_iter().flatten() {
            let Some(name) = feature.as_str() else { continue };
            match name {
                "version-rolling" => {
                    let client_mask = options
                        .and_then(|o| o.get("version-rolling.mask"))
                        .and_then(Value::as_str)
                        .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                        .unwrap_or(u32::MAX);
                    let negotiated = client_mask & self.ctx.stratum.version_rolling_mask;
                    self.version_mask = Some(negotiated);

                    result.insert("version-rolling".into(), json!(true));
                    result.insert(
                        "version-rolling.mask".into(),
                        json!(format!("{negotiated:08x}")),
                    );
                }
                other => {
                    result.insert(other.into(), json!(false));
                }
            }
        }

        let mut lines = vec![messages::response_ok(&request.id, Value::Object(result))];
        // A miner reconfiguring mid-session gets the new mask pushed too.
        if self.phase >= Phase::Authorized {
            if let Some(mask) = self.version_mask {
                lines.push(messages::set_version_mask_line(mask));
            }
        }
        lines
    }

    fn on_authorize(&mut self, request: &Request) -> Result<Vec<String>, SessionClose> {
        if self.phase < Phase::Subscribed {
            self.semantic_error()?;
            return Ok(vec![messages::response_err(
                &request.id,
                Reject::Unauthorized.code(),
                "Not subscribed",
            )]);
        }

        let Some(username) = param_str(&request.params, 0) else {
            self.semantic_error()?;
            return Ok(vec![messages::response_err(&request.id, -1, "Bad params")]);
        };

        match Payout::from_username(username, self.ctx.network) {
            Ok(payout) => {
                info!(
                    session = self.id,
                    worker = payout.worker(),
                    address = %payout.address(),
                    "Authorized"
                );
                self.stats.set_worker(payout.worker().to_string());
                self.payout = Some(payout);
                if self.phase < Phase::Authorized {
                    self.phase = Phase::Authorized;
                }
                self.authorized_flag.store(true, Ordering::Relaxed);

                let mut lines = vec![messages::response_ok(&request.id, json!(true))];
                lines.push(messages::set_difficulty_line(self.difficulty.value()));
                if let Some(mask) = self.version_mask {
                    lines.push(messages::set_version_mask_line(mask));
                }
                if let (Some(job), Some(payout)) = (self.ctx.jobs.current(), &self.payout) {
                    // Force a clean start so the miner begins on this job
                    // immediately.
                    lines.push(messages::notify_line(&job, payout.script_pubkey(), true));
                }
                Ok(lines)
            }
            Err(e) => {
                debug!(session = self.id, username, error = %e, "authorization refused");
                Ok(vec![messages::response_ok(&request.id, json!(false))])
            }
        }
    }

    fn on_suggest_difficulty(&mut self, request: &Request) -> Result<Vec<String>, SessionClose> {
        let Some(suggested) = param_f64(&request.params, 0) else {
            self.semantic_error()?;
            return Ok(vec![messages::response_err(&request.id, -1, "Bad params")]);
        };

        if !self.ctx.stratum.accept_suggested_difficulty {
            debug!(session = self.id, suggested, "ignoring suggested difficulty");
            return Ok(Vec::new());
        }

        self.set_difficulty(Difficulty::new(suggested));
        debug!(session = self.id, difficulty = %self.difficulty, "difficulty suggested by miner");
        // No response per convention, but the miner needs the resulting
        // difficulty pinned before its next share.
        Ok(vec![messages::set_difficulty_line(self.difficulty.value())])
    }

    async fn on_submit(&mut self, request: &Request) -> Result<Vec<String>, SessionClose> {
        if self.phase < Phase::Authorized {
            self.count_reject();
            self.semantic_error()?;
            return Ok(vec![reject_response(&request.id, Reject::Unauthorized)]);
        }
        self.phase = Phase::Active;

        if self.draining {
            self.count_reject();
            return Ok(vec![reject_response(&request.id, Reject::Stale)]);
        }

        let Some(submission) = parse_submission(&request.params) else {
            self.count_reject();
            self.semantic_error()?;
            return Ok(vec![reject_response(&request.id, Reject::Malformed)]);
        };

        let Some(payout) = self.payout.as_ref() else {
            self.count_reject();
            return Ok(vec![reject_response(&request.id, Reject::Unauthorized)]);
        };

        let miner = MinerContext {
            extranonce1: self.extranonce1,
            payout,
            difficulty: self.difficulty.value(),
            share_target: self.share_target,
            version_mask: self.version_mask,
            seen: &mut self.seen,
            stats: &self.stats,
        };

        let outcome = self.ctx.validator.validate(miner, &submission).await;
        match outcome {
            ShareOutcome::Accepted { share_difficulty } => {
                trace!(
                    session = self.id,
                    job = %submission.job_id,
                    share_difficulty,
                    "share accepted"
                );
                Ok(vec![messages::response_ok(&request.id, json!(true))])
            }
            ShareOutcome::AcceptedBlock { .. } => {
                Ok(vec![messages::response_ok(&request.id, json!(true))])
            }
            ShareOutcome::Rejected(reject) => {
                debug!(
                    session = self.id,
                    job = %submission.job_id,
                    reason = reject.message(),
                    "share rejected"
                );
                Ok(vec![reject_response(&request.id, reject)])
            }
        }
    }

    fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
        self.share_target = difficulty.target();
    }

    /// Count a reject decided before the validator runs.
    fn count_reject(&self) {
        self.ctx.counters.record_rejected();
        self.stats.record_rejected();
    }

    /// Track a protocol-semantic error; too many too fast closes the
    /// session.
    fn semantic_error(&mut self) -> Result<(), SessionClose> {
        let now = Instant::now();
        while let Some(first) = self.errors.front() {
            if now.duration_since(*first) > ERROR_WINDOW {
                self.errors.pop_front();
            } else {
                break;
            }
        }
        self.errors.push_back(now);
        if self.errors.len() >= ERROR_LIMIT {
            return Err(SessionClose::ErrorFlood);
        }
        Ok(())
    }
}

fn reject_response(id: &Value, reject: Reject) -> String {
    messages::response_err(id, reject.code(), reject.message())
}

fn param_str(params: &Value, index: usize) -> Option<&str> {
    params.get(index).and_then(Value::as_str)
}

fn param_f64(params: &Value, index: usize) -> Option<f64> {
    let value = params.get(index)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_submission(params: &Value) -> Option<Submission> {
    Some(Submission {
        job_id: param_str(params, 1)?.to_string(),
        extranonce2: param_str(params, 2)?.to_string(),
        ntime: param_str(params, 3)?.to_string(),
        nonce: param_str(params, 4)?.to_string(),
        version: param_str(params, 5).map(str::to_string),
    })
}

/// Run one connection to completion.
pub async fn session_task(ctx: Arc<SessionContext>, stream: TcpStream, peer: SocketAddr) {
    let id = ctx.registry.next_session_id();
    let (events_tx, mut events_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let kill = CancellationToken::new();
    let stats = Arc::new(SessionStats::new());
    let authorized = Arc::new(AtomicBool::new(false));

    ctx.registry.add(SessionHandle {
        id,
        peer,
        authorized: authorized.clone(),
        events: events_tx,
        kill: kill.clone(),
        stats: stats.clone(),
    });

    let mut session = Session::new(ctx.clone(), id, stats, authorized);
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    debug!(session = id, peer = %peer, "connected");

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    None => break,
                    Some(Err(e)) => {
                        debug!(session = id, error = %e, "framing error, closing");
                        break;
                    }
                    Some(Ok(line)) => {
                        match session.handle_line(&line).await {
                            Ok(responses) => {
                                if send_all(&mut framed, responses).await.is_err() {
                                    break;
                                }
                            }
                            Err(reason) => {
                                debug!(session = id, ?reason, "closing session");
                                break;
                            }
                        }
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                let lines = session.handle_event(event);
                if send_all(&mut framed, lines).await.is_err() {
                    break;
                }
            }
            _ = kill.cancelled() => break,
        }
    }

    ctx.registry.remove(id);
    debug!(session = id, peer = %peer, "disconnected");
}

async fn send_all(
    framed: &mut Framed<TcpStream, LinesCodec>,
    lines: Vec<String>,
) -> Result<(), tokio_util::codec::LinesCodecError> {
    for line in lines {
        framed.send(line).await?;
    }
    Ok(())
}
