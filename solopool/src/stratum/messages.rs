//! Stratum v1 wire messages.
//!
//! The protocol is JSON-RPC-ish: one UTF-8 JSON object per line. Requests
//! are parsed into a loose [`Request`]; responses and notifications are
//! rendered straight to strings (the line codec appends the newline).

use bitcoin::Script;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::EXTRANONCE2_SIZE;
use crate::jobs::Job;

/// Maximum accepted line length. Anything longer closes the session.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// JSON-RPC error code for an unknown method.
pub const ERR_UNKNOWN_METHOD: i32 = -3;

/// An incoming client request.
///
/// Stratum ids may be numbers, strings, or null; they are echoed verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Parse one line into a request. Any failure is a framing error.
pub fn parse_request(line: &str) -> serde_json::Result<Request> {
    serde_json::from_str(line)
}

/// Successful response.
pub fn response_ok(id: &Value, result: Value) -> String {
    json!({ "id": id, "result": result, "error": null }).to_string()
}

/// Error response in the conventional `[code, message, traceback]` form.
pub fn response_err(id: &Value, code: i32, message: &str) -> String {
    json!({ "id": id, "result": null, "error": [code, message, null] }).to_string()
}

/// `mining.subscribe` result for a session.
pub fn subscribe_result(session_id: u64, extranonce1: &[u8]) -> Value {
    let sub_id = format!("{session_id:08x}");
    json!([
        [["mining.notify", sub_id]],
        hex::encode(extranonce1),
        EXTRANONCE2_SIZE,
    ])
}

/// `mining.notify` parameters for a job, rendered against one session's
/// payout script.
pub fn notify_params(job: &Job, payout_script: &Script, clean: bool) -> Value {
    json!([
        job.id,
        hex::encode(job.prevhash_wire),
        hex::encode(job.coinbase.coinb1()),
        hex::encode(job.coinbase.coinb2(payout_script)),
        job.merkle_branches
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>(),
        format!("{:08x}", job.version as u32),
        format!("{:08x}", job.nbits),
        format!("{:08x}", job.ntime),
        clean,
    ])
}

/// `mining.notify` notification line.
pub fn notify_line(job: &Job, payout_script: &Script, clean: bool) -> String {
    json!({
        "id": null,
        "method": "mining.notify",
        "params": notify_params(job, payout_script, clean),
    })
    .to_string()
}

/// `mining.set_difficulty` notification line.
pub fn set_difficulty_line(difficulty: f64) -> String {
    json!({ "id": null, "method": "mining.set_difficulty", "params": [difficulty] }).to_string()
}

/// `mining.set_version_mask` notification line.
pub fn set_version_mask_line(mask: u32) -> String {
    json!({
        "id": null,
        "method": "mining.set_version_mask",
        "params": [format!("{mask:08x}")],
    })
    .to_string()
}

/// `client.reconnect` notification line, sent during shutdown.
pub fn client_reconnect_line() -> String {
    json!({ "id": null, "method": "client.reconnect", "params": [] }).to_string()
}
