//! Solo Bitcoin mining pool coordinator.
//!
//! Solopool accepts Stratum v1 connections from mining devices, derives work
//! from a Bitcoin full node over JSON-RPC and ZMQ, validates submitted
//! shares, and submits any share meeting the network target back to the node
//! as a block. The block reward is paid directly to the finding miner's own
//! address via the coinbase, so there is no reward accounting.
//!
//! The crate is organized around a single job-production pipeline feeding a
//! set of independent per-connection session tasks:
//!
//! ```text
//! node (RPC + ZMQ) -> TemplateSource -> JobBuilder -> JobStore
//!                                            |
//!                                       SessionRegistry --(notify)--> sessions
//!                                            ^
//! sessions --(mining.submit)--> ShareValidator --(block)--> node submitblock
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod hashing;
pub mod jobs;
pub mod node;
pub mod payout;
pub mod records;
pub mod server;
pub mod share;
pub mod stats;
pub mod stratum;
pub mod tracing;
pub mod types;

pub use error::{Error, Result};

/// Bytes of per-session coinbase entropy assigned at subscribe time.
pub const EXTRANONCE1_SIZE: usize = 4;

/// Bytes of per-submission coinbase entropy rolled by the miner.
pub const EXTRANONCE2_SIZE: usize = 4;

/// User agent reported in the coinbase signature tag.
pub const COINBASE_TAG: &[u8] = b"/solopool/";
