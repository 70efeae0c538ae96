//! Block assembly and submission.
//!
//! When a share meets the network target the validator hands the solved
//! header here. The full block is the header, a transaction count, the
//! reconstructed coinbase, and the template transactions verbatim in
//! template order. The miner's share is accepted regardless of what the
//! node says; node-side rejection reasons are recorded for operators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::consensus::encode::{self, VarInt};

use super::{NodeClient, Template};
use crate::tracing::prelude::*;

/// Transport-level retry schedule for `submitblock`.
const SUBMIT_RETRIES: u32 = 3;

/// Destination for solved blocks.
///
/// Abstracted so share validation can be exercised without a node.
#[async_trait]
pub trait BlockSink: Send + Sync {
    /// Submit a block built from a consensus-order header, the
    /// submission-form coinbase bytes, and the template's transactions.
    async fn submit(&self, header: [u8; 80], coinbase: Vec<u8>, template: Arc<Template>);
}

/// Serialize a complete block as hex for `submitblock`.
pub fn assemble_block_hex(header: &[u8; 80], coinbase: &[u8], template: &Template) -> String {
    let tx_bytes: usize = template.transactions.iter().map(|tx| tx.data.len()).sum();
    let mut block = Vec::with_capacity(80 + 9 + coinbase.len() + tx_bytes);

    block.extend_from_slice(header);
    block.extend_from_slice(&encode::serialize(&VarInt(
        1 + template.transactions.len() as u64,
    )));
    block.extend_from_slice(coinbase);
    for tx in &template.transactions {
        block.extend_from_slice(&tx.data);
    }

    hex::encode(block)
}

/// Submits solved blocks to the node over JSON-RPC.
pub struct BlockSubmitter {
    client: Arc<NodeClient>,
}

impl BlockSubmitter {
    pub fn new(client: Arc<NodeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockSink for BlockSubmitter {
    async fn submit(&self, header: [u8; 80], coinbase: Vec<u8>, template: Arc<Template>) {
        let block_hex = assemble_block_hex(&header, &coinbase, &template);
        let header_hex = hex::encode(header);

        for attempt in 1..=SUBMIT_RETRIES {
            match self.client.submit_block(block_hex.clone()).await {
                Ok(None) => {
                    info!(height = template.height, "Block accepted by node");
                    return;
                }
                Ok(Some(reason)) => {
                    // The node answered; racing the network is the usual
                    // cause. The miner's share already counted.
                    warn!(
                        height = template.height,
                        header = %header_hex,
                        reason = %reason,
                        "Node rejected block"
                    );
                    return;
                }
                Err(e) if attempt < SUBMIT_RETRIES => {
                    warn!(
                        height = template.height,
                        attempt,
                        error = %e,
                        "submitblock failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                }
                Err(e) => {
                    error!(
                        height = template.height,
                        header = %header_hex,
                        error = %e,
                        "submitblock failed, giving up"
                    );
                    return;
                }
            }
        }
    }
}
