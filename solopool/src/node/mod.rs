//! Bitcoin full-node integration.
//!
//! The node is reached two ways: JSON-RPC for `getblocktemplate` and
//! `submitblock`, and a ZMQ subscription that signals new chain tips. The
//! `TemplateSource` task combines both into a stream of immutable
//! [`Template`] snapshots consumed by the job builder.

mod rpc;
mod source;
mod submit;
mod zmq;

pub use rpc::{GetBlockTemplate, NodeClient};
pub use source::{NewTemplate, TemplateSource};
pub use submit::{BlockSink, BlockSubmitter, assemble_block_hex};
pub use zmq::hashblock_task;

use std::str::FromStr;

use bitcoin::{BlockHash, CompactTarget, Txid};

use crate::error::{Error, Result};
use crate::hashing::{U256, target_from_bits};

/// One template transaction: raw bytes for block assembly, txid for the
/// merkle branches.
#[derive(Debug, Clone)]
pub struct TemplateTx {
    pub data: Vec<u8>,
    pub txid: Txid,
}

/// Immutable snapshot of the node's view of the next block.
///
/// Created by the `TemplateSource`, shared by reference with every job
/// derived from it, and discarded when superseded.
#[derive(Debug, Clone)]
pub struct Template {
    pub height: u64,
    pub prev_blockhash: BlockHash,
    pub coinbase_value: u64,
    pub witness_commitment: Option<Vec<u8>>,
    pub coinbase_aux: Vec<u8>,
    pub bits: CompactTarget,
    pub network_target: U256,
    pub min_time: u32,
    pub cur_time: u32,
    pub version: i32,
    pub transactions: Vec<TemplateTx>,
}

impl TryFrom<GetBlockTemplate> for Template {
    type Error = Error;

    fn try_from(gbt: GetBlockTemplate) -> Result<Self> {
        let prev_blockhash = BlockHash::from_str(&gbt.previous_block_hash)
            .map_err(|e| Error::Rpc(format!("bad previousblockhash: {e}")))?;

        let bits_raw = u32::from_str_radix(&gbt.bits, 16)
            .map_err(|e| Error::Rpc(format!("bad bits {:?}: {e}", gbt.bits)))?;

        let witness_commitment = gbt
            .default_witness_commitment
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| Error::Rpc(format!("bad witness commitment: {e}")))?;

        let mut coinbase_aux = Vec::new();
        for value in gbt.coinbase_aux.values() {
            coinbase_aux.extend_from_slice(
                &hex::decode(value).map_err(|e| Error::Rpc(format!("bad coinbaseaux: {e}")))?,
            );
        }

        let mut transactions = Vec::with_capacity(gbt.transactions.len());
        for tx in &gbt.transactions {
            transactions.push(TemplateTx {
                data: hex::decode(&tx.data)
                    .map_err(|e| Error::Rpc(format!("bad transaction data: {e}")))?,
                txid: Txid::from_str(&tx.txid)
                    .map_err(|e| Error::Rpc(format!("bad txid {:?}: {e}", tx.txid)))?,
            });
        }

        Ok(Template {
            height: gbt.height,
            prev_blockhash,
            coinbase_value: gbt.coinbase_value,
            witness_commitment,
            coinbase_aux,
            bits: CompactTarget::from_consensus(bits_raw),
            network_target: target_from_bits(bits_raw),
            min_time: gbt.min_time,
            cur_time: gbt.current_time,
            version: gbt.version,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_gbt() -> GetBlockTemplate {
        serde_json::from_value(serde_json::json!({
            "version": 0x2000_0000,
            "previousblockhash":
                "00000000000000000002bf1c2f9c05dbd2f6f0a9c442b5bbbcd0c3e6e3c3b6e1",
            "transactions": [
                {
                    "data": "0100",
                    "txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                }
            ],
            "coinbaseaux": { "flags": "deadbeef" },
            "coinbasevalue": 312_500_000u64,
            "mintime": 1_700_000_000u32,
            "curtime": 1_700_000_600u32,
            "bits": "1d00ffff",
            "height": 840_000u64,
            "default_witness_commitment":
                "6a24aa21a9ed0000000000000000000000000000000000000000000000000000000000000000"
        }))
        .unwrap()
    }

    #[test]
    fn template_from_gbt() {
        let template = Template::try_from(sample_gbt()).unwrap();

        assert_eq!(template.height, 840_000);
        assert_eq!(template.coinbase_value, 312_500_000);
        assert_eq!(template.bits.to_consensus(), 0x1d00ffff);
        assert_eq!(template.network_target, target_from_bits(0x1d00ffff));
        assert_eq!(template.coinbase_aux, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(template.transactions.len(), 1);
        assert_eq!(template.transactions[0].data, vec![0x01, 0x00]);
        assert_eq!(template.witness_commitment.as_ref().unwrap().len(), 38);
    }

    #[test]
    fn bad_fields_are_rejected() {
        let mut gbt = sample_gbt();
        gbt.bits = "nothex".into();
        assert!(Template::try_from(gbt).is_err());

        let mut gbt = sample_gbt();
        gbt.previous_block_hash = "short".into();
        assert!(Template::try_from(gbt).is_err());
    }
}
