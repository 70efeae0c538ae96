//! Coinbase construction for Stratum jobs.
//!
//! The coinbase is split into two halves around an 8-byte extranonce
//! placeholder; miners assemble `coinb1 | extranonce1 | extranonce2 |
//! coinb2` and hash it to obtain the coinbase txid. The halves use the
//! legacy transaction serialization so that plain double-SHA-256 of the
//! assembled bytes *is* the txid.
//!
//! Because this is a solo pool, the payout output belongs to whichever
//! miner submits: the template is parameterized by the payout script, and
//! `coinb2` is rendered per session rather than baked in at job build time.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{self, VarInt};
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::{Error, Result};
use crate::{COINBASE_TAG, EXTRANONCE1_SIZE, EXTRANONCE2_SIZE};

/// Consensus limit on the coinbase scriptSig.
const MAX_SCRIPT_SIG: usize = 100;

/// Combined size of the extranonce placeholder inside the scriptSig.
const EXTRANONCE_LEN: usize = EXTRANONCE1_SIZE + EXTRANONCE2_SIZE;

/// Fixed byte length of the coinb1 transaction header:
/// version(4) + in_count(1) + null prevout(36) + scriptSig length(1).
const COINB1_HEADER_LEN: usize = 42;

/// A coinbase transaction parameterized by extranonces and payout script.
#[derive(Debug, Clone)]
pub struct CoinbaseTemplate {
    height: u64,
    value_sats: u64,
    /// coinb1: everything before the extranonce placeholder.
    prefix: Vec<u8>,
    /// Pool signature bytes placed after the placeholder.
    tag: Vec<u8>,
    /// Witness commitment scriptPubKey from the template, if any.
    witness_commitment: Option<ScriptBuf>,
}

impl CoinbaseTemplate {
    /// Build a template for one block height.
    ///
    /// `aux` is the node-supplied coinbaseaux payload placed after the
    /// BIP34 height push. The pool tag is truncated if the scriptSig would
    /// otherwise exceed the 100-byte consensus limit.
    pub fn new(
        height: u64,
        value_sats: u64,
        aux: &[u8],
        witness_commitment: Option<Vec<u8>>,
    ) -> Result<Self> {
        let height_push = Builder::new()
            .push_int(height as i64)
            .into_script()
            .into_bytes();

        let fixed = height_push.len() + aux.len() + EXTRANONCE_LEN;
        if fixed > MAX_SCRIPT_SIG {
            return Err(Error::Protocol(format!(
                "coinbase scriptSig would be {fixed} bytes at height {height}"
            )));
        }
        let mut tag = COINBASE_TAG.to_vec();
        tag.truncate(MAX_SCRIPT_SIG - fixed);

        let script_sig_len = fixed + tag.len();
        let mut prefix = Vec::with_capacity(COINB1_HEADER_LEN + height_push.len() + aux.len());
        prefix.extend_from_slice(&2i32.to_le_bytes());
        prefix.push(0x01);
        prefix.extend_from_slice(&[0u8; 32]);
        prefix.extend_from_slice(&[0xff; 4]);
        prefix.push(script_sig_len as u8);
        prefix.extend_from_slice(&height_push);
        prefix.extend_from_slice(aux);

        Ok(Self {
            height,
            value_sats,
            prefix,
            tag,
            witness_commitment: witness_commitment.map(ScriptBuf::from_bytes),
        })
    }

    /// Block height the coinbase commits to.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Reward plus fees paid by this coinbase, in satoshis.
    pub fn value_sats(&self) -> u64 {
        self.value_sats
    }

    /// First coinbase half, up to the extranonce placeholder.
    pub fn coinb1(&self) -> &[u8] {
        &self.prefix
    }

    /// Second coinbase half for the given payout script, from just after
    /// the extranonce placeholder through the end of the transaction.
    pub fn coinb2(&self, payout_script: &Script) -> Vec<u8> {
        let outputs = self.outputs(payout_script);

        let mut buf = self.tag.clone();
        buf.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        buf.extend_from_slice(&encode::serialize(&VarInt(outputs.len() as u64)));
        for output in &outputs {
            buf.extend_from_slice(&encode::serialize(output));
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    /// Assemble the full legacy-serialized coinbase the way a miner does.
    pub fn assemble(
        &self,
        payout_script: &Script,
        extranonce1: &[u8; EXTRANONCE1_SIZE],
        extranonce2: &[u8; EXTRANONCE2_SIZE],
    ) -> Vec<u8> {
        let coinb2 = self.coinb2(payout_script);
        let mut buf = Vec::with_capacity(self.prefix.len() + EXTRANONCE_LEN + coinb2.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(extranonce1);
        buf.extend_from_slice(extranonce2);
        buf.extend_from_slice(&coinb2);
        buf
    }

    /// Build the submission-form coinbase transaction.
    ///
    /// When the template commits to witness data the coinbase must carry
    /// the 32-byte reserved witness item, so the block serialization uses
    /// the segwit format even though the Stratum halves are legacy.
    pub fn to_transaction(
        &self,
        payout_script: &Script,
        extranonce1: &[u8; EXTRANONCE1_SIZE],
        extranonce2: &[u8; EXTRANONCE2_SIZE],
    ) -> Transaction {
        let mut script_sig = self.prefix[COINB1_HEADER_LEN..].to_vec();
        script_sig.extend_from_slice(extranonce1);
        script_sig.extend_from_slice(extranonce2);
        script_sig.extend_from_slice(&self.tag);

        let mut witness = Witness::new();
        if self.witness_commitment.is_some() {
            witness.push([0u8; 32]);
        }

        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(script_sig),
                sequence: Sequence::MAX,
                witness,
            }],
            output: self.outputs(payout_script),
        }
    }

    fn outputs(&self, payout_script: &Script) -> Vec<TxOut> {
        let mut outputs = vec![TxOut {
            value: Amount::from_sat(self.value_sats),
            script_pubkey: payout_script.to_owned(),
        }];
        if let Some(commitment) = &self.witness_commitment {
            outputs.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: commitment.clone(),
            });
        }
        outputs
    }
}
