//! Miner payout addresses.
//!
//! A Stratum username is `<address>` or `<address>.<worker>`. The address
//! part must parse as a Bitcoin address for the configured network; it
//! becomes the coinbase payout script for every share the session submits.
//! Supported forms are base58 P2PKH and P2SH, bech32 witness v0 (P2WPKH,
//! P2WSH), and bech32m witness v1 (P2TR).

use std::str::FromStr;

use bitcoin::{Address, Network, ScriptBuf};

use crate::error::{Error, Result};

/// A validated payout destination plus the worker identity that owns it.
#[derive(Debug, Clone)]
pub struct Payout {
    address: Address,
    script: ScriptBuf,
    worker: String,
}

impl Payout {
    /// Parse a Stratum `mining.authorize` username.
    ///
    /// The full username (including any worker suffix) is retained as the
    /// worker identity for records and logs.
    pub fn from_username(username: &str, network: Network) -> Result<Self> {
        let addr_part = username.split('.').next().unwrap_or_default();
        if addr_part.is_empty() {
            return Err(Error::Address("empty address".into()));
        }

        let address = Address::from_str(addr_part)
            .map_err(|e| Error::Address(format!("{addr_part:?}: {e}")))?
            .require_network(network)
            .map_err(|e| Error::Address(format!("{addr_part:?}: {e}")))?;

        let script = address.script_pubkey();

        Ok(Self {
            address,
            script,
            worker: username.to_string(),
        })
    }

    /// The payout address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The scriptPubKey the coinbase output pays to.
    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.script
    }

    /// The full worker identity string (`address` or `address.worker`).
    pub fn worker(&self) -> &str {
        &self.worker
    }
}
