//! Configuration management for solopool.
//!
//! Configuration is a single TOML file passed to `solopoold` on the command
//! line. Sections map onto the major subsystems: `[rpc]` and `[zmq]` for the
//! node connection, `[stratum]` for the miner-facing listener, plus optional
//! `[records]` and `[api]` sections.

use std::path::Path;

use bitcoin::Network;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Default version-rolling mask offered to miners (BIP 320 bits 13-28).
pub const DEFAULT_VERSION_MASK: u32 = 0x1fffe000;

/// Main configuration structure for the pool.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bitcoin network the pool mines on.
    #[serde(default = "default_network", deserialize_with = "de_network")]
    pub network: Network,

    /// Node JSON-RPC connection.
    pub rpc: RpcConfig,

    /// Node ZMQ notification endpoint.
    pub zmq: ZmqConfig,

    /// Miner-facing Stratum listener.
    pub stratum: StratumConfig,

    /// Share and block record persistence.
    #[serde(default)]
    pub records: RecordsConfig,

    /// HTTP status API.
    #[serde(default)]
    pub api: ApiConfig,
}

/// Node JSON-RPC client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Node RPC URL, e.g. `http://127.0.0.1:8332`.
    pub url: String,

    /// RPC basic-auth user.
    pub user: String,

    /// RPC basic-auth password.
    pub password: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub timeout_s: u64,
}

/// Node ZMQ subscription configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ZmqConfig {
    /// `hashblock` publisher endpoint, e.g. `tcp://127.0.0.1:28332`.
    pub endpoint: String,
}

/// Stratum listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StratumConfig {
    /// Listen address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrently connected sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Initial share difficulty pinned on new sessions.
    #[serde(default = "default_difficulty")]
    pub difficulty: f64,

    /// Adopt a client's `mining.suggest_difficulty` request.
    #[serde(default = "default_true")]
    pub accept_suggested_difficulty: bool,

    /// Version-rolling mask offered in `mining.configure`, as hex.
    #[serde(
        default = "default_version_mask",
        deserialize_with = "de_hex_u32"
    )]
    pub version_rolling_mask: u32,
}

/// Share/block record persistence configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordsConfig {
    /// JSON-lines file the pool appends share and block records to.
    /// Persistence is disabled when unset.
    pub path: Option<std::path::PathBuf>,
}

/// HTTP status API configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Listen address, e.g. `127.0.0.1:7870`. The API is disabled when
    /// unset.
    pub listen: Option<String>,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stratum.difficulty <= 0.0 || !self.stratum.difficulty.is_finite() {
            return Err(Error::Config(format!(
                "stratum.difficulty must be positive, got {}",
                self.stratum.difficulty
            )));
        }
        if self.stratum.max_connections == 0 {
            return Err(Error::Config(
                "stratum.max_connections must be at least 1".into(),
            ));
        }
        if !self.rpc.url.starts_with("http://") && !self.rpc.url.starts_with("https://") {
            return Err(Error::Config(format!(
                "rpc.url must be an http(s) URL, got {}",
                self.rpc.url
            )));
        }
        Ok(())
    }

    /// Socket address of the Stratum listener.
    pub fn stratum_addr(&self) -> String {
        format!("{}:{}", self.stratum.host, self.stratum.port)
    }
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_rpc_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3333
}

fn default_max_connections() -> usize {
    1024
}

fn default_difficulty() -> f64 {
    1000.0
}

fn default_true() -> bool {
    true
}

fn default_version_mask() -> u32 {
    DEFAULT_VERSION_MASK
}

// `network = "main" | "test" | "regtest"` in the file; signet is accepted
// for completeness.
fn de_network<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Network, D::Error> {
    let s = String::deserialize(d)?;
    match s.as_str() {
        "main" | "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "test" | "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(serde::de::Error::custom(format!(
            "unknown network {other:?}"
        ))),
    }
}

// Masks are conventionally written as hex, with or without a 0x prefix.
fn de_hex_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let s = String::deserialize(d)?;
    let trimmed = s.trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16)
        .map_err(|e| serde::de::Error::custom(format!("bad hex mask {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        network = "regtest"

        [rpc]
        url = "http://127.0.0.1:18443"
        user = "user"
        password = "pass"

        [zmq]
        endpoint = "tcp://127.0.0.1:28332"

        [stratum]
    "#;

    #[test]
    fn minimal_config_applies_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.rpc.timeout_s, 10);
        assert_eq!(config.stratum.port, 3333);
        assert_eq!(config.stratum.max_connections, 1024);
        assert_eq!(config.stratum.version_rolling_mask, DEFAULT_VERSION_MASK);
        assert!(config.stratum.accept_suggested_difficulty);
        assert!(config.records.path.is_none());
        assert!(config.api.listen.is_none());
    }

    #[test]
    fn version_mask_parses_hex_with_and_without_prefix() {
        let with_prefix = MINIMAL.replace(
            "[stratum]",
            "[stratum]\nversion_rolling_mask = \"0x00e00000\"",
        );
        let config: Config = toml::from_str(&with_prefix).unwrap();
        assert_eq!(config.stratum.version_rolling_mask, 0x00e0_0000);

        let bare = MINIMAL.replace(
            "[stratum]",
            "[stratum]\nversion_rolling_mask = \"1fffe000\"",
        );
        let config: Config = toml::from_str(&bare).unwrap();
        assert_eq!(config.stratum.version_rolling_mask, 0x1fff_e000);
    }

    #[test]
    fn zero_difficulty_rejected() {
        let bad = MINIMAL.replace("[stratum]", "[stratum]\ndifficulty = 0.0");
        let config: Config = toml::from_str(&bad).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_rpc_url_rejected() {
        let bad = MINIMAL.replace("http://127.0.0.1:18443", "127.0.0.1:18443");
        let config: Config = toml::from_str(&bad).unwrap();
        assert!(config.validate().is_err());
    }
}
