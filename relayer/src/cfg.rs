use std::{
    fmt::{self, Debug, Formatter},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration errors are fatal; the binary exits when it sees one.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("environment variable {var} must be an integer, got {value:?}")]
    NotAnInteger { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Int,
}

/// Environment variables which override keys from the config file, as `(variables, kind,
/// required)`. The first variable in the list which is set is used, and the key it overrides is
/// the lowercased name of the first. Later names are the ones used by older deployments.
const ENV_OVERRIDES: &[(&[&str], Kind, bool)] = &[
    (&["SOURCE_RPC", "SEPOLIA_RPC_URL"], Kind::Str, true),
    (&["DEST_RPC", "ARB_SEPOLIA_RPC_URL"], Kind::Str, true),
    (&["SOURCE_BRIDGE"], Kind::Str, true),
    (&["DEST_BRIDGE"], Kind::Str, true),
    (&["RELAYER_PRIVATE_KEY"], Kind::Str, true),
    (&["RELAYER_ADDRESS"], Kind::Str, false),
    (&["SOURCE_CHAIN_ID"], Kind::Int, false),
    (&["DEST_CHAIN_ID"], Kind::Int, false),
    (&["CONFIRMATIONS"], Kind::Int, false),
    (&["MAX_RETRIES"], Kind::Int, false),
    (&["RETRY_BASE_MS"], Kind::Int, false),
    (&["CONFIRMATION_POLL_MS"], Kind::Int, false),
    (&["CONFIRMATION_TIMEOUT_MS"], Kind::Int, false),
    (&["DB_PATH"], Kind::Str, false),
    (&["DEAD_LETTER_PATH"], Kind::Str, false),
    (&["OTLP_COLLECTOR_ENDPOINT"], Kind::Str, false),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source chain RPC endpoint. Logs are subscribed to over ws:// and wss://, and polled for
    /// over http:// and https://.
    pub source_rpc: String,
    /// Destination chain RPC endpoint.
    pub dest_rpc: String,
    /// The bridge contract on the source chain which emits `BridgeRequest`.
    pub source_bridge: Address,
    /// The bridge contract on the destination chain which exposes `executeMint`.
    pub dest_bridge: Address,
    #[serde(default = "source_chain_id_default")]
    pub source_chain_id: u64,
    /// Deposits addressed to any other chain are ignored.
    #[serde(default = "dest_chain_id_default")]
    pub dest_chain_id: u64,
    /// Key used to sign destination transactions.
    pub relayer_private_key: SigningCredential,
    /// The address the operator expects `relayer_private_key` to belong to. Only used to warn
    /// about a mismatch at startup.
    #[serde(default)]
    pub relayer_address: Option<Address>,
    /// Number of blocks that must follow a deposit's block before it is relayed.
    #[serde(default = "confirmations_default")]
    pub confirmations: u64,
    /// Total number of `executeMint` attempts per deposit.
    #[serde(default = "max_retries_default")]
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each subsequent failure.
    #[serde(default = "retry_base_ms_default")]
    pub retry_base_ms: u64,
    #[serde(default = "confirmation_poll_ms_default")]
    pub confirmation_poll_ms: u64,
    /// Give up waiting for confirmations after this long. Unbounded if not set.
    #[serde(default)]
    pub confirmation_timeout_ms: Option<u64>,
    /// Location of the processed message document.
    #[serde(default = "db_path_default")]
    pub db_path: PathBuf,
    /// If set, abandoned messages are appended here as JSON lines.
    #[serde(default)]
    pub dead_letter_path: Option<PathBuf>,
    /// The base address of the OTLP collector. If not set, metrics will not be exported.
    #[serde(default)]
    pub otlp_collector_endpoint: Option<String>,
}

pub fn source_chain_id_default() -> u64 {
    11155111
}

pub fn dest_chain_id_default() -> u64 {
    421614
}

pub fn confirmations_default() -> u64 {
    6
}

pub fn max_retries_default() -> u32 {
    5
}

pub fn retry_base_ms_default() -> u64 {
    1000
}

pub fn confirmation_poll_ms_default() -> u64 {
    1000
}

pub fn db_path_default() -> PathBuf {
    PathBuf::from("relayer-db.json")
}

impl Config {
    /// Reads `config_file` if it exists, then applies any overrides found through `env`.
    pub fn load<F>(config_file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut table = match config_file {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {path:?}"))?;
                toml::from_str::<toml::Table>(&contents)
                    .with_context(|| format!("failed to parse config file {path:?}"))?
            }
            _ => toml::Table::new(),
        };

        let mut missing = Vec::new();
        for &(vars, kind, required) in ENV_OVERRIDES {
            let key = vars[0].to_lowercase();
            let mut found = None;
            for &var in vars {
                // Empty values are treated the same as unset ones.
                if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
                    found = Some((var, value));
                    break;
                }
            }
            if let Some((var, value)) = found {
                let value = match kind {
                    Kind::Str => toml::Value::String(value),
                    Kind::Int => toml::Value::Integer(value.trim().parse().map_err(|_| {
                        ConfigError::NotAnInteger {
                            var,
                            value: value.clone(),
                        }
                    })?),
                };
                table.insert(key.clone(), value);
            }
            if required && !table.contains_key(&key) {
                missing.push(vars[0]);
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing).into());
        }

        let config: Config = toml::Value::Table(table)
            .try_into()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".to_owned()));
        }
        if self.confirmation_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_poll_ms must be greater than 0".to_owned(),
            ));
        }
        if self.source_bridge.is_zero() || self.dest_bridge.is_zero() {
            return Err(ConfigError::Invalid(
                "bridge addresses must not be the zero address".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_ms.map(Duration::from_millis)
    }
}

/// The relayer's private key. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SigningCredential(String);

impl SigningCredential {
    pub fn signer(&self) -> Result<PrivateKeySigner> {
        self.0
            .trim()
            .parse()
            .context("relayer private key is not a valid secp256k1 key")
    }
}

impl Debug for SigningCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SigningCredential(<redacted>)")
    }
}
