pub mod networks;

use std::env;
use std::sync::Arc;
use std::time::Duration;

pub use networks::{NetworkConfig, NetworkRegistry};

use crate::error::{ConfigError, Result};
use crate::injector::BalanceInjector;
use crate::ledger::rpc::{LedgerDialect, RpcLedger, DEFAULT_RECEIPT_POLL_INTERVAL_MS};
use crate::ledger::LedgerClient;
use crate::whales::{WhaleCoordinator, WhaleRegistry};

const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeConfig {
    pub rpc_url: String,
    pub dialect: LedgerDialect,
    pub expected_chain_id: Option<u64>,
    pub receipt_poll_interval: Duration,
    pub verify_raw_storage: bool,
}

fn validate_http_url(name: &str, raw: &str) -> std::result::Result<(), ConfigError> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

fn parse_flag(name: &str, raw: &str) -> std::result::Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{name} must be a boolean, got `{other}`"
        ))),
    }
}

impl ForgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ForgeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let rpc_url = read("LEDGER_RPC_URL")
            .ok_or_else(|| ConfigError::Missing("LEDGER_RPC_URL must be set".to_string()))?;
        validate_http_url("LEDGER_RPC_URL", &rpc_url)?;

        let dialect = match read("LEDGER_DIALECT") {
            Some(raw) => raw
                .parse::<LedgerDialect>()
                .map_err(|e| ConfigError::Invalid(format!("LEDGER_DIALECT: {e}")))?,
            None => LedgerDialect::default(),
        };

        let expected_chain_id = read("LEDGER_CHAIN_ID")
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    ConfigError::Invalid(format!("LEDGER_CHAIN_ID must be a valid u64, got `{raw}`"))
                })
            })
            .transpose()?;

        let poll_ms = read("RECEIPT_POLL_INTERVAL_MS")
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "RECEIPT_POLL_INTERVAL_MS must be a whole number of milliseconds, got `{raw}`"
                    ))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_RECEIPT_POLL_INTERVAL_MS)
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);

        let verify_raw_storage = match read("FORGE_VERIFY_RAW_STORAGE") {
            Some(raw) => parse_flag("FORGE_VERIFY_RAW_STORAGE", &raw)?,
            None => false,
        };

        Ok(Self {
            rpc_url,
            dialect,
            expected_chain_id,
            receipt_poll_interval: Duration::from_millis(poll_ms),
            verify_raw_storage,
        })
    }
}

/// A connected ledger plus the network it was resolved to.
pub struct LedgerSession {
    pub ledger: Arc<dyn LedgerClient>,
    pub network: NetworkConfig,
    pub verify_raw_storage: bool,
}

impl LedgerSession {
    pub fn injector(&self) -> BalanceInjector {
        BalanceInjector::new(Arc::clone(&self.ledger)).verify_raw_storage(self.verify_raw_storage)
    }

    pub fn whales(&self) -> WhaleCoordinator {
        WhaleCoordinator::new(
            Arc::clone(&self.ledger),
            Arc::new(WhaleRegistry::from_network(&self.network)),
        )
    }
}

/// Validate `registry`, connect to the configured node and resolve its network.
pub async fn connect(cfg: &ForgeConfig, registry: &NetworkRegistry) -> Result<LedgerSession> {
    registry.validate()?;
    let ledger = RpcLedger::connect(&cfg.rpc_url, cfg.dialect)?
        .with_poll_interval(cfg.receipt_poll_interval);
    let chain_id = ledger.chain_id().await?;
    if let Some(expected) = cfg.expected_chain_id {
        if expected != chain_id {
            return Err(ConfigError::Invalid(format!(
                "LEDGER_CHAIN_ID is {expected} but the node reports {chain_id}"
            ))
            .into());
        }
    }
    let network = registry.resolve(chain_id)?.clone();
    tracing::info!(
        "[LEDGER] connected to {} ({}, chain {})",
        cfg.rpc_url,
        network.name,
        chain_id
    );
    Ok(LedgerSession {
        ledger: Arc::new(ledger),
        network,
        verify_raw_storage: cfg.verify_raw_storage,
    })
}
