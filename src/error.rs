use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeError>;
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("trace unavailable for tx {tx_hash:#x}: {reason}")]
    TraceUnavailable { tx_hash: B256, reason: String },
    #[error("no storage read observed while tracing {contract:#x} ({steps} steps)")]
    SlotNotFound { contract: Address, steps: usize },
    #[error("storage override rejected for {contract:#x} slot {slot:#x}: {reason}")]
    StateOverrideRejected {
        contract: Address,
        slot: U256,
        reason: String,
    },
    #[error(
        "balance mismatch on {contract:#x} for {holder:#x} (slot {slot:#x}): expected {expected}, got {actual}"
    )]
    BalanceMismatch {
        contract: Address,
        holder: Address,
        slot: U256,
        expected: U256,
        actual: U256,
    },
    #[error("impersonation failed for {account:#x}: {reason}")]
    ImpersonationFailed { account: Address, reason: String },
    #[error("no whale registered for asset `{0}`")]
    UnknownAsset(String),
    #[error("unsupported network: chain id {chain_id}")]
    UnsupportedNetwork { chain_id: u64 },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("balance injection failed for {holder:#x} on {contract:#x}: {reason}")]
    BalanceInjectionFailed {
        contract: Address,
        holder: Address,
        #[source]
        reason: Box<ForgeError>,
    },
}

impl ForgeError {
    /// Peels `BalanceInjectionFailed` wrappers down to the failure that caused them.
    pub fn root_cause(&self) -> &ForgeError {
        let mut current = self;
        while let ForgeError::BalanceInjectionFailed { reason, .. } = current {
            current = reason.as_ref();
        }
        current
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("`{method}` failed: {message}")]
    Rpc { method: String, message: String },
    #[error("tx {tx_hash:#x} reverted: {reason}")]
    Reverted { tx_hash: B256, reason: String },
    #[error("malformed ledger response: {0}")]
    Decode(String),
    #[error("unsupported by this ledger: {0}")]
    Unsupported(String),
    #[error("account {0:#x} is not unlocked for signing")]
    NotUnlocked(Address),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
