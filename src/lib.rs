//! Slot Forge: force ERC-20 style balances on fork/test ledgers.
//!
//! The injection path traces an accessor call, resolves the storage slot backing
//! its return value, overwrites that slot and verifies the accessor now returns
//! the requested value. Whale funding (impersonate + transfer) lives alongside it
//! as an independent path.
//!
//! All of it relies on privileged test-node RPCs and must never be pointed at a
//! production network.

pub mod config;
pub mod error;
pub mod injector;
pub mod ledger;
pub mod overwriter;
pub mod probe;
pub mod resolver;
pub mod sampling;
pub mod trace;
pub mod utils;
pub mod whales;

pub use config::{connect, ForgeConfig, LedgerSession, NetworkConfig, NetworkRegistry};
pub use error::{ConfigError, ForgeError, LedgerError, Result};
pub use injector::{BalanceInjector, InjectionRecord};
pub use ledger::local::{LocalLedger, LocalLedgerBuilder};
pub use ledger::rpc::{LedgerDialect, RpcLedger};
pub use ledger::{Accessor, Account, LedgerClient, TxOutcome};
pub use overwriter::StateOverwriter;
pub use probe::OpcodeTraceProbe;
pub use resolver::{
    LastStorageRead, MappingLayout, MappingSlotFormula, ResolverRegistry, SlotResolver,
    StorageSlot,
};
pub use trace::{OpcodeTrace, OpcodeTraceEntry};
pub use whales::{parse_token_amount, WhaleCoordinator, WhaleRegistry};
