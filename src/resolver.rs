use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, U256};

use crate::error::{ForgeError, Result};
use crate::ledger::Accessor;
use crate::trace::OpcodeTrace;

/// A storage location: one 256-bit slot of one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageSlot {
    pub contract: Address,
    pub index: U256,
}

/// Strategy for locating the slot that backs an accessor's return value.
pub trait SlotResolver: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`SlotResolver::resolve`] reads the trace. Strategies that
    /// don't let the injector skip the probe transaction.
    fn needs_trace(&self) -> bool {
        true
    }

    fn resolve(&self, accessor: &Accessor, trace: Option<&OpcodeTrace>) -> Result<StorageSlot>;
}

/// Take the operand of the last `SLOAD` against the traced contract's storage.
///
/// Reads inside `CALL`ed contracts are ignored; reads behind a `DELEGATECALL`
/// (proxies) count, since they hit the proxy's storage.
///
/// Holds for plain `mapping(address => uint256)` getters. Proxies, rebasing
/// tokens and getters that read another field after the balance break it; the
/// post-write verification in the injector catches those.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastStorageRead;

impl SlotResolver for LastStorageRead {
    fn name(&self) -> &str {
        "last-storage-read"
    }

    fn resolve(&self, accessor: &Accessor, trace: Option<&OpcodeTrace>) -> Result<StorageSlot> {
        let Some(trace) = trace else {
            return Err(ForgeError::SlotNotFound {
                contract: accessor.contract,
                steps: 0,
            });
        };

        let reads = trace.own_storage_reads();
        let last = *reads.last().ok_or(ForgeError::SlotNotFound {
            contract: trace.contract(),
            steps: trace.len(),
        })?;
        let index = last.stack_top().ok_or_else(|| {
            ForgeError::Decode(format!(
                "SLOAD at pc {} in tx {:#x} has an empty stack",
                last.pc,
                trace.tx_hash()
            ))
        })?;

        tracing::debug!(
            "[RESOLVE] {:#x}: {} own storage reads of {} total, picked pc {} depth {} slot {:#x}",
            trace.contract(),
            reads.len(),
            trace.storage_reads().count(),
            last.pc,
            last.depth,
            index
        );
        Ok(StorageSlot {
            contract: trace.contract(),
            index,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingLayout {
    /// `keccak256(key ‖ base)`
    Solidity,
    /// `keccak256(base ‖ key)`
    Vyper,
}

/// Known mapping position, keyed by the accessor's first argument word.
#[derive(Debug, Clone, Copy)]
pub struct MappingSlotFormula {
    pub base_slot: U256,
    pub layout: MappingLayout,
}

impl MappingSlotFormula {
    pub fn solidity(base_slot: u64) -> Self {
        Self {
            base_slot: U256::from(base_slot),
            layout: MappingLayout::Solidity,
        }
    }

    pub fn vyper(base_slot: u64) -> Self {
        Self {
            base_slot: U256::from(base_slot),
            layout: MappingLayout::Vyper,
        }
    }

    pub fn slot_for_key(&self, key: &[u8; 32]) -> U256 {
        let base = self.base_slot.to_be_bytes::<32>();
        let mut preimage = [0u8; 64];
        match self.layout {
            MappingLayout::Solidity => {
                preimage[..32].copy_from_slice(key);
                preimage[32..].copy_from_slice(&base);
            }
            MappingLayout::Vyper => {
                preimage[..32].copy_from_slice(&base);
                preimage[32..].copy_from_slice(key);
            }
        }
        U256::from_be_bytes(keccak256(preimage).0)
    }
}

impl SlotResolver for MappingSlotFormula {
    fn name(&self) -> &str {
        match self.layout {
            MappingLayout::Solidity => "mapping-formula(solidity)",
            MappingLayout::Vyper => "mapping-formula(vyper)",
        }
    }

    fn needs_trace(&self) -> bool {
        false
    }

    fn resolve(&self, accessor: &Accessor, _trace: Option<&OpcodeTrace>) -> Result<StorageSlot> {
        let key = accessor.arg_word(0).ok_or_else(|| {
            ForgeError::Decode(format!(
                "accessor on {:#x} has no key argument for the mapping formula",
                accessor.contract
            ))
        })?;
        Ok(StorageSlot {
            contract: accessor.contract,
            index: self.slot_for_key(&key.0),
        })
    }
}

/// Per-contract resolver selection with a shared default.
#[derive(Debug, Clone)]
pub struct ResolverRegistry {
    default: Arc<dyn SlotResolver>,
    overrides: HashMap<Address, Arc<dyn SlotResolver>>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LastStorageRead))
    }
}

impl ResolverRegistry {
    pub fn new(default: Arc<dyn SlotResolver>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, contract: Address, resolver: Arc<dyn SlotResolver>) -> Self {
        self.overrides.insert(contract, resolver);
        self
    }

    pub fn insert(&mut self, contract: Address, resolver: Arc<dyn SlotResolver>) {
        self.overrides.insert(contract, resolver);
    }

    pub fn for_contract(&self, contract: Address) -> &Arc<dyn SlotResolver> {
        self.overrides.get(&contract).unwrap_or(&self.default)
    }
}
