use std::sync::Arc;

use alloy::primitives::{B256, U256};

use crate::error::{ForgeError, Result};
use crate::ledger::LedgerClient;
use crate::resolver::StorageSlot;
use crate::utils::error::compact_ledger_error;

/// Unconditional raw storage writes through the ledger's override RPC.
///
/// Only meaningful on a fork/test node. There is no read-before-write and no
/// locking: two writers racing on the same slot is the caller's problem.
#[derive(Clone)]
pub struct StateOverwriter {
    ledger: Arc<dyn LedgerClient>,
}

impl StateOverwriter {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn write(&self, slot: &StorageSlot, value: U256) -> Result<()> {
        let word = B256::from(value);
        self.ledger
            .set_storage_at(slot.contract, slot.index, word)
            .await
            .map_err(|err| ForgeError::StateOverrideRejected {
                contract: slot.contract,
                slot: slot.index,
                reason: compact_ledger_error(err),
            })?;
        tracing::debug!(
            "[OVERRIDE] {:#x}[{:#x}] <- {}",
            slot.contract,
            slot.index,
            word
        );
        Ok(())
    }

    /// Plain `eth_getStorageAt` of the slot, as a number.
    pub async fn read(&self, slot: &StorageSlot) -> Result<U256> {
        let word = self
            .ledger
            .get_storage_at(slot.contract, slot.index)
            .await?;
        Ok(U256::from_be_bytes(word.0))
    }
}
