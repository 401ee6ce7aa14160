use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};

use crate::error::{ForgeError, Result};
use crate::ledger::{Accessor, Account, LedgerClient};
use crate::overwriter::StateOverwriter;
use crate::probe::OpcodeTraceProbe;
use crate::resolver::{ResolverRegistry, StorageSlot};

/// Outcome of one injection, kept for verification and error reporting only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRecord {
    pub accessor: Accessor,
    pub slot: StorageSlot,
    pub requested: U256,
    pub observed: U256,
    pub success: bool,
}

impl InjectionRecord {
    fn new(accessor: Accessor, slot: StorageSlot, requested: U256, observed: U256) -> Self {
        Self {
            accessor,
            slot,
            requested,
            observed,
            success: requested == observed,
        }
    }

    fn mismatch(&self, holder: Address) -> ForgeError {
        ForgeError::BalanceMismatch {
            contract: self.accessor.contract,
            holder,
            slot: self.slot.index,
            expected: self.requested,
            actual: self.observed,
        }
    }
}

/// Forces a single-word accessor (usually `balanceOf`) to return a chosen value
/// by tracing it, locating the backing slot, and overwriting that slot.
///
/// Each call is a strict sequence: probe, resolve, snapshot, write, re-read,
/// compare. A failed comparison puts the snapshot back. Nothing is retried. Concurrent calls for the same holder race on the same
/// slot and must be serialized by the caller.
pub struct BalanceInjector {
    ledger: Arc<dyn LedgerClient>,
    probe: OpcodeTraceProbe,
    overwriter: StateOverwriter,
    resolvers: ResolverRegistry,
    signer: Option<Account>,
    verify_raw_storage: bool,
}

impl BalanceInjector {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            probe: OpcodeTraceProbe::new(Arc::clone(&ledger)),
            overwriter: StateOverwriter::new(Arc::clone(&ledger)),
            ledger,
            resolvers: ResolverRegistry::default(),
            signer: None,
            verify_raw_storage: false,
        }
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Signer for probe transactions and the default holder. Falls back to the
    /// ledger's default signer when unset.
    pub fn with_signer(mut self, signer: Account) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Also read the raw slot back after the override and require the exact word.
    pub fn verify_raw_storage(mut self, enabled: bool) -> Self {
        self.verify_raw_storage = enabled;
        self
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    /// Make `contract.balanceOf(holder)` return `amount`. `holder = None` targets
    /// the signer's own balance.
    pub async fn set_balance(
        &self,
        contract: Address,
        holder: Option<Address>,
        amount: U256,
    ) -> Result<InjectionRecord> {
        let signer = match self.signer().await {
            Ok(signer) => signer,
            Err(err) => return Err(wrap(contract, holder.unwrap_or(Address::ZERO), err)),
        };
        let holder = holder.unwrap_or(signer.address);
        let accessor = Accessor::balance_of(contract, holder);
        self.inject(&accessor, holder, signer, amount)
            .await
            .map_err(|err| wrap(contract, holder, err))
    }

    /// Make an arbitrary single-word accessor return `amount`.
    pub async fn set_accessor_value(
        &self,
        accessor: &Accessor,
        amount: U256,
    ) -> Result<InjectionRecord> {
        let holder = accessor.holder().unwrap_or(Address::ZERO);
        let signer = match self.signer().await {
            Ok(signer) => signer,
            Err(err) => return Err(wrap(accessor.contract, holder, err)),
        };
        self.inject(accessor, holder, signer, amount)
            .await
            .map_err(|err| wrap(accessor.contract, holder, err))
    }

    async fn signer(&self) -> Result<Account> {
        match self.signer {
            Some(signer) => Ok(signer),
            None => Ok(self.ledger.default_signer().await?),
        }
    }

    async fn inject(
        &self,
        accessor: &Accessor,
        holder: Address,
        signer: Account,
        amount: U256,
    ) -> Result<InjectionRecord> {
        let resolver = Arc::clone(self.resolvers.for_contract(accessor.contract));
        let trace = if resolver.needs_trace() {
            Some(self.probe.probe(accessor, &signer).await?)
        } else {
            None
        };
        let slot = resolver.resolve(accessor, trace.as_ref())?;
        tracing::debug!(
            "[INJECT] {:#x}: resolver {} chose slot {:#x}",
            accessor.contract,
            resolver.name(),
            slot.index
        );

        // the chosen slot may be shared by every holder; keep the prior word
        let prior = self.overwriter.read(&slot).await?;
        self.overwriter.write(&slot, amount).await?;

        let record = match self.verify(accessor, holder, &slot, amount).await {
            Ok(record) => record,
            Err(err) => {
                self.restore(&slot, prior).await;
                return Err(err);
            }
        };

        tracing::info!(
            "[INJECT] {:#x} holder {:#x} set to {} (slot {:#x})",
            accessor.contract,
            holder,
            amount,
            slot.index
        );
        Ok(record)
    }

    async fn verify(
        &self,
        accessor: &Accessor,
        holder: Address,
        slot: &StorageSlot,
        amount: U256,
    ) -> Result<InjectionRecord> {
        if self.verify_raw_storage {
            let stored = self.overwriter.read(slot).await?;
            if stored != amount {
                tracing::warn!(
                    "[INJECT] raw slot {:#x} of {:#x} reads {} after writing {}",
                    slot.index,
                    slot.contract,
                    B256::from(stored),
                    B256::from(amount)
                );
                return Err(ForgeError::BalanceMismatch {
                    contract: accessor.contract,
                    holder,
                    slot: slot.index,
                    expected: amount,
                    actual: stored,
                });
            }
        }

        let output = self.ledger.call(accessor).await?;
        let observed = Accessor::decode_word(&output).ok_or_else(|| {
            ForgeError::Decode(format!(
                "accessor on {:#x} returned {} bytes, expected a 32-byte word",
                accessor.contract,
                output.len()
            ))
        })?;

        let record = InjectionRecord::new(accessor.clone(), *slot, amount, observed);
        if !record.success {
            tracing::warn!(
                "[INJECT] {:#x} holder {:#x}: wrote {} to slot {:#x} but accessor returns {}",
                accessor.contract,
                holder,
                amount,
                slot.index,
                observed
            );
            return Err(record.mismatch(holder));
        }
        Ok(record)
    }

    /// Put back the word that was in `slot` before a failed injection. The
    /// original failure is what the caller sees, so a failed restore is only logged.
    async fn restore(&self, slot: &StorageSlot, prior: U256) {
        match self.overwriter.write(slot, prior).await {
            Ok(()) => tracing::debug!(
                "[INJECT] restored slot {:#x} of {:#x} to {}",
                slot.index,
                slot.contract,
                B256::from(prior)
            ),
            Err(err) => tracing::warn!(
                "[INJECT] could not restore slot {:#x} of {:#x} to {}: {}",
                slot.index,
                slot.contract,
                B256::from(prior),
                err
            ),
        }
    }
}

fn wrap(contract: Address, holder: Address, err: ForgeError) -> ForgeError {
    ForgeError::BalanceInjectionFailed {
        contract,
        holder,
        reason: Box::new(err),
    }
}
