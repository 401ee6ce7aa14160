use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::utils::parse_units;
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use tokio::task::{self, JoinSet};

use crate::config::networks::normalize_symbol;
use crate::config::NetworkConfig;
use crate::error::{ForgeError, LedgerError, Result};
use crate::ledger::{Accessor, Account, LedgerClient, TxOutcome, IERC20};
use crate::utils::error::compact_ledger_error;

/// Native balance given to a whale before it sends a transfer, for gas.
pub const WHALE_GAS_TOP_UP: U256 = U256::from_limbs([0, 0x100, 0, 0]);

/// Asset symbol to large-balance holder. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhaleRegistry {
    holders: BTreeMap<String, Address>,
}

impl WhaleRegistry {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Address)>,
        S: AsRef<str>,
    {
        Self {
            holders: entries
                .into_iter()
                .map(|(symbol, holder)| (normalize_symbol(symbol.as_ref()), holder))
                .collect(),
        }
    }

    pub fn from_network(network: &NetworkConfig) -> Self {
        Self::new(network.whales.iter().map(|(s, a)| (s.as_str(), *a)))
    }

    pub fn holder(&self, asset: &str) -> Option<Address> {
        self.holders.get(&normalize_symbol(asset)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Address)> + '_ {
        self.holders.iter().map(|(s, a)| (s.as_str(), *a))
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

/// Impersonates registered whales and funds accounts by transferring from them.
///
/// Independent of the injection path: no storage is inspected here.
pub struct WhaleCoordinator {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<WhaleRegistry>,
    unlocked: DashMap<String, Account>,
}

impl WhaleCoordinator {
    pub fn new(ledger: Arc<dyn LedgerClient>, registry: Arc<WhaleRegistry>) -> Self {
        Self {
            ledger,
            registry,
            unlocked: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &WhaleRegistry {
        &self.registry
    }

    /// Impersonate every registered whale concurrently and wait for all of them.
    ///
    /// Every request runs to completion even when one fails; the first failure
    /// (in completion order) is returned afterwards.
    pub async fn unlock_all(&self) -> Result<()> {
        let mut join_set = JoinSet::new();
        let mut holders: HashMap<task::Id, Address> = HashMap::new();
        for (symbol, holder) in self.registry.iter() {
            let ledger = Arc::clone(&self.ledger);
            let symbol = symbol.to_string();
            let handle = join_set.spawn(async move {
                let result = ledger.impersonate(holder).await;
                (symbol, holder, result)
            });
            holders.insert(handle.id(), holder);
        }

        let mut first_failure: Option<ForgeError> = None;
        while let Some(joined) = join_set.join_next().await {
            let failure = match joined {
                Ok((symbol, _, Ok(account))) => {
                    tracing::debug!("[WHALE] unlocked {} whale {:#x}", symbol, account.address);
                    self.unlocked.insert(symbol, account);
                    continue;
                }
                Ok((symbol, holder, Err(err))) => {
                    tracing::warn!(
                        "[WHALE] could not impersonate {} whale {:#x}: {}",
                        symbol,
                        holder,
                        err
                    );
                    ForgeError::ImpersonationFailed {
                        account: holder,
                        reason: compact_ledger_error(err),
                    }
                }
                Err(err) => {
                    let account = holders.get(&err.id()).copied().unwrap_or(Address::ZERO);
                    tracing::warn!(
                        "[WHALE] impersonation task for {:#x} did not complete: {}",
                        account,
                        err
                    );
                    ForgeError::ImpersonationFailed {
                        account,
                        reason: format!("impersonation task did not complete: {err}"),
                    }
                }
            };
            first_failure.get_or_insert(failure);
        }

        if let Some(err) = first_failure {
            return Err(err);
        }
        tracing::info!("[WHALE] unlocked {} whales", self.unlocked.len());
        Ok(())
    }

    pub fn is_unlocked(&self, asset: &str) -> bool {
        self.unlocked.contains_key(&normalize_symbol(asset))
    }

    /// Signer of the whale registered for `asset`. Requires [`Self::unlock_all`].
    pub fn signer_for(&self, asset: &str) -> Result<Account> {
        let holder = self
            .registry
            .holder(asset)
            .ok_or_else(|| ForgeError::UnknownAsset(asset.to_string()))?;
        self.unlocked
            .get(&normalize_symbol(asset))
            .map(|entry| *entry.value())
            .ok_or_else(|| ForgeError::ImpersonationFailed {
                account: holder,
                reason: format!("whale for `{asset}` has not been unlocked"),
            })
    }

    /// Transfer `amount` (a decimal string in whole tokens) of `token` from the
    /// `asset` whale to `receiver`, impersonating the whale if needed.
    pub async fn fund_from_whale(
        &self,
        asset: &str,
        token: Address,
        receiver: Address,
        amount: &str,
        decimals: u8,
    ) -> Result<TxOutcome> {
        let value = parse_token_amount(amount, decimals)?;
        let whale = match self.signer_for(asset) {
            Ok(account) => account,
            Err(ForgeError::ImpersonationFailed { account, .. }) => {
                let unlocked = self.ledger.impersonate(account).await.map_err(|err| {
                    ForgeError::ImpersonationFailed {
                        account,
                        reason: compact_ledger_error(err),
                    }
                })?;
                self.unlocked.insert(normalize_symbol(asset), unlocked);
                unlocked
            }
            Err(err) => return Err(err),
        };

        self.ledger
            .set_native_balance(whale.address, WHALE_GAS_TOP_UP)
            .await?;

        let calldata = IERC20::transferCall {
            to: receiver,
            amount: value,
        }
        .abi_encode();
        let transfer = Accessor::new(
            token,
            IERC20::transferCall::SELECTOR,
            Bytes::copy_from_slice(&calldata[4..]),
        );
        let tx_hash = self.ledger.send_transaction(whale.address, &transfer).await?;
        let outcome = self.ledger.wait_for_inclusion(tx_hash).await?;
        if !outcome.success {
            return Err(LedgerError::Reverted {
                tx_hash,
                reason: format!(
                    "{asset} whale {:#x} transfer of {amount} to {receiver:#x} failed",
                    whale.address
                ),
            }
            .into());
        }
        tracing::info!(
            "[WHALE] {} {} from {:#x} to {:#x}",
            amount,
            normalize_symbol(asset),
            whale.address,
            receiver
        );
        Ok(outcome)
    }
}

/// `"1.5"` with 6 decimals is `1_500_000`. Negative amounts are rejected.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256> {
    let trimmed = amount.trim();
    if trimmed.starts_with('-') {
        return Err(ForgeError::Decode(format!(
            "token amount `{trimmed}` is negative"
        )));
    }
    parse_units(trimmed, decimals)
        .map(|units| units.get_absolute())
        .map_err(|err| ForgeError::Decode(format!("token amount `{trimmed}`: {err}")))
}
