
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use dashmap::DashSet;
use ledger_fixtures::{balance_of, local_ledger_with_token, BalanceShape, HOLDER_B, TOKEN};
use slot_forge::error::LedgerResult;
use slot_forge::{
    Accessor, Account, BalanceInjector, ForgeError, LedgerClient, LedgerError, NetworkConfig,
    OpcodeTraceEntry, TxOutcome, WhaleCoordinator, WhaleRegistry,
};

const ASSETS: [&str; 5] = ["LP_TOKEN", "USDC", "USDT", "WETH", "WBTC"];

/// Ledger that only implements impersonation, slowly, counting overlap.
#[derive(Default)]
struct SlowImpersonationLedger {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
    impersonated: DashSet<Address>,
    refuse: Option<Address>,
    crash: Option<Address>,
}

fn unsupported<T>(what: &str) -> LedgerResult<T> {
    Err(LedgerError::Unsupported(what.to_string()))
}

#[async_trait]
impl LedgerClient for SlowImpersonationLedger {
    fn name(&self) -> &str {
        "slow-impersonation"
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        Ok(31337)
    }

    async fn default_signer(&self) -> LedgerResult<Account> {
        unsupported("default_signer")
    }

    async fn impersonate(&self, address: Address) -> LedgerResult<Account> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.crash == Some(address) {
            panic!("impersonation handler crashed for {address:#x}");
        }
        if self.refuse == Some(address) {
            return Err(LedgerError::Rpc {
                method: "hardhat_impersonateAccount".to_string(),
                message: "account is blocked".to_string(),
            });
        }
        self.impersonated.insert(address);
        Ok(Account::signer(address))
    }

    async fn stop_impersonating(&self, address: Address) -> LedgerResult<()> {
        self.impersonated.remove(&address);
        Ok(())
    }

    async fn set_storage_at(&self, _: Address, _: U256, _: B256) -> LedgerResult<()> {
        unsupported("set_storage_at")
    }

    async fn get_storage_at(&self, _: Address, _: U256) -> LedgerResult<B256> {
        unsupported("get_storage_at")
    }

    async fn set_native_balance(&self, _: Address, _: U256) -> LedgerResult<()> {
        unsupported("set_native_balance")
    }

    async fn send_transaction(&self, _: Address, _: &Accessor) -> LedgerResult<B256> {
        unsupported("send_transaction")
    }

    async fn wait_for_inclusion(&self, _: B256) -> LedgerResult<TxOutcome> {
        unsupported("wait_for_inclusion")
    }

    async fn debug_trace_transaction(&self, _: B256) -> LedgerResult<Vec<OpcodeTraceEntry>> {
        unsupported("debug_trace_transaction")
    }

    async fn call(&self, _: &Accessor) -> LedgerResult<Bytes> {
        unsupported("call")
    }
}

fn whale_address(index: usize) -> Address {
    Address::repeat_byte(0x10 + index as u8)
}

fn five_whales() -> Arc<WhaleRegistry> {
    Arc::new(WhaleRegistry::new(
        ASSETS
            .iter()
            .enumerate()
            .map(|(i, symbol)| (*symbol, whale_address(i))),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_unlock_all_waits_for_every_impersonation() {
    let ledger = Arc::new(SlowImpersonationLedger::default());
    let coordinator = WhaleCoordinator::new(ledger.clone(), five_whales());

    coordinator.unlock_all().await.expect("all whales unlocked");

    assert_eq!(ledger.completed.load(Ordering::SeqCst), 5);
    assert_eq!(ledger.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(
        ledger.peak_in_flight.load(Ordering::SeqCst),
        5,
        "impersonation requests overlap"
    );
    for (i, asset) in ASSETS.iter().enumerate() {
        let signer = coordinator.signer_for(asset).expect("signer");
        assert_eq!(signer.address, whale_address(i));
        assert!(signer.impersonable);
        assert!(ledger.impersonated.contains(&signer.address));
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_refused_whale_fails_after_all_complete() {
    let refused = whale_address(2);
    let ledger = Arc::new(SlowImpersonationLedger {
        refuse: Some(refused),
        ..Default::default()
    });
    let coordinator = WhaleCoordinator::new(ledger.clone(), five_whales());

    let err = coordinator.unlock_all().await.expect_err("one whale refused");
    assert!(matches!(
        err,
        ForgeError::ImpersonationFailed { account, .. } if account == refused
    ));
    assert_eq!(ledger.completed.load(Ordering::SeqCst), 5);
    assert!(coordinator.is_unlocked("LP_TOKEN"));
    assert!(!coordinator.is_unlocked("USDT"));
}

#[tokio::test(start_paused = true)]
async fn test_crashed_impersonation_task_names_its_whale() {
    let crashed = whale_address(3);
    let ledger = Arc::new(SlowImpersonationLedger {
        crash: Some(crashed),
        ..Default::default()
    });
    let coordinator = WhaleCoordinator::new(ledger.clone(), five_whales());

    let err = coordinator.unlock_all().await.expect_err("one task panicked");
    assert!(matches!(
        err,
        ForgeError::ImpersonationFailed { account, ref reason }
            if account == crashed && reason.contains("did not complete")
    ));
    assert_eq!(ledger.completed.load(Ordering::SeqCst), 5);
    assert!(coordinator.is_unlocked("USDC"));
    assert!(!coordinator.is_unlocked("WETH"));
}

#[tokio::test]
async fn test_signer_for_unknown_or_locked_asset() {
    let ledger = Arc::new(SlowImpersonationLedger::default());
    let coordinator = WhaleCoordinator::new(ledger, five_whales());

    assert!(matches!(
        coordinator.signer_for("DOGE"),
        Err(ForgeError::UnknownAsset(asset)) if asset == "DOGE"
    ));
    assert!(matches!(
        coordinator.signer_for("usdc"),
        Err(ForgeError::ImpersonationFailed { .. })
    ));
}

#[tokio::test]
async fn test_fund_from_whale_transfers_tokens() {
    let ledger = local_ledger_with_token(BalanceShape::Plain);
    let whale = Address::repeat_byte(0x3e);

    // give the whale 1_000 tokens (6 decimals) through the injection path
    BalanceInjector::new(ledger.clone())
        .set_balance(TOKEN, Some(whale), U256::from(1_000_000_000u64))
        .await
        .expect("whale balance");

    let network = NetworkConfig::hardhat_fork()
        .with_whale("usdc", whale)
        .with_token("usdc", TOKEN);
    let coordinator = WhaleCoordinator::new(
        ledger.clone(),
        Arc::new(WhaleRegistry::from_network(&network)),
    );
    coordinator.unlock_all().await.expect("unlock");

    let token = network.token("USDC").expect("token");
    let outcome = coordinator
        .fund_from_whale("USDC", token, HOLDER_B, "250.5", 6)
        .await
        .expect("transfer");
    assert!(outcome.success);

    assert_eq!(
        balance_of(&*ledger, TOKEN, HOLDER_B).await,
        U256::from(250_500_000u64)
    );
    assert_eq!(
        balance_of(&*ledger, TOKEN, whale).await,
        U256::from(749_500_000u64)
    );
}

#[tokio::test]
async fn test_fund_from_whale_surfaces_failed_transfer() {
    let ledger = local_ledger_with_token(BalanceShape::Plain);
    let whale = Address::repeat_byte(0x3f);
    let coordinator = WhaleCoordinator::new(
        ledger.clone(),
        Arc::new(WhaleRegistry::new([("WETH", whale)])),
    );

    // whale holds nothing, so the token reverts
    let err = coordinator
        .fund_from_whale("WETH", TOKEN, HOLDER_B, "1", 18)
        .await
        .expect_err("insufficient balance");
    assert!(matches!(err, ForgeError::Ledger(LedgerError::Reverted { .. })));
    assert!(ledger.is_impersonated(whale));
}
