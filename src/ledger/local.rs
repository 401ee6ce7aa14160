//! In-process ledger backed by revm.
//!
//! Behaves like an automining hardhat node for the primitives the engine uses:
//! every submitted transaction is executed and committed immediately, its
//! struct-log trace is captured through an [`Inspector`], and the privileged
//! override methods act directly on the cached state.

use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use revm::db::{AccountState, InMemoryDB};
use revm::interpreter::{Interpreter, OpCode};
use revm::primitives::{AccountInfo, Bytecode, ExecutionResult, TransactTo};
use revm::{Database, DatabaseRef, Evm, EvmContext, Inspector};

use super::{Accessor, Account, LedgerClient, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::trace::OpcodeTraceEntry;

pub const LOCAL_CHAIN_ID: u64 = 31337;
pub const LOCAL_TX_GAS_LIMIT: u64 = 30_000_000;

/// Hardhat's first default account.
pub const DEFAULT_LOCAL_SIGNER: Address = Address::new([
    0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79, 0xcf,
    0xff, 0xb9, 0x22, 0x66,
]);

/// Records one [`OpcodeTraceEntry`] per executed instruction, before it runs.
#[derive(Debug, Default)]
struct StructLogRecorder {
    steps: Vec<OpcodeTraceEntry>,
}

impl<DB: Database> Inspector<DB> for StructLogRecorder {
    fn step(&mut self, interpreter: &mut Interpreter, context: &mut EvmContext<DB>) {
        let opcode = interpreter.current_opcode();
        let op = OpCode::new(opcode)
            .map(|op| op.as_str().to_string())
            .unwrap_or_else(|| format!("opcode 0x{opcode:02x}"));
        self.steps.push(OpcodeTraceEntry {
            pc: interpreter.program_counter() as u64,
            op,
            depth: context.journaled_state.depth(),
            stack: interpreter.stack().data().clone(),
        });
    }
}

struct LocalState {
    db: InMemoryDB,
    block_number: u64,
}

pub struct LocalLedgerBuilder {
    chain_id: u64,
    default_signer: Address,
    trace_collection: bool,
    storage_overrides: bool,
}

impl Default for LocalLedgerBuilder {
    fn default() -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            default_signer: DEFAULT_LOCAL_SIGNER,
            trace_collection: true,
            storage_overrides: true,
        }
    }
}

impl LocalLedgerBuilder {
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn default_signer(mut self, signer: Address) -> Self {
        self.default_signer = signer;
        self
    }

    /// With collection off, `debug_trace_transaction` fails like a node
    /// started without the debug namespace.
    pub fn trace_collection(mut self, enabled: bool) -> Self {
        self.trace_collection = enabled;
        self
    }

    /// With overrides off, `set_storage_at` is refused.
    pub fn storage_overrides(mut self, enabled: bool) -> Self {
        self.storage_overrides = enabled;
        self
    }

    pub fn build(self) -> LocalLedger {
        LocalLedger {
            name: format!("local:{}", self.chain_id),
            chain_id: self.chain_id,
            default_signer: self.default_signer,
            trace_collection: self.trace_collection,
            storage_overrides: self.storage_overrides,
            state: Mutex::new(LocalState {
                db: InMemoryDB::default(),
                block_number: 0,
            }),
            traces: DashMap::new(),
            receipts: DashMap::new(),
            impersonated: DashSet::new(),
        }
    }
}

pub struct LocalLedger {
    name: String,
    chain_id: u64,
    default_signer: Address,
    trace_collection: bool,
    storage_overrides: bool,
    state: Mutex<LocalState>,
    traces: DashMap<B256, Vec<OpcodeTraceEntry>>,
    receipts: DashMap<B256, TxOutcome>,
    impersonated: DashSet<Address>,
}

impl Default for LocalLedger {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LocalLedger {
    pub fn builder() -> LocalLedgerBuilder {
        LocalLedgerBuilder::default()
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, LocalState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Transport("local ledger state lock poisoned".to_string()))
    }

    /// Install runtime bytecode at `address`.
    pub fn deploy(&self, address: Address, runtime: Bytes) -> LedgerResult<()> {
        let bytecode = Bytecode::new_raw(runtime);
        let info = AccountInfo::new(U256::ZERO, 1, bytecode.hash_slow(), bytecode);
        let mut state = self.lock()?;
        state.db.insert_account_info(address, info);
        mark_existing(&mut state.db, address);
        Ok(())
    }

    pub fn nonce(&self, address: Address) -> LedgerResult<u64> {
        let state = self.lock()?;
        let info = DatabaseRef::basic_ref(&state.db, address)
            .map_err(|err| LedgerError::Transport(format!("{err:?}")))?;
        Ok(info.map(|info| info.nonce).unwrap_or(0))
    }

    pub fn block_number(&self) -> LedgerResult<u64> {
        Ok(self.lock()?.block_number)
    }

    pub fn is_impersonated(&self, address: Address) -> bool {
        self.impersonated.contains(&address)
    }

    fn can_sign(&self, address: Address) -> bool {
        address == self.default_signer || self.impersonated.contains(&address)
    }

    fn tx_hash(&self, from: Address, nonce: u64, call: &Accessor) -> B256 {
        let calldata = call.calldata();
        let mut preimage = Vec::with_capacity(20 + 8 + 20 + calldata.len() + 8);
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(call.contract.as_slice());
        preimage.extend_from_slice(&calldata);
        preimage.extend_from_slice(&self.chain_id.to_be_bytes());
        keccak256(preimage)
    }
}

/// Accounts first seen through a read are cached as non-existent; writing to
/// them must flip that or the write stays invisible.
fn mark_existing(db: &mut InMemoryDB, address: Address) {
    if let Some(account) = db.accounts.get_mut(&address) {
        if account.account_state == AccountState::NotExisting {
            account.account_state = AccountState::Touched;
        }
    }
}

fn execution_failure(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Success { .. } => "success".to_string(),
        ExecutionResult::Revert { output, .. } => format!("execution reverted: {output:?}"),
        ExecutionResult::Halt { reason, .. } => format!("halted: {reason:?}"),
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        Ok(self.chain_id)
    }

    async fn default_signer(&self) -> LedgerResult<Account> {
        Ok(Account::signer(self.default_signer))
    }

    async fn impersonate(&self, address: Address) -> LedgerResult<Account> {
        self.impersonated.insert(address);
        Ok(Account::signer(address))
    }

    async fn stop_impersonating(&self, address: Address) -> LedgerResult<()> {
        self.impersonated.remove(&address);
        Ok(())
    }

    async fn set_storage_at(
        &self,
        contract: Address,
        slot: U256,
        word: B256,
    ) -> LedgerResult<()> {
        if !self.storage_overrides {
            return Err(LedgerError::Unsupported(
                "storage overrides are disabled on this ledger".to_string(),
            ));
        }
        let mut state = self.lock()?;
        state
            .db
            .insert_account_storage(contract, slot, U256::from_be_bytes(word.0))
            .map_err(|err| LedgerError::Transport(format!("{err:?}")))?;
        mark_existing(&mut state.db, contract);
        Ok(())
    }

    async fn get_storage_at(&self, contract: Address, slot: U256) -> LedgerResult<B256> {
        let state = self.lock()?;
        let value = DatabaseRef::storage_ref(&state.db, contract, slot)
            .map_err(|err| LedgerError::Transport(format!("{err:?}")))?;
        Ok(B256::from(value))
    }

    async fn set_native_balance(&self, address: Address, amount: U256) -> LedgerResult<()> {
        let mut state = self.lock()?;
        let account = state
            .db
            .load_account(address)
            .map_err(|err| LedgerError::Transport(format!("{err:?}")))?;
        account.info.balance = amount;
        mark_existing(&mut state.db, address);
        Ok(())
    }

    async fn send_transaction(&self, from: Address, call: &Accessor) -> LedgerResult<B256> {
        if !self.can_sign(from) {
            return Err(LedgerError::NotUnlocked(from));
        }

        let mut state = self.lock()?;
        let nonce = DatabaseRef::basic_ref(&state.db, from)
            .map_err(|err| LedgerError::Transport(format!("{err:?}")))?
            .map(|info| info.nonce)
            .unwrap_or(0);
        let tx_hash = self.tx_hash(from, nonce, call);

        let mut recorder = StructLogRecorder::default();
        let result = {
            let mut evm = Evm::builder()
                .with_db(&mut state.db)
                .with_external_context(&mut recorder)
                .append_handler_register(revm::inspector_handle_register)
                .modify_tx_env(|tx| {
                    tx.caller = from;
                    tx.transact_to = TransactTo::Call(call.contract);
                    tx.data = call.calldata();
                    tx.value = U256::ZERO;
                    tx.gas_limit = LOCAL_TX_GAS_LIMIT;
                    tx.nonce = None;
                })
                .build();
            evm.transact_commit()
        }
        .map_err(|err| LedgerError::Rpc {
            method: "eth_sendTransaction".to_string(),
            message: format!("{err:?}"),
        })?;

        state.block_number += 1;
        let outcome = TxOutcome {
            tx_hash,
            block_number: Some(state.block_number),
            success: result.is_success(),
        };
        drop(state);

        if !outcome.success {
            tracing::debug!(
                "[LEDGER] local tx {:#x} failed: {}",
                tx_hash,
                execution_failure(&result)
            );
        }
        if self.trace_collection {
            self.traces.insert(tx_hash, recorder.steps);
        }
        self.receipts.insert(tx_hash, outcome);
        Ok(tx_hash)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256) -> LedgerResult<TxOutcome> {
        self.receipts
            .get(&tx_hash)
            .map(|entry| *entry.value())
            .ok_or_else(|| LedgerError::Rpc {
                method: "eth_getTransactionReceipt".to_string(),
                message: format!("unknown transaction {tx_hash:#x}"),
            })
    }

    async fn debug_trace_transaction(
        &self,
        tx_hash: B256,
    ) -> LedgerResult<Vec<OpcodeTraceEntry>> {
        if !self.trace_collection {
            return Err(LedgerError::Unsupported(
                "debug_traceTransaction is disabled on this ledger".to_string(),
            ));
        }
        self.traces
            .get(&tx_hash)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::Rpc {
                method: "debug_traceTransaction".to_string(),
                message: format!("unknown transaction {tx_hash:#x}"),
            })
    }

    async fn call(&self, call: &Accessor) -> LedgerResult<Bytes> {
        let mut state = self.lock()?;
        let result = {
            let mut evm = Evm::builder()
                .with_db(&mut state.db)
                .modify_tx_env(|tx| {
                    tx.caller = Address::ZERO;
                    tx.transact_to = TransactTo::Call(call.contract);
                    tx.data = call.calldata();
                    tx.value = U256::ZERO;
                    tx.gas_limit = LOCAL_TX_GAS_LIMIT;
                    tx.nonce = None;
                })
                .build();
            evm.transact()
        }
        .map_err(|err| LedgerError::Rpc {
            method: "eth_call".to_string(),
            message: format!("{err:?}"),
        })?;

        match result.result {
            ExecutionResult::Success { output, .. } => Ok(output.into_data()),
            other => Err(LedgerError::Rpc {
                method: "eth_call".to_string(),
                message: execution_failure(&other),
            }),
        }
    }
}
