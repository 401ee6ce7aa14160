use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{Accessor, Account, LedgerClient, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::trace::{decode_struct_logs, OpcodeTraceEntry};
use crate::utils::error::compact_ledger_error;
use crate::utils::hex::{quantity_hex, to_u256, to_word, word_hex};

pub type HttpProvider = RootProvider<Http<Client>>;

pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 100;

/// Method namespace for the privileged test-node RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerDialect {
    #[default]
    Hardhat,
    Anvil,
}

impl LedgerDialect {
    pub fn prefix(self) -> &'static str {
        match self {
            LedgerDialect::Hardhat => "hardhat",
            LedgerDialect::Anvil => "anvil",
        }
    }

    fn method(self, suffix: &str) -> String {
        format!("{}_{}", self.prefix(), suffix)
    }
}

impl FromStr for LedgerDialect {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hardhat" => Ok(LedgerDialect::Hardhat),
            "anvil" | "foundry" => Ok(LedgerDialect::Anvil),
            other => Err(format!("unknown ledger dialect `{other}`")),
        }
    }
}

/// JSON-RPC ledger client for a hardhat or anvil node (usually a mainnet fork).
pub struct RpcLedger {
    name: String,
    provider: HttpProvider,
    dialect: LedgerDialect,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn connect(url: &str, dialect: LedgerDialect) -> LedgerResult<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::Transport("empty ledger RPC url".to_string()));
        }
        let parsed = trimmed.parse::<reqwest::Url>().map_err(|err| {
            LedgerError::Transport(format!("invalid ledger RPC url `{trimmed}`: {err}"))
        })?;
        let provider = ProviderBuilder::new().on_http(parsed);
        Ok(Self {
            name: format!("rpc:{}", dialect.prefix()),
            provider,
            dialect,
            poll_interval: Duration::from_millis(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn dialect(&self) -> LedgerDialect {
        self.dialect
    }

    async fn request(&self, method: Cow<'static, str>, params: Value) -> LedgerResult<Value> {
        tracing::trace!("[LEDGER] -> {} {}", method, params);
        self.provider
            .raw_request::<Value, Value>(method.clone(), params)
            .await
            .map_err(|err| LedgerError::Rpc {
                method: method.into_owned(),
                message: compact_ledger_error(err),
            })
    }

    async fn privileged(&self, suffix: &str, params: Value) -> LedgerResult<Value> {
        self.request(Cow::Owned(self.dialect.method(suffix)), params)
            .await
    }
}

fn as_str<'a>(method: &str, value: &'a Value) -> LedgerResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("{method}: expected string, got {value}")))
}

fn parse_quantity(method: &str, value: &Value) -> LedgerResult<U256> {
    let raw = as_str(method, value)?;
    to_u256(raw).ok_or_else(|| LedgerError::Decode(format!("{method}: bad quantity `{raw}`")))
}

fn parse_u64(method: &str, value: &Value) -> LedgerResult<u64> {
    let quantity = parse_quantity(method, value)?;
    u64::try_from(quantity)
        .map_err(|_| LedgerError::Decode(format!("{method}: quantity {quantity} exceeds u64")))
}

fn parse_hash(method: &str, value: &Value) -> LedgerResult<B256> {
    let raw = as_str(method, value)?;
    B256::from_str(raw).map_err(|e| LedgerError::Decode(format!("{method}: bad hash `{raw}`: {e}")))
}

fn decode_receipt(tx_hash: B256, receipt: &Value) -> LedgerResult<TxOutcome> {
    const METHOD: &str = "eth_getTransactionReceipt";
    let block_number = match receipt.get("blockNumber") {
        Some(Value::Null) | None => None,
        Some(raw) => Some(parse_u64(METHOD, raw)?),
    };
    // Pre-byzantium receipts carry no status; treat them as successful.
    let success = match receipt.get("status") {
        Some(Value::Null) | None => true,
        Some(raw) => parse_quantity(METHOD, raw)? == U256::from(1u64),
    };
    Ok(TxOutcome {
        tx_hash,
        block_number,
        success,
    })
}

fn storage_override_params(contract: Address, slot: U256, word: B256) -> Value {
    // slot as a minimal quantity, value as a full zero-padded word
    json!([contract, quantity_hex(slot), word_hex(U256::from_be_bytes(word.0))])
}

fn storage_read_params(contract: Address, slot: U256) -> Value {
    json!([contract, quantity_hex(slot), "latest"])
}

fn send_transaction_params(from: Address, call: &Accessor) -> Value {
    json!([{
        "from": from,
        "to": call.contract,
        "data": call.calldata(),
    }])
}

fn call_params(call: &Accessor) -> Value {
    json!([{ "to": call.contract, "data": call.calldata() }, "latest"])
}

fn trace_params(tx_hash: B256) -> Value {
    json!([tx_hash, {
        "disableStorage": true,
        "disableMemory": true,
        "enableMemory": false,
    }])
}

#[async_trait]
impl LedgerClient for RpcLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        let raw = self
            .request(Cow::Borrowed("eth_chainId"), json!([]))
            .await?;
        parse_u64("eth_chainId", &raw)
    }

    async fn default_signer(&self) -> LedgerResult<Account> {
        let raw = self
            .request(Cow::Borrowed("eth_accounts"), json!([]))
            .await?;
        let first = raw
            .as_array()
            .and_then(|accounts| accounts.first())
            .ok_or_else(|| {
                LedgerError::Unsupported("eth_accounts returned no unlocked accounts".to_string())
            })?;
        let raw_addr = as_str("eth_accounts", first)?;
        let address = Address::from_str(raw_addr).map_err(|e| {
            LedgerError::Decode(format!("eth_accounts: bad address `{raw_addr}`: {e}"))
        })?;
        Ok(Account::signer(address))
    }

    async fn impersonate(&self, address: Address) -> LedgerResult<Account> {
        self.privileged("impersonateAccount", json!([address])).await?;
        tracing::debug!("[LEDGER] impersonating {:#x}", address);
        Ok(Account::signer(address))
    }

    async fn stop_impersonating(&self, address: Address) -> LedgerResult<()> {
        self.privileged("stopImpersonatingAccount", json!([address]))
            .await?;
        Ok(())
    }

    async fn set_storage_at(
        &self,
        contract: Address,
        slot: U256,
        word: B256,
    ) -> LedgerResult<()> {
        self.privileged("setStorageAt", storage_override_params(contract, slot, word))
            .await?;
        Ok(())
    }

    async fn get_storage_at(&self, contract: Address, slot: U256) -> LedgerResult<B256> {
        let raw = self
            .request(
                Cow::Borrowed("eth_getStorageAt"),
                storage_read_params(contract, slot),
            )
            .await?;
        let text = as_str("eth_getStorageAt", &raw)?;
        to_word(text)
            .ok_or_else(|| LedgerError::Decode(format!("eth_getStorageAt: bad word `{text}`")))
    }

    async fn set_native_balance(&self, address: Address, amount: U256) -> LedgerResult<()> {
        self.privileged("setBalance", json!([address, quantity_hex(amount)]))
            .await?;
        Ok(())
    }

    async fn send_transaction(&self, from: Address, call: &Accessor) -> LedgerResult<B256> {
        let raw = self
            .request(
                Cow::Borrowed("eth_sendTransaction"),
                send_transaction_params(from, call),
            )
            .await?;
        parse_hash("eth_sendTransaction", &raw)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256) -> LedgerResult<TxOutcome> {
        loop {
            let receipt = self
                .request(
                    Cow::Borrowed("eth_getTransactionReceipt"),
                    json!([tx_hash]),
                )
                .await?;
            if !receipt.is_null() {
                return decode_receipt(tx_hash, &receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn debug_trace_transaction(
        &self,
        tx_hash: B256,
    ) -> LedgerResult<Vec<OpcodeTraceEntry>> {
        let raw = self
            .request(
                Cow::Borrowed("debug_traceTransaction"),
                trace_params(tx_hash),
            )
            .await?;
        decode_struct_logs(&raw)
    }

    async fn call(&self, call: &Accessor) -> LedgerResult<Bytes> {
        let raw = self
            .request(
                Cow::Borrowed("eth_call"),
                call_params(call),
            )
            .await?;
        let text = as_str("eth_call", &raw)?;
        Bytes::from_str(text)
            .map_err(|e| LedgerError::Decode(format!("eth_call: bad return data `{text}`: {e}")))
    }
}
