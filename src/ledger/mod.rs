//! Host-ledger primitives the engine is built on.
//!
//! Everything here is privileged test/fork functionality (impersonation, raw
//! storage overrides, native balance overrides). Pointing a [`LedgerClient`] at
//! a production network is a caller error the engine does not detect.

pub mod local;
pub mod rpc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

use crate::error::LedgerResult;
use crate::trace::OpcodeTraceEntry;

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// An address plus whether the engine may sign for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Account {
    pub address: Address,
    pub impersonable: bool,
}

impl Account {
    pub fn signer(address: Address) -> Self {
        Self {
            address,
            impersonable: true,
        }
    }

    pub fn watch_only(address: Address) -> Self {
        Self {
            address,
            impersonable: false,
        }
    }
}

/// A read call whose single-word return value is the quantity being forced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    pub contract: Address,
    pub selector: [u8; 4],
    /// ABI-encoded arguments, without the selector.
    pub args: Bytes,
}

impl Accessor {
    pub fn new(contract: Address, selector: [u8; 4], args: Bytes) -> Self {
        Self {
            contract,
            selector,
            args,
        }
    }

    /// `contract.balanceOf(holder)`.
    pub fn balance_of(contract: Address, holder: Address) -> Self {
        let calldata = IERC20::balanceOfCall { owner: holder }.abi_encode();
        Self::new(
            contract,
            IERC20::balanceOfCall::SELECTOR,
            Bytes::copy_from_slice(&calldata[4..]),
        )
    }

    pub fn calldata(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.args.len());
        out.extend_from_slice(&self.selector);
        out.extend_from_slice(&self.args);
        Bytes::from(out)
    }

    /// The `index`-th 32-byte argument word, if present.
    pub fn arg_word(&self, index: usize) -> Option<B256> {
        let start = index.checked_mul(32)?;
        let end = start.checked_add(32)?;
        self.args.get(start..end).map(B256::from_slice)
    }

    /// The holder encoded in the first argument word (its low 20 bytes).
    pub fn holder(&self) -> Option<Address> {
        self.arg_word(0)
            .map(|word| Address::from_slice(&word.as_slice()[12..]))
    }

    /// Decode the accessor's return data as exactly one 256-bit word.
    pub fn decode_word(output: &[u8]) -> Option<U256> {
        let word: &[u8; 32] = output.try_into().ok()?;
        Some(U256::from_be_bytes(*word))
    }
}

/// Inclusion result of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn name(&self) -> &str;

    async fn chain_id(&self) -> LedgerResult<u64>;

    /// An account the ledger signs for without impersonation (first unlocked account).
    async fn default_signer(&self) -> LedgerResult<Account>;

    async fn impersonate(&self, address: Address) -> LedgerResult<Account>;

    async fn stop_impersonating(&self, address: Address) -> LedgerResult<()>;

    async fn set_storage_at(&self, contract: Address, slot: U256, word: B256)
        -> LedgerResult<()>;

    async fn get_storage_at(&self, contract: Address, slot: U256) -> LedgerResult<B256>;

    async fn set_native_balance(&self, address: Address, amount: U256) -> LedgerResult<()>;

    /// Submit `call` as a state-changing transaction signed by `from`.
    async fn send_transaction(&self, from: Address, call: &Accessor) -> LedgerResult<B256>;

    async fn wait_for_inclusion(&self, tx_hash: B256) -> LedgerResult<TxOutcome>;

    async fn debug_trace_transaction(&self, tx_hash: B256)
        -> LedgerResult<Vec<OpcodeTraceEntry>>;

    /// Read-only call against latest state.
    async fn call(&self, call: &Accessor) -> LedgerResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_balance_of_accessor_encodes_selector_and_holder() {
        let token = address!("FF970A61A04b1cA14834A43f5dE4533eBDDB5CC8");
        let holder = address!("49C50Bf6235cD88Bb9260B496521d6980874468B");
        let accessor = Accessor::balance_of(token, holder);

        assert_eq!(accessor.selector, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(accessor.args.len(), 32);
        assert_eq!(accessor.holder(), Some(holder));
        assert_eq!(accessor.calldata().len(), 36);
        assert_eq!(accessor.arg_word(1), None);
    }

    #[test]
    fn test_decode_word_requires_exactly_one_word() {
        assert_eq!(Accessor::decode_word(&[0u8; 31]), None);
        let mut out = [0u8; 64];
        out[31] = 7;
        assert_eq!(Accessor::decode_word(&out), None, "trailing data rejected");
        assert_eq!(Accessor::decode_word(&out[..32]), Some(U256::from(7u64)));
        assert_eq!(Accessor::decode_word(&[]), None);
    }
}
