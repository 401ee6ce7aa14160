use std::collections::BTreeMap;

use alloy::primitives::{address, Address};

use crate::error::{ConfigError, ForgeError, Result};

const UNISWAP_V3_FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
const UNISWAP_V3_ROUTER: Address = address!("E592427A0AEce92De3Edee1F18E0157C05861564");
const UNISWAP_V3_DEFAULT_FEE_TIER: u32 = 500;
const KEEPER: Address = address!("e1829BaD81E9146E18f28E28691D930c052483bA");

pub const ARBITRUM_TESTNET_CHAIN_ID: u64 = 421611;
pub const HARDHAT_CHAIN_ID: u64 = 31337;

/// Environment-specific addresses the caller hands to the engine.
///
/// `whales` maps an asset symbol to a holder used for transfer-based funding.
/// The presets ship none; fork setups register their own with
/// [`NetworkConfig::with_whale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub keeper: Address,
    pub deposit_cap: u64,
    pub uniswap_v3_factory: Address,
    pub uniswap_v3_router: Address,
    pub uniswap_v3_default_fee_tier: u32,
    pub oracles: BTreeMap<String, Address>,
    pub tokens: BTreeMap<String, Address>,
    pub whales: BTreeMap<String, Address>,
}

impl NetworkConfig {
    pub fn arbitrum_testnet() -> Self {
        Self {
            chain_id: ARBITRUM_TESTNET_CHAIN_ID,
            name: "Arbitrum Rinkeby".to_string(),
            keeper: KEEPER,
            deposit_cap: 1_000_000_000,
            uniswap_v3_factory: UNISWAP_V3_FACTORY,
            uniswap_v3_router: UNISWAP_V3_ROUTER,
            uniswap_v3_default_fee_tier: UNISWAP_V3_DEFAULT_FEE_TIER,
            oracles: symbols([
                ("ETH_USD", address!("5f0423B1a6935dc5596e7A24d98532b67A0AeFd8")),
                ("BTC_USD", address!("0c9973e7a27d00e656B9f153348dA46CaD70d03d")),
                ("USDT_USD", address!("b1Ac85E779d05C2901812d812210F6dE144b2df0")),
            ]),
            tokens: symbols([
                ("WETH", address!("FCfbfcC11d12bCf816415794E5dc1BBcc5304e01")),
                ("USDT", address!("237b3B5238D2022aA80cAd1f67dAE53f353F74bF")),
                ("WBTC", address!("F2bf2a5CF00c9121A18d161F6738D39Ab576DB68")),
            ]),
            whales: BTreeMap::new(),
        }
    }

    /// Local hardhat node forking Arbitrum One.
    pub fn hardhat_fork() -> Self {
        Self {
            chain_id: HARDHAT_CHAIN_ID,
            name: "Hardhat (Arbitrum One fork)".to_string(),
            keeper: KEEPER,
            deposit_cap: 1_000_000,
            uniswap_v3_factory: UNISWAP_V3_FACTORY,
            uniswap_v3_router: UNISWAP_V3_ROUTER,
            uniswap_v3_default_fee_tier: UNISWAP_V3_DEFAULT_FEE_TIER,
            oracles: symbols([
                ("CURVE_USD", address!("aebDA2c976cfd1eE1977Eac079B4382acb849325")),
                ("ETH_USD", address!("639Fe6ab55C921f74e7fac1ee960C0B6293ba612")),
                ("BTC_USD", address!("6ce185860a4963106506C203335A2910413708e9")),
                ("USDT_USD", address!("3f3f5dF88dC9F13eac63DF89EC16ef6e7E25DdE7")),
                ("CURVE_QUOTER", address!("2C2FC48c3404a70F2d33290d5820Edf49CBf74a5")),
            ]),
            tokens: BTreeMap::new(),
            whales: BTreeMap::new(),
        }
    }

    pub fn with_whale(mut self, asset: &str, holder: Address) -> Self {
        self.whales.insert(normalize_symbol(asset), holder);
        self
    }

    pub fn with_token(mut self, symbol: &str, token: Address) -> Self {
        self.tokens.insert(normalize_symbol(symbol), token);
        self
    }

    pub fn token(&self, symbol: &str) -> Option<Address> {
        self.tokens.get(&normalize_symbol(symbol)).copied()
    }

    pub fn oracle(&self, symbol: &str) -> Option<Address> {
        self.oracles.get(&normalize_symbol(symbol)).copied()
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid(format!(
                "network `{}` has chain id 0",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "network {} has an empty name",
                self.chain_id
            )));
        }
        for (symbol, holder) in &self.whales {
            if holder.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "network {}: whale for `{symbol}` is the zero address",
                    self.chain_id
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn symbols<const N: usize>(entries: [(&str, Address); N]) -> BTreeMap<String, Address> {
    entries
        .into_iter()
        .map(|(symbol, addr)| (symbol.to_string(), addr))
        .collect()
}

/// Networks the engine may run against, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, NetworkConfig>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known() -> Self {
        let mut registry = Self::new();
        for network in [NetworkConfig::arbitrum_testnet(), NetworkConfig::hardhat_fork()] {
            registry.networks.insert(network.chain_id, network);
        }
        registry
    }

    pub fn register(&mut self, network: NetworkConfig) -> Result<()> {
        if self.networks.contains_key(&network.chain_id) {
            return Err(ConfigError::Invalid(format!(
                "chain id {} registered twice",
                network.chain_id
            ))
            .into());
        }
        self.networks.insert(network.chain_id, network);
        Ok(())
    }

    /// Replace (or add) the entry for `network.chain_id`.
    pub fn upsert(&mut self, network: NetworkConfig) {
        self.networks.insert(network.chain_id, network);
    }

    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(ConfigError::Invalid("network registry is empty".to_string()).into());
        }
        for (chain_id, network) in &self.networks {
            if *chain_id != network.chain_id {
                return Err(ConfigError::Invalid(format!(
                    "network `{}` is keyed under {chain_id} but declares {}",
                    network.name, network.chain_id
                ))
                .into());
            }
            network.validate()?;
        }
        Ok(())
    }

    pub fn resolve(&self, chain_id: u64) -> Result<&NetworkConfig> {
        self.networks
            .get(&chain_id)
            .ok_or(ForgeError::UnsupportedNetwork { chain_id })
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.networks.keys().copied()
    }
}
