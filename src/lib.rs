//! Synthetics exchange SDK.
//!
//! # Overview
//!
//! Client-side access to an on-chain perpetuals exchange: batched reads of
//! exchange state, off-chain estimation mirroring the contracts' arithmetic,
//! and transaction payloads ready to be signed elsewhere.
//!
//! Reads go through [`fetch::Fetcher`], which packs the calls of a
//! [`multicall::Request`] into a single Multicall3 round trip, races it against
//! a deadline and retries once against a fallback endpoint.
//! Typed queries on top of it live in [`markets`], [`tokens`], [`positions`],
//! [`fees`] and [`referrals`].
//!
//! [`swap::SwapRoutes`] builds the liquidity graph from a markets snapshot,
//! enumerates candidate swap paths and prices them for a concrete trade size,
//! [`order`] turns the results into exchange router calls.
//!
//! [`subgraph`] reads concentrated-liquidity pool depth from an indexing subgraph.
//!
//! # Limitations/follow-ups
//!
//! * Virtual inventory price impact is not tracked, swap impact is computed from
//!   the market pools only.
//!
//! * Prices come from the oracle keeper REST API only, there is no on-chain
//!   price fallback.
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory transport answering Multicall3 batches
//! and market fixtures for the swap solver.

pub mod abi;
pub mod error;
pub mod fees;
pub mod fetch;
pub mod keys;
pub mod markets;
pub mod multicall;
pub mod num;
pub mod order;
pub mod positions;
pub mod referrals;
pub mod rpc;
pub mod subgraph;
pub mod swap;
pub mod testing;
pub mod tokens;

use alloy::primitives::{Address, U256, address};

pub type ChainId = u64;

pub const ARBITRUM: ChainId = 42161;
pub const AVALANCHE: ChainId = 43114;

/// Multicall3 deployment shared by all supported chains.
pub const MULTICALL3: Address = address!("0xca11bde05977b3631167028862be2a173976ca11");

/// Placeholder address the exchange uses for the chain's native token.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// How execution fees are priced on a chain.
#[derive(Clone, Debug)]
pub struct ExecutionFeeConfig {
    /// Add `eth_maxPriorityFeePerGas` on top of the gas price.
    pub use_max_priority_fee: bool,
    /// Buffer added to the gas price, in basis points.
    pub buffer_bps: u64,
    /// Flat premium added to the gas price, in wei.
    pub gas_price_premium: U256,
    pub max_gas_price: Option<U256>,
}

#[derive(Clone, Debug)]
/// Chain the exchange is deployed on.
pub struct Chain {
    chain_id: ChainId,
    multicall: Address,
    data_store: Address,
    reader: Address,
    referral_storage: Address,
    exchange_router: Address,
    order_vault: Address,
    wrapped_native_token: Address,
    oracle_keeper: String,
    execution_fee: ExecutionFeeConfig,
}

impl Chain {
    pub fn arbitrum() -> Self {
        Self {
            chain_id: ARBITRUM,
            multicall: MULTICALL3,
            data_store: address!("0xfd70de6b91282d8017aa4e741e9ae325cab992d8"),
            reader: address!("0xf60becbba223eea9495da3f606753867ec10d139"),
            referral_storage: address!("0xe6fab3f0c7199b0d34d7fbe83394fc0e0d06e99d"),
            exchange_router: address!("0x7c68c7866a64fa2160f78eeae12217ffbf871fa8"),
            order_vault: address!("0x31ef83a530fde1b38ee9a18093a333d8bbbc40d5"),
            wrapped_native_token: address!("0x82af49447d8a07e3bd95bd0d56f35241523fbab1"),
            oracle_keeper: "https://arbitrum-api.gmxinfra.io".to_string(),
            execution_fee: ExecutionFeeConfig {
                use_max_priority_fee: false,
                buffer_bps: 1000,
                gas_price_premium: U256::ZERO,
                max_gas_price: None,
            },
        }
    }

    pub fn avalanche() -> Self {
        Self {
            chain_id: AVALANCHE,
            multicall: MULTICALL3,
            data_store: address!("0x2f0b22339414aded7d5f06f9d604c7ff5b2fe3f6"),
            reader: address!("0x73ba021acf4bb6741e82690ddb821e7936050f8c"),
            referral_storage: address!("0x827ed045002ecdabeb6e2b0d1604cf5fc3d322f8"),
            exchange_router: address!("0x11e590f6092d557bf71baded50d81521674f8275"),
            order_vault: address!("0xd3d60d22d415ad43b7e64b510d86a30f19b1b12c"),
            wrapped_native_token: address!("0xb31f66aa3c1e785363f0875a1b74e27b85fd66c7"),
            oracle_keeper: "https://avalanche-api.gmxinfra.io".to_string(),
            execution_fee: ExecutionFeeConfig {
                use_max_priority_fee: true,
                buffer_bps: 1000,
                // 3 gwei
                gas_price_premium: U256::from(3_000_000_000u64),
                // 200 gwei
                max_gas_price: Some(U256::from(200_000_000_000u64)),
            },
        }
    }

    /// Known chain preset by id.
    pub fn by_id(chain_id: ChainId) -> Option<Self> {
        match chain_id {
            ARBITRUM => Some(Self::arbitrum()),
            AVALANCHE => Some(Self::avalanche()),
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn custom(
        chain_id: ChainId,
        multicall: Address,
        data_store: Address,
        reader: Address,
        referral_storage: Address,
        exchange_router: Address,
        order_vault: Address,
        wrapped_native_token: Address,
        oracle_keeper: impl Into<String>,
        execution_fee: ExecutionFeeConfig,
    ) -> Self {
        Self {
            chain_id,
            multicall,
            data_store,
            reader,
            referral_storage,
            exchange_router,
            order_vault,
            wrapped_native_token,
            oracle_keeper: oracle_keeper.into(),
            execution_fee,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn multicall(&self) -> Address {
        self.multicall
    }

    pub fn data_store(&self) -> Address {
        self.data_store
    }

    pub fn reader(&self) -> Address {
        self.reader
    }

    pub fn referral_storage(&self) -> Address {
        self.referral_storage
    }

    pub fn exchange_router(&self) -> Address {
        self.exchange_router
    }

    pub fn order_vault(&self) -> Address {
        self.order_vault
    }

    pub fn wrapped_native_token(&self) -> Address {
        self.wrapped_native_token
    }

    /// Base URL of the oracle keeper REST API.
    pub fn oracle_keeper(&self) -> &str {
        &self.oracle_keeper
    }

    pub fn execution_fee(&self) -> &ExecutionFeeConfig {
        &self.execution_fee
    }

    /// Maps the native token placeholder to the wrapped native token.
    pub fn wrapped_address(&self, token: Address) -> Address {
        if token == NATIVE_TOKEN {
            self.wrapped_native_token
        } else {
            token
        }
    }
}
