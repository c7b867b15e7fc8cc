//! Markets state.
//!
//! [`fetch_markets`] lists market descriptors from the reader contract,
//! [`fetch_markets_info`] reads pools, open interest and swap configuration of
//! every market in a single batch and joins them with token prices into
//! [`MarketsInfoData`], the snapshot consumed by [`crate::swap`].
//!
//! [`MarketsCache`] keeps the latest snapshot per chain.

mod cache;
mod info;
mod liquidity;

pub use cache::*;
pub use info::*;
pub use liquidity::*;

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

use crate::{
    NATIVE_TOKEN,
    swap::{MarketsGraph, SwapEstimator, SwapStats, swap_stats},
    tokens::{TokenData, TokensData},
};

/// Market descriptor as listed by the reader contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Market {
    pub market_token: Address,
    pub index_token: Address,
    pub long_token: Address,
    pub short_token: Address,
}

impl Market {
    pub fn new(market_token: Address, index_token: Address, long_token: Address, short_token: Address) -> Self {
        Self {
            market_token,
            index_token,
            long_token,
            short_token,
        }
    }

    pub fn is_same_collaterals(&self) -> bool {
        self.long_token == self.short_token
    }

    /// Swap-only markets have no index token.
    pub fn is_spot_only(&self) -> bool {
        self.index_token == Address::ZERO
    }

    /// `Some(true)` for the long collateral, `Some(false)` for the short one.
    pub fn pool_side(&self, token: Address) -> Option<bool> {
        if token == self.long_token {
            Some(true)
        } else if token == self.short_token {
            Some(false)
        } else {
            None
        }
    }

    /// Collateral a swap of `token` through this market ends up in.
    pub fn opposite_collateral(&self, token: Address) -> Option<Address> {
        if token == self.long_token {
            Some(self.short_token)
        } else if token == self.short_token {
            Some(self.long_token)
        } else {
            None
        }
    }
}

/// Market descriptor joined with its tokens and on-chain pool state.
///
/// Amounts are in token units, USD values and factors carry 30 decimals.
#[derive(Clone, Debug)]
pub struct MarketInfo {
    pub market: Market,
    pub is_disabled: bool,

    pub long_token: TokenData,
    pub short_token: TokenData,
    pub index_token: TokenData,

    pub long_pool_amount: U256,
    pub short_pool_amount: U256,

    pub reserve_factor_long: U256,
    pub reserve_factor_short: U256,

    pub swap_impact_factor_positive: U256,
    pub swap_impact_factor_negative: U256,
    pub swap_impact_exponent_factor: U256,

    pub swap_fee_factor_for_positive_impact: U256,
    pub swap_fee_factor_for_negative_impact: U256,

    pub swap_impact_pool_amount_long: U256,
    pub swap_impact_pool_amount_short: U256,

    pub long_interest_in_tokens: U256,
    pub short_interest_usd: U256,
}

impl MarketInfo {
    pub fn address(&self) -> Address {
        self.market.market_token
    }

    /// Collateral or index token data by address.
    pub fn token(&self, address: Address) -> Option<&TokenData> {
        if address == self.long_token.address {
            Some(&self.long_token)
        } else if address == self.short_token.address {
            Some(&self.short_token)
        } else if address == self.index_token.address {
            Some(&self.index_token)
        } else {
            None
        }
    }

    pub fn collateral(&self, is_long: bool) -> &TokenData {
        if is_long { &self.long_token } else { &self.short_token }
    }
}

/// Snapshot of all markets of a chain along with the tokens they trade.
#[derive(Clone, Debug, Default)]
pub struct MarketsInfoData {
    markets: HashMap<Address, MarketInfo>,
    order: Vec<Address>,
    tokens: TokensData,
    wrapped_native_token: Address,
}

impl MarketsInfoData {
    pub fn new(markets: Vec<MarketInfo>, tokens: TokensData, wrapped_native_token: Address) -> Self {
        let mut data = Self {
            markets: HashMap::with_capacity(markets.len()),
            order: Vec::with_capacity(markets.len()),
            tokens,
            wrapped_native_token,
        };
        for market in markets {
            let address = market.address();
            if data.markets.insert(address, market).is_none() {
                data.order.push(address);
            }
        }
        data
    }

    pub fn get(&self, market: Address) -> Option<&MarketInfo> {
        self.markets.get(&market)
    }

    /// Markets in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &MarketInfo> {
        self.order.iter().filter_map(|address| self.markets.get(address))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn tokens(&self) -> &TokensData {
        &self.tokens
    }

    pub fn wrapped_native_token(&self) -> Address {
        self.wrapped_native_token
    }

    /// Swap graph over enabled markets.
    pub fn graph(&self) -> MarketsGraph {
        MarketsGraph::build(self.iter().filter(|info| !info.is_disabled).map(|info| &info.market))
    }

    fn wrapped(&self, token: Address) -> Address {
        if token == NATIVE_TOKEN {
            self.wrapped_native_token
        } else {
            token
        }
    }
}

impl SwapEstimator for MarketsInfoData {
    fn market(&self, market: Address) -> Option<&Market> {
        self.get(market).map(|info| &info.market)
    }

    fn available_liquidity(&self, market: Address, token_out: Address) -> Option<U256> {
        let info = self.get(market)?;
        let is_long = info.market.pool_side(self.wrapped(token_out))?;
        Some(info.available_usd_liquidity(is_long))
    }

    fn swap_stats(
        &self,
        market: Address,
        token_in: Address,
        token_out: Address,
        usd_in: U256,
        apply_price_impact: bool,
    ) -> Option<SwapStats> {
        let info = self.get(market)?;
        let mut stats = swap_stats(
            info,
            self.wrapped(token_in),
            self.wrapped(token_out),
            usd_in,
            apply_price_impact,
        )?;
        stats.token_in = token_in;
        stats.token_out = token_out;
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const MARKET: Address = address!("0x00000000000000000000000000000000000000aa");
    const ETH: Address = address!("0x0000000000000000000000000000000000000e17");
    const USDC: Address = address!("0x00000000000000000000000000000000000005dc");

    #[test]
    fn test_market_sides() {
        let market = Market::new(MARKET, ETH, ETH, USDC);

        assert!(!market.is_same_collaterals());
        assert!(!market.is_spot_only());
        assert_eq!(market.pool_side(ETH), Some(true));
        assert_eq!(market.pool_side(USDC), Some(false));
        assert_eq!(market.pool_side(MARKET), None);
        assert_eq!(market.opposite_collateral(ETH), Some(USDC));
        assert_eq!(market.opposite_collateral(USDC), Some(ETH));
        assert_eq!(market.opposite_collateral(MARKET), None);

        let single = Market::new(MARKET, ETH, ETH, ETH);
        assert!(single.is_same_collaterals());
        assert_eq!(single.opposite_collateral(ETH), Some(ETH));

        let spot = Market::new(MARKET, Address::ZERO, ETH, USDC);
        assert!(spot.is_spot_only());
    }
}
