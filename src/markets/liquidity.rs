use alloy::primitives::U256;

use super::MarketInfo;
use crate::num::{PRECISION, convert_to_usd};

/// Which side of the token price to value a pool at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceSide {
    Min,
    Max,
    Mid,
}

impl MarketInfo {
    pub fn pool_amount(&self, is_long: bool) -> U256 {
        if is_long {
            self.long_pool_amount
        } else {
            self.short_pool_amount
        }
    }

    pub fn reserve_factor(&self, is_long: bool) -> U256 {
        if is_long {
            self.reserve_factor_long
        } else {
            self.reserve_factor_short
        }
    }

    pub fn pool_usd(&self, is_long: bool, side: PriceSide) -> U256 {
        let token = self.collateral(is_long);
        let price = match side {
            PriceSide::Min => token.prices.min,
            PriceSide::Max => token.prices.max,
            PriceSide::Mid => token.prices.mid(),
        };
        convert_to_usd(self.pool_amount(is_long), token.decimals, price)
    }

    /// USD backing open positions of the side.
    pub fn reserved_usd(&self, is_long: bool) -> U256 {
        if is_long {
            convert_to_usd(
                self.long_interest_in_tokens,
                self.index_token.decimals,
                self.index_token.prices.max,
            )
        } else {
            self.short_interest_usd
        }
    }

    /// USD value of the collateral pool that can leave the market,
    /// the pool at min price less what the reserve factor keeps for open interest.
    pub fn available_usd_liquidity(&self, is_long: bool) -> U256 {
        let pool_usd = self.pool_usd(is_long, PriceSide::Min);
        if self.market.is_spot_only() {
            return pool_usd;
        }

        let reserve_factor = self.reserve_factor(is_long);
        if reserve_factor.is_zero() {
            return U256::ZERO;
        }

        let min_pool_usd = self.reserved_usd(is_long) * PRECISION / reserve_factor;
        pool_usd.saturating_sub(min_pool_usd)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;
    use crate::{num::expand_decimals, testing::MarketInfoBuilder};

    fn usd(value: u64) -> U256 {
        U256::from(value) * PRECISION
    }

    #[test]
    fn test_pool_usd_uses_requested_price() {
        let info = MarketInfoBuilder::eth_usdc(address!("0x00000000000000000000000000000000000000aa"))
            .eth_prices(usd(1999), usd(2001))
            .pools(expand_decimals(18) * U256::from(10), U256::from(50_000) * expand_decimals(6))
            .build();

        assert_eq!(info.pool_usd(true, PriceSide::Min), usd(19_990));
        assert_eq!(info.pool_usd(true, PriceSide::Max), usd(20_010));
        assert_eq!(info.pool_usd(true, PriceSide::Mid), usd(20_000));
        assert_eq!(info.pool_usd(false, PriceSide::Min), usd(50_000));
    }

    #[test]
    fn test_available_liquidity_accounts_for_reserves() {
        let info = MarketInfoBuilder::eth_usdc(address!("0x00000000000000000000000000000000000000aa"))
            .eth_prices(usd(2000), usd(2000))
            .pools(expand_decimals(18) * U256::from(10), U256::from(50_000) * expand_decimals(6))
            // 50% reserve factor on both sides
            .reserve_factors(PRECISION / U256::from(2), PRECISION / U256::from(2))
            // 2 ETH long open interest, $10k short open interest
            .open_interest(expand_decimals(18) * U256::from(2), usd(10_000))
            .build();

        // $20k pool, $4k reserved needs $8k kept
        assert_eq!(info.available_usd_liquidity(true), usd(12_000));
        // $50k pool, $10k reserved needs $20k kept
        assert_eq!(info.available_usd_liquidity(false), usd(30_000));
    }

    #[test]
    fn test_available_liquidity_edge_cases() {
        let market = address!("0x00000000000000000000000000000000000000aa");

        let zero_reserve = MarketInfoBuilder::eth_usdc(market)
            .reserve_factors(U256::ZERO, PRECISION)
            .build();
        assert_eq!(zero_reserve.available_usd_liquidity(true), U256::ZERO);

        let over_reserved = MarketInfoBuilder::eth_usdc(market)
            .eth_prices(usd(2000), usd(2000))
            .pools(expand_decimals(18), U256::ZERO)
            .reserve_factors(PRECISION / U256::from(2), PRECISION)
            .open_interest(expand_decimals(18) * U256::from(5), U256::ZERO)
            .build();
        assert_eq!(over_reserved.available_usd_liquidity(true), U256::ZERO);

        let spot = MarketInfoBuilder::eth_usdc(market)
            .spot_only()
            .eth_prices(usd(2000), usd(2000))
            .pools(expand_decimals(18), U256::ZERO)
            .reserve_factors(U256::ZERO, U256::ZERO)
            .build();
        assert_eq!(spot.available_usd_liquidity(true), usd(2000));
    }
}
