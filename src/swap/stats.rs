use alloy::primitives::{Address, I256, U256};

use super::impact::{apply_swap_impact_with_cap, impact_amount_usd, price_impact_for_swap};
use crate::{
    markets::MarketInfo,
    num::{apply_factor, convert_to_token_amount, convert_to_usd, to_signed, to_unsigned},
};

/// Outcome of a single swap through a market.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub market: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub usd_in: U256,
    pub usd_out: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub swap_fee_usd: U256,
    pub swap_fee_amount: U256,
    /// Impact after the impact pool cap, positive is a rebate.
    pub price_impact_delta_usd: I256,
    /// The market can not pay `usd_out` out of its available liquidity.
    pub is_out_liquidity: bool,
}

/// Simulates swapping `usd_in` worth of `token_in` for `token_out`.
///
/// Token addresses are wrapped collateral addresses. The input is valued at
/// the min price and the output at the max price. A swap the pools can not
/// take reports `is_out_liquidity` with zero output. `None` if the market does
/// not trade the tokens or a price is zero.
pub fn swap_stats(
    info: &MarketInfo,
    token_in: Address,
    token_out: Address,
    usd_in: U256,
    apply_price_impact: bool,
) -> Option<SwapStats> {
    let in_side = info.market.pool_side(token_in)?;
    let out_side = info.market.pool_side(token_out)?;
    let (token_in_data, token_out_data) = (info.collateral(in_side), info.collateral(out_side));
    let (price_in, price_out) = (token_in_data.prices.min, token_out_data.prices.max);

    let amount_in = convert_to_token_amount(usd_in, token_in_data.decimals, price_in)?;
    let mut stats = SwapStats {
        market: info.address(),
        token_in,
        token_out,
        usd_in,
        amount_in,
        ..Default::default()
    };

    let Some(impact_usd) = price_impact_for_swap(info, token_in, token_out, to_signed(usd_in), -to_signed(usd_in))
    else {
        stats.is_out_liquidity = true;
        return Some(stats);
    };

    let fee_factor = if impact_usd.is_positive() {
        info.swap_fee_factor_for_positive_impact
    } else {
        info.swap_fee_factor_for_negative_impact
    };
    stats.swap_fee_amount = apply_factor(amount_in, fee_factor);
    stats.swap_fee_usd = apply_factor(usd_in, fee_factor);

    stats.price_impact_delta_usd = if impact_usd.is_positive() {
        let amount = apply_swap_impact_with_cap(info, token_out, impact_usd)?;
        impact_amount_usd(info, token_out, amount, price_out)?
    } else {
        let amount = apply_swap_impact_with_cap(info, token_in, impact_usd)?;
        impact_amount_usd(info, token_in, amount, price_in)?
    };

    let usd_in_after_fees = to_signed(usd_in.saturating_sub(stats.swap_fee_usd));
    let usd_out = if apply_price_impact {
        to_unsigned(usd_in_after_fees + stats.price_impact_delta_usd)
    } else {
        to_unsigned(usd_in_after_fees)
    };

    stats.amount_out = convert_to_token_amount(usd_out, token_out_data.decimals, price_out)?;
    stats.usd_out = convert_to_usd(stats.amount_out, token_out_data.decimals, price_out);
    stats.is_out_liquidity = info.available_usd_liquidity(out_side) < stats.usd_out;
    Some(stats)
}
