//! Swap price impact, following the exchange's `SwapPricingUtils`.
//!
//! Impact rewards swaps that move the pools of a market towards balance and
//! penalizes those moving them apart: `f(diff) = diff^exponent * factor`, where
//! `diff` is the USD difference between the long and short pools.

use alloy::primitives::{Address, I256, U256};

use crate::{
    markets::{MarketInfo, PriceSide},
    num::{
        USD_DECIMALS, apply_factor, convert_to_usd, expand_decimals, from_f64, round_up_magnitude_division, to_f64,
        to_signed,
    },
};

/// Fraction digits of USD values carried through the floating point power.
const FRACTION_DIGITS: u8 = 12;

/// `(diff / 1e30)^(exponent / 1e30) * 1e30 * factor / 1e30`.
///
/// The power is taken in floating point like the reference client does,
/// results are exact enough for estimation only.
pub fn apply_impact_factor(diff: U256, factor: U256, exponent: U256) -> U256 {
    // Integer part is divided out first so whole USD values stay exact in f64.
    let unit = expand_decimals(USD_DECIMALS - FRACTION_DIGITS);
    let scale = 10f64.powi(FRACTION_DIGITS as i32);

    let base = to_f64(diff / unit) / scale;
    let exponent = to_f64(exponent / unit) / scale;
    apply_factor(from_f64(base.powf(exponent) * scale) * unit, factor)
}

/// Signed impact of moving pools from `current` to `next` USD values.
pub fn price_impact_usd(
    current_long_usd: U256,
    current_short_usd: U256,
    next_long_usd: U256,
    next_short_usd: U256,
    factor_positive: U256,
    factor_negative: U256,
    exponent: U256,
) -> I256 {
    let current_diff = current_long_usd.abs_diff(current_short_usd);
    let next_diff = next_long_usd.abs_diff(next_short_usd);

    let is_same_side_rebalance = (current_long_usd < current_short_usd) == (next_long_usd < next_short_usd);
    if is_same_side_rebalance {
        let has_positive_impact = next_diff < current_diff;
        let factor = if has_positive_impact { factor_positive } else { factor_negative };
        let delta = to_signed(
            apply_impact_factor(current_diff, factor, exponent)
                .abs_diff(apply_impact_factor(next_diff, factor, exponent)),
        );
        if has_positive_impact { delta } else { -delta }
    } else {
        let positive = to_signed(apply_impact_factor(current_diff, factor_positive, exponent));
        let negative = to_signed(apply_impact_factor(next_diff, factor_negative, exponent));
        positive - negative
    }
}

/// Impact of adding `delta_a` USD of `token_a` and `delta_b` USD of `token_b`
/// to the market pools, valued at mid prices.
///
/// `None` if a token is not a collateral of the market, both tokens sit on the
/// same side of a two-collateral market, or a pool would turn negative.
pub fn price_impact_for_swap(
    info: &MarketInfo,
    token_a: Address,
    token_b: Address,
    delta_a: I256,
    delta_b: I256,
) -> Option<I256> {
    let side_a = info.market.pool_side(token_a)?;
    let side_b = info.market.pool_side(token_b)?;
    if side_a == side_b && !info.market.is_same_collaterals() {
        return None;
    }

    let (long_delta, short_delta) = if side_a { (delta_a, delta_b) } else { (delta_b, delta_a) };

    let long_usd = info.pool_usd(true, PriceSide::Mid);
    let short_usd = info.pool_usd(false, PriceSide::Mid);
    let next_long = to_signed(long_usd) + long_delta;
    let next_short = to_signed(short_usd) + short_delta;
    if next_long.is_negative() || next_short.is_negative() {
        return None;
    }

    Some(price_impact_usd(
        long_usd,
        short_usd,
        next_long.into_raw(),
        next_short.into_raw(),
        info.swap_impact_factor_positive,
        info.swap_impact_factor_negative,
        info.swap_impact_exponent_factor,
    ))
}

/// Token amount the impact is worth.
///
/// Positive impact is paid in `token` at its max price out of the market's
/// impact pool and capped by it, negative impact is charged at the min price
/// rounded up in magnitude.
pub fn apply_swap_impact_with_cap(info: &MarketInfo, token: Address, impact_usd: I256) -> Option<I256> {
    let is_long = info.market.pool_side(token)?;
    let token_data = info.collateral(is_long);
    let price = if impact_usd.is_positive() {
        token_data.prices.max
    } else {
        token_data.prices.min
    };
    if price.is_zero() {
        return None;
    }

    let scaled = impact_usd * to_signed(expand_decimals(token_data.decimals));
    if impact_usd.is_positive() {
        let amount = scaled.into_raw() / price;
        let pool = if is_long {
            info.swap_impact_pool_amount_long
        } else {
            info.swap_impact_pool_amount_short
        };
        Some(to_signed(amount.min(pool)))
    } else {
        Some(round_up_magnitude_division(scaled, price))
    }
}

/// USD value of a signed token amount of the collateral `token`.
pub(crate) fn impact_amount_usd(info: &MarketInfo, token: Address, amount: I256, price: U256) -> Option<I256> {
    let is_long = info.market.pool_side(token)?;
    let decimals = info.collateral(is_long).decimals;
    let usd = to_signed(convert_to_usd(amount.unsigned_abs(), decimals, price));
    Some(if amount.is_negative() { -usd } else { usd })
}
