//! Fixed-point arithmetic shared by the exchange math.
//!
//! USD values and factors carry [`USD_DECIMALS`] decimals, token prices are USD per whole
//! token scaled the same way, so `usd = amount * price / 10^token_decimals`.

use alloy::primitives::{I256, U256};
use fastnum::{
    bint,
    decimal::{Context, Decimal, RoundingMode, UnsignedDecimal},
};

pub const USD_DECIMALS: u8 = 30;

/// `10^30`, the scale of USD values and factors.
pub const PRECISION: U256 = U256::from_limbs([0x4674edea40000000, 0xc9f2c9cd0, 0, 0]);

pub const BASIS_POINTS_DIVISOR: u64 = 10_000;

/// `10^decimals`.
pub fn expand_decimals(decimals: u8) -> U256 {
    U256::from(10u8).pow(U256::from(decimals))
}

pub fn apply_factor(value: U256, factor: U256) -> U256 {
    value * factor / PRECISION
}

pub fn convert_to_usd(amount: U256, decimals: u8, price: U256) -> U256 {
    amount * price / expand_decimals(decimals)
}

pub fn convert_to_usd_signed(amount: I256, decimals: u8, price: U256) -> I256 {
    amount * to_signed(price) / to_signed(expand_decimals(decimals))
}

/// Token amount worth `usd` at `price`, `None` for a zero price.
pub fn convert_to_token_amount(usd: U256, decimals: u8, price: U256) -> Option<U256> {
    if price.is_zero() {
        return None;
    }
    Some(usd * expand_decimals(decimals) / price)
}

/// Division rounding away from zero.
pub fn round_up_magnitude_division(value: I256, divisor: U256) -> I256 {
    let divisor = to_signed(divisor);
    if value.is_negative() {
        (value - divisor + I256::ONE) / divisor
    } else {
        (value + divisor - I256::ONE) / divisor
    }
}

pub fn to_signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

/// Clamps negative values to zero.
pub fn to_unsigned(value: I256) -> U256 {
    if value.is_negative() {
        U256::ZERO
    } else {
        value.into_raw()
    }
}

pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b { a - b } else { b - a }
}

pub(crate) fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}

pub(crate) fn from_f64(value: f64) -> U256 {
    if !value.is_finite() || value <= 0.0 {
        return U256::ZERO;
    }
    U256::from_str_radix(&format!("{value:.0}"), 10).unwrap_or(U256::MAX)
}

/// Fixed-point to decimal converter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: i32,
}

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    pub fn usd() -> Self {
        Self::new(USD_DECIMALS)
    }

    /// `None` if the value does not fit into `N` words.
    pub fn from_unsigned<const N: usize>(&self, value: U256) -> Option<UnsignedDecimal<N>> {
        let unscaled = bint::UInt::<N>::from_le_slice(value.as_le_slice())?;
        Some(UnsignedDecimal::<N>::from_parts(
            unscaled,
            -self.decimals,
            Context::default().with_rounding_mode(RoundingMode::Floor),
        ))
    }

    /// `None` if the value does not fit into `N` words.
    pub fn from_signed<const N: usize>(&self, value: I256) -> Option<Decimal<N>> {
        let unscaled = bint::UInt::<N>::from_le_slice(value.unsigned_abs().as_le_slice())?;
        Some(Decimal::<N>::from_parts(
            unscaled,
            -self.decimals,
            match value.sign() {
                alloy::primitives::Sign::Negative => fastnum::decimal::Sign::Minus,
                alloy::primitives::Sign::Positive => fastnum::decimal::Sign::Plus,
            },
            Context::default().with_rounding_mode(RoundingMode::Floor),
        ))
    }

    pub fn to_unsigned<const N: usize>(&self, value: UnsignedDecimal<N>) -> U256 {
        let rescaled = value.rescale(self.decimals as i16);
        U256::from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
    }
}
