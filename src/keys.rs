//! Data store keys.
//!
//! Every value the exchange keeps in its `DataStore` lives under
//! `keccak256(abi.encode(..))` of a string tag and the entity it belongs to.

use alloy::primitives::{Address, B256, keccak256};
use alloy_sol_types::{SolType, SolValue, abi::TokenSeq};

pub fn hash_string(value: &str) -> B256 {
    keccak256((value.to_string(),).abi_encode_params())
}

pub fn hash_data<T>(values: &T) -> B256
where
    T: SolValue,
    for<'a> <T::SolType as SolType>::Token<'a>: TokenSeq<'a>,
{
    keccak256(values.abi_encode_params())
}

fn tag(name: &str) -> B256 {
    hash_string(name)
}

pub fn pool_amount(market: Address, token: Address) -> B256 {
    hash_data(&(tag("POOL_AMOUNT"), market, token))
}

pub fn swap_impact_factor(market: Address, is_positive: bool) -> B256 {
    hash_data(&(tag("SWAP_IMPACT_FACTOR"), market, is_positive))
}

pub fn swap_impact_exponent_factor(market: Address) -> B256 {
    hash_data(&(tag("SWAP_IMPACT_EXPONENT_FACTOR"), market))
}

pub fn swap_fee_factor(market: Address, for_positive_impact: bool) -> B256 {
    hash_data(&(tag("SWAP_FEE_FACTOR"), market, for_positive_impact))
}

pub fn swap_impact_pool_amount(market: Address, token: Address) -> B256 {
    hash_data(&(tag("SWAP_IMPACT_POOL_AMOUNT"), market, token))
}

pub fn reserve_factor(market: Address, is_long: bool) -> B256 {
    hash_data(&(tag("RESERVE_FACTOR"), market, is_long))
}

pub fn open_interest(market: Address, collateral_token: Address, is_long: bool) -> B256 {
    hash_data(&(tag("OPEN_INTEREST"), market, collateral_token, is_long))
}

pub fn open_interest_in_tokens(market: Address, collateral_token: Address, is_long: bool) -> B256 {
    hash_data(&(tag("OPEN_INTEREST_IN_TOKENS"), market, collateral_token, is_long))
}

pub fn is_market_disabled(market: Address) -> B256 {
    hash_data(&(tag("IS_MARKET_DISABLED"), market))
}

pub fn account_position_list(account: Address) -> B256 {
    hash_data(&(tag("ACCOUNT_POSITION_LIST"), account))
}

/// Key a position is stored under in the data store.
pub fn position(account: Address, market: Address, collateral_token: Address, is_long: bool) -> B256 {
    hash_data(&(account, market, collateral_token, is_long))
}

pub fn deposit_gas_limit(single_token: bool) -> B256 {
    hash_data(&(tag("DEPOSIT_GAS_LIMIT"), single_token))
}

pub fn withdrawal_gas_limit() -> B256 {
    hash_data(&(tag("WITHDRAWAL_GAS_LIMIT"),))
}

pub fn single_swap_gas_limit() -> B256 {
    tag("SINGLE_SWAP_GAS_LIMIT")
}

pub fn swap_order_gas_limit() -> B256 {
    tag("SWAP_ORDER_GAS_LIMIT")
}

pub fn increase_order_gas_limit() -> B256 {
    tag("INCREASE_ORDER_GAS_LIMIT")
}

pub fn decrease_order_gas_limit() -> B256 {
    tag("DECREASE_ORDER_GAS_LIMIT")
}

pub fn estimated_gas_fee_base_amount() -> B256 {
    tag("ESTIMATED_GAS_FEE_BASE_AMOUNT")
}

pub fn estimated_gas_fee_multiplier_factor() -> B256 {
    tag("ESTIMATED_GAS_FEE_MULTIPLIER_FACTOR")
}
