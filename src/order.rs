//! Order transactions.
//!
//! Orders are created through `ExchangeRouter.multicall`: collateral and the
//! execution fee are sent to the order vault first, then `createOrder` picks
//! them up. The payloads built here are ready to be signed and sent elsewhere.

use alloy::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::SolCall,
};
use tracing::debug;

use crate::{
    Chain, NATIVE_TOKEN,
    abi::exchange_router::ExchangeRouter::{
        self, CreateOrderParams, CreateOrderParamsAddresses, CreateOrderParamsNumbers,
    },
    error::DexError,
    num::{BASIS_POINTS_DIVISOR, expand_decimals},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderType {
    /// Cancelled if the min output amount can not be fulfilled.
    MarketSwap = 0,
    LimitSwap = 1,
    MarketIncrease = 2,
    LimitIncrease = 3,
    MarketDecrease = 4,
    LimitDecrease = 5,
    StopLossDecrease = 6,
    Liquidation = 7,
}

impl OrderType {
    pub fn is_market(&self) -> bool {
        matches!(self, Self::MarketSwap | Self::MarketIncrease | Self::MarketDecrease)
    }

    pub fn is_increase(&self) -> bool {
        matches!(self, Self::MarketIncrease | Self::LimitIncrease)
    }

    pub fn is_decrease(&self) -> bool {
        matches!(
            self,
            Self::MarketDecrease | Self::LimitDecrease | Self::StopLossDecrease | Self::Liquidation
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DecreasePositionSwapType {
    #[default]
    NoSwap = 0,
    SwapPnlTokenToCollateralToken = 1,
    SwapCollateralTokenToPnlToken = 2,
}

/// Longs pay the max price on increase, shorts on decrease.
pub fn should_use_max_price(is_increase: bool, is_long: bool) -> bool {
    if is_increase { is_long } else { !is_long }
}

/// Moves the acceptable price against the trader by `allowed_slippage_bps`.
pub fn apply_slippage_to_price(allowed_slippage_bps: u64, price: U256, is_increase: bool, is_long: bool) -> U256 {
    let slippage_bps = if should_use_max_price(is_increase, is_long) {
        BASIS_POINTS_DIVISOR + allowed_slippage_bps
    } else {
        BASIS_POINTS_DIVISOR.saturating_sub(allowed_slippage_bps)
    };
    price * U256::from(slippage_bps) / U256::from(BASIS_POINTS_DIVISOR)
}

/// USD price per whole token to the per-unit precision the contracts use.
pub fn convert_to_contract_price(price: U256, token_decimals: u8) -> U256 {
    price / expand_decimals(token_decimals)
}

/// Unsigned `ExchangeRouter.multicall` transaction.
#[derive(Clone, derive_more::Debug)]
pub struct OrderTransaction {
    pub to: Address,
    /// Native token to attach.
    pub value: U256,
    /// Encoded router calls in execution order.
    #[debug("{} calls", calls.len())]
    pub calls: Vec<Bytes>,
    /// Encoded `multicall(calls)`.
    #[debug(skip)]
    pub data: Bytes,
}

impl OrderTransaction {
    fn new(chain: &Chain, value: U256, calls: Vec<Bytes>) -> Self {
        let data = ExchangeRouter::multicallCall { data: calls.clone() }.abi_encode().into();
        Self {
            to: chain.exchange_router(),
            value,
            calls,
            data,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IncreaseOrderParams {
    pub account: Address,
    pub market: Address,
    /// The native token placeholder pays with native token.
    pub initial_collateral_token: Address,
    pub initial_collateral_amount: U256,
    pub swap_path: Vec<Address>,
    pub size_delta_usd: U256,
    pub acceptable_price: U256,
    pub trigger_price: Option<U256>,
    pub is_long: bool,
    pub order_type: OrderType,
    pub execution_fee: U256,
    pub allowed_slippage_bps: u64,
    pub referral_code: Option<B256>,
    pub index_token_decimals: u8,
}

pub fn create_increase_order_txn(chain: &Chain, params: &IncreaseOrderParams) -> Result<OrderTransaction, DexError> {
    if !params.order_type.is_increase() {
        return Err(DexError::InvalidRequest(format!(
            "{:?} is not an increase order",
            params.order_type
        )));
    }

    let order_vault = chain.order_vault();
    let is_native_payment = params.initial_collateral_token == NATIVE_TOKEN;
    let wnt_amount = if is_native_payment {
        params.initial_collateral_amount + params.execution_fee
    } else {
        params.execution_fee
    };

    let acceptable_price = if params.order_type.is_market() {
        apply_slippage_to_price(params.allowed_slippage_bps, params.acceptable_price, true, params.is_long)
    } else {
        params.acceptable_price
    };

    let mut calls: Vec<Bytes> = vec![
        ExchangeRouter::sendWntCall {
            receiver: order_vault,
            amount: wnt_amount,
        }
        .abi_encode()
        .into(),
    ];
    if !is_native_payment {
        calls.push(
            ExchangeRouter::sendTokensCall {
                token: params.initial_collateral_token,
                receiver: order_vault,
                amount: params.initial_collateral_amount,
            }
            .abi_encode()
            .into(),
        );
    }

    let order = CreateOrderParams {
        addresses: CreateOrderParamsAddresses {
            receiver: params.account,
            callbackContract: Address::ZERO,
            uiFeeReceiver: Address::ZERO,
            market: params.market,
            initialCollateralToken: chain.wrapped_address(params.initial_collateral_token),
            swapPath: params.swap_path.clone(),
        },
        numbers: CreateOrderParamsNumbers {
            sizeDeltaUsd: params.size_delta_usd,
            initialCollateralDeltaAmount: U256::ZERO,
            triggerPrice: convert_to_contract_price(
                params.trigger_price.unwrap_or_default(),
                params.index_token_decimals,
            ),
            acceptablePrice: convert_to_contract_price(acceptable_price, params.index_token_decimals),
            executionFee: params.execution_fee,
            callbackGasLimit: U256::ZERO,
            minOutputAmount: U256::ZERO,
        },
        orderType: params.order_type as u8,
        decreasePositionSwapType: DecreasePositionSwapType::NoSwap as u8,
        isLong: params.is_long,
        shouldUnwrapNativeToken: is_native_payment,
        referralCode: params.referral_code.unwrap_or_default(),
    };
    calls.push(ExchangeRouter::createOrderCall { params: order }.abi_encode().into());

    debug!(market = %params.market, order_type = ?params.order_type, calls = calls.len(), "increase order encoded");
    Ok(OrderTransaction::new(chain, wnt_amount, calls))
}

#[derive(Clone, Debug)]
pub struct DecreaseOrderParams {
    pub account: Address,
    pub market: Address,
    pub initial_collateral_token: Address,
    pub initial_collateral_delta_amount: U256,
    pub swap_path: Vec<Address>,
    /// The native token placeholder unwraps the output.
    pub receive_token: Address,
    pub size_delta_usd: U256,
    pub acceptable_price: U256,
    pub trigger_price: Option<U256>,
    pub min_output_amount: U256,
    pub is_long: bool,
    pub decrease_position_swap_type: DecreasePositionSwapType,
    pub order_type: OrderType,
    pub execution_fee: U256,
    pub allowed_slippage_bps: u64,
    pub referral_code: Option<B256>,
    pub index_token_decimals: u8,
}

pub fn create_decrease_order_txn(chain: &Chain, params: &DecreaseOrderParams) -> Result<OrderTransaction, DexError> {
    if !params.order_type.is_decrease() {
        return Err(DexError::InvalidRequest(format!(
            "{:?} is not a decrease order",
            params.order_type
        )));
    }

    let acceptable_price = if params.order_type.is_market() {
        apply_slippage_to_price(params.allowed_slippage_bps, params.acceptable_price, false, params.is_long)
    } else {
        params.acceptable_price
    };

    let order = CreateOrderParams {
        addresses: CreateOrderParamsAddresses {
            receiver: params.account,
            callbackContract: Address::ZERO,
            uiFeeReceiver: Address::ZERO,
            market: params.market,
            initialCollateralToken: params.initial_collateral_token,
            swapPath: params.swap_path.clone(),
        },
        numbers: CreateOrderParamsNumbers {
            sizeDeltaUsd: params.size_delta_usd,
            initialCollateralDeltaAmount: params.initial_collateral_delta_amount,
            triggerPrice: convert_to_contract_price(
                params.trigger_price.unwrap_or_default(),
                params.index_token_decimals,
            ),
            acceptablePrice: convert_to_contract_price(acceptable_price, params.index_token_decimals),
            executionFee: params.execution_fee,
            callbackGasLimit: U256::ZERO,
            minOutputAmount: params.min_output_amount,
        },
        orderType: params.order_type as u8,
        decreasePositionSwapType: params.decrease_position_swap_type as u8,
        isLong: params.is_long,
        shouldUnwrapNativeToken: params.receive_token == NATIVE_TOKEN,
        referralCode: params.referral_code.unwrap_or_default(),
    };

    let calls: Vec<Bytes> = vec![
        ExchangeRouter::sendWntCall {
            receiver: chain.order_vault(),
            amount: params.execution_fee,
        }
        .abi_encode()
        .into(),
        ExchangeRouter::createOrderCall { params: order }.abi_encode().into(),
    ];

    debug!(market = %params.market, order_type = ?params.order_type, "decrease order encoded");
    Ok(OrderTransaction::new(chain, params.execution_fee, calls))
}

/// Cancels pending orders by key in one transaction.
pub fn cancel_orders_txn(chain: &Chain, order_keys: &[B256]) -> Result<OrderTransaction, DexError> {
    if order_keys.is_empty() {
        return Err(DexError::InvalidRequest("no orders to cancel".to_string()));
    }
    let calls = order_keys
        .iter()
        .map(|key| ExchangeRouter::cancelOrderCall { key: *key }.abi_encode().into())
        .collect();
    Ok(OrderTransaction::new(chain, U256::ZERO, calls))
}
