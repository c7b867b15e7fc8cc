//! Execution fees.
//!
//! Keepers executing an order are refunded out of an execution fee paid in
//! the native token upfront. The fee is the estimated gas limit of the order,
//! adjusted by the exchange's base amount and multiplier, times the gas price.

use alloy::primitives::U256;
use tracing::{debug, warn};

use crate::{
    Chain, NATIVE_TOKEN,
    abi::dynamic,
    error::DexError,
    fetch::{FetchCall, Fetcher, ProviderCall},
    keys,
    markets::{MarketsInfoData, fetch_markets, fetch_markets_info},
    multicall::{CallGroup, Request, bytes32},
    num::{BASIS_POINTS_DIVISOR, PRECISION, apply_factor, convert_to_usd},
    rpc::Connect,
    tokens::{TokenData, TokensData},
};

/// Fees above this USD value are flagged as high.
const HIGH_EXECUTION_FEE_USD: u64 = 3;

/// Gas limits the exchange charges execution fees for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasLimitsConfig {
    pub deposit_single_token: U256,
    pub deposit_multi_token: U256,
    pub withdrawal_multi_token: U256,
    pub single_swap: U256,
    pub swap_order: U256,
    pub increase_order: U256,
    pub decrease_order: U256,
    pub estimated_fee_base_gas_limit: U256,
    pub estimated_fee_multiplier_factor: U256,
}

/// Execution fee in the native token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionFee {
    pub fee_usd: U256,
    pub fee_token_amount: U256,
    pub fee_token: TokenData,
    pub is_fee_high: bool,
}

pub async fn fetch_gas_limits<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain) -> Result<GasLimitsConfig, DexError> {
    let data_store = dynamic::parse(dynamic::DATA_STORE)?;

    let limits = fetcher
        .fetch(
            chain,
            "gasLimits",
            Some(chain.data_store()),
            |_, data_store_address| {
                let calls = [
                    ("depositSingleToken", keys::deposit_gas_limit(true)),
                    ("depositMultiToken", keys::deposit_gas_limit(false)),
                    ("withdrawalMultiToken", keys::withdrawal_gas_limit()),
                    ("singleSwap", keys::single_swap_gas_limit()),
                    ("swapOrder", keys::swap_order_gas_limit()),
                    ("increaseOrder", keys::increase_order_gas_limit()),
                    ("decreaseOrder", keys::decrease_order_gas_limit()),
                    ("estimatedFeeBaseGasLimit", keys::estimated_gas_fee_base_amount()),
                    ("estimatedFeeMultiplierFactor", keys::estimated_gas_fee_multiplier_factor()),
                ];
                let group = calls
                    .into_iter()
                    .fold(CallGroup::new(*data_store_address, data_store), |group, (key, data_key)| {
                        group.call(key, "getUint", vec![bytes32(data_key)])
                    });
                Request::new().group("dataStore", group)
            },
            |response, _, _| {
                let read = |key: &str| response.require_uint("dataStore", key);
                Ok(GasLimitsConfig {
                    deposit_single_token: read("depositSingleToken")?,
                    deposit_multi_token: read("depositMultiToken")?,
                    withdrawal_multi_token: read("withdrawalMultiToken")?,
                    single_swap: read("singleSwap")?,
                    swap_order: read("swapOrder")?,
                    increase_order: read("increaseOrder")?,
                    decrease_order: read("decreaseOrder")?,
                    estimated_fee_base_gas_limit: read("estimatedFeeBaseGasLimit")?,
                    estimated_fee_multiplier_factor: read("estimatedFeeMultiplierFactor")?,
                })
            },
        )
        .await?;

    limits.ok_or(DexError::NullResp)
}

/// Gas price to pay execution fees with, following the chain's fee policy.
///
/// A node without `eth_maxPriorityFeePerGas` falls back to the plain gas price.
pub async fn fetch_gas_price<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain) -> Result<U256, DexError> {
    let config = chain.execution_fee();
    let mut gas_price = fetcher
        .fetch_call(chain, FetchCall::Provider(ProviderCall::GasPrice))
        .await?
        .number()
        .ok_or(DexError::NullResp)?;

    if config.use_max_priority_fee {
        match fetcher
            .fetch_call(chain, FetchCall::Provider(ProviderCall::MaxPriorityFeePerGas))
            .await
        {
            Ok(output) => gas_price += output.number().unwrap_or_default(),
            Err(err) => warn!(chain_id = chain.chain_id(), %err, "max priority fee unavailable"),
        }
    }

    gas_price += gas_price * U256::from(config.buffer_bps) / U256::from(BASIS_POINTS_DIVISOR);
    gas_price += config.gas_price_premium;
    if let Some(max) = config.max_gas_price {
        gas_price = gas_price.min(max);
    }

    debug!(chain_id = chain.chain_id(), %gas_price, "fetched gas price");
    Ok(gas_price)
}

/// Fee for executing `estimated_gas_limit` at `gas_price`,
/// `None` if the native token is not priced.
pub fn execution_fee(
    gas_limits: &GasLimitsConfig,
    tokens: &TokensData,
    estimated_gas_limit: U256,
    gas_price: U256,
) -> Option<ExecutionFee> {
    let native_token = tokens.get(&NATIVE_TOKEN)?;

    let adjusted_gas_limit = gas_limits.estimated_fee_base_gas_limit
        + apply_factor(estimated_gas_limit, gas_limits.estimated_fee_multiplier_factor);
    let fee_token_amount = adjusted_gas_limit * gas_price;
    let fee_usd = convert_to_usd(fee_token_amount, native_token.decimals, native_token.prices.min);

    Some(ExecutionFee {
        fee_usd,
        fee_token_amount,
        fee_token: native_token.clone(),
        is_fee_high: fee_usd > U256::from(HIGH_EXECUTION_FEE_USD) * PRECISION,
    })
}

/// Deposit shape the gas limit depends on.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepositGasParams {
    pub long_token_swaps_count: usize,
    pub short_token_swaps_count: usize,
    pub initial_long_token_amount: U256,
    pub initial_short_token_amount: U256,
    pub callback_gas_limit: U256,
}

pub fn estimate_execute_deposit_gas_limit(gas_limits: &GasLimitsConfig, deposit: &DepositGasParams) -> U256 {
    let swaps_count = deposit.long_token_swaps_count + deposit.short_token_swaps_count;
    let gas_for_swaps = gas_limits.single_swap * U256::from(swaps_count);
    let is_multi_token = !deposit.initial_long_token_amount.is_zero() && !deposit.initial_short_token_amount.is_zero();

    let deposit_gas_limit = if is_multi_token {
        gas_limits.deposit_multi_token
    } else {
        gas_limits.deposit_single_token
    };
    deposit_gas_limit + gas_for_swaps + deposit.callback_gas_limit
}

pub fn estimate_execute_withdrawal_gas_limit(gas_limits: &GasLimitsConfig, callback_gas_limit: U256) -> U256 {
    gas_limits.withdrawal_multi_token + callback_gas_limit
}

pub fn estimate_execute_increase_order_gas_limit(
    gas_limits: &GasLimitsConfig,
    swaps_count: usize,
    callback_gas_limit: U256,
) -> U256 {
    gas_limits.increase_order + gas_limits.single_swap * U256::from(swaps_count) + callback_gas_limit
}

pub fn estimate_execute_decrease_order_gas_limit(
    gas_limits: &GasLimitsConfig,
    swaps_count: usize,
    callback_gas_limit: U256,
) -> U256 {
    gas_limits.decrease_order + gas_limits.single_swap * U256::from(swaps_count) + callback_gas_limit
}

pub fn estimate_execute_swap_order_gas_limit(
    gas_limits: &GasLimitsConfig,
    swaps_count: usize,
    callback_gas_limit: U256,
) -> U256 {
    gas_limits.swap_order + gas_limits.single_swap * U256::from(swaps_count) + callback_gas_limit
}

/// Everything needed to price and size an order.
#[derive(Clone, Debug)]
pub struct OrderContext {
    pub markets: MarketsInfoData,
    pub gas_limits: GasLimitsConfig,
    pub gas_price: U256,
}

impl OrderContext {
    /// Fetches the markets snapshot, gas limits and gas price concurrently.
    pub async fn fetch<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain, tokens: &TokensData) -> Result<Self, DexError> {
        let markets = async {
            let markets = fetch_markets(fetcher, chain).await?;
            fetch_markets_info(fetcher, chain, &markets, tokens).await
        };
        let (markets, gas_limits, gas_price) =
            futures::try_join!(markets, fetch_gas_limits(fetcher, chain), fetch_gas_price(fetcher, chain))?;

        Ok(Self {
            markets,
            gas_limits,
            gas_price,
        })
    }

    pub fn execution_fee(&self, estimated_gas_limit: U256) -> Option<ExecutionFee> {
        execution_fee(&self.gas_limits, self.markets.tokens(), estimated_gas_limit, self.gas_price)
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        dyn_abi::DynSolValue,
        primitives::{Address, B256},
    };
    use tokio_test::assert_ok;

    use super::*;
    use crate::{
        ExecutionFeeConfig,
        multicall::{address, uint},
        num::expand_decimals,
        rpc::Endpoints,
        testing::{MockConnector, MockContracts, MockTransport, token},
    };

    const GWEI: u64 = 1_000_000_000;

    fn gas_limits() -> GasLimitsConfig {
        GasLimitsConfig {
            deposit_single_token: U256::from(1_500_000),
            deposit_multi_token: U256::from(1_800_000),
            withdrawal_multi_token: U256::from(1_500_000),
            single_swap: U256::from(1_000_000),
            swap_order: U256::from(1_700_000),
            increase_order: U256::from(2_000_000),
            decrease_order: U256::from(2_000_000),
            estimated_fee_base_gas_limit: U256::from(500_000),
            estimated_fee_multiplier_factor: PRECISION,
        }
    }

    fn with_gas_limits(contracts: MockContracts, chain: &Chain, limits: &GasLimitsConfig) -> MockContracts {
        let entries = [
            (keys::deposit_gas_limit(true), limits.deposit_single_token),
            (keys::deposit_gas_limit(false), limits.deposit_multi_token),
            (keys::withdrawal_gas_limit(), limits.withdrawal_multi_token),
            (keys::single_swap_gas_limit(), limits.single_swap),
            (keys::swap_order_gas_limit(), limits.swap_order),
            (keys::increase_order_gas_limit(), limits.increase_order),
            (keys::decrease_order_gas_limit(), limits.decrease_order),
            (keys::estimated_gas_fee_base_amount(), limits.estimated_fee_base_gas_limit),
            (keys::estimated_gas_fee_multiplier_factor(), limits.estimated_fee_multiplier_factor),
        ];
        entries.into_iter().fold(contracts, |contracts, (key, value): (B256, U256)| {
            contracts.on_uint(chain.data_store(), "getUint", vec![bytes32(key)], value)
        })
    }

    fn fetcher(chain: &Chain, transport: MockTransport) -> Fetcher<MockConnector> {
        Fetcher::new(
            MockConnector::default().with("http://rpc.local", transport),
            Endpoints::default().with_primary(chain.chain_id(), vec!["http://rpc.local".parse().unwrap()]),
        )
    }

    #[tokio::test]
    async fn test_fetch_gas_limits() {
        let chain = Chain::arbitrum();
        let transport = with_gas_limits(MockContracts::default(), &chain, &gas_limits()).into_transport();

        let limits = assert_ok!(fetch_gas_limits(&fetcher(&chain, transport.clone()), &chain).await);
        assert_eq!(limits, gas_limits());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_gas_limit_fails() {
        let chain = Chain::arbitrum();
        let transport = MockContracts::default().into_transport();

        let result = fetch_gas_limits(&fetcher(&chain, transport), &chain).await;
        assert!(matches!(result, Err(DexError::MissingCall(_, _))));
    }

    #[tokio::test]
    async fn test_gas_price_with_buffer() {
        let chain = Chain::arbitrum();
        let transport = MockTransport::unreachable().with_gas_price(U256::from(100 * GWEI), U256::from(5 * GWEI));

        let gas_price = assert_ok!(fetch_gas_price(&fetcher(&chain, transport.clone()), &chain).await);
        // 10% buffer, priority fee not used
        assert_eq!(gas_price, U256::from(110 * GWEI));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_gas_price_with_priority_fee_and_premium() {
        let chain = Chain::avalanche();
        let transport = MockTransport::unreachable().with_gas_price(U256::from(25 * GWEI), U256::from(5 * GWEI));

        let gas_price = assert_ok!(fetch_gas_price(&fetcher(&chain, transport), &chain).await);
        // (25 + 5) * 1.1 + 3
        assert_eq!(gas_price, U256::from(36 * GWEI));
    }

    #[tokio::test]
    async fn test_gas_price_is_capped() {
        let chain = Chain::custom(
            1,
            crate::MULTICALL3,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            Address::repeat_byte(4),
            Address::repeat_byte(5),
            Address::repeat_byte(6),
            "http://keeper.local",
            ExecutionFeeConfig {
                use_max_priority_fee: false,
                buffer_bps: 0,
                gas_price_premium: U256::from(GWEI),
                max_gas_price: Some(U256::from(50 * GWEI)),
            },
        );
        let transport = MockTransport::unreachable().with_gas_price(U256::from(60 * GWEI), U256::ZERO);

        let gas_price = assert_ok!(fetch_gas_price(&fetcher(&chain, transport), &chain).await);
        assert_eq!(gas_price, U256::from(50 * GWEI));
    }

    #[test]
    fn test_execution_fee() {
        let mut eth = token(NATIVE_TOKEN, "ETH", 18, U256::from(2000) * PRECISION);
        eth.is_native = true;
        let tokens = TokensData::from([(NATIVE_TOKEN, eth)]);
        let limits = GasLimitsConfig {
            estimated_fee_multiplier_factor: PRECISION * U256::from(2),
            ..gas_limits()
        };

        // (500k + 2 * 1M) * 1 gwei = 0.0025 ETH = $5
        let fee = execution_fee(&limits, &tokens, U256::from(1_000_000), U256::from(GWEI)).unwrap();
        assert_eq!(fee.fee_token_amount, U256::from(25) * expand_decimals(14));
        assert_eq!(fee.fee_usd, U256::from(5) * PRECISION);
        assert_eq!(fee.fee_token.address, NATIVE_TOKEN);
        assert!(fee.is_fee_high);

        let cheap = execution_fee(&limits, &tokens, U256::from(1_000_000), U256::from(GWEI / 10)).unwrap();
        assert!(!cheap.is_fee_high);

        assert!(execution_fee(&limits, &TokensData::new(), U256::from(1), U256::from(1)).is_none());
    }

    #[test]
    fn test_gas_limit_estimates() {
        let limits = gas_limits();

        let single = DepositGasParams {
            long_token_swaps_count: 1,
            initial_long_token_amount: U256::from(1),
            ..Default::default()
        };
        assert_eq!(estimate_execute_deposit_gas_limit(&limits, &single), U256::from(2_500_000));

        let multi = DepositGasParams {
            initial_long_token_amount: U256::from(1),
            initial_short_token_amount: U256::from(1),
            callback_gas_limit: U256::from(10),
            ..Default::default()
        };
        assert_eq!(estimate_execute_deposit_gas_limit(&limits, &multi), U256::from(1_800_010));

        assert_eq!(estimate_execute_withdrawal_gas_limit(&limits, U256::ZERO), U256::from(1_500_000));
        assert_eq!(estimate_execute_increase_order_gas_limit(&limits, 2, U256::ZERO), U256::from(4_000_000));
        assert_eq!(estimate_execute_decrease_order_gas_limit(&limits, 0, U256::from(1)), U256::from(2_000_001));
        assert_eq!(estimate_execute_swap_order_gas_limit(&limits, 1, U256::ZERO), U256::from(2_700_000));
    }

    #[tokio::test]
    async fn test_order_context() {
        let chain = Chain::arbitrum();
        let contracts = with_gas_limits(MockContracts::default(), &chain, &gas_limits()).on(
            chain.reader(),
            "getMarkets",
            vec![address(chain.data_store()), uint(U256::ZERO), uint(U256::from(1000))],
            vec![DynSolValue::Array(vec![])],
        );
        let transport = contracts.into_transport().with_gas_price(U256::from(GWEI), U256::ZERO);

        let context = assert_ok!(OrderContext::fetch(&fetcher(&chain, transport), &chain, &TokensData::new()).await);
        assert!(context.markets.is_empty());
        assert_eq!(context.gas_limits, gas_limits());
        assert_eq!(context.gas_price, U256::from(GWEI) + U256::from(GWEI / 10));
        // no native token price
        assert!(context.execution_fee(U256::from(1)).is_none());
    }
}
