//! In-memory testing environment and test utilities.
//!
//! [`MockTransport`] stands in for a JSON-RPC node: it answers Multicall3 `aggregate3` batches call by call,
//! counts round trips and can be slowed down or made to fail to exercise deadlines and fallbacks.
//!
//! [`MockContracts`] describes contract state as `(target, method, args) -> outputs` entries using the same
//! human-readable ABIs the SDK reads with, [`MockConnector`] hands mock transports out per endpoint URL.
//!
//! [`MarketInfoBuilder`] provides a convenient way to create [`MarketInfo`] instances with controlled pools,
//! prices and swap configuration for unit testing liquidity and swap pricing.
//!

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, Bytes, U256, address},
    sol_types::SolCall,
};
use url::Url;

use crate::{
    abi::{
        dynamic,
        multicall::IMulticall3::{self, Call3, aggregate3Call},
    },
    error::{DexError, RevertReason},
    markets::{Market, MarketInfo},
    num::{PRECISION, expand_decimals},
    rpc::{Connect, Transport},
    tokens::{TokenData, TokenPrices},
};

const ETH: Address = address!("0x82af49447d8a07e3bd95bd0d56f35241523fbab1");
const USDC: Address = address!("0xaf88d065e77c8cc2239327c5edb3a432268e5831");

type Handler = dyn Fn(Address, &Bytes) -> Result<Bytes, DexError> + Send + Sync;

/// Scriptable node answering `eth_call` through a handler.
///
/// Clones share the handler and the round trip counter.
#[derive(Clone, derive_more::Debug)]
pub struct MockTransport {
    #[debug(skip)]
    handler: Arc<Handler>,
    delay: Option<Duration>,
    gas_price: U256,
    max_priority_fee: U256,
    block_number: u64,
    calls: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(Address, &Bytes) -> Result<Bytes, DexError> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            delay: None,
            gas_price: U256::ZERO,
            max_priority_fee: U256::ZERO,
            block_number: 1,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Unpacks `aggregate3` batches and answers every call separately,
    /// `None` makes the call revert.
    ///
    /// Calls sent outside of a batch are answered the same way, a `None` answer
    /// is then a reverted `eth_call`.
    pub fn multicall(answer: impl Fn(&Call3) -> Option<Bytes> + Send + Sync + 'static) -> Self {
        Self::new(move |to, input| {
            if !input.starts_with(&aggregate3Call::SELECTOR) {
                let call = Call3 {
                    target: to,
                    allowFailure: false,
                    callData: input.clone(),
                };
                return answer(&call).ok_or_else(|| DexError::Reverted(Box::new(RevertReason::Unknown)));
            }

            let batch = aggregate3Call::abi_decode(input)?;
            let results: Vec<IMulticall3::Result> = batch
                .calls
                .iter()
                .map(|call| match answer(call) {
                    Some(data) => IMulticall3::Result {
                        success: true,
                        returnData: data,
                    },
                    None => IMulticall3::Result {
                        success: false,
                        returnData: Bytes::new(),
                    },
                })
                .collect();
            Ok(aggregate3Call::abi_encode_returns(&results).into())
        })
    }

    /// Node refusing connections.
    pub fn unreachable() -> Self {
        Self::failing(|| DexError::Transport("connection refused".to_string()))
    }

    /// Every call fails with the produced error.
    pub fn failing(error: impl Fn() -> DexError + Send + Sync + 'static) -> Self {
        Self::new(move |_, _| Err(error()))
    }

    /// Delays every answer, failures included.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256, max_priority_fee: U256) -> Self {
        self.gas_price = gas_price;
        self.max_priority_fee = max_priority_fee;
        self
    }

    pub fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Transport for MockTransport {
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, DexError> {
        self.round_trip().await;
        (self.handler)(to, &input)
    }

    async fn gas_price(&self) -> Result<U256, DexError> {
        self.round_trip().await;
        Ok(self.gas_price)
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256, DexError> {
        self.round_trip().await;
        Ok(self.max_priority_fee)
    }

    async fn block_number(&self) -> Result<u64, DexError> {
        self.round_trip().await;
        Ok(self.block_number)
    }
}

/// Contract state keyed by target and exact calldata.
///
/// Methods are resolved by name and arity in the data store, reader,
/// referral storage and ERC20 ABIs.
#[derive(Clone, Debug, Default)]
pub struct MockContracts {
    responses: HashMap<(Address, Bytes), Bytes>,
}

impl MockContracts {
    /// Answers `method(args)` on `target` with `outputs`, replacing a previous answer.
    pub fn on(mut self, target: Address, method: &str, args: Vec<DynSolValue>, outputs: Vec<DynSolValue>) -> Self {
        let function = known_function(method, args.len());
        let input = function.abi_encode_input(&args).unwrap();
        let output = function.abi_encode_output(&outputs).unwrap();
        self.responses.insert((target, input.into()), output.into());
        self
    }

    pub fn on_uint(self, target: Address, method: &str, args: Vec<DynSolValue>, value: U256) -> Self {
        self.on(target, method, args, vec![DynSolValue::Uint(value, 256)])
    }

    pub fn on_bool(self, target: Address, method: &str, args: Vec<DynSolValue>, value: bool) -> Self {
        self.on(target, method, args, vec![DynSolValue::Bool(value)])
    }

    /// Transport answering the registered calls and reverting any other.
    pub fn into_transport(self) -> MockTransport {
        let responses = Arc::new(self.responses);
        MockTransport::multicall(move |call| responses.get(&(call.target, call.callData.clone())).cloned())
    }
}

fn known_function(method: &str, arity: usize) -> Function {
    [dynamic::DATA_STORE, dynamic::READER, dynamic::REFERRAL_STORAGE, dynamic::ERC20]
        .into_iter()
        .map(|signatures| dynamic::parse(signatures).unwrap())
        .find_map(|abi| {
            abi.function(method)
                .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity).cloned())
        })
        .unwrap_or_else(|| panic!("unknown mock method {method}/{arity}"))
}

/// Hands out a preconfigured transport per endpoint URL.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    transports: HashMap<Url, MockTransport>,
}

impl MockConnector {
    pub fn with(mut self, url: &str, transport: MockTransport) -> Self {
        self.transports.insert(Url::parse(url).unwrap(), transport);
        self
    }
}

impl Connect for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, endpoint: &Url) -> Result<Self::Transport, DexError> {
        self.transports
            .get(endpoint)
            .cloned()
            .ok_or_else(|| DexError::Transport(format!("no mock node at {endpoint}")))
    }
}

/// Token with a single price.
pub fn token(address: Address, symbol: &str, decimals: u8, price: U256) -> TokenData {
    TokenData {
        address,
        symbol: symbol.to_string(),
        decimals,
        prices: TokenPrices::new(price, price),
        is_native: false,
        is_synthetic: false,
        balance: None,
    }
}

/// Builder for test [`MarketInfo`] instances with controlled values.
///
/// The long collateral is an 18 decimals token worth $2000 and the index token
/// of the market, the short collateral a 6 decimals $1 stablecoin. Pools hold
/// 1000 long tokens and 2M short tokens without open interest, reserve factors
/// are 100%, fees and impact factors are zero with a quadratic impact exponent.
///
/// # Example
///
/// ```ignore
/// use synthetics_sdk::testing::MarketInfoBuilder;
///
/// let info = MarketInfoBuilder::eth_usdc(market)
///     .pools(expand_decimals(18) * U256::from(10), U256::from(20_000) * expand_decimals(6))
///     .swap_fees(positive_fee, negative_fee)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct MarketInfoBuilder {
    market_token: Address,
    spot_only: bool,
    is_disabled: bool,
    long_token: TokenData,
    short_token: TokenData,
    long_pool_amount: U256,
    short_pool_amount: U256,
    reserve_factor_long: U256,
    reserve_factor_short: U256,
    swap_impact_factor_positive: U256,
    swap_impact_factor_negative: U256,
    swap_impact_exponent_factor: U256,
    swap_fee_factor_for_positive_impact: U256,
    swap_fee_factor_for_negative_impact: U256,
    swap_impact_pool_amount_long: U256,
    swap_impact_pool_amount_short: U256,
    long_interest_in_tokens: U256,
    short_interest_usd: U256,
}

impl MarketInfoBuilder {
    pub fn eth_usdc(market_token: Address) -> Self {
        Self::new(market_token, ETH, USDC)
    }

    /// Market over `long_token` priced like ETH and `short_token` priced like USDC.
    pub fn new(market_token: Address, long_token: Address, short_token: Address) -> Self {
        Self {
            market_token,
            spot_only: false,
            is_disabled: false,
            long_token: token(long_token, "WETH", 18, U256::from(2000) * PRECISION),
            short_token: token(short_token, "USDC", 6, PRECISION),
            long_pool_amount: U256::from(1000) * expand_decimals(18),
            short_pool_amount: U256::from(2_000_000) * expand_decimals(6),
            reserve_factor_long: PRECISION,
            reserve_factor_short: PRECISION,
            swap_impact_factor_positive: U256::ZERO,
            swap_impact_factor_negative: U256::ZERO,
            swap_impact_exponent_factor: U256::from(2) * PRECISION,
            swap_fee_factor_for_positive_impact: U256::ZERO,
            swap_fee_factor_for_negative_impact: U256::ZERO,
            swap_impact_pool_amount_long: U256::from(10) * expand_decimals(18),
            swap_impact_pool_amount_short: U256::from(20_000) * expand_decimals(6),
            long_interest_in_tokens: U256::ZERO,
            short_interest_usd: U256::ZERO,
        }
    }

    /// Min and max price of the long token, 30 decimals.
    pub fn eth_prices(mut self, min: U256, max: U256) -> Self {
        self.long_token.prices = TokenPrices::new(min, max);
        self
    }

    /// Pool amounts in token units.
    pub fn pools(mut self, long: U256, short: U256) -> Self {
        self.long_pool_amount = long;
        self.short_pool_amount = short;
        self
    }

    pub fn reserve_factors(mut self, long: U256, short: U256) -> Self {
        self.reserve_factor_long = long;
        self.reserve_factor_short = short;
        self
    }

    /// Long open interest in index tokens, short open interest in USD.
    pub fn open_interest(mut self, long_in_tokens: U256, short_usd: U256) -> Self {
        self.long_interest_in_tokens = long_in_tokens;
        self.short_interest_usd = short_usd;
        self
    }

    pub fn swap_fees(mut self, for_positive_impact: U256, for_negative_impact: U256) -> Self {
        self.swap_fee_factor_for_positive_impact = for_positive_impact;
        self.swap_fee_factor_for_negative_impact = for_negative_impact;
        self
    }

    pub fn swap_impact(mut self, positive: U256, negative: U256, exponent: U256) -> Self {
        self.swap_impact_factor_positive = positive;
        self.swap_impact_factor_negative = negative;
        self.swap_impact_exponent_factor = exponent;
        self
    }

    /// Impact pool amounts in token units.
    pub fn impact_pools(mut self, long: U256, short: U256) -> Self {
        self.swap_impact_pool_amount_long = long;
        self.swap_impact_pool_amount_short = short;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_disabled = true;
        self
    }

    /// Swap-only market without an index token.
    pub fn spot_only(mut self) -> Self {
        self.spot_only = true;
        self
    }

    pub fn build(self) -> MarketInfo {
        let index_token = if self.spot_only { Address::ZERO } else { self.long_token.address };
        MarketInfo {
            market: Market::new(
                self.market_token,
                index_token,
                self.long_token.address,
                self.short_token.address,
            ),
            is_disabled: self.is_disabled,
            index_token: self.long_token.clone(),
            long_token: self.long_token,
            short_token: self.short_token,
            long_pool_amount: self.long_pool_amount,
            short_pool_amount: self.short_pool_amount,
            reserve_factor_long: self.reserve_factor_long,
            reserve_factor_short: self.reserve_factor_short,
            swap_impact_factor_positive: self.swap_impact_factor_positive,
            swap_impact_factor_negative: self.swap_impact_factor_negative,
            swap_impact_exponent_factor: self.swap_impact_exponent_factor,
            swap_fee_factor_for_positive_impact: self.swap_fee_factor_for_positive_impact,
            swap_fee_factor_for_negative_impact: self.swap_fee_factor_for_negative_impact,
            swap_impact_pool_amount_long: self.swap_impact_pool_amount_long,
            swap_impact_pool_amount_short: self.swap_impact_pool_amount_short,
            long_interest_in_tokens: self.long_interest_in_tokens,
            short_interest_usd: self.short_interest_usd,
        }
    }
}
