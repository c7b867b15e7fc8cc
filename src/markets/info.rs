use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use tracing::{debug, warn};

use super::{Market, MarketInfo, MarketsInfoData};
use crate::{
    Chain,
    abi::dynamic,
    error::DexError,
    fetch::Fetcher,
    keys,
    multicall::{CallGroup, Request, Response, address, bytes32, uint},
    rpc::Connect,
    tokens::TokensData,
};

/// Upper bound of markets listed by a single reader call.
pub const MARKETS_PAGE: u64 = 1000;

/// Lists market descriptors of the chain.
pub async fn fetch_markets<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain) -> Result<Vec<Market>, DexError> {
    let reader = dynamic::parse(dynamic::READER)?;

    let markets = fetcher
        .fetch(
            chain,
            "markets",
            Some(chain.data_store()),
            |_, data_store| {
                Request::new().group(
                    "reader",
                    CallGroup::new(chain.reader(), reader).call(
                        "markets",
                        "getMarkets",
                        vec![address(*data_store), uint(U256::ZERO), uint(U256::from(MARKETS_PAGE))],
                    ),
                )
            },
            |response, _, _| {
                let result = response.require("reader", "markets")?;
                Ok(result.values.iter().filter_map(parse_market).collect::<Vec<_>>())
            },
        )
        .await?
        .unwrap_or_default();

    debug!(chain_id = chain.chain_id(), markets = markets.len(), "fetched markets");
    Ok(markets)
}

/// `Market.Props` tuple: market token, index token, long token, short token.
fn parse_market(value: &DynSolValue) -> Option<Market> {
    let DynSolValue::Tuple(fields) = value else {
        return None;
    };
    match fields.as_slice() {
        [market, index, long, short] => Some(Market::new(
            market.as_address()?,
            index.as_address()?,
            long.as_address()?,
            short.as_address()?,
        )),
        _ => None,
    }
}

/// Reads pool state of the `markets` and joins it with `tokens`.
///
/// Markets whose tokens are not priced or whose reads failed are left out.
pub async fn fetch_markets_info<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    markets: &[Market],
    tokens: &TokensData,
) -> Result<MarketsInfoData, DexError> {
    let data_store = dynamic::parse(dynamic::DATA_STORE)?;

    let infos = fetcher
        .fetch(
            chain,
            "marketsInfo",
            (!markets.is_empty()).then_some(markets),
            |_, markets| {
                markets.iter().fold(Request::new(), |request, market| {
                    request.group(
                        market.market_token.to_string(),
                        market_calls(CallGroup::new(chain.data_store(), data_store.clone()), market),
                    )
                })
            },
            |response, _, markets| {
                Ok(markets
                    .iter()
                    .filter_map(|market| match market_info(&response, market, tokens) {
                        Ok(info) => Some(info),
                        Err(err) => {
                            warn!(market = %market.market_token, %err, "skipping market");
                            None
                        }
                    })
                    .collect::<Vec<_>>())
            },
        )
        .await?
        .unwrap_or_default();

    debug!(chain_id = chain.chain_id(), markets = infos.len(), "fetched markets info");
    Ok(MarketsInfoData::new(infos, tokens.clone(), chain.wrapped_native_token()))
}

fn market_calls(group: CallGroup, market: &Market) -> CallGroup {
    let m = market.market_token;
    let (long, short) = (market.long_token, market.short_token);
    let get_uint = |group: CallGroup, key: &str, data_key| group.call(key, "getUint", vec![bytes32(data_key)]);

    let group = get_uint(group, "longPoolAmount", keys::pool_amount(m, long));
    let group = get_uint(group, "shortPoolAmount", keys::pool_amount(m, short));
    let group = get_uint(group, "reserveFactorLong", keys::reserve_factor(m, true));
    let group = get_uint(group, "reserveFactorShort", keys::reserve_factor(m, false));
    let group = get_uint(group, "swapImpactFactorPositive", keys::swap_impact_factor(m, true));
    let group = get_uint(group, "swapImpactFactorNegative", keys::swap_impact_factor(m, false));
    let group = get_uint(group, "swapImpactExponentFactor", keys::swap_impact_exponent_factor(m));
    let group = get_uint(group, "swapFeeFactorForPositiveImpact", keys::swap_fee_factor(m, true));
    let group = get_uint(group, "swapFeeFactorForNegativeImpact", keys::swap_fee_factor(m, false));
    let group = get_uint(group, "swapImpactPoolAmountLong", keys::swap_impact_pool_amount(m, long));
    let group = get_uint(group, "swapImpactPoolAmountShort", keys::swap_impact_pool_amount(m, short));
    let group = get_uint(group, "longInterestInTokensUsingLongToken", keys::open_interest_in_tokens(m, long, true));
    let group = get_uint(group, "longInterestInTokensUsingShortToken", keys::open_interest_in_tokens(m, short, true));
    let group = get_uint(group, "shortInterestUsingLongToken", keys::open_interest(m, long, false));
    let group = get_uint(group, "shortInterestUsingShortToken", keys::open_interest(m, short, false));
    group.call("isDisabled", "getBool", vec![bytes32(keys::is_market_disabled(m))])
}

fn market_info(response: &Response, market: &Market, tokens: &TokensData) -> Result<MarketInfo, DexError> {
    let group = market.market_token.to_string();
    let read = |key: &str| response.require_uint(&group, key);

    let token = |address: Address| {
        tokens
            .get(&address)
            .cloned()
            .ok_or_else(|| DexError::InvalidRequest(format!("token {address} is not priced")))
    };
    let long_token = token(market.long_token)?;
    let short_token = token(market.short_token)?;
    let index_token = if market.is_spot_only() {
        long_token.clone()
    } else {
        token(market.index_token)?
    };

    let is_disabled = response
        .require(&group, "isDisabled")?
        .bool(0)
        .ok_or_else(|| DexError::MissingCall(group.clone(), "isDisabled".to_string()))?;

    let mut long_pool_amount = read("longPoolAmount")?;
    let mut short_pool_amount = read("shortPoolAmount")?;

    let long_using_long = read("longInterestInTokensUsingLongToken")?;
    let long_using_short = read("longInterestInTokensUsingShortToken")?;
    let short_using_long = read("shortInterestUsingLongToken")?;
    let short_using_short = read("shortInterestUsingShortToken")?;

    // Both sides of a single-collateral market share one pool and one interest record.
    let (long_interest_in_tokens, short_interest_usd) = if market.is_same_collaterals() {
        long_pool_amount /= U256::from(2);
        short_pool_amount /= U256::from(2);
        (long_using_long, short_using_long)
    } else {
        (long_using_long + long_using_short, short_using_long + short_using_short)
    };

    Ok(MarketInfo {
        market: *market,
        is_disabled,
        long_token,
        short_token,
        index_token,
        long_pool_amount,
        short_pool_amount,
        reserve_factor_long: read("reserveFactorLong")?,
        reserve_factor_short: read("reserveFactorShort")?,
        swap_impact_factor_positive: read("swapImpactFactorPositive")?,
        swap_impact_factor_negative: read("swapImpactFactorNegative")?,
        swap_impact_exponent_factor: read("swapImpactExponentFactor")?,
        swap_fee_factor_for_positive_impact: read("swapFeeFactorForPositiveImpact")?,
        swap_fee_factor_for_negative_impact: read("swapFeeFactorForNegativeImpact")?,
        swap_impact_pool_amount_long: read("swapImpactPoolAmountLong")?,
        swap_impact_pool_amount_short: read("swapImpactPoolAmountShort")?,
        long_interest_in_tokens,
        short_interest_usd,
    })
}
