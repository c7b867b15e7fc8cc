//! Concentrated-liquidity pool depth from an indexing subgraph.
//!
//! [`fetch_ticks_surrounding_price`] rebuilds the active liquidity around the
//! current price of a pool from its initialized ticks, and converts every tick
//! bar into prices and the token amounts a swap across the bar would consume.

use std::{collections::HashMap, time::Duration};

use alloy::primitives::Address;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, trace};
use url::Url;

use crate::error::DexError;

/// Uniswap v3 on Arbitrum.
pub const ARBITRUM_UNISWAP_V3_SUBGRAPH: &str =
    "https://api.thegraph.com/subgraphs/name/ianlapham/uniswap-arbitrum-one";

pub const TICKS_PAGE: u64 = 1000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SURROUNDING_TICKS: u32 = 50;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

const POOL_QUERY: &str = r#"
query pool($poolAddress: String!) {
  pool(id: $poolAddress) {
    tick
    token0 { symbol id decimals }
    token1 { symbol id decimals }
    feeTier
    sqrtPrice
    liquidity
  }
}"#;

const TICKS_QUERY: &str = r#"
query surroundingTicks($poolAddress: String!, $tickIdxLowerBound: BigInt!, $tickIdxUpperBound: BigInt!, $skip: Int!) {
  ticks(
    subgraphError: allow
    first: 1000
    skip: $skip
    where: { poolAddress: $poolAddress, tickIdx_lte: $tickIdxUpperBound, tickIdx_gte: $tickIdxLowerBound }
  ) {
    tickIdx
    liquidityGross
    liquidityNet
    price0
    price1
  }
}"#;

/// GraphQL endpoint returning the `data` member of a response.
pub trait GraphQuery: Send + Sync {
    fn query(&self, query: &str, variables: Value) -> impl Future<Output = Result<Value, DexError>> + Send;
}

#[derive(Deserialize)]
struct GraphResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

/// [`GraphQuery`] over HTTP.
#[derive(Clone, Debug)]
pub struct GraphClient {
    client: reqwest::Client,
    url: Url,
}

impl GraphClient {
    pub fn new(url: &str) -> Result<Self, DexError> {
        Self::with_timeout(url, DEFAULT_QUERY_TIMEOUT)
    }

    /// Client whose queries fail with [`DexError::Timeout`] after `timeout`.
    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self, DexError> {
        let url = Url::parse(url).map_err(|err| DexError::InvalidRequest(format!("invalid subgraph url {url}: {err}")))?;
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url,
        })
    }
}

impl GraphQuery for GraphClient {
    async fn query(&self, query: &str, variables: Value) -> Result<Value, DexError> {
        let body = json!({ "query": query, "variables": variables });
        let response: GraphResponse = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|error| error.message).collect();
            return Err(DexError::Subgraph(messages.join("; ")));
        }
        response
            .data
            .ok_or_else(|| DexError::Subgraph("response without data".to_string()))
    }
}

async fn request<G: GraphQuery, T: DeserializeOwned>(graph: &G, query: &str, variables: Value) -> Result<T, DexError> {
    let data = graph.query(query, variables).await?;
    serde_json::from_value(data).map_err(|err| DexError::Subgraph(format!("unexpected response: {err}")))
}

fn parse<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, DexError> {
    value
        .parse()
        .map_err(|_| DexError::Subgraph(format!("invalid {field}: {value}")))
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PoolToken {
    pub symbol: String,
    pub id: String,
    pub decimals: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPool {
    tick: Option<String>,
    token0: PoolToken,
    token1: PoolToken,
    fee_tier: String,
    liquidity: String,
}

#[derive(Deserialize)]
struct PoolResult {
    pool: Option<RawPool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTick {
    tick_idx: String,
    liquidity_gross: String,
    liquidity_net: String,
}

#[derive(Deserialize)]
struct TicksResult {
    ticks: Vec<RawTick>,
}

/// Tick with a position boundary on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitializedTick {
    pub tick_idx: i32,
    pub liquidity_gross: u128,
    pub liquidity_net: i128,
}

impl TryFrom<RawTick> for InitializedTick {
    type Error = DexError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        Ok(Self {
            tick_idx: parse("tickIdx", &raw.tick_idx)?,
            liquidity_gross: parse("liquidityGross", &raw.liquidity_gross)?,
            liquidity_net: parse("liquidityNet", &raw.liquidity_net)?,
        })
    }
}

pub fn fee_tier_to_tick_spacing(fee_tier: u32) -> Result<i32, DexError> {
    match fee_tier {
        100 => Ok(1),
        500 => Ok(10),
        3000 => Ok(60),
        10000 => Ok(200),
        _ => Err(DexError::Subgraph(format!("tick spacing for fee tier {fee_tier} undefined"))),
    }
}

/// Price of token0 in token1 at `tick`, in whole tokens.
pub fn tick_to_price(tick: i32, decimals0: u8, decimals1: u8) -> f64 {
    1.0001_f64.powi(tick) * 10_f64.powi(i32::from(decimals0) - i32::from(decimals1))
}

fn sqrt_ratio_at_tick(tick: i32) -> f64 {
    1.0001_f64.powf(f64::from(tick) / 2.0)
}

/// Initialized ticks of the pool within `[lower, upper]`.
///
/// Pages of [`TICKS_PAGE`] are requested until one comes back empty.
pub async fn fetch_initialized_ticks<G: GraphQuery>(
    graph: &G,
    pool: Address,
    tick_idx_lower_bound: i32,
    tick_idx_upper_bound: i32,
) -> Result<Vec<InitializedTick>, DexError> {
    let pool_address = pool.to_string().to_lowercase();
    let mut ticks = vec![];
    let mut skip = 0;
    loop {
        let page: TicksResult = request(
            graph,
            TICKS_QUERY,
            json!({
                "poolAddress": pool_address,
                "tickIdxLowerBound": tick_idx_lower_bound,
                "tickIdxUpperBound": tick_idx_upper_bound,
                "skip": skip,
            }),
        )
        .await?;
        trace!(%pool, skip, ticks = page.ticks.len(), "ticks page");
        if page.ticks.is_empty() {
            break;
        }
        for raw in page.ticks {
            ticks.push(InitializedTick::try_from(raw)?);
        }
        skip += TICKS_PAGE;
    }
    Ok(ticks)
}

/// One bar of the depth chart.
#[derive(Clone, Debug, PartialEq)]
pub struct TickDepth {
    pub index: usize,
    pub tick_idx: i32,
    pub is_current: bool,
    pub liquidity_active: u128,
    pub liquidity_net: i128,
    pub price0: f64,
    pub price1: f64,
    /// Token0 worth of the token1 liquidity in the bar.
    pub tvl_token0: f64,
    /// Token1 a swap across the bar would pay out.
    pub tvl_token1: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoolDepth {
    pub token0: PoolToken,
    pub token1: PoolToken,
    pub fee_tier: u32,
    pub tick_spacing: i32,
    pub active_tick_idx: i32,
    /// Ascending by tick.
    pub ticks: Vec<TickDepth>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug)]
struct ProcessedTick {
    tick_idx: i32,
    liquidity_active: u128,
    liquidity_net: i128,
}

/// Walks `count` ticks away from `active`, carrying active liquidity across
/// initialized ticks. Returned ticks are ascending.
fn surrounding_ticks(
    active: ProcessedTick,
    tick_spacing: i32,
    count: u32,
    direction: Direction,
    initialized: &HashMap<i32, InitializedTick>,
) -> Vec<ProcessedTick> {
    let mut previous = active;
    let mut processed = vec![];
    for _ in 0..count {
        let tick_idx = match direction {
            Direction::Asc => previous.tick_idx + tick_spacing,
            Direction::Desc => previous.tick_idx - tick_spacing,
        };
        if !(MIN_TICK..=MAX_TICK).contains(&tick_idx) {
            break;
        }

        let liquidity_net = initialized.get(&tick_idx).map_or(0, |tick| tick.liquidity_net);
        // Crossing a tick upwards applies its net liquidity, downwards removes
        // the net liquidity of the tick just left.
        let liquidity_active = match direction {
            Direction::Asc if initialized.contains_key(&tick_idx) => {
                previous.liquidity_active.saturating_add_signed(liquidity_net)
            }
            Direction::Desc if previous.liquidity_net != 0 => previous
                .liquidity_active
                .saturating_add_signed(previous.liquidity_net.saturating_neg()),
            _ => previous.liquidity_active,
        };

        let current = ProcessedTick {
            tick_idx,
            liquidity_active,
            liquidity_net,
        };
        processed.push(current);
        previous = current;
    }

    if direction == Direction::Desc {
        processed.reverse();
    }
    processed
}

/// Token1 paid out swapping token0 in from the top of the bar at `tick` down
/// to `lower_tick`, in whole tokens.
fn bar_token1_output(liquidity: u128, tick: i32, lower_tick: i32, decimals1: u8) -> f64 {
    let raw = liquidity as f64 * (sqrt_ratio_at_tick(tick) - sqrt_ratio_at_tick(lower_tick));
    raw.max(0.0) / 10_f64.powi(i32::from(decimals1))
}

/// Depth around the current price of `pool`.
pub async fn fetch_ticks_surrounding_price<G: GraphQuery>(
    graph: &G,
    pool: Address,
    num_surrounding_ticks: u32,
) -> Result<PoolDepth, DexError> {
    let PoolResult { pool: raw_pool } =
        request(graph, POOL_QUERY, json!({ "poolAddress": pool.to_string().to_lowercase() })).await?;
    let raw_pool = raw_pool.ok_or_else(|| DexError::Subgraph(format!("pool {pool} not found")))?;

    let current_tick: i32 = raw_pool
        .tick
        .as_deref()
        .ok_or_else(|| DexError::Subgraph(format!("pool {pool} has no active tick")))
        .and_then(|tick| parse("tick", tick))?;
    let fee_tier: u32 = parse("feeTier", &raw_pool.fee_tier)?;
    let tick_spacing = fee_tier_to_tick_spacing(fee_tier)?;
    let liquidity: u128 = parse("liquidity", &raw_pool.liquidity)?;
    let decimals0: u8 = parse("decimals", &raw_pool.token0.decimals)?;
    let decimals1: u8 = parse("decimals", &raw_pool.token1.decimals)?;

    // The current tick is not necessarily initializable.
    let active_tick_idx = current_tick.div_euclid(tick_spacing) * tick_spacing;
    let span = num_surrounding_ticks as i32 * tick_spacing;
    let initialized: HashMap<i32, InitializedTick> = fetch_initialized_ticks(
        graph,
        pool,
        active_tick_idx - span,
        active_tick_idx + span,
    )
    .await?
    .into_iter()
    .map(|tick| (tick.tick_idx, tick))
    .collect();
    debug!(%pool, current_tick, active_tick_idx, initialized = initialized.len(), "pool ticks fetched");

    let active = ProcessedTick {
        tick_idx: active_tick_idx,
        liquidity_active: liquidity,
        liquidity_net: initialized.get(&active_tick_idx).map_or(0, |tick| tick.liquidity_net),
    };
    let mut processed =
        surrounding_ticks(active, tick_spacing, num_surrounding_ticks, Direction::Desc, &initialized);
    processed.push(active);
    processed.extend(surrounding_ticks(
        active,
        tick_spacing,
        num_surrounding_ticks,
        Direction::Asc,
        &initialized,
    ));

    // Swap output of bar `i` covers the range down to bar `i - 1`, and is
    // shown on the lower bar so each bar carries the liquidity above it.
    let outputs: Vec<f64> = processed
        .iter()
        .enumerate()
        .map(|(i, tick)| {
            let lower_tick = i
                .checked_sub(1)
                .map_or(tick.tick_idx - tick_spacing, |lower| processed[lower].tick_idx);
            bar_token1_output(tick.liquidity_active, tick.tick_idx, lower_tick, decimals1)
        })
        .collect();

    let ticks = processed
        .iter()
        .enumerate()
        .map(|(index, tick)| {
            let shown = (index + 1).min(processed.len() - 1);
            // Prices stay within the protocol range even when snapping went past it.
            let price_tick = tick.tick_idx.clamp(MIN_TICK, MAX_TICK);
            let shown_price1 = 1.0 / tick_to_price(processed[shown].tick_idx.clamp(MIN_TICK, MAX_TICK), decimals0, decimals1);
            TickDepth {
                index,
                tick_idx: tick.tick_idx,
                is_current: tick.tick_idx == active_tick_idx,
                liquidity_active: tick.liquidity_active,
                liquidity_net: tick.liquidity_net,
                price0: tick_to_price(price_tick, decimals0, decimals1),
                price1: 1.0 / tick_to_price(price_tick, decimals0, decimals1),
                tvl_token0: outputs[shown] * shown_price1,
                tvl_token1: outputs[shown],
            }
        })
        .collect();

    Ok(PoolDepth {
        token0: raw_pool.token0,
        token1: raw_pool.token1,
        fee_tier,
        tick_spacing,
        active_tick_idx,
        ticks,
    })
}
