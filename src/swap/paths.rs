use std::collections::HashSet;

use alloy::primitives::{Address, I256, U256};
use tracing::debug;

use super::{MarketEdge, MarketsGraph, SwapEstimator, SwapStats};
use crate::{NATIVE_TOKEN, num::to_signed};

/// Candidate path between two tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapRoute {
    /// Market addresses in swap order.
    pub path: Vec<Address>,
    pub edges: Vec<MarketEdge>,
    /// Liquidity of the thinnest hop.
    pub liquidity: U256,
}

/// How [`price_route`] picks among candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteSelection {
    /// Greatest simulated output for the trade size.
    #[default]
    BestOutput,
    /// First candidate of the liquidity ranking, output is not simulated.
    MostLiquid,
}

/// Simple paths from `from` to `to` of at most `max_depth` markets,
/// in depth-first discovery order.
///
/// A market is used at most once per path and a path ends at the first
/// arrival at `to`.
pub fn find_all_paths<E: SwapEstimator + ?Sized>(
    estimator: &E,
    graph: &MarketsGraph,
    from: Address,
    to: Address,
    max_depth: usize,
) -> Vec<SwapRoute> {
    if from == to || graph.edges_from(from).is_empty() {
        return vec![];
    }

    let mut found: Vec<Vec<MarketEdge>> = vec![];
    let mut stack = Vec::with_capacity(max_depth);
    let mut visited = HashSet::with_capacity(max_depth);
    for edge in graph.edges_from(from) {
        walk(graph, *edge, to, max_depth, &mut stack, &mut visited, &mut found);
    }

    found
        .into_iter()
        .map(|edges| {
            let path: Vec<Address> = edges.iter().map(|edge| edge.market).collect();
            SwapRoute {
                liquidity: max_swap_path_liquidity(estimator, &path, from),
                path,
                edges,
            }
        })
        .collect()
}

fn walk(
    graph: &MarketsGraph,
    edge: MarketEdge,
    to: Address,
    max_depth: usize,
    stack: &mut Vec<MarketEdge>,
    visited: &mut HashSet<Address>,
    found: &mut Vec<Vec<MarketEdge>>,
) {
    if stack.len() >= max_depth {
        return;
    }

    stack.push(edge);
    if edge.to == to {
        found.push(stack.clone());
    } else {
        visited.insert(edge.market);
        for next in graph.edges_from(edge.to) {
            if !visited.contains(&next.market) {
                walk(graph, *next, to, max_depth, stack, visited, found);
            }
        }
        visited.remove(&edge.market);
    }
    stack.pop();
}

/// Smallest available liquidity along the path, zero if a hop is unknown.
pub fn max_swap_path_liquidity<E: SwapEstimator + ?Sized>(
    estimator: &E,
    path: &[Address],
    initial_token: Address,
) -> U256 {
    let mut token_in = initial_token;
    let mut min_liquidity: Option<U256> = None;
    for market in path {
        let Some(token_out) = estimator
            .market(*market)
            .and_then(|descriptor| descriptor.opposite_collateral(token_in))
        else {
            return U256::ZERO;
        };
        let Some(liquidity) = estimator.available_liquidity(*market, token_out) else {
            return U256::ZERO;
        };
        min_liquidity = Some(min_liquidity.map_or(liquidity, |min| min.min(liquidity)));
        token_in = token_out;
    }
    min_liquidity.unwrap_or_default()
}

/// Most liquid first, equally liquid routes keep their discovery order.
pub fn rank_by_liquidity(mut routes: Vec<SwapRoute>) -> Vec<SwapRoute> {
    routes.sort_by(|a, b| b.liquidity.cmp(&a.liquidity));
    routes
}

/// Picks the candidate to trade `usd_in` through.
///
/// With [`RouteSelection::BestOutput`] every candidate is simulated hop by hop
/// and the greatest output wins, the earlier candidate on ties. Candidates a
/// hop can not serve are discarded, `None` if none is left.
pub fn price_route<'a, E: SwapEstimator + ?Sized>(
    estimator: &E,
    candidates: &'a [SwapRoute],
    usd_in: U256,
    selection: RouteSelection,
) -> Option<&'a SwapRoute> {
    if selection == RouteSelection::MostLiquid {
        return candidates.first();
    }

    let mut best: Option<(&SwapRoute, U256)> = None;
    for route in candidates {
        let Some(usd_out) = simulate(estimator, route, usd_in) else {
            debug!(path = ?route.path, %usd_in, "route can not serve the trade");
            continue;
        };
        if best.is_none_or(|(_, best_out)| usd_out > best_out) {
            best = Some((route, usd_out));
        }
    }
    best.map(|(route, _)| route)
}

fn simulate<E: SwapEstimator + ?Sized>(estimator: &E, route: &SwapRoute, usd_in: U256) -> Option<U256> {
    route.edges.iter().try_fold(usd_in, |usd_in, edge| {
        let stats = estimator.swap_stats(edge.market, edge.from, edge.to, usd_in, true)?;
        (!stats.is_out_liquidity && !stats.usd_out.is_zero()).then_some(stats.usd_out)
    })
}

#[derive(Clone, Copy, Debug)]
pub struct EvaluateOptions {
    pub wrapped_native_token: Address,
    /// Deliver the native token instead of its wrapped form at the end of the path.
    pub unwrap_native: bool,
    pub apply_price_impact: bool,
}

/// Priced route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapPathStats {
    pub swap_path: Vec<Address>,
    pub swap_steps: Vec<SwapStats>,
    pub token_in: Address,
    pub token_out: Address,
    pub usd_out: U256,
    pub amount_out: U256,
    pub total_swap_fee_usd: U256,
    pub total_price_impact_delta_usd: I256,
    /// Price impact less fees, negative when the trade costs.
    pub total_fees_delta_usd: I256,
}

impl SwapPathStats {
    /// Market of the last hop.
    pub fn target_market(&self) -> Option<Address> {
        self.swap_steps.last().map(|step| step.market)
    }
}

/// Walks `path` starting from `usd_in` of `initial_token`, every hop
/// taking the previous hop's output.
///
/// `None` for an empty path, a hop through a market not trading the running
/// token, or a hop out of liquidity for the amount it is handed.
pub fn evaluate_path<E: SwapEstimator + ?Sized>(
    estimator: &E,
    path: &[Address],
    initial_token: Address,
    usd_in: U256,
    options: EvaluateOptions,
) -> Option<SwapPathStats> {
    if path.is_empty() {
        return None;
    }

    let wrapped = |token: Address| {
        if token == NATIVE_TOKEN {
            options.wrapped_native_token
        } else {
            token
        }
    };

    let mut steps = Vec::with_capacity(path.len());
    let mut token_in = initial_token;
    let mut usd_out = usd_in;
    let mut total_swap_fee_usd = U256::ZERO;
    let mut total_price_impact_delta_usd = I256::ZERO;

    for (index, market) in path.iter().enumerate() {
        let mut token_out = estimator.market(*market)?.opposite_collateral(wrapped(token_in))?;
        if index == path.len() - 1 && options.unwrap_native && token_out == options.wrapped_native_token {
            token_out = NATIVE_TOKEN;
        }

        let step = estimator.swap_stats(*market, token_in, token_out, usd_out, options.apply_price_impact)?;
        if step.is_out_liquidity {
            debug!(market = %market, %usd_out, "hop out of liquidity");
            return None;
        }
        if step.usd_out.is_zero() {
            debug!(market = %market, %usd_out, "hop yields nothing");
            return None;
        }

        token_in = step.token_out;
        usd_out = step.usd_out;
        total_swap_fee_usd += step.swap_fee_usd;
        total_price_impact_delta_usd += step.price_impact_delta_usd;
        steps.push(step);
    }

    let amount_out = steps.last().map(|step| step.amount_out).unwrap_or_default();
    let total_fees_delta_usd = total_price_impact_delta_usd - to_signed(total_swap_fee_usd);
    Some(SwapPathStats {
        swap_path: path.to_vec(),
        swap_steps: steps,
        token_in: initial_token,
        token_out: token_in,
        usd_out,
        amount_out,
        total_swap_fee_usd,
        total_price_impact_delta_usd,
        total_fees_delta_usd,
    })
}
