use alloy::primitives::{Address, U256};
use tracing::debug;

use super::{
    EvaluateOptions, MAX_CANDIDATE_PATHS, MAX_SWAP_PATH_LENGTH, MarketsGraph, RouteSelection, SwapEstimator,
    SwapPathStats, SwapRoute, evaluate_path, find_all_paths, max_swap_path_liquidity, price_route,
    rank_by_liquidity,
};
use crate::{NATIVE_TOKEN, markets::MarketsInfoData};

/// Candidate routes of a single token pair.
///
/// Wrapping, unwrapping and same-token trades need no swap and get no routes.
#[derive(Debug)]
pub struct SwapRoutes<'a, E: ?Sized> {
    estimator: &'a E,
    from: Address,
    to: Address,
    wrapped_native_token: Address,
    routes: Vec<SwapRoute>,
}

impl<'a, E: SwapEstimator + ?Sized> SwapRoutes<'a, E> {
    pub fn new(
        estimator: &'a E,
        graph: &MarketsGraph,
        wrapped_native_token: Address,
        from: Address,
        to: Address,
    ) -> Self {
        let wrap = |token: Address| {
            if token == NATIVE_TOKEN {
                wrapped_native_token
            } else {
                token
            }
        };

        let is_wrap = from == NATIVE_TOKEN && to == wrapped_native_token;
        let is_unwrap = from == wrapped_native_token && to == NATIVE_TOKEN;
        let routes = if is_wrap || is_unwrap || from == to {
            vec![]
        } else {
            let mut routes = rank_by_liquidity(find_all_paths(
                estimator,
                graph,
                wrap(from),
                wrap(to),
                MAX_SWAP_PATH_LENGTH,
            ));
            routes.truncate(MAX_CANDIDATE_PATHS);
            routes
        };
        debug!(%from, %to, routes = routes.len(), "swap routes found");

        Self {
            estimator,
            from,
            to,
            wrapped_native_token,
            routes,
        }
    }

    /// Candidates, most liquid first.
    pub fn routes(&self) -> &[SwapRoute] {
        &self.routes
    }

    fn wrapped_from(&self) -> Address {
        if self.from == NATIVE_TOKEN {
            self.wrapped_native_token
        } else {
            self.from
        }
    }

    /// Liquidity of the most liquid candidate, zero without candidates.
    pub fn max_liquidity(&self) -> U256 {
        self.max_liquidity_route().map(|(_, liquidity)| liquidity).unwrap_or_default()
    }

    pub fn max_liquidity_path(&self) -> Option<&[Address]> {
        self.max_liquidity_route().map(|(route, _)| route.path.as_slice())
    }

    fn max_liquidity_route(&self) -> Option<(&SwapRoute, U256)> {
        let mut best: Option<(&SwapRoute, U256)> = None;
        for route in &self.routes {
            let liquidity = max_swap_path_liquidity(self.estimator, &route.path, self.wrapped_from());
            if liquidity > best.map(|(_, best)| best).unwrap_or_default() {
                best = Some((route, liquidity));
            }
        }
        best
    }

    /// Route for trading `usd_in`, priced hop by hop with price impact applied.
    pub fn find_swap_path(&self, usd_in: U256, selection: RouteSelection) -> Option<SwapPathStats> {
        let route = price_route(self.estimator, &self.routes, usd_in, selection)?;
        evaluate_path(
            self.estimator,
            &route.path,
            self.from,
            usd_in,
            EvaluateOptions {
                wrapped_native_token: self.wrapped_native_token,
                unwrap_native: self.to == NATIVE_TOKEN,
                apply_price_impact: true,
            },
        )
    }
}

impl<'a> SwapRoutes<'a, MarketsInfoData> {
    /// Routes over the enabled markets of the snapshot.
    pub fn from_markets(markets: &'a MarketsInfoData, from: Address, to: Address) -> Self {
        Self::new(markets, &markets.graph(), markets.wrapped_native_token(), from, to)
    }
}
