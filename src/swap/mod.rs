//! Swap routing across markets.
//!
//! Every market with two distinct collaterals is a pair of directed edges in
//! the [`MarketsGraph`]. [`find_all_paths`] enumerates simple paths of up to
//! [`MAX_SWAP_PATH_LENGTH`] markets between two tokens, [`rank_by_liquidity`]
//! orders them by their thinnest hop and [`price_route`] picks the one giving
//! the best output for a concrete trade size. [`evaluate_path`] prices a path
//! hop by hop with the exchange fee and price impact model.
//!
//! [`SwapRoutes`] ties the steps together for a single token pair.
//!
//! The solver reads market state through the [`SwapEstimator`] trait,
//! implemented by [`crate::markets::MarketsInfoData`].

mod graph;
mod impact;
mod paths;
mod routes;
mod stats;

pub use graph::*;
pub use impact::*;
pub use paths::*;
pub use routes::*;
pub use stats::*;

use alloy::primitives::{Address, U256};

use crate::markets::Market;

/// Maximum number of markets in a swap path.
pub const MAX_SWAP_PATH_LENGTH: usize = 3;

/// Number of most liquid paths priced for a trade.
pub const MAX_CANDIDATE_PATHS: usize = 5;

/// Market state the solver needs.
pub trait SwapEstimator {
    fn market(&self, market: Address) -> Option<&Market>;

    /// USD liquidity that can leave the market as `token_out`.
    fn available_liquidity(&self, market: Address, token_out: Address) -> Option<U256>;

    /// Simulates a single swap of `usd_in` worth of `token_in`,
    /// `None` if the market does not trade the pair.
    fn swap_stats(
        &self,
        market: Address,
        token_in: Address,
        token_out: Address,
        usd_in: U256,
        apply_price_impact: bool,
    ) -> Option<SwapStats>;
}
