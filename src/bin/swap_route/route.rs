//! Route search over a fresh markets snapshot.

use std::fmt;

use alloy::primitives::{Address, I256, U256};
use synthetics_sdk::{
    Chain,
    fetch::Fetcher,
    markets::{MarketsInfoData, fetch_markets, fetch_markets_info},
    num::Converter,
    rpc::Connect,
    swap::{SwapPathStats, SwapRoutes},
    tokens::{OracleKeeper, TokenData, fetch_tokens_data},
};
use tracing::info;

use crate::{
    config::RouteConfig,
    error::{Error, Result},
};

/// Tokens, markets and pool state of the chain.
pub async fn fetch_snapshot<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain) -> Result<MarketsInfoData> {
    let keeper = OracleKeeper::for_chain(chain)?;
    let (tokens, markets) = futures::try_join!(fetch_tokens_data(&keeper, chain), fetch_markets(fetcher, chain))?;
    let info = fetch_markets_info(fetcher, chain, &markets, &tokens).await?;
    info!(tokens = tokens.len(), markets = info.len(), "markets snapshot fetched");
    Ok(info)
}

/// Solved route ready to print.
#[derive(Debug)]
pub struct RouteReport {
    pub from: TokenData,
    pub to: TokenData,
    pub usd_in: U256,
    pub stats: SwapPathStats,
    symbols: Vec<(Address, String)>,
}

pub fn find_route(markets: &MarketsInfoData, config: &RouteConfig) -> Result<RouteReport> {
    let from = config.from.resolve(markets.tokens())?.clone();
    let to = config.to.resolve(markets.tokens())?.clone();

    let routes = SwapRoutes::from_markets(markets, from.address, to.address);
    info!(candidates = routes.routes().len(), max_liquidity = %routes.max_liquidity(), "swap candidates");

    let stats = routes
        .find_swap_path(config.usd_in, config.selection)
        .ok_or_else(|| Error::NoRoute(from.symbol.clone(), to.symbol.clone()))?;

    let symbols = stats
        .swap_steps
        .iter()
        .flat_map(|step| [step.token_in, step.token_out])
        .filter_map(|address| {
            let token = markets
                .tokens()
                .get(&address)
                .or_else(|| markets.iter().find_map(|info| info.token(address)))?;
            Some((address, token.symbol.clone()))
        })
        .collect();

    Ok(RouteReport {
        from,
        to,
        usd_in: config.usd_in,
        stats,
        symbols,
    })
}

impl RouteReport {
    fn symbol(&self, address: Address) -> String {
        self.symbols
            .iter()
            .find(|(token, _)| *token == address)
            .map_or_else(|| address.to_string(), |(_, symbol)| symbol.clone())
    }

    fn decimals(&self, address: Address) -> u8 {
        if address == self.to.address {
            self.to.decimals
        } else if address == self.from.address {
            self.from.decimals
        } else {
            18
        }
    }
}

/// Drops trailing fractional zeros.
fn trim(value: String) -> String {
    if value.contains('.') && !value.contains(['e', 'E']) {
        value.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        value
    }
}

fn usd(value: U256) -> String {
    Converter::usd()
        .from_unsigned::<4>(value)
        .map_or_else(|| value.to_string(), |value| format!("${}", trim(value.to_string())))
}

fn signed_usd(value: I256) -> String {
    Converter::usd()
        .from_signed::<4>(value)
        .map_or_else(|| value.to_string(), |value| format!("${}", trim(value.to_string())))
}

fn amount(value: U256, decimals: u8) -> String {
    Converter::new(decimals)
        .from_unsigned::<4>(value)
        .map_or_else(|| value.to_string(), |value| trim(value.to_string()))
}

impl fmt::Display for RouteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} -> {}, {} in", self.from.symbol, self.to.symbol, usd(self.usd_in))?;
        for (i, step) in self.stats.swap_steps.iter().enumerate() {
            writeln!(
                f,
                "  {}. market {}: {} {} -> {} {} ({}), fee {}, impact {}{}",
                i + 1,
                step.market,
                amount(step.amount_in, self.decimals(step.token_in)),
                self.symbol(step.token_in),
                amount(step.amount_out, self.decimals(step.token_out)),
                self.symbol(step.token_out),
                usd(step.usd_out),
                usd(step.swap_fee_usd),
                signed_usd(step.price_impact_delta_usd),
                if step.is_out_liquidity { ", out of liquidity" } else { "" },
            )?;
        }
        write!(
            f,
            "out: {} {} ({}), swap fees {}, price impact {}, net {}",
            amount(self.stats.amount_out, self.to.decimals),
            self.to.symbol,
            usd(self.stats.usd_out),
            usd(self.stats.total_swap_fee_usd),
            signed_usd(self.stats.total_price_impact_delta_usd),
            signed_usd(self.stats.total_fees_delta_usd),
        )
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use synthetics_sdk::{
        num::PRECISION,
        swap::RouteSelection,
        testing::{MarketInfoBuilder, token},
        tokens::TokensData,
    };

    use super::*;
    use crate::config::TokenRef;

    const WETH: Address = address!("0x82af49447d8a07e3bd95bd0d56f35241523fbab1");
    const USDC: Address = address!("0xaf88d065e77c8cc2239327c5edb3a432268e5831");
    const ETH_USD: Address = address!("0x70d95587d40a2caf56bd97485ab3eec10bee6336");

    fn markets() -> MarketsInfoData {
        let tokens = TokensData::from([
            (USDC, token(USDC, "USDC", 6, PRECISION)),
            (WETH, token(WETH, "WETH", 18, U256::from(2000) * PRECISION)),
        ]);
        MarketsInfoData::new(vec![MarketInfoBuilder::eth_usdc(ETH_USD).build()], tokens, WETH)
    }

    fn config(from: &str, to: &str) -> RouteConfig {
        RouteConfig {
            from: TokenRef::Symbol(from.to_string()),
            to: TokenRef::Symbol(to.to_string()),
            usd_in: U256::from(1000) * PRECISION,
            selection: RouteSelection::BestOutput,
        }
    }

    #[test]
    fn test_find_route() {
        let report = find_route(&markets(), &config("USDC", "WETH")).unwrap();
        assert_eq!(report.stats.swap_path, vec![ETH_USD]);
        // no fees nor impact in the fixture
        assert_eq!(report.stats.usd_out, U256::from(1000) * PRECISION);

        let printed = report.to_string();
        assert!(printed.starts_with("USDC -> WETH, $"));
        assert!(printed.contains("1. market"));
        assert!(printed.contains("out of liquidity") == report.stats.swap_steps[0].is_out_liquidity);
        assert_eq!(printed.lines().count(), 3);
    }

    #[test]
    fn test_trim() {
        assert_eq!(trim("1000.000".to_string()), "1000");
        assert_eq!(trim("0.500".to_string()), "0.5");
        assert_eq!(trim("100".to_string()), "100");
    }

    #[test]
    fn test_unknown_pair() {
        assert!(matches!(find_route(&markets(), &config("USDC", "BTC")), Err(Error::Config(_))));
    }
}
