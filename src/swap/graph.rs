use std::collections::HashMap;

use alloy::primitives::Address;

use crate::markets::Market;

/// Directed hop through a market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarketEdge {
    pub market: Address,
    pub from: Address,
    pub to: Address,
}

/// Adjacency list of tokens tradeable through markets.
#[derive(Clone, Debug, Default)]
pub struct MarketsGraph {
    adjacency: HashMap<Address, Vec<MarketEdge>>,
}

impl MarketsGraph {
    /// Adds both directions of every market.
    ///
    /// Single-collateral markets register their token without an edge,
    /// parallel markets over the same pair give parallel edges.
    pub fn build<'a>(markets: impl IntoIterator<Item = &'a Market>) -> Self {
        let mut adjacency: HashMap<Address, Vec<MarketEdge>> = HashMap::new();
        for market in markets {
            let (long, short) = (market.long_token, market.short_token);
            if market.is_same_collaterals() {
                adjacency.entry(long).or_default();
                continue;
            }
            adjacency.entry(long).or_default().push(MarketEdge {
                market: market.market_token,
                from: long,
                to: short,
            });
            adjacency.entry(short).or_default().push(MarketEdge {
                market: market.market_token,
                from: short,
                to: long,
            });
        }
        Self { adjacency }
    }

    /// Outgoing edges in market order.
    pub fn edges_from(&self, token: Address) -> &[MarketEdge] {
        self.adjacency.get(&token).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, token: Address) -> bool {
        self.adjacency.contains_key(&token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Address> {
        self.adjacency.keys()
    }

    /// Number of directed edges.
    pub fn edges_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const ETH: Address = address!("0x0000000000000000000000000000000000000e17");
    const USDC: Address = address!("0x00000000000000000000000000000000000005dc");
    const BTC: Address = address!("0x0000000000000000000000000000000000000b7c");

    #[test]
    fn test_build_graph() {
        let eth_usdc = Market::new(Address::repeat_byte(1), ETH, ETH, USDC);
        let eth_usdc_2 = Market::new(Address::repeat_byte(2), ETH, ETH, USDC);
        let btc_btc = Market::new(Address::repeat_byte(3), BTC, BTC, BTC);

        let graph = MarketsGraph::build([&eth_usdc, &eth_usdc_2, &btc_btc]);

        assert_eq!(graph.edges_count(), 4);
        assert!(graph.contains(BTC));
        assert!(graph.edges_from(BTC).is_empty());

        let from_eth = graph.edges_from(ETH);
        assert_eq!(
            from_eth,
            &[
                MarketEdge {
                    market: eth_usdc.market_token,
                    from: ETH,
                    to: USDC
                },
                MarketEdge {
                    market: eth_usdc_2.market_token,
                    from: ETH,
                    to: USDC
                },
            ]
        );
        assert_eq!(graph.edges_from(USDC)[0].to, ETH);
        assert!(graph.edges_from(Address::ZERO).is_empty());
    }
}
