use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{MarketsInfoData, fetch_markets, fetch_markets_info};
use crate::{
    Chain, ChainId,
    error::DexError,
    fetch::Fetcher,
    rpc::Connect,
    tokens::TokensData,
};

/// Latest markets snapshot per chain.
///
/// Snapshots are immutable and replaced as a whole, readers holding an older
/// [`Arc`] keep a consistent view while a refresh is in flight.
#[derive(Debug, Default)]
pub struct MarketsCache {
    snapshots: DashMap<ChainId, Arc<MarketsInfoData>>,
}

impl MarketsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<MarketsInfoData>> {
        self.snapshots.get(&chain_id).map(|entry| entry.value().clone())
    }

    pub fn replace(&self, chain_id: ChainId, data: MarketsInfoData) -> Arc<MarketsInfoData> {
        let data = Arc::new(data);
        self.snapshots.insert(chain_id, data.clone());
        data
    }

    /// Fetches markets and their state anew and swaps the snapshot in.
    pub async fn refresh<C: Connect>(
        &self,
        fetcher: &Fetcher<C>,
        chain: &Chain,
        tokens: &TokensData,
    ) -> Result<Arc<MarketsInfoData>, DexError> {
        let markets = fetch_markets(fetcher, chain).await?;
        let data = fetch_markets_info(fetcher, chain, &markets, tokens).await?;
        info!(chain_id = chain.chain_id(), markets = data.len(), "markets snapshot refreshed");
        Ok(self.replace(chain.chain_id(), data))
    }

    pub fn invalidate(&self, chain_id: ChainId) {
        self.snapshots.remove(&chain_id);
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use tokio_test::assert_ok;

    use super::*;
    use crate::{
        multicall::{address, uint},
        rpc::Endpoints,
        testing::{MarketInfoBuilder, MockConnector, MockContracts},
    };

    #[test]
    fn test_replace_keeps_old_snapshot_alive() {
        let cache = MarketsCache::new();
        assert!(cache.get(crate::ARBITRUM).is_none());

        let market = MarketInfoBuilder::eth_usdc(Address::repeat_byte(0xaa)).build();
        let first = cache.replace(
            crate::ARBITRUM,
            MarketsInfoData::new(vec![market], TokensData::new(), Address::ZERO),
        );
        let held = cache.get(crate::ARBITRUM).unwrap();

        cache.replace(crate::ARBITRUM, MarketsInfoData::default());
        assert_eq!(held.len(), 1);
        assert!(Arc::ptr_eq(&first, &held));
        assert!(cache.get(crate::ARBITRUM).unwrap().is_empty());

        cache.invalidate(crate::ARBITRUM);
        assert!(cache.get(crate::ARBITRUM).is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_markets() {
        let chain = Chain::arbitrum();
        let contracts = MockContracts::default().on(
            chain.reader(),
            "getMarkets",
            vec![address(chain.data_store()), uint(U256::ZERO), uint(U256::from(1000))],
            vec![alloy::dyn_abi::DynSolValue::Array(vec![])],
        );
        let fetcher = Fetcher::new(
            MockConnector::default().with("http://rpc.local", contracts.into_transport()),
            Endpoints::default().with_primary(crate::ARBITRUM, vec!["http://rpc.local".parse().unwrap()]),
        );

        let cache = MarketsCache::new();
        let data = assert_ok!(cache.refresh(&fetcher, &chain, &TokensData::new()).await);
        assert!(data.is_empty());
        assert!(cache.get(crate::ARBITRUM).is_some());
    }
}
