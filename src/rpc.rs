//! RPC endpoints and the transport seam under [`crate::multicall::Aggregator`].

use std::{collections::HashMap, future::Future};

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
};
use rand::seq::SliceRandom;
use url::Url;

use crate::{ARBITRUM, AVALANCHE, ChainId, error::DexError};

const AVALANCHE_FUJI: ChainId = 43113;
const ARBITRUM_GOERLI: ChainId = 421613;

/// Primary and fallback endpoint lists per chain.
///
/// Both lists are sampled uniformly on every pick, an unconfigured chain
/// simply yields no endpoint.
#[derive(Clone, Debug, Default)]
pub struct Endpoints {
    primary: HashMap<ChainId, Vec<Url>>,
    fallback: HashMap<ChainId, Vec<Url>>,
}

impl Endpoints {
    /// Public keyless endpoints of the supported chains.
    pub fn defaults() -> Self {
        let urls = |list: &[&str]| -> Vec<Url> {
            list.iter().filter_map(|url| Url::parse(url).ok()).collect()
        };

        Self {
            primary: HashMap::from([
                (ARBITRUM, urls(&["https://arb1.arbitrum.io/rpc"])),
                (AVALANCHE, urls(&["https://api.avax.network/ext/bc/C/rpc"])),
                (
                    AVALANCHE_FUJI,
                    urls(&[
                        "https://avalanche-fuji-c-chain.publicnode.com",
                        "https://api.avax-test.network/ext/bc/C/rpc",
                    ]),
                ),
                (ARBITRUM_GOERLI, urls(&["https://goerli-rollup.arbitrum.io/rpc"])),
            ]),
            fallback: HashMap::from([(
                AVALANCHE_FUJI,
                urls(&[
                    "https://endpoints.omniatech.io/v1/avax/fuji/public",
                    "https://api.avax-test.network/ext/bc/C/rpc",
                    "https://ava-testnet.public.blastapi.io/ext/bc/C/rpc",
                ]),
            )]),
        }
    }

    /// Replaces the primary list of the chain.
    pub fn with_primary(mut self, chain_id: ChainId, urls: Vec<Url>) -> Self {
        self.primary.insert(chain_id, urls);
        self
    }

    /// Replaces the fallback list of the chain.
    pub fn with_fallback(mut self, chain_id: ChainId, urls: Vec<Url>) -> Self {
        self.fallback.insert(chain_id, urls);
        self
    }

    pub fn pick_primary(&self, chain_id: ChainId) -> Option<&Url> {
        Self::pick(&self.primary, chain_id)
    }

    pub fn pick_fallback(&self, chain_id: ChainId) -> Option<&Url> {
        Self::pick(&self.fallback, chain_id)
    }

    fn pick(set: &HashMap<ChainId, Vec<Url>>, chain_id: ChainId) -> Option<&Url> {
        set.get(&chain_id)?.choose(&mut rand::thread_rng())
    }
}

/// Minimal read-only node interface the SDK needs.
pub trait Transport: Send + Sync {
    /// `eth_call` against the latest block.
    fn call(&self, to: Address, input: Bytes) -> impl Future<Output = Result<Bytes, DexError>> + Send;

    fn gas_price(&self) -> impl Future<Output = Result<U256, DexError>> + Send;

    fn max_priority_fee_per_gas(&self) -> impl Future<Output = Result<U256, DexError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, DexError>> + Send;
}

/// [`Transport`] backed by an alloy provider.
#[derive(Clone, Debug)]
pub struct ProviderTransport<P> {
    provider: P,
}

impl<P: Provider> ProviderTransport<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: Provider> Transport for ProviderTransport<P> {
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, DexError> {
        let tx = TransactionRequest::default().with_to(to).with_input(input);
        Ok(self.provider.call(tx).await?)
    }

    async fn gas_price(&self) -> Result<U256, DexError> {
        Ok(U256::from(self.provider.get_gas_price().await?))
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256, DexError> {
        Ok(U256::from(self.provider.get_max_priority_fee_per_gas().await?))
    }

    async fn block_number(&self) -> Result<u64, DexError> {
        Ok(self.provider.get_block_number().await?)
    }
}

/// Opens a [`Transport`] to an endpoint.
pub trait Connect: Send + Sync {
    type Transport: Transport;

    fn connect(&self, endpoint: &Url) -> Result<Self::Transport, DexError>;
}

/// Plain HTTP JSON-RPC connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpConnector;

impl Connect for HttpConnector {
    type Transport = ProviderTransport<DynProvider>;

    fn connect(&self, endpoint: &Url) -> Result<Self::Transport, DexError> {
        let provider = ProviderBuilder::new().connect_http(endpoint.clone());
        Ok(ProviderTransport::new(DynProvider::new(provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_from_configured_set() {
        let endpoints = Endpoints::default()
            .with_primary(1, vec![Url::parse("http://a.local").unwrap()])
            .with_fallback(
                1,
                vec![
                    Url::parse("http://b.local").unwrap(),
                    Url::parse("http://c.local").unwrap(),
                ],
            );

        assert_eq!(endpoints.pick_primary(1).unwrap().as_str(), "http://a.local/");
        for _ in 0..16 {
            let picked = endpoints.pick_fallback(1).unwrap().as_str();
            assert!(picked == "http://b.local/" || picked == "http://c.local/");
        }
    }

    #[test]
    fn test_unconfigured_chain_yields_none() {
        let endpoints = Endpoints::defaults();
        assert!(endpoints.pick_primary(ARBITRUM).is_some());
        assert!(endpoints.pick_fallback(ARBITRUM).is_none());
        assert!(endpoints.pick_primary(1).is_none());

        let endpoints = endpoints.with_fallback(AVALANCHE_FUJI, vec![]);
        assert!(endpoints.pick_fallback(AVALANCHE_FUJI).is_none());
    }
}
