//! Resilient reads.
//!
//! [`Fetcher`] runs batched [`Request`]s and single [`FetchCall`]s against a
//! primary endpoint and, when that fails with a transport error or times out,
//! makes exactly one attempt against a fallback endpoint of the same chain.

use std::{future::Future, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, U256},
};
use itertools::Itertools;
use tracing::{debug, error, warn};

use crate::{
    Chain, ChainId,
    error::DexError,
    multicall::{Aggregator, AggregatorRegistry, Request, Response, spread_outputs, with_deadline},
    rpc::{Connect, Endpoints, Transport},
};

pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(200_000);

/// When to involve the fallback endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Only after the primary endpoint failed.
    #[default]
    OnFailure,
    /// Also race the fallback against a primary still pending after the delay,
    /// the first success wins.
    Hedged(Duration),
}

#[derive(Clone, Copy, Debug)]
pub struct FetcherConfig {
    /// Deadline of a single attempt.
    pub deadline: Duration,
    pub policy: FallbackPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            policy: FallbackPolicy::default(),
        }
    }
}

/// Node-level reads not tied to a contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderCall {
    GasPrice,
    MaxPriorityFeePerGas,
    BlockNumber,
}

/// Single read issued outside of a multicall batch.
#[derive(Clone, derive_more::Debug)]
pub enum FetchCall {
    Contract {
        address: Address,
        #[debug("{}", function.signature())]
        function: Function,
        #[debug(skip)]
        args: Vec<DynSolValue>,
    },
    Provider(ProviderCall),
}

impl FetchCall {
    /// Contract call from a human-readable signature,
    /// e.g. `function codeOwners(bytes32) view returns (address)`.
    pub fn contract(address: Address, signature: &str, args: Vec<DynSolValue>) -> Result<Self, DexError> {
        let function = Function::parse(signature)
            .map_err(|err| DexError::InvalidRequest(format!("malformed signature {signature}: {err}")))?;
        if function.inputs.len() != args.len() {
            return Err(DexError::InvalidRequest(format!(
                "{} expects {} arguments, got {}",
                function.name,
                function.inputs.len(),
                args.len()
            )));
        }
        Ok(Self::Contract {
            address,
            function,
            args,
        })
    }

    fn name(&self) -> &str {
        match self {
            Self::Contract { function, .. } => &function.name,
            Self::Provider(ProviderCall::GasPrice) => "gasPrice",
            Self::Provider(ProviderCall::MaxPriorityFeePerGas) => "maxPriorityFeePerGas",
            Self::Provider(ProviderCall::BlockNumber) => "blockNumber",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutput {
    /// Decoded contract outputs, shaped like [`crate::multicall::CallResult::values`].
    Values(Vec<DynSolValue>),
    Number(U256),
}

impl FetchOutput {
    pub fn values(&self) -> &[DynSolValue] {
        match self {
            Self::Values(values) => values,
            Self::Number(_) => &[],
        }
    }

    pub fn number(&self) -> Option<U256> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Values(values) => values.first()?.as_uint().map(|(value, _)| value),
        }
    }
}

/// Entry point of all exchange reads.
#[derive(Debug)]
pub struct Fetcher<C: Connect> {
    registry: AggregatorRegistry<C>,
    config: FetcherConfig,
}

impl<C: Connect> Fetcher<C> {
    pub fn new(connector: C, endpoints: Endpoints) -> Self {
        Self {
            registry: AggregatorRegistry::new(connector, endpoints),
            config: FetcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FetcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &AggregatorRegistry<C> {
        &self.registry
    }

    /// Runs the request built from the `key` and parses the response.
    ///
    /// A `None` key skips the fetch entirely and yields `Ok(None)`,
    /// callers use it when the inputs of the query are not known yet.
    pub async fn fetch<K, T, B, P>(
        &self,
        chain: &Chain,
        name: &str,
        key: Option<K>,
        build: B,
        parse: P,
    ) -> Result<Option<T>, DexError>
    where
        B: FnOnce(ChainId, &K) -> Request,
        P: FnOnce(Response, ChainId, &K) -> Result<T, DexError>,
    {
        let Some(key) = key else {
            debug!(chain_id = chain.chain_id(), name, "fetch skipped");
            return Ok(None);
        };

        let request = build(chain.chain_id(), &key);
        if request.is_empty() {
            return Err(DexError::InvalidRequest(format!("{name}: empty multicall request")));
        }

        let deadline = self.config.deadline;
        let response = self
            .with_fallback(chain, name, |aggregator| {
                let request = &request;
                async move { aggregator.aggregate(request, deadline).await }
            })
            .await?;

        if !response.success {
            warn!(
                chain_id = chain.chain_id(),
                name,
                failed = %response.errors().map(|result| format!("{}.{}", result.group, result.key)).join(","),
                "multicall returned partial results"
            );
        }

        parse(response, chain.chain_id(), &key).map(Some)
    }

    /// Runs a single call with the same fallback rules as [`Self::fetch`].
    pub async fn fetch_call(&self, chain: &Chain, call: FetchCall) -> Result<FetchOutput, DexError> {
        let deadline = self.config.deadline;
        let name = call.name().to_string();
        self.with_fallback(chain, &name, |aggregator| {
            let call = &call;
            async move { execute(aggregator.transport(), call, deadline).await }
        })
        .await
    }

    async fn with_fallback<F, Fut, R>(&self, chain: &Chain, name: &str, run: F) -> Result<R, DexError>
    where
        F: Fn(Arc<Aggregator<C::Transport>>) -> Fut,
        Fut: Future<Output = Result<R, DexError>>,
    {
        let primary = run(self.registry.primary(chain)?);

        let delay = match self.config.policy {
            FallbackPolicy::OnFailure => {
                return match primary.await {
                    Ok(result) => Ok(result),
                    Err(err) => self.fall_back(chain, name, err, &run).await,
                };
            }
            FallbackPolicy::Hedged(delay) => delay,
        };

        tokio::pin!(primary);
        tokio::select! {
            result = &mut primary => match result {
                Ok(result) => return Ok(result),
                Err(err) => return self.fall_back(chain, name, err, &run).await,
            },
            _ = tokio::time::sleep(delay) => {}
        }

        let fallback = match self.registry.fallback(chain) {
            Ok(Some(fallback)) => fallback,
            Ok(None) => return primary.await,
            Err(err) => {
                warn!(chain_id = chain.chain_id(), name, %err, "failed to connect fallback endpoint");
                return primary.await;
            }
        };

        debug!(chain_id = chain.chain_id(), name, "primary endpoint is slow, hedging with fallback");
        let fallback = run(fallback);
        tokio::pin!(fallback);
        tokio::select! {
            result = &mut primary => match result {
                Ok(result) => Ok(result),
                Err(err) => {
                    warn!(chain_id = chain.chain_id(), name, %err, "primary endpoint failed, awaiting fallback");
                    fallback.await.inspect_err(|err| {
                        error!(chain_id = chain.chain_id(), name, %err, "fallback endpoint failed")
                    })
                }
            },
            result = &mut fallback => match result {
                Ok(result) => Ok(result),
                Err(fallback_err) => {
                    error!(chain_id = chain.chain_id(), name, %fallback_err, "fallback endpoint failed, awaiting primary");
                    primary.await.map_err(|_| fallback_err)
                }
            },
        }
    }

    async fn fall_back<F, Fut, R>(&self, chain: &Chain, name: &str, err: DexError, run: &F) -> Result<R, DexError>
    where
        F: Fn(Arc<Aggregator<C::Transport>>) -> Fut,
        Fut: Future<Output = Result<R, DexError>>,
    {
        if !err.is_retriable() {
            return Err(err);
        }

        let Some(fallback) = self.registry.fallback(chain)? else {
            error!(chain_id = chain.chain_id(), name, %err, "request failed, no fallback endpoint");
            return Err(err);
        };

        warn!(chain_id = chain.chain_id(), name, %err, "request failed, retrying with fallback endpoint");
        run(fallback).await.inspect_err(|fallback_err| {
            error!(chain_id = chain.chain_id(), name, %fallback_err, "fallback request failed")
        })
    }
}

async fn execute<T: Transport>(transport: &T, call: &FetchCall, deadline: Duration) -> Result<FetchOutput, DexError> {
    match call {
        FetchCall::Contract {
            address,
            function,
            args,
        } => {
            let input = function.abi_encode_input(args).map_err(|err| {
                DexError::InvalidRequest(format!("{}: failed to encode arguments: {err}", function.name))
            })?;
            let output = with_deadline(deadline, transport.call(*address, input.into())).await?;
            let values = function.abi_decode_output(&output)?;
            Ok(FetchOutput::Values(spread_outputs(function, values)))
        }
        FetchCall::Provider(ProviderCall::GasPrice) => {
            with_deadline(deadline, transport.gas_price()).await.map(FetchOutput::Number)
        }
        FetchCall::Provider(ProviderCall::MaxPriorityFeePerGas) => {
            with_deadline(deadline, transport.max_priority_fee_per_gas())
                .await
                .map(FetchOutput::Number)
        }
        FetchCall::Provider(ProviderCall::BlockNumber) => with_deadline(deadline, transport.block_number())
            .await
            .map(|block| FetchOutput::Number(U256::from(block))),
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{B256, address};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::{
        abi::dynamic,
        multicall::{CallGroup, bytes32},
        testing::{MockConnector, MockContracts, MockTransport},
    };

    const DATA_STORE: Address = address!("0x00000000000000000000000000000000000000d5");

    fn chain() -> Chain {
        Chain::arbitrum()
    }

    fn request() -> Request {
        let abi = dynamic::parse(dynamic::DATA_STORE).unwrap();
        Request::new().group(
            "dataStore",
            CallGroup::new(DATA_STORE, abi).call("value", "getUint", vec![bytes32(B256::ZERO)]),
        )
    }

    fn answering(value: u64) -> MockTransport {
        MockContracts::default()
            .on_uint(DATA_STORE, "getUint", vec![bytes32(B256::ZERO)], U256::from(value))
            .into_transport()
    }

    fn fetcher(primary: MockTransport, fallback: Option<MockTransport>) -> Fetcher<MockConnector> {
        let mut connector = MockConnector::default().with("http://primary.local", primary);
        let mut endpoints = Endpoints::default().with_primary(
            crate::ARBITRUM,
            vec!["http://primary.local".parse().unwrap()],
        );
        if let Some(fallback) = fallback {
            connector = connector.with("http://fallback.local", fallback);
            endpoints = endpoints.with_fallback(
                crate::ARBITRUM,
                vec!["http://fallback.local".parse().unwrap()],
            );
        }
        Fetcher::new(connector, endpoints)
    }

    async fn fetch_value(fetcher: &Fetcher<MockConnector>) -> Result<Option<U256>, DexError> {
        fetcher
            .fetch(
                &chain(),
                "value",
                Some(()),
                |_, _| request(),
                |response, _, _| response.require_uint("dataStore", "value"),
            )
            .await
    }

    #[tokio::test]
    async fn test_skip_key_does_not_touch_network() {
        let primary = answering(1);
        let fetcher = fetcher(primary.clone(), None);

        let result: Option<U256> = assert_ok!(
            fetcher
                .fetch(
                    &chain(),
                    "value",
                    None::<()>,
                    |_, _| request(),
                    |response, _, _| response.require_uint("dataStore", "value"),
                )
                .await
        );
        assert!(result.is_none());
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_built_from_key() {
        let primary = answering(42);
        let fetcher = fetcher(primary, None);

        let result = fetcher
            .fetch(
                &chain(),
                "value",
                Some(B256::ZERO),
                |chain_id, key| {
                    assert_eq!(chain_id, crate::ARBITRUM);
                    let abi = dynamic::parse(dynamic::DATA_STORE).unwrap();
                    Request::new().group(
                        "dataStore",
                        CallGroup::new(DATA_STORE, abi).call("value", "getUint", vec![bytes32(*key)]),
                    )
                },
                |response, _, _| response.require_uint("dataStore", "value"),
            )
            .await;
        assert_eq!(assert_ok!(result), Some(U256::from(42)));
    }

    #[tokio::test]
    async fn test_empty_request_is_a_configuration_error() {
        let primary = answering(1);
        let fetcher = fetcher(primary.clone(), None);

        let result = fetcher
            .fetch(&chain(), "empty", Some(()), |_, _| Request::new(), |_, _, _| Ok(()))
            .await;
        assert!(matches!(result, Err(DexError::InvalidRequest(_))));
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let fetcher = Fetcher::new(MockConnector::default(), Endpoints::default());
        let result = fetch_value(&fetcher).await;
        assert!(matches!(result, Err(DexError::MissingEndpoint(crate::ARBITRUM))));
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_once() {
        let primary = MockTransport::unreachable();
        let fallback = answering(7);
        let fetcher = fetcher(primary.clone(), Some(fallback.clone()));

        assert_eq!(assert_ok!(fetch_value(&fetcher).await), Some(U256::from(7)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_error_is_surfaced() {
        let primary = MockTransport::unreachable();
        let fallback = MockTransport::failing(|| DexError::Transport("fallback down".to_string()));
        let fetcher = fetcher(primary.clone(), Some(fallback.clone()));

        let err = assert_err!(fetch_value(&fetcher).await);
        assert!(matches!(err, DexError::Transport(msg) if msg == "fallback down"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_fallback_surfaces_primary_error() {
        let primary = MockTransport::unreachable();
        let fetcher = fetcher(primary.clone(), None);

        let err = assert_err!(fetch_value(&fetcher).await);
        assert!(matches!(err, DexError::Transport(_)));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_sampled_per_call() {
        let dead = MockTransport::unreachable();
        let alive = answering(3);
        let connector = MockConnector::default()
            .with("http://dead.local", dead.clone())
            .with("http://alive.local", alive.clone());
        let endpoints = Endpoints::default().with_primary(
            crate::ARBITRUM,
            vec!["http://dead.local".parse().unwrap(), "http://alive.local".parse().unwrap()],
        );
        let fetcher = Fetcher::new(connector, endpoints);

        let mut successes = 0;
        for _ in 0..40 {
            if let Ok(Some(value)) = fetch_value(&fetcher).await {
                assert_eq!(value, U256::from(3));
                successes += 1;
            }
        }

        assert!(successes > 0);
        assert!(successes < 40);
        assert_eq!(dead.calls() + alive.calls(), 40);
        assert_eq!(alive.calls(), successes);
    }

    #[tokio::test]
    async fn test_non_retriable_error_skips_fallback() {
        let primary = MockTransport::failing(|| DexError::OutOfGas);
        let fallback = answering(7);
        let fetcher = fetcher(primary, Some(fallback.clone()));

        assert!(matches!(fetch_value(&fetcher).await, Err(DexError::OutOfGas)));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_single_fallback() {
        let primary = answering(1).with_delay(Duration::from_secs(60));
        let fallback = answering(2);
        let fetcher = fetcher(primary.clone(), Some(fallback.clone())).with_config(FetcherConfig {
            deadline: Duration::from_secs(10),
            policy: FallbackPolicy::OnFailure,
        });

        assert_eq!(assert_ok!(fetch_value(&fetcher).await), Some(U256::from(2)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedged_fallback_wins_race() {
        let primary = answering(1).with_delay(Duration::from_secs(30));
        let fallback = answering(2).with_delay(Duration::from_secs(1));
        let fetcher = fetcher(primary.clone(), Some(fallback.clone())).with_config(FetcherConfig {
            deadline: Duration::from_secs(100),
            policy: FallbackPolicy::Hedged(Duration::from_secs(5)),
        });

        assert_eq!(assert_ok!(fetch_value(&fetcher).await), Some(U256::from(2)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedged_fast_primary_skips_fallback() {
        let primary = answering(1).with_delay(Duration::from_secs(1));
        let fallback = answering(2);
        let fetcher = fetcher(primary, Some(fallback.clone())).with_config(FetcherConfig {
            deadline: Duration::from_secs(100),
            policy: FallbackPolicy::Hedged(Duration::from_secs(5)),
        });

        assert_eq!(assert_ok!(fetch_value(&fetcher).await), Some(U256::from(1)));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedged_primary_failure_after_hedge_does_not_refire() {
        let primary = MockTransport::unreachable().with_delay(Duration::from_secs(10));
        let fallback = answering(2).with_delay(Duration::from_secs(20));
        let fetcher = fetcher(primary.clone(), Some(fallback.clone())).with_config(FetcherConfig {
            deadline: Duration::from_secs(100),
            policy: FallbackPolicy::Hedged(Duration::from_secs(5)),
        });

        assert_eq!(assert_ok!(fetch_value(&fetcher).await), Some(U256::from(2)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_contract_call() {
        let owner = address!("0x00000000000000000000000000000000000000ee");
        let storage = address!("0x00000000000000000000000000000000000000cc");
        let primary = MockContracts::default()
            .on(
                storage,
                "codeOwners",
                vec![bytes32(B256::repeat_byte(1))],
                vec![DynSolValue::Address(owner)],
            )
            .into_transport();
        let fetcher = fetcher(primary, None);

        let call = FetchCall::contract(
            storage,
            "function codeOwners(bytes32) view returns (address)",
            vec![bytes32(B256::repeat_byte(1))],
        )
        .unwrap();
        let output = assert_ok!(fetcher.fetch_call(&chain(), call).await);
        assert_eq!(output.values(), &[DynSolValue::Address(owner)]);
    }

    #[tokio::test]
    async fn test_provider_call() {
        let primary = MockTransport::unreachable().with_gas_price(U256::from(100), U256::from(5));
        let fetcher = fetcher(primary, None);

        let output = assert_ok!(
            fetcher
                .fetch_call(&chain(), FetchCall::Provider(ProviderCall::GasPrice))
                .await
        );
        assert_eq!(output.number(), Some(U256::from(100)));

        let output = assert_ok!(
            fetcher
                .fetch_call(&chain(), FetchCall::Provider(ProviderCall::MaxPriorityFeePerGas))
                .await
        );
        assert_eq!(output.number(), Some(U256::from(5)));
    }

    #[test]
    fn test_contract_call_arity_is_checked() {
        let result = FetchCall::contract(
            Address::ZERO,
            "function codeOwners(bytes32) view returns (address)",
            vec![],
        );
        assert!(matches!(result, Err(DexError::InvalidRequest(_))));
    }
}
