use std::{future::Future, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::Function,
    primitives::Address,
    sol_types::SolCall,
};
use dashmap::DashMap;
use itertools::Itertools;
use tracing::{debug, error, warn};
use url::Url;

use super::{CallResult, Request, Response};
use crate::{
    Chain, ChainId,
    abi::{
        errors::CustomErrors::CustomErrorsErrors,
        multicall::IMulticall3::{self, Call3},
    },
    error::{DexError, RevertReason},
    rpc::{Connect, Endpoints, Transport},
};

/// Packs [`Request`]s into Multicall3 `aggregate3` calls over a single transport.
#[derive(Debug)]
pub struct Aggregator<T> {
    chain_id: ChainId,
    multicall: Address,
    transport: T,
}

impl<T: Transport> Aggregator<T> {
    pub fn new(chain_id: ChainId, multicall: Address, transport: T) -> Self {
        Self {
            chain_id,
            multicall,
            transport,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Executes all calls of the `request` in a single round trip.
    ///
    /// Individual call failures are recorded in the [`Response`], only
    /// transport failures, an undecodable batch envelope and deadline expiry
    /// are returned as errors.
    pub async fn aggregate(&self, request: &Request, deadline: Duration) -> Result<Response, DexError> {
        if request.is_empty() {
            return Err(DexError::InvalidRequest("empty multicall request".to_string()));
        }

        let mut origins: Vec<(&str, &str, &Function)> = Vec::with_capacity(request.calls_count());
        let mut calls = Vec::with_capacity(request.calls_count());
        for (name, group) in request.groups() {
            if group.is_empty() {
                debug!(chain_id = self.chain_id, group = name, "skipping multicall group without calls");
                continue;
            }
            for (key, call) in group.calls() {
                let function = group.function(call)?;
                let input = function.abi_encode_input(call.args()).map_err(|err| {
                    DexError::InvalidRequest(format!("{name}.{key}: failed to encode arguments: {err}"))
                })?;
                calls.push(Call3 {
                    target: group.target(),
                    allowFailure: true,
                    callData: input.into(),
                });
                origins.push((name, key, function));
            }
        }

        if calls.is_empty() {
            return Ok(Response::empty());
        }

        debug!(
            chain_id = self.chain_id,
            groups = %request.groups().map(|(name, _)| name).join(","),
            calls = calls.len(),
            "sending multicall batch"
        );

        let input = IMulticall3::aggregate3Call { calls }.abi_encode();
        let output = with_deadline(deadline, self.transport.call(self.multicall, input.into()))
            .await
            .inspect_err(|err| error!(chain_id = self.chain_id, %err, "multicall batch failed"))?;

        let results = IMulticall3::aggregate3Call::abi_decode_returns(&output).map_err(|err| {
            error!(chain_id = self.chain_id, %err, "malformed multicall response");
            DexError::Fatal(format!("malformed multicall response: {err}"))
        })?;
        if results.len() != origins.len() {
            return Err(DexError::Fatal(format!(
                "multicall returned {} results for {} calls",
                results.len(),
                origins.len()
            )));
        }

        let mut response = Response::empty();
        for ((group, key, function), result) in origins.into_iter().zip(results) {
            response.insert(decode_result(group, key, function, result));
        }
        Ok(response)
    }
}

fn decode_result(group: &str, key: &str, function: &Function, result: IMulticall3::Result) -> CallResult {
    let outcome = if result.success {
        function
            .abi_decode_output(&result.returnData)
            .map(|values| spread_outputs(function, values))
            .map_err(|err| format!("undecodable output: {err}"))
    } else {
        Err(format!(
            "{:?}",
            RevertReason::<CustomErrorsErrors>::from(result.returnData)
        ))
    };

    match outcome {
        Ok(values) => CallResult {
            group: group.to_string(),
            key: key.to_string(),
            success: true,
            values,
            error: None,
        },
        Err(error) => {
            warn!(group, key, method = %function.name, error = %error, "multicall call failed");
            CallResult {
                group: group.to_string(),
                key: key.to_string(),
                success: false,
                values: vec![],
                error: Some(error),
            }
        }
    }
}

/// A single array or tuple output is spread into its elements,
/// a single scalar output is kept as a one-element list.
pub(crate) fn spread_outputs(function: &Function, mut values: Vec<DynSolValue>) -> Vec<DynSolValue> {
    if function.outputs.len() != 1 || values.len() != 1 {
        return values;
    }
    match values.pop() {
        Some(DynSolValue::Array(items))
        | Some(DynSolValue::FixedArray(items))
        | Some(DynSolValue::Tuple(items)) => items,
        Some(value) => vec![value],
        None => vec![],
    }
}

pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    future: impl Future<Output = Result<T, DexError>>,
) -> Result<T, DexError> {
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| DexError::Timeout)?
}

/// Aggregators per endpoint, owned by the application.
///
/// A primary endpoint is sampled for every call, its connection is made once
/// and reused afterwards. Fallback aggregators are connected anew for every
/// fallback attempt.
#[derive(derive_more::Debug)]
pub struct AggregatorRegistry<C: Connect> {
    #[debug(skip)]
    connector: C,
    endpoints: Endpoints,
    #[debug(skip)]
    primaries: DashMap<(ChainId, Url), Arc<Aggregator<C::Transport>>>,
}

impl<C: Connect> AggregatorRegistry<C> {
    pub fn new(connector: C, endpoints: Endpoints) -> Self {
        Self {
            connector,
            endpoints,
            primaries: DashMap::new(),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Aggregator over a primary endpoint of the chain, sampled anew on every call.
    pub fn primary(&self, chain: &Chain) -> Result<Arc<Aggregator<C::Transport>>, DexError> {
        let chain_id = chain.chain_id();
        let endpoint = self
            .endpoints
            .pick_primary(chain_id)
            .ok_or(DexError::MissingEndpoint(chain_id))?;

        let cache_key = (chain_id, endpoint.clone());
        if let Some(existing) = self.primaries.get(&cache_key) {
            return Ok(existing.value().clone());
        }

        debug!(chain_id, %endpoint, "connecting primary endpoint");
        let aggregator = Arc::new(Aggregator::new(
            chain_id,
            chain.multicall(),
            self.connector.connect(endpoint)?,
        ));
        Ok(self.primaries.entry(cache_key).or_insert(aggregator).value().clone())
    }

    /// Fresh aggregator over a fallback endpoint, `None` if the chain has none.
    pub fn fallback(&self, chain: &Chain) -> Result<Option<Arc<Aggregator<C::Transport>>>, DexError> {
        let Some(endpoint) = self.endpoints.pick_fallback(chain.chain_id()) else {
            return Ok(None);
        };
        debug!(chain_id = chain.chain_id(), %endpoint, "connecting fallback endpoint");
        Ok(Some(Arc::new(Aggregator::new(
            chain.chain_id(),
            chain.multicall(),
            self.connector.connect(endpoint)?,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        json_abi::Function,
        primitives::{Address, B256, Bytes, U256, address},
    };
    use tokio_test::assert_ok;

    use super::*;
    use crate::{
        abi::dynamic,
        multicall::{CallGroup, bytes32},
        testing::{MockContracts, MockTransport},
    };

    const DATA_STORE: Address = address!("0x00000000000000000000000000000000000000d5");
    const DEADLINE: Duration = Duration::from_secs(5);

    fn key(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    fn data_store_request(keys: &[(&str, B256)]) -> Request {
        let abi = dynamic::parse(dynamic::DATA_STORE).unwrap();
        let group = keys.iter().fold(CallGroup::new(DATA_STORE, abi), |group, (name, key)| {
            group.call(*name, "getUint", vec![bytes32(*key)])
        });
        Request::new().group("dataStore", group)
    }

    fn aggregator(transport: MockTransport) -> Aggregator<MockTransport> {
        Aggregator::new(1, crate::MULTICALL3, transport)
    }

    #[tokio::test]
    async fn test_every_call_key_gets_a_result() {
        let transport = MockContracts::default()
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(1))], U256::from(10))
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(2))], U256::from(20))
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(3))], U256::from(30))
            .into_transport();

        let request = data_store_request(&[("a", key(1)), ("b", key(2)), ("c", key(3))]);
        let response = assert_ok!(aggregator(transport.clone()).aggregate(&request, DEADLINE).await);

        assert!(response.success);
        assert_eq!(response.len(), 3);
        assert_eq!(response.require_uint("dataStore", "a").unwrap(), U256::from(10));
        assert_eq!(response.require_uint("dataStore", "c").unwrap(), U256::from(30));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_results_tagged_across_groups() {
        let other_store = address!("0x00000000000000000000000000000000000000d6");
        let transport = MockContracts::default()
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(1))], U256::from(10))
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(2))], U256::from(20))
            .on_uint(other_store, "getUint", vec![bytes32(key(1))], U256::from(11))
            .on_uint(other_store, "getUint", vec![bytes32(key(2))], U256::from(21))
            .on_uint(other_store, "getUint", vec![bytes32(key(3))], U256::from(31))
            .into_transport();

        let abi = dynamic::parse(dynamic::DATA_STORE).unwrap();
        let request = Request::new()
            .group(
                "first",
                CallGroup::new(DATA_STORE, abi.clone())
                    .call("a", "getUint", vec![bytes32(key(1))])
                    .call("b", "getUint", vec![bytes32(key(2))]),
            )
            .group("idle", CallGroup::new(DATA_STORE, abi.clone()))
            .group(
                "second",
                CallGroup::new(other_store, abi)
                    .call("c", "getUint", vec![bytes32(key(3))])
                    .call("a", "getUint", vec![bytes32(key(1))])
                    .call("b", "getUint", vec![bytes32(key(2))]),
            );

        let response = assert_ok!(aggregator(transport.clone()).aggregate(&request, DEADLINE).await);
        assert_eq!(response.len(), 5);
        assert_eq!(transport.calls(), 1);
        assert!(response.group("idle").is_none());

        let tagged: Vec<_> = response
            .groups()
            .flat_map(|(name, results)| results.iter().map(move |result| (name, result)))
            .map(|(name, result)| {
                assert_eq!(name, result.group);
                (result.group.as_str(), result.key.as_str(), result.uint(0))
            })
            .collect();
        assert_eq!(
            tagged,
            vec![
                ("first", "a", Some(U256::from(10))),
                ("first", "b", Some(U256::from(20))),
                ("second", "c", Some(U256::from(31))),
                ("second", "a", Some(U256::from(11))),
                ("second", "b", Some(U256::from(21))),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_call_does_not_abort_batch() {
        let transport = MockContracts::default()
            .on_uint(DATA_STORE, "getUint", vec![bytes32(key(1))], U256::from(10))
            .into_transport();

        let request = data_store_request(&[("known", key(1)), ("unknown", key(2))]);
        let response = assert_ok!(aggregator(transport).aggregate(&request, DEADLINE).await);

        assert!(!response.success);
        assert_eq!(response.len(), 2);

        let known = response.get("dataStore", "known").unwrap();
        assert!(known.success);
        assert_eq!(known.uint(0), Some(U256::from(10)));

        let unknown = response.get("dataStore", "unknown").unwrap();
        assert!(!unknown.success);
        assert!(unknown.values.is_empty());
        assert!(response.errors().any(|result| result.key == "unknown"));
    }

    #[tokio::test]
    async fn test_undecodable_output_is_a_failed_call() {
        let transport = MockTransport::multicall(|_| Some(Bytes::from_static(&[1, 2, 3])));

        let request = data_store_request(&[("short", key(1))]);
        let response = assert_ok!(aggregator(transport).aggregate(&request, DEADLINE).await);

        assert!(!response.success);
        let result = response.get("dataStore", "short").unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("undecodable"));
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected_before_network() {
        let transport = MockTransport::multicall(|_| None);
        let result = aggregator(transport.clone()).aggregate(&Request::new(), DEADLINE).await;

        assert!(matches!(result, Err(DexError::InvalidRequest(_))));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_groups_are_skipped() {
        let transport = MockTransport::multicall(|_| None);
        let abi = dynamic::parse(dynamic::DATA_STORE).unwrap();
        let request = Request::new().group("dataStore", CallGroup::new(DATA_STORE, abi));

        let response = assert_ok!(aggregator(transport.clone()).aggregate(&request, DEADLINE).await);
        assert!(response.success);
        assert!(response.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_a_timeout() {
        let transport = MockTransport::multicall(|_| None).with_delay(Duration::from_secs(10));
        let request = data_store_request(&[("a", key(1))]);

        let result = aggregator(transport)
            .aggregate(&request, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DexError::Timeout)));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = MockTransport::unreachable();
        let request = data_store_request(&[("a", key(1))]);

        let result = aggregator(transport).aggregate(&request, DEADLINE).await;
        assert!(matches!(result, Err(DexError::Transport(_))));
    }

    #[test]
    fn test_spread_outputs() {
        let scalar = Function::parse("function getUint(bytes32) view returns (uint256)").unwrap();
        let value = DynSolValue::Uint(U256::from(5), 256);
        assert_eq!(spread_outputs(&scalar, vec![value.clone()]), vec![value.clone()]);

        let array = Function::parse("function keys() view returns (bytes32[])").unwrap();
        let items = vec![bytes32(key(1)), bytes32(key(2))];
        assert_eq!(
            spread_outputs(&array, vec![DynSolValue::Array(items.clone())]),
            items
        );

        let pair = Function::parse("function tiers(uint256) view returns (uint256, uint256)").unwrap();
        let tuple = vec![value.clone(), value.clone()];
        assert_eq!(spread_outputs(&pair, tuple.clone()), tuple);
    }

    #[test]
    fn test_output_round_trip_through_abi() {
        let function = Function::parse(
            "function getMarket(address,address) view returns ((address,address,address,address))",
        )
        .unwrap();
        let market = DynSolValue::Tuple(vec![
            DynSolValue::Address(address!("0x0000000000000000000000000000000000000001")),
            DynSolValue::Address(address!("0x0000000000000000000000000000000000000002")),
            DynSolValue::Address(address!("0x0000000000000000000000000000000000000003")),
            DynSolValue::Address(address!("0x0000000000000000000000000000000000000004")),
        ]);

        let encoded = function.abi_encode_output(&[market.clone()]).unwrap();
        let decoded = function.abi_decode_output(&encoded).unwrap();
        let DynSolValue::Tuple(fields) = market else {
            unreachable!()
        };
        assert_eq!(spread_outputs(&function, decoded), fields);
    }
}
