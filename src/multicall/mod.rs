//! Batched contract reads.
//!
//! A [`Request`] groups [`CallDescriptor`]s by target contract, every call
//! addressed by a `(group, key)` pair. [`Aggregator`] packs the whole request
//! into one Multicall3 `aggregate3` round trip and returns a [`Response`] with
//! exactly one [`CallResult`] per call key, failed calls included.

mod aggregator;

pub use aggregator::*;

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::{Function, JsonAbi},
    primitives::{Address, B256, U256},
};

use crate::error::DexError;

/// Single contract method invocation.
#[derive(Clone, derive_more::Debug)]
pub struct CallDescriptor {
    method: String,
    #[debug("{} args", args.len())]
    args: Vec<DynSolValue>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>, args: Vec<DynSolValue>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[DynSolValue] {
        &self.args
    }
}

/// Calls against a single target contract sharing the same ABI.
#[derive(Clone, derive_more::Debug)]
pub struct CallGroup {
    target: Address,
    #[debug(skip)]
    abi: Arc<JsonAbi>,
    calls: Vec<(String, CallDescriptor)>,
}

impl CallGroup {
    pub fn new(target: Address, abi: Arc<JsonAbi>) -> Self {
        Self {
            target,
            abi,
            calls: vec![],
        }
    }

    /// Adds a call under the `key`, replacing a previous call with the same key.
    pub fn call(mut self, key: impl Into<String>, method: &str, args: Vec<DynSolValue>) -> Self {
        let key = key.into();
        let descriptor = CallDescriptor::new(method, args);
        match self.calls.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = descriptor,
            None => self.calls.push((key, descriptor)),
        }
        self
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn calls(&self) -> impl Iterator<Item = (&str, &CallDescriptor)> {
        self.calls.iter().map(|(key, call)| (key.as_str(), call))
    }

    /// Resolves the ABI function of the call, overloads are told apart by arity.
    pub(crate) fn function(&self, call: &CallDescriptor) -> Result<&Function, DexError> {
        self.abi
            .function(call.method())
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == call.args.len()))
            .ok_or_else(|| {
                DexError::InvalidRequest(format!(
                    "method {}/{} is not in the ABI of {}",
                    call.method(),
                    call.args.len(),
                    self.target
                ))
            })
    }
}

/// Set of call groups issued as one batch, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Request {
    groups: Vec<(String, CallGroup)>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group under the `name`, replacing a previous group with the same name.
    pub fn group(mut self, name: impl Into<String>, group: CallGroup) -> Self {
        let name = name.into();
        match self.groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = group,
            None => self.groups.push((name, group)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &CallGroup)> {
        self.groups.iter().map(|(name, group)| (name.as_str(), group))
    }

    /// Total number of calls across all groups.
    pub fn calls_count(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.calls.len()).sum()
    }
}

/// Outcome of a single call of the batch.
#[derive(Clone, Debug)]
pub struct CallResult {
    pub group: String,
    pub key: String,
    pub success: bool,
    /// Decoded outputs, a single array or tuple output is spread into its elements.
    pub values: Vec<DynSolValue>,
    pub error: Option<String>,
}

impl CallResult {
    pub fn value(&self, index: usize) -> Option<&DynSolValue> {
        self.values.get(index)
    }

    pub fn uint(&self, index: usize) -> Option<U256> {
        self.value(index)?.as_uint().map(|(value, _)| value)
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        self.value(index)?.as_bool()
    }

    pub fn address(&self, index: usize) -> Option<Address> {
        self.value(index)?.as_address()
    }

    pub fn b256(&self, index: usize) -> Option<B256> {
        as_b256(self.value(index)?)
    }
}

/// Results of a batch keyed by group and call key, in request order.
#[derive(Clone, Debug, Default)]
pub struct Response {
    /// `false` if at least one call failed.
    pub success: bool,
    groups: Vec<(String, Vec<CallResult>)>,
}

impl Response {
    pub(crate) fn empty() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub(crate) fn insert(&mut self, result: CallResult) {
        if !result.success {
            self.success = false;
        }
        let index = match self.groups.iter().position(|(name, _)| *name == result.group) {
            Some(index) => index,
            None => {
                self.groups.push((result.group.clone(), Vec::new()));
                self.groups.len() - 1
            }
        };
        let results = &mut self.groups[index].1;
        match results.iter_mut().find(|existing| existing.key == result.key) {
            Some(existing) => *existing = result,
            None => results.push(result),
        }
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&CallResult> {
        self.group(group)?.iter().find(|result| result.key == key)
    }

    /// Results of the group in the order its calls were added.
    pub fn group(&self, group: &str) -> Option<&[CallResult]> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, results)| results.as_slice())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[CallResult])> {
        self.groups
            .iter()
            .map(|(name, results)| (name.as_str(), results.as_slice()))
    }

    /// Failed calls with their error messages.
    pub fn errors(&self) -> impl Iterator<Item = &CallResult> {
        self.groups
            .iter()
            .flat_map(|(_, results)| results)
            .filter(|result| !result.success)
    }

    /// Successful result of the call, [`DexError::MissingCall`] otherwise.
    pub fn require(&self, group: &str, key: &str) -> Result<&CallResult, DexError> {
        self.get(group, key)
            .filter(|result| result.success)
            .ok_or_else(|| DexError::MissingCall(group.to_string(), key.to_string()))
    }

    pub fn require_uint(&self, group: &str, key: &str) -> Result<U256, DexError> {
        self.require(group, key)?
            .uint(0)
            .ok_or_else(|| DexError::MissingCall(group.to_string(), key.to_string()))
    }

    /// Number of call results across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, results)| results.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn as_b256(value: &DynSolValue) -> Option<B256> {
    match value.as_fixed_bytes()? {
        (bytes, 32) => Some(B256::from_slice(bytes)),
        _ => None,
    }
}

/// Argument helpers.
pub fn uint(value: U256) -> DynSolValue {
    DynSolValue::Uint(value, 256)
}

pub fn address(value: Address) -> DynSolValue {
    DynSolValue::Address(value)
}

pub fn bytes32(value: B256) -> DynSolValue {
    DynSolValue::FixedBytes(value, 32)
}

pub fn boolean(value: bool) -> DynSolValue {
    DynSolValue::Bool(value)
}
