use std::fmt::Display;

use alloy::{
    contract,
    dyn_abi,
    primitives::Bytes,
    sol_types::{self, SolInterface},
    transports,
};

use crate::abi::errors::CustomErrors::CustomErrorsErrors;

pub type DexError = ProviderError<CustomErrorsErrors>;

/// Call revert reason decoded by the provided known ABI
/// or in a generic raw form if can not be decoded.
#[derive(Debug)]
pub enum RevertReason<R> {
    Known(R),
    Generic(String),
    Unknown,
}

/// Error returned while querying the exchange contracts
/// or auxiliary data sources.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError<R> {
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no endpoint configured for chain {0}")]
    MissingEndpoint(u64),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("call ran out of gas")]
    OutOfGas,

    #[error("call reverted: {0:?}")]
    Reverted(Box<RevertReason<R>>),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("missing or failed call result: {0}.{1}")]
    MissingCall(String, String),

    #[error("subgraph error: {0}")]
    Subgraph(String),
}

impl<R> ProviderError<R> {
    /// Whether a failed batch is worth repeating against a fallback endpoint.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::NullResp)
    }
}

impl<R: SolInterface> From<contract::Error> for ProviderError<R> {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            _ => Self::Fatal(value.to_string()),
        }
    }
}

impl<E: Display, R: SolInterface> From<transports::RpcError<E>> for ProviderError<R> {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                // Heuristic to tell node-side call failures from transport ones
                let msg = resp.message.to_ascii_lowercase();
                if (resp.code == -32603) && (msg.contains("gas") || msg.contains("oog")) {
                    Self::OutOfGas
                } else if (resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found"))
                {
                    Self::InvalidRequest(msg)
                } else if resp.code == 3 && msg.contains("reverted") {
                    Self::Reverted(Box::new(RevertReason::from(value)))
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl<R: SolInterface> From<sol_types::Error> for ProviderError<R> {
    fn from(value: sol_types::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

impl<R: SolInterface> From<dyn_abi::Error> for ProviderError<R> {
    fn from(value: dyn_abi::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

impl<R: SolInterface> From<reqwest::Error> for ProviderError<R> {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl<R: SolInterface> From<serde_json::Error> for ProviderError<R> {
    fn from(value: serde_json::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

impl<E: Display, R: SolInterface> From<transports::RpcError<E>> for RevertReason<R> {
    fn from(value: transports::RpcError<E>) -> Self {
        match value.as_error_resp() {
            Some(payload) => match payload.as_decoded_interface_error::<R>() {
                Some(known) => Self::Known(known),
                None => Self::Generic(value.to_string()),
            },
            None => Self::Generic(value.to_string()),
        }
    }
}

impl<R: SolInterface> From<Bytes> for RevertReason<R> {
    fn from(value: Bytes) -> Self {
        if value.is_empty() {
            return Self::Unknown;
        }
        match R::abi_decode(&value) {
            Ok(known) => Self::Known(known),
            Err(_) => Self::Generic(value.to_string()),
        }
    }
}
