//! Error types for the swap route tool.

use synthetics_sdk::{ChainId, error::DexError};

use crate::config::ConfigError;

/// Main error type for the swap route tool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("DEX SDK error: {0}")]
    Dex(#[from] DexError),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Chain {0} is not supported")]
    UnsupportedChain(ChainId),

    #[error("No swap route from {0} to {1}")]
    NoRoute(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;
