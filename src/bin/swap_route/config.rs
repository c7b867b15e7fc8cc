//! Configuration for the swap route tool.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): chain and endpoints
//! - CLI arguments: the trade to route

use std::time::Duration;

use alloy::primitives::{Address, U256};
use clap::Parser;
use fastnum::{UD128, decimal::Context};
use synthetics_sdk::{
    ChainId, NATIVE_TOKEN,
    num::Converter,
    rpc::Endpoints,
    swap::RouteSelection,
    tokens::{TokenData, TokensData},
};
use url::Url;

/// Environment configuration.
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Chain ID (42161 for Arbitrum, 43114 for Avalanche)
    pub chain_id: ChainId,

    /// Primary RPC URLs, comma separated, replacing the public defaults
    #[serde(default)]
    pub rpc_urls: Vec<String>,

    /// Fallback RPC URLs, comma separated
    #[serde(default)]
    pub fallback_rpc_urls: Vec<String>,

    /// Optional deadline of a single read (default: 30s)
    pub timeout_seconds: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(30))
    }

    /// Public endpoints with the configured lists on top.
    pub fn endpoints(&self) -> Result<Endpoints, url::ParseError> {
        let parse = |urls: &[String]| -> Result<Vec<Url>, url::ParseError> {
            urls.iter()
                .filter(|url| !url.trim().is_empty())
                .map(|url| Url::parse(url.trim()))
                .collect()
        };

        let mut endpoints = Endpoints::defaults();
        let primary = parse(&self.rpc_urls)?;
        if !primary.is_empty() {
            endpoints = endpoints.with_primary(self.chain_id, primary);
        }
        let fallback = parse(&self.fallback_rpc_urls)?;
        if !fallback.is_empty() {
            endpoints = endpoints.with_fallback(self.chain_id, fallback);
        }
        Ok(endpoints)
    }
}

/// CLI arguments describing the trade.
#[derive(Debug, Parser)]
#[command(name = "swap-route")]
#[command(about = "Finds the best swap route across the exchange markets")]
pub struct CliConfig {
    /// Token to pay, symbol (e.g., "USDC") or address
    #[arg(long)]
    pub from: String,

    /// Token to receive, symbol (e.g., "ETH") or address
    #[arg(long)]
    pub to: String,

    /// Trade size in USD (e.g., 1500.5)
    #[arg(long, default_value = "1000")]
    pub usd_in: String,

    /// Take the most liquid route instead of simulating every candidate
    #[arg(long)]
    pub by_liquidity: bool,
}

/// Token given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenRef {
    Address(Address),
    Symbol(String),
}

impl TokenRef {
    fn parse(value: &str) -> Self {
        match value.parse::<Address>() {
            Ok(address) => Self::Address(address),
            Err(_) => Self::Symbol(value.to_string()),
        }
    }

    /// Symbols match case-insensitively, the native token wins ties with its wrapped twin.
    pub fn resolve<'a>(&self, tokens: &'a TokensData) -> Result<&'a TokenData, ConfigError> {
        let found = match self {
            Self::Address(address) => tokens.get(address),
            Self::Symbol(symbol) => tokens
                .values()
                .filter(|token| token.symbol.eq_ignore_ascii_case(symbol))
                .max_by_key(|token| token.address == NATIVE_TOKEN),
        };
        found.ok_or_else(|| ConfigError::UnknownToken(self.to_string()))
    }
}

impl std::fmt::Display for TokenRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address}"),
            Self::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// Trade to route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConfig {
    pub from: TokenRef,
    pub to: TokenRef,
    /// USD with 30 decimals.
    pub usd_in: U256,
    pub selection: RouteSelection,
}

impl CliConfig {
    pub fn to_route_config(&self) -> Result<RouteConfig, ConfigError> {
        let usd_in = UD128::from_str(&self.usd_in, Context::default())
            .map_err(|_| ConfigError::InvalidUsdIn(self.usd_in.clone()))?;
        if usd_in == UD128::ZERO {
            return Err(ConfigError::ZeroUsdIn);
        }

        let from = TokenRef::parse(&self.from);
        let to = TokenRef::parse(&self.to);
        if from == to {
            return Err(ConfigError::SameToken);
        }

        Ok(RouteConfig {
            from,
            to,
            usd_in: Converter::usd().to_unsigned(usd_in),
            selection: if self.by_liquidity {
                RouteSelection::MostLiquid
            } else {
                RouteSelection::BestOutput
            },
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid USD amount {0}")]
    InvalidUsdIn(String),

    #[error("usd_in cannot be zero")]
    ZeroUsdIn,

    #[error("from and to must be different tokens")]
    SameToken,

    #[error("Unknown token {0}")]
    UnknownToken(String),
}
