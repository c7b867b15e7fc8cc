//! Swap route finder.
//!
//! This binary reads the current markets of a chain and prints the best swap
//! route between two tokens for a given trade size.

mod config;
mod error;
mod route;

use std::process::exit;

use clap::Parser;
use synthetics_sdk::{
    Chain,
    fetch::{Fetcher, FetcherConfig},
    rpc::HttpConnector,
};
use tracing::{error, info};

use config::{CliConfig, EnvConfig};
use error::{Error, Result};

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    let route_config = match cli_config.to_route_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(&env_config, &route_config).await {
        Ok(report) => println!("{report}"),
        Err(e) => {
            error!(%e, "Swap route search failed");
            exit(1);
        }
    }
}

async fn run(env_config: &EnvConfig, route_config: &config::RouteConfig) -> Result<route::RouteReport> {
    let chain = Chain::by_id(env_config.chain_id).ok_or(Error::UnsupportedChain(env_config.chain_id))?;
    let fetcher = Fetcher::new(HttpConnector, env_config.endpoints()?).with_config(FetcherConfig {
        deadline: env_config.timeout(),
        ..FetcherConfig::default()
    });

    info!(chain_id = chain.chain_id(), from = %route_config.from, to = %route_config.to, "searching swap route");
    let markets = route::fetch_snapshot(&fetcher, &chain).await?;
    route::find_route(&markets, route_config)
}
