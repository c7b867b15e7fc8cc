//! Token metadata, prices and balances.
//!
//! Token lists and prices come from the oracle keeper REST API, balances are
//! read with ERC20 `balanceOf` through the [`Fetcher`].

use std::{collections::HashMap, time::Duration};

use alloy::primitives::{Address, U256};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
    Chain, NATIVE_TOKEN,
    abi::dynamic,
    error::DexError,
    fetch::Fetcher,
    multicall::{CallGroup, Request, address},
    num::expand_decimals,
    rpc::Connect,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Token prices in USD per whole token, 30 decimals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenPrices {
    pub min: U256,
    pub max: U256,
}

impl TokenPrices {
    pub fn new(min: U256, max: U256) -> Self {
        Self { min, max }
    }

    pub fn mid(&self) -> U256 {
        (self.min + self.max) / U256::from(2)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenData {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub prices: TokenPrices,
    pub is_native: bool,
    pub is_synthetic: bool,
    /// Wallet balance, if requested.
    pub balance: Option<U256>,
}

pub type TokensData = HashMap<Address, TokenData>;

/// Token entry of the oracle keeper `/tokens` endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    #[serde(default, rename = "synthetic")]
    pub is_synthetic: bool,
}

/// Price entry of the oracle keeper `/prices/tickers` endpoint,
/// prices are in contract precision `30 - token_decimals`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub token_address: Address,
    pub token_symbol: String,
    pub min_price: String,
    pub max_price: String,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

#[derive(Deserialize)]
struct TokensResponse {
    tokens: Vec<TokenInfo>,
}

/// Client of the oracle keeper REST API.
#[derive(Clone, Debug)]
pub struct OracleKeeper {
    client: reqwest::Client,
    base_url: Url,
}

impl OracleKeeper {
    pub fn new(base_url: &str) -> Result<Self, DexError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| DexError::InvalidRequest(format!("invalid oracle keeper url {base_url}: {err}")))?;
        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url,
        })
    }

    pub fn for_chain(chain: &Chain) -> Result<Self, DexError> {
        Self::new(chain.oracle_keeper())
    }

    pub async fn tokens(&self) -> Result<Vec<TokenInfo>, DexError> {
        let response: TokensResponse = self.get("tokens").await?;
        Ok(response.tokens)
    }

    pub async fn tickers(&self) -> Result<Vec<Ticker>, DexError> {
        self.get("prices/tickers").await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DexError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| DexError::InvalidRequest(format!("invalid oracle keeper path {path}: {err}")))?;
        debug!(%url, "querying oracle keeper");
        let body = self.client.get(url).send().await?.error_for_status()?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Contract price to 30-decimal USD per whole token.
pub fn parse_contract_price(price: U256, decimals: u8) -> U256 {
    price * expand_decimals(decimals)
}

/// Joins token metadata with ticker prices.
///
/// The native token takes the price of the chain's wrapped native token,
/// tokens without a parsable price are left out.
pub fn tokens_data(chain: &Chain, tokens: &[TokenInfo], tickers: &[Ticker]) -> TokensData {
    let by_address: HashMap<Address, &Ticker> =
        tickers.iter().map(|ticker| (ticker.token_address, ticker)).collect();

    let mut data = TokensData::with_capacity(tokens.len());
    for token in tokens {
        let is_native = token.address == NATIVE_TOKEN;
        let Some(ticker) = by_address.get(&chain.wrapped_address(token.address)) else {
            debug!(symbol = %token.symbol, address = %token.address, "no ticker for token");
            continue;
        };
        let (Ok(min), Ok(max)) = (
            U256::from_str_radix(&ticker.min_price, 10),
            U256::from_str_radix(&ticker.max_price, 10),
        ) else {
            warn!(symbol = %token.symbol, min = %ticker.min_price, max = %ticker.max_price, "malformed ticker prices");
            continue;
        };

        data.insert(
            token.address,
            TokenData {
                address: token.address,
                symbol: token.symbol.clone(),
                decimals: token.decimals,
                prices: TokenPrices::new(
                    parse_contract_price(min, token.decimals),
                    parse_contract_price(max, token.decimals),
                ),
                is_native,
                is_synthetic: token.is_synthetic,
                balance: None,
            },
        );
    }
    data
}

/// Token list joined with current prices.
pub async fn fetch_tokens_data(keeper: &OracleKeeper, chain: &Chain) -> Result<TokensData, DexError> {
    let (tokens, tickers) = futures::try_join!(keeper.tokens(), keeper.tickers())?;
    let data = tokens_data(chain, &tokens, &tickers);
    debug!(chain_id = chain.chain_id(), tokens = data.len(), "fetched tokens data");
    Ok(data)
}

/// ERC20 balances of the account, skipped without an account.
///
/// The native token has no `balanceOf` and is left out.
pub async fn fetch_balances<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    account: Option<Address>,
    tokens: &[Address],
) -> Result<Option<HashMap<Address, U256>>, DexError> {
    let tokens: Vec<Address> = tokens.iter().copied().filter(|token| *token != NATIVE_TOKEN).collect();
    if tokens.is_empty() {
        return Ok(account.map(|_| HashMap::new()));
    }
    let abi = dynamic::parse(dynamic::ERC20)?;

    fetcher
        .fetch(
            chain,
            "balances",
            account,
            |_, account| {
                tokens.iter().fold(Request::new(), |request, token| {
                    request.group(
                        token.to_string(),
                        CallGroup::new(*token, abi.clone()).call("balance", "balanceOf", vec![address(*account)]),
                    )
                })
            },
            |response, _, _| {
                Ok(tokens
                    .iter()
                    .filter_map(|token| {
                        let balance = response.get(&token.to_string(), "balance")?.uint(0)?;
                        Some((*token, balance))
                    })
                    .collect())
            },
        )
        .await
}

/// Fills in balances on the tokens data.
pub fn apply_balances(tokens: &mut TokensData, balances: &HashMap<Address, U256>) {
    for (address, token) in tokens.iter_mut() {
        if let Some(balance) = balances.get(address) {
            token.balance = Some(*balance);
        }
    }
}
