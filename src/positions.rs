//! Open positions of an account.
//!
//! The data store keeps the keys of every position an account ever opened
//! under its position list. [`fetch_positions`] intersects that list with the
//! keys derivable from the known markets and reads the matching positions
//! through the reader contract in a single batch.

use std::collections::{HashMap, HashSet};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, U256},
};
use tracing::debug;

use crate::{
    Chain,
    abi::dynamic,
    error::DexError,
    fetch::Fetcher,
    keys,
    markets::MarketsInfoData,
    multicall::{CallGroup, CallResult, Request, as_b256, address, bytes32, uint},
    rpc::Connect,
};

/// Upper bound of position keys read from the account list.
pub const POSITION_KEYS_PAGE: u64 = 1000;

/// `Position.Props` as returned by the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    /// Data store key of the position.
    pub key: B256,
    pub account: Address,
    pub market: Address,
    pub collateral_token: Address,
    pub is_long: bool,

    pub size_in_usd: U256,
    pub size_in_tokens: U256,
    pub collateral_amount: U256,
    pub borrowing_factor: U256,
    pub funding_fee_amount_per_size: U256,
    pub long_token_claimable_funding_amount_per_size: U256,
    pub short_token_claimable_funding_amount_per_size: U256,
    pub increased_at_block: U256,
    pub decreased_at_block: U256,
}

impl Position {
    /// Closed or never opened.
    pub fn is_empty(&self) -> bool {
        self.increased_at_block.is_zero() || self.size_in_usd.is_zero()
    }
}

pub type PositionsData = HashMap<B256, Position>;

/// Every position key the account can have in the `markets`.
///
/// One key per collateral and side, single-collateral markets have one collateral.
pub fn candidate_position_keys(account: Address, markets: &MarketsInfoData) -> Vec<B256> {
    let mut candidates = vec![];
    for info in markets.iter() {
        let market = &info.market;
        let collaterals = if market.is_same_collaterals() {
            vec![market.long_token]
        } else {
            vec![market.long_token, market.short_token]
        };
        for collateral in collaterals {
            for is_long in [true, false] {
                candidates.push(keys::position(account, market.market_token, collateral, is_long));
            }
        }
    }
    candidates
}

/// Position keys listed for the account in the data store, skipped without an account.
pub async fn fetch_position_keys<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    account: Option<Address>,
) -> Result<Option<HashSet<B256>>, DexError> {
    let data_store = dynamic::parse(dynamic::DATA_STORE)?;

    fetcher
        .fetch(
            chain,
            "positionKeys",
            account,
            |_, account| {
                Request::new().group(
                    "dataStore",
                    CallGroup::new(chain.data_store(), data_store).call(
                        "keys",
                        "getBytes32ValuesAt",
                        vec![
                            bytes32(keys::account_position_list(*account)),
                            uint(U256::ZERO),
                            uint(U256::from(POSITION_KEYS_PAGE)),
                        ],
                    ),
                )
            },
            |response, _, _| {
                let result = response.require("dataStore", "keys")?;
                Ok(result.values.iter().filter_map(as_b256).collect())
            },
        )
        .await
}

/// Open positions of the account in the `markets`, skipped without an account.
pub async fn fetch_positions<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    account: Option<Address>,
    markets: &MarketsInfoData,
) -> Result<Option<PositionsData>, DexError> {
    let Some(existing) = fetch_position_keys(fetcher, chain, account).await? else {
        return Ok(None);
    };
    let Some(account) = account else {
        return Ok(None);
    };

    let position_keys: Vec<B256> = candidate_position_keys(account, markets)
        .into_iter()
        .filter(|key| existing.contains(key))
        .collect();
    let reader = dynamic::parse(dynamic::READER)?;

    let positions = fetcher
        .fetch(
            chain,
            "positions",
            (!position_keys.is_empty()).then_some(&position_keys),
            |_, position_keys| {
                let group = position_keys
                    .iter()
                    .fold(CallGroup::new(chain.reader(), reader), |group, key| {
                        group.call(
                            key.to_string(),
                            "getPosition",
                            vec![address(chain.data_store()), bytes32(*key)],
                        )
                    });
                Request::new().group("reader", group)
            },
            |response, _, position_keys| {
                Ok(position_keys
                    .iter()
                    .filter_map(|key| {
                        let position = parse_position(*key, response.get("reader", &key.to_string())?)?;
                        (!position.is_empty()).then_some((*key, position))
                    })
                    .collect::<PositionsData>())
            },
        )
        .await?
        .unwrap_or_default();

    debug!(chain_id = chain.chain_id(), %account, positions = positions.len(), "fetched positions");
    Ok(Some(positions))
}

/// Spread `(addresses, numbers, flags)` tuples of a successful `getPosition`.
fn parse_position(key: B256, result: &CallResult) -> Option<Position> {
    if !result.success {
        return None;
    }
    let [addresses, numbers, flags] = result.values.as_slice() else {
        return None;
    };
    let (DynSolValue::Tuple(addresses), DynSolValue::Tuple(numbers), DynSolValue::Tuple(flags)) =
        (addresses, numbers, flags)
    else {
        return None;
    };

    let [account, market, collateral_token] = addresses.as_slice() else {
        return None;
    };
    let numbers: Vec<U256> = numbers
        .iter()
        .map(|value| value.as_uint().map(|(value, _)| value))
        .collect::<Option<_>>()?;
    let [
        size_in_usd,
        size_in_tokens,
        collateral_amount,
        borrowing_factor,
        funding_fee_amount_per_size,
        long_token_claimable_funding_amount_per_size,
        short_token_claimable_funding_amount_per_size,
        increased_at_block,
        decreased_at_block,
    ] = numbers.as_slice()
    else {
        return None;
    };

    Some(Position {
        key,
        account: account.as_address()?,
        market: market.as_address()?,
        collateral_token: collateral_token.as_address()?,
        is_long: flags.first()?.as_bool()?,
        size_in_usd: *size_in_usd,
        size_in_tokens: *size_in_tokens,
        collateral_amount: *collateral_amount,
        borrowing_factor: *borrowing_factor,
        funding_fee_amount_per_size: *funding_fee_amount_per_size,
        long_token_claimable_funding_amount_per_size: *long_token_claimable_funding_amount_per_size,
        short_token_claimable_funding_amount_per_size: *short_token_claimable_funding_amount_per_size,
        increased_at_block: *increased_at_block,
        decreased_at_block: *decreased_at_block,
    })
}
