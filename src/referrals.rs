//! Trader referral codes.
//!
//! Codes are short strings stored left-aligned in a `bytes32` by the referral
//! storage contract. Each code has an owner whose tier sets the trader discount.

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, U256},
};
use tracing::debug;

use crate::{
    Chain,
    abi::dynamic,
    error::DexError,
    fetch::{FetchCall, Fetcher},
    multicall::{address, bytes32, uint},
    num::{BASIS_POINTS_DIVISOR, PRECISION},
    rpc::Connect,
};

pub const MAX_REFERRAL_CODE_LENGTH: usize = 20;

/// Code as stored on chain, zero if the code is too long once sanitized.
///
/// Anything but ASCII letters, digits and underscores is dropped.
pub fn encode_referral_code(code: &str) -> B256 {
    let sanitized: Vec<u8> = code
        .bytes()
        .filter(|byte| byte.is_ascii_alphanumeric() || *byte == b'_')
        .collect();
    if sanitized.len() > MAX_REFERRAL_CODE_LENGTH {
        return B256::ZERO;
    }

    let mut encoded = B256::ZERO;
    encoded[..sanitized.len()].copy_from_slice(&sanitized);
    encoded
}

/// `None` for the zero code and codes that are not UTF-8.
pub fn decode_referral_code(code: B256) -> Option<String> {
    if code.is_zero() {
        return None;
    }
    let len = code.iter().rposition(|byte| *byte != 0).map_or(0, |last| last + 1);
    String::from_utf8(code[..len].to_vec()).ok()
}

/// Code the trader attached on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserReferralCode {
    pub code: B256,
    pub code_string: String,
}

/// Attached code with its owner and the owner's tier terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserReferralInfo {
    pub code: UserReferralCode,
    pub affiliate: Address,
    pub tier_id: U256,
    /// Basis points.
    pub total_rebate: U256,
    /// Basis points, the referrer's custom share when set.
    pub discount_share: U256,
}

impl UserReferralInfo {
    pub fn total_rebate_factor(&self) -> U256 {
        basis_points_to_factor(self.total_rebate)
    }

    pub fn discount_factor(&self) -> U256 {
        basis_points_to_factor(self.discount_share)
    }
}

fn basis_points_to_factor(bps: U256) -> U256 {
    bps * PRECISION / U256::from(BASIS_POINTS_DIVISOR)
}

async fn read<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    method: &str,
    args: Vec<DynSolValue>,
) -> Result<Vec<DynSolValue>, DexError> {
    let abi = dynamic::parse(dynamic::REFERRAL_STORAGE)?;
    let function = abi
        .function(method)
        .and_then(|overloads| overloads.first())
        .cloned()
        .ok_or_else(|| DexError::InvalidRequest(format!("method {method} is not in the referral storage ABI")))?;

    let output = fetcher
        .fetch_call(
            chain,
            FetchCall::Contract {
                address: chain.referral_storage(),
                function,
                args,
            },
        )
        .await?;
    Ok(output.values().to_vec())
}

fn first_uint(values: &[DynSolValue], method: &str) -> Result<U256, DexError> {
    values
        .first()
        .and_then(|value| value.as_uint())
        .map(|(value, _)| value)
        .ok_or_else(|| DexError::Fatal(format!("unexpected {method} output")))
}

/// Code attached by the trader, `None` if there is none.
pub async fn fetch_trader_referral_code<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    account: Address,
) -> Result<Option<UserReferralCode>, DexError> {
    let values = read(fetcher, chain, "traderReferralCodes", vec![address(account)]).await?;
    let code = values
        .first()
        .and_then(crate::multicall::as_b256)
        .ok_or_else(|| DexError::Fatal("unexpected traderReferralCodes output".to_string()))?;

    Ok(decode_referral_code(code).map(|code_string| UserReferralCode { code, code_string }))
}

/// Owner of the code, the zero address for unregistered codes.
pub async fn fetch_code_owner<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain, code: B256) -> Result<Address, DexError> {
    let values = read(fetcher, chain, "codeOwners", vec![bytes32(code)]).await?;
    values
        .first()
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| DexError::Fatal("unexpected codeOwners output".to_string()))
}

pub async fn fetch_affiliate_tier<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    affiliate: Address,
) -> Result<U256, DexError> {
    let values = read(fetcher, chain, "referrerTiers", vec![address(affiliate)]).await?;
    first_uint(&values, "referrerTiers")
}

/// Total rebate and discount share of the tier, in basis points.
pub async fn fetch_tier<C: Connect>(fetcher: &Fetcher<C>, chain: &Chain, tier_id: U256) -> Result<(U256, U256), DexError> {
    let values = read(fetcher, chain, "tiers", vec![uint(tier_id)]).await?;
    match values.as_slice() {
        [total_rebate, discount_share] => total_rebate
            .as_uint()
            .zip(discount_share.as_uint())
            .map(|((total_rebate, _), (discount_share, _))| (total_rebate, discount_share))
            .ok_or_else(|| DexError::Fatal("unexpected tiers output".to_string())),
        _ => Err(DexError::Fatal("unexpected tiers output".to_string())),
    }
}

pub async fn fetch_referrer_discount_share<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    affiliate: Address,
) -> Result<U256, DexError> {
    let values = read(fetcher, chain, "referrerDiscountShares", vec![address(affiliate)]).await?;
    first_uint(&values, "referrerDiscountShares")
}

/// Referral terms of the trader, `None` without an attached code.
pub async fn fetch_user_referral_info<C: Connect>(
    fetcher: &Fetcher<C>,
    chain: &Chain,
    account: Address,
) -> Result<Option<UserReferralInfo>, DexError> {
    let Some(code) = fetch_trader_referral_code(fetcher, chain, account).await? else {
        debug!(chain_id = chain.chain_id(), %account, "no referral code attached");
        return Ok(None);
    };

    let affiliate = fetch_code_owner(fetcher, chain, code.code).await?;
    let (tier_id, custom_discount_share) = futures::try_join!(
        fetch_affiliate_tier(fetcher, chain, affiliate),
        fetch_referrer_discount_share(fetcher, chain, affiliate),
    )?;
    let (total_rebate, discount_share) = fetch_tier(fetcher, chain, tier_id).await?;

    Ok(Some(UserReferralInfo {
        code,
        affiliate,
        tier_id,
        total_rebate,
        discount_share: if custom_discount_share.is_zero() {
            discount_share
        } else {
            custom_discount_share
        },
    }))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use tokio_test::assert_ok;

    use super::*;
    use crate::{
        rpc::Endpoints,
        testing::{MockConnector, MockContracts},
    };

    const TRADER: Address = address!("0x23b27875ad09d21517101a7f83499c38f7ec2d2a");
    const AFFILIATE: Address = address!("0x00000000000000000000000000000000000000af");

    fn fetcher(contracts: MockContracts) -> Fetcher<MockConnector> {
        Fetcher::new(
            MockConnector::default().with("http://rpc.local", contracts.into_transport()),
            Endpoints::default().with_primary(crate::ARBITRUM, vec!["http://rpc.local".parse().unwrap()]),
        )
    }

    #[test]
    fn test_encode_referral_code() {
        let code = encode_referral_code("gmx_io");
        assert_eq!(&code[..6], b"gmx_io");
        assert!(code[6..].iter().all(|byte| *byte == 0));

        // dashes and spaces are dropped
        assert_eq!(encode_referral_code("gmx-io "), encode_referral_code("gmxio"));
        assert_eq!(encode_referral_code("a".repeat(21).as_str()), B256::ZERO);
        assert_ne!(encode_referral_code("a".repeat(20).as_str()), B256::ZERO);
    }

    #[test]
    fn test_decode_referral_code() {
        assert_eq!(decode_referral_code(encode_referral_code("gmx_io")).as_deref(), Some("gmx_io"));
        assert_eq!(decode_referral_code(B256::ZERO), None);

        let mut invalid = B256::ZERO;
        invalid[0] = 0xff;
        assert_eq!(decode_referral_code(invalid), None);
    }

    #[tokio::test]
    async fn test_fetch_user_referral_info() {
        let chain = Chain::arbitrum();
        let storage = chain.referral_storage();
        let code = encode_referral_code("gmx_io");
        let contracts = MockContracts::default()
            .on(storage, "traderReferralCodes", vec![address(TRADER)], vec![bytes32(code)])
            .on(storage, "codeOwners", vec![bytes32(code)], vec![address(AFFILIATE)])
            .on_uint(storage, "referrerTiers", vec![address(AFFILIATE)], U256::from(1))
            .on(
                storage,
                "tiers",
                vec![uint(U256::from(1))],
                vec![uint(U256::from(1000)), uint(U256::from(5000))],
            )
            .on_uint(storage, "referrerDiscountShares", vec![address(AFFILIATE)], U256::ZERO);
        let fetcher = fetcher(contracts);

        let info = assert_ok!(fetch_user_referral_info(&fetcher, &chain, TRADER).await).unwrap();
        assert_eq!(info.code.code_string, "gmx_io");
        assert_eq!(info.affiliate, AFFILIATE);
        assert_eq!(info.tier_id, U256::from(1));
        assert_eq!(info.total_rebate, U256::from(1000));
        assert_eq!(info.discount_share, U256::from(5000));
        assert_eq!(info.discount_factor(), PRECISION / U256::from(2));
        assert_eq!(info.total_rebate_factor(), PRECISION / U256::from(10));
    }

    #[tokio::test]
    async fn test_custom_discount_share_wins() {
        let chain = Chain::arbitrum();
        let storage = chain.referral_storage();
        let code = encode_referral_code("vip");
        let contracts = MockContracts::default()
            .on(storage, "traderReferralCodes", vec![address(TRADER)], vec![bytes32(code)])
            .on(storage, "codeOwners", vec![bytes32(code)], vec![address(AFFILIATE)])
            .on_uint(storage, "referrerTiers", vec![address(AFFILIATE)], U256::from(2))
            .on(
                storage,
                "tiers",
                vec![uint(U256::from(2))],
                vec![uint(U256::from(2000)), uint(U256::from(5000))],
            )
            .on_uint(storage, "referrerDiscountShares", vec![address(AFFILIATE)], U256::from(7500));

        let info = assert_ok!(fetch_user_referral_info(&fetcher(contracts), &chain, TRADER).await).unwrap();
        assert_eq!(info.discount_share, U256::from(7500));
    }

    #[tokio::test]
    async fn test_no_attached_code() {
        let chain = Chain::arbitrum();
        let contracts = MockContracts::default().on(
            chain.referral_storage(),
            "traderReferralCodes",
            vec![address(TRADER)],
            vec![bytes32(B256::ZERO)],
        );

        let info = assert_ok!(fetch_user_referral_info(&fetcher(contracts), &chain, TRADER).await);
        assert!(info.is_none());
    }
}
