//! Contract bindings.
//!
//! Calls issued through [`crate::multicall`] are described by human-readable
//! signatures next to the code that builds them, these bindings cover the
//! batching contract, transaction encoding and revert decoding.

#[allow(clippy::too_many_arguments)]
pub mod multicall {
    alloy::sol!(
        /// Multicall3, deployed at the same address on every supported chain.
        #[derive(Debug)]
        interface IMulticall3 {
            struct Call3 {
                address target;
                bool allowFailure;
                bytes callData;
            }

            struct Result {
                bool success;
                bytes returnData;
            }

            function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod exchange_router {
    alloy::sol!(
        #[derive(Debug)]
        interface ExchangeRouter {
            struct CreateOrderParamsAddresses {
                address receiver;
                address callbackContract;
                address uiFeeReceiver;
                address market;
                address initialCollateralToken;
                address[] swapPath;
            }

            struct CreateOrderParamsNumbers {
                uint256 sizeDeltaUsd;
                uint256 initialCollateralDeltaAmount;
                uint256 triggerPrice;
                uint256 acceptablePrice;
                uint256 executionFee;
                uint256 callbackGasLimit;
                uint256 minOutputAmount;
            }

            struct CreateOrderParams {
                CreateOrderParamsAddresses addresses;
                CreateOrderParamsNumbers numbers;
                uint8 orderType;
                uint8 decreasePositionSwapType;
                bool isLong;
                bool shouldUnwrapNativeToken;
                bytes32 referralCode;
            }

            function multicall(bytes[] calldata data) external payable returns (bytes[] memory results);
            function sendWnt(address receiver, uint256 amount) external payable;
            function sendTokens(address token, address receiver, uint256 amount) external payable;
            function createOrder(CreateOrderParams calldata params) external payable returns (bytes32);
            function cancelOrder(bytes32 key) external payable;
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod errors {
    alloy::sol!(
        /// Subset of the exchange custom errors surfaced by read calls.
        #[derive(Debug)]
        interface CustomErrors {
            error DisabledMarket(address market);
            error EmptyMarket();
            error EmptyPosition();
            error InsufficientPoolAmount(uint256 poolAmount, uint256 amount);
            error InsufficientReserve(uint256 reservedUsd, uint256 maxReservedUsd);
            error InsufficientSwapOutputAmount(uint256 outputAmount, uint256 minOutputAmount);
            error InvalidTokenIn(address tokenIn, address market);
            error InvalidSwapMarket(address market);
            error UnexpectedPoolValue(int256 poolValue);
            error Unauthorized(address msgSender, string role);
        }
    );
}

/// Human-readable signatures of the contracts read through [`crate::multicall`].
pub mod dynamic {
    use std::sync::Arc;

    use alloy::json_abi::JsonAbi;

    use crate::error::DexError;

    pub const DATA_STORE: &[&str] = &[
        "function getUint(bytes32 key) view returns (uint256)",
        "function getInt(bytes32 key) view returns (int256)",
        "function getBool(bytes32 key) view returns (bool)",
        "function getAddress(bytes32 key) view returns (address)",
        "function getBytes32Count(bytes32 setKey) view returns (uint256)",
        "function getBytes32ValuesAt(bytes32 setKey, uint256 start, uint256 end) view returns (bytes32[])",
    ];

    pub const READER: &[&str] = &[
        "function getMarkets(address dataStore, uint256 start, uint256 end) view returns ((address,address,address,address)[])",
        "function getMarket(address dataStore, address key) view returns ((address,address,address,address))",
        "function getPosition(address dataStore, bytes32 key) view returns (((address,address,address),(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256),(bool)))",
    ];

    pub const REFERRAL_STORAGE: &[&str] = &[
        "function traderReferralCodes(address account) view returns (bytes32)",
        "function codeOwners(bytes32 code) view returns (address)",
        "function referrerTiers(address account) view returns (uint256)",
        "function tiers(uint256 tier) view returns (uint256 totalRebate, uint256 discountShare)",
        "function referrerDiscountShares(address account) view returns (uint256)",
    ];

    pub const ERC20: &[&str] = &[
        "function decimals() view returns (uint8)",
        "function symbol() view returns (string)",
        "function balanceOf(address account) view returns (uint256)",
    ];

    pub fn parse(signatures: &[&str]) -> Result<Arc<JsonAbi>, DexError> {
        JsonAbi::parse(signatures.iter().copied())
            .map(Arc::new)
            .map_err(|err| DexError::InvalidRequest(format!("malformed ABI signature: {err}")))
    }
}
