//! cToken and comptroller contract interfaces.
//!
//! Typed call bindings via `sol!` plus the event signature constants the
//! listener filters on.

use alloy::primitives::B256;
use alloy::sol;

sol! {
    /// cToken interface, the subset the reader needs.
    #[sol(rpc)]
    interface ICToken {
        function borrowIndex() external view returns (uint256);
        function exchangeRateStored() external view returns (uint256);

        /// Returns (errorCode, cTokenBalance, borrowBalance, exchangeRateMantissa).
        function getAccountSnapshot(address account) external view returns (uint256, uint256, uint256, uint256);
    }
}

sol! {
    /// Comptroller interface: risk parameters and market membership.
    #[sol(rpc)]
    interface IComptroller {
        function closeFactorMantissa() external view returns (uint256);
        function liquidationIncentiveMantissa() external view returns (uint256);
        function markets(address cToken) external view returns (bool isListed, uint256 collateralFactorMantissa, bool isComped);
        function checkMembership(address account, address cToken) external view returns (bool);
    }
}

/// Event signature constants for cToken logs.
pub mod ctoken_signatures {
    use super::*;

    /// keccak256("AccrueInterest(uint256,uint256,uint256,uint256)")
    pub const ACCRUE_INTEREST: B256 = B256::new([
        0x4d, 0xec, 0x04, 0xe7, 0x50, 0xca, 0x11, 0x53, 0x7c, 0xab, 0xcd, 0x8a, 0x9e, 0xab, 0x06,
        0x49, 0x4d, 0xe0, 0x8d, 0xa3, 0x73, 0x5b, 0xc8, 0x87, 0x1c, 0xd4, 0x12, 0x50, 0xe1, 0x90,
        0xbc, 0x04,
    ]);

    /// keccak256("Mint(address,uint256,uint256)")
    pub const MINT: B256 = B256::new([
        0x4c, 0x20, 0x9b, 0x5f, 0xc8, 0xad, 0x50, 0x75, 0x8f, 0x13, 0xe2, 0xe1, 0x08, 0x8b, 0xa5,
        0x6a, 0x56, 0x0d, 0xff, 0x69, 0x0a, 0x1c, 0x6f, 0xef, 0x26, 0x39, 0x4f, 0x4c, 0x03, 0x82,
        0x1c, 0x4f,
    ]);

    /// keccak256("Redeem(address,uint256,uint256)")
    pub const REDEEM: B256 = B256::new([
        0xe5, 0xb7, 0x54, 0xfb, 0x1a, 0xbb, 0x7f, 0x01, 0xb4, 0x99, 0x79, 0x1d, 0x0b, 0x82, 0x0a,
        0xe3, 0xb6, 0xaf, 0x34, 0x24, 0xac, 0x1c, 0x59, 0x76, 0x8e, 0xdb, 0x53, 0xf4, 0xec, 0x31,
        0xa9, 0x29,
    ]);

    /// keccak256("Borrow(address,uint256,uint256,uint256)")
    pub const BORROW: B256 = B256::new([
        0x13, 0xed, 0x68, 0x66, 0xd4, 0xe1, 0xee, 0x6d, 0xa4, 0x6f, 0x84, 0x5c, 0x46, 0xd7, 0xe5,
        0x41, 0x20, 0x88, 0x3d, 0x75, 0xc5, 0xea, 0x9a, 0x2d, 0xac, 0xc1, 0xc4, 0xca, 0x89, 0x84,
        0xab, 0x80,
    ]);

    /// keccak256("RepayBorrow(address,address,uint256,uint256,uint256)")
    pub const REPAY_BORROW: B256 = B256::new([
        0x1a, 0x2a, 0x22, 0xcb, 0x03, 0x4d, 0x26, 0xd1, 0x85, 0x4b, 0xdc, 0x66, 0x66, 0xa5, 0xb9,
        0x1f, 0xe2, 0x5e, 0xfb, 0xbb, 0x5d, 0xca, 0xd3, 0xb0, 0x35, 0x54, 0x78, 0xd6, 0xf5, 0xc3,
        0x62, 0xa1,
    ]);

    /// keccak256("LiquidateBorrow(address,address,uint256,address,uint256)")
    pub const LIQUIDATE_BORROW: B256 = B256::new([
        0x29, 0x86, 0x37, 0xf6, 0x84, 0xda, 0x70, 0x67, 0x4f, 0x26, 0x50, 0x9b, 0x10, 0xf0, 0x7e,
        0xc2, 0xfb, 0xc7, 0x7a, 0x33, 0x5a, 0xb1, 0xe7, 0xd6, 0x21, 0x5a, 0x4b, 0x24, 0x84, 0xd8,
        0xbb, 0x52,
    ]);

    /// keccak256("Transfer(address,address,uint256)")
    pub const TRANSFER: B256 = B256::new([
        0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d,
        0xaa, 0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23,
        0xb3, 0xef,
    ]);

    /// All cToken event signatures, for the subscription filter.
    pub fn market_signatures() -> Vec<B256> {
        vec![
            ACCRUE_INTEREST,
            MINT,
            REDEEM,
            BORROW,
            REPAY_BORROW,
            LIQUIDATE_BORROW,
            TRANSFER,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::ctoken_signatures::*;
    use alloy::primitives::keccak256;

    #[test]
    fn test_signature_constants_match_preimages() {
        let cases = [
            (ACCRUE_INTEREST, "AccrueInterest(uint256,uint256,uint256,uint256)"),
            (MINT, "Mint(address,uint256,uint256)"),
            (REDEEM, "Redeem(address,uint256,uint256)"),
            (BORROW, "Borrow(address,uint256,uint256,uint256)"),
            (
                REPAY_BORROW,
                "RepayBorrow(address,address,uint256,uint256,uint256)",
            ),
            (
                LIQUIDATE_BORROW,
                "LiquidateBorrow(address,address,uint256,address,uint256)",
            ),
            (TRANSFER, "Transfer(address,address,uint256)"),
        ];
        for (constant, preimage) in cases {
            assert_eq!(constant, keccak256(preimage.as_bytes()), "{preimage}");
        }
        assert_eq!(market_signatures().len(), 7);
    }
}
