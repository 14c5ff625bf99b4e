//! `LotteryNFT` contract: ticket ownership and chosen numbers.

use alloy_sol_types::sol;

sol! {
    #[sol(all_derives)]
    interface ILotteryNFT {
        function ownerOf(uint256 tokenId) external view returns (address);
        function getTokenNumbers(uint256 tokenId) external view returns (uint8[] memory);
        function balanceOf(address owner) external view returns (uint256);
        function totalMinted() external view returns (uint256);
    }
}

pub use ILotteryNFT::*;

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::U256;
    use alloy_sol_types::SolCall;
    use proptest::prelude::*;

    #[test]
    fn owner_of__calldata_matches_raw_eth_call_payload() {
        let data = ownerOfCall {
            tokenId: U256::from(26),
        }
        .abi_encode();
        let expected: Vec<u8> = [0x63, 0x52, 0x21, 0x1e]
            .into_iter()
            .chain(std::iter::repeat_n(0u8, 31))
            .chain([26])
            .collect();
        assert_eq!(data, expected);
    }

    proptest! {
        #[test]
        fn get_token_numbers__return_data_recovers_numbers(numbers in proptest::collection::vec(any::<u8>(), 0..12)) {
            let data = getTokenNumbersCall::abi_encode_returns(&numbers);
            prop_assert_eq!(getTokenNumbersCall::abi_decode_returns(&data).unwrap(), numbers);
        }
    }
}
