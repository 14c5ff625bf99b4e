//! `LotteryManager` contract: rounds, ticket bookkeeping and admin calls.

use crate::{
    Result,
    U256,
    to_u64,
};
use alloy_sol_types::sol;

sol! {
    #[sol(all_derives)]
    interface ILotteryManager {
        function fullPrice() external view returns (uint256);
        function halfPrice() external view returns (uint256);
        function quarterPrice() external view returns (uint256);
        function nextRoundId() external view returns (uint256);
        function owner() external view returns (address);
        function rounds(uint256 roundId) external view returns (
            uint256 id,
            uint256 ticketPrice,
            uint256 maxTickets,
            uint256 totalSold,
            bool isActive,
            uint256 drawTime,
            bool drawCompleted,
            uint256 totalPool
        );
        function roundTickets(uint256 roundId, uint256 index) external view returns (uint256);
        function ticketType(uint256 tokenId) external view returns (uint8);
        function isWinningTicket(uint256 tokenId) external view returns (bool);
        function ticketReward(uint256 tokenId) external view returns (uint256);
        function getWinningNumbers(uint256 roundId) external view returns (uint8[] memory);

        function mintTicket(uint256 roundId, uint256 ticketType) external;
        function claimReward(uint256 tokenId) external;
        function createRound(uint256 maxTickets, uint256 drawTime) external;
        function closeRoundAndDraw(uint256 roundId) external;
        function setPrices(uint256 fullPrice, uint256 halfPrice, uint256 quarterPrice) external;
        function withdrawUSDT() external;
    }
}

pub use ILotteryManager::*;

/// The `rounds(uint256)` getter tuple with ids and counters narrowed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundRecord {
    pub id: u64,
    pub ticket_price: U256,
    pub max_tickets: u64,
    pub total_sold: u64,
    pub is_active: bool,
    pub draw_time: u64,
    pub draw_completed: bool,
    pub total_pool: U256,
}

impl TryFrom<roundsReturn> for RoundRecord {
    type Error = crate::Error;

    fn try_from(round: roundsReturn) -> Result<Self> {
        Ok(Self {
            id: to_u64(round.id, "id")?,
            ticket_price: round.ticketPrice,
            max_tickets: to_u64(round.maxTickets, "maxTickets")?,
            total_sold: to_u64(round.totalSold, "totalSold")?,
            is_active: round.isActive,
            draw_time: to_u64(round.drawTime, "drawTime")?,
            draw_completed: round.drawCompleted,
            total_pool: round.totalPool,
        })
    }
}

impl From<&RoundRecord> for roundsReturn {
    fn from(round: &RoundRecord) -> Self {
        Self {
            id: U256::from(round.id),
            ticketPrice: round.ticket_price,
            maxTickets: U256::from(round.max_tickets),
            totalSold: U256::from(round.total_sold),
            isActive: round.is_active,
            drawTime: U256::from(round.draw_time),
            drawCompleted: round.draw_completed,
            totalPool: round.total_pool,
        }
    }
}

pub fn rounds(round_id: u64) -> roundsCall {
    roundsCall {
        roundId: U256::from(round_id),
    }
}

pub fn round_tickets(round_id: u64, index: u64) -> roundTicketsCall {
    roundTicketsCall {
        roundId: U256::from(round_id),
        index: U256::from(index),
    }
}

pub fn mint_ticket(round_id: u64, ticket_type: u8) -> mintTicketCall {
    mintTicketCall {
        roundId: U256::from(round_id),
        ticketType: U256::from(ticket_type),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy_sol_types::{
        SolCall,
        SolInterface,
    };

    fn arb_round() -> RoundRecord {
        RoundRecord {
            id: 3,
            ticket_price: U256::from(100),
            max_tickets: 1_000,
            total_sold: 42,
            is_active: true,
            draw_time: 1_750_000_000,
            draw_completed: false,
            total_pool: U256::from(4_200u64) * U256::from(10u64).pow(U256::from(18)),
        }
    }

    #[test]
    fn rounds__return_data__decodes_in_getter_field_order() {
        // given
        let expected = arb_round();
        let data = roundsCall::abi_encode_returns(&roundsReturn::from(&expected));

        // when
        let decoded = roundsCall::abi_decode_returns(&data).unwrap();

        // then
        assert_eq!(RoundRecord::try_from(decoded).unwrap(), expected);
    }

    #[test]
    fn rounds__truncated_return_data__is_an_error() {
        let data = roundsCall::abi_encode_returns(&roundsReturn::from(&arb_round()));
        assert!(roundsCall::abi_decode_returns(&data[..7 * 32]).is_err());
    }

    #[test]
    fn rounds__huge_counter__fails_to_narrow() {
        let mut raw = roundsReturn::from(&arb_round());
        raw.totalSold = U256::MAX;
        assert_eq!(
            RoundRecord::try_from(raw),
            Err(crate::Error::Overflow { field: "totalSold" })
        );
    }

    #[test]
    fn mint_ticket__calldata_matches_two_word_signature() {
        // given
        let call = mint_ticket(7, 2);

        // when
        let data = call.abi_encode();

        // then
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &mintTicketCall::SELECTOR);
        assert_eq!(data[4 + 31], 7);
        assert_eq!(data[4 + 63], 2);
        assert_eq!(mintTicketCall::SIGNATURE, "mintTicket(uint256,uint256)");
    }

    #[test]
    fn calls__decode_back_into_the_matching_variant() {
        let data = round_tickets(4, 9).abi_encode();
        let decoded = ILotteryManagerCalls::abi_decode(&data).unwrap();
        assert_eq!(
            decoded,
            ILotteryManagerCalls::roundTickets(round_tickets(4, 9))
        );
    }

    #[test]
    fn owner__selector_matches_well_known_value() {
        assert_eq!(ownerCall::SELECTOR, [0x8d, 0xa5, 0xcb, 0x5b]);
    }
}
