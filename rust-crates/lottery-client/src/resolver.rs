//! Discovers the session's tickets across all rounds.
//!
//! Resolution runs two dependent batches: `roundTickets(round, index)` for
//! every sold slot, then five detail reads per discovered token. Each
//! token's detail outcomes are kept together in a [`TicketDetails`] so a
//! missing or reordered result cannot shift data onto another token.

use crate::{
    aggregator::to_ticket_numbers,
    chain::{
        CallOutcome,
        ContractCall,
        ContractReader,
        read_batch,
    },
    contracts::LotteryContracts,
    notify::Notifier,
    types::{
        Round,
        Ticket,
        TicketType,
    },
};
use lottery_abi::{
    Address,
    U256,
    lottery_manager::{
        self,
        isWinningTicketCall,
        roundTicketsCall,
        ticketRewardCall,
        ticketTypeCall,
    },
    lottery_nft::{
        getTokenNumbersCall,
        ownerOfCall,
    },
    to_u64,
};
use std::sync::Arc;
use tracing::{
    debug,
    warn,
};

const DETAIL_CALLS: usize = 5;

/// A ticket slot found during discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketRef {
    pub round_id: u64,
    pub token_id: u64,
}

/// Detail read results for one token, in call order.
#[derive(Clone, Debug)]
pub struct TicketDetails {
    pub ticket: TicketRef,
    pub owner: CallOutcome,
    pub ticket_type: CallOutcome,
    pub is_winning: CallOutcome,
    pub reward: CallOutcome,
    pub numbers: CallOutcome,
}

impl TicketDetails {
    fn calls(contracts: &LotteryContracts, token_id: u64) -> [ContractCall; DETAIL_CALLS] {
        let token_id = U256::from(token_id);
        [
            contracts.nft_call(ownerOfCall { tokenId: token_id }),
            contracts.manager_call(ticketTypeCall { tokenId: token_id }),
            contracts.manager_call(isWinningTicketCall { tokenId: token_id }),
            contracts.manager_call(ticketRewardCall { tokenId: token_id }),
            contracts.nft_call(getTokenNumbersCall { tokenId: token_id }),
        ]
    }

    fn from_outcomes(ticket: TicketRef, outcomes: &[CallOutcome]) -> Option<Self> {
        let [owner, ticket_type, is_winning, reward, numbers] = outcomes else {
            return None;
        };
        Some(Self {
            ticket,
            owner: owner.clone(),
            ticket_type: ticket_type.clone(),
            is_winning: is_winning.clone(),
            reward: reward.clone(),
            numbers: numbers.clone(),
        })
    }

    /// The ticket, if every read succeeded and `holder` owns it.
    pub fn into_ticket(self, holder: Address) -> Option<Ticket> {
        let owner = self.owner.decode::<ownerOfCall>()?;
        if owner != holder {
            return None;
        }
        let ticket_type = self
            .ticket_type
            .decode::<ticketTypeCall>()
            .and_then(TicketType::from_u8)?;
        let is_winning = self.is_winning.decode::<isWinningTicketCall>()?;
        let reward = self.reward.decode::<ticketRewardCall>()?;
        let numbers = self
            .numbers
            .decode::<getTokenNumbersCall>()
            .and_then(to_ticket_numbers)?;
        Some(Ticket::new(
            self.ticket.token_id,
            self.ticket.round_id,
            numbers,
            ticket_type,
            owner,
            is_winning,
            reward,
        ))
    }
}

pub struct Resolver<R> {
    reader: Arc<R>,
    contracts: LotteryContracts,
    notifier: Notifier,
}

impl<R> Clone for Resolver<R> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            contracts: self.contracts,
            notifier: self.notifier.clone(),
        }
    }
}

impl<R: ContractReader> Resolver<R> {
    pub fn new(reader: Arc<R>, contracts: LotteryContracts, notifier: Notifier) -> Self {
        Self {
            reader,
            contracts,
            notifier,
        }
    }

    /// Tickets owned by `holder`. Read failures shrink the result rather
    /// than failing it.
    pub async fn resolve(&self, holder: Option<Address>, rounds: &[Round]) -> Vec<Ticket> {
        let Some(holder) = holder else {
            return Vec::new();
        };
        let refs = self.discover(rounds).await;
        if refs.is_empty() {
            self.notify_no_tickets();
            return Vec::new();
        }
        let details = self.details(&refs).await;
        let tickets: Vec<Ticket> = details
            .into_iter()
            .filter_map(|d| d.into_ticket(holder))
            .collect();
        debug!(%holder, discovered = refs.len(), owned = tickets.len(), "tickets resolved");
        if tickets.is_empty() {
            self.notify_no_tickets();
        }
        tickets
    }

    fn notify_no_tickets(&self) {
        self.notifier
            .info("No tickets", "You have no tickets in any round yet");
    }

    pub async fn discover(&self, rounds: &[Round]) -> Vec<TicketRef> {
        let slots: Vec<(u64, ContractCall)> = rounds
            .iter()
            .flat_map(|round| {
                (0..round.total_sold).map(move |index| {
                    (
                        round.id,
                        self.contracts
                            .manager_call(lottery_manager::round_tickets(round.id, index)),
                    )
                })
            })
            .collect();
        if slots.is_empty() {
            return Vec::new();
        }
        let calls: Vec<ContractCall> = slots.iter().map(|(_, c)| c.clone()).collect();
        let outcomes = match read_batch(&*self.reader, &calls).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "ticket discovery batch failed");
                return Vec::new();
            }
        };
        slots
            .iter()
            .zip(outcomes)
            .filter_map(|((round_id, _), outcome)| {
                let token_id = to_u64(outcome.decode::<roundTicketsCall>()?, "tokenId").ok()?;
                (token_id != 0).then_some(TicketRef {
                    round_id: *round_id,
                    token_id,
                })
            })
            .collect()
    }

    pub async fn details(&self, refs: &[TicketRef]) -> Vec<TicketDetails> {
        let calls: Vec<ContractCall> = refs
            .iter()
            .flat_map(|r| TicketDetails::calls(&self.contracts, r.token_id))
            .collect();
        let outcomes = match read_batch(&*self.reader, &calls).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "ticket detail batch failed");
                return Vec::new();
            }
        };
        refs.iter()
            .zip(outcomes.chunks(DETAIL_CALLS))
            .filter_map(|(r, chunk)| TicketDetails::from_outcomes(*r, chunk))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        FakeLotteryChain,
        arb_contracts,
        arb_fake_ticket,
        arb_round_record,
    };
    use lottery_abi::SolCall;
    use proptest::prelude::*;

    const ALICE: Address = Address::new([0xaa; 20]);
    const BOB: Address = Address::new([0xbb; 20]);

    fn resolver(chain: &FakeLotteryChain) -> (Resolver<FakeLotteryChain>, Notifier) {
        let notifier = Notifier::new();
        let resolver =
            Resolver::new(Arc::new(chain.clone()), arb_contracts(), notifier.clone());
        (resolver, notifier)
    }

    fn rounds_of(chain: &FakeLotteryChain) -> Vec<Round> {
        chain
            .rounds()
            .into_iter()
            .filter_map(Round::from_record)
            .collect()
    }

    #[tokio::test]
    async fn resolve__keeps_only_tickets_owned_by_holder() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_round(arb_round_record(1));
        chain.add_ticket(arb_fake_ticket(1, 0, ALICE));
        chain.add_ticket(arb_fake_ticket(2, 0, BOB));
        chain.add_ticket(arb_fake_ticket(3, 1, ALICE));
        let (resolver, _) = resolver(&chain);

        // when
        let tickets = resolver.resolve(Some(ALICE), &rounds_of(&chain)).await;

        // then
        let ids: Vec<(u64, u64)> = tickets.iter().map(|t| (t.round_id, t.token_id)).collect();
        assert_eq!(ids, vec![(0, 1), (1, 3)]);
        assert!(tickets.iter().all(|t| t.owner == ALICE));
    }

    #[tokio::test]
    async fn resolve__without_holder__issues_no_reads() {
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_ticket(arb_fake_ticket(1, 0, ALICE));
        let (resolver, _) = resolver(&chain);

        let tickets = resolver.resolve(None, &rounds_of(&chain)).await;

        assert!(tickets.is_empty());
        assert_eq!(chain.batch_count(), 0);
    }

    #[tokio::test]
    async fn resolve__no_sold_tickets__notifies_no_tickets() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        let (resolver, notifier) = resolver(&chain);

        // when
        let tickets = resolver.resolve(Some(ALICE), &rounds_of(&chain)).await;

        // then
        assert!(tickets.is_empty());
        assert_eq!(notifier.recent()[0].title, "No tickets");
        assert_eq!(chain.batch_count(), 0);
    }

    #[tokio::test]
    async fn resolve__every_ticket_held_by_someone_else__notifies_no_tickets() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_ticket(arb_fake_ticket(1, 0, BOB));
        chain.add_ticket(arb_fake_ticket(2, 0, BOB));
        let (resolver, notifier) = resolver(&chain);

        // when
        let tickets = resolver.resolve(Some(ALICE), &rounds_of(&chain)).await;

        // then
        assert!(tickets.is_empty());
        let notes = notifier.recent();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "No tickets");
    }

    #[tokio::test]
    async fn resolve__holder_owns_a_ticket__sends_no_notice() {
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_ticket(arb_fake_ticket(1, 0, ALICE));
        let (resolver, notifier) = resolver(&chain);

        let tickets = resolver.resolve(Some(ALICE), &rounds_of(&chain)).await;

        assert_eq!(tickets.len(), 1);
        assert!(notifier.recent().is_empty());
    }

    #[tokio::test]
    async fn resolve__one_failed_detail_read__drops_only_that_ticket() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_ticket(arb_fake_ticket(1, 0, ALICE));
        chain.add_ticket(arb_fake_ticket(2, 0, ALICE));
        chain.fail_token_reads(1);
        let (resolver, _) = resolver(&chain);

        // when
        let tickets = resolver.resolve(Some(ALICE), &rounds_of(&chain)).await;

        // then
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].token_id, 2);
    }

    #[tokio::test]
    async fn discover__zero_token_id__is_skipped() {
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_ticket(arb_fake_ticket(0, 0, ALICE));
        chain.add_ticket(arb_fake_ticket(4, 0, ALICE));
        let (resolver, _) = resolver(&chain);

        let refs = resolver.discover(&rounds_of(&chain)).await;

        assert_eq!(
            refs,
            vec![TicketRef {
                round_id: 0,
                token_id: 4
            }]
        );
    }

    fn returns<C: SolCall>(value: &C::Return) -> CallOutcome {
        CallOutcome::Success(C::abi_encode_returns(value).into())
    }

    fn arb_details(owner: Address, is_winning: bool, reward: U256) -> TicketDetails {
        TicketDetails {
            ticket: TicketRef {
                round_id: 2,
                token_id: 9,
            },
            owner: returns::<ownerOfCall>(&owner),
            ticket_type: returns::<ticketTypeCall>(&1),
            is_winning: returns::<isWinningTicketCall>(&is_winning),
            reward: returns::<ticketRewardCall>(&reward),
            numbers: returns::<getTokenNumbersCall>(&vec![1, 2, 3, 4, 5, 6]),
        }
    }

    #[test]
    fn into_ticket__all_reads_succeeded__builds_ticket() {
        let ticket = arb_details(ALICE, true, U256::from(500))
            .into_ticket(ALICE)
            .unwrap();
        assert_eq!(ticket.ticket_type, TicketType::Half);
        assert_eq!(ticket.numbers, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ticket.reward, U256::from(500));
    }

    #[test]
    fn into_ticket__unknown_ticket_type__is_dropped() {
        let mut details = arb_details(ALICE, false, U256::ZERO);
        details.ticket_type = returns::<ticketTypeCall>(&7);
        assert_eq!(details.into_ticket(ALICE), None);
    }

    #[test]
    fn into_ticket__failed_numbers_read__is_dropped() {
        let mut details = arb_details(ALICE, false, U256::ZERO);
        details.numbers = CallOutcome::Failure("reverted".to_string());
        assert_eq!(details.into_ticket(ALICE), None);
    }

    proptest! {
        #[test]
        fn into_ticket__visible_tickets_are_owned_and_only_winners_have_rewards(
            owner_byte in 0u8..3,
            is_winning in any::<bool>(),
            reward in any::<u64>(),
        ) {
            let owner = Address::new([owner_byte; 20]);
            let holder = Address::new([1u8; 20]);
            if let Some(ticket) = arb_details(owner, is_winning, U256::from(reward)).into_ticket(holder) {
                prop_assert_eq!(ticket.owner, holder);
                prop_assert!(ticket.is_winning || ticket.reward.is_zero());
            } else {
                prop_assert_ne!(owner, holder);
            }
        }
    }
}
