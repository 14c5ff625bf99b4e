//! Batched contract reads for prices, owner, rounds and account stats.

use crate::{
    Error,
    Result,
    chain::{
        CallOutcome,
        ContractCall,
        ContractReader,
        read_batch,
    },
    contracts::LotteryContracts,
    notify::Notifier,
    types::{
        NUMBERS_PER_TICKET,
        NftStats,
        Round,
        TicketPrices,
    },
};
use lottery_abi::{
    Address,
    SolCall,
    U256,
    lottery_manager::{
        self,
        RoundRecord,
        fullPriceCall,
        getWinningNumbersCall,
        halfPriceCall,
        nextRoundIdCall,
        ownerCall,
        quarterPriceCall,
        roundsCall,
    },
    lottery_nft::{
        balanceOfCall,
        totalMintedCall,
    },
    mock_usdt,
    to_u64,
};
use std::sync::Arc;
use tracing::{
    debug,
    warn,
};

pub struct Aggregator<R> {
    reader: Arc<R>,
    contracts: LotteryContracts,
    notifier: Notifier,
}

impl<R> Clone for Aggregator<R> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            contracts: self.contracts,
            notifier: self.notifier.clone(),
        }
    }
}

impl<R: ContractReader> Aggregator<R> {
    pub fn new(reader: Arc<R>, contracts: LotteryContracts, notifier: Notifier) -> Self {
        Self {
            reader,
            contracts,
            notifier,
        }
    }

    async fn read_one<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return> {
        let call = ContractCall::new(to, call);
        let name = call.name();
        let outcomes = read_batch(&*self.reader, &[call]).await?;
        match outcomes.into_iter().next() {
            Some(CallOutcome::Success(data)) => {
                Ok(C::abi_decode_returns(&data).map_err(lottery_abi::Error::from)?)
            }
            Some(CallOutcome::Failure(message)) => {
                Err(Error::InvalidResponse(format!("{name} failed: {message}")))
            }
            None => Err(Error::InvalidResponse(format!("{name} returned nothing"))),
        }
    }

    /// `None` unless all three tier prices were read.
    pub async fn load_prices(&self) -> Option<TicketPrices> {
        let calls = [
            self.contracts.manager_call(fullPriceCall {}),
            self.contracts.manager_call(halfPriceCall {}),
            self.contracts.manager_call(quarterPriceCall {}),
        ];
        let outcomes = match read_batch(&*self.reader, &calls).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "failed to load ticket prices");
                return None;
            }
        };
        let full = outcomes[0].decode::<fullPriceCall>()?;
        let half = outcomes[1].decode::<halfPriceCall>()?;
        let quarter = outcomes[2].decode::<quarterPriceCall>()?;
        Some(TicketPrices {
            full,
            half,
            quarter,
        })
    }

    pub async fn load_owner(&self) -> Option<Address> {
        self.read_one(self.contracts.manager, ownerCall {})
            .await
            .inspect_err(|e| warn!(error = %e, "failed to load contract owner"))
            .ok()
    }

    /// Every round in `[0, nextRoundId)` that decoded, ascending by id.
    pub async fn load_rounds(&self) -> Vec<Round> {
        let next_round_id = match self
            .read_one(self.contracts.manager, nextRoundIdCall {})
            .await
            .and_then(|id| Ok(to_u64(id, "nextRoundId")?))
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to read next round id");
                self.notifier
                    .error("Failed to load rounds", "Could not read the round count");
                return Vec::new();
            }
        };
        if next_round_id == 0 {
            self.notifier
                .info("No rounds available", "No lottery rounds have been created yet");
            return Vec::new();
        }

        let calls: Vec<ContractCall> = (0..next_round_id)
            .map(|i| self.contracts.manager_call(lottery_manager::rounds(i)))
            .collect();
        debug!(count = calls.len(), "loading rounds");
        let outcomes = match read_batch(&*self.reader, &calls).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "round batch failed");
                self.notifier
                    .error("Failed to load rounds", "Round details could not be read");
                return Vec::new();
            }
        };

        let mut rounds: Vec<Round> = outcomes
            .iter()
            .zip(0..next_round_id)
            .filter_map(|(outcome, i)| {
                let round = outcome
                    .decode::<roundsCall>()
                    .and_then(|raw| RoundRecord::try_from(raw).ok())
                    .and_then(Round::from_record);
                if round.is_none() {
                    debug!(round_id = i, "dropping unreadable round");
                }
                round
            })
            .collect();
        if rounds.is_empty() {
            self.notifier
                .info("No rounds available", "No lottery rounds could be loaded");
            return rounds;
        }

        self.attach_winning_numbers(&mut rounds).await;
        rounds
    }

    async fn attach_winning_numbers(&self, rounds: &mut [Round]) {
        let completed: Vec<usize> = rounds
            .iter()
            .enumerate()
            .filter(|(_, r)| r.draw_completed)
            .map(|(idx, _)| idx)
            .collect();
        if completed.is_empty() {
            return;
        }
        let calls: Vec<ContractCall> = completed
            .iter()
            .map(|idx| {
                self.contracts.manager_call(getWinningNumbersCall {
                    roundId: U256::from(rounds[*idx].id),
                })
            })
            .collect();
        let outcomes = match read_batch(&*self.reader, &calls).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "winning numbers batch failed");
                return;
            }
        };
        for (idx, outcome) in completed.into_iter().zip(outcomes) {
            rounds[idx].winning_numbers = outcome
                .decode::<getWinningNumbersCall>()
                .and_then(to_ticket_numbers);
        }
    }

    pub async fn load_nft_stats(&self, address: Address) -> Option<NftStats> {
        let calls = [
            self.contracts.nft_call(balanceOfCall { owner: address }),
            self.contracts.nft_call(totalMintedCall {}),
        ];
        let outcomes = read_batch(&*self.reader, &calls)
            .await
            .inspect_err(|e| warn!(error = %e, "failed to load nft stats"))
            .ok()?;
        Some(NftStats {
            balance: to_u64(outcomes[0].decode::<balanceOfCall>()?, "balanceOf").ok()?,
            total_minted: to_u64(outcomes[1].decode::<totalMintedCall>()?, "totalMinted").ok()?,
        })
    }

    /// Token balance held by the manager, i.e. what a withdrawal would move.
    pub async fn load_contract_balance(&self) -> Option<U256> {
        let call = mock_usdt::balanceOfCall {
            account: self.contracts.manager,
        };
        self.read_one(self.contracts.token, call)
            .await
            .inspect_err(|e| warn!(error = %e, "failed to load contract balance"))
            .ok()
    }
}

/// Exactly six numbers.
pub(crate) fn to_ticket_numbers(values: Vec<u8>) -> Option<Vec<u8>> {
    (values.len() == NUMBERS_PER_TICKET).then_some(values)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        notify::NotificationLevel,
        test_helpers::{
            FakeLotteryChain,
            arb_contracts,
            arb_round_record,
        },
    };
    use proptest::prelude::*;

    fn aggregator(chain: &FakeLotteryChain) -> (Aggregator<FakeLotteryChain>, Notifier) {
        let notifier = Notifier::new();
        let aggregator =
            Aggregator::new(Arc::new(chain.clone()), arb_contracts(), notifier.clone());
        (aggregator, notifier)
    }

    #[tokio::test]
    async fn load_rounds__returns_rounds_in_ascending_id_order() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        for id in 0..3 {
            chain.add_round(arb_round_record(id));
        }
        let (aggregator, _) = aggregator(&chain);

        // when
        let rounds = aggregator.load_rounds().await;

        // then
        let ids: Vec<u64> = rounds.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn load_rounds__failed_individual_read__is_dropped_silently() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        for id in 0..3 {
            chain.add_round(arb_round_record(id));
        }
        chain.fail_round(1);
        let (aggregator, notifier) = aggregator(&chain);

        // when
        let rounds = aggregator.load_rounds().await;

        // then
        let ids: Vec<u64> = rounds.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(notifier.recent().is_empty());
    }

    #[tokio::test]
    async fn load_rounds__oversold_round__is_dropped() {
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.add_round(RoundRecord {
            total_sold: 11,
            max_tickets: 10,
            ..arb_round_record(1)
        });
        let (aggregator, _) = aggregator(&chain);

        let rounds = aggregator.load_rounds().await;

        assert_eq!(rounds.len(), 1);
    }

    #[tokio::test]
    async fn load_rounds__no_rounds__notifies_and_returns_empty() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        let (aggregator, notifier) = aggregator(&chain);

        // when
        let rounds = aggregator.load_rounds().await;

        // then
        assert!(rounds.is_empty());
        let notes = notifier.recent();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "No rounds available");
    }

    #[tokio::test]
    async fn load_rounds__batch_failure__yields_empty_list_and_error_notice() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(arb_round_record(0));
        chain.set_fail_batches(true);
        let (aggregator, notifier) = aggregator(&chain);

        // when
        let rounds = aggregator.load_rounds().await;

        // then
        assert!(rounds.is_empty());
        assert_eq!(notifier.recent()[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn load_rounds__completed_round__carries_winning_numbers() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.add_round(RoundRecord {
            is_active: false,
            draw_completed: true,
            ..arb_round_record(0)
        });
        chain.add_round(RoundRecord {
            is_active: false,
            draw_completed: true,
            ..arb_round_record(1)
        });
        chain.add_round(arb_round_record(2));
        chain.set_winning_numbers(0, vec![3, 9, 14, 22, 31, 40]);
        chain.set_winning_numbers(1, vec![1, 2, 3]);
        let (aggregator, _) = aggregator(&chain);

        // when
        let rounds = aggregator.load_rounds().await;

        // then
        assert_eq!(rounds[0].winning_numbers, Some(vec![3, 9, 14, 22, 31, 40]));
        assert_eq!(rounds[1].winning_numbers, None);
        assert_eq!(rounds[2].winning_numbers, None);
    }

    #[tokio::test]
    async fn load_prices__one_failed_read__keeps_nothing() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        let prices = TicketPrices {
            full: U256::from(10),
            half: U256::from(5),
            quarter: U256::from(2),
        };
        chain.set_prices(prices);
        let (aggregator, _) = aggregator(&chain);
        assert_eq!(aggregator.load_prices().await, Some(prices));

        // when
        chain.fail_function::<halfPriceCall>();
        let prices = aggregator.load_prices().await;

        // then
        assert_eq!(prices, None);
    }

    #[tokio::test]
    async fn load_nft_stats__reads_balance_and_total_minted() {
        // given
        let chain = FakeLotteryChain::new(arb_contracts());
        let holder = Address::new([0x11; 20]);
        chain.add_round(arb_round_record(0));
        chain.add_ticket(crate::test_helpers::arb_fake_ticket(1, 0, holder));
        chain.add_ticket(crate::test_helpers::arb_fake_ticket(
            2,
            0,
            Address::new([0x22; 20]),
        ));
        let (aggregator, _) = aggregator(&chain);

        // when
        let stats = aggregator.load_nft_stats(holder).await;

        // then
        assert_eq!(
            stats,
            Some(NftStats {
                balance: 1,
                total_minted: 2
            })
        );
    }

    #[tokio::test]
    async fn load_contract_balance__reads_manager_token_balance() {
        let chain = FakeLotteryChain::new(arb_contracts());
        chain.set_token_balance(arb_contracts().manager, U256::from(1_234));
        let (aggregator, _) = aggregator(&chain);

        assert_eq!(
            aggregator.load_contract_balance().await,
            Some(U256::from(1_234))
        );
    }

    proptest! {
        #[test]
        fn to_ticket_numbers__only_six_numbers_pass(values in proptest::collection::vec(any::<u8>(), 0..9)) {
            let expected_ok = values.len() == NUMBERS_PER_TICKET;
            prop_assert_eq!(to_ticket_numbers(values).is_some(), expected_ok);
        }
    }
}
