#![allow(non_snake_case)]

use lottery_abi::U256;
use lottery_client::{
    test_helpers::{
        ALICE,
        TestContext,
    },
    types::{
        RoundFilter,
        RoundStatus,
        TicketPrices,
        TicketType,
    },
};

const PAST: u64 = 1;

#[tokio::test]
async fn round_lifecycle__create_mint_and_draw__state_follows_each_step() {
    let ctx = TestContext::new();
    ctx.chain.set_owner(ALICE);
    ctx.chain.set_prices(TicketPrices {
        full: U256::from(10),
        half: U256::from(5),
        quarter: U256::from(3),
    });
    let service = ctx.connect().await.unwrap();
    assert!(service.rounds(RoundFilter::All).is_empty());

    // given
    let created = service.create_round(50, PAST).await.unwrap();
    service.confirm(&created).await;
    let rounds = service.rounds(RoundFilter::Active);
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].max_tickets, 50);
    assert_eq!(rounds[0].status(100), RoundStatus::ReadyForDraw);

    // when
    let minted = service.mint_ticket(0, TicketType::Half).await.unwrap();
    service.confirm(&minted).await;

    // then
    let round = &service.rounds(RoundFilter::All)[0];
    assert_eq!(round.total_sold, 1);
    assert_eq!(round.total_pool, U256::from(5));
    let tickets = service.tickets();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].ticket_type, TicketType::Half);

    // when
    let drawn = service.close_and_draw(0).await.unwrap();
    service.confirm(&drawn).await;

    // then
    assert!(service.rounds(RoundFilter::Active).is_empty());
    let closed = service.rounds(RoundFilter::Closed);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status(100), RoundStatus::Completed);
    assert_eq!(closed[0].winning_numbers, Some(vec![1, 2, 3, 4, 5, 6]));
}

#[tokio::test]
async fn confirm__sequential_round_creation__ids_follow_next_round_id() {
    // given
    let ctx = TestContext::new();
    ctx.chain.set_owner(ALICE);
    let service = ctx.connect().await.unwrap();

    // when
    for max_tickets in [10, 20, 30] {
        let created = service.create_round(max_tickets, u64::MAX / 2).await.unwrap();
        service.confirm(&created).await;
    }

    // then
    let rounds = service.rounds(RoundFilter::All);
    let ids: Vec<u64> = rounds.iter().map(|r| r.id).collect();
    let capacities: Vec<u64> = rounds.iter().map(|r| r.max_tickets).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(capacities, vec![10, 20, 30]);
}
