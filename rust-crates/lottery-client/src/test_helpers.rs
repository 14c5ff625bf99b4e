//! In-memory lottery contracts and wallet for tests.
//!
//! [`FakeLotteryChain`] answers real calldata: every call is decoded with
//! `lottery-abi`, so a wrong selector or argument shows up as a failed read
//! exactly as it would against a node.

use crate::{
    Error,
    Result,
    chain::{
        CallOutcome,
        ContractCall,
        ContractReader,
        TransactionRequest,
        TxReceipt,
        Wallet,
    },
    config::{
        ClientConfig,
        ServiceTimings,
    },
    contracts::LotteryContracts,
    service::LotteryService,
    types::{
        TicketPrices,
        TicketType,
    },
};
use lottery_abi::{
    Address,
    Bytes,
    SolCall,
    SolInterface,
    TxHash,
    U256,
    keccak256,
    lottery_manager::{
        self,
        ILotteryManagerCalls,
        RoundRecord,
    },
    lottery_nft::{
        self,
        ILotteryNFTCalls,
    },
    mock_usdt::{
        self,
        IMockUSDTCalls,
    },
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

pub const ALICE: Address = Address::new([0xaa; 20]);
pub const LOCAL_CHAIN_ID: u64 = 31_337;

type Selector = [u8; 4];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn selector_of(data: &[u8]) -> Option<Selector> {
    data.get(..4).and_then(|s| Selector::try_from(s).ok())
}

fn returns<C: SolCall>(value: &C::Return) -> Bytes {
    C::abi_encode_returns(value).into()
}

fn small(value: U256) -> Option<u64> {
    u64::try_from(value).ok()
}

pub fn arb_contracts() -> LotteryContracts {
    LotteryContracts::new(
        Address::new([0x01; 20]),
        Address::new([0x02; 20]),
        Address::new([0x03; 20]),
    )
}

/// An open round drawing in 2100.
pub fn arb_round_record(id: u64) -> RoundRecord {
    RoundRecord {
        id,
        ticket_price: U256::from(100),
        max_tickets: 100,
        total_sold: 0,
        is_active: true,
        draw_time: 4_102_444_800,
        draw_completed: false,
        total_pool: U256::ZERO,
    }
}

pub fn arb_fake_ticket(token_id: u64, round_id: u64, owner: Address) -> FakeTicket {
    FakeTicket {
        token_id,
        round_id,
        owner,
        ticket_type: TicketType::Full,
        numbers: vec![5, 12, 19, 26, 33, 40],
        is_winning: false,
        reward: U256::ZERO,
    }
}

pub fn fast_timings() -> ServiceTimings {
    ServiceTimings {
        settle_delay: Duration::from_millis(30),
        draw_settle_delay: Duration::from_millis(40),
        receipt_poll_interval: Duration::from_millis(5),
        confirmation_timeout: Duration::from_millis(500),
        refresh_interval: None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeTicket {
    pub token_id: u64,
    pub round_id: u64,
    pub owner: Address,
    pub ticket_type: TicketType,
    pub numbers: Vec<u8>,
    pub is_winning: bool,
    pub reward: U256,
}

#[derive(Default)]
struct ChainState {
    owner: Address,
    prices: TicketPrices,
    rounds: Vec<RoundRecord>,
    winning_numbers: HashMap<u64, Vec<u8>>,
    tickets: Vec<FakeTicket>,
    token_balances: HashMap<Address, U256>,
    failing_functions: HashSet<Selector>,
    failing_rounds: HashSet<u64>,
    failing_tokens: HashSet<u64>,
    fail_batches: bool,
    read_delay: Option<Duration>,
    batch_count: usize,
}

impl ChainState {
    fn ticket(&self, token_id: U256) -> Option<&FakeTicket> {
        let token_id = small(token_id)?;
        if self.failing_tokens.contains(&token_id) {
            return None;
        }
        self.tickets.iter().find(|t| t.token_id == token_id)
    }

    fn round_mut(&mut self, round_id: u64) -> Option<&mut RoundRecord> {
        self.rounds.iter_mut().find(|r| r.id == round_id)
    }

    fn answer(&self, contracts: &LotteryContracts, call: &ContractCall) -> Option<Bytes> {
        let data = &call.calldata;
        if self.failing_functions.contains(&selector_of(data)?) {
            return None;
        }
        if call.to == contracts.manager {
            self.answer_manager(ILotteryManagerCalls::abi_decode(data).ok()?)
        } else if call.to == contracts.nft {
            self.answer_nft(ILotteryNFTCalls::abi_decode(data).ok()?)
        } else if call.to == contracts.token {
            match IMockUSDTCalls::abi_decode(data).ok()? {
                IMockUSDTCalls::balanceOf(c) => {
                    let balance = self
                        .token_balances
                        .get(&c.account)
                        .copied()
                        .unwrap_or_default();
                    Some(returns::<mock_usdt::balanceOfCall>(&balance))
                }
                IMockUSDTCalls::approve(_) => None,
            }
        } else {
            None
        }
    }

    fn answer_manager(&self, call: ILotteryManagerCalls) -> Option<Bytes> {
        use lottery_manager::*;
        match call {
            ILotteryManagerCalls::fullPrice(_) => Some(returns::<fullPriceCall>(&self.prices.full)),
            ILotteryManagerCalls::halfPrice(_) => Some(returns::<halfPriceCall>(&self.prices.half)),
            ILotteryManagerCalls::quarterPrice(_) => {
                Some(returns::<quarterPriceCall>(&self.prices.quarter))
            }
            ILotteryManagerCalls::nextRoundId(_) => {
                Some(returns::<nextRoundIdCall>(&U256::from(self.rounds.len())))
            }
            ILotteryManagerCalls::owner(_) => Some(returns::<ownerCall>(&self.owner)),
            ILotteryManagerCalls::rounds(c) => {
                let id = small(c.roundId)?;
                if self.failing_rounds.contains(&id) {
                    return None;
                }
                let round = self.rounds.iter().find(|r| r.id == id)?;
                Some(returns::<roundsCall>(&roundsReturn::from(round)))
            }
            ILotteryManagerCalls::roundTickets(c) => {
                let round_id = small(c.roundId)?;
                let ticket = self
                    .tickets
                    .iter()
                    .filter(|t| t.round_id == round_id)
                    .nth(usize::try_from(c.index).ok()?)?;
                Some(returns::<roundTicketsCall>(&U256::from(ticket.token_id)))
            }
            ILotteryManagerCalls::ticketType(c) => self
                .ticket(c.tokenId)
                .map(|t| returns::<ticketTypeCall>(&t.ticket_type.as_u8())),
            ILotteryManagerCalls::isWinningTicket(c) => self
                .ticket(c.tokenId)
                .map(|t| returns::<isWinningTicketCall>(&t.is_winning)),
            ILotteryManagerCalls::ticketReward(c) => self
                .ticket(c.tokenId)
                .map(|t| returns::<ticketRewardCall>(&t.reward)),
            ILotteryManagerCalls::getWinningNumbers(c) => {
                let numbers = self.winning_numbers.get(&small(c.roundId)?)?;
                Some(returns::<getWinningNumbersCall>(numbers))
            }
            _ => None,
        }
    }

    fn answer_nft(&self, call: ILotteryNFTCalls) -> Option<Bytes> {
        use lottery_nft::*;
        match call {
            ILotteryNFTCalls::ownerOf(c) => self
                .ticket(c.tokenId)
                .map(|t| returns::<ownerOfCall>(&t.owner)),
            ILotteryNFTCalls::getTokenNumbers(c) => self
                .ticket(c.tokenId)
                .map(|t| returns::<getTokenNumbersCall>(&t.numbers)),
            ILotteryNFTCalls::balanceOf(c) => {
                let held = self.tickets.iter().filter(|t| t.owner == c.owner).count();
                Some(returns::<balanceOfCall>(&U256::from(held)))
            }
            ILotteryNFTCalls::totalMinted(_) => {
                Some(returns::<totalMintedCall>(&U256::from(self.tickets.len())))
            }
        }
    }

    fn apply(&mut self, contracts: &LotteryContracts, tx: &TransactionRequest) {
        if tx.to != contracts.manager {
            return;
        }
        let Ok(call) = ILotteryManagerCalls::abi_decode(&tx.data) else {
            return;
        };
        match call {
            ILotteryManagerCalls::mintTicket(c) => {
                let Some(round_id) = small(c.roundId) else {
                    return;
                };
                let Some(ticket_type) = small(c.ticketType)
                    .and_then(|kind| u8::try_from(kind).ok())
                    .and_then(TicketType::from_u8)
                else {
                    return;
                };
                let price = self.prices.price_of(ticket_type);
                let Some(round) = self.round_mut(round_id) else {
                    return;
                };
                if !round.is_active || round.total_sold >= round.max_tickets {
                    return;
                }
                round.total_sold += 1;
                round.total_pool += price;
                let token_id = self.tickets.iter().map(|t| t.token_id).max().unwrap_or(0) + 1;
                self.tickets.push(FakeTicket {
                    ticket_type,
                    ..arb_fake_ticket(token_id, round_id, tx.from)
                });
            }
            ILotteryManagerCalls::claimReward(c) => {
                if let Some(ticket) = self
                    .tickets
                    .iter_mut()
                    .find(|t| U256::from(t.token_id) == c.tokenId)
                {
                    ticket.reward = U256::ZERO;
                }
            }
            ILotteryManagerCalls::createRound(c) => {
                let (Some(max_tickets), Some(draw_time)) = (small(c.maxTickets), small(c.drawTime))
                else {
                    return;
                };
                let id = self.rounds.len() as u64;
                self.rounds.push(RoundRecord {
                    max_tickets,
                    draw_time,
                    ticket_price: self.prices.full,
                    ..arb_round_record(id)
                });
            }
            ILotteryManagerCalls::closeRoundAndDraw(c) => {
                let Some(round_id) = small(c.roundId) else {
                    return;
                };
                if let Some(round) = self.round_mut(round_id) {
                    round.is_active = false;
                    round.draw_completed = true;
                    self.winning_numbers.insert(round_id, vec![1, 2, 3, 4, 5, 6]);
                }
            }
            ILotteryManagerCalls::setPrices(c) => {
                self.prices = TicketPrices {
                    full: c.fullPrice,
                    half: c.halfPrice,
                    quarter: c.quarterPrice,
                };
            }
            ILotteryManagerCalls::withdrawUSDT(_) => {
                self.token_balances.insert(contracts.manager, U256::ZERO);
            }
            _ => {}
        }
    }
}

/// Lottery contracts backed by in-memory state. Clones share state.
#[derive(Clone)]
pub struct FakeLotteryChain {
    contracts: LotteryContracts,
    state: Arc<Mutex<ChainState>>,
}

impl FakeLotteryChain {
    pub fn new(contracts: LotteryContracts) -> Self {
        Self {
            contracts,
            state: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    pub fn contracts(&self) -> LotteryContracts {
        self.contracts
    }

    pub fn set_owner(&self, owner: Address) {
        lock(&self.state).owner = owner;
    }

    pub fn set_prices(&self, prices: TicketPrices) {
        lock(&self.state).prices = prices;
    }

    pub fn prices(&self) -> TicketPrices {
        lock(&self.state).prices
    }

    pub fn add_round(&self, round: RoundRecord) {
        lock(&self.state).rounds.push(round);
    }

    pub fn rounds(&self) -> Vec<RoundRecord> {
        lock(&self.state).rounds.clone()
    }

    /// Adds a minted ticket and counts it as sold in its round.
    pub fn add_ticket(&self, ticket: FakeTicket) {
        let mut state = lock(&self.state);
        if let Some(round) = state.round_mut(ticket.round_id) {
            round.total_sold += 1;
        }
        state.tickets.push(ticket);
    }

    pub fn ticket_count(&self) -> usize {
        lock(&self.state).tickets.len()
    }

    pub fn set_winning_numbers(&self, round_id: u64, numbers: Vec<u8>) {
        lock(&self.state).winning_numbers.insert(round_id, numbers);
    }

    pub fn set_token_balance(&self, holder: Address, amount: U256) {
        lock(&self.state).token_balances.insert(holder, amount);
    }

    /// Every read of `C` reverts.
    pub fn fail_function<C: SolCall>(&self) {
        lock(&self.state).failing_functions.insert(C::SELECTOR);
    }

    pub fn fail_round(&self, round_id: u64) {
        lock(&self.state).failing_rounds.insert(round_id);
    }

    /// Every per-token detail read for `token_id` reverts.
    pub fn fail_token_reads(&self, token_id: u64) {
        lock(&self.state).failing_tokens.insert(token_id);
    }

    pub fn set_fail_batches(&self, fail: bool) {
        lock(&self.state).fail_batches = fail;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        lock(&self.state).read_delay = Some(delay);
    }

    pub fn batch_count(&self) -> usize {
        lock(&self.state).batch_count
    }

    fn apply(&self, tx: &TransactionRequest) {
        lock(&self.state).apply(&self.contracts, tx);
    }
}

impl ContractReader for FakeLotteryChain {
    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<CallOutcome>> {
        let delay = {
            let mut state = lock(&self.state);
            state.batch_count += 1;
            if state.fail_batches {
                return Err(Error::Rpc {
                    code: -32_000,
                    message: "batch rejected".to_string(),
                });
            }
            state.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = lock(&self.state);
        Ok(calls
            .iter()
            .map(|call| match state.answer(&self.contracts, call) {
                Some(data) => CallOutcome::Success(data),
                None => CallOutcome::Failure("execution reverted".to_string()),
            })
            .collect())
    }
}

#[derive(Default)]
struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    chain: Option<FakeLotteryChain>,
    sent: Vec<TransactionRequest>,
    receipts: HashMap<TxHash, bool>,
    rejected: HashSet<Selector>,
    reverted: HashSet<Selector>,
    receipts_pending: bool,
    receipts_unavailable: bool,
    nonce: u64,
}

/// Signing wallet that records transactions and, when linked to a
/// [`FakeLotteryChain`], applies them to it.
#[derive(Clone)]
pub struct FakeWallet {
    state: Arc<Mutex<WalletState>>,
}

impl FakeWallet {
    pub fn new(address: Address, chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(WalletState {
                accounts: vec![address],
                chain_id,
                ..WalletState::default()
            })),
        }
    }

    pub fn without_accounts(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(WalletState {
                chain_id,
                ..WalletState::default()
            })),
        }
    }

    pub fn with_chain(self, chain: FakeLotteryChain) -> Self {
        lock(&self.state).chain = Some(chain);
        self
    }

    /// Transactions the wallet accepted, in order.
    pub fn sent(&self) -> Vec<TransactionRequest> {
        lock(&self.state).sent.clone()
    }

    /// The user declines transactions calling `C`.
    pub fn reject_function<C: SolCall>(&self) {
        lock(&self.state).rejected.insert(C::SELECTOR);
    }

    /// Transactions calling `C` are mined but revert.
    pub fn revert_function<C: SolCall>(&self) {
        lock(&self.state).reverted.insert(C::SELECTOR);
    }

    pub fn set_receipts_pending(&self, pending: bool) {
        lock(&self.state).receipts_pending = pending;
    }

    pub fn set_receipts_unavailable(&self, unavailable: bool) {
        lock(&self.state).receipts_unavailable = unavailable;
    }
}

impl Wallet for FakeWallet {
    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(lock(&self.state).accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(lock(&self.state).chain_id)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let mut state = lock(&self.state);
        let sel = selector_of(&tx.data).unwrap_or_default();
        if state.rejected.contains(&sel) {
            return Err(Error::Rpc {
                code: 4001,
                message: "User rejected the request.".to_string(),
            });
        }
        state.nonce += 1;
        let hash: TxHash = keccak256(state.nonce.to_be_bytes());
        let success = !state.reverted.contains(&sel);
        if success && let Some(chain) = &state.chain {
            chain.apply(&tx);
        }
        state.receipts.insert(hash, success);
        state.sent.push(tx);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        let state = lock(&self.state);
        if state.receipts_unavailable {
            return Err(Error::Rpc {
                code: -32_601,
                message: "method not found".to_string(),
            });
        }
        if state.receipts_pending {
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).map(|success| TxReceipt {
            hash,
            success: *success,
            block_number: Some(1),
        }))
    }
}

/// A fake chain, a wallet for [`ALICE`] linked to it, and a matching
/// config with fast timings.
pub struct TestContext {
    pub chain: FakeLotteryChain,
    pub wallet: FakeWallet,
    pub config: ClientConfig,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let contracts = arb_contracts();
        let chain = FakeLotteryChain::new(contracts);
        let wallet = FakeWallet::new(ALICE, LOCAL_CHAIN_ID).with_chain(chain.clone());
        let config = ClientConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            wallet_url: "http://127.0.0.1:8545".to_string(),
            chain_id: LOCAL_CHAIN_ID,
            contracts,
            // nothing listens here, so metadata always falls back
            metadata_base_url: "http://127.0.0.1:9/data".to_string(),
            timings: fast_timings(),
        };
        Self {
            chain,
            wallet,
            config,
        }
    }

    pub async fn connect(&self) -> Result<LotteryService<FakeLotteryChain, FakeWallet>> {
        LotteryService::connect(&self.config, self.chain.clone(), self.wallet.clone()).await
    }
}
