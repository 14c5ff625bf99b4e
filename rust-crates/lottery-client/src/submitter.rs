//! Signed writes to the lottery contracts.
//!
//! Each action checks the session first, sends its transaction(s) through
//! the wallet and reports the hashes. Reloading afterwards is the caller's
//! job; see [`Action::scope`].

use crate::{
    Error,
    Result,
    chain::{
        ContractCall,
        TransactionRequest,
        Wallet,
    },
    config::ServiceTimings,
    contracts::LotteryContracts,
    notify::Notifier,
    service::ReloadScope,
    session::Session,
    types::{
        TOKEN_DECIMALS,
        TicketPrices,
        TicketType,
        format_units,
    },
};
use lottery_abi::{
    Address,
    TxHash,
    U256,
    lottery_manager::{
        self,
        claimRewardCall,
        closeRoundAndDrawCall,
        createRoundCall,
        setPricesCall,
        withdrawUSDTCall,
    },
    mock_usdt::approveCall,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    Instant,
    sleep,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Pause between approval and mint when the wallet cannot report receipts.
const APPROVAL_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    MintTicket,
    ClaimReward,
    CreateRound,
    CloseAndDraw,
    SetPrices,
    Withdraw,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::MintTicket => "mint ticket",
            Action::ClaimReward => "claim reward",
            Action::CreateRound => "create rounds",
            Action::CloseAndDraw => "close and draw rounds",
            Action::SetPrices => "set prices",
            Action::Withdraw => "withdraw funds",
        }
    }

    pub fn owner_only(self) -> bool {
        !matches!(self, Action::MintTicket | Action::ClaimReward)
    }

    /// State slices that change once this action is mined.
    pub fn scope(self) -> ReloadScope {
        match self {
            Action::MintTicket | Action::CloseAndDraw => ReloadScope::ROUNDS_AND_TICKETS,
            Action::ClaimReward => ReloadScope::TICKETS,
            Action::CreateRound => ReloadScope::ROUNDS,
            Action::SetPrices => ReloadScope::PRICES,
            Action::Withdraw => ReloadScope::CONTRACT_BALANCE,
        }
    }

    pub fn settle_delay(self, timings: &ServiceTimings) -> Duration {
        match self {
            Action::CloseAndDraw => timings.draw_settle_delay,
            _ => timings.settle_delay,
        }
    }

    fn failure_title(self) -> &'static str {
        match self {
            Action::MintTicket => "Purchase Failed",
            Action::ClaimReward => "Claim Failed",
            Action::CreateRound => "Creation Failed",
            Action::CloseAndDraw => "Draw Failed",
            Action::SetPrices => "Update Failed",
            Action::Withdraw => "Withdrawal Failed",
        }
    }
}

/// Transactions sent for one successful action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub action: Action,
    pub hashes: Vec<TxHash>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Reverted,
    TimedOut,
    /// The wallet cannot report receipts.
    Unavailable,
}

/// Polls for the receipt of `hash` until it is mined or the timeout
/// passes.
pub async fn await_confirmation<W: Wallet>(
    wallet: &W,
    hash: TxHash,
    timings: &ServiceTimings,
) -> Confirmation {
    let deadline = Instant::now() + timings.confirmation_timeout;
    loop {
        match wallet.transaction_receipt(hash).await {
            Ok(Some(receipt)) if receipt.success => return Confirmation::Confirmed,
            Ok(Some(_)) => return Confirmation::Reverted,
            Ok(None) => {}
            Err(e) => {
                debug!(%hash, error = %e, "receipts unavailable");
                return Confirmation::Unavailable;
            }
        }
        if Instant::now() >= deadline {
            return Confirmation::TimedOut;
        }
        sleep(timings.receipt_poll_interval).await;
    }
}

pub struct Submitter<W> {
    wallet: Arc<W>,
    contracts: LotteryContracts,
    notifier: Notifier,
    chain_id: u64,
    timings: ServiceTimings,
}

impl<W> Clone for Submitter<W> {
    fn clone(&self) -> Self {
        Self {
            wallet: Arc::clone(&self.wallet),
            contracts: self.contracts,
            notifier: self.notifier.clone(),
            chain_id: self.chain_id,
            timings: self.timings,
        }
    }
}

impl<W: Wallet> Submitter<W> {
    pub fn new(
        wallet: Arc<W>,
        contracts: LotteryContracts,
        notifier: Notifier,
        chain_id: u64,
        timings: ServiceTimings,
    ) -> Self {
        Self {
            wallet,
            contracts,
            notifier,
            chain_id,
            timings,
        }
    }

    fn authorize(&self, session: &Session, action: Action) -> Result<Address> {
        let checked = if action.owner_only() {
            session.require_owner(self.chain_id, action.label())
        } else {
            session.require_signer(self.chain_id)
        };
        checked.inspect_err(|e| {
            let title = match e {
                Error::NotConnected => "Wallet Required",
                Error::WrongNetwork { .. } => "Wrong Network",
                _ => "Access Denied",
            };
            warn!(action = action.label(), error = %e, "action rejected");
            self.notifier.error(title, e.to_string());
        })
    }

    async fn send(
        &self,
        from: Address,
        action: Action,
        call: ContractCall,
    ) -> Result<TxHash> {
        let tx = TransactionRequest {
            from,
            to: call.to,
            data: call.calldata.clone(),
        };
        match self.wallet.send_transaction(tx).await {
            Ok(hash) => {
                info!(action = action.label(), function = call.name(), %hash, "transaction sent");
                Ok(hash)
            }
            Err(e) => Err(self.fail(action, e.to_string())),
        }
    }

    fn fail(&self, action: Action, message: String) -> Error {
        error!(action = action.label(), %message, "transaction failed");
        self.notifier.error(action.failure_title(), message.clone());
        Error::Submission {
            action: action.label(),
            message,
        }
    }

    async fn single(
        &self,
        session: &Session,
        action: Action,
        call: ContractCall,
        title: &str,
        message: String,
    ) -> Result<Submitted> {
        let from = self.authorize(session, action)?;
        let hash = self.send(from, action, call).await?;
        self.notifier.success(title, message);
        Ok(Submitted {
            action,
            hashes: vec![hash],
        })
    }

    /// Approves exactly the tier price for the manager, then mints.
    pub async fn mint_ticket(
        &self,
        session: &Session,
        prices: &TicketPrices,
        round_id: u64,
        ticket_type: TicketType,
    ) -> Result<Submitted> {
        let action = Action::MintTicket;
        let from = self.authorize(session, action)?;
        let price = prices.price_of(ticket_type);

        let approve_call = self.contracts.token_call(approveCall {
            spender: self.contracts.manager,
            amount: price,
        });
        let approval = self.send(from, action, approve_call).await?;
        self.notifier
            .info("Approval Sent", "USDT approval transaction sent");
        match await_confirmation(&*self.wallet, approval, &self.timings).await {
            Confirmation::Confirmed => {}
            Confirmation::Reverted => {
                return Err(self.fail(action, "USDT approval was reverted".to_string()));
            }
            Confirmation::TimedOut => {
                warn!(%approval, "approval not confirmed in time, minting anyway");
            }
            Confirmation::Unavailable => sleep(APPROVAL_SETTLE_DELAY).await,
        }

        let mint_call = self.contracts.manager_call(lottery_manager::mint_ticket(
            round_id,
            ticket_type.as_u8(),
        ));
        let mint = self.send(from, action, mint_call).await?;
        self.notifier.success(
            "Ticket Purchased!",
            format!(
                "Successfully purchased {} ticket for round {round_id}",
                ticket_type.label().to_ascii_lowercase()
            ),
        );
        Ok(Submitted {
            action,
            hashes: vec![approval, mint],
        })
    }

    pub async fn claim_reward(&self, session: &Session, token_id: u64) -> Result<Submitted> {
        self.single(
            session,
            Action::ClaimReward,
            self.contracts.manager_call(claimRewardCall {
                tokenId: U256::from(token_id),
            }),
            "Reward Claimed!",
            format!("Successfully sent claim transaction for ticket #{token_id}"),
        )
        .await
    }

    pub async fn create_round(
        &self,
        session: &Session,
        max_tickets: u64,
        draw_time: u64,
    ) -> Result<Submitted> {
        self.single(
            session,
            Action::CreateRound,
            self.contracts.manager_call(createRoundCall {
                maxTickets: U256::from(max_tickets),
                drawTime: U256::from(draw_time),
            }),
            "Round Created!",
            format!(
                "Successfully sent create round transaction with {max_tickets} max tickets"
            ),
        )
        .await
    }

    pub async fn close_and_draw(&self, session: &Session, round_id: u64) -> Result<Submitted> {
        self.single(
            session,
            Action::CloseAndDraw,
            self.contracts.manager_call(closeRoundAndDrawCall {
                roundId: U256::from(round_id),
            }),
            "Round Closed!",
            format!("Round {round_id} closed and draw requested"),
        )
        .await
    }

    pub async fn set_prices(
        &self,
        session: &Session,
        prices: TicketPrices,
    ) -> Result<Submitted> {
        self.single(
            session,
            Action::SetPrices,
            self.contracts.manager_call(setPricesCall {
                fullPrice: prices.full,
                halfPrice: prices.half,
                quarterPrice: prices.quarter,
            }),
            "Prices Updated!",
            format!(
                "New prices: {} / {} / {} USDT",
                format_units(prices.full, TOKEN_DECIMALS),
                format_units(prices.half, TOKEN_DECIMALS),
                format_units(prices.quarter, TOKEN_DECIMALS)
            ),
        )
        .await
    }

    pub async fn withdraw(&self, session: &Session) -> Result<Submitted> {
        self.single(
            session,
            Action::Withdraw,
            self.contracts.manager_call(withdrawUSDTCall {}),
            "Withdrawal Sent!",
            "Contract funds withdrawal transaction sent".to_string(),
        )
        .await
    }
}
