//! The aggregation service: one connected wallet session, its state, and
//! the background worker that keeps that state fresh.
//!
//! State lives in a single [`watch`] channel. Each load writes only its
//! own slice, and only if the session it started under is still the
//! current one, so a load that finishes after [`LotteryService::disconnect`]
//! is dropped instead of repopulating cleared state.

use crate::{
    Result,
    aggregator::Aggregator,
    chain::{
        ContractReader,
        Wallet,
    },
    config::{
        ClientConfig,
        ServiceTimings,
    },
    metadata::{
        MetadataClient,
        TicketMetadata,
    },
    notify::{
        Notification,
        Notifier,
    },
    resolver::Resolver,
    rpc::JsonRpcClient,
    session::Session,
    submitter::{
        Confirmation,
        Submitted,
        Submitter,
        await_confirmation,
    },
    types::{
        NftStats,
        Round,
        RoundFilter,
        Ticket,
        TicketPrices,
        TicketType,
    },
};
use futures::future::join_all;
use lottery_abi::{
    Address,
    TxHash,
    U256,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        broadcast,
        mpsc,
        oneshot,
        watch,
    },
    task::{
        JoinHandle,
        JoinSet,
    },
    time::{
        self,
        Instant,
        Interval,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

/// Which state slices a reload refreshes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReloadScope {
    /// Ticket prices and the owner flag.
    pub prices: bool,
    pub rounds: bool,
    /// Tickets and NFT stats.
    pub tickets: bool,
    pub contract_balance: bool,
}

impl ReloadScope {
    pub const ALL: Self = Self {
        prices: true,
        rounds: true,
        tickets: true,
        contract_balance: true,
    };
    pub const PRICES: Self = Self {
        prices: true,
        ..Self::NONE
    };
    pub const ROUNDS: Self = Self {
        rounds: true,
        ..Self::NONE
    };
    pub const TICKETS: Self = Self {
        tickets: true,
        ..Self::NONE
    };
    pub const ROUNDS_AND_TICKETS: Self = Self {
        rounds: true,
        tickets: true,
        ..Self::NONE
    };
    pub const CONTRACT_BALANCE: Self = Self {
        contract_balance: true,
        ..Self::NONE
    };
    const NONE: Self = Self {
        prices: false,
        rounds: false,
        tickets: false,
        contract_balance: false,
    };
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LotteryState {
    pub session: Session,
    pub rounds: Vec<Round>,
    pub prices: TicketPrices,
    pub tickets: Vec<Ticket>,
    pub nft_stats: Option<NftStats>,
    pub contract_balance: Option<U256>,
}

pub enum WorkerCommand {
    Reload(ReloadScope),
    /// Reload once `hashes` are mined, or after `fallback` when the wallet
    /// cannot report receipts. `done` fires after that reload.
    ReloadAfter {
        hashes: Vec<TxHash>,
        fallback: Duration,
        scope: ReloadScope,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Identifies the session a load was started for.
#[derive(Clone, Copy, Debug)]
struct LoadTicket {
    generation: u64,
    address: Address,
}

struct Shared<R, W> {
    aggregator: Aggregator<R>,
    resolver: Resolver<R>,
    submitter: Submitter<W>,
    wallet: Arc<W>,
    metadata: MetadataClient,
    notifier: Notifier,
    state: watch::Sender<LotteryState>,
    generation: AtomicU64,
    in_flight: AtomicUsize,
    timings: ServiceTimings,
}

/// Keeps `session.loading` set while any load or submission runs.
struct LoadingGuard<'a, R, W> {
    shared: &'a Shared<R, W>,
}

impl<'a, R, W> LoadingGuard<'a, R, W> {
    fn new(shared: &'a Shared<R, W>) -> Self {
        if shared.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            shared.state.send_if_modified(|s| {
                let changed = !s.session.loading;
                s.session.loading = true;
                changed
            });
        }
        Self { shared }
    }
}

impl<R, W> Drop for LoadingGuard<'_, R, W> {
    fn drop(&mut self) {
        if self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.state.send_if_modified(|s| {
                let changed = s.session.loading;
                s.session.loading = false;
                changed
            });
        }
    }
}

impl<R, W> Shared<R, W>
where
    R: ContractReader + 'static,
    W: Wallet + 'static,
{
    fn begin(&self) -> Option<LoadTicket> {
        let address = self.state.borrow().session.connected_address()?;
        Some(LoadTicket {
            generation: self.generation.load(Ordering::SeqCst),
            address,
        })
    }

    /// Applies `apply` only if `ticket`'s session is still current.
    fn commit(&self, ticket: &LoadTicket, apply: impl FnOnce(&mut LotteryState)) -> bool {
        self.state.send_if_modified(|state| {
            let current = self.generation.load(Ordering::SeqCst) == ticket.generation
                && state.session.connected_address() == Some(ticket.address);
            if current {
                apply(state);
            } else {
                debug!(generation = ticket.generation, "discarding stale load result");
            }
            current
        })
    }

    async fn reload(&self, scope: ReloadScope) {
        let Some(ticket) = self.begin() else {
            debug!("reload skipped, no session");
            return;
        };
        let _loading = LoadingGuard::new(self);

        let overview = async {
            if !scope.prices {
                return;
            }
            let (prices, owner) =
                tokio::join!(self.aggregator.load_prices(), self.aggregator.load_owner());
            self.commit(&ticket, |s| {
                if let Some(prices) = prices {
                    s.prices = prices;
                }
                if let Some(owner) = owner {
                    s.session.owner = s.session.is_owner(owner);
                }
            });
        };
        let rounds = async {
            if scope.rounds {
                Some(self.aggregator.load_rounds().await)
            } else {
                None
            }
        };
        let ((), rounds) = tokio::join!(overview, rounds);

        let mut resolve_tickets = scope.tickets;
        if let Some(rounds) = rounds {
            let mut changed = false;
            self.commit(&ticket, |s| {
                changed = s.rounds != rounds;
                s.rounds = rounds;
            });
            resolve_tickets |= changed;
        }

        if resolve_tickets {
            let rounds = self.state.borrow().rounds.clone();
            let (tickets, stats) = tokio::join!(
                self.resolver.resolve(Some(ticket.address), &rounds),
                self.aggregator.load_nft_stats(ticket.address),
            );
            self.commit(&ticket, |s| {
                s.tickets = tickets;
                if stats.is_some() {
                    s.nft_stats = stats;
                }
            });
        }

        let is_owner = self.state.borrow().session.owner;
        if scope.contract_balance && is_owner {
            if let Some(balance) = self.aggregator.load_contract_balance().await {
                self.commit(&ticket, |s| s.contract_balance = Some(balance));
            }
        }
    }

    /// Waits for every transaction, falling back to a fixed delay when
    /// receipts are unavailable. Reverted transactions are reported.
    async fn settle(&self, hashes: Vec<TxHash>, fallback: Duration) {
        for hash in hashes {
            match await_confirmation(&*self.wallet, hash, &self.timings).await {
                Confirmation::Confirmed => {}
                Confirmation::Reverted => self.notifier.error(
                    "Transaction Failed",
                    format!("Transaction {hash} was reverted"),
                ),
                Confirmation::TimedOut => {
                    warn!(%hash, "transaction not confirmed in time");
                }
                Confirmation::Unavailable => {
                    time::sleep(fallback).await;
                    return;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn reload_worker<R, W>(
    shared: Arc<Shared<R, W>>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
) where
    R: ContractReader + 'static,
    W: Wallet + 'static,
{
    let mut ticker = shared.timings.refresh_interval.map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    let mut confirmations: JoinSet<(ReloadScope, oneshot::Sender<()>)> = JoinSet::new();

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {
                shared.reload(ReloadScope::ALL).await;
            }
            Some(done) = confirmations.join_next(), if !confirmations.is_empty() => {
                match done {
                    Ok((scope, done)) => {
                        shared.reload(scope).await;
                        let _ = done.send(());
                    }
                    Err(err) => warn!(%err, "confirmation task failed"),
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    WorkerCommand::Reload(scope) => shared.reload(scope).await,
                    WorkerCommand::ReloadAfter { hashes, fallback, scope, done } => {
                        let shared = Arc::clone(&shared);
                        confirmations.spawn(async move {
                            shared.settle(hashes, fallback).await;
                            (scope, done)
                        });
                    }
                    WorkerCommand::Shutdown => break,
                }
            }
        }
    }
    debug!("reload worker stopped");
}

pub struct LotteryService<R, W> {
    shared: Arc<Shared<R, W>>,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Worker reloads still owed for submissions, keyed by first hash.
    scheduled: Mutex<HashMap<TxHash, oneshot::Receiver<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl LotteryService<JsonRpcClient, JsonRpcClient> {
    /// Connects over HTTP JSON-RPC using the configured endpoints.
    pub async fn connect_http(config: &ClientConfig) -> Result<Self> {
        let reader = JsonRpcClient::new(config.rpc_url.clone())?;
        let wallet = JsonRpcClient::new(config.wallet_url.clone())?;
        Self::connect(config, reader, wallet).await
    }
}

impl<R, W> LotteryService<R, W>
where
    R: ContractReader + 'static,
    W: Wallet + 'static,
{
    /// Opens the wallet session, loads everything once and starts the
    /// reload worker.
    pub async fn connect(config: &ClientConfig, reader: R, wallet: W) -> Result<Self> {
        let reader = Arc::new(reader);
        let wallet = Arc::new(wallet);
        let notifier = Notifier::new();
        let session = Session::open(&*wallet, config.chain_id).await?;
        let (state, _) = watch::channel(LotteryState {
            session,
            ..LotteryState::default()
        });

        let shared = Arc::new(Shared {
            aggregator: Aggregator::new(
                Arc::clone(&reader),
                config.contracts,
                notifier.clone(),
            ),
            resolver: Resolver::new(reader, config.contracts, notifier.clone()),
            submitter: Submitter::new(
                Arc::clone(&wallet),
                config.contracts,
                notifier.clone(),
                config.chain_id,
                config.timings,
            ),
            wallet,
            metadata: MetadataClient::new(config.metadata_base_url.clone())?,
            notifier,
            state,
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            timings: config.timings,
        });

        shared.reload(ReloadScope::ALL).await;

        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(reload_worker(Arc::clone(&shared), cmd_rx));
        info!("lottery service connected");
        Ok(Self {
            shared,
            commands,
            worker: Mutex::new(Some(worker)),
            scheduled: Mutex::new(HashMap::new()),
        })
    }

    /// Ends the session. Clears session-bound state, stops the worker and
    /// makes every in-flight load a no-op.
    pub fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.state.send_modify(|s| {
            s.session = Session::default();
            s.rounds.clear();
            s.tickets.clear();
            s.nft_stats = None;
            s.contract_balance = None;
        });
        let _ = self.commands.send(WorkerCommand::Shutdown);
        self.stop_worker();
        info!("lottery service disconnected");
    }

    fn stop_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LotteryState> {
        self.shared.state.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifier.subscribe()
    }

    pub fn recent_notifications(&self) -> Vec<Notification> {
        self.shared.notifier.recent()
    }

    pub fn state(&self) -> LotteryState {
        self.shared.state.borrow().clone()
    }

    pub fn session(&self) -> Session {
        self.shared.state.borrow().session.clone()
    }

    pub fn rounds(&self, filter: RoundFilter) -> Vec<Round> {
        self.shared
            .state
            .borrow()
            .rounds
            .iter()
            .filter(|r| r.matches(filter))
            .cloned()
            .collect()
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.shared.state.borrow().tickets.clone()
    }

    /// Reloads `scope` now and waits for it.
    pub async fn reload(&self, scope: ReloadScope) {
        self.shared.reload(scope).await;
    }

    /// Queues a reload on the worker.
    pub fn request_reload(&self, scope: ReloadScope) {
        let _ = self.commands.send(WorkerCommand::Reload(scope));
    }

    pub async fn ticket_metadata(&self, token_id: u64) -> TicketMetadata {
        self.shared.metadata.fetch(token_id).await
    }

    /// Newest visible tickets first, each with its metadata.
    pub async fn recent_tickets(&self, limit: usize) -> Vec<(Ticket, TicketMetadata)> {
        let mut tickets = self.tickets();
        tickets.sort_by(|a, b| b.token_id.cmp(&a.token_id));
        tickets.truncate(limit);
        let metadata = join_all(
            tickets
                .iter()
                .map(|t| self.shared.metadata.fetch(t.token_id)),
        )
        .await;
        tickets.into_iter().zip(metadata).collect()
    }

    /// Waits until `submitted` is mined and what it touched is reloaded.
    ///
    /// Writes made through this service already queue that work on the
    /// worker, so this only waits for it. Submissions the worker never saw
    /// are settled and reloaded here.
    pub async fn confirm(&self, submitted: &Submitted) {
        let scheduled = submitted
            .hashes
            .first()
            .and_then(|hash| lock(&self.scheduled).remove(hash));
        if let Some(reloaded) = scheduled {
            if reloaded.await.is_err() {
                debug!("reload worker stopped before confirming");
            }
            return;
        }
        let fallback = submitted.action.settle_delay(&self.shared.timings);
        self.shared
            .settle(submitted.hashes.clone(), fallback)
            .await;
        self.shared.reload(submitted.action.scope()).await;
    }

    fn schedule_reload(&self, submitted: &Submitted) {
        let (done, reloaded) = oneshot::channel();
        let command = WorkerCommand::ReloadAfter {
            hashes: submitted.hashes.clone(),
            fallback: submitted.action.settle_delay(&self.shared.timings),
            scope: submitted.action.scope(),
            done,
        };
        if self.commands.send(command).is_err() {
            warn!("reload worker is not running");
            return;
        }
        let mut scheduled = lock(&self.scheduled);
        // drop entries nobody waited for
        scheduled.retain(|_, rx| matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        if let Some(hash) = submitted.hashes.first() {
            scheduled.insert(*hash, reloaded);
        }
    }

    fn snapshot(&self) -> (Session, TicketPrices) {
        let state = self.shared.state.borrow();
        (state.session.clone(), state.prices)
    }

    pub async fn mint_ticket(
        &self,
        round_id: u64,
        ticket_type: TicketType,
    ) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, prices) = self.snapshot();
        let submitted = self
            .shared
            .submitter
            .mint_ticket(&session, &prices, round_id, ticket_type)
            .await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }

    pub async fn claim_reward(&self, token_id: u64) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, _) = self.snapshot();
        let submitted = self
            .shared
            .submitter
            .claim_reward(&session, token_id)
            .await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }

    pub async fn create_round(&self, max_tickets: u64, draw_time: u64) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, _) = self.snapshot();
        let submitted = self
            .shared
            .submitter
            .create_round(&session, max_tickets, draw_time)
            .await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }

    pub async fn close_and_draw(&self, round_id: u64) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, _) = self.snapshot();
        let submitted = self
            .shared
            .submitter
            .close_and_draw(&session, round_id)
            .await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }

    pub async fn set_prices(&self, prices: TicketPrices) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, _) = self.snapshot();
        let submitted = self.shared.submitter.set_prices(&session, prices).await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }

    pub async fn withdraw(&self) -> Result<Submitted> {
        let _loading = LoadingGuard::new(&self.shared);
        let (session, _) = self.snapshot();
        let submitted = self.shared.submitter.withdraw(&session).await?;
        self.schedule_reload(&submitted);
        Ok(submitted)
    }
}

impl<R, W> Drop for LotteryService<R, W> {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let handle = match self.worker.get_mut() {
            Ok(worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
