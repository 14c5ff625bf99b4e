use chrono::{
    TimeZone,
    Utc,
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
    NewDeployment,
};
use lottery_abi::{
    Address,
    U256,
};
use lottery_client::{
    ClientConfig,
    LotteryService,
    LotteryState,
    rpc::JsonRpcClient,
    submitter::Submitted,
    types::{
        RoundFilter,
        TOKEN_DECIMALS,
        TicketPrices,
        TicketType,
        format_compact,
        format_units,
        parse_units,
    },
};
use std::{
    path::Path,
    time::Duration,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

type Service = LotteryService<JsonRpcClient, JsonRpcClient>;

#[derive(Parser, Debug)]
#[command(
    name = "lottery",
    version,
    about = "Browse and play the on-chain lottery from the terminal",
    long_about = None,
    group(
        ArgGroup::new("network")
            .args(["sepolia", "local"])
            .required(true)
    )
)]
struct Args {
    /// Use the Sepolia deployment
    #[arg(long)]
    sepolia: bool,

    /// Use the local node deployment
    #[arg(long)]
    local: bool,

    /// Override the RPC URL used for reads
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the wallet endpoint used for signing
    #[arg(long)]
    wallet_url: Option<String>,

    /// Override the ticket metadata base URL
    #[arg(long)]
    metadata_url: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Session, prices and account overview
    Status,
    /// List rounds
    Rounds {
        #[arg(long, default_value = "all")]
        filter: RoundFilter,
    },
    /// List the connected account's tickets
    Tickets,
    /// Most recently minted tickets with their metadata
    Recent {
        #[arg(long, default_value_t = 6)]
        limit: usize,
    },
    /// Show the metadata of one ticket
    Metadata { token_id: u64 },
    /// Buy a ticket (full, half or quarter)
    Mint {
        round_id: u64,
        ticket_type: TicketType,
    },
    /// Claim the reward of a winning ticket
    Claim { token_id: u64 },
    /// Create a round (owner only)
    CreateRound { max_tickets: u64, draw_time: u64 },
    /// Close a round and request its draw (owner only)
    CloseDraw { round_id: u64 },
    /// Set the three ticket prices in USDT (owner only)
    SetPrices {
        #[arg(value_parser = parse_amount)]
        full: U256,
        #[arg(value_parser = parse_amount)]
        half: U256,
        #[arg(value_parser = parse_amount)]
        quarter: U256,
    },
    /// Withdraw the manager's token balance (owner only)
    Withdraw,
    /// Follow state changes and notifications until interrupted
    Watch {
        #[arg(long, default_value_t = 15)]
        refresh_secs: u64,
    },
    /// Store the contract addresses of a deployment
    RecordDeployment {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        manager: Address,
        #[arg(long)]
        nft: Address,
    },
}

fn parse_amount(raw: &str) -> std::result::Result<U256, String> {
    parse_units(raw, TOKEN_DECIMALS).map_err(|e| e.to_string())
}

fn init_tracing(log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(log_file) = log_file else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| eyre!(e))?;
        return Ok(None);
    };
    let expanded = shellexpand::tilde(log_file).into_owned();
    let path = Path::new(&expanded);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("--log-file must name a file"))?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| eyre!(e))?;
    Ok(Some(guard))
}

fn usdt(amount: U256) -> String {
    format_units(amount, TOKEN_DECIMALS)
}

fn draw_time_label(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn print_status(state: &LotteryState) {
    let session = &state.session;
    match session.address {
        Some(address) => println!("Account:  {}", address.to_checksum(None)),
        None => println!("Account:  not connected"),
    }
    println!(
        "Network:  chain {}{}",
        session.chain_id.map(|id| id.to_string()).unwrap_or_default(),
        if session.correct_network { "" } else { " (wrong network)" }
    );
    println!("Owner:    {}", if session.owner { "yes" } else { "no" });
    println!(
        "Prices:   full {} / half {} / quarter {} USDT",
        usdt(state.prices.full),
        usdt(state.prices.half),
        usdt(state.prices.quarter)
    );
    if let Some(stats) = state.nft_stats {
        println!(
            "Tickets:  {} held, {} minted in total",
            stats.balance, stats.total_minted
        );
    }
    if let Some(balance) = state.contract_balance {
        println!("Contract: {} USDT available to withdraw", usdt(balance));
    }
    let active = state.rounds.iter().filter(|r| r.is_active).count();
    println!("Rounds:   {} total, {} active", state.rounds.len(), active);
}

fn print_rounds(service: &Service, filter: RoundFilter) {
    let rounds = service.rounds(filter);
    if rounds.is_empty() {
        println!("No rounds");
        return;
    }
    let now = now();
    for round in rounds {
        println!(
            "#{:<4} {:<15} sold {}/{} ({:.1}%)  pool {}  draw {}",
            round.id,
            round.status(now).to_string(),
            round.total_sold,
            round.max_tickets,
            round.progress_percent(),
            format_compact(round.total_pool, TOKEN_DECIMALS),
            draw_time_label(round.draw_time),
        );
        if let Some(numbers) = &round.winning_numbers {
            println!("       winning numbers {numbers:?}");
        }
    }
}

fn print_tickets(service: &Service) {
    let tickets = service.tickets();
    if tickets.is_empty() {
        println!("No tickets");
        return;
    }
    for ticket in tickets {
        let outcome = if ticket.is_winning {
            format!("won {} USDT", usdt(ticket.reward))
        } else {
            "no win".to_string()
        };
        println!(
            "ticket #{:<5} round {:<4} {:<8} {:?}  {}",
            ticket.token_id,
            ticket.round_id,
            ticket.ticket_type.label(),
            ticket.numbers,
            outcome
        );
    }
}

async fn finish(service: &Service, submitted: Submitted) {
    for hash in &submitted.hashes {
        println!("sent {hash}");
    }
    service.confirm(&submitted).await;
}

async fn watch(service: &Service) -> Result<()> {
    let mut state_rx = service.subscribe();
    let mut notes = service.notifications();
    print_status(&state_rx.borrow_and_update());
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                if !state.session.loading {
                    println!();
                    print_status(&state);
                }
            }
            note = notes.recv() => {
                match note {
                    Ok(note) => println!("[{:?}] {note}", note.level),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "notification stream lagged");
                    }
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, exiting");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_file.as_deref())?;
    deployments::ensure_structure().map_err(|e| eyre!(e))?;

    let env = if args.local {
        DeploymentEnv::Local
    } else {
        DeploymentEnv::Sepolia
    };
    let store = DeploymentStore::new(env).map_err(|e| eyre!(e))?;

    if let Command::RecordDeployment {
        token,
        manager,
        nft,
    } = &args.command
    {
        let record = deployments::record_deployment(
            &store,
            env,
            NewDeployment {
                token_address: *token,
                manager_address: *manager,
                nft_address: *nft,
                network_url: args.rpc_url.clone(),
                wallet_url: args.wallet_url.clone(),
                metadata_base_url: args.metadata_url.clone(),
            },
        )
        .map_err(|e| eyre!(e))?;
        println!(
            "Recorded {env} deployment at {}: manager {}",
            store.path().display(),
            record.manager_address.to_checksum(None)
        );
        return Ok(());
    }

    let record = store
        .load()
        .map_err(|e| eyre!(e))?
        .ok_or_else(|| {
            eyre!("No {env} deployment recorded; run `lottery record-deployment` first")
        })?;
    let mut config = ClientConfig::from_deployment(env, &record)
        .with_rpc_url(args.rpc_url.clone())
        .with_wallet_url(args.wallet_url.clone())
        .with_metadata_base_url(args.metadata_url.clone());
    if let Command::Watch { refresh_secs } = &args.command {
        config = config.with_refresh_interval(Some(Duration::from_secs(*refresh_secs)));
    }
    tracing::info!(rpc = %config.rpc_url, chain_id = config.chain_id, "starting lottery client");

    let service = LotteryService::connect_http(&config)
        .await
        .wrap_err("failed to connect to the wallet")?;

    let outcome = run(&service, args.command).await;
    service.disconnect();
    outcome
}

async fn run(service: &Service, command: Command) -> Result<()> {
    match command {
        Command::Status => print_status(&service.state()),
        Command::Rounds { filter } => print_rounds(service, filter),
        Command::Tickets => print_tickets(service),
        Command::Recent { limit } => {
            for (ticket, metadata) in service.recent_tickets(limit).await {
                println!(
                    "ticket #{:<5} round {:<4} {}",
                    ticket.token_id, ticket.round_id, metadata.image
                );
            }
        }
        Command::Metadata { token_id } => {
            let metadata = service.ticket_metadata(token_id).await;
            println!("image:   {}", metadata.image);
            if let Some(name) = &metadata.name {
                println!("name:    {name}");
            }
            if let Some(edition) = metadata.edition {
                println!("edition: {edition}");
            }
            if let Some(numbers) = &metadata.numbers {
                println!("numbers: {numbers:?}");
            }
            if let Some(error) = &metadata.error {
                println!("(fallback image used: {error})");
            }
        }
        Command::Mint {
            round_id,
            ticket_type,
        } => {
            let submitted = service.mint_ticket(round_id, ticket_type).await?;
            finish(service, submitted).await;
            print_tickets(service);
        }
        Command::Claim { token_id } => {
            let submitted = service.claim_reward(token_id).await?;
            finish(service, submitted).await;
        }
        Command::CreateRound {
            max_tickets,
            draw_time,
        } => {
            let submitted = service.create_round(max_tickets, draw_time).await?;
            finish(service, submitted).await;
            print_rounds(service, RoundFilter::Active);
        }
        Command::CloseDraw { round_id } => {
            let round = service
                .rounds(RoundFilter::All)
                .into_iter()
                .find(|r| r.id == round_id)
                .ok_or_else(|| eyre!("round {round_id} not found"))?;
            if !round.can_close_and_draw(now()) {
                return Err(eyre!(
                    "round {round_id} is {} and cannot be drawn",
                    round.status(now())
                ));
            }
            let submitted = service.close_and_draw(round_id).await?;
            finish(service, submitted).await;
        }
        Command::SetPrices {
            full,
            half,
            quarter,
        } => {
            let submitted = service
                .set_prices(TicketPrices {
                    full,
                    half,
                    quarter,
                })
                .await?;
            finish(service, submitted).await;
        }
        Command::Withdraw => {
            let submitted = service.withdraw().await?;
            finish(service, submitted).await;
        }
        Command::Watch { .. } => watch(service).await?,
        Command::RecordDeployment { .. } => {}
    }
    for note in service.recent_notifications() {
        tracing::debug!(title = %note.title, "session notification");
    }
    Ok(())
}
