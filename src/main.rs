//! Chiphouse command line
//!
//! Operator and player commands against a persistent ledger. Every command
//! prints its result as JSON.

use chiphouse::{
    audit,
    config::ConfigLoader,
    errors::{ChipResult, EngineError},
    games::{GameRequest, RouletteBet},
    reconciler::{DepositNotice, FileFeed},
    settlement::WagerRequest,
    ChipHouse, ChipHouseFactory,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;

/// Chiphouse ledger CLI
#[derive(Parser)]
#[command(name = "chiphouse")]
#[command(about = "House-banked chip ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the ledger data directory
    #[arg(short, long)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user's balance and stats
    Balance {
        #[arg(short, long)]
        user: u64,
    },

    /// Show the house bankroll
    House,

    /// Place one wager
    Play {
        #[arg(short, long)]
        user: u64,

        /// coinflip, dice, slots, roulette or blackjack
        game: String,

        stake: i64,

        /// heads/tails for coinflip, red/black/0-36 for roulette
        choice: Option<String>,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Claim the daily bonus
    Bonus {
        #[arg(short, long)]
        user: u64,
    },

    /// Most recent ledger entries of a user
    History {
        #[arg(short, long)]
        user: u64,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Richest players
    Leaderboard {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Attribute an external address to a user
    RegisterAddress {
        #[arg(short, long)]
        user: u64,

        address: String,
    },

    /// Credit one deposit by hand
    Deposit {
        #[arg(short, long)]
        user: u64,

        /// External transaction id
        txid: String,

        /// Amount in base units
        units: u64,

        #[arg(long, default_value = "0")]
        confirmations: u32,
    },

    /// Credit confirmed transfers listed in a JSON feed file
    PollDeposits {
        feed: PathBuf,
    },

    /// Set the payout address
    SetWithdrawalAddress {
        #[arg(short, long)]
        user: u64,

        address: String,
    },

    /// Reserve chips for a payout
    Withdraw {
        #[arg(short, long)]
        user: u64,

        chips: i64,
    },

    /// Mark a pending withdrawal as paid
    CompleteWithdrawal {
        id: u64,

        #[arg(long)]
        txid: Option<String>,
    },

    /// Return a pending withdrawal to the user
    ReverseWithdrawal {
        id: u64,
    },

    /// List withdrawals awaiting payout
    PendingWithdrawals,

    /// Credit chips to a user without a deposit
    AdminCredit {
        #[arg(short, long)]
        user: u64,

        chips: i64,
    },

    /// Add chips to the house bankroll
    FundHouse {
        chips: i64,
    },

    /// Replay the log and compare it with live balances
    Audit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "chiphouse=debug" } else { "chiphouse=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> ChipResult<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }

    let house = ChipHouseFactory::new(config).build()?;
    execute(&house, cli.command).await
}

async fn execute(house: &ChipHouse, command: Commands) -> ChipResult<()> {
    let ledger = &house.ledger;
    let reconciler = &house.reconciler;

    match command {
        Commands::Balance { user } => {
            #[derive(Serialize)]
            struct BalanceView {
                user_id: u64,
                balance: i64,
                stats: chiphouse::ledger::WagerStats,
            }
            print_json(&BalanceView {
                user_id: user,
                balance: ledger.get_balance(user)?,
                stats: ledger.stats(user)?,
            })
        }
        Commands::House => print_json(&ledger.house()?),
        Commands::Play {
            user,
            game,
            stake,
            choice,
            name,
        } => {
            let game = parse_game(&game, choice.as_deref())?;
            let mut request = WagerRequest::new(user, stake, game);
            if let Some(name) = name.as_deref() {
                request = request.named(name);
            }
            print_json(&house.settlement.settle(request).await?)
        }
        Commands::Bonus { user } => {
            let receipt = reconciler.claim_daily_bonus(user, None).await?;
            print_json(&receipt.transaction)
        }
        Commands::History { user, limit } => {
            let entries: Vec<_> = ledger
                .history(user, limit)?
                .into_iter()
                .map(|tx| (tx.label(), tx))
                .collect();
            print_json(&entries)
        }
        Commands::Leaderboard { limit } => print_json(&ledger.top_balances(limit)?),
        Commands::RegisterAddress { user, address } => {
            print_json(&reconciler.register_deposit_address(user, &address)?)
        }
        Commands::Deposit {
            user,
            txid,
            units,
            confirmations,
        } => {
            let outcome = reconciler
                .credit_deposit(DepositNotice {
                    user_id: user,
                    external_txid: txid,
                    amount_units: units,
                    confirmations,
                    address: None,
                })
                .await?;
            println!("{:?}", outcome);
            Ok(())
        }
        Commands::PollDeposits { feed } => {
            let summary = reconciler.poll_deposits(&FileFeed::new(feed)).await?;
            print_json(&summary)
        }
        Commands::SetWithdrawalAddress { user, address } => {
            print_json(&reconciler.set_withdrawal_address(user, &address, None)?)
        }
        Commands::Withdraw { user, chips } => {
            let receipt = reconciler.request_withdrawal(user, chips).await?;
            print_json(&receipt.withdrawal)
        }
        Commands::CompleteWithdrawal { id, txid } => {
            let receipt = reconciler.complete_withdrawal(id, txid).await?;
            print_json(&receipt.withdrawal)
        }
        Commands::ReverseWithdrawal { id } => {
            let receipt = reconciler.reverse_withdrawal(id).await?;
            print_json(&receipt.withdrawal)
        }
        Commands::PendingWithdrawals => print_json(&reconciler.pending_withdrawals()?),
        Commands::AdminCredit { user, chips } => {
            print_json(&reconciler.admin_credit(user, chips, None, None).await?)
        }
        Commands::FundHouse { chips } => print_json(&reconciler.fund_house(chips).await?),
        Commands::Audit => {
            let report = audit::reconcile(ledger, house.config.house.initial_balance)?;
            report.raise_alerts(&house.alerts, ledger.clock().now());
            print_json(&report)
        }
    }
}

fn parse_game(game: &str, choice: Option<&str>) -> Result<GameRequest, EngineError> {
    let need = |what: &str| EngineError::InvalidChoice(format!("{} needs a choice", what));
    match game.to_ascii_lowercase().as_str() {
        "coinflip" | "cf" => Ok(GameRequest::CoinFlip {
            choice: choice.ok_or_else(|| need("coinflip"))?.parse()?,
        }),
        "dice" => Ok(GameRequest::Dice),
        "slots" => Ok(GameRequest::Slots),
        "roulette" => {
            let bet: RouletteBet = choice.ok_or_else(|| need("roulette"))?.parse()?;
            Ok(GameRequest::Roulette { bet })
        }
        "blackjack" | "bj" => Ok(GameRequest::Blackjack),
        other => Err(EngineError::InvalidChoice(format!("unknown game '{}'", other))),
    }
}

fn print_json<T: Serialize>(value: &T) -> ChipResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
