//! Dump the contents of a chiphouse RocksDB ledger

use chiphouse::{
    audit,
    clock::SystemClock,
    config::StorageConfig,
    errors::ChipResult,
    ledger::{Ledger, LedgerBackend, RocksBackend},
};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "inspect_ledger")]
#[command(about = "Print house, accounts and recent log entries of a ledger")]
struct Args {
    /// Ledger data directory
    #[arg(short, long, default_value = "./DB/chiphouse")]
    db_path: String,

    /// Number of log entries to show
    #[arg(short, long, default_value = "20")]
    tail: usize,

    /// House bankroll the ledger was seeded with, for the replay check
    #[arg(long)]
    initial_house: Option<i64>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = inspect(&args) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

fn inspect(args: &Args) -> ChipResult<()> {
    let backend = Arc::new(RocksBackend::open(&args.db_path, &StorageConfig::default())?);
    let ledger = Ledger::new(backend.clone() as Arc<dyn LedgerBackend>, Arc::new(SystemClock));

    println!("📂 Ledger at {}", args.db_path);
    let house = ledger.house()?;
    println!("🏦 House balance: {} (version {})", house.balance, house.version);

    let accounts = ledger.top_balances(usize::MAX)?;
    println!("\n👥 {} accounts", accounts.len());
    for account in &accounts {
        println!(
            "  {:>8}  {:>12}  v{:<6} {}",
            account.user_id,
            account.balance,
            account.version,
            account.display_name.as_deref().unwrap_or("-")
        );
    }

    let log = ledger.all_transactions()?;
    println!("\n📜 {} log entries, last {}:", log.len(), args.tail.min(log.len()));
    for tx in log.iter().rev().take(args.tail).rev() {
        println!(
            "  #{:<8} {}  user {:<8} {:>+10}  house {:>+10}  {}",
            tx.id,
            tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tx.user_id,
            tx.amount,
            tx.house_delta,
            tx.label()
        );
    }

    let withdrawals = backend.withdrawals()?;
    if !withdrawals.is_empty() {
        println!("\n💸 {} withdrawals", withdrawals.len());
        for w in &withdrawals {
            println!("  #{:<8} user {:<8} {:>10} chips  {:?}  {}", w.id, w.user_id, w.chips, w.status, w.address);
        }
    }

    if let Some(initial) = args.initial_house {
        let report = audit::reconcile(&ledger, initial)?;
        println!(
            "\n🔍 Replay: {} ({} mismatches, {} zero-sum violations)",
            if report.is_clean() { "clean" } else { "DIRTY" },
            report.mismatches.len(),
            report.zero_sum_violations.len()
        );
        println!("   Log digest: {}", report.log_digest);
    }

    Ok(())
}
