//! Chiphouse - house-banked chip ledger
//!
//! Players wager chips against a single house bankroll. Every balance change
//! is committed together with its audit log entry, so balances can always be
//! rebuilt from the log and game entries always net to zero between a player
//! and the house.
//!
//! - [`ledger`]: balances, the house row and the append-only log
//! - [`games`]: coinflip, dice, slots, roulette and blackjack outcomes
//! - [`rate_limiter`]: per-user cooldown and sliding window
//! - [`settlement`]: turns one wager into one atomic ledger commit
//! - [`reconciler`]: deposits, withdrawals, bonuses and manual credits
//! - [`audit`]: log replay and reconciliation alerts

pub mod audit;
pub mod clock;
pub mod config;
pub mod errors;
pub mod factory;
pub mod games;
pub mod ledger;
pub mod metrics;
pub mod rate_limiter;
pub mod reconciler;
pub mod settlement;
pub mod storage;

pub use audit::{AlertKind, AlertLog, AuditReport, ReconciliationAlert};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, EngineConfig};
pub use errors::{ChipError, ChipResult, EngineError, EngineResult};
pub use factory::{ChipHouse, ChipHouseFactory};
pub use games::{GameEngine, GameKind, GameRequest, Outcome, StandardGameEngine};
pub use ledger::{Account, Chips, HouseAccount, Ledger, Transaction, TransactionKind, UserId, HOUSE_ID};
pub use rate_limiter::{InMemoryRateLimiter, RateLimiter};
pub use reconciler::{ExternalFeed, ExternalTransfer, Reconciler};
pub use settlement::{Settlement, SettlementReceipt, WagerRequest, WagerResponse};
