//! Ledger store: balances, the house row and the append-only transaction log.
//!
//! [`Ledger`] layers two things over a [`LedgerBackend`]:
//! - a per-account async lock, so read-decide-write sequences for one user
//!   never interleave while other users proceed in parallel
//! - the clock used to stamp every committed row
//!
//! The house row is not locked here. Each backend commit runs inside a single
//! exclusive section and re-validates the house balance there, which is the
//! one global serialization point every wager passes through.

pub mod backend;
pub mod memory;
pub mod rocks;
pub mod types;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{BackendKind, EngineConfig};
use crate::errors::{ChipResult, EngineError, EngineResult, StorageError};

pub use backend::{CommitError, LedgerBackend};
pub use memory::MemoryBackend;
pub use rocks::RocksBackend;
pub use types::*;

/// Held while a user's balance is being decided on
pub type AccountGuard = OwnedMutexGuard<()>;

const PAGE_SIZE: usize = 512;

/// Refuse the house id where a player account is expected
pub fn ensure_player(user_id: UserId) -> EngineResult<()> {
    if user_id == HOUSE_ID {
        return Err(EngineError::ReservedAccount(user_id));
    }
    Ok(())
}

pub struct Ledger {
    backend: Arc<dyn LedgerBackend>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(backend: Arc<dyn LedgerBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
            clock,
        }
    }

    /// Process-local ledger with a seeded house
    pub fn in_memory(house_balance: Chips, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        let ledger = Self::new(Arc::new(MemoryBackend::new()), clock);
        ledger.backend.seed_house(house_balance, ledger.clock.now())?;
        Ok(ledger)
    }

    /// Open the configured backend and seed the house on first use
    pub fn open(config: &EngineConfig, clock: Arc<dyn Clock>) -> ChipResult<Self> {
        let backend: Arc<dyn LedgerBackend> = match config.storage.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Rocksdb => {
                std::fs::create_dir_all(&config.storage.data_directory)?;
                Arc::new(RocksBackend::open(&config.storage.data_directory, &config.storage)?)
            }
        };

        let ledger = Self::new(backend, clock);
        let house = ledger
            .backend
            .seed_house(config.house.initial_balance, ledger.clock.now())?;
        info!(
            backend = ?config.storage.backend,
            house_balance = house.balance,
            "Ledger ready"
        );
        Ok(ledger)
    }

    pub fn backend(&self) -> &Arc<dyn LedgerBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Take the exclusive section for one account
    pub async fn lock_account(&self, user_id: UserId) -> AccountGuard {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Balance of a user; unseen users have 0
    pub fn get_balance(&self, user_id: UserId) -> EngineResult<Chips> {
        Ok(self.backend.account(user_id)?.map(|a| a.balance).unwrap_or(0))
    }

    pub fn get_house_balance(&self) -> EngineResult<Chips> {
        Ok(self.backend.house()?.balance)
    }

    pub fn house(&self) -> EngineResult<HouseAccount> {
        Ok(self.backend.house()?)
    }

    pub fn account(&self, user_id: UserId) -> EngineResult<Option<Account>> {
        Ok(self.backend.account(user_id)?)
    }

    pub fn get_or_create_account(&self, user_id: UserId, display_name: Option<&str>) -> EngineResult<Account> {
        ensure_player(user_id)?;
        Ok(self.backend.ensure_account(user_id, display_name, self.clock.now())?)
    }

    /// Change a user's balance, creating the account at 0 if needed.
    ///
    /// Fails with `InsufficientFunds` and changes nothing if the balance
    /// would go negative.
    pub async fn apply_delta(&self, user_id: UserId, amount: Chips, display_name: Option<&str>) -> EngineResult<Chips> {
        ensure_player(user_id)?;
        let _guard = self.lock_account(user_id).await;
        let batch = LedgerBatch::new().account(AccountChange::new(user_id, amount).named(display_name));
        let receipt = self.commit(batch)?;
        let balance = receipt.account.map(|a| a.balance).unwrap_or(0);
        debug!(user_id, amount, balance, "Applied delta");
        Ok(balance)
    }

    pub async fn apply_house_delta(&self, amount: Chips) -> EngineResult<Chips> {
        let receipt = self.commit(LedgerBatch::new().house(amount))?;
        debug!(amount, house_balance = receipt.house.balance, "Applied house delta");
        Ok(receipt.house.balance)
    }

    /// Append an entry without touching balances
    pub fn record_transaction(&self, draft: TransactionDraft) -> EngineResult<Transaction> {
        let receipt = self.commit(LedgerBatch::new().record(draft))?;
        receipt
            .transaction
            .ok_or_else(|| StorageError::CorruptedData("commit returned no transaction".to_string()).into())
    }

    /// Apply a batch atomically, stamped with the ledger clock
    pub fn commit(&self, batch: LedgerBatch) -> Result<CommitReceipt, CommitError> {
        self.backend.commit(batch, self.clock.now())
    }

    pub fn update_profile(&self, user_id: UserId, update: ProfileUpdate) -> EngineResult<Account> {
        ensure_player(user_id)?;
        Ok(self.backend.update_profile(user_id, update, self.clock.now())?)
    }

    pub fn stats(&self, user_id: UserId) -> EngineResult<WagerStats> {
        Ok(self.backend.stats(user_id)?)
    }

    /// Fold a committed game entry into its user's stats.
    ///
    /// Callers hold the user's account lock.
    pub fn update_stats(&self, tx: &Transaction) -> EngineResult<WagerStats> {
        let mut stats = self.backend.stats(tx.user_id)?;
        stats.record(tx);
        self.backend.put_stats(tx.user_id, &stats)?;
        Ok(stats)
    }

    /// Recompute a user's stats from the log and store them
    pub async fn rebuild_stats(&self, user_id: UserId) -> EngineResult<WagerStats> {
        let _guard = self.lock_account(user_id).await;
        let mut stats = WagerStats::default();
        for tx in self.all_transactions()?.iter().filter(|tx| tx.user_id == user_id) {
            stats.record(tx);
        }
        self.backend.put_stats(user_id, &stats)?;
        info!(user_id, games_played = stats.games_played, "Rebuilt wager stats");
        Ok(stats)
    }

    /// Entries with id greater than `after_id`, oldest first
    pub fn transactions(&self, after_id: u64, limit: usize) -> EngineResult<Vec<Transaction>> {
        Ok(self.backend.transactions(after_id, limit)?)
    }

    pub fn all_transactions(&self) -> EngineResult<Vec<Transaction>> {
        let mut all = Vec::new();
        let mut after = 0;
        loop {
            let page = self.backend.transactions(after, PAGE_SIZE)?;
            let Some(last) = page.last() else { break };
            after = last.id;
            let done = page.len() < PAGE_SIZE;
            all.extend(page);
            if done {
                break;
            }
        }
        Ok(all)
    }

    /// Most recent entries of one user, newest first
    pub fn history(&self, user_id: UserId, limit: usize) -> EngineResult<Vec<Transaction>> {
        let mut entries: Vec<_> = self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.user_id == user_id)
            .collect();
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    pub fn accounts(&self) -> EngineResult<Vec<Account>> {
        Ok(self.backend.accounts()?)
    }

    /// Richest accounts first; ties by user id
    pub fn top_balances(&self, limit: usize) -> EngineResult<Vec<Account>> {
        let mut accounts = self.backend.accounts()?;
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.user_id.cmp(&b.user_id)));
        accounts.truncate(limit);
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::errors::EngineError;

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::in_memory(10_000, Arc::new(SystemClock)).expect("ledger"))
    }

    #[tokio::test]
    async fn test_unknown_user_reads_zero() {
        let ledger = ledger();
        assert_eq!(ledger.get_balance(99).unwrap(), 0);
        assert_eq!(ledger.account(99).unwrap(), None);
        assert_eq!(ledger.get_house_balance().unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_apply_delta_upserts_and_guards_floor() {
        let ledger = ledger();
        assert_eq!(ledger.apply_delta(1, 250, Some("mia")).await.unwrap(), 250);
        assert_eq!(ledger.account(1).unwrap().unwrap().display_name.as_deref(), Some("mia"));

        let err = ledger.apply_delta(1, -300, None).await.unwrap_err();
        assert_eq!(err, EngineError::InsufficientFunds { balance: 250, required: 300 });
        assert_eq!(ledger.get_balance(1).unwrap(), 250);

        assert_eq!(ledger.apply_house_delta(-500).await.unwrap(), 9_500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let ledger = ledger();
        ledger.apply_delta(7, 100, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.apply_delta(7, -10, None).await }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(ledger.get_balance(7).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_and_rebuild_stats() {
        let ledger = ledger();
        let tx = ledger
            .record_transaction(
                TransactionDraft::new(3, 0, TransactionKind::GamePush)
                    .with_game(crate::games::GameKind::Blackjack, 20),
            )
            .unwrap();
        assert_eq!(tx.id, 1);
        ledger.update_stats(&tx).unwrap();
        assert_eq!(ledger.stats(3).unwrap().games_played, 1);

        ledger.backend().put_stats(3, &WagerStats::default()).unwrap();
        let rebuilt = ledger.rebuild_stats(3).await.unwrap();
        assert_eq!(rebuilt.games_played, 1);
        assert_eq!(rebuilt.total_wagered, 20);
    }

    #[tokio::test]
    async fn test_top_balances_and_history() {
        let ledger = ledger();
        for (user, amount) in [(1, 50), (2, 500), (3, 50), (4, 5)] {
            ledger
                .commit(
                    LedgerBatch::new()
                        .account(AccountChange::new(user, amount))
                        .record(TransactionDraft::new(user, amount, TransactionKind::AdminCredit)),
                )
                .unwrap();
        }
        let top: Vec<_> = ledger.top_balances(3).unwrap().iter().map(|a| a.user_id).collect();
        assert_eq!(top, vec![2, 1, 3]);

        let history = ledger.history(3, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 50);
    }

    #[tokio::test]
    async fn test_house_id_is_not_a_player() {
        let ledger = ledger();
        assert_eq!(
            ledger.apply_delta(HOUSE_ID, 1_000, None).await,
            Err(EngineError::ReservedAccount(HOUSE_ID))
        );
        assert!(ledger.get_or_create_account(HOUSE_ID, None).is_err());
        assert!(matches!(
            ledger.commit(LedgerBatch::new().account(AccountChange::new(HOUSE_ID, 5))),
            Err(CommitError::ReservedAccount(HOUSE_ID))
        ));

        assert_eq!(ledger.get_balance(HOUSE_ID).unwrap(), 0);
        assert!(ledger.accounts().unwrap().is_empty());
        assert!(ledger.all_transactions().unwrap().is_empty());
    }
}
