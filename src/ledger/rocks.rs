//! Durable ledger backend on RocksDB.
//!
//! Rows are serde_json values under prefixed keys. Numeric ids are encoded
//! big-endian so prefix scans come back in id order:
//!
//! | key                       | value                    |
//! |---------------------------|--------------------------|
//! | `acct:` + user (be)       | [`Account`]              |
//! | `house`                   | [`HouseAccount`]         |
//! | `tx:` + id (be)           | [`Transaction`]          |
//! | `meta:next_tx_id`         | next transaction id      |
//! | `stats:` + user (be)      | [`WagerStats`]           |
//! | `dep:` + external txid    | [`PendingExternalDeposit`] |
//! | `wd:` + id (be)           | [`WithdrawalRecord`]     |
//! | `addr:` + address         | owning user id           |
//!
//! Each commit is a single `WriteBatch`, issued while holding the commit
//! mutex so the read-validate-write sequence of one batch never interleaves
//! with another.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::StorageConfig;
use crate::errors::StorageError;
use crate::ledger::backend::{plan_commit, CommitError, CommitRows, LedgerBackend};
use crate::ledger::types::*;
use crate::storage::RocksStore;

const ACCOUNT_PREFIX: &[u8] = b"acct:";
const HOUSE_KEY: &[u8] = b"house";
const TX_PREFIX: &[u8] = b"tx:";
const NEXT_TX_ID_KEY: &[u8] = b"meta:next_tx_id";
const STATS_PREFIX: &[u8] = b"stats:";
const DEPOSIT_PREFIX: &[u8] = b"dep:";
const WITHDRAWAL_PREFIX: &[u8] = b"wd:";
const ADDRESS_PREFIX: &[u8] = b"addr:";

fn id_key(prefix: &[u8], id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn str_key(prefix: &[u8], s: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + s.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(s.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StorageError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
}

pub struct RocksBackend {
    store: RocksStore,
    commit_lock: Mutex<()>,
}

impl RocksBackend {
    pub fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::with_store(RocksStore::open_with_config(path, config)?))
    }

    pub fn with_store(store: RocksStore) -> Self {
        Self {
            store,
            commit_lock: Mutex::new(()),
        }
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load<T: DeserializeOwned>(&self, key: &[u8], what: &str) -> Result<Option<T>, StorageError> {
        match self.store.get(key)? {
            Some(bytes) => decode(&bytes, what).map(Some),
            None => Ok(None),
        }
    }

    fn load_house(&self) -> Result<Option<HouseAccount>, StorageError> {
        self.load(HOUSE_KEY, "house account")
    }

    fn next_transaction_id(&self) -> Result<u64, StorageError> {
        Ok(self.load(NEXT_TX_ID_KEY, "next transaction id")?.unwrap_or(1))
    }

    fn scan_all<T: DeserializeOwned>(&self, prefix: &[u8], what: &str) -> Result<Vec<T>, StorageError> {
        self.store
            .scan_prefix(prefix, None, usize::MAX)?
            .into_iter()
            .map(|(_, value)| decode(&value, what))
            .collect()
    }
}

impl LedgerBackend for RocksBackend {
    fn account(&self, user_id: UserId) -> Result<Option<Account>, StorageError> {
        self.load(&id_key(ACCOUNT_PREFIX, user_id), "account")
    }

    fn ensure_account(
        &self,
        user_id: UserId,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError> {
        if let Some(account) = self.account(user_id)? {
            return Ok(account);
        }
        let _guard = self.exclusive();
        if let Some(account) = self.account(user_id)? {
            return Ok(account);
        }
        let account = Account::new(user_id, display_name.map(str::to_string), now);
        self.store
            .put(&id_key(ACCOUNT_PREFIX, user_id), &encode(&account, "account")?)?;
        debug!(user_id, "Created account");
        Ok(account)
    }

    fn house(&self) -> Result<HouseAccount, StorageError> {
        Ok(self.load_house()?.unwrap_or(HouseAccount {
            balance: 0,
            version: 0,
            updated_at: DateTime::<Utc>::default(),
        }))
    }

    fn seed_house(&self, initial: Chips, now: DateTime<Utc>) -> Result<HouseAccount, StorageError> {
        let _guard = self.exclusive();
        if let Some(house) = self.load_house()? {
            return Ok(house);
        }
        let house = HouseAccount {
            balance: initial,
            version: 0,
            updated_at: now,
        };
        self.store.put(HOUSE_KEY, &encode(&house, "house account")?)?;
        Ok(house)
    }

    fn commit(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<CommitReceipt, CommitError> {
        let _guard = self.exclusive();

        let account = match &batch.account {
            Some(change) => self.account(change.user_id)?,
            None => None,
        };
        let deposit = match &batch.deposit {
            Some(change) => self.pending_deposit(&change.external_txid)?,
            None => None,
        };
        let withdrawal = match &batch.withdrawal {
            Some(WithdrawalChange::Resolve { id, .. }) => self.withdrawal(*id)?,
            _ => None,
        };
        let rows = CommitRows {
            account,
            house: self.house()?,
            deposit,
            withdrawal,
        };

        let next_id = self.next_transaction_id()?;
        let plan = plan_commit(batch, rows, next_id, now)?;

        let mut puts = Vec::new();
        if let Some(account) = &plan.account {
            puts.push((id_key(ACCOUNT_PREFIX, account.user_id), encode(account, "account")?));
        }
        if plan.house_changed {
            puts.push((HOUSE_KEY.to_vec(), encode(&plan.house, "house account")?));
        }
        if let Some(tx) = &plan.transaction {
            puts.push((id_key(TX_PREFIX, tx.id), encode(tx, "transaction")?));
            puts.push((NEXT_TX_ID_KEY.to_vec(), encode(&plan.next_transaction_id, "next transaction id")?));
        }
        if let Some(deposit) = &plan.deposit {
            puts.push((str_key(DEPOSIT_PREFIX, &deposit.external_txid), encode(deposit, "deposit")?));
        }
        if let Some(withdrawal) = &plan.withdrawal {
            puts.push((id_key(WITHDRAWAL_PREFIX, withdrawal.id), encode(withdrawal, "withdrawal")?));
        }

        self.store.write_atomic(&puts, &[])?;
        Ok(plan.receipt())
    }

    fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, CommitError> {
        let _guard = self.exclusive();

        let mut account = self
            .account(user_id)?
            .unwrap_or_else(|| Account::new(user_id, None, now));
        let mut puts = Vec::new();
        let mut deletes = Vec::new();

        match update {
            ProfileUpdate::DisplayName(name) => account.display_name = Some(name),
            ProfileUpdate::WithdrawalAddress(address) => account.withdrawal_address = Some(address),
            ProfileUpdate::DepositAddress(address) => {
                if let Some(owner) = self.owner_of_address(&address)? {
                    if owner != user_id {
                        return Err(CommitError::AddressInUse { address, owner });
                    }
                }
                if let Some(previous) = account.deposit_address.take() {
                    deletes.push(str_key(ADDRESS_PREFIX, &previous));
                }
                puts.push((str_key(ADDRESS_PREFIX, &address), encode(&user_id, "address owner")?));
                account.deposit_address = Some(address);
            }
        }
        account.version += 1;
        account.updated_at = now;
        puts.push((id_key(ACCOUNT_PREFIX, user_id), encode(&account, "account")?));

        // Deletes run after puts in a WriteBatch; keep re-registration of the
        // same address from deleting the fresh row.
        if let Some(current) = &account.deposit_address {
            let current_key = str_key(ADDRESS_PREFIX, current);
            deletes.retain(|k| *k != current_key);
        }

        self.store.write_atomic(&puts, &deletes)?;
        Ok(account)
    }

    fn owner_of_address(&self, address: &str) -> Result<Option<UserId>, StorageError> {
        self.load(&str_key(ADDRESS_PREFIX, address), "address owner")
    }

    fn deposit_addresses(&self) -> Result<Vec<(String, UserId)>, StorageError> {
        self.store
            .scan_prefix(ADDRESS_PREFIX, None, usize::MAX)?
            .into_iter()
            .map(|(key, value)| {
                let address = String::from_utf8(key[ADDRESS_PREFIX.len()..].to_vec())
                    .map_err(|e| StorageError::CorruptedData(format!("Address key is not UTF-8: {}", e)))?;
                Ok((address, decode(&value, "address owner")?))
            })
            .collect()
    }

    fn pending_deposit(&self, external_txid: &str) -> Result<Option<PendingExternalDeposit>, StorageError> {
        self.load(&str_key(DEPOSIT_PREFIX, external_txid), "deposit")
    }

    fn record_pending_deposit(
        &self,
        mut deposit: PendingExternalDeposit,
    ) -> Result<PendingExternalDeposit, CommitError> {
        let _guard = self.exclusive();
        if let Some(existing) = self.pending_deposit(&deposit.external_txid)? {
            if existing.processed {
                return Err(CommitError::AlreadyProcessed {
                    external_txid: deposit.external_txid,
                });
            }
            deposit.first_seen = existing.first_seen;
        }
        deposit.processed = false;
        self.store
            .put(&str_key(DEPOSIT_PREFIX, &deposit.external_txid), &encode(&deposit, "deposit")?)?;
        Ok(deposit)
    }

    fn withdrawal(&self, id: u64) -> Result<Option<WithdrawalRecord>, StorageError> {
        self.load(&id_key(WITHDRAWAL_PREFIX, id), "withdrawal")
    }

    fn withdrawals(&self) -> Result<Vec<WithdrawalRecord>, StorageError> {
        self.scan_all(WITHDRAWAL_PREFIX, "withdrawal")
    }

    fn stats(&self, user_id: UserId) -> Result<WagerStats, StorageError> {
        Ok(self.load(&id_key(STATS_PREFIX, user_id), "wager stats")?.unwrap_or_default())
    }

    fn put_stats(&self, user_id: UserId, stats: &WagerStats) -> Result<(), StorageError> {
        self.store.put(&id_key(STATS_PREFIX, user_id), &encode(stats, "wager stats")?)
    }

    fn transactions(&self, after_id: u64, limit: usize) -> Result<Vec<Transaction>, StorageError> {
        let Some(first) = after_id.checked_add(1) else {
            return Ok(Vec::new());
        };
        let from = id_key(TX_PREFIX, first);
        self.store
            .scan_prefix(TX_PREFIX, Some(&from), limit)?
            .into_iter()
            .map(|(_, value)| decode(&value, "transaction"))
            .collect()
    }

    fn accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.scan_all(ACCOUNT_PREFIX, "account")
    }
}
