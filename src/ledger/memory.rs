//! Process-local ledger backend for tests and throwaway runs

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::errors::StorageError;
use crate::ledger::backend::{plan_commit, CommitError, CommitRows, LedgerBackend};
use crate::ledger::types::*;

#[derive(Debug)]
struct MemoryState {
    accounts: HashMap<UserId, Account>,
    house: Option<HouseAccount>,
    transactions: Vec<Transaction>,
    next_transaction_id: u64,
    stats: HashMap<UserId, WagerStats>,
    deposits: HashMap<String, PendingExternalDeposit>,
    withdrawals: BTreeMap<u64, WithdrawalRecord>,
    addresses: HashMap<String, UserId>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            house: None,
            transactions: Vec::new(),
            next_transaction_id: 1,
            stats: HashMap::new(),
            deposits: HashMap::new(),
            withdrawals: BTreeMap::new(),
            addresses: HashMap::new(),
        }
    }
}

/// Every operation runs under one mutex, which doubles as the commit section
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn unseeded_house() -> HouseAccount {
    HouseAccount {
        balance: 0,
        version: 0,
        updated_at: DateTime::<Utc>::default(),
    }
}

impl LedgerBackend for MemoryBackend {
    fn account(&self, user_id: UserId) -> Result<Option<Account>, StorageError> {
        Ok(self.state().accounts.get(&user_id).cloned())
    }

    fn ensure_account(
        &self,
        user_id: UserId,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError> {
        let mut state = self.state();
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, display_name.map(str::to_string), now));
        Ok(account.clone())
    }

    fn house(&self) -> Result<HouseAccount, StorageError> {
        Ok(self.state().house.clone().unwrap_or_else(unseeded_house))
    }

    fn seed_house(&self, initial: Chips, now: DateTime<Utc>) -> Result<HouseAccount, StorageError> {
        let mut state = self.state();
        let house = state.house.get_or_insert_with(|| HouseAccount {
            balance: initial,
            version: 0,
            updated_at: now,
        });
        Ok(house.clone())
    }

    fn commit(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<CommitReceipt, CommitError> {
        let mut state = self.state();

        let rows = CommitRows {
            account: batch
                .account
                .as_ref()
                .and_then(|change| state.accounts.get(&change.user_id).cloned()),
            house: state.house.clone().unwrap_or_else(unseeded_house),
            deposit: batch
                .deposit
                .as_ref()
                .and_then(|change| state.deposits.get(&change.external_txid).cloned()),
            withdrawal: match &batch.withdrawal {
                Some(WithdrawalChange::Resolve { id, .. }) => state.withdrawals.get(id).cloned(),
                _ => None,
            },
        };

        let plan = plan_commit(batch, rows, state.next_transaction_id, now)?;
        let receipt = plan.receipt();

        if let Some(account) = plan.account {
            state.accounts.insert(account.user_id, account);
        }
        if plan.house_changed {
            state.house = Some(plan.house);
        }
        if let Some(tx) = plan.transaction {
            state.transactions.push(tx);
        }
        state.next_transaction_id = plan.next_transaction_id;
        if let Some(deposit) = plan.deposit {
            state.deposits.insert(deposit.external_txid.clone(), deposit);
        }
        if let Some(withdrawal) = plan.withdrawal {
            state.withdrawals.insert(withdrawal.id, withdrawal);
        }

        Ok(receipt)
    }

    fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, CommitError> {
        let mut state = self.state();

        if let ProfileUpdate::DepositAddress(address) = &update {
            if let Some(&owner) = state.addresses.get(address) {
                if owner != user_id {
                    return Err(CommitError::AddressInUse { address: address.clone(), owner });
                }
            }
        }

        let mut account = state
            .accounts
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Account::new(user_id, None, now));

        match update {
            ProfileUpdate::DisplayName(name) => account.display_name = Some(name),
            ProfileUpdate::WithdrawalAddress(address) => account.withdrawal_address = Some(address),
            ProfileUpdate::DepositAddress(address) => {
                if let Some(previous) = account.deposit_address.take() {
                    state.addresses.remove(&previous);
                }
                state.addresses.insert(address.clone(), user_id);
                account.deposit_address = Some(address);
            }
        }
        account.version += 1;
        account.updated_at = now;

        state.accounts.insert(user_id, account.clone());
        Ok(account)
    }

    fn owner_of_address(&self, address: &str) -> Result<Option<UserId>, StorageError> {
        Ok(self.state().addresses.get(address).copied())
    }

    fn deposit_addresses(&self) -> Result<Vec<(String, UserId)>, StorageError> {
        let mut addresses: Vec<_> = self
            .state()
            .addresses
            .iter()
            .map(|(address, owner)| (address.clone(), *owner))
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    fn pending_deposit(&self, external_txid: &str) -> Result<Option<PendingExternalDeposit>, StorageError> {
        Ok(self.state().deposits.get(external_txid).cloned())
    }

    fn record_pending_deposit(
        &self,
        mut deposit: PendingExternalDeposit,
    ) -> Result<PendingExternalDeposit, CommitError> {
        let mut state = self.state();
        if let Some(existing) = state.deposits.get(&deposit.external_txid) {
            if existing.processed {
                return Err(CommitError::AlreadyProcessed {
                    external_txid: deposit.external_txid,
                });
            }
            deposit.first_seen = existing.first_seen;
        }
        deposit.processed = false;
        state.deposits.insert(deposit.external_txid.clone(), deposit.clone());
        Ok(deposit)
    }

    fn withdrawal(&self, id: u64) -> Result<Option<WithdrawalRecord>, StorageError> {
        Ok(self.state().withdrawals.get(&id).cloned())
    }

    fn withdrawals(&self) -> Result<Vec<WithdrawalRecord>, StorageError> {
        Ok(self.state().withdrawals.values().cloned().collect())
    }

    fn stats(&self, user_id: UserId) -> Result<WagerStats, StorageError> {
        Ok(self.state().stats.get(&user_id).cloned().unwrap_or_default())
    }

    fn put_stats(&self, user_id: UserId, stats: &WagerStats) -> Result<(), StorageError> {
        self.state().stats.insert(user_id, stats.clone());
        Ok(())
    }

    fn transactions(&self, after_id: u64, limit: usize) -> Result<Vec<Transaction>, StorageError> {
        let state = self.state();
        // ids are dense and start at 1, so entry `id` sits at index `id - 1`
        let start = usize::try_from(after_id).unwrap_or(usize::MAX).min(state.transactions.len());
        Ok(state.transactions[start..].iter().take(limit).cloned().collect())
    }

    fn accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut accounts: Vec<_> = self.state().accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.user_id);
        Ok(accounts)
    }
}
