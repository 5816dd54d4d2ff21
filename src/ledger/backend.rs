//! Storage contract for the ledger and the commit rules every backend shares.
//!
//! A backend only has to read the rows a batch touches, hand them to
//! [`plan_commit`], and persist the resulting plan atomically while holding
//! its commit section. The commit section is also what serializes access to
//! the house row.

use chrono::{DateTime, Utc};

use crate::errors::{EngineError, StorageError};
use crate::ledger::types::*;

/// Failure to apply a [`LedgerBatch`]; nothing was written
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitError {
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Chips, required: Chips },

    #[error("House cannot cover change: house balance {house_balance}, required {required}")]
    HouseInsufficientFunds { house_balance: Chips, required: Chips },

    #[error("Account {user_id} changed underneath: expected version {expected}, found {found}")]
    VersionConflict { user_id: UserId, expected: u64, found: u64 },

    #[error("External transaction {external_txid} already processed")]
    AlreadyProcessed { external_txid: String },

    #[error("Unknown withdrawal {0}")]
    UnknownWithdrawal(u64),

    #[error("Withdrawal {id} is {status:?}")]
    WithdrawalNotPending { id: u64, status: WithdrawalStatus },

    #[error("Address {address} already belongs to user {owner}")]
    AddressInUse { address: String, owner: UserId },

    #[error("User id {0} is reserved for the house")]
    ReservedAccount(UserId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CommitError {
    /// The rows changed between validation and commit
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitError::VersionConflict { .. })
    }
}

impl From<CommitError> for EngineError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::InsufficientFunds { balance, required } => {
                EngineError::InsufficientFunds { balance, required }
            }
            CommitError::HouseInsufficientFunds { house_balance, required } => {
                EngineError::HouseInsufficientFunds { house_balance, required }
            }
            CommitError::VersionConflict { .. } => EngineError::LedgerWriteConflict { attempts: 1 },
            CommitError::AlreadyProcessed { external_txid } => EngineError::AlreadyProcessed { external_txid },
            CommitError::UnknownWithdrawal(id) => EngineError::UnknownWithdrawal(id),
            CommitError::WithdrawalNotPending { id, status } => EngineError::WithdrawalNotPending { id, status },
            CommitError::ReservedAccount(user_id) => EngineError::ReservedAccount(user_id),
            CommitError::AddressInUse { address, owner } => EngineError::AddressInUse { address, owner },
            CommitError::Storage(inner) => EngineError::Storage(inner),
        }
    }
}

/// Durable (or process-local) home of the ledger rows
pub trait LedgerBackend: Send + Sync {
    fn account(&self, user_id: UserId) -> Result<Option<Account>, StorageError>;

    /// Fetch the account, inserting a zero-balance row for an unseen user
    fn ensure_account(
        &self,
        user_id: UserId,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError>;

    fn house(&self) -> Result<HouseAccount, StorageError>;

    /// Create the house row with `initial` chips unless it already exists
    fn seed_house(&self, initial: Chips, now: DateTime<Utc>) -> Result<HouseAccount, StorageError>;

    /// Apply a batch atomically
    fn commit(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<CommitReceipt, CommitError>;

    fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, CommitError>;

    fn owner_of_address(&self, address: &str) -> Result<Option<UserId>, StorageError>;

    fn deposit_addresses(&self) -> Result<Vec<(String, UserId)>, StorageError>;

    fn pending_deposit(&self, external_txid: &str) -> Result<Option<PendingExternalDeposit>, StorageError>;

    /// Insert or refresh an unprocessed deposit
    fn record_pending_deposit(
        &self,
        deposit: PendingExternalDeposit,
    ) -> Result<PendingExternalDeposit, CommitError>;

    fn withdrawal(&self, id: u64) -> Result<Option<WithdrawalRecord>, StorageError>;

    fn withdrawals(&self) -> Result<Vec<WithdrawalRecord>, StorageError>;

    fn stats(&self, user_id: UserId) -> Result<WagerStats, StorageError>;

    fn put_stats(&self, user_id: UserId, stats: &WagerStats) -> Result<(), StorageError>;

    /// Log entries with id greater than `after_id`, ascending
    fn transactions(&self, after_id: u64, limit: usize) -> Result<Vec<Transaction>, StorageError>;

    fn accounts(&self) -> Result<Vec<Account>, StorageError>;
}

/// Current rows touched by a batch
#[derive(Debug, Clone)]
pub struct CommitRows {
    pub account: Option<Account>,
    pub house: HouseAccount,
    pub deposit: Option<PendingExternalDeposit>,
    pub withdrawal: Option<WithdrawalRecord>,
}

/// Rows to persist for a batch
#[derive(Debug, Clone)]
pub struct CommitPlan {
    pub account: Option<Account>,
    pub house: HouseAccount,
    pub house_changed: bool,
    pub transaction: Option<Transaction>,
    pub deposit: Option<PendingExternalDeposit>,
    pub withdrawal: Option<WithdrawalRecord>,
    pub next_transaction_id: u64,
}

impl CommitPlan {
    pub fn receipt(&self) -> CommitReceipt {
        CommitReceipt {
            account: self.account.clone(),
            house: self.house.clone(),
            transaction: self.transaction.clone(),
        }
    }
}

/// Validate a batch against the current rows and compute the new rows.
///
/// Balances never go below zero, the optimistic version must match, a
/// deposit is credited at most once and a withdrawal leaves `Pending` at
/// most once.
pub fn plan_commit(
    batch: LedgerBatch,
    rows: CommitRows,
    next_transaction_id: u64,
    now: DateTime<Utc>,
) -> Result<CommitPlan, CommitError> {
    // house entries are logged under HOUSE_ID but it never holds a player balance
    let account = match batch.account {
        Some(change) if change.user_id == HOUSE_ID => return Err(CommitError::ReservedAccount(HOUSE_ID)),
        Some(change) => Some(apply_account_change(change, rows.account, now)?),
        None => None,
    };

    let mut house = rows.house;
    let house_changed = batch.house_delta != 0;
    if house_changed {
        let next = house.balance.checked_add(batch.house_delta).ok_or_else(|| {
            StorageError::CorruptedData("house balance overflow".to_string())
        })?;
        if next < 0 {
            return Err(CommitError::HouseInsufficientFunds {
                house_balance: house.balance,
                required: -batch.house_delta,
            });
        }
        house.balance = next;
        house.version += 1;
        house.updated_at = now;
    }

    let (transaction, next_transaction_id) = match batch.transaction {
        Some(draft) => (
            Some(draft.into_transaction(next_transaction_id, now)),
            next_transaction_id + 1,
        ),
        None => (None, next_transaction_id),
    };
    let transaction_id = transaction.as_ref().map(|tx| tx.id);

    let deposit = match batch.deposit {
        Some(change) => {
            if let Some(existing) = rows.deposit.as_ref().filter(|d| d.processed) {
                return Err(CommitError::AlreadyProcessed {
                    external_txid: existing.external_txid.clone(),
                });
            }
            let first_seen = rows.deposit.as_ref().map(|d| d.first_seen).unwrap_or(now);
            Some(PendingExternalDeposit {
                external_txid: change.external_txid,
                user_id: change.user_id,
                address: change.address,
                external_amount: change.external_amount,
                confirmations: change.confirmations,
                processed: true,
                first_seen,
                processed_at: Some(now),
                credited_transaction: transaction_id,
            })
        }
        None => None,
    };

    let withdrawal = match batch.withdrawal {
        Some(WithdrawalChange::Open { user_id, chips, external_amount, address }) => {
            let id = transaction_id.ok_or_else(|| {
                StorageError::CorruptedData("withdrawal opened without a log entry".to_string())
            })?;
            Some(WithdrawalRecord {
                id,
                user_id,
                chips,
                external_amount,
                address,
                status: WithdrawalStatus::Pending,
                requested_at: now,
                resolved_at: None,
                external_txid: None,
            })
        }
        Some(WithdrawalChange::Resolve { id, status, external_txid }) => {
            let mut record = rows.withdrawal.ok_or(CommitError::UnknownWithdrawal(id))?;
            if record.status != WithdrawalStatus::Pending {
                return Err(CommitError::WithdrawalNotPending { id, status: record.status });
            }
            record.status = status;
            record.resolved_at = Some(now);
            record.external_txid = external_txid;
            Some(record)
        }
        None => None,
    };

    Ok(CommitPlan {
        account,
        house,
        house_changed,
        transaction,
        deposit,
        withdrawal,
        next_transaction_id,
    })
}

fn apply_account_change(
    change: AccountChange,
    current: Option<Account>,
    now: DateTime<Utc>,
) -> Result<Account, CommitError> {
    let mut account = current.unwrap_or_else(|| Account::new(change.user_id, None, now));

    if let Some(expected) = change.expected_version {
        if expected != account.version {
            return Err(CommitError::VersionConflict {
                user_id: change.user_id,
                expected,
                found: account.version,
            });
        }
    }

    let next = account
        .balance
        .checked_add(change.delta)
        .ok_or_else(|| StorageError::CorruptedData("account balance overflow".to_string()))?;
    if next < 0 {
        return Err(CommitError::InsufficientFunds {
            balance: account.balance,
            required: -change.delta,
        });
    }

    account.balance = next;
    if let Some(name) = change.display_name {
        account.display_name = Some(name);
    }
    if let Some(at) = change.set_last_bonus_at {
        account.last_bonus_at = Some(at);
    }
    account.version += 1;
    account.updated_at = now;
    Ok(account)
}
