//! Deposit and withdrawal reconciler.
//!
//! Value entering or leaving the chip economy goes through here: external
//! deposits, withdrawals, daily bonuses and manual credits. None of these
//! touch the house side of a game, so they are logged under their own kinds
//! and excluded from zero-sum checks.
//!
//! Deposits are attributed through per-user deposit addresses. The external
//! feed is untrusted: it is queried without holding any account lock, under
//! a timeout, and every transfer is re-checked against the address registry
//! before it is credited. The external txid is the idempotency key; a given
//! transfer is credited at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{BonusConfig, DepositConfig, EngineConfig};
use crate::errors::{EngineError, EngineResult, StorageError};
use crate::ledger::backend::CommitError;
use crate::ledger::types::*;
use crate::ledger::{ensure_player, Ledger};

/// One transfer as reported by the external feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTransfer {
    pub txid: String,
    /// Receiving address
    pub address: String,
    /// Amount in base units
    pub amount_units: u64,
    pub confirmations: u32,
}

/// Source of incoming transfers
#[async_trait]
pub trait ExternalFeed: Send + Sync {
    async fn transfers_to(&self, address: &str) -> EngineResult<Vec<ExternalTransfer>>;
}

/// Feed backed by a JSON file holding an array of [`ExternalTransfer`]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ExternalFeed for FileFeed {
    async fn transfers_to(&self, address: &str) -> EngineResult<Vec<ExternalTransfer>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::ExternalFeed(format!("{}: {}", self.path.display(), e)))?;
        let transfers: Vec<ExternalTransfer> = serde_json::from_str(&content)
            .map_err(|e| EngineError::ExternalFeed(format!("{}: {}", self.path.display(), e)))?;
        Ok(transfers.into_iter().filter(|t| t.address == address).collect())
    }
}

/// A deposit to credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositNotice {
    pub user_id: UserId,
    pub external_txid: String,
    pub amount_units: u64,
    pub confirmations: u32,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DepositOutcome {
    Credited {
        chips: Chips,
        balance: Chips,
        transaction: Transaction,
    },
    /// Seen but not yet confirmed enough; retried on a later poll
    Pending { confirmations: u32, required: u32 },
    /// Credited before; nothing changed
    AlreadyProcessed { external_txid: String },
}

/// Tally of one feed poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub addresses: usize,
    pub credited: usize,
    pub credited_chips: Chips,
    pub pending: usize,
    pub already_processed: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalReceipt {
    pub withdrawal: WithdrawalRecord,
    pub balance: Chips,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BonusReceipt {
    pub amount: Chips,
    pub balance: Chips,
    pub next_claim_at: DateTime<Utc>,
    pub transaction: Transaction,
}

/// Litecoin-style address check: starts with `L` or `M`, at least 26 chars
pub fn validate_address(address: &str) -> EngineResult<()> {
    let prefix_ok = address.starts_with('L') || address.starts_with('M');
    if !prefix_ok || address.len() < 26 {
        return Err(EngineError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Chips for an external amount, rounded down
pub fn units_to_chips(units: u64, config: &DepositConfig) -> Chips {
    if config.base_units_per_coin == 0 {
        return 0;
    }
    let chips = units as u128 * config.chips_per_coin as u128 / config.base_units_per_coin as u128;
    Chips::try_from(chips).unwrap_or(Chips::MAX)
}

/// External amount owed for chips, rounded down
pub fn chips_to_units(chips: Chips, config: &DepositConfig) -> u64 {
    if config.chips_per_coin == 0 || chips <= 0 {
        return 0;
    }
    let units = chips as u128 * config.base_units_per_coin as u128 / config.chips_per_coin as u128;
    u64::try_from(units).unwrap_or(u64::MAX)
}

pub struct Reconciler {
    ledger: Arc<Ledger>,
    deposits: DepositConfig,
    bonus: BonusConfig,
}

impl Reconciler {
    pub fn new(ledger: Arc<Ledger>, config: &EngineConfig) -> Self {
        Self {
            ledger,
            deposits: config.deposits.clone(),
            bonus: config.bonus.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.deposits.feed_timeout_ms)
    }

    // ---- deposits ----

    /// Attribute future transfers to `address` to this user
    pub fn register_deposit_address(&self, user_id: UserId, address: &str) -> EngineResult<Account> {
        validate_address(address)?;
        let account = self
            .ledger
            .update_profile(user_id, ProfileUpdate::DepositAddress(address.to_string()))?;
        info!(user_id, address, "Registered deposit address");
        Ok(account)
    }

    /// Credit a deposit once it has enough confirmations
    pub async fn credit_deposit(&self, notice: DepositNotice) -> EngineResult<DepositOutcome> {
        ensure_player(notice.user_id)?;
        let chips = units_to_chips(notice.amount_units, &self.deposits);
        if chips <= 0 {
            return Err(EngineError::InvalidAmount(chips));
        }

        let backend = self.ledger.backend();
        if let Some(existing) = backend.pending_deposit(&notice.external_txid)? {
            if existing.processed {
                debug!(external_txid = %notice.external_txid, "Deposit already processed");
                return Ok(DepositOutcome::AlreadyProcessed {
                    external_txid: notice.external_txid,
                });
            }
        }

        if notice.confirmations < self.deposits.min_confirmations {
            let pending = PendingExternalDeposit {
                external_txid: notice.external_txid.clone(),
                user_id: notice.user_id,
                address: notice.address.clone(),
                external_amount: notice.amount_units,
                confirmations: notice.confirmations,
                processed: false,
                first_seen: self.ledger.clock().now(),
                processed_at: None,
                credited_transaction: None,
            };
            return match backend.record_pending_deposit(pending) {
                Ok(_) => {
                    debug!(
                        external_txid = %notice.external_txid,
                        confirmations = notice.confirmations,
                        "Deposit awaiting confirmations"
                    );
                    Ok(DepositOutcome::Pending {
                        confirmations: notice.confirmations,
                        required: self.deposits.min_confirmations,
                    })
                }
                Err(CommitError::AlreadyProcessed { external_txid }) => {
                    Ok(DepositOutcome::AlreadyProcessed { external_txid })
                }
                Err(e) => Err(e.into()),
            };
        }

        let _guard = self.ledger.lock_account(notice.user_id).await;
        let batch = LedgerBatch::new()
            .account(AccountChange::new(notice.user_id, chips))
            .record(
                TransactionDraft::new(notice.user_id, chips, TransactionKind::Deposit)
                    .with_external(Some(notice.amount_units), Some(notice.external_txid.clone())),
            )
            .deposit(DepositChange {
                external_txid: notice.external_txid.clone(),
                user_id: notice.user_id,
                address: notice.address.clone(),
                external_amount: notice.amount_units,
                confirmations: notice.confirmations,
            });

        match self.ledger.commit(batch) {
            Ok(receipt) => {
                let (Some(account), Some(transaction)) = (receipt.account, receipt.transaction) else {
                    return Err(StorageError::CorruptedData("deposit commit returned no rows".to_string()).into());
                };
                info!(
                    user_id = notice.user_id,
                    external_txid = %notice.external_txid,
                    amount_units = notice.amount_units,
                    chips,
                    balance = account.balance,
                    "Deposit credited"
                );
                Ok(DepositOutcome::Credited {
                    chips,
                    balance: account.balance,
                    transaction,
                })
            }
            Err(CommitError::AlreadyProcessed { external_txid }) => {
                Ok(DepositOutcome::AlreadyProcessed { external_txid })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch transfers for every registered address and credit them.
    ///
    /// All lookups finish before the ledger is touched, so a feed timeout or
    /// error leaves the ledger unchanged.
    pub async fn poll_deposits(&self, feed: &dyn ExternalFeed) -> EngineResult<PollSummary> {
        let registered = self.ledger.backend().deposit_addresses()?;
        let timeout = self.feed_timeout();
        let timeout_ms = self.deposits.feed_timeout_ms;

        let mut fetched: Vec<(String, UserId, Vec<ExternalTransfer>)> = Vec::with_capacity(registered.len());
        for (address, user_id) in registered {
            let transfers = tokio::time::timeout(timeout, feed.transfers_to(&address))
                .await
                .map_err(|_| EngineError::ExternalFeedTimeout { timeout_ms })??;
            fetched.push((address, user_id, transfers));
        }

        let mut summary = PollSummary {
            addresses: fetched.len(),
            ..Default::default()
        };

        if let Some(house_address) = &self.deposits.house_address {
            let transfers = tokio::time::timeout(timeout, feed.transfers_to(house_address))
                .await
                .map_err(|_| EngineError::ExternalFeedTimeout { timeout_ms })??;
            for transfer in transfers {
                // no way to tell who sent it
                warn!(
                    external_txid = %transfer.txid,
                    amount_units = transfer.amount_units,
                    "Transfer to house address cannot be attributed to a user"
                );
                summary.unmatched += 1;
            }
        }

        for (address, user_id, transfers) in fetched {
            for transfer in transfers {
                if transfer.address != address {
                    warn!(external_txid = %transfer.txid, address = %transfer.address, "Feed returned transfer for another address");
                    summary.unmatched += 1;
                    continue;
                }
                // the registry may have changed while the feed was queried
                if self.ledger.backend().owner_of_address(&address)? != Some(user_id) {
                    warn!(external_txid = %transfer.txid, address = %address, "Deposit address changed owner, skipping");
                    summary.unmatched += 1;
                    continue;
                }

                let notice = DepositNotice {
                    user_id,
                    external_txid: transfer.txid,
                    amount_units: transfer.amount_units,
                    confirmations: transfer.confirmations,
                    address: Some(address.clone()),
                };
                match self.credit_deposit(notice).await {
                    Ok(DepositOutcome::Credited { chips, .. }) => {
                        summary.credited += 1;
                        summary.credited_chips += chips;
                    }
                    Ok(DepositOutcome::Pending { .. }) => summary.pending += 1,
                    Ok(DepositOutcome::AlreadyProcessed { .. }) => summary.already_processed += 1,
                    Err(EngineError::InvalidAmount(_)) => summary.unmatched += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            addresses = summary.addresses,
            credited = summary.credited,
            pending = summary.pending,
            "Deposit poll finished"
        );
        Ok(summary)
    }

    // ---- withdrawals ----

    pub fn set_withdrawal_address(
        &self,
        user_id: UserId,
        address: &str,
        display_name: Option<&str>,
    ) -> EngineResult<Account> {
        validate_address(address)?;
        let mut account = self
            .ledger
            .update_profile(user_id, ProfileUpdate::WithdrawalAddress(address.to_string()))?;
        if let Some(name) = display_name {
            account = self
                .ledger
                .update_profile(user_id, ProfileUpdate::DisplayName(name.to_string()))?;
        }
        Ok(account)
    }

    /// Debit `chips` now and open a pending withdrawal for manual payout
    pub async fn request_withdrawal(&self, user_id: UserId, chips: Chips) -> EngineResult<WithdrawalReceipt> {
        ensure_player(user_id)?;
        if chips <= 0 {
            return Err(EngineError::InvalidAmount(chips));
        }

        let _guard = self.ledger.lock_account(user_id).await;
        let address = self
            .ledger
            .account(user_id)?
            .and_then(|a| a.withdrawal_address)
            .ok_or(EngineError::MissingWithdrawalAddress { user_id })?;
        let external_amount = chips_to_units(chips, &self.deposits);

        let batch = LedgerBatch::new()
            .account(AccountChange::new(user_id, -chips))
            .record(
                TransactionDraft::new(user_id, -chips, TransactionKind::WithdrawalPending)
                    .with_external(Some(external_amount), None),
            )
            .withdrawal(WithdrawalChange::Open {
                user_id,
                chips,
                external_amount,
                address: address.clone(),
            });
        let receipt = self.ledger.commit(batch)?;
        let (Some(account), Some(transaction)) = (receipt.account, receipt.transaction) else {
            return Err(StorageError::CorruptedData("withdrawal commit returned no rows".to_string()).into());
        };
        let withdrawal = self
            .ledger
            .backend()
            .withdrawal(transaction.id)?
            .ok_or(EngineError::UnknownWithdrawal(transaction.id))?;

        info!(
            user_id,
            withdrawal_id = withdrawal.id,
            chips,
            external_amount,
            address = %address,
            "Withdrawal requested"
        );
        Ok(WithdrawalReceipt {
            withdrawal,
            balance: account.balance,
            transaction,
        })
    }

    /// Mark a pending withdrawal paid out
    pub async fn complete_withdrawal(&self, id: u64, external_txid: Option<String>) -> EngineResult<WithdrawalReceipt> {
        let record = self.pending_withdrawal(id)?;
        let _guard = self.ledger.lock_account(record.user_id).await;

        let batch = LedgerBatch::new()
            .record(
                TransactionDraft::new(record.user_id, 0, TransactionKind::Withdrawal)
                    .with_external(Some(record.external_amount), external_txid.clone())
                    .with_reference(id),
            )
            .withdrawal(WithdrawalChange::Resolve {
                id,
                status: WithdrawalStatus::Completed,
                external_txid,
            });
        let receipt = self.ledger.commit(batch)?;
        info!(user_id = record.user_id, withdrawal_id = id, "Withdrawal completed");
        self.resolved(id, receipt)
    }

    /// Return the chips of a failed payout as a separate credit
    pub async fn reverse_withdrawal(&self, id: u64) -> EngineResult<WithdrawalReceipt> {
        let record = self.pending_withdrawal(id)?;
        let _guard = self.ledger.lock_account(record.user_id).await;

        let batch = LedgerBatch::new()
            .account(AccountChange::new(record.user_id, record.chips))
            .record(
                TransactionDraft::new(record.user_id, record.chips, TransactionKind::WithdrawalReversal)
                    .with_external(Some(record.external_amount), None)
                    .with_reference(id),
            )
            .withdrawal(WithdrawalChange::Resolve {
                id,
                status: WithdrawalStatus::Reversed,
                external_txid: None,
            });
        let receipt = self.ledger.commit(batch)?;
        warn!(user_id = record.user_id, withdrawal_id = id, chips = record.chips, "Withdrawal reversed");
        self.resolved(id, receipt)
    }

    fn pending_withdrawal(&self, id: u64) -> EngineResult<WithdrawalRecord> {
        let record = self
            .ledger
            .backend()
            .withdrawal(id)?
            .ok_or(EngineError::UnknownWithdrawal(id))?;
        if record.status != WithdrawalStatus::Pending {
            return Err(EngineError::WithdrawalNotPending { id, status: record.status });
        }
        Ok(record)
    }

    fn resolved(&self, id: u64, receipt: CommitReceipt) -> EngineResult<WithdrawalReceipt> {
        let withdrawal = self
            .ledger
            .backend()
            .withdrawal(id)?
            .ok_or(EngineError::UnknownWithdrawal(id))?;
        let transaction = receipt
            .transaction
            .ok_or_else(|| StorageError::CorruptedData("withdrawal commit returned no entry".to_string()))?;
        let balance = match receipt.account {
            Some(account) => account.balance,
            None => self.ledger.get_balance(withdrawal.user_id)?,
        };
        Ok(WithdrawalReceipt {
            withdrawal,
            balance,
            transaction,
        })
    }

    /// Withdrawals still waiting for an operator
    pub fn pending_withdrawals(&self) -> EngineResult<Vec<WithdrawalRecord>> {
        Ok(self
            .ledger
            .backend()
            .withdrawals()?
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .collect())
    }

    // ---- bonuses and manual credits ----

    /// One bonus per user per interval
    pub async fn claim_daily_bonus(&self, user_id: UserId, display_name: Option<&str>) -> EngineResult<BonusReceipt> {
        ensure_player(user_id)?;
        let _guard = self.ledger.lock_account(user_id).await;
        let now = self.ledger.clock().now();
        let interval = chrono::Duration::from_std(Duration::from_secs(self.bonus.interval_secs))
            .unwrap_or_else(|_| chrono::Duration::days(3650));

        let account = self.ledger.account(user_id)?;
        let version = account.as_ref().map(|a| a.version).unwrap_or(0);
        if let Some(last) = account.as_ref().and_then(|a| a.last_bonus_at) {
            let next = last + interval;
            if now < next {
                let wait = (next - now).num_milliseconds() as f64 / 1_000.0;
                return Err(EngineError::DailyBonusNotReady { retry_after_secs: wait });
            }
        }

        let amount = self.bonus.daily_amount;
        let change = AccountChange {
            set_last_bonus_at: Some(now),
            ..AccountChange::new(user_id, amount).named(display_name).expecting(version)
        };
        let batch = LedgerBatch::new()
            .account(change)
            .record(TransactionDraft::new(user_id, amount, TransactionKind::DailyBonus));
        let receipt = self.ledger.commit(batch)?;
        let (Some(account), Some(transaction)) = (receipt.account, receipt.transaction) else {
            return Err(StorageError::CorruptedData("bonus commit returned no rows".to_string()).into());
        };

        info!(user_id, amount, balance = account.balance, "Daily bonus claimed");
        Ok(BonusReceipt {
            amount,
            balance: account.balance,
            next_claim_at: now + interval,
            transaction,
        })
    }

    /// Operator credit, e.g. a deposit confirmed by hand
    pub async fn admin_credit(
        &self,
        user_id: UserId,
        chips: Chips,
        external_amount: Option<u64>,
        external_txid: Option<String>,
    ) -> EngineResult<Transaction> {
        ensure_player(user_id)?;
        if chips <= 0 {
            return Err(EngineError::InvalidAmount(chips));
        }
        let _guard = self.ledger.lock_account(user_id).await;
        let batch = LedgerBatch::new()
            .account(AccountChange::new(user_id, chips))
            .record(
                TransactionDraft::new(user_id, chips, TransactionKind::AdminCredit)
                    .with_external(external_amount, external_txid),
            );
        let receipt = self.ledger.commit(batch)?;
        info!(user_id, chips, "Admin credit applied");
        receipt
            .transaction
            .ok_or_else(|| StorageError::CorruptedData("credit commit returned no entry".to_string()).into())
    }

    /// Top up the house bankroll
    pub async fn fund_house(&self, chips: Chips) -> EngineResult<HouseAccount> {
        if chips <= 0 {
            return Err(EngineError::InvalidAmount(chips));
        }
        let batch = LedgerBatch::new().house(chips).record(
            TransactionDraft::new(HOUSE_ID, 0, TransactionKind::AdminCredit).with_house_delta(chips),
        );
        let receipt = self.ledger.commit(batch)?;
        info!(chips, house_balance = receipt.house.balance, "House funded");
        Ok(receipt.house)
    }
}

/// In-memory feed keyed by address
#[derive(Debug, Default, Clone)]
pub struct StaticFeed {
    transfers: HashMap<String, Vec<ExternalTransfer>>,
    delay: Option<Duration>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transfer(mut self, transfer: ExternalTransfer) -> Self {
        self.transfers.entry(transfer.address.clone()).or_default().push(transfer);
        self
    }

    /// Answer every lookup only after `delay`
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ExternalFeed for StaticFeed {
    async fn transfers_to(&self, address: &str) -> EngineResult<Vec<ExternalTransfer>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.transfers.get(address).cloned().unwrap_or_default())
    }
}
