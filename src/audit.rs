//! Audit trail checks and reconciliation alerts.
//!
//! Balances can always be rebuilt from the transaction log: replaying every
//! entry's `amount` per user and `house_delta` for the house, on top of the
//! seeded house bankroll, must land on the live rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{error, info};

use crate::errors::{EngineResult, StorageError};
use crate::ledger::types::{Chips, Transaction, UserId, HOUSE_ID};
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Balance change committed but its stats could not be written
    StatsWriteFailed,
    BalanceMismatch,
    ZeroSumViolation,
}

/// Discrepancy an operator has to look at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationAlert {
    pub kind: AlertKind,
    pub user_id: Option<UserId>,
    pub transaction_id: Option<u64>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Retained alerts; every alert is also logged at error level
#[derive(Debug, Default)]
pub struct AlertLog {
    alerts: Mutex<Vec<ReconciliationAlert>>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, alert: ReconciliationAlert) {
        error!(
            target: "chiphouse::reconciliation",
            kind = ?alert.kind,
            user_id = ?alert.user_id,
            transaction_id = ?alert.transaction_id,
            "{}",
            alert.message
        );
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert);
    }

    pub fn snapshot(&self) -> Vec<ReconciliationAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Hand the alerts over, e.g. after an operator acknowledged them
    pub fn drain(&self) -> Vec<ReconciliationAlert> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Balances rebuilt from the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayedBalances {
    pub users: BTreeMap<UserId, Chips>,
    pub house: Chips,
    pub entries: usize,
}

/// Rebuild balances from `transactions`, starting the house at `initial_house`
pub fn replay<'a, I>(transactions: I, initial_house: Chips) -> ReplayedBalances
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut replayed = ReplayedBalances {
        house: initial_house,
        ..Default::default()
    };
    for tx in transactions {
        if tx.user_id != HOUSE_ID {
            *replayed.users.entry(tx.user_id).or_insert(0) += tx.amount;
        }
        replayed.house += tx.house_delta;
        replayed.entries += 1;
    }
    replayed
}

/// Game entries whose user and house sides do not cancel
pub fn zero_sum_violations<'a, I>(transactions: I) -> Vec<u64>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    transactions
        .into_iter()
        .filter(|tx| tx.kind.is_game() && tx.amount + tx.house_delta != 0)
        .map(|tx| tx.id)
        .collect()
}

/// SHA-256 over the serialized log, in id order
pub fn log_digest(transactions: &[Transaction]) -> Result<String, StorageError> {
    let mut hasher = Sha256::new();
    for tx in transactions {
        let bytes = serde_json::to_vec(tx)
            .map_err(|e| StorageError::CorruptedData(format!("Failed to encode tx {}: {}", tx.id, e)))?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub user_id: UserId,
    pub live: Chips,
    pub replayed: Chips,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub entries: usize,
    pub accounts_checked: usize,
    pub mismatches: Vec<BalanceMismatch>,
    pub house_live: Chips,
    pub house_replayed: Chips,
    pub zero_sum_violations: Vec<u64>,
    pub negative_balances: Vec<UserId>,
    pub log_digest: String,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
            && self.house_live == self.house_replayed
            && self.zero_sum_violations.is_empty()
            && self.negative_balances.is_empty()
            && self.house_live >= 0
    }

    /// Turn every finding into an alert
    pub fn raise_alerts(&self, alerts: &AlertLog, now: DateTime<Utc>) {
        for m in &self.mismatches {
            alerts.raise(ReconciliationAlert {
                kind: AlertKind::BalanceMismatch,
                user_id: Some(m.user_id),
                transaction_id: None,
                message: format!("live balance {} but log replays to {}", m.live, m.replayed),
                raised_at: now,
            });
        }
        if self.house_live != self.house_replayed {
            alerts.raise(ReconciliationAlert {
                kind: AlertKind::BalanceMismatch,
                user_id: Some(HOUSE_ID),
                transaction_id: None,
                message: format!(
                    "house balance {} but log replays to {}",
                    self.house_live, self.house_replayed
                ),
                raised_at: now,
            });
        }
        for &id in &self.zero_sum_violations {
            alerts.raise(ReconciliationAlert {
                kind: AlertKind::ZeroSumViolation,
                user_id: None,
                transaction_id: Some(id),
                message: "game entry does not net to zero".to_string(),
                raised_at: now,
            });
        }
    }
}

/// Compare the live ledger against a replay of its own log
pub fn reconcile(ledger: &Ledger, initial_house: Chips) -> EngineResult<AuditReport> {
    let log = ledger.all_transactions()?;
    let replayed = replay(&log, initial_house);
    let accounts = ledger.accounts()?;

    let mut mismatches = Vec::new();
    let mut negative_balances = Vec::new();
    for account in &accounts {
        let expected = replayed.users.get(&account.user_id).copied().unwrap_or(0);
        if expected != account.balance {
            mismatches.push(BalanceMismatch {
                user_id: account.user_id,
                live: account.balance,
                replayed: expected,
            });
        }
        if account.balance < 0 {
            negative_balances.push(account.user_id);
        }
    }
    // users present only in the log
    for (&user_id, &balance) in &replayed.users {
        if balance != 0 && !accounts.iter().any(|a| a.user_id == user_id) {
            mismatches.push(BalanceMismatch { user_id, live: 0, replayed: balance });
        }
    }

    let report = AuditReport {
        entries: replayed.entries,
        accounts_checked: accounts.len(),
        mismatches,
        house_live: ledger.get_house_balance()?,
        house_replayed: replayed.house,
        zero_sum_violations: zero_sum_violations(&log),
        negative_balances,
        log_digest: log_digest(&log)?,
    };

    info!(
        entries = report.entries,
        accounts = report.accounts_checked,
        clean = report.is_clean(),
        "Ledger reconciled"
    );
    Ok(report)
}
