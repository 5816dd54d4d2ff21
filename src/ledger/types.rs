//! Ledger records: accounts, the house row, the transaction log and the
//! per-user aggregates derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::games::GameKind;

/// Opaque, already-authenticated user identifier
pub type UserId = u64;

/// Chip amounts and deltas
pub type Chips = i64;

/// Fixed id under which house-only entries are logged
pub const HOUSE_ID: UserId = 0;

/// A player's chip account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Chips,
    /// Last seen display name
    pub display_name: Option<String>,
    /// Bumped on every committed change
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default)]
    pub withdrawal_address: Option<String>,
    #[serde(default)]
    pub last_bonus_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(user_id: UserId, display_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            display_name,
            version: 0,
            created_at: now,
            updated_at: now,
            deposit_address: None,
            withdrawal_address: None,
            last_bonus_at: None,
        }
    }
}

/// The singleton counterparty of every wager
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HouseAccount {
    pub balance: Chips,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    WithdrawalPending,
    WithdrawalReversal,
    GameWin,
    GameLoss,
    GamePush,
    DailyBonus,
    AdminCredit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::WithdrawalPending => "withdrawal_pending",
            TransactionKind::WithdrawalReversal => "withdrawal_reversal",
            TransactionKind::GameWin => "game_win",
            TransactionKind::GameLoss => "game_loss",
            TransactionKind::GamePush => "game_push",
            TransactionKind::DailyBonus => "daily_bonus",
            TransactionKind::AdminCredit => "admin_credit",
        }
    }

    /// Game entries move chips between a user and the house and must net to zero
    pub fn is_game(&self) -> bool {
        matches!(
            self,
            TransactionKind::GameWin | TransactionKind::GameLoss | TransactionKind::GamePush
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Assigned at commit, strictly increasing
    pub id: u64,
    pub user_id: UserId,
    /// Signed change of the user's balance
    pub amount: Chips,
    /// Signed change of the house balance
    pub house_delta: Chips,
    pub kind: TransactionKind,
    #[serde(default)]
    pub game: Option<GameKind>,
    /// Stake of a game entry
    #[serde(default)]
    pub wager: Option<Chips>,
    /// Amount in external base units (litoshi)
    #[serde(default)]
    pub external_amount: Option<u64>,
    #[serde(default)]
    pub external_txid: Option<String>,
    /// Entry this one refers to (withdrawal completion/reversal)
    #[serde(default)]
    pub reference: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Label in the style of the chat bot history, e.g. `coinflip_win`
    pub fn label(&self) -> String {
        match (self.game, self.kind) {
            (Some(game), TransactionKind::GameWin) => format!("{}_win", game),
            (Some(game), TransactionKind::GameLoss) => format!("{}_loss", game),
            (Some(game), TransactionKind::GamePush) => format!("{}_push", game),
            (_, kind) => kind.as_str().to_string(),
        }
    }
}

/// A transaction before the ledger assigns its id
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionDraft {
    pub user_id: UserId,
    pub amount: Chips,
    pub house_delta: Chips,
    pub kind: TransactionKind,
    pub game: Option<GameKind>,
    pub wager: Option<Chips>,
    pub external_amount: Option<u64>,
    pub external_txid: Option<String>,
    pub reference: Option<u64>,
}

impl TransactionDraft {
    pub fn new(user_id: UserId, amount: Chips, kind: TransactionKind) -> Self {
        Self {
            user_id,
            amount,
            house_delta: 0,
            kind,
            game: None,
            wager: None,
            external_amount: None,
            external_txid: None,
            reference: None,
        }
    }

    pub fn with_house_delta(mut self, house_delta: Chips) -> Self {
        self.house_delta = house_delta;
        self
    }

    pub fn with_game(mut self, game: GameKind, wager: Chips) -> Self {
        self.game = Some(game);
        self.wager = Some(wager);
        self
    }

    pub fn with_external(mut self, amount: Option<u64>, txid: Option<String>) -> Self {
        self.external_amount = amount;
        self.external_txid = txid;
        self
    }

    pub fn with_reference(mut self, reference: u64) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn into_transaction(self, id: u64, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            amount: self.amount,
            house_delta: self.house_delta,
            kind: self.kind,
            game: self.game,
            wager: self.wager,
            external_amount: self.external_amount,
            external_txid: self.external_txid,
            reference: self.reference,
            timestamp,
        }
    }
}

/// Running wager aggregates per user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerStats {
    /// Rounds that moved chips (wins and losses)
    pub total_bets: u64,
    pub total_wagered: Chips,
    pub total_won: Chips,
    pub total_lost: Chips,
    pub biggest_win: Chips,
    /// All rounds, pushes included
    pub games_played: u64,
}

impl WagerStats {
    /// Fold one log entry into the aggregates; non-game entries are ignored
    pub fn record(&mut self, tx: &Transaction) {
        if !tx.kind.is_game() {
            return;
        }
        let wager = tx.wager.unwrap_or(0);
        self.games_played += 1;
        self.total_wagered += wager;
        match tx.kind {
            TransactionKind::GameWin => {
                self.total_bets += 1;
                self.total_won += tx.amount;
                self.biggest_win = self.biggest_win.max(tx.amount);
            }
            TransactionKind::GameLoss => {
                self.total_bets += 1;
                self.total_lost += -tx.amount;
            }
            _ => {}
        }
    }

    pub fn net(&self) -> Chips {
        self.total_won - self.total_lost
    }
}

/// External deposit observed on the feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingExternalDeposit {
    /// Unique external transaction id
    pub external_txid: String,
    pub user_id: UserId,
    #[serde(default)]
    pub address: Option<String>,
    /// Claimed amount in base units
    pub external_amount: u64,
    pub confirmations: u32,
    pub processed: bool,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Log entry that credited it
    #[serde(default)]
    pub credited_transaction: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Reversed,
}

/// A withdrawal reserved against a user's chips
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    /// Id of the `withdrawal_pending` log entry
    pub id: u64,
    pub user_id: UserId,
    pub chips: Chips,
    pub external_amount: u64,
    pub address: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_txid: Option<String>,
}

/// Balance change for the one user touched by a batch
#[derive(Clone, Debug, PartialEq)]
pub struct AccountChange {
    pub user_id: UserId,
    pub delta: Chips,
    pub display_name: Option<String>,
    /// Optimistic check against the version read before deciding
    pub expected_version: Option<u64>,
    pub set_last_bonus_at: Option<DateTime<Utc>>,
}

impl AccountChange {
    pub fn new(user_id: UserId, delta: Chips) -> Self {
        Self {
            user_id,
            delta,
            display_name: None,
            expected_version: None,
            set_last_bonus_at: None,
        }
    }

    pub fn named(mut self, display_name: Option<&str>) -> Self {
        self.display_name = display_name.map(str::to_string);
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Deposit bookkeeping committed with the credit
#[derive(Clone, Debug, PartialEq)]
pub struct DepositChange {
    pub external_txid: String,
    pub user_id: UserId,
    pub address: Option<String>,
    pub external_amount: u64,
    pub confirmations: u32,
}

/// Withdrawal bookkeeping committed with the balance change
#[derive(Clone, Debug, PartialEq)]
pub enum WithdrawalChange {
    /// Open a pending withdrawal; its id becomes the batch's transaction id
    Open {
        user_id: UserId,
        chips: Chips,
        external_amount: u64,
        address: String,
    },
    /// Move a pending withdrawal to a final status
    Resolve {
        id: u64,
        status: WithdrawalStatus,
        external_txid: Option<String>,
    },
}

/// One atomic unit of ledger mutation.
///
/// Every field is applied together or not at all.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct LedgerBatch {
    pub account: Option<AccountChange>,
    pub house_delta: Chips,
    pub transaction: Option<TransactionDraft>,
    pub deposit: Option<DepositChange>,
    pub withdrawal: Option<WithdrawalChange>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, change: AccountChange) -> Self {
        self.account = Some(change);
        self
    }

    pub fn house(mut self, delta: Chips) -> Self {
        self.house_delta = delta;
        self
    }

    pub fn record(mut self, draft: TransactionDraft) -> Self {
        self.transaction = Some(draft);
        self
    }

    pub fn deposit(mut self, change: DepositChange) -> Self {
        self.deposit = Some(change);
        self
    }

    pub fn withdrawal(mut self, change: WithdrawalChange) -> Self {
        self.withdrawal = Some(change);
        self
    }
}

/// State after a successful commit
#[derive(Clone, Debug, PartialEq)]
pub struct CommitReceipt {
    pub account: Option<Account>,
    pub house: HouseAccount,
    pub transaction: Option<Transaction>,
}

/// Non-balance account fields
#[derive(Clone, Debug, PartialEq)]
pub enum ProfileUpdate {
    DisplayName(String),
    DepositAddress(String),
    WithdrawalAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: TransactionKind, amount: Chips, wager: Chips) -> Transaction {
        TransactionDraft::new(1, amount, kind)
            .with_house_delta(-amount)
            .with_game(GameKind::Dice, wager)
            .into_transaction(1, Utc::now())
    }

    #[test]
    fn test_labels_carry_game() {
        assert_eq!(entry(TransactionKind::GameWin, 10, 10).label(), "dice_win");
        assert_eq!(entry(TransactionKind::GameLoss, -10, 10).label(), "dice_loss");

        let bonus = TransactionDraft::new(1, 500, TransactionKind::DailyBonus)
            .into_transaction(2, Utc::now());
        assert_eq!(bonus.label(), "daily_bonus");
    }

    #[test]
    fn test_stats_fold() {
        let mut stats = WagerStats::default();
        stats.record(&entry(TransactionKind::GameWin, 50, 10));
        stats.record(&entry(TransactionKind::GameLoss, -20, 20));
        stats.record(&entry(TransactionKind::GamePush, 0, 5));
        stats.record(&TransactionDraft::new(1, 100, TransactionKind::Deposit).into_transaction(9, Utc::now()));

        assert_eq!(stats.total_bets, 2);
        assert_eq!(stats.games_played, 3);
        assert_eq!(stats.total_wagered, 35);
        assert_eq!(stats.total_won, 50);
        assert_eq!(stats.total_lost, 20);
        assert_eq!(stats.biggest_win, 50);
        assert_eq!(stats.net(), 30);
    }
}
