//! Settlement coordinator.
//!
//! One wager walks
//! `Requested → Validated → RateChecked → OutcomeResolved → LedgerApplied → Recorded`
//! and can only be rejected before anything is committed. The balance
//! checks, the draw and the commit all happen under the player's account
//! lock. The commit itself moves the stake between player and house and
//! appends the log entry as one batch. A write conflict sends the wager back
//! to `RateChecked` for a bounded number of fresh attempts. A commit refused
//! for any other reason rejects the wager; a resolved outcome is never
//! redrawn to get past a balance floor.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AlertKind, AlertLog, ReconciliationAlert};
use crate::config::{BettingConfig, EngineConfig};
use crate::errors::{EngineError, EngineResult};
use crate::games::{GameDetail, GameEngine, GameKind, GameRequest, Outcome, Resolution};
use crate::ledger::types::*;
use crate::ledger::{ensure_player, Ledger};
use crate::metrics::SettlementMetrics;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Requested,
    Validated,
    RateChecked,
    OutcomeResolved,
    LedgerApplied,
    Recorded,
    Rejected,
}

impl SettlementState {
    pub fn can_transition_to(self, next: SettlementState) -> bool {
        use SettlementState::*;
        matches!(
            (self, next),
            (Requested, Validated)
                | (Validated, RateChecked)
                | (RateChecked, OutcomeResolved)
                | (OutcomeResolved, LedgerApplied)
                | (LedgerApplied, Recorded)
                // write conflict: nothing was committed, try again
                | (OutcomeResolved, RateChecked)
                // commit refused, nothing was committed
                | (OutcomeResolved, Rejected)
                | (Requested, Rejected)
                | (Validated, Rejected)
                | (RateChecked, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SettlementState::Recorded | SettlementState::Rejected)
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A parsed wager from the front end
#[derive(Debug, Clone, PartialEq)]
pub struct WagerRequest {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub stake: Chips,
    pub game: GameRequest,
}

impl WagerRequest {
    pub fn new(user_id: UserId, stake: Chips, game: GameRequest) -> Self {
        Self {
            user_id,
            display_name: None,
            stake,
            game,
        }
    }

    pub fn named(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }
}

/// A settled wager
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub settlement_id: Uuid,
    pub user_id: UserId,
    pub game: GameKind,
    pub stake: Chips,
    pub resolution: Resolution,
    /// Signed change of the player's balance; the house moved the opposite
    pub user_delta: Chips,
    pub balance: Chips,
    pub house_balance: Chips,
    pub transaction: Transaction,
    pub attempts: u32,
    /// `None` when the stats write failed and an alert was raised
    pub stats: Option<WagerStats>,
    pub trail: Vec<SettlementState>,
}

impl SettlementReceipt {
    pub fn outcome(&self) -> Outcome {
        self.resolution.outcome
    }
}

/// Flat result for the command front end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WagerResponse {
    pub ok: bool,
    pub error_kind: Option<&'static str>,
    pub message: String,
    /// `None` when the balance could not be read after a rejection
    pub balance: Option<Chips>,
    pub house_balance: Option<Chips>,
    pub outcome: Option<Outcome>,
    /// What was drawn, for rendering the round
    pub detail: Option<GameDetail>,
    pub user_delta: Chips,
}

struct Progress {
    settlement_id: Uuid,
    user_id: UserId,
    game: GameKind,
    trail: Vec<SettlementState>,
}

impl Progress {
    fn new(settlement_id: Uuid, user_id: UserId, game: GameKind) -> Self {
        Self {
            settlement_id,
            user_id,
            game,
            trail: vec![SettlementState::Requested],
        }
    }

    fn state(&self) -> SettlementState {
        self.trail.last().copied().unwrap_or(SettlementState::Requested)
    }

    fn advance(&mut self, next: SettlementState) {
        let current = self.state();
        debug_assert!(current.can_transition_to(next), "{} -> {}", current, next);
        debug!(
            settlement_id = %self.settlement_id,
            user_id = self.user_id,
            game = %self.game,
            from = %current,
            to = %next,
            "Settlement transition"
        );
        self.trail.push(next);
    }
}

pub struct Settlement {
    ledger: Arc<Ledger>,
    rate_limiter: Arc<dyn RateLimiter>,
    engine: Arc<dyn GameEngine>,
    betting: BettingConfig,
    max_conflict_retries: u32,
    alerts: Arc<AlertLog>,
    metrics: Arc<SettlementMetrics>,
}

impl Settlement {
    pub fn new(
        ledger: Arc<Ledger>,
        rate_limiter: Arc<dyn RateLimiter>,
        engine: Arc<dyn GameEngine>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            rate_limiter,
            engine,
            betting: config.betting.clone(),
            max_conflict_retries: config.settlement.max_conflict_retries,
            alerts: Arc::new(AlertLog::new()),
            metrics: Arc::new(SettlementMetrics::new()),
        }
    }

    /// Share an alert log with other components
    pub fn with_alerts(mut self, alerts: Arc<AlertLog>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn alerts(&self) -> &Arc<AlertLog> {
        &self.alerts
    }

    pub fn metrics(&self) -> &Arc<SettlementMetrics> {
        &self.metrics
    }

    /// Settle one wager
    pub async fn settle(&self, request: WagerRequest) -> EngineResult<SettlementReceipt> {
        self.metrics.record_request();
        let mut progress = Progress::new(Uuid::new_v4(), request.user_id, request.game.kind());

        let result = self.run(&request, &mut progress).await;
        if let Err(e) = &result {
            if progress.state().can_transition_to(SettlementState::Rejected) {
                progress.advance(SettlementState::Rejected);
            }
            self.metrics.record_rejection();
            info!(
                settlement_id = %progress.settlement_id,
                user_id = request.user_id,
                game = %progress.game,
                stake = request.stake,
                reason = e.kind(),
                "Wager rejected: {}",
                e
            );
        }
        result
    }

    async fn run(&self, request: &WagerRequest, progress: &mut Progress) -> EngineResult<SettlementReceipt> {
        let user_id = request.user_id;
        let stake = request.stake;

        ensure_player(user_id)?;
        if stake < self.betting.min_bet || stake > self.betting.max_bet {
            return Err(EngineError::InvalidBetAmount {
                amount: stake,
                min: self.betting.min_bet,
                max: self.betting.max_bet,
            });
        }
        progress.advance(SettlementState::Validated);

        self.rate_limiter.try_acquire(user_id)?;
        progress.advance(SettlementState::RateChecked);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let guard = self.ledger.lock_account(user_id).await;

            let (balance, version) = match self.ledger.account(user_id)? {
                Some(account) => (account.balance, account.version),
                None => (0, 0),
            };
            if balance < stake {
                return Err(EngineError::InsufficientFunds { balance, required: stake });
            }

            let house_balance = self.ledger.get_house_balance()?;
            let max_payout = self.engine.max_payout(stake, &request.game);
            if house_balance < max_payout {
                return Err(EngineError::HouseInsufficientFunds {
                    house_balance,
                    required: max_payout,
                });
            }

            let resolution = self.engine.resolve(stake, &request.game);
            progress.advance(SettlementState::OutcomeResolved);

            let user_delta = resolution.user_delta(stake);
            let batch = settlement_batch(request, version, user_delta, resolution.outcome);

            let receipt = match self.ledger.commit(batch) {
                Ok(receipt) => receipt,
                Err(e) if e.is_conflict() => {
                    drop(guard);
                    self.metrics.record_conflict();
                    progress.advance(SettlementState::RateChecked);
                    warn!(
                        settlement_id = %progress.settlement_id,
                        user_id,
                        attempt,
                        "Ledger write conflict: {}",
                        e
                    );
                    if attempt > self.max_conflict_retries {
                        return Err(EngineError::LedgerWriteConflict { attempts: attempt });
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            progress.advance(SettlementState::LedgerApplied);
            self.metrics.record_settlement(stake, user_delta);

            // Committed: from here on the wager completes no matter what.
            let (Some(account), Some(transaction)) = (receipt.account, receipt.transaction) else {
                self.raise(user_id, None, "commit returned without account or log entry".to_string());
                return Err(EngineError::Storage(crate::errors::StorageError::CorruptedData(
                    "settlement commit returned no rows".to_string(),
                )));
            };

            let stats = match self.ledger.update_stats(&transaction) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    self.raise(
                        user_id,
                        Some(transaction.id),
                        format!("wager stats not updated for committed entry: {}", e),
                    );
                    None
                }
            };
            drop(guard);
            progress.advance(SettlementState::Recorded);

            info!(
                settlement_id = %progress.settlement_id,
                user_id,
                game = %progress.game,
                stake,
                outcome = %resolution.outcome,
                user_delta,
                balance = account.balance,
                house_balance = receipt.house.balance,
                tx_id = transaction.id,
                "Wager settled"
            );

            return Ok(SettlementReceipt {
                settlement_id: progress.settlement_id,
                user_id,
                game: progress.game,
                stake,
                resolution,
                user_delta,
                balance: account.balance,
                house_balance: receipt.house.balance,
                transaction,
                attempts: attempt,
                stats,
                trail: progress.trail.clone(),
            });
        }
    }

    fn raise(&self, user_id: UserId, transaction_id: Option<u64>, message: String) {
        self.metrics.record_alert();
        self.alerts.raise(ReconciliationAlert {
            kind: AlertKind::StatsWriteFailed,
            user_id: Some(user_id),
            transaction_id,
            message,
            raised_at: self.ledger.clock().now(),
        });
    }

    /// Settle and flatten the result for display
    pub async fn play(&self, request: WagerRequest) -> WagerResponse {
        let user_id = request.user_id;
        match self.settle(request).await {
            Ok(receipt) => WagerResponse {
                ok: true,
                error_kind: None,
                message: receipt.transaction.label(),
                balance: Some(receipt.balance),
                house_balance: Some(receipt.house_balance),
                outcome: Some(receipt.outcome()),
                detail: Some(receipt.resolution.detail.clone()),
                user_delta: receipt.user_delta,
            },
            Err(e) => WagerResponse {
                ok: false,
                error_kind: Some(e.kind()),
                message: e.to_string(),
                balance: self
                    .ledger
                    .get_balance(user_id)
                    .map_err(|read| warn!(user_id, "Balance unavailable after rejection: {}", read))
                    .ok(),
                house_balance: self
                    .ledger
                    .get_house_balance()
                    .map_err(|read| warn!("House balance unavailable after rejection: {}", read))
                    .ok(),
                outcome: None,
                detail: None,
                user_delta: 0,
            },
        }
    }
}

fn settlement_batch(request: &WagerRequest, version: u64, user_delta: Chips, outcome: Outcome) -> LedgerBatch {
    let kind = match outcome {
        Outcome::Win => TransactionKind::GameWin,
        Outcome::Loss => TransactionKind::GameLoss,
        Outcome::Push => TransactionKind::GamePush,
    };
    LedgerBatch::new()
        .account(
            AccountChange::new(request.user_id, user_delta)
                .named(request.display_name.as_deref())
                .expecting(version),
        )
        .house(-user_delta)
        .record(
            TransactionDraft::new(request.user_id, user_delta, kind)
                .with_house_delta(-user_delta)
                .with_game(request.game.kind(), request.stake),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::errors::{RateLimitReason, StorageError};
    use crate::games::{CoinSide, StandardGameEngine};
    use crate::games::GameDetail;
    use crate::ledger::backend::{CommitError, LedgerBackend};
    use crate::ledger::{MemoryBackend, HOUSE_ID};
    use crate::rate_limiter::InMemoryRateLimiter;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    /// Memory backend that can fail stats writes and inject write conflicts
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_stats: bool,
        conflicts: AtomicU32,
        /// Taken out of the house around the next game commit, then put back
        drain_house: AtomicI64,
    }

    impl LedgerBackend for FlakyBackend {
        fn account(&self, user_id: UserId) -> Result<Option<Account>, StorageError> {
            self.inner.account(user_id)
        }
        fn ensure_account(&self, user_id: UserId, name: Option<&str>, now: DateTime<Utc>) -> Result<Account, StorageError> {
            self.inner.ensure_account(user_id, name, now)
        }
        fn house(&self) -> Result<HouseAccount, StorageError> {
            self.inner.house()
        }
        fn seed_house(&self, initial: Chips, now: DateTime<Utc>) -> Result<HouseAccount, StorageError> {
            self.inner.seed_house(initial, now)
        }
        fn commit(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<CommitReceipt, CommitError> {
            let is_game = batch.transaction.as_ref().map_or(false, |t| t.kind.is_game());
            if is_game
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(CommitError::VersionConflict { user_id: 1, expected: 0, found: 1 });
            }
            let drain = if is_game { self.drain_house.swap(0, Ordering::SeqCst) } else { 0 };
            if drain > 0 {
                self.inner.commit(LedgerBatch::new().house(-drain), now)?;
                let result = self.inner.commit(batch, now);
                self.inner.commit(LedgerBatch::new().house(drain), now)?;
                return result;
            }
            self.inner.commit(batch, now)
        }
        fn update_profile(&self, user_id: UserId, update: ProfileUpdate, now: DateTime<Utc>) -> Result<Account, CommitError> {
            self.inner.update_profile(user_id, update, now)
        }
        fn owner_of_address(&self, address: &str) -> Result<Option<UserId>, StorageError> {
            self.inner.owner_of_address(address)
        }
        fn deposit_addresses(&self) -> Result<Vec<(String, UserId)>, StorageError> {
            self.inner.deposit_addresses()
        }
        fn pending_deposit(&self, txid: &str) -> Result<Option<PendingExternalDeposit>, StorageError> {
            self.inner.pending_deposit(txid)
        }
        fn record_pending_deposit(&self, d: PendingExternalDeposit) -> Result<PendingExternalDeposit, CommitError> {
            self.inner.record_pending_deposit(d)
        }
        fn withdrawal(&self, id: u64) -> Result<Option<WithdrawalRecord>, StorageError> {
            self.inner.withdrawal(id)
        }
        fn withdrawals(&self) -> Result<Vec<WithdrawalRecord>, StorageError> {
            self.inner.withdrawals()
        }
        fn stats(&self, user_id: UserId) -> Result<WagerStats, StorageError> {
            self.inner.stats(user_id)
        }
        fn put_stats(&self, user_id: UserId, stats: &WagerStats) -> Result<(), StorageError> {
            if self.fail_stats {
                return Err(StorageError::WriteFailed("stats table unavailable".into()));
            }
            self.inner.put_stats(user_id, stats)
        }
        fn transactions(&self, after_id: u64, limit: usize) -> Result<Vec<Transaction>, StorageError> {
            self.inner.transactions(after_id, limit)
        }
        fn accounts(&self) -> Result<Vec<Account>, StorageError> {
            self.inner.accounts()
        }
    }

    struct Harness {
        settlement: Settlement,
        clock: Arc<ManualClock>,
    }

    fn harness(backend: Arc<dyn LedgerBackend>, draws: Vec<u32>, config: EngineConfig) -> Harness {
        let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
        backend.seed_house(config.house.initial_balance, clock.now()).unwrap();
        let ledger = Arc::new(Ledger::new(backend, clock.clone()));
        let limiter = Arc::new(InMemoryRateLimiter::new(&config.rate_limit, clock.clone()));
        let engine = Arc::new(StandardGameEngine::scripted(draws));
        Harness {
            settlement: Settlement::new(ledger, limiter, engine, &config),
            clock,
        }
    }

    async fn fund(settlement: &Settlement, user: UserId, amount: Chips) {
        settlement.ledger().apply_delta(user, amount, None).await.unwrap();
    }

    fn heads(user: UserId, stake: Chips) -> WagerRequest {
        WagerRequest::new(user, stake, GameRequest::CoinFlip { choice: CoinSide::Heads })
    }

    #[test]
    fn test_transition_table() {
        use SettlementState::*;
        assert!(Requested.can_transition_to(Validated));
        assert!(RateChecked.can_transition_to(Rejected));
        assert!(OutcomeResolved.can_transition_to(RateChecked));
        assert!(OutcomeResolved.can_transition_to(Rejected));
        assert!(!LedgerApplied.can_transition_to(Rejected));
        assert!(!Requested.can_transition_to(OutcomeResolved));
        assert!(Recorded.is_terminal());
    }

    #[tokio::test]
    async fn test_winning_flip_moves_stake_from_house() {
        let h = harness(Arc::new(MemoryBackend::new()), vec![0], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000).await;

        let receipt = h.settlement.settle(heads(1, 100).named("ana")).await.unwrap();
        assert_eq!(receipt.outcome(), Outcome::Win);
        assert_eq!(receipt.balance, 1_100);
        assert_eq!(receipt.house_balance, 9_900);
        assert_eq!(receipt.transaction.kind, TransactionKind::GameWin);
        assert_eq!(receipt.transaction.amount, 100);
        assert_eq!(receipt.transaction.label(), "coinflip_win");
        assert_eq!(receipt.stats.as_ref().unwrap().total_won, 100);
        assert_eq!(
            receipt.trail,
            vec![
                SettlementState::Requested,
                SettlementState::Validated,
                SettlementState::RateChecked,
                SettlementState::OutcomeResolved,
                SettlementState::LedgerApplied,
                SettlementState::Recorded,
            ]
        );
    }

    #[tokio::test]
    async fn test_bet_bounds() {
        let h = harness(Arc::new(MemoryBackend::new()), vec![], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000_000).await;
        assert!(matches!(
            h.settlement.settle(heads(1, 0)).await,
            Err(EngineError::InvalidBetAmount { amount: 0, min: 1, max: 100_000 })
        ));
        assert!(matches!(
            h.settlement.settle(heads(1, 100_001)).await,
            Err(EngineError::InvalidBetAmount { .. })
        ));
        assert_eq!(h.settlement.metrics().snapshot().rejected, 2);
    }

    #[tokio::test]
    async fn test_short_house_rejects_before_draw() {
        let mut config = EngineConfig::testing();
        config.house.initial_balance = 300;
        let h = harness(Arc::new(MemoryBackend::new()), vec![17], config);
        fund(&h.settlement, 1, 1_000).await;

        let request = WagerRequest::new(1, 10, GameRequest::Roulette { bet: "17".parse().unwrap() });
        match h.settlement.settle(request).await {
            Err(EngineError::HouseInsufficientFunds { house_balance, required }) => {
                assert_eq!(house_balance, 300);
                assert_eq!(required, 350);
            }
            other => panic!("Expected house rejection, got {:?}", other),
        }
        assert_eq!(h.settlement.ledger().get_balance(1).unwrap(), 1_000);
        assert!(h.settlement.ledger().transactions(0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_records_zero_entry() {
        use crate::games::blackjack::{deal_script, Card, Suit};
        let draws = deal_script(&[
            Card::new(1, Suit::Spades),
            Card::new(1, Suit::Clubs),
            Card::new(13, Suit::Hearts),
            Card::new(10, Suit::Diamonds),
        ])
        .unwrap();
        let h = harness(Arc::new(MemoryBackend::new()), draws, EngineConfig::testing());
        fund(&h.settlement, 2, 500).await;

        let receipt = h
            .settlement
            .settle(WagerRequest::new(2, 100, GameRequest::Blackjack))
            .await
            .unwrap();
        assert_eq!(receipt.outcome(), Outcome::Push);
        assert_eq!(receipt.balance, 500);
        assert_eq!(receipt.house_balance, 10_000);
        assert_eq!(receipt.transaction.label(), "blackjack_push");
        let stats = receipt.stats.unwrap();
        assert_eq!(stats.games_played, 1);
        assert_eq!(stats.total_bets, 0);
    }

    #[tokio::test]
    async fn test_cooldown_rejection_leaves_balance() {
        let mut config = EngineConfig::testing();
        config.rate_limit.bet_cooldown_ms = 3_000;
        let h = harness(Arc::new(MemoryBackend::new()), vec![1, 1], config);
        fund(&h.settlement, 1, 1_000).await;

        h.settlement.settle(heads(1, 100)).await.unwrap();
        h.clock.advance_millis(1_000);
        let balance = h.settlement.ledger().get_balance(1).unwrap();
        match h.settlement.settle(heads(1, 100)).await {
            Err(EngineError::RateLimited { reason, .. }) => assert_eq!(reason, RateLimitReason::Cooldown),
            other => panic!("Expected rate limit, got {:?}", other),
        }
        assert_eq!(h.settlement.ledger().get_balance(1).unwrap(), balance);

        h.clock.advance_millis(2_000);
        assert!(h.settlement.settle(heads(1, 100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_conflicts_retry_then_succeed() {
        let backend = Arc::new(FlakyBackend {
            conflicts: AtomicU32::new(2),
            ..Default::default()
        });
        let h = harness(backend, vec![1, 1, 0], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000).await;

        let receipt = h.settlement.settle(heads(1, 100)).await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(receipt.outcome(), Outcome::Win);
        assert_eq!(receipt.balance, 1_100);
        assert_eq!(h.settlement.metrics().snapshot().conflicts, 2);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_retries() {
        let backend = Arc::new(FlakyBackend {
            conflicts: AtomicU32::new(10),
            ..Default::default()
        });
        let h = harness(backend, vec![], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000).await;

        let err = h.settlement.settle(heads(1, 100)).await.unwrap_err();
        assert_eq!(err, EngineError::LedgerWriteConflict { attempts: 4 });
        assert!(err.is_retryable());
        assert_eq!(h.settlement.ledger().get_balance(1).unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_stats_failure_keeps_commit_and_alerts() {
        let backend = Arc::new(FlakyBackend {
            fail_stats: true,
            ..Default::default()
        });
        let h = harness(backend, vec![1], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000).await;

        let receipt = h.settlement.settle(heads(1, 100)).await.unwrap();
        assert_eq!(receipt.balance, 900);
        assert!(receipt.stats.is_none());
        assert_eq!(h.settlement.ledger().get_house_balance().unwrap(), 10_100);

        let alerts = h.settlement.alerts().snapshot();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StatsWriteFailed);
        assert_eq!(alerts[0].transaction_id, Some(receipt.transaction.id));
    }

    #[tokio::test]
    async fn test_play_reports_balances_on_rejection() {
        let h = harness(Arc::new(MemoryBackend::new()), vec![], EngineConfig::testing());
        fund(&h.settlement, 1, 50).await;

        let response = h.settlement.play(heads(1, 100)).await;
        assert!(!response.ok);
        assert_eq!(response.error_kind, Some("insufficient_funds"));
        assert_eq!(response.balance, Some(50));
        assert_eq!(response.house_balance, Some(10_000));
        assert_eq!(response.detail, None);
        assert!(response.message.contains("balance 50"));
    }

    #[tokio::test]
    async fn test_play_carries_round_detail() {
        let h = harness(Arc::new(MemoryBackend::new()), vec![1], EngineConfig::testing());
        fund(&h.settlement, 1, 500).await;

        let response = h.settlement.play(heads(1, 100)).await;
        assert!(response.ok);
        assert_eq!(response.outcome, Some(Outcome::Loss));
        assert_eq!(
            response.detail,
            Some(GameDetail::CoinFlip { choice: CoinSide::Heads, landed: CoinSide::Tails })
        );
        assert_eq!(response.balance, Some(400));
        assert_eq!(response.house_balance, Some(10_100));
    }

    #[tokio::test]
    async fn test_house_floor_at_commit_rejects_without_redraw() {
        // the house passes the pre-draw check, then drops below the payout before the commit
        let backend = Arc::new(FlakyBackend {
            drain_house: AtomicI64::new(9_950),
            ..Default::default()
        });
        let h = harness(backend, vec![0, 1], EngineConfig::testing());
        fund(&h.settlement, 1, 1_000).await;

        match h.settlement.settle(heads(1, 100)).await {
            Err(EngineError::HouseInsufficientFunds { .. }) => {}
            other => panic!("Expected house rejection, got {:?}", other),
        }

        let ledger = h.settlement.ledger();
        assert_eq!(ledger.get_balance(1).unwrap(), 1_000);
        assert_eq!(ledger.get_house_balance().unwrap(), 10_000);
        assert!(ledger.all_transactions().unwrap().iter().all(|tx| !tx.kind.is_game()));
        let snapshot = h.settlement.metrics().snapshot();
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.conflicts, 0);

        // the losing draw is still next in line
        let receipt = h.settlement.settle(heads(1, 100)).await.unwrap();
        assert_eq!(receipt.outcome(), Outcome::Loss);
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.balance, 900);
    }

    #[tokio::test]
    async fn test_house_id_cannot_wager() {
        let h = harness(Arc::new(MemoryBackend::new()), vec![1], EngineConfig::testing());

        let err = h.settlement.settle(heads(HOUSE_ID, 100)).await.unwrap_err();
        assert_eq!(err, EngineError::ReservedAccount(HOUSE_ID));
        assert_eq!(err.kind(), "reserved_account");
        assert!(h.settlement.ledger().all_transactions().unwrap().is_empty());
        assert_eq!(h.settlement.ledger().get_house_balance().unwrap(), 10_000);
    }
}
