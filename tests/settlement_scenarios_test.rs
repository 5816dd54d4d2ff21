//! End-to-end wagers through the factory-built stack

use chiphouse::{
    audit,
    clock::ManualClock,
    config::EngineConfig,
    errors::{EngineError, RateLimitReason},
    games::{
        blackjack::{deal_script, Card, Suit},
        CoinSide, GameRequest, RouletteBet, StandardGameEngine,
    },
    settlement::WagerRequest,
    ChipHouse, ChipHouseFactory, TransactionKind,
};
use std::sync::Arc;

fn house_with(config: EngineConfig, draws: Vec<u32>) -> (ChipHouse, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
    let house = ChipHouseFactory::new(config)
        .with_clock(clock.clone())
        .with_engine(Arc::new(StandardGameEngine::scripted(draws)))
        .build()
        .expect("Failed to build chiphouse");
    (house, clock)
}

fn heads() -> GameRequest {
    GameRequest::CoinFlip { choice: CoinSide::Heads }
}

#[tokio::test]
async fn test_coinflip_win_moves_stake_from_house() {
    let (house, _clock) = house_with(EngineConfig::testing(), vec![0]);
    house.reconciler.admin_credit(7, 1_000, None, None).await.unwrap();

    let receipt = house
        .settlement
        .settle(WagerRequest::new(7, 100, heads()).named("ana"))
        .await
        .unwrap();

    assert_eq!(receipt.balance, 1_100);
    assert_eq!(receipt.house_balance, 9_900);
    assert_eq!(receipt.transaction.label(), "coinflip_win");
    assert_eq!(receipt.transaction.amount, 100);
    assert_eq!(receipt.transaction.house_delta, -100);

    let account = house.ledger.account(7).unwrap().unwrap();
    assert_eq!(account.display_name.as_deref(), Some("ana"));
    assert_eq!(house.ledger.stats(7).unwrap().total_won, 100);
}

#[tokio::test]
async fn test_short_balance_changes_nothing() {
    let (house, _clock) = house_with(EngineConfig::testing(), vec![0]);
    house.reconciler.admin_credit(7, 50, None, None).await.unwrap();

    let err = house.settlement.settle(WagerRequest::new(7, 100, heads())).await.unwrap_err();
    assert_eq!(err, EngineError::InsufficientFunds { balance: 50, required: 100 });

    assert_eq!(house.ledger.get_balance(7).unwrap(), 50);
    assert_eq!(house.ledger.get_house_balance().unwrap(), 10_000);
    let log = house.ledger.all_transactions().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, TransactionKind::AdminCredit);
}

#[tokio::test]
async fn test_roulette_straight_up_pays_35_to_1() {
    let (house, _clock) = house_with(EngineConfig::testing(), vec![17]);
    house.reconciler.admin_credit(3, 100, None, None).await.unwrap();

    let receipt = house
        .settlement
        .settle(WagerRequest::new(3, 10, GameRequest::Roulette { bet: RouletteBet::Number(17) }))
        .await
        .unwrap();
    assert_eq!(receipt.user_delta, 350);
    assert_eq!(receipt.balance, 450);
    assert_eq!(receipt.house_balance, 9_650);
}

#[tokio::test]
async fn test_blackjack_natural_pays_three_to_two() {
    let cards = [
        Card::new(1, Suit::Spades),
        Card::new(13, Suit::Clubs),
        Card::new(13, Suit::Hearts),
        Card::new(12, Suit::Diamonds),
    ];
    let (house, _clock) = house_with(EngineConfig::testing(), deal_script(&cards).unwrap());
    house.reconciler.admin_credit(5, 500, None, None).await.unwrap();

    let receipt = house
        .settlement
        .settle(WagerRequest::new(5, 100, GameRequest::Blackjack))
        .await
        .unwrap();
    assert_eq!(receipt.user_delta, 150);
    assert_eq!(receipt.balance, 650);
    assert_eq!(receipt.transaction.label(), "blackjack_win");
}

#[tokio::test]
async fn test_cooldown_between_wagers() {
    let mut config = EngineConfig::testing();
    config.rate_limit.bet_cooldown_ms = 3_000;
    let (house, clock) = house_with(config, vec![1, 1, 1]);
    house.reconciler.admin_credit(9, 1_000, None, None).await.unwrap();

    house.settlement.settle(WagerRequest::new(9, 10, heads())).await.unwrap();

    clock.advance_millis(1_000);
    match house.settlement.settle(WagerRequest::new(9, 10, heads())).await {
        Err(EngineError::RateLimited { retry_after_secs, reason }) => {
            assert_eq!(reason, RateLimitReason::Cooldown);
            assert!((retry_after_secs - 2.0).abs() < 1e-6);
        }
        other => panic!("Expected cooldown, got {:?}", other),
    }
    assert_eq!(house.ledger.get_balance(9).unwrap(), 990);

    clock.advance_millis(2_000);
    assert!(house.settlement.settle(WagerRequest::new(9, 10, heads())).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_wagers_never_overdraw() {
    // every flip lands tails, so every accepted wager loses its stake
    let (house, _clock) = house_with(EngineConfig::testing(), vec![1; 64]);
    let house = Arc::new(house);
    house.reconciler.admin_credit(11, 1_000, None, None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let house = house.clone();
        handles.push(tokio::spawn(async move {
            house.settlement.settle(WagerRequest::new(11, 100, heads())).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("Unexpected rejection: {:?}", other),
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(house.ledger.get_balance(11).unwrap(), 0);
    assert_eq!(house.ledger.get_house_balance().unwrap(), 11_000);

    let report = audit::reconcile(&house.ledger, 10_000).unwrap();
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.entries, 11);
}

#[tokio::test]
async fn test_mixed_activity_replays_to_live_balances() {
    let (house, _clock) = house_with(EngineConfig::testing(), vec![0, 1, 2, 5, 17, 0]);
    house.reconciler.admin_credit(1, 2_000, None, None).await.unwrap();
    house.reconciler.claim_daily_bonus(2, Some("bo")).await.unwrap();
    house.reconciler.fund_house(1_000).await.unwrap();

    let wagers = [
        WagerRequest::new(1, 100, heads()),
        WagerRequest::new(1, 100, heads()),
        WagerRequest::new(2, 50, GameRequest::Dice),
        WagerRequest::new(2, 50, GameRequest::Dice),
        WagerRequest::new(1, 20, GameRequest::Roulette { bet: RouletteBet::Number(17) }),
    ];
    for wager in wagers {
        house.settlement.settle(wager).await.unwrap();
    }

    let report = audit::reconcile(&house.ledger, 10_000).unwrap();
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.accounts_checked, 2);

    let log = house.ledger.all_transactions().unwrap();
    let game_net: i64 = log
        .iter()
        .filter(|tx| tx.kind.is_game())
        .map(|tx| tx.amount + tx.house_delta)
        .sum();
    assert_eq!(game_net, 0);
    assert!(log.windows(2).all(|w| w[0].id < w[1].id));
}
