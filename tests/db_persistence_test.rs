//! Ledger state survives closing and reopening the RocksDB store

use chiphouse::{
    audit,
    config::{BackendKind, EngineConfig},
    games::{CoinSide, GameRequest, StandardGameEngine},
    reconciler::{DepositNotice, DepositOutcome},
    settlement::WagerRequest,
    ChipHouseFactory, TransactionKind,
};
use std::sync::Arc;

fn rocks_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::testing();
    config.storage.backend = BackendKind::Rocksdb;
    config.storage.data_directory = dir.to_string_lossy().to_string();
    config.storage.clear_on_start = false;
    config
}

#[tokio::test]
async fn test_ledger_persists_across_restarts() {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let config = rocks_config(tmp.path());

    // === PHASE 1: deposit, wager, withdraw, then shut down ===
    let withdrawal_id = {
        let house = ChipHouseFactory::new(config.clone())
            .with_engine(Arc::new(StandardGameEngine::scripted([0])))
            .build()
            .expect("Failed to open ledger");

        let outcome = house
            .reconciler
            .credit_deposit(DepositNotice {
                user_id: 42,
                external_txid: "feedbeef".into(),
                amount_units: 10_000_000,
                confirmations: 3,
                address: None,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, DepositOutcome::Credited { chips: 1_000, .. }));

        house
            .settlement
            .settle(WagerRequest::new(42, 200, GameRequest::CoinFlip { choice: CoinSide::Heads }))
            .await
            .unwrap();

        house
            .reconciler
            .set_withdrawal_address(42, "LcHouseTestAddress000000000001", None)
            .unwrap();
        let receipt = house.reconciler.request_withdrawal(42, 300).await.unwrap();
        assert_eq!(receipt.balance, 900);
        receipt.withdrawal.id
    };

    // === PHASE 2: reopen and check everything came back ===
    let house = ChipHouseFactory::new(config).build().expect("Failed to reopen ledger");

    assert_eq!(house.ledger.get_balance(42).unwrap(), 900);
    assert_eq!(house.ledger.get_house_balance().unwrap(), 9_800);
    assert_eq!(house.ledger.stats(42).unwrap().games_played, 1);

    let kinds: Vec<_> = house.ledger.all_transactions().unwrap().into_iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![TransactionKind::Deposit, TransactionKind::GameWin, TransactionKind::WithdrawalPending]
    );

    // the deposit stays processed
    let again = house
        .reconciler
        .credit_deposit(DepositNotice {
            user_id: 42,
            external_txid: "feedbeef".into(),
            amount_units: 10_000_000,
            confirmations: 9,
            address: None,
        })
        .await
        .unwrap();
    assert_eq!(again, DepositOutcome::AlreadyProcessed { external_txid: "feedbeef".into() });

    assert_eq!(house.reconciler.pending_withdrawals().unwrap().len(), 1);
    house.reconciler.complete_withdrawal(withdrawal_id, Some("payout".into())).await.unwrap();
    assert!(house.reconciler.pending_withdrawals().unwrap().is_empty());

    // the seeded house is not re-seeded on reopen
    let report = audit::reconcile(&house.ledger, 10_000).unwrap();
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.entries, 4);
}
