use std::sync::Arc;

use alloy::primitives::{Address, B256};
use arborist::{
    config::SourcesConfig,
    errors::ArboristError,
    scanner::{EventWindowScanner, ScanConfig, ScanSession},
    types::{derived_hash, QueueKind},
};
use rand::{rngs::StdRng, SeedableRng};

use test_utils::*;

fn sources() -> SourcesConfig {
    SourcesConfig {
        deposit_instances: deposit_instances(),
        withdrawal_instances: withdrawal_instances(),
        deposit_from_block: 100,
        withdrawal_from_block: 100,
    }
}

fn scanner(ledger: Arc<MockLedger>, step: u64, max_windows: u64) -> EventWindowScanner<MockLedger> {
    EventWindowScanner::new(
        ledger,
        sources(),
        ScanConfig { step, max_windows },
        fast_retry(),
    )
}

fn deposit(ledger: &MockLedger, origin: Address, value: B256, block: u64) -> B256 {
    ledger.add_log(arborist::ledger::events::encode_source_event(
        QueueKind::Deposits,
        origin,
        value,
        block,
    ));
    derived_hash(origin, value, block)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_match_found_in_third_window() {
    let ledger = Arc::new(MockLedger::new(1000));
    let instance = deposit_instances()[0];
    deposit(&ledger, instance, B256::with_last_byte(1), 150);
    deposit(&ledger, instance, B256::with_last_byte(2), 250);
    let target = deposit(&ledger, instance, B256::with_last_byte(3), 350);
    deposit(&ledger, instance, B256::with_last_byte(4), 450);

    let scanner = scanner(ledger.clone(), 100, 50);
    let mut session = ScanSession::new(QueueKind::Deposits, 100);
    let event = scanner.resolve(&mut session, target).await.unwrap();

    assert_eq!(session.windows_scanned(), 3);
    assert!((300..400).contains(&event.block));
    assert_eq!(event.value, B256::with_last_byte(3));
    assert_eq!(event.origin, instance);
    assert_eq!(session.cursor(), 400);
    // One query per instance and window.
    assert_eq!(ledger.get_logs_calls(), 3 * deposit_instances().len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_seen_earlier_resolve_without_queries() {
    let ledger = Arc::new(MockLedger::new(1000));
    let instances = deposit_instances();
    let first = deposit(&ledger, instances[0], B256::with_last_byte(1), 110);
    let second = deposit(&ledger, instances[1], B256::with_last_byte(2), 120);
    let third = deposit(&ledger, instances[0], B256::with_last_byte(3), 190);

    let scanner = scanner(ledger.clone(), 100, 50);
    let mut session = scanner.session(QueueKind::Deposits);
    assert_eq!(session.start_block(), 100);

    assert_eq!(scanner.resolve(&mut session, first).await.unwrap().block, 110);
    assert_eq!(session.events_seen(), 2);
    let calls = ledger.get_logs_calls();
    assert_eq!(scanner.resolve(&mut session, second).await.unwrap().block, 120);
    assert_eq!(scanner.resolve(&mut session, third).await.unwrap().block, 190);
    assert_eq!(ledger.get_logs_calls(), calls);
    assert_eq!(session.windows_scanned(), 1);
    assert_eq!(session.events_seen(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_resolves_generated_history() {
    let ledger = Arc::new(MockLedger::new(CHAIN_HEAD));
    let mut rng = StdRng::seed_from_u64(7);
    let records = generate_records(QueueKind::Withdrawals, 40, &mut rng);
    for record in &records {
        ledger.add_record(QueueKind::Withdrawals, record);
    }

    let scanner = scanner(ledger, 25, 100);
    let mut session = ScanSession::new(QueueKind::Withdrawals, FIRST_BLOCK);
    for record in &records {
        let event = scanner
            .resolve(&mut session, record.derived_hash())
            .await
            .unwrap();
        assert_eq!(event.with_index(record.index), *record);
        // Only events after the resolved one, within the last window.
        assert!(session.events_seen() <= 4);
    }
    let last_block = records.last().unwrap().block;
    assert!(session.cursor() > last_block);
    assert!(session.windows_scanned() <= (last_block - FIRST_BLOCK) / 25 + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_not_found_after_max_windows() {
    let ledger = Arc::new(MockLedger::new(100_000));
    deposit(&ledger, deposit_instances()[0], B256::with_last_byte(1), 150);

    let scanner = scanner(ledger, 100, 5);
    let target = derived_hash(Address::ZERO, B256::with_last_byte(9), 1);
    let result = scanner.find(QueueKind::Deposits, target, 100).await;

    match result {
        Err(ArboristError::NotFound {
            hash,
            from_block,
            to_block,
            windows,
        }) => {
            assert_eq!(hash, target);
            assert_eq!(from_block, 100);
            assert_eq!(to_block, 600);
            assert_eq!(windows, 5);
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_not_found_stops_at_chain_head() {
    let ledger = Arc::new(MockLedger::new(349));
    let scanner = scanner(ledger, 100, 1000);
    let mut session = ScanSession::new(QueueKind::Deposits, 100);
    let result = scanner.resolve(&mut session, B256::repeat_byte(5)).await;

    assert!(matches!(
        result,
        Err(ArboristError::NotFound {
            to_block: 350,
            windows: 3,
            ..
        })
    ));
    assert_eq!(session.cursor(), 350);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_event_is_ambiguous() {
    let ledger = Arc::new(MockLedger::new(1000));
    let instance = deposit_instances()[1];
    let target = deposit(&ledger, instance, B256::with_last_byte(1), 150);
    deposit(&ledger, instance, B256::with_last_byte(1), 150);

    let scanner = scanner(ledger, 100, 10);
    let result = scanner.find(QueueKind::Deposits, target, 100).await;
    assert!(matches!(
        result,
        Err(ArboristError::AmbiguousMatch {
            first_block: 150,
            second_block: 150,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_log_failures_are_retried() {
    let ledger = Arc::new(MockLedger::new(1000));
    let target = deposit(&ledger, deposit_instances()[0], B256::with_last_byte(1), 120);
    ledger.fail_next(2);

    let scanner = scanner(ledger, 100, 10);
    let event = scanner.find(QueueKind::Deposits, target, 100).await.unwrap();
    assert_eq!(event.block, 120);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_withdrawal_scan_ignores_deposit_logs() {
    let ledger = Arc::new(MockLedger::new(1000));
    // Same origin address configured for withdrawals, wrong event.
    let origin = withdrawal_instances()[0];
    let target = deposit(&ledger, origin, B256::with_last_byte(1), 150);

    let scanner = scanner(ledger, 100, 10);
    let result = scanner.find(QueueKind::Withdrawals, target, 100).await;
    assert!(matches!(result, Err(ArboristError::NotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolving_forgets_earlier_events() {
    let ledger = Arc::new(MockLedger::new(1000));
    let instance = deposit_instances()[0];
    let skipped = deposit(&ledger, instance, B256::with_last_byte(1), 110);
    deposit(&ledger, instance, B256::with_last_byte(2), 130);
    let target = deposit(&ledger, instance, B256::with_last_byte(3), 150);
    let later = deposit(&ledger, instance, B256::with_last_byte(4), 170);

    let scanner = scanner(ledger.clone(), 100, 1);
    let mut session = ScanSession::new(QueueKind::Deposits, 100);
    assert_eq!(scanner.resolve(&mut session, target).await.unwrap().block, 150);
    assert_eq!(session.events_seen(), 1);

    let calls = ledger.get_logs_calls();
    assert_eq!(scanner.resolve(&mut session, later).await.unwrap().block, 170);
    assert_eq!(ledger.get_logs_calls(), calls);

    // Events before a resolved leaf are gone; the only window is used up.
    assert!(matches!(
        scanner.resolve(&mut session, skipped).await,
        Err(ArboristError::NotFound { .. })
    ));
}
