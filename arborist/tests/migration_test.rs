use std::sync::{atomic::Ordering, Arc};

use arborist::{
    errors::ArboristError,
    mirror::{load_snapshot, save_snapshot, snapshot_path},
    proof_cache::{FileProofStore, ProofCache},
    types::QueueKind,
    ControllerState,
};

use test_utils::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drains_legacy_queue_in_full_chunks() {
    let fixture = Fixture::new(
        4,
        QueueSetup::legacy(10),
        QueueSetup::legacy(5),
        true,
        1,
    );
    let prover = Arc::new(MockProver::new());
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    let report = controller.run().await.unwrap();
    assert_eq!(controller.state(), ControllerState::Drained);

    let deposits = report.queue(QueueKind::Deposits).unwrap();
    assert_eq!(deposits.batches, 2);
    assert_eq!(deposits.leaves_processed, 8);
    assert_eq!(deposits.remaining, 2);
    assert_eq!(deposits.proofs_generated, 2);
    assert_eq!(deposits.cache_hits, 0);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 8);
    assert_eq!(
        deposits.final_root,
        fixture.expected_mirror(QueueKind::Deposits, 8).root()
    );

    let withdrawals = report.queue(QueueKind::Withdrawals).unwrap();
    assert_eq!(withdrawals.batches, 1);
    assert_eq!(withdrawals.remaining, 1);
    assert_eq!(fixture.current.processed(QueueKind::Withdrawals), 4);

    let submissions = fixture.current.submissions();
    let deposit_batches: Vec<Vec<u64>> = submissions
        .iter()
        .filter(|(queue, _)| *queue == QueueKind::Deposits)
        .map(|(_, proof)| proof.args.leaves.iter().map(|leaf| leaf.index).collect())
        .collect();
    assert_eq!(deposit_batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
    assert!(submissions
        .iter()
        .all(|(_, proof)| proof.args.leaves.len() == 4));

    assert_eq!(prover.calls(), 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_spanning_cutover_uses_data_records() {
    let setup = QueueSetup {
        legacy_registered: 6,
        processed: 0,
        registered_since_cutover: 5,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 2);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover, cache);

    let report = controller.drain_queue(QueueKind::Deposits).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.remaining, 3);

    let submissions = fixture.current.submissions();
    let second = &submissions[1].1.args.leaves;
    assert_eq!(second.as_slice(), &fixture.records(QueueKind::Deposits)[4..8]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_without_legacy_registry_all_leaves_are_scanned() {
    let setup = QueueSetup {
        legacy_registered: 9,
        processed: 4,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(3), false, 3);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    let report = controller.run().await.unwrap();
    let deposits = report.queue(QueueKind::Deposits).unwrap();
    assert_eq!(deposits.batches, 1);
    assert_eq!(deposits.remaining, 1);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 8);
    assert_eq!(report.queue(QueueKind::Withdrawals).unwrap().batches, 0);
    assert_eq!(prover.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replay_with_persisted_cache_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("proof_cache.jsonl");
    let open_cache = || ProofCache::open(Box::new(FileProofStore::new(&cache_path))).unwrap();

    let first = Fixture::new(4, QueueSetup::legacy(10), QueueSetup::legacy(9), true, 4);
    let first_prover = Arc::new(MockProver::new());
    let first_report = first
        .controller(first_prover.clone(), open_cache())
        .run()
        .await
        .unwrap();
    assert_eq!(first_prover.calls(), 4);

    let second = Fixture::new(4, QueueSetup::legacy(10), QueueSetup::legacy(9), true, 4);
    let second_prover = Arc::new(MockProver::new());
    let second_report = second
        .controller(second_prover.clone(), open_cache())
        .run()
        .await
        .unwrap();

    assert_eq!(second_prover.calls(), 0);
    assert_eq!(first.current.submissions(), second.current.submissions());
    for queue in QueueKind::ALL {
        let first_queue = first_report.queue(queue).unwrap();
        let second_queue = second_report.queue(queue).unwrap();
        assert_eq!(first_queue.final_root, second_queue.final_root);
        assert_eq!(first_queue.batches, second_queue.batches);
        assert_eq!(second_queue.cache_hits, second_queue.batches);
        assert_eq!(second_queue.proofs_generated, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_after_prover_failure() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new(4, QueueSetup::legacy(12), QueueSetup::legacy(0), true, 5)
        .with_snapshot_dir(dir.path().to_path_buf());

    let failing = Arc::new(MockProver::failing_from(1));
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(failing, cache);
    let result = controller.drain_queue(QueueKind::Deposits).await;
    assert!(matches!(result, Err(ArboristError::ProofGeneration(_))));
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 4);
    assert_eq!(store.len(), 1);

    let snapshot = load_snapshot(&snapshot_path(dir.path(), QueueKind::Deposits))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.next_index(), 4);

    let prover = Arc::new(MockProver::new());
    let cache = ProofCache::open(Box::new(store.clone())).unwrap();
    let mut controller = fixture.controller(prover.clone(), cache);
    let report = controller.drain_queue(QueueKind::Deposits).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(prover.calls(), 2);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_catch_up_without_snapshot() {
    let setup = QueueSetup {
        legacy_registered: 10,
        processed: 4,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 6);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover, cache);

    let report = controller.drain_queue(QueueKind::Deposits).await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(
        report.final_root,
        fixture.expected_mirror(QueueKind::Deposits, 8).root()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_root_mismatch_aborts_without_caching() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 7);
    fixture.current.tamper_root.store(true, Ordering::SeqCst);
    let prover = Arc::new(MockProver::new());
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(prover, cache);

    let result = controller.drain_queue(QueueKind::Deposits).await;
    assert!(matches!(
        result,
        Err(ArboristError::RootMismatch {
            queue: QueueKind::Deposits,
            ..
        })
    ));
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert!(store.is_empty());
    assert!(controller.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_event_aborts_batch() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 8);
    let missing = fixture.records(QueueKind::Deposits)[2].clone();
    fixture.ledger.remove_value(QueueKind::Deposits, missing.value);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    let result = controller.drain_queue(QueueKind::Deposits).await;
    match result {
        Err(ArboristError::NotFound { hash, .. }) => assert_eq!(hash, missing.derived_hash()),
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert_eq!(prover.calls(), 0);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 0);
    assert!(fixture.current.submissions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submission_error_after_landing_continues() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 9);
    fixture.current.fail_after_landing.store(true, Ordering::SeqCst);
    let prover = Arc::new(MockProver::new());
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(prover, cache);

    let report = controller.drain_queue(QueueKind::Deposits).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(fixture.current.submissions().len(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_submission_is_not_retried() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 10);
    fixture.current.reject_submissions.store(true, Ordering::SeqCst);
    let prover = Arc::new(MockProver::new());
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    let result = controller.drain_queue(QueueKind::Deposits).await;
    assert!(matches!(
        result,
        Err(ArboristError::Submission { start_index: 0, .. })
    ));
    assert_eq!(prover.calls(), 1);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unaligned_queue_is_rejected() {
    let setup = QueueSetup {
        legacy_registered: 10,
        processed: 3,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 11);
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(Arc::new(MockProver::new()), cache);

    let result = controller.drain_queue(QueueKind::Deposits).await;
    assert!(matches!(
        result,
        Err(ArboristError::UnalignedQueue {
            processed: 3,
            chunk_size: 4,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_align_legacy_queues() {
    let deposits = QueueSetup {
        legacy_registered: 10,
        processed: 6,
        registered_since_cutover: 0,
    };
    let withdrawals = QueueSetup {
        legacy_registered: 9,
        processed: 4,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, deposits, withdrawals, true, 12);
    let legacy = fixture.legacy.clone().unwrap();
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(Arc::new(MockProver::new()), cache);

    let reports = controller.align_legacy().await.unwrap();
    assert_eq!(reports[0].queue, QueueKind::Deposits);
    assert_eq!(reports[0].uploaded, 2);
    assert_eq!(reports[1].uploaded, 0);
    assert_eq!(legacy.processed(QueueKind::Deposits), 8);
    assert_eq!(legacy.processed(QueueKind::Withdrawals), 4);
    assert_eq!(
        legacy.root_of(QueueKind::Deposits),
        fixture.expected_mirror(QueueKind::Deposits, 8).root()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_align_skips_when_not_enough_pending() {
    let deposits = QueueSetup {
        legacy_registered: 7,
        processed: 6,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, deposits, QueueSetup::legacy(0), true, 13);
    let legacy = fixture.legacy.clone().unwrap();
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(Arc::new(MockProver::new()), cache);

    let reports = controller.align_legacy().await.unwrap();
    assert_eq!(reports[0].uploaded, 0);
    assert_eq!(legacy.processed(QueueKind::Deposits), 6);
}

fn assert_count_mismatch(result: Result<arborist::controller::QueueReport, ArboristError>) {
    match result {
        Err(ArboristError::CountMismatch { queue, .. }) => assert_eq!(queue, QueueKind::Deposits),
        other => panic!("expected CountMismatch, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_data_event_fails_count_checkpoint() {
    let setup = QueueSetup {
        legacy_registered: 4,
        processed: 0,
        registered_since_cutover: 3,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 14);
    *fixture.current.hidden_data_record.lock().unwrap() = Some(5);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    assert_count_mismatch(controller.drain_queue(QueueKind::Deposits).await);
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert_eq!(prover.calls(), 0);
    assert!(fixture.current.submissions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_legacy_registered_must_equal_cutover() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 15);
    let legacy = fixture.legacy.clone().unwrap();
    legacy.extra_registered.store(1, Ordering::SeqCst);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    assert_count_mismatch(controller.drain_queue(QueueKind::Deposits).await);
    assert_eq!(prover.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_current_processed_behind_legacy_is_rejected() {
    let fixture = Fixture::new(4, QueueSetup::legacy(8), QueueSetup::legacy(0), true, 16);
    let legacy = fixture.legacy.clone().unwrap();
    legacy.set_processed(QueueKind::Deposits, 4);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    assert_count_mismatch(controller.drain_queue(QueueKind::Deposits).await);
    assert_eq!(prover.calls(), 0);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_ahead_of_registry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let setup = QueueSetup {
        legacy_registered: 12,
        processed: 4,
        registered_since_cutover: 0,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 17)
        .with_snapshot_dir(dir.path().to_path_buf());
    save_snapshot(
        &fixture.expected_mirror(QueueKind::Deposits, 8),
        &snapshot_path(dir.path(), QueueKind::Deposits),
    )
    .unwrap();
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    assert_count_mismatch(controller.drain_queue(QueueKind::Deposits).await);
    assert_eq!(prover.calls(), 0);
    assert!(fixture.current.submissions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unexpected_counter_advance_fails_verification() {
    let fixture = Fixture::new(4, QueueSetup::legacy(12), QueueSetup::legacy(0), true, 18);
    fixture.current.extra_advance.store(1, Ordering::SeqCst);
    let prover = Arc::new(MockProver::new());
    let (cache, store) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    assert_count_mismatch(controller.drain_queue(QueueKind::Deposits).await);
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert_eq!(fixture.current.processed(QueueKind::Deposits), 5);
    assert_eq!(fixture.current.submissions().len(), 1);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forged_data_record_is_an_integrity_error() {
    let setup = QueueSetup {
        legacy_registered: 2,
        processed: 0,
        registered_since_cutover: 6,
    };
    let fixture = Fixture::new(4, setup, QueueSetup::legacy(0), true, 19);
    *fixture.current.forged_data_record.lock().unwrap() = Some(3);
    let prover = Arc::new(MockProver::new());
    let (cache, _) = memory_cache();
    let mut controller = fixture.controller(prover.clone(), cache);

    let result = controller.drain_queue(QueueKind::Deposits).await;
    assert!(matches!(
        result,
        Err(ArboristError::Integrity {
            queue: QueueKind::Deposits,
            index: 3,
            ..
        })
    ));
    assert_eq!(prover.calls(), 0);
    assert!(fixture.current.submissions().is_empty());
}
