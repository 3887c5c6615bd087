mod common;

use common::{FaultyReceiver, FlakyLedger, LedgerOp, account_id, credit, ledger_with_account};
use ledger_inbox::application::engine::{DeadLetterReason, Disposition, MessageWorker};
use ledger_inbox::config::WorkerConfig;
use ledger_inbox::domain::message::EventMessage;
use ledger_inbox::error::{LedgerError, ProcessingError, ReceiverError};
use ledger_inbox::infrastructure::in_memory::InMemoryReceiver;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[tokio::test(start_paused = true)]
async fn test_receive_failure_pauses_then_continues() {
    let inner = Arc::new(InMemoryReceiver::new());
    let receiver = Arc::new(FaultyReceiver::new(inner.clone()).failing_next(1));
    let ledger = ledger_with_account(dec!(100.00)).await;
    let worker = MessageWorker::new(receiver, Arc::new(ledger.clone()), WorkerConfig::default());
    let fault_pause = worker.config().fault_pause;

    inner.enqueue([credit(Uuid::new_v4(), "5.00")]).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    while !inner.is_drained().await {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(started.elapsed() >= fault_pause);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(inner.completed().await.len(), 1);
    assert_eq!(ledger.balance(account_id()).await, Some(dec!(105.00)));
}

#[tokio::test]
async fn test_shutdown_interrupts_idle_pause() {
    let receiver = Arc::new(InMemoryReceiver::new());
    let ledger = ledger_with_account(dec!(100.00)).await;
    let config = WorkerConfig {
        idle_poll_interval: Duration::from_secs(3600),
        ..WorkerConfig::default()
    };
    let worker = MessageWorker::new(receiver, Arc::new(ledger), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_dropped_shutdown_sender_stops_worker() {
    let receiver = Arc::new(InMemoryReceiver::new());
    let ledger = ledger_with_account(dec!(100.00)).await;
    let config = WorkerConfig {
        idle_poll_interval: Duration::from_secs(3600),
        ..WorkerConfig::default()
    };
    let worker = MessageWorker::new(receiver, Arc::new(ledger), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_failed_dead_letter_leaves_message_leased() {
    let inner = Arc::new(InMemoryReceiver::new());
    let receiver = Arc::new(FaultyReceiver::new(inner.clone()).failing_dead_letter(1));
    let ledger = ledger_with_account(dec!(100.00)).await;
    let worker = MessageWorker::new(receiver, Arc::new(ledger), WorkerConfig::default());

    let message = EventMessage::new("garbage");
    inner.enqueue([message.clone()]).await;

    let err = worker.run_once().await.unwrap_err();
    assert!(matches!(
        err,
        ProcessingError::Receiver(ReceiverError::Unavailable(_))
    ));

    // Not handed back to the queue; it returns only once the lease runs out.
    assert_eq!(worker.run_once().await.unwrap(), None);
    assert!(inner.expire_lease(message.id).await);

    let disposition = worker.run_once().await.unwrap().unwrap();
    assert!(matches!(
        disposition,
        Disposition::DeadLettered(DeadLetterReason::Malformed(_))
    ));
    let dead = inner.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].processing_count, 0);
}

#[tokio::test]
async fn test_failed_reschedule_does_not_skip_backoff() {
    let inner = Arc::new(InMemoryReceiver::new());
    let receiver = Arc::new(FaultyReceiver::new(inner.clone()).failing_reschedule(1));
    let ledger = ledger_with_account(dec!(100.00)).await;
    let flaky = FlakyLedger::new(ledger.clone());
    flaky.fail(LedgerOp::Begin, 2, || {
        LedgerError::Connection("connection reset by peer".to_string())
    });
    let worker = MessageWorker::new(receiver, Arc::new(flaky), WorkerConfig::default());

    let message = credit(Uuid::new_v4(), "5.00");
    inner.enqueue([message.clone()]).await;

    assert!(matches!(
        worker.run_once().await.unwrap_err(),
        ProcessingError::Receiver(ReceiverError::Unavailable(_))
    ));
    // No immediate retry.
    assert_eq!(worker.run_once().await.unwrap(), None);
    assert!(inner.scheduled().await.is_empty());
    assert_eq!(ledger.balance(account_id()).await, Some(dec!(100.00)));

    // After lease expiry the next transient failure is rescheduled normally.
    assert!(inner.expire_lease(message.id).await);
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Some(Disposition::Rescheduled { delay, .. }) if delay == Duration::from_secs(5)
    ));
    assert_eq!(inner.scheduled().await.len(), 1);
}
