//! End-to-end lifecycle scenarios against the scriptable gateway.

use tx_manager::store::{PageRequest, TransactionFilter};
use tx_manager::txn::state::is_valid_path;
use tx_manager::txn::TransactionEvent;
use tx_manager::{ManagerError, TxStatus};

mod common;

use common::{at, context, receipt, request, submitted, wait_for_status};

fn statuses(events: &[TransactionEvent]) -> Vec<TxStatus> {
    events.iter().map(|e| e.status).collect()
}

#[tokio::test]
async fn test_unseen_three_ticks_then_mempool() {
    let ctx = context();
    let tx = submitted(&ctx, "oracle").await;
    let t0 = tx.submitted_at.unwrap();

    ctx.gateway.script_mempool([false, false, false, true]);
    let tracker = ctx.manager.tracker();

    let report = tracker.tick_at(at(t0, 10)).await;
    assert_eq!(report.candidates, 0);

    let report = tracker.tick_at(at(t0, 40)).await;
    assert_eq!(report.resubmit.rebroadcast, 1);

    // Backoff doubled to 60s since the rebroadcast at +40.
    let report = tracker.tick_at(at(t0, 50)).await;
    assert_eq!(report.candidates, 0);

    let report = tracker.tick_at(at(t0, 60)).await;
    assert_eq!(report.transitions, 1);

    let stored = ctx.manager.get_transaction(&tx.id).await.unwrap();
    assert_eq!(stored.status, TxStatus::Pending);
    assert_eq!(stored.resubmit_count, 1);

    let events = ctx.manager.get_events(&tx.id).await.unwrap();
    let retries = events
        .iter()
        .filter(|e| e.status == TxStatus::Submitted && e.detail.get("retry").is_some())
        .count();
    assert_eq!(retries, 1);
    assert!(events.iter().all(|e| e.status != TxStatus::Expired));
    assert_eq!(
        statuses(&events),
        vec![
            TxStatus::Created,
            TxStatus::Submitted,
            TxStatus::Submitted,
            TxStatus::Pending
        ]
    );
    assert_eq!(ctx.gateway.broadcast_count(), 2);
}

#[tokio::test]
async fn test_receipt_at_threshold_confirms_in_one_tick() {
    let ctx = context();
    let tx = submitted(&ctx, "datafeed").await;
    let t0 = tx.submitted_at.unwrap();
    ctx.gateway.set_receipt(tx.hash.as_deref().unwrap(), receipt(3));

    let report = ctx.manager.tracker().tick_at(at(t0, 15)).await;
    assert_eq!(report.transitions, 2);

    let stored = ctx.manager.get_transaction(&tx.id).await.unwrap();
    assert_eq!(stored.status, TxStatus::Confirmed);
    assert_eq!(stored.block_height, Some(4_200_000));
    assert_eq!(stored.gas_consumed, Some(1_048_576));
    assert!(stored.block_time.is_some());
    assert!(stored.result.is_some());

    let events = ctx.manager.get_events(&tx.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![
            TxStatus::Created,
            TxStatus::Submitted,
            TxStatus::Pending,
            TxStatus::Confirmed
        ]
    );
    assert_eq!(events[3].detail["gas_consumed"], 1_048_576);
}

#[tokio::test]
async fn test_cancel_confirming_rejected_without_event() {
    let ctx = context();
    let tx = submitted(&ctx, "oracle").await;
    let t0 = tx.submitted_at.unwrap();
    ctx.gateway.set_receipt(tx.hash.as_deref().unwrap(), receipt(1));
    ctx.manager.tracker().tick_at(at(t0, 15)).await;

    let before = ctx.manager.get_events(&tx.id).await.unwrap();
    assert_eq!(before.last().unwrap().status, TxStatus::Confirming);

    let err = ctx.manager.cancel(&tx.id, "operator request").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotCancellable(TxStatus::Confirming)));

    let after = ctx.manager.get_events(&tx.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_cancel_pending() {
    let ctx = context();
    let tx = submitted(&ctx, "oracle").await;
    let t0 = tx.submitted_at.unwrap();
    ctx.gateway.set_in_mempool(tx.hash.as_deref().unwrap(), true);
    ctx.manager.tracker().tick_at(at(t0, 15)).await;

    let cancelled = ctx.manager.cancel(&tx.id, "price superseded").await.unwrap();
    assert_eq!(cancelled.status, TxStatus::Cancelled);

    // Terminal records leave the Tracker's working set.
    let report = ctx.manager.tracker().tick_at(at(t0, 30)).await;
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_idempotency_key_returns_existing_record() {
    let ctx = context();
    let first = ctx
        .manager
        .create_transaction(request("oracle").with_idempotency_key("round-981"))
        .await
        .unwrap();
    wait_for_status(&ctx, &first.id, TxStatus::Submitted).await;

    let second = ctx
        .manager
        .create_transaction(request("oracle").with_idempotency_key("round-981"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.status, TxStatus::Submitted);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(ctx.gateway.broadcast_count(), 1);

    // The same key from another service is a different request.
    let other = ctx
        .manager
        .create_transaction(request("vrf").with_idempotency_key("round-981"))
        .await
        .unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn test_repeated_get_is_byte_identical() {
    let ctx = context();
    let tx = submitted(&ctx, "oracle").await;

    let a = serde_json::to_vec(&ctx.manager.get_transaction(&tx.id).await.unwrap()).unwrap();
    let b = serde_json::to_vec(&ctx.manager.get_transaction(&tx.id).await.unwrap()).unwrap();
    assert_eq!(a, b);

    let by_hash = ctx
        .manager
        .get_transaction_by_hash(tx.hash.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(serde_json::to_vec(&by_hash).unwrap(), a);
}

#[tokio::test]
async fn test_event_logs_are_valid_paths() {
    let ctx = context();
    let confirmed = submitted(&ctx, "oracle").await;
    let pending = submitted(&ctx, "datafeed").await;
    let stuck = submitted(&ctx, "automation").await;
    let t0 = [&confirmed, &pending, &stuck]
        .iter()
        .filter_map(|tx| tx.submitted_at)
        .max()
        .unwrap();

    ctx.gateway.set_in_mempool(pending.hash.as_deref().unwrap(), true);
    ctx.gateway.set_in_mempool(confirmed.hash.as_deref().unwrap(), true);
    let tracker = ctx.manager.tracker();
    tracker.tick_at(at(t0, 15)).await;

    ctx.gateway.set_receipt(confirmed.hash.as_deref().unwrap(), receipt(1));
    tracker.tick_at(at(t0, 45)).await;
    ctx.gateway.set_receipt(confirmed.hash.as_deref().unwrap(), receipt(3));
    tracker.tick_at(at(t0, 75)).await;
    tracker.tick_at(at(t0, 700)).await;

    for tx in [&confirmed, &pending, &stuck] {
        let events = ctx.manager.get_events(&tx.id).await.unwrap();
        assert!(is_valid_path(&statuses(&events)), "{:?}", statuses(&events));
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i as u64);
        }
    }

    let expected = [
        (&confirmed, TxStatus::Confirmed),
        (&pending, TxStatus::Expired),
        (&stuck, TxStatus::Expired),
    ];
    for (tx, status) in expected {
        assert_eq!(ctx.manager.get_transaction(&tx.id).await.unwrap().status, status);
    }
}

#[tokio::test]
async fn test_retry_creates_linked_record() {
    let ctx = context();
    ctx.gateway
        .fail_next_broadcast(tx_manager::gateway::GatewayError::Rejected("insufficient GAS".into()));
    let failed = ctx.manager.create_transaction(request("oracle")).await.unwrap();
    let failed = wait_for_status(&ctx, &failed.id, TxStatus::Failed).await;
    assert!(failed.error.as_deref().unwrap().contains("insufficient GAS"));

    let retry = ctx.manager.retry(&failed.id).await.unwrap();
    assert_ne!(retry.id, failed.id);
    assert_eq!(retry.retry_of.as_deref(), Some(failed.id.as_str()));
    assert_eq!(retry.payload, failed.payload);

    let retry = wait_for_status(&ctx, &retry.id, TxStatus::Submitted).await;
    assert_ne!(retry.hash, None);
    assert_eq!(
        ctx.manager.get_transaction(&failed.id).await.unwrap().status,
        TxStatus::Failed
    );

    let err = ctx.manager.retry(&retry.id).await.unwrap_err();
    assert!(matches!(err, ManagerError::NotRetryable(TxStatus::Submitted)));
}

#[tokio::test]
async fn test_invalid_request_creates_nothing() {
    let ctx = context();
    let err = ctx
        .manager
        .create_transaction(request("unregistered"))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Validation(_)));

    let page = ctx
        .manager
        .list_transactions(&TransactionFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(ctx.gateway.broadcast_count(), 0);
}

#[tokio::test]
async fn test_list_by_service_and_status() {
    let ctx = context();
    submitted(&ctx, "oracle").await;
    submitted(&ctx, "oracle").await;
    submitted(&ctx, "vrf").await;

    let filter = TransactionFilter {
        service: Some("oracle".into()),
        status: Some(TxStatus::Submitted),
        entity: None,
    };
    let page = ctx
        .manager
        .list_transactions(&filter, PageRequest::new(0, 1))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].service, "oracle");
}
