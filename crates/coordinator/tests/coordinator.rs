//! ConsistencyCoordinator against the mock gateway and in-memory stores:
//! ledger-first creation, partial writes, ambiguous outcomes, merged reads
//! and replay.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use assetlink_coordinator::{
    ConsistencyCoordinator, CoordinatorConfig, CoordinatorError, LedgerState, MergedView,
    NewRecord, ReplayOutcome,
};
use assetlink_ledger_gateway::{
    testutil::{mock_client, MockConnector, MockGateway, OrderingFault, MVCC_READ_CONFLICT},
    Asset, LedgerError, MISSING_ASSET_MARKER,
};
use assetlink_offchain_store::{
    testutil::{FailingStore, HangingStore},
    DonorInfo, EnrichmentRecord, MemoryOffchainStore, OffchainStore, RecipientInfo,
    StorageError,
};
use tokio::task::JoinSet;

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .readback_attempts(3)
        .readback_delay(Duration::from_millis(5))
        .offchain_timeout(Duration::from_millis(100))
        .build()
        .unwrap()
}

fn coordinator_with(
    gateway: &MockGateway,
    store: Arc<dyn OffchainStore>,
) -> (ConsistencyCoordinator, Arc<MockConnector>) {
    let (client, connector) = mock_client(gateway);
    (ConsistencyCoordinator::new(client, store, test_config()), connector)
}

fn coordinator(gateway: &MockGateway) -> (ConsistencyCoordinator, FailingStore) {
    let store = FailingStore::new(MemoryOffchainStore::new());
    let (coordinator, _) = coordinator_with(gateway, Arc::new(store.clone()));
    (coordinator, store)
}

fn chair() -> NewRecord {
    NewRecord::builder()
        .item_type("chair")
        .condition("good")
        .donor_id("d1")
        .current_owner("d1")
        .status("available")
        .build()
}

#[tokio::test]
async fn create_chair_with_default_enrichment() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);

    let created = coordinator.create_record(chair()).await.expect("create succeeds");
    let id = created.item_id().to_owned();
    assert!(id.starts_with("donation-"), "unexpected id {id}");

    let asset = &created.asset;
    assert_eq!(asset.item_type.as_deref(), Some("chair"));
    assert_eq!(asset.donor_id.as_deref(), Some("d1"));
    assert_eq!(asset.current_owner.as_deref(), Some("d1"));
    assert_eq!(asset.status.as_deref(), Some("available"));
    let timestamp = asset.timestamp.as_deref().expect("timestamp is generated");
    chrono::DateTime::parse_from_rfc3339(timestamp).expect("timestamp is RFC 3339");

    let view = coordinator.get_merged_record(&id).await.unwrap();
    let MergedView::Full { ledger, offchain } = &view else {
        panic!("expected both halves, got {view:?}");
    };
    assert_eq!(ledger, asset);
    assert_eq!(offchain.item_id, id);
    assert_eq!(offchain.quantity, 1);
    assert!(offchain.images.is_empty());
    assert!(offchain.category.is_none());
    assert!(offchain.donor_info.is_none());
    assert!(offchain.recipient_info.is_none());
    assert!(offchain.notes.is_none());
    assert!(offchain.appraisal_value.is_none());
}

#[tokio::test]
async fn create_round_trips_enrichment() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);
    let input = NewRecord {
        category: Some("furniture".into()),
        quantity: Some(4),
        donor_info: Some(DonorInfo {
            name: Some("Ana".into()),
            email: Some("ana@example.org".into()),
            contact_no: None,
        }),
        recipient_info: Some(RecipientInfo {
            school: Some("Riverside Elementary".into()),
            contact: None,
        }),
        images: vec!["front.jpg".into(), "back.jpg".into()],
        notes: Some("slight scratch".into()),
        appraisal_value: Some(35.0),
        ..chair()
    };

    let created = coordinator.create_record(input.clone()).await.unwrap();
    let view = coordinator.get_merged_record(created.item_id()).await.unwrap();

    let offchain = view.offchain().expect("enrichment written");
    assert_eq!(offchain, &created.enrichment);
    assert_eq!(offchain.category, input.category);
    assert_eq!(offchain.quantity, 4);
    assert_eq!(offchain.donor_info, input.donor_info);
    assert_eq!(offchain.recipient_info, input.recipient_info);
    assert_eq!(offchain.images, input.images);
    assert_eq!(offchain.appraisal_value, Some(35.0));
    assert_eq!(view.ledger().and_then(|a| a.condition.as_deref()), Some("good"));
}

#[tokio::test]
async fn invalid_input_writes_nothing() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator
        .create_record(NewRecord { donor_id: "  ".into(), ..chair() })
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::InvalidInput { .. }), "unexpected: {err:?}");
    assert_eq!(err.ledger_state(), LedgerState::Untouched);
    assert_eq!(gateway.endorsements(), 0);
    assert_eq!(store.upsert_attempts(), 0);
}

#[tokio::test]
async fn ledger_rejection_skips_offchain_write() {
    let gateway = MockGateway::new();
    gateway.reject_next_endorsement("policy violation");
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator.create_record(chair()).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Ledger(LedgerError::Endorsement { .. })));
    assert_eq!(err.ledger_state(), LedgerState::Untouched);
    assert_eq!(gateway.asset_count(), 0);
    assert_eq!(store.upsert_attempts(), 0);
}

#[tokio::test]
async fn invalidated_commit_skips_offchain_write() {
    let gateway = MockGateway::new();
    gateway.invalidate_next_commit(MVCC_READ_CONFLICT);
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator.create_record(chair()).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Ledger(LedgerError::Commit { .. })));
    assert_eq!(err.ledger_state(), LedgerState::Untouched);
    assert_eq!(store.upsert_attempts(), 0);
}

#[tokio::test]
async fn offchain_failure_is_partial_write() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);
    store.fail_next_upsert(StorageError::connection("connection reset"));

    let err = coordinator.create_record(chair()).await.unwrap_err();

    let CoordinatorError::PartialWrite { asset, enrichment, source } = &err else {
        panic!("expected a partial write, got {err:?}");
    };
    assert_eq!(err.ledger_state(), LedgerState::Committed);
    assert!(matches!(source, StorageError::Connection { .. }));
    assert_eq!(asset.item_id, enrichment.item_id);
    assert_eq!(asset.status.as_deref(), Some("available"));

    // The ledger asset stands and is readable.
    assert_eq!(gateway.asset(&asset.item_id).as_ref(), Some(asset.as_ref()));
    let view = coordinator.get_merged_record(&asset.item_id).await.unwrap();
    assert_eq!(view, MergedView::LedgerOnly(asset.as_ref().clone()));
}

#[tokio::test]
async fn replay_completes_partial_write_once() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);
    store.fail_next_upsert(StorageError::connection("connection reset"));

    let err = coordinator.create_record(chair()).await.unwrap_err();
    let pending = err.pending_enrichment().expect("enrichment to replay").clone();

    let first = coordinator.replay_enrichment(pending.clone()).await.unwrap();
    assert_eq!(first, ReplayOutcome::Written(pending.clone()));

    // A second replay with different content keeps the stored record.
    let mut altered = pending.clone();
    altered.notes = Some("changed".into());
    let second = coordinator.replay_enrichment(altered).await.unwrap();
    assert!(!second.was_written());
    assert_eq!(second.record(), &pending);
    assert_eq!(store.successful_upserts(), 1);

    let view = coordinator.get_merged_record(&pending.item_id).await.unwrap();
    assert!(matches!(view, MergedView::Full { .. }));
}

#[tokio::test]
async fn replay_requires_ledger_asset() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator
        .replay_enrichment(EnrichmentRecord::new("donation-missing"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::NotFound { ref item_id } if item_id == "donation-missing"
    ));

    let err = coordinator.replay_enrichment(EnrichmentRecord::new(" ")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidInput { .. }));
    assert_eq!(store.upsert_attempts(), 0);
}

#[tokio::test]
async fn hanging_offchain_store_times_out() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator_with(&gateway, Arc::new(HangingStore));

    let err = coordinator.create_record(chair()).await.unwrap_err();

    match err {
        CoordinatorError::PartialWrite { source: StorageError::Timeout { elapsed }, .. } => {
            assert_eq!(elapsed, Duration::from_millis(100));
        },
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(gateway.asset_count(), 1);
}

#[tokio::test]
async fn ambiguous_commit_confirmed_by_read_back() {
    let gateway = MockGateway::new();
    gateway.fail_next_ordering(OrderingFault::TimedOutApplied);
    let (coordinator, store) = coordinator(&gateway);

    let created = coordinator.create_record(chair()).await.expect("read-back confirms commit");

    assert_eq!(gateway.submissions(), 1, "never resubmitted");
    assert_eq!(store.successful_upserts(), 1);
    assert!(gateway.asset(created.item_id()).is_some());
}

#[tokio::test]
async fn lost_commit_status_confirmed_by_read_back() {
    let gateway = MockGateway::new();
    gateway.lose_next_commit_status();
    let (coordinator, store) = coordinator(&gateway);

    coordinator.create_record(chair()).await.expect("read-back confirms commit");
    assert_eq!(gateway.submissions(), 1);
    assert_eq!(store.successful_upserts(), 1);
}

#[tokio::test]
async fn ambiguous_dropped_write_is_outcome_unknown() {
    let gateway = MockGateway::new();
    gateway.fail_next_ordering(OrderingFault::TimedOutDropped);
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator.create_record(chair()).await.unwrap_err();

    let CoordinatorError::OutcomeUnknown { item_id, reason, pending_enrichment } = &err else {
        panic!("expected unknown outcome, got {err:?}");
    };
    assert!(reason.is_ambiguous());
    assert_eq!(pending_enrichment.as_ref().map(|e| &e.item_id), Some(item_id));
    assert_eq!(err.ledger_state(), LedgerState::Unknown);
    assert_eq!(gateway.submissions(), 1, "never resubmitted");
    assert_eq!(store.upsert_attempts(), 0, "enrichment withheld");

    // Nothing committed, so the pending enrichment cannot be replayed.
    let pending = err.pending_enrichment().unwrap().clone();
    let replay = coordinator.replay_enrichment(pending).await.unwrap_err();
    assert!(matches!(replay, CoordinatorError::NotFound { .. }));
}

#[tokio::test]
async fn ambiguous_write_visible_later_can_be_replayed() {
    let gateway = MockGateway::new();
    gateway.fail_next_ordering(OrderingFault::TimedOutApplied);
    gateway.delay_visibility_of_next_create(3);
    let (coordinator, _) = coordinator(&gateway);

    let err = coordinator.create_record(chair()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::OutcomeUnknown { .. }), "unexpected: {err:?}");

    let pending = err.pending_enrichment().unwrap().clone();
    let outcome = coordinator.replay_enrichment(pending).await.unwrap();
    assert!(outcome.was_written());
}

#[tokio::test]
async fn visibility_lag_is_retried_internally() {
    let gateway = MockGateway::new();
    gateway.delay_visibility_of_next_create(2);
    let (coordinator, _) = coordinator(&gateway);

    let created = coordinator.create_record(chair()).await.unwrap();
    assert_eq!(created.asset.item_type.as_deref(), Some("chair"));
    assert_eq!(gateway.evaluations(), 3, "two hidden reads, then visible");
}

#[tokio::test]
async fn lag_beyond_read_back_uses_committed_payload() {
    let gateway = MockGateway::new();
    gateway.delay_visibility_of_next_create(10);
    let (coordinator, store) = coordinator(&gateway);

    let created = coordinator.create_record(chair()).await.expect("commit was definite");
    assert_eq!(created.asset.status.as_deref(), Some("available"));
    assert_eq!(gateway.evaluations(), 3);
    assert_eq!(store.successful_upserts(), 1);
}

#[tokio::test]
async fn update_status_returns_read_back_asset() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);
    let created = coordinator.create_record(chair()).await.unwrap();
    let upserts = store.upsert_attempts();

    let updated = coordinator.update_status(created.item_id(), "delivered").await.unwrap();

    assert_eq!(updated.status.as_deref(), Some("delivered"));
    assert_eq!(updated.item_type.as_deref(), Some("chair"));
    assert_eq!(gateway.asset(created.item_id()), Some(updated));
    assert_eq!(store.upsert_attempts(), upserts, "status is ledger-only");
}

#[tokio::test]
async fn update_status_of_missing_id_is_not_found() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);

    let err = coordinator.update_status("donation-404", "delivered").await.unwrap_err();

    assert!(matches!(err, CoordinatorError::NotFound { ref item_id } if item_id == "donation-404"));
    assert_eq!(gateway.endorsements(), 0, "rejected before submitting");
    assert_eq!(store.upsert_attempts(), 0);
    assert!(store.inner().is_empty());
}

#[tokio::test]
async fn update_status_of_asset_gone_at_endorsement_is_not_found() {
    let gateway = MockGateway::new();
    gateway.insert_asset(Asset { item_id: "donation-a".into(), ..Asset::default() });
    gateway.reject_next_endorsement(format!("the asset donation-a {MISSING_ASSET_MARKER}"));
    let (coordinator, _) = coordinator(&gateway);

    let err = coordinator.update_status("donation-a", "delivered").await.unwrap_err();

    assert!(matches!(err, CoordinatorError::NotFound { ref item_id } if item_id == "donation-a"));
    assert_eq!(err.ledger_state(), LedgerState::Untouched);
    assert_eq!(gateway.submissions(), 0);
}

#[tokio::test]
async fn update_status_rejects_blank_status() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);

    let err = coordinator.update_status("donation-1", " ").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidInput { .. }));
}

#[tokio::test]
async fn update_status_ambiguous_applied_is_confirmed() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);
    let created = coordinator.create_record(chair()).await.unwrap();
    gateway.fail_next_ordering(OrderingFault::TimedOutApplied);

    let updated = coordinator.update_status(created.item_id(), "in-transit").await.unwrap();
    assert_eq!(updated.status.as_deref(), Some("in-transit"));
}

#[tokio::test]
async fn update_status_ambiguous_dropped_is_outcome_unknown() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);
    let created = coordinator.create_record(chair()).await.unwrap();
    gateway.fail_next_ordering(OrderingFault::TimedOutDropped);

    let err = coordinator.update_status(created.item_id(), "in-transit").await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::OutcomeUnknown { pending_enrichment: None, .. }
    ));
    let current = gateway.asset(created.item_id()).unwrap();
    assert_eq!(current.status.as_deref(), Some("available"));
}

#[tokio::test]
async fn get_merged_offchain_only() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);
    store.inner().upsert(&EnrichmentRecord::new("donation-orphan")).await.unwrap();

    let view = coordinator.get_merged_record("donation-orphan").await.unwrap();

    assert!(matches!(view, MergedView::OffchainOnly(ref r) if r.item_id == "donation-orphan"));
    let json = serde_json::to_value(&view).unwrap();
    assert!(json["ledger"].is_null());
}

#[tokio::test]
async fn get_merged_absent_from_both_is_not_found() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);

    let err = coordinator.get_merged_record("donation-404").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound { .. }));
}

#[tokio::test]
async fn get_merged_propagates_read_failures() {
    let gateway = MockGateway::new();
    let (coordinator, store) = coordinator(&gateway);

    // One attempt plus three retries.
    gateway.fail_next_evaluations(4);
    let err = coordinator.get_merged_record("donation-1").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Ledger(LedgerError::Connection { .. })));
    assert!(err.is_transient());

    store.fail_next_find(StorageError::connection("pool exhausted"));
    let err = coordinator.get_merged_record("donation-1").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Offchain(StorageError::Connection { .. })));
}

#[tokio::test]
async fn list_all_skips_rows_without_id() {
    let gateway = MockGateway::new();
    gateway.insert_asset(Asset { item_id: "donation-a".into(), ..Asset::default() });
    gateway.insert_raw_row(r#"{"status":"available"}"#);
    gateway.insert_raw_row(r#"{"itemID":"   ","itemType":"desk"}"#);
    gateway.insert_raw_row(r#"{"itemID":""}"#);
    gateway.insert_raw_row(r#"{"itemID":null,"itemType":"desk"}"#);
    gateway.insert_raw_row("42");
    let (coordinator, _) = coordinator(&gateway);

    let assets = coordinator.list_all().await.unwrap();

    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].item_id, "donation-a");
}

#[tokio::test]
async fn list_all_empty_ledger() {
    let gateway = MockGateway::new();
    let (coordinator, _) = coordinator(&gateway);

    assert!(coordinator.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_creates_get_distinct_ids() {
    let gateway = MockGateway::new();
    let store = MemoryOffchainStore::new();
    let (coordinator, connector) = coordinator_with(&gateway, Arc::new(store.clone()));
    let coordinator = Arc::new(coordinator);

    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move { coordinator.create_record(chair()).await });
    }
    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ids.push(joined.unwrap().expect("every create succeeds").item_id().to_owned());
    }
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 12);
    assert_eq!(gateway.asset_count(), 12);
    assert_eq!(store.len(), 12);
    assert_eq!(connector.connects(), 1, "one shared session");
}
