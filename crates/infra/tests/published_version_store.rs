//! Published-version cursor behaviour against the in-memory backend.
//!
//! Covers the write protocol (insert vs. CAS update), idempotent absorption of
//! concurrent first writes, and the read path default.

use std::sync::Arc;

use proptest::prelude::*;
use tokio::sync::Barrier;

use pubver_core::{AggregateRootId, AggregateRootTypeName, ProcessorName};
use pubver_infra::published_version::{
    InMemoryPublishedVersionStore, PublishedVersionError, PublishedVersionErrorKind,
    PublishedVersionStore,
};

fn key(
    processor: &str,
    type_name: &str,
    id: &str,
) -> (ProcessorName, AggregateRootTypeName, AggregateRootId) {
    (
        ProcessorName::new(processor).unwrap(),
        AggregateRootTypeName::new(type_name).unwrap(),
        AggregateRootId::new(id).unwrap(),
    )
}

#[tokio::test]
async fn sequential_publishing_rejects_replayed_versions() {
    pubver_observability::init_for_tests();
    let store = InMemoryPublishedVersionStore::new();
    let (p, t, a) = key("P1", "Order", "A1");

    assert_eq!(store.update_published_version(&p, &t, &a, 1).await, Ok(1));
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(1));

    assert_eq!(store.update_published_version(&p, &t, &a, 2).await, Ok(1));
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(2));

    let err = store.update_published_version(&p, &t, &a, 2).await.unwrap_err();
    assert_eq!(
        err,
        PublishedVersionError::VersionConflict {
            processor_name: p.clone(),
            aggregate_root_id: a.clone(),
            target_version: 2,
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_writes_create_one_row_and_all_succeed() {
    pubver_observability::init_for_tests();
    let store = Arc::new(InMemoryPublishedVersionStore::new());
    let (p, t, a) = key("P1", "Order", "A1");

    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));
    let mut tasks = Vec::with_capacity(writers);
    for _ in 0..writers {
        let store = store.clone();
        let barrier = barrier.clone();
        let (p, t, a) = (p.clone(), t.clone(), a.clone());
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            store.update_published_version(&p, &t, &a, 1).await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(1));
    }
    assert_eq!(store.len(), 1);
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_to_the_same_version_have_one_winner() {
    let store = Arc::new(InMemoryPublishedVersionStore::new());
    let (p, t, a) = key("P1", "Order", "A1");
    store.update_published_version(&p, &t, &a, 1).await.unwrap();

    let writers = 6;
    let barrier = Arc::new(Barrier::new(writers));
    let mut tasks = Vec::with_capacity(writers);
    for _ in 0..writers {
        let store = store.clone();
        let barrier = barrier.clone();
        let (p, t, a) = (p.clone(), t.clone(), a.clone());
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            store.update_published_version(&p, &t, &a, 2).await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(1) => winners += 1,
            Err(err) if err.kind() == PublishedVersionErrorKind::VersionConflict => conflicts += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, writers - 1);
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(2));
}

#[tokio::test]
async fn cursor_cannot_begin_above_version_one() {
    let store = InMemoryPublishedVersionStore::new();
    let (p, t, a) = key("P1", "Order", "A1");

    let err = store.update_published_version(&p, &t, &a, 5).await.unwrap_err();
    assert_eq!(err.kind(), PublishedVersionErrorKind::VersionConflict);
    assert!(store.is_empty());
    assert!(store.record(&p, &a).is_none());
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(0));
}

#[tokio::test]
async fn skipping_a_version_is_a_conflict_that_changes_nothing() {
    let store = InMemoryPublishedVersionStore::new();
    let (p, t, a) = key("P1", "Order", "A1");
    store.update_published_version(&p, &t, &a, 1).await.unwrap();
    let before = store.record(&p, &a).unwrap();

    let err = store.update_published_version(&p, &t, &a, 3).await.unwrap_err();
    assert!(err.is_version_conflict());
    assert_eq!(store.record(&p, &a).unwrap(), before);
}

#[tokio::test]
async fn unknown_cursor_reads_as_unpublished() {
    let store = InMemoryPublishedVersionStore::new();
    let (p, t, a) = key("P9", "Invoice", "never-written");
    assert_eq!(store.get_published_version(&p, &t, &a).await, Ok(0));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    /// Property: `update(v)` succeeds iff the stored version is exactly `v - 1`
    /// (or `v == 1` with a row already at 1, which is absorbed), and a failed
    /// write never changes the stored version.
    #[test]
    fn updates_succeed_exactly_on_the_successor(
        targets in prop::collection::vec(0u32..8, 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = InMemoryPublishedVersionStore::new();
            let (p, t, a) = key("P1", "Order", "A1");
            let mut model = 0u32;

            for target in targets {
                let before = store.get_published_version(&p, &t, &a).await.unwrap();
                prop_assert_eq!(before, model);

                let result = store.update_published_version(&p, &t, &a, target).await;
                let duplicate_first = target == 1 && model >= 1;

                if target != 0 && target == model + 1 {
                    prop_assert_eq!(result, Ok(1));
                    model = target;
                } else if duplicate_first {
                    prop_assert_eq!(result, Ok(1));
                } else {
                    let err = result.unwrap_err();
                    prop_assert_eq!(err.kind(), PublishedVersionErrorKind::VersionConflict);
                }

                let after = store.get_published_version(&p, &t, &a).await.unwrap();
                prop_assert_eq!(after, model);
            }
            Ok(())
        })?;
    }
}
