//! Postgres published-version store against a live database.
//!
//! Skipped unless `PUBVER_TEST_DATABASE_URL` points at a database the test may
//! create tables in. Each test works in its own freshly created table.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use pubver_core::{AggregateRootId, AggregateRootTypeName, ProcessorName};
use pubver_infra::config::PublishedVersionStoreConfig;
use pubver_infra::published_version::{
    PostgresPublishedVersionStore, PublishedVersionErrorKind, PublishedVersionStore,
};

const DATABASE_URL_ENV: &str = "PUBVER_TEST_DATABASE_URL";

struct Fixture {
    pool: PgPool,
    table: String,
    store: PostgresPublishedVersionStore,
}

impl Fixture {
    async fn teardown(self) {
        let drop = format!("DROP TABLE IF EXISTS {}", self.table);
        sqlx::query(&drop).execute(&self.pool).await.unwrap();
    }
}

async fn fixture(label: &str) -> Option<Fixture> {
    let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
        eprintln!("{DATABASE_URL_ENV} not set; skipping");
        return None;
    };
    pubver_observability::init_for_tests();

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .unwrap();

    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default().unsigned_abs();
    let table = format!("pv_{label}_{suffix}");
    let constraint = format!("uk_{table}");
    let ddl = format!(
        "CREATE TABLE {table} (
            processor_name           TEXT        NOT NULL,
            aggregate_root_type_name TEXT        NOT NULL,
            aggregate_root_id        TEXT        NOT NULL,
            version                  INTEGER     NOT NULL,
            gmt_create               TIMESTAMPTZ NOT NULL,
            CONSTRAINT {constraint} UNIQUE (processor_name, aggregate_root_id)
        )"
    );
    sqlx::query(&ddl).execute(&pool).await.unwrap();

    let config = PublishedVersionStoreConfig::new(table.clone(), constraint).unwrap();
    let store = PostgresPublishedVersionStore::new(pool.clone(), config);
    Some(Fixture { pool, table, store })
}

fn key() -> (ProcessorName, AggregateRootTypeName, AggregateRootId) {
    (
        ProcessorName::new("P1").unwrap(),
        AggregateRootTypeName::new("Order").unwrap(),
        AggregateRootId::new("A1").unwrap(),
    )
}

async fn row_count(fixture: &Fixture) -> i64 {
    let count = format!("SELECT COUNT(*) FROM {}", fixture.table);
    sqlx::query_scalar(&count).fetch_one(&fixture.pool).await.unwrap()
}

#[tokio::test]
async fn sequential_publishing_and_replays() {
    let Some(fx) = fixture("seq").await else { return };
    let (p, t, a) = key();

    assert_eq!(fx.store.get_published_version(&p, &t, &a).await, Ok(0));
    assert_eq!(fx.store.update_published_version(&p, &t, &a, 1).await, Ok(1));
    assert_eq!(fx.store.update_published_version(&p, &t, &a, 2).await, Ok(1));
    assert_eq!(fx.store.get_published_version(&p, &t, &a).await, Ok(2));

    let err = fx.store.update_published_version(&p, &t, &a, 2).await.unwrap_err();
    assert_eq!(err.kind(), PublishedVersionErrorKind::VersionConflict);
    assert_eq!(fx.store.get_published_version(&p, &t, &a).await, Ok(2));

    fx.teardown().await;
}

#[tokio::test]
async fn duplicate_first_insert_is_absorbed() {
    let Some(fx) = fixture("dup").await else { return };
    let (p, t, a) = key();

    assert_eq!(fx.store.update_published_version(&p, &t, &a, 1).await, Ok(1));
    assert_eq!(fx.store.update_published_version(&p, &t, &a, 1).await, Ok(1));
    assert_eq!(row_count(&fx).await, 1);

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_inserts_leave_one_row() {
    let Some(fx) = fixture("race").await else { return };
    let store = Arc::new(fx.store.clone());
    let (p, t, a) = key();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let (p, t, a) = (p.clone(), t.clone(), a.clone());
        tasks.push(tokio::spawn(async move {
            store.update_published_version(&p, &t, &a, 1).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(1));
    }

    assert_eq!(row_count(&fx).await, 1);
    assert_eq!(fx.store.get_published_version(&p, &t, &a).await, Ok(1));

    fx.teardown().await;
}

#[tokio::test]
async fn update_without_a_row_is_a_conflict() {
    let Some(fx) = fixture("absent").await else { return };
    let (p, t, a) = key();

    let err = fx.store.update_published_version(&p, &t, &a, 5).await.unwrap_err();
    assert_eq!(err.kind(), PublishedVersionErrorKind::VersionConflict);
    assert_eq!(row_count(&fx).await, 0);

    fx.teardown().await;
}

#[tokio::test]
async fn versions_beyond_the_column_range_are_unknown_errors() {
    let Some(fx) = fixture("range").await else { return };
    let (p, t, a) = key();

    let err = fx
        .store
        .update_published_version(&p, &t, &a, u32::MAX)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), PublishedVersionErrorKind::UnknownPersistenceError);

    fx.teardown().await;
}

#[tokio::test]
async fn missing_table_is_not_a_version_conflict() {
    let Ok(url) = std::env::var(DATABASE_URL_ENV) else { return };
    let pool = PgPoolOptions::new().connect(&url).await.unwrap();
    let config = PublishedVersionStoreConfig::new("pv_does_not_exist", "uk_missing").unwrap();
    let store = PostgresPublishedVersionStore::new(pool, config);
    let (p, t, a) = key();

    let err = store.get_published_version(&p, &t, &a).await.unwrap_err();
    assert_ne!(err.kind(), PublishedVersionErrorKind::VersionConflict);
}
