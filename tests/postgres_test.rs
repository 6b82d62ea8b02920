//! Postgres backend tests against a live database.
//!
//! Skipped unless `TEST_POSTGRES_URL` points at a reachable server.

use sql_chat_gateway::config::{BackendConfig, PoolOptions};
use sql_chat_gateway::db::{Backend, ConnectorState, PostgresConfig, StatementExecutor};
use sql_chat_gateway::models::BackendKind;
use std::time::Duration;

fn test_url() -> Option<String> {
    std::env::var("TEST_POSTGRES_URL").ok().filter(|u| !u.is_empty())
}

fn backend(url: String) -> Backend {
    Backend::from_config(BackendConfig::Postgres(PostgresConfig {
        url,
        pool_options: PoolOptions {
            max_connections: Some(2),
            ..PoolOptions::default()
        },
        query_timeout: Duration::from_secs(10),
    }))
}

#[tokio::test]
async fn test_rows_keep_column_order_and_types() {
    let Some(url) = test_url() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let backend = backend(url);

    let rows = backend
        .run("select 2 as b, 'x'::text as a, true as flag, null::int as missing")
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(columns, vec!["b", "a", "flag", "missing"]);
    assert_eq!(rows[0]["b"], 2);
    assert_eq!(rows[0]["a"], "x");
    assert_eq!(rows[0]["flag"], true);
    assert!(rows[0]["missing"].is_null());

    backend.shutdown().await;
}

#[tokio::test]
async fn test_uuid_array_interval_and_numeric_values_are_decoded() {
    let Some(url) = test_url() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let backend = backend(url);

    let rows = backend
        .run(
            "select '6f1c2d4e-8b3a-4c5d-9e7f-0a1b2c3d4e5f'::uuid as id, \
             array_agg(x) as ints, array['a', null]::text[] as tags, \
             interval '1 day 02:00:00' as iv, 19.99::numeric(10,2) as price, \
             'a'::varchar as v \
             from generate_series(1, 3) as x",
        )
        .await
        .unwrap();

    let row = &rows[0];
    assert_eq!(row["id"], "6f1c2d4e-8b3a-4c5d-9e7f-0a1b2c3d4e5f");
    assert_eq!(row["ints"], serde_json::json!([1, 2, 3]));
    assert_eq!(row["tags"], serde_json::json!(["a", null]));
    assert_eq!(row["iv"], "1 day 02:00:00");
    assert_eq!(row["price"], "19.99");
    assert_eq!(row["v"], "a");

    let generated = backend
        .run("select gen_random_uuid() as id")
        .await
        .unwrap();
    assert!(generated[0]["id"].as_str().is_some_and(|id| id.len() == 36));

    backend.shutdown().await;
}

#[tokio::test]
async fn test_connects_lazily_and_resets() {
    let Some(url) = test_url() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let backend = backend(url);
    assert_eq!(backend.backend(), BackendKind::Postgres);
    assert_eq!(backend.status().await, ConnectorState::Uninitialized);

    backend.ensure_ready().await.unwrap();
    assert_eq!(backend.status().await, ConnectorState::Ready { generation: 1 });

    backend.reset().await;
    assert_eq!(backend.status().await, ConnectorState::Uninitialized);

    backend.run("select 1").await.unwrap();
    assert_eq!(backend.status().await, ConnectorState::Ready { generation: 2 });
}

#[tokio::test]
async fn test_sql_errors_surface_without_reconnect() {
    let Some(url) = test_url() else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let backend = backend(url);

    let err = backend
        .run("select * from table_that_does_not_exist_42")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("does not exist"));
    assert_eq!(backend.status().await, ConnectorState::Ready { generation: 1 });
}
