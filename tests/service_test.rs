//! End-to-end service behaviour against a scripted executor.
//!
//! These exercise routing, chunking, flushing and metadata resolution through the
//! public API only. Every statement the service sends is recorded, so assertions are
//! made on the SQL that would have reached PostgreSQL.

use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use stagehand::definition::{ColumnDefinition, IndexDefinition, TableDefinition};
use stagehand::query::{AggregationSpec, SelectQuerySpec};
use stagehand::test_helpers::RecordingExecutor;
use stagehand::{
    FlushConfig, FlushMode, GenericRow, MetadataCache, MetadataRegistry, RowValues,
    StagehandConfig, StagehandError, TableService, WriteTarget,
};
use std::sync::Arc;

fn config(batch_size: usize, mode: FlushMode) -> StagehandConfig {
    StagehandConfig {
        flush: FlushConfig { batch_size, mode },
        ..StagehandConfig::default()
    }
}

fn service_with(
    executor: RecordingExecutor,
    batch_size: usize,
    mode: FlushMode,
) -> TableService<RecordingExecutor> {
    TableService::new(executor, &config(batch_size, mode))
        .expect("valid config")
        .with_cache(Arc::new(MetadataCache::new()))
}

fn service(executor: RecordingExecutor, batch_size: usize) -> TableService<RecordingExecutor> {
    service_with(executor, batch_size, FlushMode::Move)
}

fn fake_users(count: usize) -> Vec<RowValues> {
    (0..count)
        .map(|i| {
            let name: String = Name().fake();
            let email: String = SafeEmail().fake();
            let age: u8 = (18..90).fake();
            // Quotes in generated names exercise literal escaping.
            RowValues::from([
                ("id".to_string(), i.to_string()),
                ("name".to_string(), name),
                ("email".to_string(), email),
                ("age".to_string(), age.to_string()),
            ])
        })
        .collect()
}

fn inserted_row_count(sql: &str) -> usize {
    sql.matches("\n(").count()
}

/// Catalog answers for `public.users` with both tables present.
fn staged_users(executor: &RecordingExecutor) {
    executor.set_table_presence("public", "users", true, true);
    executor.describe_table(
        "public",
        "users",
        vec![
            RecordingExecutor::column_row("id", "int4", false),
            RecordingExecutor::column_row("name", "text", false),
            RecordingExecutor::column_row("age", "int2", true),
            RecordingExecutor::column_row("lastUpdateDate", "timestamp", false),
            RecordingExecutor::column_row("isDeleted", "bool", false),
        ],
    );
}

#[test]
fn test_bulk_insert_is_chunked_by_batch_size() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "users", true, true);
    let svc = service(executor, 2000);

    let summary = svc
        .insert_rows("public", "users", &fake_users(4500))
        .expect("insert succeeds");
    assert_eq!(summary.target, WriteTarget::Staging);
    assert_eq!(summary.rows_written, 4500);
    assert_eq!(summary.chunks, 3);

    let executed = svc.executor().executed();
    assert_eq!(executed.len(), 3);
    let sizes: Vec<usize> = executed.iter().map(|sql| inserted_row_count(sql)).collect();
    assert_eq!(sizes, vec![2000, 2000, 500]);
    for sql in &executed {
        assert!(sql.starts_with("INSERT INTO \"public\".\"__tmp_write_users\" ("));
        assert!(sql.ends_with(");"));
    }
}

#[test]
fn test_insert_without_staging_goes_to_actual_table() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "users", true, false);
    let svc = service(executor, 100);

    let summary = svc
        .insert_rows("public", "users", &fake_users(3))
        .expect("insert succeeds");
    assert_eq!(summary.target, WriteTarget::Actual);
    assert_eq!(summary.chunks, 1);
    let executed = svc.executor().executed();
    assert!(executed[0].starts_with("INSERT INTO \"public\".\"users\" ("));
    // Reserved columns are stamped in key order with the caller's columns.
    assert!(executed[0].contains(
        "(\"age\", \"email\", \"id\", \"isDeleted\", \"lastUpdateDate\", \"name\")"
    ));
}

#[test]
fn test_failing_chunk_stops_the_insert() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "users", true, true);
    executor.fail_after_executions(1);
    let svc = service(executor, 2000);

    let err = svc
        .insert_rows("public", "users", &fake_users(4500))
        .unwrap_err();
    assert!(matches!(err, StagehandError::OperationFailed { .. }));
    let message = err.to_string();
    assert!(message.contains("chunk 2/3"), "{message}");
    assert!(message.contains("2000 rows committed"), "{message}");
    // The third chunk is never attempted.
    assert_eq!(svc.executor().executed().len(), 2);
}

#[test]
fn test_move_flush_is_a_single_statement() {
    let executor = RecordingExecutor::new();
    staged_users(&executor);
    executor.affect_rows("WITH \"moved\"", [42]);
    let svc = service(executor, 1000);

    assert_eq!(svc.flush("public", "users").expect("flush succeeds"), 42);

    let executed = svc.executor().executed();
    assert_eq!(executed.len(), 1);
    let sql = &executed[0];
    assert!(sql.starts_with("WITH \"moved\" AS (\nDELETE FROM \"public\".\"__tmp_write_users\""));
    assert!(sql.contains("LIMIT 1000 FOR UPDATE SKIP LOCKED"));
    assert!(sql.contains("CAST(\"id\" AS int4)"));
    assert!(sql.contains("CAST(\"age\" AS int2)"));
    assert!(sql.contains("CAST(\"lastUpdateDate\" AS TIMESTAMP)"));
    assert!(sql.contains("CAST(\"isDeleted\" AS BOOLEAN)"));
    assert!(sql.ends_with("FROM \"moved\";"));
}

#[test]
fn test_flush_casts_user_defined_types_by_qualified_name() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("app", "moods", true, true);
    executor.describe_table(
        "app",
        "moods",
        vec![
            RecordingExecutor::column_row("id", "int4", false),
            RecordingExecutor::typed_column_row("m", "app", "mood", true),
            RecordingExecutor::typed_column_row("shouty", "public", "Mood", true),
            RecordingExecutor::typed_column_row("history", "app", "_mood", true),
            RecordingExecutor::column_row("lastUpdateDate", "timestamp", false),
            RecordingExecutor::column_row("isDeleted", "bool", false),
        ],
    );
    let svc = service(executor, 100);

    svc.flush("app", "moods").expect("flush succeeds");

    let sql = &svc.executor().executed()[0];
    assert!(sql.contains(r#"CAST("id" AS int4)"#), "{sql}");
    assert!(sql.contains(r#"CAST("m" AS "app"."mood")"#), "{sql}");
    assert!(sql.contains(r#"CAST("shouty" AS "public"."Mood")"#), "{sql}");
    assert!(sql.contains(r#"CAST("history" AS "app"."mood"[])"#), "{sql}");
}

#[test]
fn test_copy_flush_leaves_staging_rows() {
    let executor = RecordingExecutor::new();
    staged_users(&executor);
    let svc = service_with(executor, 500, FlushMode::Copy);

    svc.flush("public", "users").expect("flush succeeds");

    let executed = svc.executor().executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("INSERT INTO \"public\".\"users\" ("));
    assert!(executed[0].ends_with(
        "FROM \"public\".\"__tmp_write_users\" WHERE \"isDeleted\" = 'false' LIMIT 500;"
    ));
    assert!(!executed[0].contains("DELETE"));
}

#[test]
fn test_concurrent_flushes_use_skip_locked() {
    let executor = RecordingExecutor::new();
    staged_users(&executor);
    executor.affect_rows("WITH \"moved\"", [100, 100, 100, 37]);
    let svc = service(executor, 100);

    let promoted: u64 = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| svc.flush("public", "users").expect("flush succeeds")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    assert_eq!(promoted, 337);

    let executed = svc.executor().executed();
    assert_eq!(executed.len(), 4);
    assert!(executed.iter().all(|sql| sql.contains("FOR UPDATE SKIP LOCKED")));
}

#[test]
fn test_drain_flushes_until_empty() {
    let executor = RecordingExecutor::new();
    staged_users(&executor);
    executor.affect_rows("WITH \"moved\"", [500, 500, 120, 0]);
    let svc = service(executor, 500);

    assert_eq!(svc.drain("public", "users").expect("drain succeeds"), 1120);
    assert_eq!(svc.executor().executed().len(), 4);
}

#[test]
fn test_flush_failure_is_operation_failed() {
    let executor = RecordingExecutor::new();
    staged_users(&executor);
    executor.fail_executions_matching("SKIP LOCKED");
    let svc = service(executor, 100);

    let err = svc.flush("public", "users").unwrap_err();
    assert!(matches!(err, StagehandError::OperationFailed { .. }));
    assert!(err.to_string().contains("flushing public.users"));
}

#[test]
fn test_select_with_filters_and_aggregates() {
    let executor = RecordingExecutor::new();
    executor.respond_to(
        "FROM \"public\".\"employees\"",
        vec![
            GenericRow::new().with("dept", "sales").with("headcount", 4i64),
            GenericRow::new().with("dept", "support").with("headcount", 2i64),
        ],
    );
    let svc = service(executor, 100);

    let spec = SelectQuerySpec::new("public", "employees")
        .columns(["dept"])
        .filter("active", true)
        .aggregate(AggregationSpec::new("count", "id").alias("headcount"));
    let rows = svc.select(&spec).expect("select succeeds");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_str("dept"), Some("support"));

    assert_eq!(
        svc.executor().statements(),
        vec![
            "SELECT \"dept\", COUNT(\"id\") AS \"headcount\" FROM \"public\".\"employees\" \
             WHERE \"active\" = true GROUP BY \"dept\""
        ]
    );
}

#[test]
fn test_unknown_aggregate_is_rejected_before_sql() {
    let svc = service(RecordingExecutor::new(), 100);
    let spec = SelectQuerySpec::new("public", "employees")
        .aggregate(AggregationSpec::new("MEDIAN", "salary"));
    assert!(matches!(
        svc.select(&spec),
        Err(StagehandError::UnsupportedOperation(_))
    ));
    assert!(svc.executor().statements().is_empty());
}

#[test]
fn test_resolve_staging_only_table() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "events", false, true);
    executor.describe_table(
        "public",
        "__tmp_write_events",
        vec![
            RecordingExecutor::column_row("payload", "text", true),
            RecordingExecutor::column_row("lastUpdateDate", "text", true),
            RecordingExecutor::column_row("isDeleted", "text", true),
        ],
    );
    let svc = service(executor, 100);

    let def = svc
        .resolve_definition("public", "events", true)
        .expect("definition resolves");
    assert!(def.is_staging);
    assert_eq!(def.table_name, "events");
    assert!(def.indexes.is_empty());
    assert!(def.columns.iter().all(|c| c.column_type == "text"));
}

#[test]
fn test_create_table_invalidates_registry() {
    let registry = Arc::new(MetadataRegistry::from_columns(vec![(
        "public".to_string(),
        "__tmp_write_events".to_string(),
        "payload".to_string(),
    )]));
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "events", true, true);
    let svc = service(executor, 100).with_registry(Arc::clone(&registry));

    // Known to the registry: no probes.
    assert!(!svc.probe("public", "events").unwrap().actual);
    assert!(svc.executor().statements().is_empty());

    let def = TableDefinition::new(
        "public",
        "events",
        vec![ColumnDefinition::new("payload", "JSONB")],
    )
    .with_indexes(vec![IndexDefinition::new(["payload"]).using("gin")])
    .staging(true);
    svc.create_table(&def).expect("create succeeds");
    assert_eq!(svc.executor().executed().len(), 3);
    assert!(registry.presence("public", "events").is_none());

    // Forgotten by the registry: presence comes from live probes again.
    assert!(svc.probe("public", "events").unwrap().actual);
    assert!(svc
        .executor()
        .statements()
        .iter()
        .any(|sql| sql.contains("information_schema.tables")));
}

#[test]
fn test_flush_of_unknown_table_is_not_found() {
    let executor = RecordingExecutor::new();
    executor.set_table_presence("public", "ghost", false, true);
    let svc = service(executor, 100);

    let err = svc.flush("public", "ghost").unwrap_err();
    assert!(matches!(err, StagehandError::NotFound { .. }));
    assert!(svc.executor().executed().is_empty());
}

#[test]
fn test_default_cache_is_scoped_to_the_database_url() {
    let on = |url: &str| {
        let executor = RecordingExecutor::new();
        staged_users(&executor);
        let mut config = config(100, FlushMode::Move);
        config.database.url = url.to_string();
        TableService::new(executor, &config).expect("valid config")
    };

    let first = on("postgres://app:pw@scoped-cache-a:5432/app");
    first.resolve_definition("public", "users", false).unwrap();
    assert!(!first.executor().statements().is_empty());

    // Same database: served from the shared cache.
    let same = on("postgres://app:pw@scoped-cache-a:5432/app");
    same.resolve_definition("public", "users", false).unwrap();
    assert!(same.executor().statements().is_empty());

    // Another database: resolved from its own catalog.
    let other = on("postgres://app:pw@scoped-cache-b:5432/app");
    other.resolve_definition("public", "users", false).unwrap();
    assert!(!other.executor().statements().is_empty());
}
