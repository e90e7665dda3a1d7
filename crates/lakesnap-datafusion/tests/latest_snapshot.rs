//! End-to-end: local part files with controlled mtimes, resolved and queried
//! through DataFusion.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use arrow::array::{Float64Builder, Int64Array, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::{error::DataFusionError, prelude::SessionContext};
use lakesnap_core::{
    selection::LatestSelector,
    snapshot::{ResolveError, SnapshotResolver},
    storage::{ObjectStoreLister, SourceLocation},
};
use lakesnap_datafusion::{load_latest, register_snapshot};
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const PREFIX: &str = "delta/storm_events";

/// Write `rows` storm events starting at `first_id` and stamp the file with
/// `mtime_secs` past the epoch.
fn write_part(path: &Path, first_id: i64, rows: usize, mtime_secs: u64) -> TestResult {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut id_builder = Int64Builder::with_capacity(rows);
    let mut state_builder = StringBuilder::new();
    let mut damage_builder = Float64Builder::with_capacity(rows);
    for i in 0..rows {
        id_builder.append_value(first_id + i as i64);
        state_builder.append_value(if i % 2 == 0 { "KANSAS" } else { "TEXAS" });
        damage_builder.append_value(1_000.0 * i as f64);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("event_id", DataType::Int64, false),
        Field::new("state", DataType::Utf8, false),
        Field::new("damage_property", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(id_builder.finish()) as _,
            Arc::new(state_builder.finish()),
            Arc::new(damage_builder.finish()),
        ],
    )?;

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs);
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(mtime)?;
    Ok(())
}

fn resolver(root: &Path) -> SnapshotResolver {
    SnapshotResolver::new(
        SourceLocation::local(root),
        PREFIX,
        LatestSelector::new(".parquet"),
    )
}

async fn count_rows(ctx: &SessionContext, table: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let batches = ctx
        .sql(&format!("SELECT count(*) AS n FROM \"{table}\""))
        .await?
        .collect()
        .await?;
    let counts = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or("count(*) is not Int64")?;
    Ok(counts.value(0))
}

/// Two copies of part-00000 (3 rows old, 5 rows new), one copy of part-00001
/// (2 rows), and a log file that is not Parquet.
fn seed_dataset(root: &Path) -> TestResult {
    let dir = root.join(PREFIX);
    write_part(&dir.join("part-00000-aaaa.c000.snappy.parquet"), 0, 3, 1_700_000_000)?;
    write_part(&dir.join("part-00000-bbbb.c000.snappy.parquet"), 100, 5, 1_700_000_500)?;
    write_part(&dir.join("part-00001-cccc.c000.snappy.parquet"), 200, 2, 1_700_000_100)?;
    std::fs::create_dir_all(dir.join("_delta_log"))?;
    std::fs::write(dir.join("_delta_log/00000000000000000000.json"), b"{}")?;
    Ok(())
}

#[tokio::test]
async fn counts_only_newest_copies() -> TestResult {
    let tmp = TempDir::new()?;
    seed_dataset(tmp.path())?;

    let resolver = resolver(tmp.path());
    let store = resolver.location().build_store()?;
    let ctx = SessionContext::new();

    let snapshot = load_latest(&ctx, "storm_events", &resolver, store).await?;

    let keys: Vec<&str> = snapshot.keys().collect();
    assert_eq!(
        keys,
        vec![
            "delta/storm_events/part-00000-bbbb.c000.snappy.parquet",
            "delta/storm_events/part-00001-cccc.c000.snappy.parquet",
        ]
    );
    assert_eq!(snapshot.selection.superseded, 1);
    assert_eq!(snapshot.selection.ignored, 1);

    assert_eq!(count_rows(&ctx, "storm_events").await?, 7);

    let batches = ctx
        .sql("SELECT min(event_id) AS lo FROM storm_events")
        .await?
        .collect()
        .await?;
    let lo = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or("min(event_id) is not Int64")?;
    assert_eq!(lo.value(0), 100, "old copy of part-00000 must not be read");
    Ok(())
}

#[tokio::test]
async fn reregistering_replaces_table() -> TestResult {
    let tmp = TempDir::new()?;
    seed_dataset(tmp.path())?;

    let resolver = resolver(tmp.path());
    let store = resolver.location().build_store()?;
    let ctx = SessionContext::new();

    load_latest(&ctx, "storm_events", &resolver, Arc::clone(&store)).await?;
    assert_eq!(count_rows(&ctx, "storm_events").await?, 7);

    // A rewrite of part-00001 lands with more rows.
    write_part(
        &tmp.path().join(PREFIX).join("part-00001-dddd.c000.snappy.parquet"),
        300,
        4,
        1_700_001_000,
    )?;

    let lister = ObjectStoreLister::new(Arc::clone(&store));
    let snapshot = resolver.resolve(&lister).await?;
    register_snapshot(&ctx, "storm_events", &resolver, store, &snapshot).await?;

    assert_eq!(count_rows(&ctx, "storm_events").await?, 9);
    Ok(())
}

#[tokio::test]
async fn mixed_case_table_name_is_kept_verbatim() -> TestResult {
    let tmp = TempDir::new()?;
    seed_dataset(tmp.path())?;

    let resolver = resolver(tmp.path());
    let store = resolver.location().build_store()?;
    let ctx = SessionContext::new();

    load_latest(&ctx, "StormEvents", &resolver, store).await?;
    assert_eq!(count_rows(&ctx, "StormEvents").await?, 7);
    Ok(())
}

#[tokio::test]
async fn empty_prefix_surfaces_resolve_error() -> TestResult {
    let tmp = TempDir::new()?;
    std::fs::create_dir_all(tmp.path().join(PREFIX).join("_delta_log"))?;
    std::fs::write(
        tmp.path().join(PREFIX).join("_delta_log/00000000000000000000.json"),
        b"{}",
    )?;

    let resolver = resolver(tmp.path());
    let store = resolver.location().build_store()?;
    let ctx = SessionContext::new();

    let err = load_latest(&ctx, "storm_events", &resolver, store)
        .await
        .unwrap_err();
    match err {
        DataFusionError::External(inner) => {
            let resolve = inner
                .downcast_ref::<ResolveError>()
                .expect("external error should be a ResolveError");
            assert!(resolve.is_empty_result());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!ctx.table_exist("storm_events")?);
    Ok(())
}
