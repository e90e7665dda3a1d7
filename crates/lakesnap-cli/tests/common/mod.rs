use std::{
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use arrow::array::{Float64Builder, Int64Builder, StringBuilder, TimestampMillisecondBuilder};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Write a storm-events part file with `rows` rows whose ids start at
/// `first_id`, then set its mtime to `mtime_secs` past the epoch.
pub fn write_part(path: &Path, first_id: i64, rows: usize, mtime_secs: u64) -> TestResult {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    const STATES: [&str; 3] = ["KANSAS", "TEXAS", "OKLAHOMA"];

    let mut id_builder = Int64Builder::with_capacity(rows);
    let mut state_builder = StringBuilder::new();
    let mut begin_builder = TimestampMillisecondBuilder::with_capacity(rows);
    let mut damage_builder = Float64Builder::with_capacity(rows);

    let base_ts = 1_700_000_000_000i64;
    for i in 0..rows {
        id_builder.append_value(first_id + i as i64);
        state_builder.append_value(STATES[i % STATES.len()]);
        begin_builder.append_value(base_ts + (i as i64) * 60_000);
        damage_builder.append_value(250.0 * i as f64);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("event_id", DataType::Int64, false),
        Field::new("state", DataType::Utf8, false),
        Field::new(
            "begin_time",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("damage_property", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(id_builder.finish()) as _,
            Arc::new(state_builder.finish()),
            Arc::new(begin_builder.finish()),
            Arc::new(damage_builder.finish()),
        ],
    )?;

    let file = std::fs::File::create(path)?;
    let props = parquet::file::properties::WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs);
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(mtime)?;

    Ok(())
}
