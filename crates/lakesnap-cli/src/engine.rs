use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
    time::Instant,
};

use arrow::{
    datatypes::DataType,
    error::ArrowError,
    util::{
        display::{ArrayFormatter, FormatOptions},
        pretty::pretty_format_batches,
    },
};
use datafusion::prelude::{SessionConfig, SessionContext};
use futures_util::StreamExt;
use lakesnap_core::{
    snapshot::{ResolvedSnapshot, SnapshotResolver},
    storage::ObjectStoreLister,
};
use object_store::ObjectStore;
use snafu::ResultExt;

use crate::{
    error::{
        ArrowSnafu, CliError, CliResult, CsvUnsupportedTypeSnafu, DataFusionSnafu,
        OutputFileSnafu, ResolveSnafu, StorageSnafu,
    },
    query::{OutputFormat, QueryOpts, QueryResult},
};

/// Backend-agnostic query session for reuse by the shell and one-shot queries.
#[async_trait::async_trait]
pub trait QuerySession: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn run_query(&self, sql: &str, opts: &QueryOpts) -> Result<QueryResult, Self::Error>;

    /// Optional table identifier registered in the session.
    fn table_name(&self) -> Option<&str> {
        None
    }
}

/// Query execution backend abstraction for CLI and non-interactive usage.
#[async_trait::async_trait]
pub trait Engine: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// List the source and select the newest copy of every part.
    async fn resolve(&self) -> Result<ResolvedSnapshot, Self::Error>;

    /// Prepare a session over an already resolved snapshot.
    async fn prepare_session_from_snapshot(
        &self,
        snapshot: &ResolvedSnapshot,
    ) -> Result<Box<dyn QuerySession<Error = Self::Error>>, Self::Error>;

    /// Resolve afresh and prepare a session over the result.
    async fn prepare_session(
        &self,
    ) -> Result<Box<dyn QuerySession<Error = Self::Error>>, Self::Error> {
        let snapshot = self.resolve().await?;
        self.prepare_session_from_snapshot(&snapshot).await
    }
}

enum OutputWriter {
    Csv(Box<arrow_csv::Writer<BufWriter<File>>>),
    Jsonl(Box<arrow_json::LineDelimitedWriter<BufWriter<File>>>),
}

impl OutputWriter {
    fn create(path: &Path, format: OutputFormat) -> CliResult<Self> {
        let file = File::create(path).context(OutputFileSnafu { path })?;
        let writer = BufWriter::new(file);

        match format {
            OutputFormat::Csv => {
                // arrow-csv does not support ListArray / StructArray.
                let writer = arrow_csv::WriterBuilder::new().build(writer);
                Ok(OutputWriter::Csv(Box::new(writer)))
            }
            OutputFormat::Jsonl => Ok(OutputWriter::Jsonl(Box::new(
                arrow_json::LineDelimitedWriter::new(writer),
            ))),
        }
    }

    fn write_batch(&mut self, batch: &arrow::array::RecordBatch) -> CliResult<()> {
        match self {
            OutputWriter::Csv(w) => w.write(batch).context(ArrowSnafu),
            OutputWriter::Jsonl(w) => w.write_batches(&[batch]).context(ArrowSnafu),
        }
    }

    fn finish(self, path: &Path) -> CliResult<()> {
        let mut inner = match self {
            OutputWriter::Csv(w) => w.into_inner(),
            OutputWriter::Jsonl(mut w) => {
                w.finish().context(ArrowSnafu)?;
                w.into_inner()
            }
        };
        inner.flush().context(OutputFileSnafu { path })
    }
}

fn ensure_csv_supported(schema: &arrow::datatypes::Schema) -> CliResult<()> {
    for field in schema.fields() {
        let dt = field.data_type();
        let unsupported = matches!(
            dt,
            DataType::List(_)
                | DataType::LargeList(_)
                | DataType::FixedSizeList(_, _)
                | DataType::Struct(_)
                | DataType::Map(_, _)
                | DataType::Union(_, _)
        );

        if unsupported {
            return CsvUnsupportedTypeSnafu {
                field: field.name().to_string(),
                data_type: format!("{dt:?}"),
            }
            .fail();
        }
    }

    Ok(())
}

pub struct DataFusionEngine {
    resolver: SnapshotResolver,
    store: Arc<dyn ObjectStore>,
    table_name: String,
}

pub struct DataFusionSession {
    ctx: SessionContext,
    table_name: String,
}

impl DataFusionEngine {
    pub fn new(resolver: SnapshotResolver, table_name: impl Into<String>) -> CliResult<Self> {
        let store = resolver.location().build_store().context(StorageSnafu)?;
        Ok(Self::with_store(resolver, store, table_name))
    }

    pub fn with_store(
        resolver: SnapshotResolver,
        store: Arc<dyn ObjectStore>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            table_name: table_name.into(),
        }
    }

    async fn prepare_session_internal(
        &self,
        snapshot: &ResolvedSnapshot,
    ) -> CliResult<DataFusionSession> {
        let cfg = SessionConfig::new();
        let ctx = SessionContext::new_with_config(cfg);

        lakesnap_datafusion::register_snapshot(
            &ctx,
            &self.table_name,
            &self.resolver,
            Arc::clone(&self.store),
            snapshot,
        )
        .await
        .context(DataFusionSnafu)?;

        tracing::debug!(
            table = %self.table_name,
            files = snapshot.uris.len(),
            "session ready"
        );

        Ok(DataFusionSession {
            ctx,
            table_name: self.table_name.clone(),
        })
    }
}

#[async_trait::async_trait]
impl QuerySession for DataFusionSession {
    type Error = CliError;

    async fn run_query(&self, sql: &str, opts: &QueryOpts) -> Result<QueryResult, Self::Error> {
        if opts.explain {
            let explain_sql = format!("EXPLAIN {sql}");
            let df = self.ctx.sql(&explain_sql).await.context(DataFusionSnafu)?;
            let batches = df.collect().await.context(DataFusionSnafu)?;
            let rendered = pretty_format_batches(&batches).context(ArrowSnafu)?;
            println!("{rendered}");
        }

        let start = Instant::now();

        let df = self.ctx.sql(sql).await.context(DataFusionSnafu)?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        let mut out = match &opts.output {
            Some(path) => {
                if opts.format == OutputFormat::Csv {
                    ensure_csv_supported(df.schema().as_arrow())?;
                }
                Some((OutputWriter::create(path, opts.format)?, path))
            }
            None => None,
        };

        let mut stream = df.execute_stream().await.context(DataFusionSnafu)?;

        let mut total_rows: u64 = 0;
        let mut preview_rows_left = opts.max_rows;
        let mut preview_rows: Vec<Vec<String>> = Vec::new();

        while let Some(item) = stream.next().await {
            let batch = item.context(DataFusionSnafu)?;
            total_rows += batch.num_rows() as u64;

            if let Some((w, _)) = out.as_mut() {
                w.write_batch(&batch)?;
            }

            if preview_rows_left > 0 {
                let options = FormatOptions::default();
                let formatters = batch
                    .columns()
                    .iter()
                    .map(|col| ArrayFormatter::try_new(col.as_ref(), &options))
                    .collect::<Result<Vec<_>, ArrowError>>()
                    .context(ArrowSnafu)?;

                let rows_to_take = preview_rows_left.min(batch.num_rows());
                for row_idx in 0..rows_to_take {
                    let row = formatters
                        .iter()
                        .map(|f| f.value(row_idx).try_to_string())
                        .collect::<Result<Vec<_>, ArrowError>>()
                        .context(ArrowSnafu)?;
                    preview_rows.push(row);
                }

                preview_rows_left -= rows_to_take;
            }
        }

        if let Some((w, path)) = out {
            w.finish(path)?;
        }

        let elapsed = opts.timing.then(|| start.elapsed());

        Ok(QueryResult {
            columns,
            preview_rows,
            total_rows,
            elapsed,
        })
    }

    fn table_name(&self) -> Option<&str> {
        Some(self.table_name.as_str())
    }
}

#[async_trait::async_trait]
impl Engine for DataFusionEngine {
    type Error = CliError;

    async fn resolve(&self) -> Result<ResolvedSnapshot, Self::Error> {
        let lister = ObjectStoreLister::new(Arc::clone(&self.store));
        self.resolver.resolve(&lister).await.context(ResolveSnafu)
    }

    async fn prepare_session_from_snapshot(
        &self,
        snapshot: &ResolvedSnapshot,
    ) -> Result<Box<dyn QuerySession<Error = Self::Error>>, Self::Error> {
        Ok(Box::new(self.prepare_session_internal(snapshot).await?))
    }
}
