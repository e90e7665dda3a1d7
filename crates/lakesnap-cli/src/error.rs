use std::path::PathBuf;

use lakesnap_core::{config::ConfigError, snapshot::ResolveError, storage::StorageError};
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Config { source: ConfigError },

    #[snafu(display("{source}"))]
    Storage { source: StorageError },

    /// Listing or selection failed; the empty-prefix message is shown as-is.
    #[snafu(display("{source}"))]
    Resolve {
        #[snafu(source(from(ResolveError, Box::new)))]
        source: Box<ResolveError>,
    },

    #[snafu(display("Query failed: {source}"))]
    DataFusion {
        source: datafusion::error::DataFusionError,
    },

    #[snafu(display("Failed to render results: {source}"))]
    Arrow {
        source: arrow::error::ArrowError,
    },

    #[snafu(display(
        "Column '{field}' has type {data_type}, which CSV output cannot represent. \
         Use --format jsonl or select flat columns."
    ))]
    CsvUnsupportedType { field: String, data_type: String },

    #[snafu(display("Failed to write output file {}: {source}", path.display()))]
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to encode JSON: {source}"))]
    Json { source: serde_json::Error },

    #[snafu(display("{message}: {source}"))]
    Terminal {
        message: String,
        source: std::io::Error,
    },

    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}
