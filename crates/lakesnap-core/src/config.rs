//! Loader configuration.
//!
//! Everything that used to be a literal in the loading scripts (bucket,
//! prefix, region, file suffix, partition naming) lives in a
//! [`LoaderConfig`], read from TOML and overridable from the command line.
//!
//! ```toml
//! [source]
//! location = "s3://my-bucket"
//! prefix = "delta/storm_events/"
//! region = "us-east-1"
//!
//! [partition]
//! delimiter = "-"
//! tokens = 2
//! mode = "lenient"
//!
//! [table]
//! name = "storm_events"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::prelude::*;

use crate::{
    partition::{KeyMode, PartitionKeyError, PartitionKeyRule},
    selection::LatestSelector,
    storage::{SourceLocation, StorageError},
};

/// Result alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default file suffix of data objects.
pub const DEFAULT_SUFFIX: &str = ".parquet";

/// Errors raised while reading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The config file could not be read.
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`LoaderConfig`].
    #[snafu(display("Failed to parse config {origin}: {source}"))]
    Parse {
        /// Where the TOML came from (a path, or `<inline>`).
        origin: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is present but unusable.
    #[snafu(display("Invalid configuration: {message}"))]
    Invalid {
        /// What is wrong.
        message: String,
    },

    /// `source.location` could not be parsed.
    #[snafu(display("Invalid source location: {source}"))]
    Location {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The `[partition]` section does not describe a valid rule.
    #[snafu(display("Invalid partition rule: {source}"))]
    Partition {
        /// Underlying rule error.
        source: PartitionKeyError,
    },
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_delimiter() -> String {
    "-".to_string()
}

fn default_tokens() -> usize {
    2
}

/// Where to list part files from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// `s3://<bucket>`, `file:///<dir>`, or a local directory.
    #[serde(default)]
    pub location: String,
    /// Key prefix to list under (e.g. `delta/storm_events/`).
    #[serde(default)]
    pub prefix: String,
    /// Only keys ending with this suffix are considered.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom S3 endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Permit plain-HTTP endpoints.
    #[serde(default)]
    pub allow_http: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            prefix: String::new(),
            suffix: default_suffix(),
            region: None,
            endpoint: None,
            allow_http: false,
        }
    }
}

impl SourceConfig {
    /// Parse `location` and apply the S3 settings.
    pub fn source_location(&self) -> ConfigResult<SourceLocation> {
        ensure!(
            !self.location.trim().is_empty(),
            InvalidSnafu {
                message: "source.location is required (s3://<bucket> or a directory)",
            }
        );

        let location = SourceLocation::parse(&self.location)
            .context(LocationSnafu)?
            .with_region(self.region.clone())
            .with_endpoint(self.endpoint.clone())
            .with_allow_http(self.allow_http);
        Ok(location)
    }
}

/// How partition identities are derived from filenames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    /// Single-character token delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Number of leading tokens forming the identity.
    #[serde(default = "default_tokens")]
    pub tokens: usize,
    /// Treatment of filenames that do not follow the convention.
    #[serde(default)]
    pub mode: KeyMode,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            tokens: default_tokens(),
            mode: KeyMode::default(),
        }
    }
}

impl PartitionConfig {
    /// Build the [`PartitionKeyRule`] this section describes.
    pub fn rule(&self) -> ConfigResult<PartitionKeyRule> {
        let mut chars = self.delimiter.chars();
        let delimiter = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return InvalidSnafu {
                    message: format!(
                        "partition.delimiter must be exactly one character, got '{}'",
                        self.delimiter
                    ),
                }
                .fail();
            }
        };

        PartitionKeyRule::new(delimiter, self.tokens, self.mode).context(PartitionSnafu)
    }
}

/// Query-engine table settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Name to register the table under. Derived from the prefix when unset.
    #[serde(default)]
    pub name: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// `[source]` section.
    #[serde(default)]
    pub source: SourceConfig,
    /// `[partition]` section.
    #[serde(default)]
    pub partition: PartitionConfig,
    /// `[table]` section.
    #[serde(default)]
    pub table: TableConfig,
}

impl LoaderConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> ConfigResult<Self> {
        toml::from_str(toml_str).context(ParseSnafu { origin: "<inline>" })
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        toml::from_str(&raw).context(ParseSnafu {
            origin: path.display().to_string(),
        })
    }

    /// Selector for the configured suffix and partition rule.
    pub fn selector(&self) -> ConfigResult<LatestSelector> {
        Ok(LatestSelector::new(self.source.suffix.clone()).with_rule(self.partition.rule()?))
    }
}
