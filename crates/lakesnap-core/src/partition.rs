//! Partition identity for part files.
//!
//! A distributed writer names its output `<prefix>-<index>-<rest>`, for
//! example `part-00000-3f2a...-c000.snappy.parquet`. Every rewrite of the same
//! part keeps the `<prefix>-<index>` head and changes the rest, so the head is
//! what groups versions of one logical part together.
//!
//! [`PartitionKeyRule`] makes that naming convention explicit: which delimiter
//! separates the tokens, how many leading tokens form the identity, and what
//! happens when a filename does not follow the convention.

use std::fmt;

use serde::Deserialize;
use snafu::prelude::*;

/// Identity of a logical partition, derived from an object's filename.
///
/// Two objects with equal `PartitionId`s are versions of the same part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub String);

impl PartitionId {
    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How [`PartitionKeyRule::extract`] treats filenames that do not match the
/// `<prefix>-<index>-<rest>` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Join however many tokens exist. Unrelated files with short names can
    /// end up sharing an identity.
    #[default]
    Lenient,
    /// Reject filenames that are empty, have an empty leading token, or have
    /// no `<rest>` component after the identity tokens.
    Strict,
}

/// Errors produced while deriving a [`PartitionId`].
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum PartitionKeyError {
    /// A rule must take at least one token.
    #[snafu(display("partition key rule must use at least one token"))]
    ZeroTokens,

    /// The key ends with `/`, so there is no filename to derive from.
    #[snafu(display("object key '{key}' has no filename component"))]
    EmptyFilename {
        /// The offending object key.
        key: String,
    },

    /// The filename has too few delimiter-separated pieces.
    #[snafu(display(
        "filename '{filename}' has {found} '{delimiter}'-separated pieces; \
         expected more than {expected}"
    ))]
    TooFewTokens {
        /// The filename that was examined.
        filename: String,
        /// The delimiter in use.
        delimiter: char,
        /// Number of identity tokens the rule requires.
        expected: usize,
        /// Number of pieces actually present.
        found: usize,
    },

    /// One of the identity tokens is empty (for example `-0001-x.parquet`).
    #[snafu(display("filename '{filename}' has an empty token at position {position}"))]
    EmptyToken {
        /// The filename that was examined.
        filename: String,
        /// Zero-based index of the empty token.
        position: usize,
    },
}

/// Return the filename component of an object key: everything after the
/// last `/`, or the whole key when it contains none.
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Rule mapping an object key to its [`PartitionId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyRule {
    delimiter: char,
    tokens: usize,
    mode: KeyMode,
}

impl Default for PartitionKeyRule {
    /// `-` delimiter, two tokens, lenient: `part-00000-x.parquet` maps to
    /// `part-00000`.
    fn default() -> Self {
        Self {
            delimiter: '-',
            tokens: 2,
            mode: KeyMode::Lenient,
        }
    }
}

impl PartitionKeyRule {
    /// Build a rule. `tokens` must be non-zero.
    pub fn new(delimiter: char, tokens: usize, mode: KeyMode) -> Result<Self, PartitionKeyError> {
        ensure!(tokens > 0, ZeroTokensSnafu);
        Ok(Self {
            delimiter,
            tokens,
            mode,
        })
    }

    /// Same rule with a different mode.
    pub fn with_mode(mut self, mode: KeyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Token delimiter.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Number of leading tokens forming the identity.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Handling of malformed filenames.
    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Derive the partition identity of `key`.
    ///
    /// In [`KeyMode::Lenient`] this never fails.
    pub fn extract(&self, key: &str) -> Result<PartitionId, PartitionKeyError> {
        let filename = filename_of(key);
        let pieces: Vec<&str> = filename.split(self.delimiter).collect();

        if self.mode == KeyMode::Strict {
            ensure!(
                !filename.is_empty(),
                EmptyFilenameSnafu {
                    key: key.to_string()
                }
            );
            ensure!(
                pieces.len() > self.tokens,
                TooFewTokensSnafu {
                    filename: filename.to_string(),
                    delimiter: self.delimiter,
                    expected: self.tokens,
                    found: pieces.len(),
                }
            );
            if let Some(position) = pieces[..self.tokens].iter().position(|p| p.is_empty()) {
                return EmptyTokenSnafu {
                    filename: filename.to_string(),
                    position,
                }
                .fail();
            }
        }

        let take = self.tokens.min(pieces.len());
        let mut delim_buf = [0u8; 4];
        let delimiter = self.delimiter.encode_utf8(&mut delim_buf);
        Ok(PartitionId(pieces[..take].join(delimiter)))
    }
}
