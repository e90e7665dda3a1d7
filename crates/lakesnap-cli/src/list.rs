use std::io::Write;

use lakesnap_core::{selection::SelectedObject, snapshot::ResolvedSnapshot};
use serde::Serialize;
use snafu::ResultExt;

use crate::{
    error::{CliResult, JsonSnafu},
    query::write_err,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOpts {
    pub uris: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct ListedObject<'a> {
    #[serde(flatten)]
    object: &'a SelectedObject,
    uri: &'a str,
}

#[derive(Serialize)]
struct ListingDoc<'a> {
    kept: Vec<ListedObject<'a>>,
    superseded: usize,
    ignored: usize,
}

pub fn write_summary<W: Write>(snapshot: &ResolvedSnapshot, out: &mut W) -> CliResult<()> {
    let selection = &snapshot.selection;
    writeln!(
        out,
        "kept: {}, superseded: {}, ignored: {}",
        selection.kept.len(),
        selection.superseded,
        selection.ignored
    )
    .map_err(write_err)
}

/// Kept keys (or URIs) newest-first, followed by the selection summary.
pub fn write_listing<W: Write>(
    snapshot: &ResolvedSnapshot,
    opts: ListOpts,
    out: &mut W,
) -> CliResult<()> {
    if opts.json {
        let doc = ListingDoc {
            kept: snapshot
                .selection
                .kept
                .iter()
                .zip(&snapshot.uris)
                .map(|(object, uri)| ListedObject {
                    object,
                    uri: uri.as_str(),
                })
                .collect(),
            superseded: snapshot.selection.superseded,
            ignored: snapshot.selection.ignored,
        };
        let text = serde_json::to_string_pretty(&doc).context(JsonSnafu)?;
        return writeln!(out, "{text}").map_err(write_err);
    }

    if opts.uris {
        for uri in &snapshot.uris {
            writeln!(out, "{uri}").map_err(write_err)?;
        }
    } else {
        for obj in &snapshot.selection.kept {
            writeln!(out, "{}", obj.record.key).map_err(write_err)?;
        }
    }

    write_summary(snapshot, out)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use lakesnap_core::{
        partition::PartitionId,
        selection::{ObjectRecord, SelectedObject, Selection},
    };

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn snapshot() -> ResolvedSnapshot {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        ResolvedSnapshot {
            selection: Selection {
                kept: vec![SelectedObject {
                    partition: PartitionId("part-00000".to_string()),
                    record: ObjectRecord::new("delta/t/part-00000-b.parquet", ts),
                }],
                superseded: 2,
                ignored: 1,
            },
            uris: vec!["s3://lake/delta/t/part-00000-b.parquet".to_string()],
        }
    }

    #[test]
    fn plain_listing_prints_keys_then_summary() -> TestResult {
        let mut out = Vec::new();
        write_listing(&snapshot(), ListOpts::default(), &mut out)?;
        assert_eq!(
            String::from_utf8(out)?,
            "delta/t/part-00000-b.parquet\nkept: 1, superseded: 2, ignored: 1\n"
        );
        Ok(())
    }

    #[test]
    fn uri_listing_prints_uris() -> TestResult {
        let mut out = Vec::new();
        let opts = ListOpts {
            uris: true,
            json: false,
        };
        write_listing(&snapshot(), opts, &mut out)?;
        assert!(String::from_utf8(out)?.starts_with("s3://lake/delta/t/part-00000-b.parquet\n"));
        Ok(())
    }

    #[test]
    fn json_listing_is_parseable() -> TestResult {
        let mut out = Vec::new();
        let opts = ListOpts {
            uris: false,
            json: true,
        };
        write_listing(&snapshot(), opts, &mut out)?;

        let doc: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(doc["kept"][0]["partition"], "part-00000");
        assert_eq!(doc["kept"][0]["key"], "delta/t/part-00000-b.parquet");
        assert_eq!(doc["kept"][0]["last_modified"], "2023-11-14T22:13:20Z");
        assert_eq!(doc["kept"][0]["uri"], "s3://lake/delta/t/part-00000-b.parquet");
        assert_eq!(doc["superseded"], 2);
        assert_eq!(doc["ignored"], 1);
        Ok(())
    }
}
