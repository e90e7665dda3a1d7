use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};

use lakesnap_core::storage::SourceLocation;
use tabled::{
    builder::Builder,
    settings::{Style, object::Rows, style::LineText, width::MinWidth},
};

use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

#[derive(Debug, Clone)]
pub struct QueryOpts {
    pub explain: bool,
    pub timing: bool,
    pub max_rows: usize,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
}

impl QueryOpts {
    /// Preview-only options used for bare SQL lines in the shell.
    pub fn preview(max_rows: usize, timing: bool) -> Self {
        Self {
            explain: false,
            timing,
            max_rows,
            output: None,
            format: OutputFormat::Csv,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub preview_rows: Vec<Vec<String>>,
    pub total_rows: u64,
    pub elapsed: Option<Duration>,
}

pub(crate) fn write_err(e: std::io::Error) -> CliError {
    CliError::Terminal {
        message: "failed to write output".to_string(),
        source: e,
    }
}

fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        return "t".to_string();
    }

    if out.starts_with(|ch: char| !ch.is_ascii_alphabetic()) {
        out = format!("t_{out}");
    }

    out.make_ascii_lowercase();
    out
}

pub fn quote_identifier(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Pick a stable SQL table name for a dataset: the last segment of the key
/// prefix (`delta/storm_events/` -> `storm_events`), else the bucket or root
/// directory name. Fallback is "t".
pub fn default_table_name(prefix: &str, location: &SourceLocation) -> String {
    let from_prefix = prefix.split('/').rev().find(|seg| !seg.is_empty());

    let raw = match from_prefix {
        Some(seg) => Some(seg.to_string()),
        None => match location {
            SourceLocation::S3 { bucket, .. } => Some(bucket.clone()),
            SourceLocation::Local { root } => root
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| !s.is_empty()),
        },
    };

    raw.map(|s| sanitize_identifier(&s))
        .unwrap_or_else(|| "t".to_string())
}

fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }

    const PREVIEW_LABEL: &str = "Preview output";
    const PREVIEW_OFFSET: usize = 6;
    let min_width = PREVIEW_OFFSET + PREVIEW_LABEL.len() + 4;

    let mut builder = Builder::default();
    builder.push_record(columns);
    for row in rows {
        builder.push_record(row);
    }

    let mut table = builder.build();

    table.with(Style::rounded());
    table.with(MinWidth::new(min_width));
    table.with(LineText::new(PREVIEW_LABEL, Rows::first()).offset(PREVIEW_OFFSET));
    // LineText re-estimates dimensions, so re-apply MinWidth afterwards.
    table.with(MinWidth::new(min_width));
    table.to_string()
}

pub fn print_query_result(res: &QueryResult, opts: &QueryOpts) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    write_query_result(res, opts, &mut stdout)
}

pub fn render_preview(res: &QueryResult, opts: &QueryOpts) -> Option<String> {
    if !res.preview_rows.is_empty() {
        return Some(render_table(&res.columns, &res.preview_rows));
    }

    if opts.max_rows == 0 && !res.columns.is_empty() {
        return Some(render_table(&res.columns, &[]));
    }

    None
}

pub fn preview_message(res: &QueryResult, opts: &QueryOpts) -> Option<String> {
    if opts.max_rows == 0 && res.total_rows > 0 {
        return Some("(preview suppressed; use --max-rows > 0)".to_string());
    }

    if res.total_rows == 0 {
        return Some("(no rows)".to_string());
    }

    if res.total_rows > res.preview_rows.len() as u64 {
        return Some(format!(
            "(showing {} of {} rows)",
            res.preview_rows.len(),
            res.total_rows
        ));
    }

    None
}

pub fn write_query_summary<W: Write>(
    res: &QueryResult,
    opts: &QueryOpts,
    out: &mut W,
) -> CliResult<()> {
    writeln!(out, "total_rows: {}", res.total_rows).map_err(write_err)?;

    if let Some(d) = res.elapsed {
        writeln!(out, "elapsed_ms: {}", d.as_millis()).map_err(write_err)?;
    }

    if let Some(path) = &opts.output {
        writeln!(out, "wrote: {} ({:?})", path.display(), opts.format).map_err(write_err)?;
    }

    Ok(())
}

pub fn write_query_result<W: Write>(
    res: &QueryResult,
    opts: &QueryOpts,
    out: &mut W,
) -> CliResult<()> {
    if let Some(rendered) = render_preview(res, opts) {
        writeln!(out, "{rendered}").map_err(write_err)?;
    }

    if let Some(message) = preview_message(res, opts) {
        writeln!(out, "{message}").map_err(write_err)?;
    }

    write_query_summary(res, opts, out)
}

/// Show `text` through `less -S`, or print it directly when no pager runs.
pub fn page_output(text: &str) -> CliResult<()> {
    let mut child = match Command::new("less").arg("-S").stdin(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(_) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(text.as_bytes()).map_err(write_err)?;
            return Ok(());
        }
    };

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(text.as_bytes()).map_err(write_err)?;
    }

    child.wait().map_err(|e| CliError::Terminal {
        message: "pager exited abnormally".to_string(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(total_rows: u64, preview: usize) -> QueryResult {
        QueryResult {
            columns: vec!["state".to_string(), "n".to_string()],
            preview_rows: (0..preview)
                .map(|i| vec!["KANSAS".to_string(), i.to_string()])
                .collect(),
            total_rows,
            elapsed: None,
        }
    }

    #[test]
    fn render_table_aligns_columns() {
        let columns = vec!["state".to_string(), "damage_property".to_string()];
        let rows = vec![
            vec!["KANSAS".to_string(), "1000".to_string()],
            vec!["TX".to_string(), "0".to_string()],
        ];

        let rendered = render_table(&columns, &rows);

        assert!(rendered.contains("state"));
        assert!(rendered.contains("damage_property"));
        assert!(rendered.contains("KANSAS"));
    }

    #[test]
    fn render_table_includes_preview_label_for_narrow_tables() {
        let columns = vec!["x".to_string()];
        let rows = vec![vec!["1".to_string()]];

        let rendered = render_table(&columns, &rows);
        assert!(rendered.contains("Preview output"));
    }

    #[test]
    fn default_table_name_uses_last_prefix_segment() {
        let s3 = SourceLocation::s3("lake");
        assert_eq!(default_table_name("delta/storm_events/", &s3), "storm_events");
        assert_eq!(default_table_name("delta/Storm-Events 2", &s3), "storm_events_2");
        assert_eq!(default_table_name("raw/2024", &s3), "t_2024");
        assert_eq!(default_table_name("", &s3), "lake");
    }

    #[test]
    fn default_table_name_falls_back_to_root() {
        let local = SourceLocation::local("/data/noaa-lake");
        assert_eq!(default_table_name("/", &local), "noaa_lake");
        assert_eq!(default_table_name("", &SourceLocation::local("/")), "t");
    }

    #[test]
    fn quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("storm_events"), "\"storm_events\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn summary_reports_truncated_preview() -> Result<(), Box<dyn std::error::Error>> {
        let opts = QueryOpts::preview(2, false);
        let res = result(5, 2);

        let mut out = Vec::new();
        write_query_result(&res, &opts, &mut out)?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("(showing 2 of 5 rows)"));
        assert!(text.contains("total_rows: 5"));
        Ok(())
    }

    #[test]
    fn empty_result_says_no_rows() -> Result<(), Box<dyn std::error::Error>> {
        let opts = QueryOpts::preview(10, false);
        let res = result(0, 0);

        let mut out = Vec::new();
        write_query_result(&res, &opts, &mut out)?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("(no rows)"));
        assert!(text.contains("total_rows: 0"));
        Ok(())
    }
}
