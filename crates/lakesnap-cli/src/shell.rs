use std::{
    io::{self, Write},
    path::PathBuf,
    time::Instant,
};

use lakesnap_core::{config::LoaderConfig, snapshot::ResolvedSnapshot};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::runtime::Handle;

use crate::{
    engine::{Engine, QuerySession},
    error::{CliError, CliResult},
    list::write_summary,
    make_engine,
    query::{
        OutputFormat, QueryOpts, QueryResult, page_output, preview_message, print_query_result,
        quote_identifier, render_preview, write_query_summary,
    },
};

type BoxedEngine = Box<dyn Engine<Error = CliError>>;
type BoxedSession = Box<dyn QuerySession<Error = CliError>>;

const DEFAULT_MAX_ROWS: usize = 10;

enum CommandAction {
    Continue,
    Break,
}

struct CommandResult {
    action: CommandAction,
    query_result: Option<QueryResult>,
}

impl CommandResult {
    fn cont() -> Self {
        Self {
            action: CommandAction::Continue,
            query_result: None,
        }
    }
}

struct ShellContext {
    engine: BoxedEngine,
    snapshot: ResolvedSnapshot,
    session: BoxedSession,
    timing: bool,
    pager: bool,
    table_name: String,
}

fn print_help() {
    println!(
        r#"commands:
  <sql>             run a SQL statement against the loaded table
  query [--max-rows N] [--format csv|jsonl] [--output PATH] [--timing] [--explain] [--] <sql>
  explain [--max-rows N] [--format csv|jsonl] [--output PATH] [--timing] [--] <sql>
  files             list the part files currently loaded
  refresh           re-list the prefix and reload if the newest copies changed
  \timing           toggle per-command elapsed time
  \pager            toggle pager output (less -S)
  clear | cls
  help
  exit | quit
notes:
  - use `--` to separate flags from SQL (e.g. SQL with leading `--`)
"#
    );
}

fn clear_screen() {
    // ANSI clear screen + cursor home; best-effort.
    print!("\x1b[2J\x1b[H");
    let _ = std::io::stdout().flush();
}

fn prompt_non_empty(prompt: &str) -> CliResult<String> {
    loop {
        print!("{prompt}");
        io::stdout().flush().map_err(|e| CliError::Terminal {
            message: "failed to flush stdout".to_string(),
            source: e,
        })?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .map_err(|e| CliError::Terminal {
                message: "failed to read input".to_string(),
                source: e,
            })?;
        if read == 0 {
            return Err(CliError::Internal {
                message: format!("no input for '{}'", prompt.trim_end_matches([' ', ':'])),
            });
        }

        let trimmed = input.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
}

/// Split `input` into whitespace-separated tokens, honouring quotes and
/// backslash escapes. Each token keeps the byte offset it starts at so the
/// SQL tail can be sliced out of the original line untouched.
fn lex_with_offsets(input: &str) -> Result<Vec<(String, usize)>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_ascii_whitespace() {
            chars.next();
            continue;
        }

        let quote = (ch == '"' || ch == '\'').then_some(ch);
        if quote.is_some() {
            chars.next();
        }

        let mut value = String::new();
        let mut closed = quote.is_none();
        while let Some(&(_, ch)) = chars.peek() {
            match quote {
                Some(q) if ch == q => {
                    chars.next();
                    closed = true;
                    break;
                }
                None if ch.is_ascii_whitespace() => break,
                _ => {}
            }

            chars.next();
            if ch == '\\' {
                match chars.next() {
                    Some((_, esc)) => value.push(esc),
                    None => return Err("unterminated escape".to_string()),
                }
            } else {
                value.push(ch);
            }
        }

        if !closed {
            return Err("unterminated quoted token".to_string());
        }
        tokens.push((value, start));
    }

    Ok(tokens)
}

fn parse_format(raw: &str) -> Result<OutputFormat, String> {
    match raw.to_ascii_lowercase().as_str() {
        "csv" => Ok(OutputFormat::Csv),
        "jsonl" => Ok(OutputFormat::Jsonl),
        other => Err(format!("unknown format: {other}")),
    }
}

fn flag_value<'a>(tokens: &'a [(String, usize)], i: usize, flag: &str) -> Result<&'a str, String> {
    tokens
        .get(i + 1)
        .map(|(v, _)| v.as_str())
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_sql_command(
    rest: &str,
    default_max_rows: usize,
    default_timing: bool,
    allow_explain_flag: bool,
) -> Result<(String, QueryOpts), String> {
    let tokens = lex_with_offsets(rest)?;
    if tokens.is_empty() {
        return Err("missing SQL".to_string());
    }

    let mut opts = QueryOpts::preview(default_max_rows, default_timing);

    let mut i = 0;
    let mut sql_start: Option<usize> = None;
    while i < tokens.len() {
        let token = tokens[i].0.as_str();

        if token == "--" {
            let (_, start) = tokens.get(i + 1).ok_or("missing SQL after `--`")?;
            sql_start = Some(*start);
            break;
        }

        if !token.starts_with("--") {
            sql_start = Some(tokens[i].1);
            break;
        }

        let (flag, inline) = match token.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (token, None),
        };

        match flag {
            "--timing" if inline.is_none() => opts.timing = true,
            "--explain" if inline.is_none() && allow_explain_flag => opts.explain = true,
            "--max-rows" | "--format" | "--output" => {
                let value = match inline {
                    Some(v) => v,
                    None => {
                        let v = flag_value(&tokens, i, flag)?;
                        i += 1;
                        v
                    }
                };
                match flag {
                    "--max-rows" => {
                        opts.max_rows = value
                            .parse::<usize>()
                            .map_err(|_| "invalid --max-rows value".to_string())?;
                    }
                    "--format" => opts.format = parse_format(value)?,
                    _ => opts.output = Some(PathBuf::from(value)),
                }
            }
            _ => return Err(format!("unknown flag: {token}")),
        }
        i += 1;
    }

    let sql_start = sql_start.ok_or_else(|| "missing SQL".to_string())?;
    let sql = rest[sql_start..].trim();
    if sql.is_empty() {
        return Err("missing SQL".to_string());
    }

    Ok((sql.to_string(), opts))
}

/// Strip `word` from the start of `line` when it is a whole word.
fn strip_command<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(word)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then(|| rest.trim())
}

async fn build_context(cfg: &LoaderConfig) -> CliResult<ShellContext> {
    let engine = make_engine(cfg)?;
    let snapshot = engine.resolve().await?;
    let session = engine.prepare_session_from_snapshot(&snapshot).await?;

    let table_name = session
        .table_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "t".to_string());

    Ok(ShellContext {
        engine,
        snapshot,
        session,
        timing: false,
        pager: false,
        table_name,
    })
}

fn show_result(ctx: &ShellContext, res: &QueryResult, opts: &QueryOpts) {
    if ctx.pager {
        if let Some(rendered) = render_preview(res, opts) {
            let _ = page_output(&rendered);
        }
        if let Some(message) = preview_message(res, opts) {
            println!("{message}");
        }
        let _ = write_query_summary(res, opts, &mut std::io::stdout());
    } else {
        let _ = print_query_result(res, opts);
    }
}

async fn run_sql(ctx: &ShellContext, sql: &str, opts: &QueryOpts) -> Option<QueryResult> {
    match ctx.session.run_query(sql, opts).await {
        Ok(res) => {
            show_result(ctx, &res, opts);
            Some(res)
        }
        Err(e) => {
            println!("error: {e}");
            None
        }
    }
}

async fn refresh(ctx: &mut ShellContext) -> CliResult<bool> {
    let snapshot = ctx.engine.resolve().await?;
    let changed = !snapshot.same_keys(&ctx.snapshot);

    // Rebuild the session only when a different set of files is selected.
    if changed {
        ctx.session = ctx.engine.prepare_session_from_snapshot(&snapshot).await?;
    }
    ctx.snapshot = snapshot;
    Ok(changed)
}

fn print_files(snapshot: &ResolvedSnapshot) {
    for obj in &snapshot.selection.kept {
        println!(
            "{}  {}",
            obj.record.last_modified.to_rfc3339(),
            obj.record.key
        );
    }
    let _ = write_summary(snapshot, &mut std::io::stdout());
}

async fn process_command(ctx: &mut ShellContext, trimmed: &str) -> CommandResult {
    match trimmed {
        "exit" | "quit" => {
            return CommandResult {
                action: CommandAction::Break,
                query_result: None,
            };
        }
        "help" => {
            print_help();
            return CommandResult::cont();
        }
        "clear" | "cls" => {
            clear_screen();
            return CommandResult::cont();
        }
        r"\timing" | r"\\timing" => {
            ctx.timing = !ctx.timing;
            println!("timing: {}", if ctx.timing { "on" } else { "off" });
            return CommandResult::cont();
        }
        r"\pager" | r"\\pager" => {
            ctx.pager = !ctx.pager;
            println!("pager: {}", if ctx.pager { "on" } else { "off" });
            return CommandResult::cont();
        }
        "files" => {
            print_files(&ctx.snapshot);
            return CommandResult::cont();
        }
        "refresh" => {
            let start = Instant::now();
            match refresh(ctx).await {
                Ok(changed) if ctx.timing => println!(
                    "refreshed: {changed} (elapsed_ms: {})",
                    start.elapsed().as_millis()
                ),
                Ok(changed) => println!("refreshed: {changed}"),
                Err(e) => println!("error: {e}"),
            }
            return CommandResult::cont();
        }
        _ => {}
    }

    if let Some(rest) = strip_command(trimmed, "query") {
        let (sql, opts) = match parse_sql_command(rest, DEFAULT_MAX_ROWS, ctx.timing, true) {
            Ok(res) => res,
            Err(e) => {
                println!("{e}");
                return CommandResult::cont();
            }
        };

        return CommandResult {
            action: CommandAction::Continue,
            query_result: run_sql(ctx, &sql, &opts).await,
        };
    }

    if let Some(rest) = strip_command(trimmed, "explain") {
        let (sql, opts) = match parse_sql_command(rest, 1000, ctx.timing, false) {
            Ok(res) => res,
            Err(e) => {
                println!("{e}");
                return CommandResult::cont();
            }
        };

        // plan-only: run an EXPLAIN statement through the same session
        let explain_sql = format!("EXPLAIN {sql}");
        return CommandResult {
            action: CommandAction::Continue,
            query_result: run_sql(ctx, &explain_sql, &opts).await,
        };
    }

    // Anything else is a question for the table.
    let opts = QueryOpts::preview(DEFAULT_MAX_ROWS, ctx.timing);
    CommandResult {
        action: CommandAction::Continue,
        query_result: run_sql(ctx, trimmed, &opts).await,
    }
}

fn default_history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".lakesnap_history"))
}

fn shell_blocking(
    handle: Handle,
    mut cfg: LoaderConfig,
    history: Option<PathBuf>,
) -> CliResult<()> {
    if cfg.source.location.trim().is_empty() {
        cfg.source.location = prompt_non_empty("location (s3://bucket or directory): ")?;
        if cfg.source.prefix.is_empty() {
            cfg.source.prefix = prompt_non_empty("prefix: ")?;
        }
    }

    let mut ctx = handle.block_on(build_context(&cfg))?;

    let history_path = history.or_else(default_history_path);

    let mut rl = DefaultEditor::new().map_err(|e| CliError::Internal {
        message: format!("failed to initialize readline: {e}"),
    })?;

    // history best-effort
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    println!("lakesnap shell");
    println!(
        "source: {}/{}",
        cfg.source.location.trim_end_matches('/'),
        cfg.source.prefix.trim_start_matches('/')
    );
    println!(
        "registered as: {} (quoted: {})",
        ctx.table_name,
        quote_identifier(&ctx.table_name)
    );
    let _ = write_summary(&ctx.snapshot, &mut std::io::stdout());
    println!("type 'help' for commands\n");

    loop {
        let prompt = match (ctx.timing, ctx.pager) {
            (true, true) => format!("lakesnap[{}](timing,pager)> ", ctx.table_name),
            (true, false) => format!("lakesnap[{}](timing)> ", ctx.table_name),
            (false, true) => format!("lakesnap[{}](pager)> ", ctx.table_name),
            (false, false) => format!("lakesnap[{}]> ", ctx.table_name),
        };

        let line = match rl.readline(&prompt) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(e) => {
                println!("readline error: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let _ = rl.add_history_entry(trimmed);

        let result = handle.block_on(process_command(&mut ctx, trimmed));
        if let Some(res) = &result.query_result {
            tracing::debug!(rows = res.total_rows, "answered");
        }
        if matches!(result.action, CommandAction::Break) {
            break;
        }
    }

    if let Some(path) = &history_path {
        let _ = rl.save_history(path);
    }

    Ok(())
}

/// Run an interactive shell in a blocking thread (rustyline is blocking).
pub async fn cmd_shell(cfg: LoaderConfig, history: Option<PathBuf>) -> CliResult<()> {
    let handle = Handle::current();

    tokio::task::spawn_blocking(move || shell_blocking(handle, cfg, history))
        .await
        .map_err(|e| CliError::Internal {
            message: format!("shell thread failed: {e}"),
        })??;

    Ok(())
}
