//! CLI tool for loading the newest copy of every Parquet part file under a
//! prefix and querying the result.

mod engine;
mod error;
mod list;
mod query;
mod shell;

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use lakesnap_core::{
    config::LoaderConfig, partition::KeyMode, snapshot::SnapshotResolver,
};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

use crate::{
    engine::Engine,
    error::{CliError, CliResult, ConfigSnafu},
    list::ListOpts,
    query::{QueryOpts, page_output, print_query_result, write_query_result},
    shell::cmd_shell,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Csv,
    Jsonl,
}

impl From<OutputFormatArg> for crate::query::OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Csv => crate::query::OutputFormat::Csv,
            OutputFormatArg::Jsonl => crate::query::OutputFormat::Jsonl,
        }
    }
}

/// Source and naming options shared by every subcommand. Flags win over the
/// config file, which wins over built-in defaults.
#[derive(Debug, Clone, Default, Args)]
struct SourceArgs {
    /// TOML config file ([source], [partition], [table])
    #[arg(long, global = true, env = "LAKESNAP_CONFIG")]
    config: Option<PathBuf>,

    /// s3://<bucket>, file:///<dir>, or a local directory
    #[arg(long, global = true)]
    location: Option<String>,

    /// Key prefix to list, e.g. delta/storm_events/
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Only keys ending with this suffix are loaded (default: .parquet)
    #[arg(long, global = true)]
    suffix: Option<String>,

    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom S3 endpoint (MinIO, LocalStack)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// SQL table name (default: last prefix segment)
    #[arg(long = "table-name", global = true)]
    table_name: Option<String>,

    /// Fail on filenames that do not follow <tok>-<tok>-<rest>
    #[arg(long = "strict-keys", global = true, default_value_t = false)]
    strict_keys: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the newest copy of every part file, newest first
    List {
        /// Print fetchable URIs instead of keys
        #[arg(long, default_value_t = false)]
        uris: bool,

        /// Print the selection as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Execute a SQL query via DataFusion against the latest snapshot
    Query {
        #[arg(long)]
        sql: String,

        #[arg(long, default_value_t = false)]
        explain: bool,

        #[arg(long, default_value_t = false)]
        timing: bool,

        /// Page output through `less -S` (no truncation; horizontal scroll)
        #[arg(long, default_value_t = false)]
        pager: bool,

        #[arg(long, default_value_t = 10)]
        max_rows: usize,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormatArg::Csv)]
        format: OutputFormatArg,
    },

    /// Interactive shell: ask SQL questions against the loaded table
    Shell {
        /// Optional history file path
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "lakesnap", version, about)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

struct QueryArgs {
    sql: String,
    explain: bool,
    timing: bool,
    pager: bool,
    max_rows: usize,
    output: Option<PathBuf>,
    format: OutputFormatArg,
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Also forwards `log` records from the library crates.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Merge the config file (if any) with command-line overrides.
fn load_config(args: &SourceArgs) -> CliResult<LoaderConfig> {
    let mut cfg = match &args.config {
        Some(path) => LoaderConfig::load(path).context(ConfigSnafu)?,
        None => LoaderConfig::default(),
    };

    if let Some(location) = &args.location {
        cfg.source.location = location.clone();
    }
    if let Some(prefix) = &args.prefix {
        cfg.source.prefix = prefix.clone();
    }
    if let Some(suffix) = &args.suffix {
        cfg.source.suffix = suffix.clone();
    }
    if let Some(region) = &args.region {
        cfg.source.region = Some(region.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        cfg.source.endpoint = Some(endpoint.clone());
    }
    if let Some(name) = &args.table_name {
        cfg.table.name = Some(name.clone());
    }
    if args.strict_keys {
        cfg.partition.mode = KeyMode::Strict;
    }

    Ok(cfg)
}

fn make_engine(cfg: &LoaderConfig) -> CliResult<Box<dyn Engine<Error = CliError>>> {
    let resolver = SnapshotResolver::from_config(cfg).context(ConfigSnafu)?;
    let table_name = cfg.table.name.clone().unwrap_or_else(|| {
        query::default_table_name(resolver.prefix(), resolver.location())
    });

    Ok(Box::new(engine::DataFusionEngine::new(resolver, table_name)?))
}

async fn cmd_list(cfg: &LoaderConfig, opts: ListOpts) -> CliResult<()> {
    let engine = make_engine(cfg)?;
    let snapshot = engine.resolve().await?;

    let mut stdout = std::io::stdout();
    list::write_listing(&snapshot, opts, &mut stdout)
}

async fn cmd_query_with_engine(
    engine: &dyn Engine<Error = CliError>,
    sql: String,
    opts: QueryOpts,
    pager: bool,
) -> CliResult<()> {
    let session = engine.prepare_session().await?;
    if let Some(name) = session.table_name() {
        let quoted = query::quote_identifier(name);
        eprintln!("Registered table as '{name}' (quoted: {quoted})");
    }

    let res = session.run_query(&sql, &opts).await?;
    if pager {
        let mut buf = Vec::new();
        write_query_result(&res, &opts, &mut buf)?;
        let rendered = String::from_utf8_lossy(&buf);
        page_output(&rendered)?;
    } else {
        print_query_result(&res, &opts)?;
    }
    Ok(())
}

async fn cmd_query(cfg: &LoaderConfig, args: QueryArgs) -> CliResult<()> {
    let opts = QueryOpts {
        explain: args.explain,
        timing: args.timing,
        max_rows: args.max_rows,
        output: args.output,
        format: args.format.into(),
    };

    let engine = make_engine(cfg)?;
    cmd_query_with_engine(engine.as_ref(), args.sql, opts, args.pager).await
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cfg = load_config(&cli.source)?;

    match cli.cmd {
        Command::List { uris, json } => cmd_list(&cfg, ListOpts { uris, json }).await,

        Command::Query {
            sql,
            explain,
            timing,
            pager,
            max_rows,
            output,
            format,
        } => {
            cmd_query(
                &cfg,
                QueryArgs {
                    sql,
                    explain,
                    timing,
                    pager,
                    max_rows,
                    output,
                    format,
                },
            )
            .await
        }

        Command::Shell { history } => cmd_shell(cfg, history).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
