use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use locus_core::{
    Collection, CollectionSummary, Filters, IngestionReport, JobProgress, LocusConfig,
    OutputFormat, QueryResponse, RepositoryUrl, SearchOutcome, Strategy,
};
use locus_engine::{Engine, IngestOptions};

const CONFIG_FILE: &str = ".locus.toml";

#[derive(Parser)]
#[command(
    name = "locus",
    version,
    about = "Repository knowledge engine: ingest a codebase once, then ask where things live",
    long_about = "Locus ingests a repository into a searchable collection of per-file summaries,\n\
                   symbols and git history, then answers \"where is X?\" with ranked files.\n\n\
                   Examples:\n  \
                     locus ingest https://github.com/acme/widgets   Ingest a GitHub repository\n  \
                     locus ingest .                                  Ingest the current directory\n  \
                     locus search 'token refresh' --repo https://github.com/acme/widgets\n  \
                     locus info --repo .                             Counts and freshness\n  \
                     locus mcp                                       Serve tools to an IDE over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .locus.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format: text, json or markdown
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest (or refresh) a repository
    #[command(long_about = "Ingest (or refresh) a repository.\n\n\
        Accepts an HTTPS or SSH repository URL, or a local directory.\n\
        Re-ingesting only reprocesses files whose content changed; files that no longer\n\
        exist are removed. Press Ctrl-C to cancel; finished files stay indexed.\n\n\
        Examples:\n  locus ingest https://github.com/acme/widgets\n  locus ingest https://github.com/acme/private --token $GITHUB_TOKEN\n  locus ingest ../my-project")]
    Ingest {
        /// Repository URL or local path
        url: String,

        /// Access token for private repositories (default: GITHUB_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Search an ingested repository
    #[command(long_about = "Search an ingested repository.\n\n\
        By default the query is routed across keyword, symbol and semantic search and\n\
        the results are merged. Use --strategy to run a single strategy.\n\n\
        Examples:\n  locus search 'authentication' --repo https://github.com/acme/widgets\n  locus search validateToken --repo . --strategy symbol\n  locus search 'database pool' --repo . --language rust --path-prefix src/")]
    Search {
        /// What to look for
        query: String,

        /// Repository URL or local path
        #[arg(long)]
        repo: String,

        /// keyword, symbol, semantic or hybrid (default: hybrid)
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Maximum results (default: 10, capped at 20)
        #[arg(long)]
        limit: Option<usize>,

        /// Only files in this language
        #[arg(long)]
        language: Option<String>,

        /// Only files under this directory
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Show document counts and freshness of an ingested repository
    Info {
        /// Repository URL or local path
        #[arg(long)]
        repo: String,
    },
    /// List ingested repositories
    List,
    /// Delete an ingested repository and its managed clone
    Delete {
        /// Repository URL or local path
        #[arg(long)]
        repo: String,
    },
    /// Start the MCP server on stdio for IDE integration
    #[command(long_about = "Start the MCP (Model Context Protocol) server on stdio.\n\n\
        Exposes ingest_repository, activate_repository, search_repository and\n\
        repository_info to AI coding agents. Logs go to stderr.")]
    Mcp,
    /// Create a default .locus.toml configuration file
    #[command(long_about = "Create a default .locus.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .locus.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Locus Configuration
# Every key is optional; the values shown are the defaults.

[llm]
# provider = "openai"          # openai | anthropic | ollama | none; others speak the OpenAI API
# model = "gpt-4o-mini"
# api_key = "..."              # or LOCUS_LLM_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
# base_url = "http://localhost:11434"
# timeout_secs = 30
# max_concurrent = 4
# max_attempts = 3
# initial_backoff_ms = 500
# max_input_chars = 12000

[embedding]
# provider = "local"           # local | voyage | openai
# model = "voyage-code-3"
# dimensions = 384
# api_key = "..."              # or VOYAGE_API_KEY

[ingest]
# max_file_bytes = 1048576
# sample_bytes = 8192
# max_non_text_ratio = 0.30
# extraction_workers = 0       # 0 = one per core
# skip_extensions = ["snap"]
# clone_timeout_secs = 300
# max_repo_size_mb = 500
# store_retry_attempts = 3

[retrieval]
# default_limit = 10
# max_limit = 20
# query_timeout_ms = 5000
# symbol_routing = "auto"      # auto | always | never
# identifier_max_len = 80
# min_semantic_score = 0.05
# symbol_exact_score = 1.0
# symbol_prefix_score = 0.8
# symbol_substring_score = 0.6

[storage]
# data_dir = ".locus"          # or LOCUS_DATA_DIR

[github]
# token = "..."                # or GITHUB_TOKEN
# api_url = "https://api.github.com"
# preflight = true
"#;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,hyper=info,hyper_util=info,reqwest=info,rustls=info,h2=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LocusConfig> {
    let mut config = match path {
        Some(path) => LocusConfig::from_file(path).into_diagnostic()?,
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                LocusConfig::from_file(default_path).into_diagnostic()?
            } else {
                LocusConfig::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

fn parse_repo(input: &str) -> Result<RepositoryUrl> {
    RepositoryUrl::parse(input).map_err(|e| {
        miette::miette!(
            help = "Use https://github.com/<owner>/<name>, git@host:<owner>/<name> or a local directory",
            "{e}"
        )
    })
}

fn not_ingested(url: &RepositoryUrl) -> miette::Report {
    miette::miette!(
        code = "REPO_NOT_INDEXED",
        help = format!("Run `locus ingest {}` first", url.canonical()),
        "{} has not been ingested",
        url.canonical()
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help().into_diagnostic()?;
        return Ok(());
    };

    match command {
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "locus", &mut std::io::stdout());
        }
        command => {
            let config = load_config(cli.config.as_deref())?;
            let engine = Arc::new(Engine::from_config(config).into_diagnostic()?);
            run(engine, command, cli.format).await?;
        }
    }

    Ok(())
}

async fn run(engine: Arc<Engine>, command: Command, format: OutputFormat) -> Result<()> {
    match command {
        Command::Ingest { url, token } => {
            let url = parse_repo(&url)?;
            let report = ingest(&engine, &url, token).await;
            print_report(&report, format)?;
            if let Some(failure) = &report.failure {
                miette::bail!(miette::miette!(
                    code = failure.code.clone(),
                    "ingestion of {} failed: {}",
                    report.repository_url,
                    failure.message
                ));
            }
        }
        Command::Search {
            query,
            repo,
            strategy,
            limit,
            language,
            path_prefix,
        } => {
            let url = parse_repo(&repo)?;
            let session = engine.session();
            if session.activate(&url).await.into_diagnostic()?.is_none() {
                return Err(not_ingested(&url));
            }
            let filters = Filters {
                language,
                path_prefix,
                ..Filters::default()
            };
            let response = session
                .search(&query, strategy, filters, limit)
                .await
                .into_diagnostic()?;
            if response.outcome == SearchOutcome::NotIngested {
                return Err(not_ingested(&url));
            }
            print_search(&response, format)?;
        }
        Command::Info { repo } => {
            let url = parse_repo(&repo)?;
            let Some(summary) = engine.info(&url).await.into_diagnostic()? else {
                return Err(not_ingested(&url));
            };
            print_info(&summary, format)?;
        }
        Command::List => {
            let collections = engine.list().await.into_diagnostic()?;
            print_list(&collections, format)?;
        }
        Command::Delete { repo } => {
            let url = parse_repo(&repo)?;
            if !engine.delete(&url).await.into_diagnostic()? {
                return Err(not_ingested(&url));
            }
            eprintln!("Deleted {} ({})", url.canonical(), url.collection_id());
        }
        Command::Mcp => {
            locus_mcp::server::run_server(engine).await.into_diagnostic()?;
        }
        Command::Init | Command::Completions { .. } => {}
    }
    Ok(())
}

/// Run one ingestion with a progress bar on an interactive stderr and
/// Ctrl-C wired to cancellation.
async fn ingest(engine: &Engine, url: &RepositoryUrl, token: Option<String>) -> IngestionReport {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
                return;
            }
            eprintln!("Cancelling; files already indexed are kept...");
            cancel.cancel();
        });
    }

    let (tx, rx) = watch::channel(JobProgress::default());
    let mut options = IngestOptions::default().with_cancel(cancel).with_progress(tx);
    if let Some(token) = token {
        options = options.with_token(token);
    }

    let progress = std::io::stderr()
        .is_terminal()
        .then(|| tokio::spawn(show_progress(rx, url.canonical().to_string())));

    let report = engine.ingest(url, options).await;
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    report
}

async fn show_progress(mut rx: watch::Receiver<JobProgress>, label: String) {
    let pb = indicatif::ProgressBar::new(0);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:30}] {pos}/{len} ({elapsed})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb.set_message(format!("{label}: acquiring"));

    while rx.changed().await.is_ok() {
        let progress = *rx.borrow_and_update();
        pb.set_length(progress.counts.discovered as u64);
        pb.set_position(progress.counts.terminal() as u64);
        pb.set_message(format!("{label}: {}", progress.state));
        if progress.state.is_terminal() {
            break;
        }
    }
    pb.finish_and_clear();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_report(report: &IngestionReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    let counts = &report.counts;
    println!(
        "{} {} ({})",
        report.status, report.repository_url, report.collection_id
    );
    println!(
        "  discovered {}  indexed {} ({} unchanged)  skipped {}  failed {}  pending {}",
        counts.discovered,
        counts.indexed,
        counts.unchanged,
        counts.skipped,
        counts.failed,
        counts.pending
    );
    println!("  took {:.1}s", report.duration_ms as f64 / 1000.0);
    for failure in &report.file_failures {
        println!("  failed: {}: {}", failure.path, failure.reason);
    }
    Ok(())
}

fn print_search(response: &QueryResponse, format: OutputFormat) -> Result<()> {
    match response.outcome {
        SearchOutcome::Degraded => {
            let partial = if response.partial { " (partial: a strategy timed out)" } else { "" };
            eprintln!("warning: search degraded{partial}; results may be incomplete");
        }
        SearchOutcome::NothingFound => eprintln!("No matching files."),
        _ => {}
    }

    match format {
        OutputFormat::Json => print_json(response)?,
        OutputFormat::Markdown => {
            for (rank, hit) in response.results.iter().enumerate() {
                let path = match &hit.github_url {
                    Some(link) => format!("[`{}`]({link})", hit.relative_path),
                    None => format!("`{}`", hit.relative_path),
                };
                println!(
                    "{}. {path} ({:.2}, {}): {}",
                    rank + 1,
                    hit.score,
                    hit.matched_by,
                    hit.summary
                );
            }
        }
        OutputFormat::Text => {
            for (rank, hit) in response.results.iter().enumerate() {
                println!(
                    "{:>2}. {}  ({:.2}, {})",
                    rank + 1,
                    hit.relative_path,
                    hit.score,
                    hit.matched_by
                );
                if !hit.summary.is_empty() {
                    println!("    {}", hit.summary);
                }
                if let Some(link) = &hit.github_url {
                    println!("    {link}");
                }
            }
        }
    }
    Ok(())
}

fn print_info(summary: &CollectionSummary, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(summary);
    }
    let collection = &summary.collection;
    println!("{} ({})", collection.repository_url, collection.collection_id);
    println!("  documents: {}", summary.document_count);
    for (status, count) in &summary.status_counts {
        println!("    {status}: {count}");
    }
    let languages: Vec<String> = summary
        .languages
        .iter()
        .map(|(language, count)| format!("{language} {count}"))
        .collect();
    if !languages.is_empty() {
        println!("  languages: {}", languages.join(", "));
    }
    match summary.last_ingested_at {
        Some(at) => println!("  last ingested: {}", at.to_rfc3339()),
        None => println!("  last ingested: never"),
    }
    Ok(())
}

fn print_list(collections: &[Collection], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&collections);
    }
    if collections.is_empty() {
        eprintln!("No repositories ingested yet. Try `locus ingest <url>`.");
        return Ok(());
    }
    for collection in collections {
        println!(
            "{}  {}  (created {})",
            collection.collection_id,
            collection.repository_url,
            collection.created_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}
