//! CLI binary for paperless-reocr.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `RunConfig` and renders run progress.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperless_reocr::{
    run, DocumentId, PageSeparator, ProgressCallback, RunConfig, RunProgressCallback, RunSummary,
    SelectionMode,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal dashboard: a live progress bar plus one log line per finished
/// document. Documents complete out of order across workers, so every
/// method must be safe to call concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    /// Create a callback whose bar length is set by `on_run_start` once the
    /// candidate total is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        // Spinner only until the first listing page reports a total.
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Enumerating");
        bar.set_message("Listing documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: Option<usize>) {
        if let Some(total) = total {
            self.activate_bar(total);
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("{total} documents to process…"))
            ));
        } else {
            self.bar.set_prefix("Processing");
        }
    }

    fn on_document_start(&self, id: DocumentId, title: &str) {
        self.bar.set_message(format!("#{id} {title}"));
    }

    fn on_document_done(&self, id: DocumentId, pages: usize) {
        self.bar.println(format!(
            "  {} #{:<6} {}",
            green("✓"),
            id,
            dim(&format!("{pages} pages")),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, id: DocumentId, reason: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if reason.chars().count() > 80 {
            let head: String = reason.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            reason.to_string()
        };

        self.bar
            .println(format!("  {} #{:<6} {}", red("✗"), id, red(&msg)));
        self.bar.inc(1);
    }

    fn on_document_skipped(&self, _id: DocumentId) {
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();

        if summary.failed == 0 {
            eprintln!(
                "{} {} documents done",
                green("✔"),
                bold(&summary.done.to_string())
            );
        } else {
            eprintln!(
                "{} {} done  {} failed",
                if summary.done == 0 { red("✘") } else { cyan("⚠") },
                bold(&summary.done.to_string()),
                red(&summary.failed.to_string()),
            );
        }
        if summary.skipped > 0 {
            eprintln!("   {}", dim(&format!("{} skipped", summary.skipped)));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every document not yet tagged done
  reocr

  # One specific document, even if already done
  reocr --id 4711 --force

  # Every document in a tag group
  reocr --tag-id 17

  # Retry everything in the dead-letter queue
  reocr --retry-failed

  # Four workers, first 3 pages of each document only
  reocr --workers 4 --page-limit 3

ENVIRONMENT VARIABLES (also read from ./.env):
  PAPERLESS_URL        Base URL of the document store
  PAPERLESS_TOKEN      API token for the store
  OLLAMA_URL           Generate endpoint of the vision model
  MODEL                Vision model id (default: minicpm-v:latest)
  TAG_ID               Id of the done tag
  FAILED_TAG_ID        Id of the failed tag
  REOCR_WORKERS        Concurrent documents (default: core count)
  REOCR_CACHE_DIR      Page cache directory
  REOCR_DLQ_PATH       Dead-letter queue file
  REOCR_PROMPT_FILE    Operator-editable prompt file (default: ./prompt.md)

EXIT STATUS:
  0  enumeration completed (individual document failures do not fail the run)
  1  configuration or enumeration error
"#;

/// Re-OCR documents in a Paperless store with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "reocr",
    version,
    about = "Re-OCR documents in a Paperless store with a local vision model",
    long_about = "Walks the document store, rasterises each candidate document, transcribes \
its pages with a local vision language model, and writes the improved text plus a workflow \
tag back to the store. Interrupted runs resume where they left off.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Process only this document id.
    #[arg(long, visible_alias = "document-id", conflicts_with_all = ["tag_id", "retry_failed"])]
    id: Option<DocumentId>,

    /// Process every document carrying this tag id.
    #[arg(long = "tag-id", visible_alias = "tag_id", conflicts_with = "retry_failed")]
    tag_id: Option<u64>,

    /// Process documents even when they already carry the done tag.
    #[arg(long)]
    force: bool,

    /// Re-attempt the ids recorded in the dead-letter queue.
    #[arg(long = "retry-failed", visible_alias = "retry_failed")]
    retry_failed: bool,

    /// Base URL of the document store.
    #[arg(long, env = "PAPERLESS_URL")]
    store_url: Option<String>,

    /// API token for the document store.
    #[arg(long, env = "PAPERLESS_TOKEN", hide_env_values = true)]
    store_token: Option<String>,

    /// Generate endpoint of the vision model.
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434/api/generate")]
    ollama_url: String,

    /// Vision model id.
    #[arg(long, env = "MODEL", default_value = "minicpm-v:latest")]
    model: String,

    /// Tag id marking successfully processed documents.
    #[arg(long, env = "TAG_ID")]
    done_tag: Option<u64>,

    /// Tag id marking failed documents.
    #[arg(long, env = "FAILED_TAG_ID")]
    failed_tag: Option<u64>,

    /// Number of documents processed concurrently (default: core count).
    #[arg(short, long, env = "REOCR_WORKERS")]
    workers: Option<usize>,

    /// Transcribe at most this many leading pages per document.
    #[arg(long, env = "REOCR_PAGE_LIMIT")]
    page_limit: Option<usize>,

    /// Page cache directory.
    #[arg(long, env = "REOCR_CACHE_DIR", default_value = "./reocr_cache")]
    cache_dir: PathBuf,

    /// Dead-letter queue file.
    #[arg(long, env = "REOCR_DLQ_PATH", default_value = "./reocr_failed.tsv")]
    dlq_path: PathBuf,

    /// Operator-editable prompt file.
    #[arg(long, env = "REOCR_PROMPT_FILE", default_value = "./prompt.md")]
    prompt_file: PathBuf,

    /// Page separator in the assembled text: blank, rule, or a custom string.
    #[arg(long, default_value = "blank")]
    separator: String,

    /// Retries per remote call on transient failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-page inference timeout in seconds.
    #[arg(long, default_value_t = 300)]
    inference_timeout: u64,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Operator deployments keep endpoints and tokens in a .env beside the
    // binary; flags still win over the environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active;
    // the bar provides the feedback that matters.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as ProgressCallback)
    } else {
        None
    };

    let stop = Arc::new(AtomicBool::new(false));
    let config = build_config(&cli, progress_cb, Arc::clone(&stop))?;

    // ── Cooperative interrupt ────────────────────────────────────────────
    // First Ctrl-C stops dispatch and lets in-flight documents commit; a
    // second one aborts the process the usual way.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstop requested — finishing in-flight documents…");
            stop.store(true, Ordering::SeqCst);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = run(config).await.context("Run failed")?;

    if !cli.quiet && !show_progress {
        eprintln!(
            "{} done, {} failed, {} skipped{}",
            summary.done,
            summary.failed,
            summary.skipped,
            summary
                .percent()
                .map(|p| format!(" ({p:.1}%)"))
                .unwrap_or_default()
        );
    }

    Ok(())
}

/// Map CLI args to `RunConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    stop: Arc<AtomicBool>,
) -> Result<RunConfig> {
    let mode = if cli.retry_failed {
        SelectionMode::RetryFailed
    } else if let Some(id) = cli.id {
        SelectionMode::Single(id)
    } else if let Some(tag) = cli.tag_id {
        SelectionMode::TagGroup(tag)
    } else {
        SelectionMode::Pending
    };

    let mut builder = RunConfig::builder()
        .store_url(cli.store_url.clone().unwrap_or_default())
        .store_token(cli.store_token.clone().unwrap_or_default())
        .inference_url(&cli.ollama_url)
        .model(&cli.model)
        .done_tag(cli.done_tag.unwrap_or(0))
        .failed_tag(cli.failed_tag.unwrap_or(0))
        .mode(mode)
        .force(cli.force)
        .page_limit(cli.page_limit)
        .cache_dir(&cli.cache_dir)
        .dlq_path(&cli.dlq_path)
        .prompt_file(&cli.prompt_file)
        .page_separator(parse_separator(&cli.separator))
        .max_retries(cli.max_retries)
        .inference_timeout_secs(cli.inference_timeout)
        .stop_flag(stop);

    if let Some(workers) = cli.workers {
        builder = builder.workers(workers);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => PageSeparator::Blank,
        "rule" | "----" => PageSeparator::Rule,
        custom => PageSeparator::Custom(custom.to_string()),
    }
}
