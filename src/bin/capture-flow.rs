//! CLI binary for capture-flow.
//!
//! Runs one capture session end to end against the offline replay service:
//! import the inputs, review, upload, analyse, then print the outcome.

use anyhow::{bail, Context, Result};
use capture_flow::{
    AnalysisOutcome, DigitalInvoice, ErrorSurface, EventStream, ExtractionResult, PendingError,
    ReplayService, SessionConfig, SessionError, SessionEvent, SessionHandle, Stage,
};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
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

// ── Upload progress ──────────────────────────────────────────────────────────

struct UploadProgress {
    bar: ProgressBar,
}

impl UploadProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

/// Prints shown errors above the progress bar. Acknowledging happens in the
/// driver loop, which sees the same error as an `ErrorShown` event.
struct CliSurface {
    bar: ProgressBar,
    quiet: bool,
}

impl ErrorSurface for CliSurface {
    fn show_error(&self, error: &PendingError) {
        if !self.quiet {
            self.bar
                .println(format!("  {} {}  {}", red("✗"), error.message, dim(&error.token.to_string())));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a PDF with a recorded result
  capture-flow --result result.json invoice.pdf

  # Several photos as one multipage document
  capture-flow --multipage --result result.json page1.jpg page2.jpg

  # A payment QR code
  capture-flow --result result.json --qr 'bank://singlepaymentsepa?name=ACME'

  # Exercise the retry path: the first two uploads fail
  capture-flow --fail-uploads 2 --result result.json scan.png

  # JSON output
  capture-flow --json --result result.json invoice.pdf > outcome.json

RESULT FILE:
  JSON in the analysis service's shape:
    {"extractions": {"iban": {"value": "DE89...", "entity": "iban"}},
     "lineItems": [[{"name": "description", "value": "Widget"}, ...]],
     "returnReasons": [{"id": "r1", "localizedLabels": {"en": "Damaged"}}]}
  Without --result every analysis comes back empty ("no results").
"#;

/// Run a document capture session against a recorded analysis result.
#[derive(Parser, Debug)]
#[command(
    name = "capture-flow",
    version,
    about = "Run a document capture session: import, review, upload, analyse",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files or HTTP/HTTPS URLs (PDF or images).
    inputs: Vec<String>,

    /// Scanned QR code payload to analyse instead of files.
    #[arg(long, env = "CAPTURE_FLOW_QR", conflicts_with = "inputs")]
    qr: Option<String>,

    /// JSON file holding the analysis result to replay.
    #[arg(long, env = "CAPTURE_FLOW_RESULT")]
    result: Option<PathBuf>,

    /// Collect several images into one document.
    #[arg(long, env = "CAPTURE_FLOW_MULTIPAGE")]
    multipage: bool,

    /// Show line items as plain extractions instead of a digital invoice.
    #[arg(long, env = "CAPTURE_FLOW_NO_RETURN_ASSISTANT")]
    no_return_assistant: bool,

    /// Maximum pages per session (1–100).
    #[arg(long, env = "CAPTURE_FLOW_MAX_PAGES", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..=100))]
    max_pages: u32,

    /// Fail this many uploads before succeeding.
    #[arg(long, env = "CAPTURE_FLOW_FAIL_UPLOADS", default_value_t = 0)]
    fail_uploads: usize,

    /// Acknowledge at most this many errors before giving up.
    #[arg(long, env = "CAPTURE_FLOW_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CAPTURE_FLOW_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the outcome as JSON.
    #[arg(long, env = "CAPTURE_FLOW_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CAPTURE_FLOW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CAPTURE_FLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the outcome.
    #[arg(short, long, env = "CAPTURE_FLOW_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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
        .with_writer(io::stderr)
        .init();

    if cli.inputs.is_empty() && cli.qr.is_none() {
        bail!("Nothing to capture: pass at least one file, URL or --qr payload");
    }

    // ── Build config and service ─────────────────────────────────────────
    let config = SessionConfig::builder()
        .multipage_enabled(cli.multipage)
        .return_assistant_enabled(!cli.no_return_assistant)
        .max_pages(cli.max_pages as usize)
        .download_timeout_secs(cli.download_timeout)
        .build()
        .context("Invalid session configuration")?;
    let service = Arc::new(load_service(&cli).await?);

    // ── Run session ──────────────────────────────────────────────────────
    let session = SessionHandle::open(config, service.clone(), Vec::new())
        .await
        .context("Failed to open session")?;
    let mut events = session.events();

    let progress = if show_progress {
        UploadProgress::new(cli.inputs.len().max(1))
    } else {
        UploadProgress::hidden()
    };
    let surface: Arc<dyn ErrorSurface> = Arc::new(CliSurface {
        bar: progress.bar.clone(),
        quiet: cli.quiet,
    });
    session.attach_surface(surface.clone()).await?;

    match &cli.qr {
        Some(payload) => session.capture_qr(payload).await,
        None => session.import(cli.inputs.as_slice()).await,
    }
    .context("Capture failed")?;

    let admitted = session.snapshot().await?.pages;
    if let Some(page) = admitted.iter().find(|p| p.error().is_some()) {
        let detail = page.error().map(ToString::to_string).unwrap_or_default();
        bail!("Page {} is not usable: {detail}", page.id());
    }
    let pages = admitted.len();
    progress.bar.set_length(pages as u64);

    drive(&session, &mut events, &surface, &progress, cli.max_retries).await?;
    progress.bar.finish_and_clear();

    let snapshot = session.snapshot().await?;
    print_outcome(snapshot.outcome.as_ref(), cli.json)?;

    session.close().await.context("Failed to close session")?;
    if !cli.quiet && !cli.json {
        let sent = service.feedback().len();
        eprintln!(
            "{} {} pages analysed{}",
            green("✔"),
            bold(&pages.to_string()),
            if sent > 0 { dim("  (feedback sent)") } else { String::new() },
        );
    }
    Ok(())
}

async fn load_service(cli: &Cli) -> Result<ReplayService> {
    let service = match &cli.result {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read result from {:?}", path))?;
            ReplayService::from_json(&json)
                .with_context(|| format!("Failed to parse result in {:?}", path))?
        }
        None => ReplayService::new(ExtractionResult::default()),
    };
    Ok(service.fail_first_uploads(cli.fail_uploads))
}

/// Advance through review and answer errors until the analysis routes the
/// session to its outcome stage.
async fn drive(
    session: &SessionHandle,
    events: &mut EventStream,
    surface: &Arc<dyn ErrorSurface>,
    progress: &UploadProgress,
    max_retries: u32,
) -> Result<()> {
    let mut retries = 0;
    try_advance(session).await?;

    while let Some(event) = events.next().await {
        match event {
            SessionEvent::PageUploaded { .. } => {
                progress.bar.inc(1);
                try_advance(session).await?;
            }
            SessionEvent::StageChanged { to, .. } => {
                progress.bar.set_message(format!("{to:?}"));
                match to {
                    Stage::Review | Stage::MultipageReview => try_advance(session).await?,
                    Stage::Results | Stage::DigitalInvoiceReview | Stage::NoResults => return Ok(()),
                    _ => {}
                }
            }
            SessionEvent::ErrorShown { error } => {
                if retries >= max_retries {
                    bail!("Giving up after {retries} retries: {}", error.message);
                }
                retries += 1;
                session
                    .acknowledge_error(error.token)
                    .await
                    .with_context(|| format!("Retry {} failed", error.token))?;
            }
            SessionEvent::ErrorDeferred { .. } => {
                session.attach_surface(surface.clone()).await?;
            }
            SessionEvent::Finished { .. } => bail!("Session ended before the analysis finished"),
            _ => {}
        }
    }
    bail!("Session ended before the analysis finished")
}

/// Advance out of review when the session is ready for it.
async fn try_advance(session: &SessionHandle) -> Result<()> {
    let stage = session.snapshot().await?.stage;
    if !matches!(stage, Stage::Review | Stage::MultipageReview) {
        return Ok(());
    }
    match session.advance().await {
        Ok(()) | Err(SessionError::PagesNotReady { .. }) => Ok(()),
        Err(e) => Err(e).context("Failed to start the analysis"),
    }
}

fn print_outcome(outcome: Option<&AnalysisOutcome>, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?;
        println!("{json}");
        return Ok(());
    }
    match outcome {
        Some(AnalysisOutcome::Extractions(result)) => {
            let width = result.extractions.keys().map(String::len).max().unwrap_or(0);
            for (name, extraction) in &result.extractions {
                println!("{name:<width$}  {}", extraction.value);
            }
        }
        Some(AnalysisOutcome::Invoice(invoice)) => print_invoice(invoice)?,
        Some(AnalysisOutcome::NoResults) | None => println!("No results"),
    }
    Ok(())
}

fn print_invoice(invoice: &DigitalInvoice) -> Result<()> {
    for item in invoice.line_items() {
        println!(
            "{} {:>3} × {:<40} {:>14}",
            if item.is_selected() { green("✓") } else { red("✗") },
            item.quantity,
            item.name.as_deref().unwrap_or("-"),
            item.total_price()
                .map_or_else(|_| "overflow".to_string(), |p| p.to_string()),
        );
    }
    for addon in invoice.addons() {
        println!("      {:<40} {:>14}", addon.name, addon.price.to_string());
    }
    let total = invoice.total().context("Cannot total the invoice")?;
    if let Some(total) = total {
        println!("{}", bold(&format!("      {:<40} {:>14}", "Total", total.to_string())));
    }
    Ok(())
}
