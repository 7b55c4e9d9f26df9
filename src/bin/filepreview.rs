//! CLI binary for filepreview.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PreviewConfig` and prints one outcome per input.

use anyhow::{Context, Result};
use clap::Parser;
use filepreview::{
    codec, PipelineObserver, PipelineOutcome, PipelineState, PreviewConfig, PreviewMode,
    PreviewPipeline, PreviewRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: one spinner for the whole batch, one line per outcome.
/// Requests finish out of order when several run concurrently.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  {pos}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Previewing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_request_start(&self, source_url: &str) {
        self.bar.set_message(codec::file_name(source_url).to_string());
    }

    fn on_transition(&self, _from: PipelineState, to: PipelineState) {
        let label = match to {
            PipelineState::Fetching => "downloading…",
            PipelineState::Dispatching => "converting…",
            _ => return,
        };
        self.bar.set_message(label);
    }

    fn on_outcome(&self, outcome: &PipelineOutcome, elapsed: Duration) {
        let mark = match outcome {
            PipelineOutcome::Served { .. } => green("✓"),
            PipelineOutcome::Failed { .. } => red("✗"),
            _ => yellow("•"),
        };
        self.bar.println(format!(
            "  {mark} {outcome}  {}",
            dim(&format!("{:.1}s", elapsed.as_secs_f64()))
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Preview a URL (encoded to a token internally)
  filepreview http://localhost:8012/Sample1.docx

  # Preview a client token
  filepreview aHR0cDovL2xvY2FsaG9zdDo4MDEyL1NhbXBsZTEuZG9jeA

  # Print the token for a URL without previewing
  filepreview --encode-only http://localhost:8012/Sample1.docx

  # Spreadsheets as PDF instead of HTML, re-downloading the source
  filepreview --mode pdf --force-refresh http://host/report.xlsx

  # Several inputs, JSON output
  filepreview --json --concurrency 8 http://host/a.doc http://host/b.pptx

ENVIRONMENT VARIABLES:
  Every flag can also be set as FILEPREVIEW_<FLAG>, e.g. FILEPREVIEW_CACHE_DIR.
  RUST_LOG overrides the log filter.

EXIT STATUS:
  0 when every input was served, rejected or needs a password;
  1 when any input failed.
"#;

/// Fetch, cache and convert documents for preview.
#[derive(Parser, Debug)]
#[command(
    name = "filepreview",
    version,
    about = "Fetch, cache and convert remote documents for preview",
    long_about = "Download documents by URL or client token, cache them, detect password \
protection and convert office files to PDF or HTML with a headless LibreOffice.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Client tokens (URL-safe base64) or raw http(s) URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Re-download even when the file is cached, discarding old conversions.
    #[arg(long, env = "FILEPREVIEW_FORCE_REFRESH")]
    force_refresh: bool,

    /// Rendering mode: auto, web or pdf.
    #[arg(long, env = "FILEPREVIEW_MODE", value_enum, default_value = "auto")]
    mode: ModeArg,

    /// Cache directory for originals and conversions.
    #[arg(long, env = "FILEPREVIEW_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Download timeout in seconds.
    #[arg(long, env = "FILEPREVIEW_FETCH_TIMEOUT", default_value_t = 120)]
    fetch_timeout: u64,

    /// Conversion timeout in seconds.
    #[arg(long, env = "FILEPREVIEW_CONVERSION_TIMEOUT", default_value_t = 180)]
    conversion_timeout: u64,

    /// LibreOffice executable used for conversion.
    #[arg(long, env = "FILEPREVIEW_SOFFICE", default_value = "soffice")]
    soffice: String,

    /// Number of inputs processed concurrently.
    #[arg(short, long, env = "FILEPREVIEW_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print the client token for each input and exit.
    #[arg(long)]
    encode_only: bool,

    /// Output structured JSON instead of text lines.
    #[arg(long, env = "FILEPREVIEW_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "FILEPREVIEW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILEPREVIEW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, env = "FILEPREVIEW_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Web,
    Pdf,
}

impl From<ModeArg> for PreviewMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Auto => PreviewMode::Auto,
            ModeArg::Web => PreviewMode::Web,
            ModeArg::Pdf => PreviewMode::Pdf,
        }
    }
}

/// One line of `--json` output.
#[derive(Serialize)]
struct Report<'a> {
    input: &'a str,
    #[serde(flatten)]
    outcome: &'a PipelineOutcome,
}

fn is_raw_url(input: &str) -> bool {
    let lower = input.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Turn one CLI input into a request, or the outcome explaining why not.
fn to_request(input: &str, force_refresh: bool, mode: PreviewMode) -> Result<PreviewRequest, PipelineOutcome> {
    let source_url = if is_raw_url(input) {
        codec::check_source_url(input)
    } else {
        codec::decode(input)
    }
    .map_err(|e| PipelineOutcome::failed(&e))?;
    Ok(PreviewRequest::new(source_url)
        .force_refresh(force_refresh)
        .mode(mode))
}

/// Split inputs into pipeline requests and outcomes already decided.
///
/// Slots holding `None` are filled, in order, by the batch results. Inputs
/// refused here never reach the pipeline, so they are reported to the
/// observer directly to keep its count whole.
fn prepare(
    inputs: &[String],
    force_refresh: bool,
    mode: PreviewMode,
    observer: Option<&CliObserver>,
) -> (Vec<Option<PipelineOutcome>>, Vec<PreviewRequest>) {
    let mut slots = Vec::with_capacity(inputs.len());
    let mut requests = Vec::new();
    for input in inputs {
        match to_request(input, force_refresh, mode) {
            Ok(request) => {
                slots.push(None);
                requests.push(request);
            }
            Err(outcome) => {
                if let Some(obs) = observer {
                    obs.on_request_start(input);
                    obs.on_outcome(&outcome, Duration::ZERO);
                }
                slots.push(Some(outcome));
            }
        }
    }
    (slots, requests)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Encode-only mode ─────────────────────────────────────────────────
    if cli.encode_only {
        for input in &cli.inputs {
            println!("{}", codec::encode(input.trim()));
        }
        return Ok(());
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports every outcome; keep library logs quiet.
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

    // ── Build pipeline ───────────────────────────────────────────────────
    let observer = show_progress.then(|| CliObserver::new(cli.inputs.len()));
    let config = build_config(&cli, observer.clone())?;
    let pipeline = PreviewPipeline::from_config(config).context("Failed to set up the pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let mode = PreviewMode::from(cli.mode);
    let (outcomes, requests) = prepare(&cli.inputs, cli.force_refresh, mode, observer.as_deref());

    let mut served = pipeline.preview_batch(requests).await.into_iter();
    let outcomes: Vec<PipelineOutcome> = outcomes
        .into_iter()
        .map(|slot| slot.or_else(|| served.next()))
        .collect::<Option<Vec<_>>>()
        .context("Pipeline returned fewer outcomes than requests")?;

    if let Some(ref obs) = observer {
        obs.finish();
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let reports: Vec<Report<'_>> = cli
            .inputs
            .iter()
            .zip(&outcomes)
            .map(|(input, outcome)| Report { input, outcome })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise outcomes")?
        );
    } else {
        for (input, outcome) in cli.inputs.iter().zip(&outcomes) {
            println!("{input}\t{outcome}");
        }
    }

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    if failed > 0 {
        if !cli.quiet {
            eprintln!("{} {failed}/{} inputs failed", red("✘"), outcomes.len());
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `PreviewConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<PreviewConfig> {
    let mut builder = PreviewConfig::builder()
        .fetch_timeout_secs(cli.fetch_timeout)
        .conversion_timeout_secs(cli.conversion_timeout)
        .converter_program(cli.soffice.clone())
        .max_concurrency(cli.concurrency)
        .default_mode(cli.mode.into());

    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir.clone());
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn PipelineObserver>);
    }

    builder.build().context("Invalid configuration")
}
