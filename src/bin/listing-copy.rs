//! CLI binary for listing-copy.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `NormalizationPolicy` / `GenerationConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use listing_copy::config::DEFAULT_MAX_UPLOAD_BYTES;
use listing_copy::{
    accept_batch, generate_copy_from_files, normalize_batch, resolve_model, GeneratedListingCopy,
    GenerationConfig,
    GenerationOutput, IntakeProgressCallback, NormalizationPolicy, NormalizeAction, ProgressCallback,
    SelectedFile, TargetFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Terminal progress for the normalisation batch: one bar plus a line per
/// image. Images may finish out of order, so lines are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    names: Vec<String>,
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    fn new(names: Vec<String>) -> Arc<Self> {
        let bar = ProgressBar::new(names.len() as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>2}/{len} images  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names,
            fallbacks: AtomicUsize::new(0),
        })
    }

    fn name(&self, index: usize) -> &str {
        self.names.get(index).map(String::as_str).unwrap_or("?")
    }
}

impl IntakeProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_prefix("Normalising");
    }

    fn on_image_complete(&self, index: usize, _total: usize, bytes_out: usize, replaced: bool) {
        let note = if replaced { "recompressed" } else { "unchanged" };
        self.bar.println(format!(
            "  {} {:<28} {:>9}  {}",
            green("✓"),
            self.name(index),
            dim(&human_bytes(bytes_out)),
            dim(note),
        ));
        self.bar.inc(1);
    }

    fn on_image_fallback(&self, index: usize, _total: usize, error: &str) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<28} {}",
            yellow("⚠"),
            self.name(index),
            yellow(&format!("kept original: {error}")),
        ));
    }

    fn on_batch_complete(&self, total: usize, replaced: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} images ready  {}",
            green("✔"),
            bold(&total.to_string()),
            dim(&format!(
                "({replaced} recompressed, {} kept original after an error)",
                self.fallbacks.load(Ordering::SeqCst)
            )),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate copy for three photos
  listing-copy front.jpg back.jpg label.jpg

  # JSON output to a file
  listing-copy --json -o listing.json *.jpg

  # Use a different model
  listing-copy --model gemini-2.5-flash chair.jpg

  # Only shrink the images, no model call
  listing-copy --normalize-only --json big-photo.jpg

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY           Google AI Studio API key
  GOOGLE_API_KEY           Fallback API key variable
  LISTING_COPY_MODEL       Model ID (default: gemini-2.0-flash)
  LISTING_COPY_API_BASE    Endpoint root (default: Generative Language API v1beta)
  RUST_LOG                 Overrides the log filter
"#;

/// Generate marketplace listing copy from product photos.
#[derive(Parser, Debug)]
#[command(
    name = "listing-copy",
    version,
    about = "Generate marketplace listing copy from product photos",
    long_about = "Shrinks large product photos, sends them to a multimodal generative model and \
prints a title, description and, when recognisable, price, category, brand and model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files, in the order the model should see them.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "LISTING_COPY_OUTPUT")]
    output: Option<PathBuf>,

    /// Model ID (e.g. gemini-2.0-flash).
    #[arg(long, env = "LISTING_COPY_MODEL")]
    model: Option<String>,

    /// Endpoint root of the generative API.
    #[arg(long, env = "LISTING_COPY_API_BASE")]
    api_base: Option<String>,

    /// API key sent as `x-goog-api-key`.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OAuth access token sent as `Authorization: Bearer`.
    #[arg(long, env = "LISTING_COPY_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Maximum number of images per request.
    #[arg(long, env = "LISTING_COPY_MAX_IMAGES", default_value_t = 5)]
    max_images: usize,

    /// Images at or below this many bytes are sent untouched.
    #[arg(long, env = "LISTING_COPY_MAX_BYTES", default_value_t = 1024 * 1024)]
    max_bytes: u64,

    /// Inputs larger than this many bytes are skipped. 0 disables the limit.
    #[arg(long, env = "LISTING_COPY_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: u64,

    /// Longest edge in pixels after downscaling.
    #[arg(long, env = "LISTING_COPY_MAX_DIMENSION", default_value_t = 1920)]
    max_dimension: u32,

    /// Lossy encoder quality (0.0–1.0).
    #[arg(long, env = "LISTING_COPY_QUALITY", default_value_t = 0.8)]
    quality: f32,

    /// Re-encode format for downscaled images.
    #[arg(long, env = "LISTING_COPY_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// Model call timeout in seconds.
    #[arg(long, env = "LISTING_COPY_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Output structured JSON instead of plain text.
    #[arg(long, env = "LISTING_COPY_JSON")]
    json: bool,

    /// Only run intake and normalisation; no model call.
    #[arg(long)]
    normalize_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "LISTING_COPY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LISTING_COPY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LISTING_COPY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for TargetFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => TargetFormat::Jpeg,
            FormatArg::Png => TargetFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
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

    // ── Resolve the model before touching any image ──────────────────────
    let config = if cli.normalize_only {
        None
    } else {
        let mut config = build_config(&cli)?;
        config.model_client = Some(resolve_model(&config)?);
        Some(config)
    };

    // ── Read inputs ──────────────────────────────────────────────────────
    let upload_limit = upload_limit(&cli);
    let mut files = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        let file = SelectedFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let names = files
            .iter()
            .filter(|f| f.mime_type.to_ascii_lowercase().starts_with("image/"))
            .filter(|f| upload_limit.map_or(true, |max| f.bytes.len() as u64 <= max))
            .map(|f| f.file_name.clone())
            .collect();
        Some(CliProgressCallback::new(names) as Arc<dyn IntakeProgressCallback>)
    } else {
        None
    };
    let policy = build_policy(&cli, progress_cb)?;

    // ── Normalise-only mode ──────────────────────────────────────────────
    let Some(config) = config else {
        let assets = accept_batch(files, &policy);
        if assets.is_empty() {
            anyhow::bail!("None of the inputs is an accepted image");
        }
        let normalized = normalize_batch(assets, &policy).await;

        let rendered = if cli.json {
            serde_json::to_string_pretty(&normalized).context("Failed to serialise output")?
        } else {
            normalized
                .iter()
                .map(|n| {
                    let action = match &n.action {
                        NormalizeAction::Unchanged => "unchanged".to_string(),
                        NormalizeAction::Recompressed {
                            original_bytes,
                            width,
                            height,
                        } => format!(
                            "{} → {} ({}x{})",
                            human_bytes(*original_bytes),
                            human_bytes(n.asset.len()),
                            width,
                            height
                        ),
                        NormalizeAction::Fallback { error } => format!("kept original: {error}"),
                    };
                    format!("{}\t{}\t{}", n.asset.file_name, n.asset.mime_type, action)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        return emit(&rendered, cli.output.as_deref()).await;
    };

    // ── Generate ─────────────────────────────────────────────────────────
    let output = generate_copy_from_files(files, &policy, &config)
        .await
        .context("Generation failed")?;

    let rendered = if cli.json {
        serde_json::to_string_pretty(&output).context("Failed to serialise output")?
    } else {
        render_text(&output.copy)
    };
    emit(&rendered, cli.output.as_deref()).await?;

    if !cli.quiet && !cli.json {
        print_summary(&output);
    }

    Ok(())
}

/// Map CLI args to `NormalizationPolicy`.
fn build_policy(cli: &Cli, progress: Option<ProgressCallback>) -> Result<NormalizationPolicy> {
    let mut builder = NormalizationPolicy::builder()
        .max_bytes(cli.max_bytes)
        .max_upload_bytes(upload_limit(cli))
        .max_dimension_px(cli.max_dimension)
        .quality(cli.quality)
        .target_format(cli.format.clone().into());

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid normalisation settings")
}

fn upload_limit(cli: &Cli) -> Option<u64> {
    (cli.max_upload_bytes > 0).then_some(cli.max_upload_bytes)
}

/// Map CLI args to `GenerationConfig`.
fn build_config(cli: &Cli) -> Result<GenerationConfig> {
    let mut builder = GenerationConfig::builder()
        .max_images(cli.max_images)
        .api_timeout_secs(cli.timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref base) = cli.api_base {
        builder = builder.api_base(base);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref token) = cli.bearer_token {
        builder = builder.bearer_token(token);
    }

    builder.build().context("Invalid configuration")
}

fn render_text(copy: &GeneratedListingCopy) -> String {
    let mut out = format!("{}\n\n{}\n", copy.title, copy.description);
    let details: Vec<String> = [
        ("Price", copy.price.map(|p| format!("{p:.2}"))),
        ("Category", copy.category.clone()),
        ("Brand", copy.brand.clone()),
        ("Model", copy.model.clone()),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
    .collect();

    if !details.is_empty() {
        out.push('\n');
        out.push_str(&details.join("\n"));
        out.push('\n');
    }
    out
}

/// Write to `path` (temp file + rename) or to stdout.
async fn emit(content: &str, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(content.as_bytes())
            .context("Failed to write to stdout")?;
        if !content.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn print_summary(output: &GenerationOutput) {
    let stats = &output.stats;
    eprintln!(
        "{}  {} images  {}  {}ms",
        cyan("◆"),
        stats.image_count,
        dim(&human_bytes(stats.image_bytes)),
        stats.total_duration_ms,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  parsed as {}",
        dim(&stats.input_tokens.to_string()),
        dim(&stats.output_tokens.to_string()),
        dim(&format!("{:?}", output.source).to_lowercase()),
    );
}

fn human_bytes(n: usize) -> String {
    const KIB: f64 = 1024.0;
    let n = n as f64;
    if n >= KIB * KIB {
        format!("{:.1} MiB", n / KIB / KIB)
    } else if n >= KIB {
        format!("{:.0} KiB", n / KIB)
    } else {
        format!("{n} B")
    }
}
