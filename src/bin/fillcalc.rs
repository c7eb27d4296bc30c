//! CLI binary for container-fill.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `EstimatorConfig` and prints results.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use container_fill::pipeline::encode::parse_data_uri;
use container_fill::{
    estimate_from_input, estimate_to_file, measure_point_cloud, validate_container_volume,
    ArtifactFormat, CalculationRecord, ErrorResponse, EstimatorConfig, FillError,
    PipelineObserver, PipelineStage, PointCloudFileSource, ThresholdPolicy,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: one bar counting finished inputs, plus a log line per
/// renderer fallback. Inputs run concurrently, so messages arrive
/// interleaved; each line is self-contained.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Estimating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, stage: PipelineStage) {
        self.bar.set_message(dim(&stage.to_string()));
    }

    fn on_render_fallback(&self, failed_renderer: &str, reason: &str) {
        self.bar.println(format!(
            "  {} {} renderer failed, using fallback  {}",
            cyan("⚠"),
            failed_renderer,
            dim(reason)
        ));
    }

    fn on_pipeline_error(&self, stage: PipelineStage, error: &FillError) {
        self.bar.println(format!(
            "  {} {} stage: {}",
            red("✗"),
            stage,
            red(&error.public_message())
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One photograph, 120 L container
  fillcalc bin.jpg --container-volume 120

  # Prompt for the container volume
  fillcalc bin.jpg

  # Several photographs at once, JSON output
  fillcalc --json -c 80 a.jpg b.png https://example.com/c.webp

  # Dark contents on a light container: Otsu with inverted polarity
  fillcalc --threshold otsu-inverted -c 50 silo.png

  # Save the JSON record and the rendered visualization
  fillcalc -c 10 tank.jpg -o result.json --render-dir renders/

  # Use a LiDAR scan instead of the synthetic point cloud
  fillcalc -c 10 tank.jpg --point-cloud scan.pcd

  # Bounding volume of a scan only (no photograph)
  fillcalc --volume-only --point-cloud scan.pcd

THRESHOLD POLICIES:
  fixed           pixels brighter than --threshold-level are filled (default)
  otsu-inverted   level chosen from the histogram; darker pixels are filled

  The two policies can differ by tens of percentage points on the same
  photograph. Pick one per deployment and keep it.

ACCEPTED IMAGES:
  JPEG, PNG, WEBP. Anything else is rejected before decoding.

NOTE:
  The 3D point cloud is synthetic unless --point-cloud is given; 3d_volume
  is only meaningful with a real scan.
"#;

/// Estimate container fill level and volume from photographs.
#[derive(Parser, Debug)]
#[command(
    name = "fillcalc",
    version,
    about = "Estimate container fill level and volume from photographs",
    long_about = "Segment a photograph of a container into filled and empty regions, scale the \
fill percentage by the container volume, and render a 3D visualization of the point cloud.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths or HTTP/HTTPS URLs.
    inputs: Vec<String>,

    /// Total container volume (> 0). Prompted for when absent.
    #[arg(short = 'c', long, env = "FILLCALC_CONTAINER_VOLUME", allow_negative_numbers = true)]
    container_volume: Option<f64>,

    /// Thresholding policy.
    #[arg(long, env = "FILLCALC_THRESHOLD", value_enum, default_value = "fixed")]
    threshold: ThresholdArg,

    /// Level for the fixed policy (0–255).
    #[arg(long, env = "FILLCALC_THRESHOLD_LEVEL", default_value_t = 127)]
    threshold_level: u8,

    /// Gaussian smoothing sigma before thresholding; 0 disables.
    #[arg(long, env = "FILLCALC_BLUR_SIGMA", default_value_t = 1.1)]
    blur_sigma: f32,

    /// Synthetic point count.
    #[arg(long, env = "FILLCALC_POINTS", default_value_t = 1000)]
    points: usize,

    /// Seed for the synthetic point cloud (deterministic output).
    #[arg(long, env = "FILLCALC_SEED")]
    seed: Option<u64>,

    /// ASCII PCD or XYZ scan used instead of the synthetic point cloud.
    #[arg(long, env = "FILLCALC_POINT_CLOUD")]
    point_cloud: Option<PathBuf>,

    /// Visualization format.
    #[arg(long, env = "FILLCALC_FORMAT", value_enum, default_value = "png")]
    format: FormatArg,

    /// JPEG quality (1–100), used with --format jpeg.
    #[arg(long, env = "FILLCALC_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Visualization width in pixels.
    #[arg(long, env = "FILLCALC_WIDTH", default_value_t = 640)]
    width: u32,

    /// Visualization height in pixels.
    #[arg(long, env = "FILLCALC_HEIGHT", default_value_t = 480)]
    height: u32,

    /// Per-renderer timeout in seconds.
    #[arg(long, env = "FILLCALC_RENDER_TIMEOUT", default_value_t = 10)]
    render_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FILLCALC_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Write the JSON record to this file (single input only).
    #[arg(short, long, env = "FILLCALC_OUTPUT")]
    output: Option<PathBuf>,

    /// Save each decoded visualization into this directory.
    #[arg(long, env = "FILLCALC_RENDER_DIR")]
    render_dir: Option<PathBuf>,

    /// Print JSON instead of a text summary.
    #[arg(long, env = "FILLCALC_JSON")]
    json: bool,

    /// Print the bounding volume of --point-cloud and exit.
    #[arg(long)]
    volume_only: bool,

    /// Number of images processed concurrently.
    #[arg(long, env = "FILLCALC_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Disable progress bar.
    #[arg(long, env = "FILLCALC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILLCALC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FILLCALC_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ThresholdArg {
    Fixed,
    OtsuInverted,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.volume_only;
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

    // ── Volume-only mode ─────────────────────────────────────────────────
    if cli.volume_only {
        let path = cli
            .point_cloud
            .as_ref()
            .context("--volume-only needs --point-cloud FILE")?;
        let bounds = measure_point_cloud(path).context("Failed to measure point cloud")?;

        if cli.json {
            let body = serde_json::json!({
                "points": bounds.point_count,
                "min": bounds.min,
                "max": bounds.max,
                "3d_volume": container_fill::output::round2(bounds.volume()),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        } else {
            println!("File:         {}", path.display());
            println!("Points:       {}", bounds.point_count);
            println!("Min:          {:?}", bounds.min);
            println!("Max:          {:?}", bounds.max);
            println!("3D volume:    {:.4}", bounds.volume());
        }
        return Ok(());
    }

    if cli.inputs.is_empty() {
        anyhow::bail!("No input images given. Pass one or more file paths or URLs.");
    }
    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output accepts a single input; use --json for several");
    }

    // ── Container volume ─────────────────────────────────────────────────
    let container_volume = match cli.container_volume {
        Some(v) => v,
        None => prompt_container_volume()?,
    };

    // ── Build config ─────────────────────────────────────────────────────
    let observer = show_progress.then(|| CliObserver::new(cli.inputs.len()));
    let config = build_config(&cli, observer.clone())?;

    // ── Run estimates ────────────────────────────────────────────────────
    let config = &config;
    let output = cli.output.as_deref();
    let bar = observer.as_ref().map(|o| o.bar.clone());
    let results: Vec<(String, Result<CalculationRecord, FillError>)> =
        stream::iter(cli.inputs.iter().cloned().map(|input| {
            let bar = bar.clone();
            async move {
                let result = match output {
                    Some(path) => estimate_to_file(&input, container_volume, path, config).await,
                    None => estimate_from_input(&input, container_volume, config).await,
                };
                if let Some(bar) = bar {
                    bar.inc(1);
                }
                (input, result)
            }
        }))
        .buffer_unordered(cli.concurrency.max(1))
        .collect()
        .await;

    if let Some(ref o) = observer {
        o.bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    if let Some(ref dir) = cli.render_dir {
        for (input, result) in &results {
            if let Ok(record) = result {
                let path = save_render(dir, input, record)?;
                if !cli.quiet && !cli.json {
                    eprintln!("   {} {}", dim("render →"), path.display());
                }
            }
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if cli.json {
        print_json(&results)?;
    } else {
        for (input, result) in &results {
            match result {
                Ok(record) => print_record(input, record, container_volume, cli.quiet),
                Err(e) => eprintln!("{} {}: {}", red("✘"), input, e),
            }
        }
    }

    if let Some(ref path) = cli.output {
        if failed == 0 && !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed", failed, results.len());
    }
    Ok(())
}

/// Map CLI args to `EstimatorConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<EstimatorConfig> {
    let threshold = match cli.threshold {
        ThresholdArg::Fixed => ThresholdPolicy::Fixed {
            level: cli.threshold_level,
        },
        ThresholdArg::OtsuInverted => ThresholdPolicy::OtsuInverted,
    };
    let format = match cli.format {
        FormatArg::Png => ArtifactFormat::Png,
        FormatArg::Jpeg => ArtifactFormat::Jpeg {
            quality: cli.jpeg_quality,
        },
    };

    let mut builder = EstimatorConfig::builder()
        .threshold(threshold)
        .blur_sigma(cli.blur_sigma)
        .point_count(cli.points)
        .render_size(cli.width, cli.height)
        .render_timeout_secs(cli.render_timeout)
        .artifact_format(format)
        .download_timeout_secs(cli.download_timeout);

    if let Some(seed) = cli.seed {
        builder = builder.seed(seed);
    }
    if let Some(ref path) = cli.point_cloud {
        let source = PointCloudFileSource::open(path)
            .with_context(|| format!("Failed to load point cloud {:?}", path))?;
        builder = builder.point_source(Arc::new(source));
    }
    if let Some(o) = observer {
        builder = builder.observer(o);
    }

    builder.build().context("Invalid configuration")
}

/// Ask on stdin until a positive number is entered.
fn prompt_container_volume() -> Result<f64> {
    let stdin = io::stdin();
    loop {
        eprint!("{} ", bold("Container volume:"));
        io::stderr().flush().ok();

        let mut line = String::new();
        let n = stdin
            .lock()
            .read_line(&mut line)
            .context("Failed to read container volume")?;
        if n == 0 {
            anyhow::bail!("No container volume given (stdin closed). Use --container-volume.");
        }
        match line.trim().parse::<f64>() {
            Ok(v) if validate_container_volume(v).is_ok() => return Ok(v),
            _ => eprintln!("{}", red("Enter a positive number, e.g. 12.5")),
        }
    }
}

fn print_record(input: &str, record: &CalculationRecord, container_volume: f64, quiet: bool) {
    println!(
        "{}  fill {:.2}%  →  {:.2} of {}  (3D volume {:.2})",
        input, record.fill_percentage, record.filled_volume, container_volume, record.volume_3d
    );
    if !quiet {
        if let Some(t) = record.processing_time {
            eprintln!("   {}", dim(&format!("{t:.2}s")));
        }
    }
}

/// One input: the record itself or an `ErrorResponse`. Several inputs: an
/// array of `{input, status, result | error}` entries.
fn print_json(results: &[(String, Result<CalculationRecord, FillError>)]) -> Result<()> {
    let value = if let [(_, single)] = results {
        match single {
            Ok(record) => serde_json::to_value(record)?,
            Err(e) => serde_json::to_value(ErrorResponse::from(e))?,
        }
    } else {
        serde_json::Value::Array(
            results
                .iter()
                .map(|(input, r)| match r {
                    Ok(record) => serde_json::json!({
                        "input": input,
                        "status": 200,
                        "result": record,
                    }),
                    Err(e) => serde_json::json!({
                        "input": input,
                        "status": e.status_code(),
                        "error": ErrorResponse::from(e).error,
                    }),
                })
                .collect(),
        )
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to serialise output")?
    );
    Ok(())
}

/// Decode the record's data URI and write it as `<stem>_3d.<ext>` in `dir`.
fn save_render(dir: &Path, input: &str, record: &CalculationRecord) -> Result<PathBuf> {
    let (mime, payload) =
        parse_data_uri(&record.image_3d).context("Record image is not a data URI")?;
    let bytes = STANDARD
        .decode(payload)
        .context("Record image is not valid base64")?;
    let ext = if mime == "image/jpeg" { "jpg" } else { "png" };

    let stem = input
        .rsplit(['/', '\\'])
        .next()
        .and_then(|name| Path::new(name).file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "render".to_string());

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(format!("{stem}_3d.{ext}"));
    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}
