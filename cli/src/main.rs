use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use facefilter_core::{
    assets::FilterAssets,
    config::{Settings, DEFAULT_LISTEN_ADDR},
    detection::{FaceMeshDetector, LandmarkDetector, StaticDetector},
    pipeline::{filter_frame, FilterContext, FrameOutcome},
    runtime::configure_ort_dylib,
    transport::{FrameClient, FrameServer},
    video::{decode_jpeg, encode_jpeg},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "facefilter",
    version,
    about = "Landmark-driven AR face filters over a length-prefixed TCP stream",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that runs the filter pipeline.
#[derive(Args)]
struct FilterArgs {
    /// Eye overlay image (used for both eyes)
    #[arg(long)]
    eye: PathBuf,

    /// Mouth overlay image
    #[arg(long)]
    mouth: PathBuf,

    /// Optional TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Outline each landmark region on the output
    #[arg(long)]
    debug_regions: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve filtered frames over TCP until interrupted.
    Serve {
        #[command(flatten)]
        filter: FilterArgs,

        /// Face-mesh ONNX model path
        #[arg(long, default_value = "face_mesh.onnx")]
        model: PathBuf,

        /// Listen address (default from config, else 127.0.0.1:5005)
        #[arg(short, long)]
        listen: Option<String>,

        /// Exit after the first client disconnects
        #[arg(long)]
        once: bool,

        /// Socket read timeout in milliseconds
        #[arg(long)]
        read_timeout_ms: Option<u64>,

        /// Socket write timeout in milliseconds
        #[arg(long)]
        write_timeout_ms: Option<u64>,
    },

    /// Filter a single image offline.
    Apply {
        #[command(flatten)]
        filter: FilterArgs,

        /// Input JPEG
        #[arg(short, long)]
        input: PathBuf,

        /// Output JPEG
        #[arg(short, long, default_value = "filtered.jpg")]
        output: PathBuf,

        /// Face-mesh ONNX model path
        #[arg(long, conflicts_with = "landmarks")]
        model: Option<PathBuf>,

        /// JSON landmark file to use instead of a model
        #[arg(long)]
        landmarks: Option<PathBuf>,
    },

    /// Stream JPEG files through a running server and save the responses.
    Send {
        /// Server address
        #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
        server: String,

        /// Directory for the returned frames
        #[arg(short, long, default_value = "filtered")]
        output_dir: PathBuf,

        /// JPEG files to send, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            filter,
            model,
            listen,
            once,
            read_timeout_ms,
            write_timeout_ms,
        } => {
            let mut settings = load_settings(&filter)?;
            if let Some(addr) = listen {
                settings.server.listen_addr = addr;
            }
            settings.server.once |= once;
            if read_timeout_ms.is_some() {
                settings.server.read_timeout_ms = read_timeout_ms;
            }
            if write_timeout_ms.is_some() {
                settings.server.write_timeout_ms = write_timeout_ms;
            }
            cmd_serve(filter, model, settings)
        }
        Commands::Apply {
            filter,
            input,
            output,
            model,
            landmarks,
        } => {
            let settings = load_settings(&filter)?;
            cmd_apply(filter, settings, input, output, model, landmarks)
        }
        Commands::Send {
            server,
            output_dir,
            inputs,
        } => cmd_send(server, output_dir, inputs),
    }
}

// ── serve ─────────────────────────────────────────────────────────────────────

fn cmd_serve(filter: FilterArgs, model: PathBuf, settings: Settings) -> Result<()> {
    info!("Frame server");
    info!("  eye    : {}", filter.eye.display());
    info!("  mouth  : {}", filter.mouth.display());
    info!("  model  : {}", model.display());
    info!("  listen : {}", settings.server.listen_addr);

    let detector = load_mesh_detector(&model)?;
    let context = build_context(&filter, detector, settings.clone())?;

    let server = FrameServer::bind(&context, settings.server)
        .context("failed to start frame server")?;
    server.run().context("frame server stopped")?;
    Ok(())
}

// ── apply ─────────────────────────────────────────────────────────────────────

fn cmd_apply(
    filter: FilterArgs,
    settings: Settings,
    input: PathBuf,
    output: PathBuf,
    model: Option<PathBuf>,
    landmarks: Option<PathBuf>,
) -> Result<()> {
    info!("Offline filter");
    info!("  input  : {}", input.display());
    info!("  output : {}", output.display());

    let detector: Box<dyn LandmarkDetector> = match (model, landmarks) {
        (Some(model), None) => load_mesh_detector(&model)?,
        (None, Some(path)) => Box::new(
            StaticDetector::from_json_file(&path)
                .with_context(|| format!("failed to read landmarks: {}", path.display()))?,
        ),
        _ => bail!("exactly one of --model or --landmarks is required"),
    };
    let context = build_context(&filter, detector, settings.clone())?;

    let bytes = std::fs::read(&input)
        .with_context(|| format!("failed to read input: {}", input.display()))?;
    let frame = decode_jpeg(&bytes)
        .with_context(|| format!("failed to decode input: {}", input.display()))?;

    let frame = match filter_frame(&context, frame) {
        FrameOutcome::Filtered(frame) => frame,
        FrameOutcome::Fallback { frame, reason } => {
            warn!("writing unfiltered image: {reason}");
            frame
        }
    };

    let encoded = encode_jpeg(&frame, settings.server.jpeg_quality).context("encode failed")?;
    std::fs::write(&output, encoded)
        .with_context(|| format!("failed to write output: {}", output.display()))?;

    info!("Saved {}", output.display());
    Ok(())
}

// ── send ──────────────────────────────────────────────────────────────────────

fn cmd_send(server: String, output_dir: PathBuf, inputs: Vec<PathBuf>) -> Result<()> {
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut client = FrameClient::connect(server.as_str())
        .with_context(|| format!("failed to connect to {server}"))?;

    let pb = spinner("Sending frames…");
    for (i, path) in inputs.iter().enumerate() {
        pb.set_message(format!("{} ({}/{})", path.display(), i + 1, inputs.len()));

        let payload = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let response = client
            .exchange(&payload)
            .with_context(|| format!("exchange failed for {}", path.display()))?;

        let out = output_dir.join(output_name(path, i));
        std::fs::write(&out, &response)
            .with_context(|| format!("failed to write {}", out.display()))?;
        pb.tick();
    }

    pb.finish_with_message(format!("{} frames saved to {}", inputs.len(), output_dir.display()));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_settings(filter: &FilterArgs) -> Result<Settings> {
    let mut settings = match &filter.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => Settings::default(),
    };
    settings.filter.debug_regions |= filter.debug_regions;
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn load_mesh_detector(model: &Path) -> Result<Box<dyn LandmarkDetector>> {
    configure_ort_dylib();
    let detector = FaceMeshDetector::load(model)
        .with_context(|| format!("failed to load model: {}", model.display()))?;
    Ok(Box::new(detector))
}

fn build_context(
    filter: &FilterArgs,
    detector: Box<dyn LandmarkDetector>,
    settings: Settings,
) -> Result<FilterContext> {
    let assets = FilterAssets::load(&filter.eye, &filter.mouth)
        .context("failed to load filter assets")?;
    FilterContext::new(detector, assets, settings.filter).context("invalid filter settings")
}

fn output_name(input: &Path, index: usize) -> String {
    match input.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => format!("frame_{index:05}.jpg"),
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
