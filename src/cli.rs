use crate::{
    default_output_path, format_bytes, format_duration, install_prometheus_recorder,
    validate_url, CaptureCoordinator, Config, SnapshotError,
};
use anyhow::Context;
use clap::Parser;
use image::{DynamicImage, ImageFormat, RgbaImage};
use metrics_exporter_prometheus::PrometheusHandle;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "page-snapshot")]
#[command(about = "Capture one web page as a PNG within a fixed time bound")]
#[command(version)]
pub struct Cli {
    #[arg(short, long, help = "URL to capture")]
    pub url: String,

    #[arg(long, help = "Surface width in pixels (default: display or page width)")]
    pub width: Option<u32>,

    #[arg(long, help = "Surface height in pixels (default: display or page height)")]
    pub height: Option<u32>,

    #[arg(long, help = "Wall-clock capture timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(short, long, help = "Output file path (default: <host>.png)")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Print Prometheus metrics after the capture")]
    pub metrics: bool,
}

pub struct CliRunner {
    pub config: Config,
    pub coordinator: Arc<CaptureCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl CliRunner {
    pub fn new(config: Config, args: &Cli) -> anyhow::Result<Self> {
        // Counters bind to the recorder present when the coordinator is built
        let metrics = if args.metrics {
            Some(
                install_prometheus_recorder()
                    .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {e}"))?,
            )
        } else {
            None
        };

        let coordinator = Arc::new(CaptureCoordinator::with_chrome(config.clone()));

        Ok(Self {
            config,
            coordinator,
            metrics,
        })
    }

    /// Capture `args.url` and write it as PNG. `Ok(false)` means no image was produced.
    pub async fn run(&self, args: &Cli) -> anyhow::Result<bool> {
        let url = validate_url(&args.url)?;
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&url));

        let request = self.coordinator.request(
            url.as_str(),
            args.width,
            args.height,
            args.timeout_ms.map(Duration::from_millis),
        );
        info!("Capturing {} (request {})", request.url, request.id);

        let started = Instant::now();
        let image = Arc::clone(&self.coordinator).capture_async(request).await;
        let elapsed = started.elapsed();

        let written = match image {
            Some(image) => {
                let (width, height) = image.dimensions();
                let png = encode_png(image)?;

                if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&output, &png)
                    .await
                    .with_context(|| format!("writing {}", output.display()))?;

                println!("Snapshot captured:");
                println!("  URL: {url}");
                println!("  Output: {}", output.display());
                println!("  Size: {width}x{height} ({})", format_bytes(png.len()));
                println!("  Duration: {}", format_duration(elapsed));
                true
            }
            None => {
                warn!(
                    "No image for {} after {}",
                    url,
                    format_duration(elapsed)
                );
                false
            }
        };

        if let Some(handle) = &self.metrics {
            println!("{}", handle.render());
        }

        Ok(written)
    }
}

pub async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        Config::default()
    };

    if let Some(timeout_ms) = args.timeout_ms {
        config.capture_timeout = Duration::from_millis(timeout_ms);
    }

    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Capture timeout: {}", format_duration(config.capture_timeout));
    info!("Load ceiling: {}", format_duration(config.load_ceiling));

    Ok(config)
}

pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>, SnapshotError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
