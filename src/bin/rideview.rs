use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use rideview::{Pipeline, PipelineConfig, SpeedUnit};

/// Turn a folder of dashcam segments into one picture-in-picture video with a moving map and a
/// speed gauge.
#[derive(Parser, Debug)]
#[command(name = "rideview", version)]
struct Cli {
    /// Folder containing the camera's .ts segments and .jpg snapshots.
    input_folder: PathBuf,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Width of the map window in pixels.
    #[arg(long)]
    window_width: Option<u32>,

    /// Height of the map window in pixels.
    #[arg(long)]
    window_height: Option<u32>,

    /// JSON file with pipeline settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace camera speeds with speeds derived from consecutive positions.
    #[arg(long, value_enum)]
    recalc_speed: Option<SpeedUnit>,

    /// IANA timezone of the info panel clock (e.g. Europe/Rome).
    #[arg(long)]
    timezone: Option<String>,

    /// Skip the bottom-right info panel.
    #[arg(long)]
    no_info_overlay: bool,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(w) = self.window_width {
            cfg.viewport.width = w;
        }
        if let Some(h) = self.window_height {
            cfg.viewport.height = h;
        }
        if self.recalc_speed.is_some() {
            cfg.recalc_speed = self.recalc_speed;
        }
        if let Some(tz) = &self.timezone {
            cfg.timezone = tz.clone();
        }
        if self.no_info_overlay {
            cfg.info_overlay = false;
        }
        Ok(cfg)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();

    let cfg = cli.pipeline_config()?;
    let mut pipeline = Pipeline::new(cfg)?;
    pipeline
        .run(&cli.input_folder)
        .with_context(|| format!("processing '{}'", cli.input_folder.display()))?;
    Ok(())
}
