use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use roadsight_perception::config::{EngineKind, PerceptionConfig};
use roadsight_perception::engine::InferenceEngine;
use roadsight_perception::sensing::SensingEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "RoadSight real-time perception node", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Scheduler variant override
    #[arg(short, long, value_enum)]
    engine: Option<EngineKind>,

    /// Frame count override
    #[arg(short, long)]
    frames: Option<usize>,

    /// Log level override
    #[arg(short, long)]
    log_level: Option<String>,

    /// Dataset root override
    #[arg(short, long)]
    dataset: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        PerceptionConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if let Some(frames) = args.frames {
        config.frame_count = frames;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(dataset) = args.dataset {
        config.dataset_path = dataset;
    }

    init_logging(&config)?;
    info!(
        engine = ?config.engine,
        frames = config.frame_count,
        period_ms = config.sensing_period_ms,
        "starting roadsight perception node"
    );

    // Parallel perception sensing, synchronized once per period.
    let mut sensing = SensingEngine::new(&config);
    sensing.start();

    let mut engine =
        InferenceEngine::from_config(&config, sensing).context("initializing inference engine")?;
    engine.run().context("running inference engine")?;

    info!("finished inference engine");
    Ok(())
}

fn init_logging(config: &PerceptionConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.tracing_level().to_string()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;
    Ok(())
}
