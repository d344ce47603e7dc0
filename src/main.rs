use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::Parser;

use landmark_relay::{
    app,
    config::Config,
    pipeline::{BatchPolicy, StopReason},
};

/// Streams webcam landmarks to a UDP consumer as JSON datagrams
#[derive(Parser, Debug)]
#[command(name = "landmark-relay", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Destination port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Camera index (overrides config)
    #[arg(long)]
    camera: Option<u32>,

    /// Packet batching policy (overrides config)
    #[arg(long, value_parser = parse_policy)]
    policy: Option<BatchPolicy>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Receive and log packets on this address instead of streaming
    #[arg(long, value_name = "ADDR")]
    monitor: Option<SocketAddr>,
}

fn parse_policy(value: &str) -> Result<BatchPolicy, String> {
    match value {
        "aggregate" => Ok(BatchPolicy::Aggregate),
        "per-entity" => Ok(BatchPolicy::PerEntity),
        other => Err(format!(
            "unknown policy `{other}`, expected `aggregate` or `per-entity`"
        )),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    log::info!("starting {} v{}", landmark_relay::NAME, landmark_relay::VERSION);

    if args.list_cameras {
        app::list_cameras()?;
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(addr) = args.monitor {
        app::monitor(addr)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.transport.host = host;
    }
    if let Some(port) = args.port {
        config.transport.port = port;
    }
    if let Some(camera) = args.camera {
        config.camera.index = camera;
    }
    if let Some(policy) = args.policy {
        config.encoder.policy = policy;
    }
    if args.max_frames.is_some() {
        config.pipeline.max_frames = args.max_frames;
    }
    config.validate()?;

    let report = app::run(&config)?;
    match report.stop_reason {
        StopReason::CaptureFailed(err) => {
            log::error!("stopped after capture failure: {err}");
            Ok(ExitCode::FAILURE)
        }
        StopReason::QuitRequested | StopReason::FrameLimit => Ok(ExitCode::SUCCESS),
    }
}
