use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventcam::capture::{self, CameraBackend, CaptureEngine, CaptureSettings, SyntheticBackend};
use eventcam::recorder::{RecorderCoordinator, RecorderEvent};
use eventcam::trigger::{TriggerManager, TriggerType};
use eventcam::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Event-triggered camera recorder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture continuously and save a clip around every trigger
    Run(RunArgs),

    /// List cameras
    Cameras {
        /// List the synthetic test camera instead of real devices
        #[arg(long)]
        synthetic: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device index
    #[arg(short, long)]
    device: Option<u32>,

    /// Trigger type (keyboard, gpio, http, websocket, manual)
    #[arg(short, long)]
    trigger: Option<TriggerType>,

    /// Seconds kept before the trigger
    #[arg(short, long)]
    before: Option<u32>,

    /// Seconds recorded after the trigger
    #[arg(short, long)]
    after: Option<u32>,

    /// Output directory for clips
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use the synthetic test-pattern camera
    #[arg(long)]
    synthetic: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {:?}", path)),
        None => Ok(Config::default()),
    }
}

fn backend(synthetic: bool) -> Arc<dyn CameraBackend> {
    if synthetic {
        Arc::new(SyntheticBackend::new())
    } else {
        capture::default_backend()
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(output) = args.output {
        config.recording.output_dir = output;
    }
    if let Some(kind) = args.trigger {
        config.trigger.default_type = kind;
        if !config.trigger.available_types.contains(&kind) {
            config.trigger.available_types.push(kind);
        }
    }
    let device = args.device.unwrap_or(config.camera.default_device);

    let engine = Arc::new(CaptureEngine::new(
        backend(args.synthetic),
        CaptureSettings::from_config(&config),
    ));
    let triggers = Arc::new(TriggerManager::new(config.trigger.clone()));
    let recorder = RecorderCoordinator::new(engine.clone(), triggers.clone(), &config);

    let before = args.before.unwrap_or(config.recording.default_before_time);
    let after = args.after.unwrap_or(config.recording.default_after_time);
    recorder.set_window(before, after)?;

    let mut events = recorder.subscribe();
    let format = recorder.start(device)?;
    tracing::info!(
        "Recording {}x{} @ {}fps from device {} ({}), trigger: {}, window {}s/{}s. Ctrl-C to quit.",
        format.width,
        format.height,
        format.fps,
        device,
        engine.backend_name(),
        triggers.trigger_type(),
        before,
        after
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(RecorderEvent::SaveCompleted(report)) => {
                    println!("{}", serde_json::to_string(&report)?);
                }
                Ok(RecorderEvent::SaveFailed { path, error }) => {
                    eprintln!("Save failed for {:?}: [{}] {}", path, error.code, error.message);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} recorder events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down");
    tokio::task::spawn_blocking(move || recorder.stop()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    eventcam::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Cameras { synthetic } => {
            let cameras = backend(synthetic).list_cameras();
            if cameras.is_empty() {
                println!("No cameras found");
            }
            for camera in cameras {
                let resolutions: Vec<String> = camera
                    .supported_resolutions
                    .iter()
                    .map(|r| format!("{}x{}", r.width, r.height))
                    .collect();
                println!("{}: {} [{}]", camera.id, camera.name, resolutions.join(", "));
            }
            Ok(())
        }
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
