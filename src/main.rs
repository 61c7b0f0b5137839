//! Pi-cam-classify binary: live classification with a terminal view.
//!
//! Keys (followed by Enter): `t` taps the capture button, `s` taps save,
//! `q` quits.

use clap::Parser;
use pi_cam_classify::onnx::OnnxLoader;
use pi_cam_classify::permission::DeviceNodePermission;
use pi_cam_classify::{
    AppConfig, InferenceController, MainDispatcher, PresentationShell, TerminalView, UiEvent,
    V4L2Provider,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Classify live camera frames and show when the target is recognized.
#[derive(Debug, Parser)]
#[command(name = "pi-cam-classify", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// V4L2 device index (default: first capture-capable node).
    #[arg(short, long)]
    device: Option<u32>,
    /// Directory containing the model and labels files.
    #[arg(short, long)]
    resources: Option<PathBuf>,
    /// Model base name.
    #[arg(short, long)]
    model: Option<String>,
    /// Confidence threshold in [0, 1].
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig, pi_cam_classify::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(device) = cli.device {
        config.camera.device = Some(device);
    }
    if let Some(resources) = &cli.resources {
        config.model.resources_dir.clone_from(resources);
    }
    if let Some(model) = &cli.model {
        config.model.name.clone_from(model);
    }
    if let Some(threshold) = cli.threshold {
        config.model.threshold = threshold;
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    info!(
        model = %config.model.name,
        resources = %config.model.resources_dir.display(),
        threshold = config.model.threshold,
        "starting"
    );

    let provider = V4L2Provider::new(config.camera.device);
    let permission = DeviceNodePermission::new(provider.permission_node());
    let loader = OnnxLoader::new(&config.model);
    let (dispatcher, queue) = MainDispatcher::channel();

    let controller = InferenceController::new(
        &config,
        provider,
        Box::new(permission),
        Box::new(loader),
        dispatcher.clone(),
    );
    let mut shell = PresentationShell::new(
        controller,
        config.model.gate(),
        &config.model.no_match_label,
        queue,
    );
    shell.subscribe(Box::new(TerminalView::new(io::stdout())));

    spawn_keyboard(dispatcher.clone())?;
    dispatcher.post(UiEvent::Appeared);
    shell.run();
    Ok(())
}

fn spawn_keyboard(dispatcher: MainDispatcher) -> io::Result<()> {
    thread::Builder::new()
        .name("keyboard".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                for key in line.trim().chars() {
                    let event = match key {
                        't' => UiEvent::CaptureTapped,
                        's' => UiEvent::SaveTapped,
                        'q' => {
                            dispatcher.post(UiEvent::Shutdown);
                            return;
                        }
                        other => {
                            debug!(key = %other, "ignoring key");
                            continue;
                        }
                    };
                    dispatcher.post(event);
                }
            }
            dispatcher.post(UiEvent::Shutdown);
        })?;
    Ok(())
}
