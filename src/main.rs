//! specscan interactive console.
//!
//! Reads operator commands from stdin, dispatches them onto the motion and
//! scan engines and prints the results. Command-level errors are printed and
//! recovered; only startup and shutdown failures (unreadable settings,
//! unwritable registry) are fatal.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use specscan::acquisition::AcquisitionTrigger;
use specscan::commands::{Command, Interpreter, Response};
use specscan::config::Settings;
use specscan::hardware::{Detector, MockController, MockDetector};
use specscan::motion::MotionCoordinator;
use specscan::recorder::JsonlRecorder;
use specscan::registry::AxisRegistry;
use specscan::scan::ScanEngine;
use specscan::session::ScanSession;

#[derive(Parser)]
#[command(name = "specscan", about = "Scanning X-ray spectrometer console")]
struct Cli {
    /// Settings file.
    #[arg(short, long, default_value = "config/specscan.toml")]
    config: PathBuf,

    /// Session to open instead of the configured one.
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("cannot load settings from {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.application.log_level.clone())),
        )
        .init();
    info!(name = %settings.application.name, "starting");

    let controller = Arc::new(MockController::with_speed(settings.simulation.stage_speed));
    let registry = Arc::new(
        AxisRegistry::initialize(
            settings.paths.registry_file.clone(),
            controller,
            settings.crystal(),
        )
        .await
        .context("cannot initialize the axis registry")?,
    );

    let detectors: Vec<Arc<dyn Detector>> = (0..settings.simulation.detectors)
        .map(|i| {
            Arc::new(MockDetector::new(
                format!("det{i:02}"),
                settings.simulation.detector_channels,
            )) as Arc<dyn Detector>
        })
        .collect();
    let trigger = AcquisitionTrigger::new(detectors);

    let session_name = cli.session.as_deref().unwrap_or(&settings.session.name);
    let session = ScanSession::open(settings.paths.data_dir.clone(), session_name)
        .context("cannot open the scan session")?;
    println!(
        "Current session: {}.\n\tNext data will be stored in {}",
        session.session_name(),
        session.scan_dir().display()
    );

    let recorder = Box::new(JsonlRecorder::new(session.save_dir()));
    let engine = ScanEngine::new(MotionCoordinator::new(registry.clone()), trigger, session);
    let mut interpreter = Interpreter::new(engine, recorder, Box::new(confirm));

    loop {
        print!("specscan> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match interpreter.execute(command).await {
            Ok(Response::Quit) => break,
            Ok(Response::Output(text)) => {
                if !text.is_empty() {
                    println!("{text}");
                }
            }
            // recovered at the command boundary; the console keeps running
            Err(err) => println!("{err}"),
        }
    }

    println!("Shutting down specscan...");
    registry
        .save_state()
        .await
        .context("cannot save the axis registry on shutdown")?;
    info!("registry saved, goodbye");
    Ok(())
}

/// Ask the operator to confirm a risky action. Empty input means no.
fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
