//! PowerBag Kiosk
//!
//! Usage:
//!   pb-kiosk run --catalog stories.json    - Play spins on simulated reels
//!   pb-kiosk devices                       - List serial devices
//!   pb-kiosk signal win                    - Send one signal to the cabinet

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;

use pb_link::{ArduinoAdapter, ArduinoSignal, LinkManager, SignalDispatcher};
use pb_slot::{
    ContentSource, MachineEvent, OutcomeEngine, ReelController, SimulatedReel, SlotMachine,
    SpinOrchestrator, StoryCatalog, StoryLine,
};

use crate::config::KioskConfig;

#[derive(Parser)]
#[command(name = "pb-kiosk", about = "PowerBag slot kiosk")]
struct Cli {
    /// Kiosk configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play spins against a story catalog
    Run {
        /// Storyline catalog (JSON array)
        #[arg(long)]
        catalog: PathBuf,
        /// Number of plays before exiting
        #[arg(short = 'n', long, default_value_t = 3)]
        spins: u32,
        /// Play the story automatically after a win
        #[arg(long)]
        kiosk: bool,
        /// Seed outcome and catalog order
        #[arg(long)]
        seed: Option<u64>,
        /// Log signals instead of writing to the serial device
        #[arg(long)]
        no_hardware: bool,
    },
    /// List attached serial devices
    Devices,
    /// Send one signal to the cabinet
    Signal {
        #[arg(value_enum)]
        signal: SignalArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SignalArg {
    Idle,
    Off,
    Win,
}

impl From<SignalArg> for ArduinoSignal {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::Idle => ArduinoSignal::Idle,
            SignalArg::Off => ArduinoSignal::Off,
            SignalArg::Win => ArduinoSignal::Win,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => KioskConfig::load(path)?,
        None => KioskConfig::default(),
    };

    match cli.command {
        Commands::Run {
            catalog,
            spins,
            kiosk,
            seed,
            no_hardware,
        } => run(config, &catalog, spins, kiosk, seed, no_hardware).await,
        Commands::Devices => list_devices(config).await,
        Commands::Signal { signal } => send_signal(config, signal.into()).await,
    }
}

async fn run(
    mut config: KioskConfig,
    catalog_path: &Path,
    spins: u32,
    kiosk: bool,
    seed: Option<u64>,
    no_hardware: bool,
) -> Result<()> {
    config.slot.kiosk |= kiosk;

    let link = Arc::new(LinkManager::native(config.link.clone()));

    let (signals, worker) = if no_hardware {
        let (dispatcher, mut rx) = SignalDispatcher::channel();
        let worker = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                log::info!("[Kiosk] Signal '{}'", signal.code() as char);
            }
        });
        (dispatcher, worker)
    } else {
        let adapter = Arc::new(ArduinoAdapter::new(link.clone()));
        SignalDispatcher::spawn(adapter)
    };

    let catalog = load_catalog(catalog_path, seed)?;
    let reels = spawn_reels(&catalog, &config);
    let engine = seed.map(OutcomeEngine::seeded).unwrap_or_default();

    let orchestrator =
        SpinOrchestrator::new(reels, Box::new(catalog), signals, engine, config.slot.clone())
            .context("starting orchestrator")?;
    let machine = SlotMachine::new(orchestrator);
    tokio::spawn(log_machine_events(machine.subscribe()));

    machine.announce_idle().await;

    for _ in 0..spins {
        tokio::select! {
            result = machine.request_play(false) => {
                if let Some(report) = result? {
                    log::info!(
                        "[Kiosk] Spin #{} {} at {:?}",
                        report.spin_id,
                        if report.is_win { "won" } else { "lost" },
                        report.stop_indices
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("[Kiosk] Interrupted");
                break;
            }
        }
    }

    if config.slot.kiosk {
        // Let a pending story playback fire before shutting down
        tokio::time::sleep(config.slot.timing.play_after_win() + Duration::from_millis(100)).await;
    }

    // Releasing the last dispatcher lets the worker flush queued signals and exit
    drop(machine);
    if let Err(e) = worker.await {
        log::warn!("[Kiosk] Signal worker failed: {}", e);
    }

    link.shutdown().await;
    Ok(())
}

fn load_catalog(path: &Path, seed: Option<u64>) -> Result<StoryCatalog> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let storylines: Vec<StoryLine> = serde_json::from_str(&json)
        .with_context(|| format!("parsing catalog {}", path.display()))?;

    let catalog = match seed {
        Some(seed) => StoryCatalog::seeded(storylines, seed)?,
        None => StoryCatalog::new(storylines)?,
    };
    log::info!("[Kiosk] Loaded {} storylines", catalog.storyline_count());
    Ok(catalog)
}

/// One simulated reel per bag column of the current layout
fn spawn_reels(catalog: &StoryCatalog, config: &KioskConfig) -> Vec<ReelController> {
    (0..catalog.current_unit().layout.reel_count())
        .map(|index| {
            let (surface, samples) = SimulatedReel::spawn(config.simulation.clone());
            ReelController::new(index, surface, samples, config.slot.reel.clone())
        })
        .collect()
}

async fn list_devices(config: KioskConfig) -> Result<()> {
    let link = LinkManager::native(config.link);
    let devices = link.list_devices().await;

    if devices.is_empty() {
        println!("No serial devices found");
        return Ok(());
    }
    for device in &devices {
        println!(
            "{} {:<24} vid={:<4} pid={:<4} {}",
            if device.is_recognized_controller { "*" } else { " " },
            device.path,
            device.vendor_id,
            device.product_id,
            device.friendly
        );
    }
    Ok(())
}

async fn send_signal(config: KioskConfig, signal: ArduinoSignal) -> Result<()> {
    let link = Arc::new(LinkManager::native(config.link));
    let adapter = ArduinoAdapter::new(link.clone());

    let sent = adapter.send_event(signal).await;
    link.shutdown().await;

    anyhow::ensure!(sent, "signal {:?} was not delivered", signal);
    println!("Sent '{}'", signal.code() as char);
    Ok(())
}

async fn log_machine_events(mut rx: broadcast::Receiver<MachineEvent>) {
    loop {
        match rx.recv().await {
            Ok(MachineEvent::Telemetry(event)) => match serde_json::to_string(&event) {
                Ok(json) => log::info!("[Telemetry] {}", json),
                Err(e) => log::warn!("[Telemetry] Could not encode event: {}", e),
            },
            Ok(event) => log::debug!("[Kiosk] {:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::debug!("[Kiosk] Machine event log lagged by {}", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reels_follow_catalog_layout() {
        let json = r#"[{
            "title": "Harbour",
            "bags": {
                "firstColumn": [{"id": "anchor"}, {"id": "buoy"}],
                "secondColumn": [{"id": "rope"}],
                "thirdColumn": [{"id": "gull"}, {"id": "net"}, {"id": "oar"}]
            },
            "stories": [{"id": "s1", "selectedBags": ["buoy", "rope", "oar"]}]
        }]"#;
        let catalog = StoryCatalog::from_json(json).unwrap();
        let config = KioskConfig::default();

        let reels = spawn_reels(&catalog, &config);
        assert_eq!(reels.len(), 3);

        let (signals, _rx) = SignalDispatcher::channel();
        let orchestrator = SpinOrchestrator::new(
            reels,
            Box::new(catalog),
            signals,
            OutcomeEngine::seeded(1),
            config.slot.clone(),
        )
        .unwrap();
        assert_eq!(orchestrator.reel_count(), 3);
    }
}
