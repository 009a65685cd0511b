//! Main entry point for the camwall binary
//!
//! Loads the configuration, starts the wall with real worker processes and
//! runs until Ctrl+C or SIGTERM. SIGHUP reloads the configuration file.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camwall::{plan_layout, DisplayWall, StopOutcome};
use shared::{logging, AppConfig};

/// Multi-camera network video wall
#[derive(Parser)]
#[command(name = "camwall")]
#[command(about = "Shows and supervises a grid of live network camera streams")]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "CAMWALL_CONFIG", default_value = "config/camwall.json")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration, print the computed layout and exit
    #[arg(long)]
    pub check: bool,
}

const EXIT_FORCED: u8 = 1;
const EXIT_FATAL: u8 = 2;

enum Signal {
    Shutdown(&'static str),
    Reload,
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Signal::Shutdown("Received Ctrl+C signal"),
            _ = self.term.recv() => Signal::Shutdown("Received SIGTERM"),
            _ = self.hup.recv() => Signal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        Signal::Shutdown("Received Ctrl+C signal")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("camwall: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.display.log_level.clone());
    shared::logging::init_tracing(&log_level);

    if args.check {
        return check(&config);
    }

    match run(&args.config, config).await {
        Ok(StopOutcome::Clean) => {
            logging::log_success("Video wall stopped gracefully");
            ExitCode::SUCCESS
        }
        Ok(StopOutcome::Forced) => ExitCode::from(EXIT_FORCED),
        Err(e) => {
            logging::log_error("Video wall", &format!("{e:#}"));
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config_path: &Path, config: AppConfig) -> anyhow::Result<StopOutcome> {
    let mut signals = Signals::new().context("installing signal handlers")?;
    let mut wall = DisplayWall::start(config).await.context("starting the wall")?;

    loop {
        match signals.next().await {
            Signal::Shutdown(reason) => {
                logging::log_shutdown(reason);
                break;
            }
            Signal::Reload => reload(&mut wall, config_path).await,
        }
    }

    Ok(wall.shutdown().await)
}

/// A bad file leaves the running wall untouched
async fn reload(wall: &mut DisplayWall, config_path: &Path) {
    tracing::info!(path = %config_path.display(), "🔄 Reloading configuration");

    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::log_error("Configuration reload", &e);
            return;
        }
    };
    if let Err(e) = wall.reload(config).await {
        logging::log_error("Configuration reload", &e);
    }
}

fn check(config: &AppConfig) -> ExitCode {
    let plan = match plan_layout(config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("camwall: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let display = &config.display;
    println!(
        "Screen {}x{}, grid {}x{}, {:?} output",
        display.screen_width, display.screen_height, display.grid_cols, display.grid_rows, display.output_mode
    );
    for placement in &plan.table.placements {
        println!("  slot {:>2}  {:<20} {}", placement.slot, placement.source, placement.rect);
    }
    if let Some(rotation) = &plan.rotation {
        println!(
            "Rotating slots {:?} every {}s, waiting: {}",
            rotation.rotating_slots(),
            display.rotation_interval,
            rotation.waiting().join(", ")
        );
    }
    if let Some(overflow) = plan.overflow() {
        println!("{overflow}");
    }
    ExitCode::SUCCESS
}
