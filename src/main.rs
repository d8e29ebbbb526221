#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use spotlight_tour::config::RuntimeConfig;
use spotlight_tour::constants::player::FRAME_INTERVAL_MS;
use spotlight_tour::headless::PageDescription;
use spotlight_tour::persistence::{JsonFileStore, TourPreferences};
use spotlight_tour::player::{Player, PlayerOutput, Script};
use spotlight_tour::tour::TourCatalogue;

/// Guided tour runtime driven by a headless page
#[derive(Parser, Debug)]
#[command(name = "spotlight-tour")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/spotlight-tour/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Preferences file (default: <data dir>/spotlight-tour/preferences.json)
    #[arg(short, long, global = true)]
    preferences: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a scripted session and print events and overlay frames as JSON lines
    Play {
        /// Tour catalogue (JSON array of tours)
        #[arg(long)]
        tours: PathBuf,

        /// Headless page description
        #[arg(long)]
        page: PathBuf,

        /// Timestamped actions to apply
        #[arg(long)]
        script: PathBuf,

        /// Pace frames on the wall clock instead of running as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Keep preferences in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Check a tour catalogue for invalid definitions
    Validate {
        tours: PathBuf,
    },

    /// Inspect or reset stored tour preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsCommands {
    /// Print the stored flags
    Show,
    /// Forget completed tours and every other flag
    Reset,
}

#[derive(Serialize)]
struct PrefsReport {
    path: PathBuf,
    seen_intro: bool,
    skip_animations: bool,
    completed_tours: Vec<String>,
    preferences: std::collections::BTreeMap<String, serde_json::Value>,
}

fn init_logging(config: &RuntimeConfig) -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| config.log_level.clone())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // Logs go to stderr so stdout stays machine-readable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load_from(path),
        None => RuntimeConfig::load(),
    }
}

fn open_preferences(path: Option<&Path>) -> Result<(PathBuf, TourPreferences)> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(JsonFileStore::default_path);
    let store = JsonFileStore::open(&path)?;
    Ok((path, TourPreferences::new(Rc::new(store))))
}

fn emit_lines(lines: &[PlayerOutput]) -> Result<()> {
    let mut out = io::stdout().lock();
    for line in lines {
        let json = serde_json::to_string(line).context("Failed to serialize output line")?;
        writeln!(out, "{}", json)?;
    }
    out.flush()?;
    Ok(())
}

fn play_simulated(player: &mut Player) -> Result<()> {
    while !player.is_finished() {
        emit_lines(&player.advance())?;
    }
    Ok(())
}

fn play_realtime(player: &mut Player) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(async {
        let mut interval = tokio::time::interval(Duration::from_millis(FRAME_INTERVAL_MS));
        while !player.is_finished() {
            interval.tick().await;
            emit_lines(&player.advance())?;
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config)?;

    match cli.command {
        Commands::Play {
            tours,
            page,
            script,
            realtime,
            ephemeral,
        } => {
            let catalogue = TourCatalogue::load(&tours)?;
            let page = PageDescription::load(&page)?;
            let script = Script::load(&script)?;
            let preferences = if ephemeral {
                TourPreferences::in_memory()
            } else {
                open_preferences(cli.preferences.as_deref())?.1
            };
            info!(
                tours = catalogue.len(),
                actions = script.steps.len(),
                realtime = realtime,
                "Playing script"
            );

            let mut player = Player::new(catalogue, page, script, preferences, config);
            if realtime {
                play_realtime(&mut player)?;
            } else {
                play_simulated(&mut player)?;
            }
        }
        Commands::Validate { tours } => {
            let catalogue = TourCatalogue::load(&tours)?;
            for id in catalogue.ids() {
                let steps = catalogue.get(id).map_or(0, |tour| tour.len());
                println!("{}: {} steps", id, steps);
            }
            info!(tours = catalogue.len(), "Catalogue is valid");
        }
        Commands::Prefs { command } => {
            let (path, preferences) = open_preferences(cli.preferences.as_deref())?;
            match command {
                PrefsCommands::Show => {
                    let report = PrefsReport {
                        path,
                        seen_intro: preferences.has_seen_intro(),
                        skip_animations: preferences.skip_animations(),
                        completed_tours: preferences.completed_tours(),
                        preferences: preferences.preferences(),
                    };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                PrefsCommands::Reset => {
                    preferences
                        .reset()
                        .with_context(|| format!("Failed to reset preferences at {:?}", path))?;
                    warn!(path = %path.display(), "Tour preferences reset");
                }
            }
        }
    }

    Ok(())
}
