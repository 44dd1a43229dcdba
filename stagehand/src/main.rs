//! stagehand - synthetic communication evidence for forensic training devices
//!
//! Plans SMS, MMS and call-log records from a cast of characters, writes them
//! into an attached Android device over `adb`, and verifies the result.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Ledger: $XDG_DATA_HOME/stagehand/ledger.db (~/.local/share/stagehand/ledger.db)
//! - Logs: $XDG_STATE_HOME/stagehand/session-*.log (~/.local/state/stagehand/)
//! - Config: $XDG_CONFIG_HOME/stagehand/config.toml (~/.config/stagehand/config.toml)

mod commands;
mod render;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use stagehand_core::{Config, SessionContext};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Inject and verify synthetic communication records on Android devices")]
#[command(version)]
struct Cli {
    /// Target device serial (passed to adb -s)
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Path to the adb executable
    #[arg(long, global = true)]
    adb: Option<PathBuf>,

    /// Config file (defaults to the XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect the device, classify readiness and locate providers
    Doctor,

    /// Back up, apply automatic fixes and re-inspect
    Fix,

    /// Compile a timeline and export it for review without touching a device
    Plan {
        #[command(flatten)]
        input: TimelineInput,

        /// Output directory (defaults to the XDG exports directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compile a timeline and write it to the device
    Inject {
        #[command(flatten)]
        input: TimelineInput,

        /// Inject even when diagnostics report blocking issues
        #[arg(long)]
        force: bool,

        /// Skip the integrity checks after injecting
        #[arg(long)]
        no_verify: bool,
    },

    /// Run the integrity checks against the device
    Verify {
        /// Ledger run whose records to confirm (defaults to the latest)
        #[arg(long)]
        run: Option<i64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recorded inject runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Inputs shared by `plan` and `inject`
#[derive(Args)]
pub struct TimelineInput {
    /// Character directory (JSON)
    pub characters: PathBuf,

    /// VCF contact list used to fill in missing phone numbers
    #[arg(long)]
    pub contacts: Option<PathBuf>,

    /// Days of history to spread messages over
    #[arg(long)]
    pub days: Option<u32>,

    /// Seed for reproducible timelines and record content
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TimelineInput {
    fn apply(&self, config: &mut Config) {
        if let Some(days) = self.days {
            config.timeline.day_span = days;
        }
        if let Some(seed) = self.seed {
            config.timeline.seed = Some(seed);
            config.injection.seed = Some(seed);
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(serial) = &cli.serial {
        config.device.serial = Some(serial.clone());
    }
    if let Some(adb) = &cli.adb {
        config.device.adb_path = adb.clone();
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    match &cli.command {
        Command::Plan { input, .. } | Command::Inject { input, .. } => input.apply(&mut config),
        _ => {}
    }

    let session = SessionContext::from_config(config);

    let log_guard = stagehand_core::logging::init(
        &session.config.logging,
        session.id,
        session.started_at,
    )
    .context("failed to initialize logging")?;
    if cli.verbose > 0 {
        println!("Log: {}", log_guard.path().display());
    }

    tracing::info!(
        session = %session.id,
        serial = session.link.serial().unwrap_or("-"),
        "stagehand starting"
    );

    let ok = match &cli.command {
        Command::Doctor => commands::doctor(&session)?,
        Command::Fix => commands::fix(&session)?,
        Command::Plan { input, out } => commands::plan(&session, input, out.as_deref())?,
        Command::Inject {
            input,
            force,
            no_verify,
        } => commands::inject(&session, input, *force, !*no_verify)?,
        Command::Verify { run, json } => commands::verify(&session, *run, *json)?,
        Command::Runs { limit } => commands::runs(&session, *limit)?,
    };

    tracing::info!(ok, "stagehand finished");
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
