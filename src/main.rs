mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Env, Target};
use fd_lock::RwLock;
use hidecursor::config::{self, Config};
use hidecursor::sim::{parse_script, run_script};
use hidecursor::utils::format_micros;
use hidecursor::watcher::ActivityPolicy;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hidecursor")]
#[command(about = "Hide the mouse pointer after a period of inactivity", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct Overrides {
    /// Seconds between idle checks
    #[arg(short, long)]
    poll: Option<u64>,
    /// Idle time before hiding (e.g. 2s, 1500ms)
    #[arg(short, long)]
    idle: Option<String>,
    /// How activity signals are treated
    #[arg(long, value_enum)]
    policy: Option<ActivityPolicy>,
}

impl Overrides {
    fn apply(self, mut config: Config) -> Result<Config> {
        if let Some(poll) = self.poll {
            config.poll_interval_secs = poll;
        }
        if let Some(idle) = self.idle {
            let idle = humantime::parse_duration(&idle)
                .with_context(|| format!("Invalid idle duration '{}'", idle))?;
            config.set_idle_threshold(idle)?;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the pointer inside this terminal
    Start {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Replay a scripted timeline on a virtual clock
    Simulate {
        /// Script of '<offset> <action>' lines
        script: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective configuration
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn init_logging(target: Target) {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(target)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::load_config()?;

    match cli.command {
        Commands::Start { overrides } => {
            let base_dir = config::get_base_dir()?;
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(base_dir.join("hidecursor.log"))?;
            init_logging(Target::Pipe(Box::new(log_file)));

            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(base_dir.join("hidecursor.lock"))?;

            let mut lock = RwLock::new(lock_file);
            let _guard = lock.try_write().map_err(|_| {
                anyhow::anyhow!("Another instance of hidecursor is already running. Please close it before starting a new one.")
            })?;

            let config = overrides.apply(file_config)?;
            tui::run_tui(config)?;
        }
        Commands::Simulate { script, overrides } => {
            init_logging(Target::Stderr);
            let config = overrides.apply(file_config)?;

            let text = fs::read_to_string(&script)
                .with_context(|| format!("Could not read {}", script.display()))?;
            let steps = parse_script(&text)?;

            println!(
                "Simulating {} step(s): hide after {}, poll every {}s, {} policy",
                steps.len(),
                format_micros(config.idle_threshold_micros),
                config.poll_interval_secs,
                config.policy
            );
            println!("=============");
            for record in run_script(&steps, config) {
                println!("[{:>10}] {}", format_micros(record.at_micros), record.text);
            }
        }
        Commands::Config { overrides } => {
            init_logging(Target::Stderr);
            let config = overrides.apply(file_config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
