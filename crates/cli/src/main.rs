// fsexport - fuel and propane sales export runner
// Exit codes: see exit_codes.rs

mod commands;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{EXIT_CONFIG, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};
use fuelsale_config::Settings;
use fuelsale_pipeline::RequestInput;

#[derive(Parser)]
#[command(name = "fsexport")]
#[command(about = "Roll up fuel and propane sales and publish them to the export store")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (takes precedence over $FSEXPORT_CONFIG and the default lookup)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Export type: fuel or propane
    #[arg(long = "type", value_name = "TYPE")]
    export_type: String,

    /// First day, YYYY-MM-DD (inclusive, not in the future)
    #[arg(long)]
    start: String,

    /// Last day, YYYY-MM-DD (inclusive, not in the future)
    #[arg(long)]
    end: String,

    /// Print JSON to stdout
    #[arg(long)]
    json: bool,
}

impl RangeArgs {
    fn input(&self) -> RequestInput {
        RequestInput {
            export_type: self.export_type.clone(),
            start_date: self.start.clone(),
            end_date: self.end.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate sales for a date range and write them to the export store
    #[command(after_help = "\
Examples:
  fsexport run --type fuel --start 2023-06-01 --end 2023-06-30
  fsexport run --type propane --start 2023-06-18 --end 2023-06-18 --json
  FSEXPORT_STAGE=prod fsexport run --type fuel --start 2023-06-15 --end 2023-06-15

Exit codes: 0 complete, 6 partial, 7 failed (see the import log detail)")]
    Run(RangeArgs),

    /// Show rows already in the export store for a date range
    #[command(after_help = "\
Examples:
  fsexport list --type fuel --start 2023-06-01 --end 2023-06-30
  fsexport list --type propane --start 2023-06-01 --end 2023-06-30 --json")]
    List(RangeArgs),

    /// Inspect, resume or purge runs that left staging rows behind
    #[command(subcommand)]
    Staging(StagingCommands),

    /// Inspect settings
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Print the reporting year-week for a YYYYMMDD date
    #[command(after_help = "\
Examples:
  fsexport year-week 20230615   # 202324
  fsexport year-week 20230101   # 202253 (Sunday, ISO week of the previous year)")]
    YearWeek {
        /// Date as YYYYMMDD
        date: String,
    },
}

#[derive(Subcommand)]
enum StagingCommands {
    /// List runs that still hold staging rows
    List {
        /// Print JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Consolidate a run's staging rows again and reconcile them
    #[command(after_help = "\
Examples:
  fsexport staging list
  fsexport staging resume --run 3f0c2a9e-5b7d-4c1e-9a62-8d4f1e7b2c10 --json

Exit codes: 0 complete, 4 unknown run, 6 partial, 7 failed")]
    Resume {
        /// Run id, as printed by `fsexport run` or `staging list`
        #[arg(long = "run", value_name = "RUN_ID")]
        run_id: String,

        /// Print JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Delete a run's staging rows without exporting them
    Purge {
        /// Run id, as printed by `fsexport run` or `staging list`
        #[arg(long = "run", value_name = "RUN_ID")]
        run_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate settings, report which file was used
    Validate,
    /// Print the effective settings (file + environment overrides) as TOML
    Show,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  fuelsale-pipeline ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

/// Log to stderr. `FSEXPORT_LOG` wins over `RUST_LOG`; default `info`.
fn init_logging() {
    let filter = std::env::var("FSEXPORT_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_settings(explicit: Option<&PathBuf>) -> Result<(Settings, Option<PathBuf>), CliError> {
    Settings::load(explicit.map(PathBuf::as_path)).map_err(|e| CliError {
        code: EXIT_CONFIG,
        message: e.to_string(),
        hint: Some("check the settings file and FSEXPORT_* variables; `fsexport config show` prints what was loaded".into()),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match &cli.command {
        Commands::Run(args) => load_settings(cli.config.as_ref())
            .and_then(|(settings, _)| commands::cmd_run(&settings, &args.input(), args.json)),
        Commands::List(args) => load_settings(cli.config.as_ref())
            .and_then(|(settings, _)| commands::cmd_list(&settings, &args.input(), args.json)),
        Commands::Staging(StagingCommands::List { json }) => load_settings(cli.config.as_ref())
            .and_then(|(settings, _)| commands::cmd_staging_list(&settings, *json)),
        Commands::Staging(StagingCommands::Resume { run_id, json }) => load_settings(cli.config.as_ref())
            .and_then(|(settings, _)| commands::cmd_staging_resume(&settings, run_id, *json)),
        Commands::Staging(StagingCommands::Purge { run_id }) => load_settings(cli.config.as_ref())
            .and_then(|(settings, _)| commands::cmd_staging_purge(&settings, run_id)),
        Commands::Config(ConfigCommands::Validate) => load_settings(cli.config.as_ref())
            .and_then(|(settings, source)| commands::cmd_config_validate(&settings, source.as_deref())),
        Commands::Config(ConfigCommands::Show) => load_settings(cli.config.as_ref())
            .and_then(|(settings, source)| commands::cmd_config_show(&settings, source.as_deref())),
        Commands::YearWeek { date } => commands::cmd_year_week(date),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
