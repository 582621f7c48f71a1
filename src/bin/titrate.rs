//! Titrate CLI - command-line interface for the titration engine
//!
//! Commands operate on a JSON store snapshot:
//! - bedtime: derive a bedtime from a wake time and time in bed
//! - metrics: compute sleep metrics for one diary entry
//! - log / set-wake: record nights and the target wake time
//! - baseline / weekly: create prescribed windows
//! - adherence / show: report on a user
//! - doctor: diagnose store and configuration

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use chrono::NaiveDate;
use synheart_titration::{
    calculate_bedtime, compute_sleep_metrics, Assessment, EngineError, InMemoryStore,
    ObservationInput, TimeOfDay, TitrationConfig, TitrationEngine, UserId, UserStateRepository,
    WeeklyOrchestrator, PRODUCER_NAME, TITRATION_VERSION,
};

/// Titrate - sleep-restriction titration engine
#[derive(Parser)]
#[command(name = "titrate")]
#[command(author = "Synheart AI Inc")]
#[command(version = TITRATION_VERSION)]
#[command(about = "Compute and titrate prescribed sleep windows", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "json-pretty")]
    output_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive bedtime from wake time and time in bed
    Bedtime {
        /// Wake time (HH:MM)
        wake: String,
        /// Time in bed (minutes)
        time_in_bed: u32,
    },

    /// Compute sleep metrics for one diary entry
    Metrics {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Record diary entries for a user
    Log {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: UserId,
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,
    },

    /// Set the target wake time for a user
    SetWake {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: UserId,
        /// Wake time (HH:MM)
        wake: TimeOfDay,
    },

    /// Establish the baseline window for the week containing a date
    Baseline {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: UserId,
        /// Date the baseline is computed on (YYYY-MM-DD)
        #[arg(long)]
        as_of: NaiveDate,
    },

    /// Run the weekly titration for the week ending on a date
    Weekly {
        #[arg(long)]
        store: PathBuf,
        /// Last day of the observed week (YYYY-MM-DD)
        #[arg(long)]
        week_end: NaiveDate,
        /// Restrict to these users (default: all)
        #[arg(long)]
        user: Vec<UserId>,
    },

    /// Report adherence over a date range
    Adherence {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },

    /// Show a user's program state and windows
    Show {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        user: UserId,
    },

    /// Diagnose store and configuration
    Doctor {
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one entry per line)
    Ndjson,
    /// JSON array of entries
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TitrateCliError> {
    let config = match &cli.config {
        Some(path) => TitrationConfig::from_json(&fs::read_to_string(path)?)?,
        None => TitrationConfig::default(),
    };
    let out = Output(cli.output_format);

    match cli.command {
        Commands::Bedtime { wake, time_in_bed } => {
            let bedtime = calculate_bedtime(&wake, time_in_bed)?;
            out.print(&serde_json::json!({
                "wake_time": wake,
                "time_in_bed_minutes": time_in_bed,
                "bedtime": bedtime,
            }))
        }

        Commands::Metrics { input } => {
            let entry: ObservationInput = serde_json::from_str(&read_input(&input)?)?;
            out.print(&compute_sleep_metrics(
                entry.bedtime,
                entry.out_of_bed_time,
                entry.sleep_onset_latency_minutes,
                entry.wake_after_sleep_onset_minutes,
            ))
        }

        Commands::Log {
            store,
            user,
            input,
            input_format,
        } => cmd_log(&store, config, user, &input, input_format, &out),

        Commands::SetWake { store, user, wake } => {
            let db = open_store(&store)?;
            let state =
                TitrationEngine::with_config(&db, config)?.set_target_wake_time(user, wake)?;
            save_store(&db, &store)?;
            out.print(&state)
        }

        Commands::Baseline { store, user, as_of } => {
            let db = open_store(&store)?;
            let engine = TitrationEngine::with_config(&db, config)?;
            let result = match engine.establish_baseline(user, as_of)? {
                Assessment::Ready(decision) => serde_json::json!({
                    "status": "created",
                    "window": decision.window,
                    "flagged": decision.flagged,
                }),
                Assessment::InsufficientData { entries_needed } => serde_json::json!({
                    "status": "insufficient_data",
                    "entries_needed": entries_needed,
                }),
            };
            save_store(&db, &store)?;
            out.print(&result)
        }

        Commands::Weekly {
            store,
            week_end,
            user,
        } => {
            let db = open_store(&store)?;
            let orchestrator = WeeklyOrchestrator::new(TitrationEngine::with_config(&db, config)?);
            let report = if user.is_empty() {
                orchestrator.run_all(week_end)?
            } else {
                orchestrator.run(&user, week_end)
            };
            save_store(&db, &store)?;
            out.print(&report)
        }

        Commands::Adherence {
            store,
            user,
            start,
            end,
        } => {
            let db = open_store(&store)?;
            let percent =
                TitrationEngine::with_config(&db, config)?.compute_adherence(user, start, end)?;
            out.print(&serde_json::json!({
                "user_id": user,
                "start": start,
                "end": end,
                "adherence_percent": percent,
            }))
        }

        Commands::Show { store, user } => {
            let db = open_store(&store)?;
            let state = db.load_user(user)?;
            let windows = db.windows_for(user)?;
            out.print(&serde_json::json!({
                "state": state,
                "windows": windows,
            }))
        }

        Commands::Doctor { store } => cmd_doctor(store.as_deref(), &config, &out),
    }
}

fn cmd_log(
    store: &Path,
    config: TitrationConfig,
    user: UserId,
    input: &Path,
    input_format: InputFormat,
    out: &Output,
) -> Result<(), TitrateCliError> {
    let data = read_input(input)?;
    let entries: Vec<ObservationInput> = match input_format {
        InputFormat::Ndjson => data
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<ObservationInput>)
            .collect::<Result<_, _>>()?,
        InputFormat::Json => serde_json::from_str(&data)?,
    };
    if entries.is_empty() {
        return Err(TitrateCliError::NoEntries);
    }

    let db = open_store(store)?;
    let engine = TitrationEngine::with_config(&db, config)?;
    let mut logged = Vec::with_capacity(entries.len());
    for entry in entries {
        logged.push(engine.log_observation(user, entry)?);
    }
    save_store(&db, store)?;
    out.print(&logged)
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

fn cmd_doctor(
    store: Option<&Path>,
    config: &TitrationConfig,
    out: &Output,
) -> Result<(), TitrateCliError> {
    let mut checks = vec![DoctorCheck {
        name: "config".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Time in bed {}-{} min, step {} min, {} nights per {} days",
            config.min_time_in_bed_minutes,
            config.max_time_in_bed_minutes,
            config.step_minutes,
            config.min_entries,
            config.window_days
        ),
    }];

    if let Some(path) = store {
        let check = if !path.exists() {
            DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Store file does not exist (will be created)".to_string(),
            }
        } else {
            match fs::read_to_string(path)
                .map_err(TitrateCliError::from)
                .and_then(|json| Ok(InMemoryStore::from_json(&json)?))
                .and_then(|db| Ok(db.list_users()?))
            {
                Ok(users) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Store valid ({} users)", users.len()),
                },
                Err(e) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                },
            }
        };
        checks.push(check);
    }

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (entries can be piped to `log -i -`)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TITRATION_VERSION.to_string(),
        checks,
    };
    out.print(&report)?;

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(TitrateCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

struct Output(OutputFormat);

impl Output {
    fn print<T: Serialize>(&self, value: &T) -> Result<(), TitrateCliError> {
        let text = match self.0 {
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
        };
        println!("{text}");
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<String, TitrateCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn open_store(path: &Path) -> Result<InMemoryStore, TitrateCliError> {
    if path.exists() {
        Ok(InMemoryStore::from_json(&fs::read_to_string(path)?)?)
    } else {
        Ok(InMemoryStore::new())
    }
}

fn save_store(db: &InMemoryStore, path: &Path) -> Result<(), TitrateCliError> {
    fs::write(path, db.to_json()?)?;
    Ok(())
}

// Error handling

#[derive(Debug)]
enum TitrateCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEntries,
    DoctorFailed,
}

impl From<io::Error> for TitrateCliError {
    fn from(e: io::Error) -> Self {
        TitrateCliError::Io(e)
    }
}

impl From<EngineError> for TitrateCliError {
    fn from(e: EngineError) -> Self {
        TitrateCliError::Engine(e)
    }
}

impl From<serde_json::Error> for TitrateCliError {
    fn from(e: serde_json::Error) -> Self {
        TitrateCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TitrateCliError> for CliError {
    fn from(e: TitrateCliError) -> Self {
        match e {
            TitrateCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TitrateCliError::Engine(e) => {
                let hint = match &e {
                    EngineError::MissingTargetWakeTime => Some("Run `titrate set-wake` first"),
                    EngineError::BaselineIncomplete => {
                        Some("Log at least five nights within a week first")
                    }
                    EngineError::DuplicateWindow(_) => Some("This week was already processed"),
                    _ => None,
                };
                CliError {
                    code: "ENGINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            TitrateCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input is valid JSON".to_string()),
            },
            TitrateCliError::NoEntries => CliError {
                code: "NO_ENTRIES".to_string(),
                message: "No diary entries found in input".to_string(),
                hint: Some("Check input file is not empty".to_string()),
            },
            TitrateCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: None,
            },
        }
    }
}
