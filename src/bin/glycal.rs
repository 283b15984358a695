//! glycal CLI - Command-line interface for the calibration engine
//!
//! Commands:
//! - update: Apply a review from a dataset file to the user's calibration
//! - metrics: Extract review metrics from a glucose curve
//! - tokens: Tokenize a meal name and items
//! - config: Print the default engine configuration
//! - doctor: Check a dataset for out-of-range calibrations and bad reviews

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use glycal::config::EngineConfig;
use glycal::types::{CurvePoint, RawCurvePoint};
use glycal::validate::{validate_calibration, validate_review};
use glycal::{
    tokenize_meal, CalibrationEngine, CalibrationError, MemoryStore, StoreError, GLYCAL_VERSION,
    PRODUCER_NAME,
};

/// glycal - Personal glucose-response calibration engine
#[derive(Parser)]
#[command(name = "glycal")]
#[command(author = "Synheart AI Inc")]
#[command(version = GLYCAL_VERSION)]
#[command(about = "Learn personal post-meal glucose response from reviews", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Always print compact JSON, even on a terminal
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a review to the user's calibration
    Update {
        /// Dataset file (reviews, calibrations, activity, sleep)
        #[arg(short, long)]
        data: PathBuf,

        /// User the review belongs to
        #[arg(short, long)]
        user: String,

        /// Review to apply
        #[arg(short, long)]
        review: String,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the updated dataset back to the data file
        #[arg(long)]
        save: bool,

        /// Write the updated dataset here instead of the data file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Extract review metrics from a glucose curve
    Metrics {
        /// JSON array of curve points (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Baseline used when the curve has no pre-meal reading
        #[arg(long, default_value = "5.5")]
        fallback_baseline: f64,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Tokenize a meal name and its items
    Tokens {
        /// Meal name
        #[arg(short, long)]
        name: String,

        /// Item name (repeatable)
        #[arg(short, long = "item")]
        items: Vec<String>,
    },

    /// Print the default engine configuration
    Config,

    /// Check a dataset for invariant violations
    Doctor {
        /// Dataset file
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match init_logging(&cli.log_level) {
        Ok(handle) => handle,
        Err(e) => {
            report_error(e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(e);
            ExitCode::FAILURE
        }
    }
}

fn report_error(e: GlycalCliError) {
    eprintln!(
        "{}",
        serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
    );
}

fn init_logging(level: &str) -> Result<flexi_logger::LoggerHandle, GlycalCliError> {
    flexi_logger::Logger::try_with_env_or_str(level)
        .map_err(|e| GlycalCliError::Logging(e.to_string()))?
        .log_to_stderr()
        .format(flexi_logger::detailed_format)
        .start()
        .map_err(|e| GlycalCliError::Logging(e.to_string()))
}

fn run(cli: Cli) -> Result<(), GlycalCliError> {
    let pretty = !cli.compact && atty::is(atty::Stream::Stdout);

    match cli.command {
        Commands::Update {
            data,
            user,
            review,
            config,
            save,
            output,
        } => cmd_update(
            &data,
            &user,
            &review,
            config.as_deref(),
            save,
            output.as_deref(),
            pretty,
        ),

        Commands::Metrics {
            input,
            fallback_baseline,
            config,
        } => cmd_metrics(&input, fallback_baseline, config.as_deref(), pretty),

        Commands::Tokens { name, items } => {
            let tokens = tokenize_meal(&name, &items);
            println!("{}", to_json(&tokens, pretty)?);
            Ok(())
        }

        Commands::Config => {
            println!("{}", EngineConfig::default().to_json_pretty()?);
            Ok(())
        }

        Commands::Doctor { data, config, json } => {
            cmd_doctor(data.as_deref(), config.as_deref(), json)
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

fn read_input(path: &Path) -> Result<String, GlycalCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, GlycalCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn cmd_update(
    data: &Path,
    user: &str,
    review: &str,
    config: Option<&Path>,
    save: bool,
    output: Option<&Path>,
    pretty: bool,
) -> Result<(), GlycalCliError> {
    let engine = CalibrationEngine::new(load_config(config)?)?;
    let store = MemoryStore::from_json(&fs::read_to_string(data)?)?;

    let outcome = engine.process(user, review, &store, &store, &store, &store)?;
    println!("{}", to_json(&outcome, pretty)?);

    // Save the dataset if requested
    let target = match (output, save) {
        (Some(path), _) => Some(path),
        (None, true) => Some(data),
        (None, false) => None,
    };
    if let Some(path) = target {
        let dataset = store.to_dataset()?;
        fs::write(path, serde_json::to_string_pretty(&dataset)?)?;
    }

    Ok(())
}

fn cmd_metrics(
    input: &Path,
    fallback_baseline: f64,
    config: Option<&Path>,
    pretty: bool,
) -> Result<(), GlycalCliError> {
    let engine = CalibrationEngine::new(load_config(config)?)?;

    let raw: Vec<RawCurvePoint> = serde_json::from_str(&read_input(input)?)?;
    if raw
        .iter()
        .any(|p| !p.time_minutes().is_finite() || !p.value().is_finite())
        || !fallback_baseline.is_finite()
    {
        return Err(CalibrationError::InvalidInput(
            "curve points and fallback baseline must be finite numbers".to_string(),
        )
        .into());
    }

    let points: Vec<CurvePoint> = raw.into_iter().map(CurvePoint::from).collect();
    let metrics = engine.extractor().extract(&points, fallback_baseline);
    println!("{}", to_json(&metrics, pretty)?);
    Ok(())
}

fn cmd_doctor(
    data: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), GlycalCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "glycal_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("glycal version {}", GLYCAL_VERSION),
    });

    let config = match load_config(config) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Configuration is valid".to_string(),
            });
            config
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", CliError::from(e).message),
            });
            EngineConfig::default()
        }
    };

    match data {
        Some(path) if path.exists() => match MemoryStore::from_json(&fs::read_to_string(path)?)
            .map_err(GlycalCliError::from)
            .and_then(|store| store.to_dataset().map_err(GlycalCliError::from))
        {
            Ok(dataset) => {
                checks.push(DoctorCheck {
                    name: "dataset".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} reviews, {} calibrations",
                        dataset.reviews.len(),
                        dataset.calibrations.len()
                    ),
                });

                let mut user_ids: Vec<&String> = dataset.calibrations.keys().collect();
                user_ids.sort();
                for user_id in user_ids {
                    let calibration = &dataset.calibrations[user_id];
                    checks.push(check_calibration(user_id, calibration, &config));
                }

                for review in &dataset.reviews {
                    if let Err(e) = validate_review(review, &config.curve) {
                        checks.push(DoctorCheck {
                            name: format!("review:{}", review.review_id),
                            status: CheckStatus::Error,
                            message: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "dataset".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read dataset: {}", CliError::from(e).message),
                });
            }
        },
        Some(_) => {
            checks.push(DoctorCheck {
                name: "dataset".to_string(),
                status: CheckStatus::Warning,
                message: "Dataset file does not exist".to_string(),
            });
        }
        None => {}
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: GLYCAL_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("glycal Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!();
        for check in &report.checks {
            let status = match check.status {
                CheckStatus::Ok => "OK",
                CheckStatus::Warning => "WARN",
                CheckStatus::Error => "ERROR",
            };
            println!("[{:>5}] {}: {}", status, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));

    if has_errors {
        Err(GlycalCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_calibration(
    user_id: &str,
    calibration: &glycal::UserCalibration,
    config: &EngineConfig,
) -> DoctorCheck {
    let name = format!("calibration:{user_id}");
    if let Err(e) = validate_calibration(calibration) {
        return DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: e.to_string(),
        };
    }

    let bounds = &config.update.bounds;
    let fields = [
        ("baseline_glucose", calibration.baseline_glucose, bounds.baseline_glucose),
        ("carb_sensitivity", calibration.carb_sensitivity, bounds.carb_sensitivity),
        ("avg_peak_time_min", calibration.avg_peak_time_min, bounds.avg_peak_time_min),
        ("exercise_effect", calibration.exercise_effect, bounds.exercise_effect),
        ("sleep_penalty", calibration.sleep_penalty, bounds.sleep_penalty),
    ];
    let out_of_range: Vec<String> = fields
        .iter()
        .filter(|(_, value, range)| !range.contains(*value))
        .map(|(field, value, range)| format!("{field}={value} outside [{}, {}]", range.min, range.max))
        .collect();

    if !out_of_range.is_empty() {
        return DoctorCheck {
            name,
            status: CheckStatus::Warning,
            message: format!("Will be clamped on next update: {}", out_of_range.join(", ")),
        };
    }
    if !(0.0..1.0).contains(&calibration.confidence) {
        return DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: format!("confidence {} outside [0, 1)", calibration.confidence),
        };
    }

    DoctorCheck {
        name,
        status: CheckStatus::Ok,
        message: format!(
            "{} observations ({} quality), confidence {}",
            calibration.n_observations, calibration.n_quality_observations, calibration.confidence
        ),
    }
}

// Error handling

#[derive(Debug)]
enum GlycalCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Calibration(CalibrationError),
    Logging(String),
    DoctorFailed,
}

impl From<io::Error> for GlycalCliError {
    fn from(e: io::Error) -> Self {
        GlycalCliError::Io(e)
    }
}

impl From<serde_json::Error> for GlycalCliError {
    fn from(e: serde_json::Error) -> Self {
        GlycalCliError::Json(e)
    }
}

impl From<CalibrationError> for GlycalCliError {
    fn from(e: CalibrationError) -> Self {
        GlycalCliError::Calibration(e)
    }
}

impl From<StoreError> for GlycalCliError {
    fn from(e: StoreError) -> Self {
        GlycalCliError::Calibration(CalibrationError::Store(e))
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GlycalCliError> for CliError {
    fn from(e: GlycalCliError) -> Self {
        match e {
            GlycalCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GlycalCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GlycalCliError::Calibration(e) => {
                let (code, hint) = match &e {
                    CalibrationError::NotFound(_) => {
                        ("NOT_FOUND", "Check the user and review ids")
                    }
                    CalibrationError::InvalidInput(_) => {
                        ("INVALID_INPUT", "Fix the review or curve data and retry")
                    }
                    CalibrationError::AlreadyApplied(_) => {
                        ("ALREADY_APPLIED", "Each review can be applied only once")
                    }
                    CalibrationError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Run 'glycal config' for a valid template")
                    }
                    CalibrationError::Store(StoreError::Conflict { .. }) => {
                        ("CONFLICT", "Another update won the race; reload and retry")
                    }
                    CalibrationError::Store(_) => ("STORE_ERROR", "Check the dataset store"),
                    CalibrationError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            GlycalCliError::Logging(msg) => CliError {
                code: "LOGGING_ERROR".to_string(),
                message: msg,
                hint: Some("Check --log-level or RUST_LOG".to_string()),
            },
            GlycalCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
