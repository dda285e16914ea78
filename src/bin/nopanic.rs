//! NoPanic CLI - Command-line interface for NoPanic
//!
//! Commands:
//! - train: Synthesize (or read) a labeled corpus and write a model artifact
//! - classify: Classify a reading table with a model artifact
//! - geofence: Evaluate a location table against the safe zone
//! - monitor: Run one monitoring cycle over readings and locations
//! - doctor: Diagnose model artifact and configuration health
//! - schema: Print input table and artifact schemas

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use nopanic::alert::LogSink;
use nopanic::classifier::DEFAULT_SEED;
use nopanic::features::FeatureSet;
use nopanic::geofence::{self, SafeZone};
use nopanic::labeling::{synthesize, SynthesisConfig};
use nopanic::normalizer::Normalizer;
use nopanic::pipeline::MonitorSession;
use nopanic::schema::RawTable;
use nopanic::types::{PredictedState, ZoneEvaluation};
use nopanic::{
    train_test_split, ComputeError, MonitorConfig, PanicModel, MODEL_FORMAT_VERSION,
    NOPANIC_VERSION, PRODUCER_NAME,
};

/// NoPanic - panic-state classification and geofence alerting
#[derive(Parser)]
#[command(name = "nopanic")]
#[command(version = NOPANIC_VERSION)]
#[command(about = "Classify stress sensor readings and evaluate geofences", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a classifier and write the model artifact
    Train {
        /// Labeled reading table; a corpus is synthesized from the label rules when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Model artifact output path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of samples to synthesize
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Seed for synthesis, splitting and training
        #[arg(long)]
        seed: Option<u64>,

        /// Number of trees (overrides config)
        #[arg(long)]
        trees: Option<usize>,

        /// Cardiac channel the model consumes (overrides config)
        #[arg(long)]
        feature_set: Option<FeatureSetArg>,

        /// Held-out fraction used to report accuracy
        #[arg(long, default_value = "0.2")]
        test_ratio: f64,
    },

    /// Classify a reading table
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Model artifact (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Evaluate a location table against the safe zone
    Geofence {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        #[command(flatten)]
        zone: ZoneArgs,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Run one monitoring cycle and print the cycle report
    Monitor {
        /// Reading table (use - for stdin)
        #[arg(short, long)]
        readings: PathBuf,

        /// Location table
        #[arg(short, long)]
        locations: Option<PathBuf>,

        /// Input format for both tables
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Model artifact (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[command(flatten)]
        zone: ZoneArgs,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Diagnose model artifact and configuration health
    Doctor {
        /// Model artifact to check (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

/// Safe zone overrides
#[derive(clap::Args)]
struct ZoneArgs {
    /// Zone center latitude
    #[arg(long, requires = "longitude")]
    latitude: Option<f64>,

    /// Zone center longitude
    #[arg(long, requires = "latitude")]
    longitude: Option<f64>,

    /// Zone radius in meters
    #[arg(long)]
    radius: Option<f64>,
}

impl ZoneArgs {
    fn resolve(&self, base: &SafeZone) -> Result<SafeZone, ComputeError> {
        let (lat, lon) = base.center();
        SafeZone::new(
            self.latitude.unwrap_or(lat),
            self.longitude.unwrap_or(lon),
            self.radius.unwrap_or(base.radius_m()),
        )
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Comma-separated values with a header row
    Csv,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum FeatureSetArg {
    /// [gsr_voltage, temperature_c, heart_rate_bpm]
    Bpm,
    /// [gsr_voltage, temperature_c, raw_value]
    RawValue,
}

impl From<FeatureSetArg> for FeatureSet {
    fn from(arg: FeatureSetArg) -> Self {
        match arg {
            FeatureSetArg::Bpm => FeatureSet::Bpm,
            FeatureSetArg::RawValue => FeatureSet::RawValue,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Reading table columns
    Readings,
    /// Location table columns
    Locations,
    /// Model artifact layout
    Model,
}

fn main() -> ExitCode {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
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

fn run(cli: Cli) -> Result<(), NopanicCliError> {
    let config = match &cli.config {
        Some(path) => MonitorConfig::from_json(&fs::read_to_string(path)?)?,
        None => MonitorConfig::default(),
    };

    match cli.command {
        Commands::Train {
            input,
            input_format,
            output,
            samples,
            seed,
            trees,
            feature_set,
            test_ratio,
        } => {
            let mut config = config;
            if let Some(trees) = trees {
                config.classifier.num_trees = trees;
            }
            if let Some(feature_set) = feature_set {
                config.classifier.feature_set = feature_set.into();
            }
            if seed.is_some() {
                config.classifier.random_seed = seed;
            }
            cmd_train(
                &config,
                input.as_deref(),
                input_format,
                &output,
                samples,
                test_ratio,
            )
        }

        Commands::Classify {
            input,
            input_format,
            model,
            output_format,
        } => {
            let model_path = model.or(config.model_path).ok_or(NopanicCliError::NoModel)?;
            cmd_classify(&input, input_format, &model_path, output_format)
        }

        Commands::Geofence {
            input,
            input_format,
            zone,
            output_format,
        } => {
            let zone = zone.resolve(&config.zone)?;
            cmd_geofence(&input, input_format, &zone, output_format)
        }

        Commands::Monitor {
            readings,
            locations,
            input_format,
            model,
            zone,
            pretty,
        } => {
            let mut config = config;
            config.zone = zone.resolve(&config.zone)?;
            if model.is_some() {
                config.model_path = model;
            }
            cmd_monitor(&config, &readings, locations.as_deref(), input_format, pretty)
        }

        Commands::Doctor { model, json } => {
            let model_path = model.or(config.model_path.clone());
            cmd_doctor(&config, cli.config.as_deref(), model_path.as_deref(), json)
        }

        Commands::Schema { schema_type } => {
            cmd_schema(schema_type);
            Ok(())
        }
    }
}

fn cmd_train(
    config: &MonitorConfig,
    input: Option<&Path>,
    input_format: InputFormat,
    output: &Path,
    samples: usize,
    test_ratio: f64,
) -> Result<(), NopanicCliError> {
    let seed = config.classifier.random_seed.unwrap_or(DEFAULT_SEED);

    let corpus = match input {
        Some(path) => {
            let table = read_table(path, &input_format)?;
            Normalizer::normalize_labeled(&table)?
        }
        None => {
            let synthesis = SynthesisConfig {
                num_samples: samples,
                seed,
                feature_set: config.classifier.feature_set,
                ..Default::default()
            };
            synthesize(&config.rules, &synthesis)?
        }
    };

    let (train, test) = train_test_split(&corpus, test_ratio, seed)?;
    let model = PanicModel::train(&train, &config.classifier)?;
    model.save(output)?;

    let report = TrainReport {
        model_path: output.display().to_string(),
        format_version: MODEL_FORMAT_VERSION.to_string(),
        feature_set: model.feature_set(),
        num_trees: model.num_trees(),
        seed: model.seed(),
        train_samples: train.len(),
        test_samples: test.len(),
        accuracy: model.accuracy(&test),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn cmd_classify(
    input: &Path,
    input_format: InputFormat,
    model_path: &Path,
    output_format: OutputFormat,
) -> Result<(), NopanicCliError> {
    let table = read_table(input, &input_format)?;
    let samples = Normalizer::normalize_readings(&table)?;

    // A missing model still produces output: every row is reported unknown
    let states = match PanicModel::load(model_path) {
        Ok(model) => model.predict(&samples),
        Err(e) => {
            log::warn!("{e}; reporting unknown states");
            vec![PredictedState::Unknown; samples.len()]
        }
    };

    let records: Vec<ClassifiedRow> = samples
        .iter()
        .zip(states)
        .map(|(sample, state)| ClassifiedRow {
            timestamp: sample.timestamp.to_rfc3339(),
            state,
        })
        .collect();

    print!("{}", format_output(&records, &output_format)?);
    Ok(())
}

fn cmd_geofence(
    input: &Path,
    input_format: InputFormat,
    zone: &SafeZone,
    output_format: OutputFormat,
) -> Result<(), NopanicCliError> {
    let table = read_table(input, &input_format)?;
    let fixes = Normalizer::normalize_locations(&table)?;
    let evaluations: Vec<ZoneEvaluation> = geofence::evaluate_all(&fixes, zone);

    print!("{}", format_output(&evaluations, &output_format)?);
    Ok(())
}

fn cmd_monitor(
    config: &MonitorConfig,
    readings: &Path,
    locations: Option<&Path>,
    input_format: InputFormat,
    pretty: bool,
) -> Result<(), NopanicCliError> {
    let readings = read_table(readings, &input_format)?;
    let locations = locations
        .map(|path| read_table(path, &input_format))
        .transpose()?;

    let mut session = MonitorSession::from_config(config);
    let report = session.run_cycle(&readings, locations.as_ref(), &mut LogSink);

    if pretty {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn cmd_doctor(
    config: &MonitorConfig,
    config_path: Option<&Path>,
    model_path: Option<&Path>,
    json: bool,
) -> Result<(), NopanicCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "nopanic_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("NoPanic version {}", NOPANIC_VERSION),
    });

    checks.push(DoctorCheck {
        name: "config".to_string(),
        status: CheckStatus::Ok,
        message: match config_path {
            Some(path) => format!("Loaded {}", path.display()),
            None => "Using built-in defaults".to_string(),
        },
    });

    let (lat, lon) = config.zone.center();
    checks.push(DoctorCheck {
        name: "safe_zone".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Center ({lat:.6}, {lon:.6}), radius {:.1} m",
            config.zone.radius_m()
        ),
    });

    match model_path {
        Some(path) if path.exists() => match PanicModel::load(path) {
            Ok(model) => {
                let expected = config.classifier.feature_set;
                let status = if model.feature_set() == expected {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warning
                };
                checks.push(DoctorCheck {
                    name: "model".to_string(),
                    status,
                    message: format!(
                        "{} ({} trees, features {:?}, configured {})",
                        MODEL_FORMAT_VERSION,
                        model.num_trees(),
                        model.feature_names(),
                        expected.as_str()
                    ),
                });
            }
            Err(e) => checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        Some(_) => checks.push(DoctorCheck {
            name: "model".to_string(),
            status: CheckStatus::Error,
            message: "Model artifact does not exist; states will be reported as unknown"
                .to_string(),
        }),
        None => checks.push(DoctorCheck {
            name: "model".to_string(),
            status: CheckStatus::Warning,
            message: "No model configured; states will be reported as unknown".to_string(),
        }),
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (tables can be piped with -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: NOPANIC_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("NoPanic Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NopanicCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) {
    match schema_type {
        SchemaType::Readings => {
            println!("Reading table");
            println!();
            println!("Required columns:");
            println!("  - Timestamp    RFC 3339, YYYY-MM-DD HH:MM:SS, or M/D/YYYY H:MM:SS (UTC)");
            println!("  - BPM          heart rate, 0-300");
            println!("    or Raw Value pulse sensor ADC reading");
            println!("  - GSR Voltage  volts, 0-5");
            println!("  - Temperature  celsius, -50 to 100");
            println!();
            println!("Optional columns:");
            println!("  - Label        0/normal, 1/low_stress, 2/panic (training tables only)");
            println!();
            println!("A missing column or bad value rejects the whole table.");
        }
        SchemaType::Locations => {
            println!("Location table");
            println!();
            println!("Required columns:");
            println!("  - Timestamp");
            println!("  - Latitude     degrees, -90 to 90");
            println!("  - Longitude    degrees, -180 to 180");
        }
        SchemaType::Model => {
            println!("Model artifact: {}", MODEL_FORMAT_VERSION);
            println!();
            println!("- format_version: artifacts with any other tag are refused");
            println!("- feature_set: bpm or raw_value");
            println!("- feature_names: vector order, checked against the feature set");
            println!("    bpm:       [gsr_voltage, temperature_c, heart_rate_bpm]");
            println!("    raw_value: [gsr_voltage, temperature_c, raw_value]");
            println!("- label_encoding: [normal, low_stress, panic] (codes 0, 1, 2)");
            println!("- seed, trained_samples");
            println!("- trees: preorder node lists");
            println!("    leaf {{class}}");
            println!("    split {{feature, threshold, left, right}}");
        }
    }
}

// Helper functions

fn read_table(path: &Path, format: &InputFormat) -> Result<RawTable, NopanicCliError> {
    let data = if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(path)?
    };

    let table = match format {
        InputFormat::Csv => RawTable::from_csv(&data)?,
        InputFormat::Json => RawTable::from_json_records(&data)?,
    };
    Ok(table)
}

fn format_output<T: Serialize>(
    records: &[T],
    format: &OutputFormat,
) -> Result<String, NopanicCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug)]
enum NopanicCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoModel,
    DoctorFailed,
}

impl From<io::Error> for NopanicCliError {
    fn from(e: io::Error) -> Self {
        NopanicCliError::Io(e)
    }
}

impl From<ComputeError> for NopanicCliError {
    fn from(e: ComputeError) -> Self {
        NopanicCliError::Compute(e)
    }
}

impl From<serde_json::Error> for NopanicCliError {
    fn from(e: serde_json::Error) -> Self {
        NopanicCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NopanicCliError> for CliError {
    fn from(e: NopanicCliError) -> Self {
        match e {
            NopanicCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NopanicCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::SchemaError(_) => {
                        ("SCHEMA_ERROR", "Run 'nopanic schema readings' for the expected columns")
                    }
                    ComputeError::InsufficientData(_) => (
                        "INSUFFICIENT_DATA",
                        "Training data must contain at least two label classes",
                    ),
                    ComputeError::ModelUnavailable(_) => (
                        "MODEL_UNAVAILABLE",
                        "Retrain with 'nopanic train' or check the artifact path",
                    ),
                    ComputeError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Check the configuration file and flag values")
                    }
                    ComputeError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NopanicCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NopanicCliError::NoModel => CliError {
                code: "NO_MODEL".to_string(),
                message: "No model artifact given".to_string(),
                hint: Some("Pass --model or set model_path in the config file".to_string()),
            },
            NopanicCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct TrainReport {
    model_path: String,
    format_version: String,
    feature_set: FeatureSet,
    num_trees: usize,
    seed: u64,
    train_samples: usize,
    test_samples: usize,
    accuracy: Option<f64>,
}

#[derive(Serialize)]
struct ClassifiedRow {
    timestamp: String,
    state: PredictedState,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
