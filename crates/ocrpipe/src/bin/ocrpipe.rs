//! Command-line front end over `ocrpipe::ExtractionService`.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use ocrpipe::config::resolve_config;
use ocrpipe::jobs::{JobListFilter, JobState, JobStatus};
use ocrpipe::logging::{self, LogFormat};
use ocrpipe::{ExtractionRequest, ExtractionService, JobOutput, ServiceError};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "ocrpipe", version, about = "Extract text from PDFs with pluggable OCR strategies")]
struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(short, long, global = true, env = "OCRPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract text from a PDF
    Extract(ExtractArgs),
    /// Show the status of a job (requires a configured database)
    Status { job_id: String },
    /// List known jobs, newest first
    Jobs {
        /// Only jobs in this state (Pending, InProgress, Succeeded, Failed)
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Result cache administration
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Generation model administration
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Send a prompt straight to a generation model
    Generate {
        #[arg(long)]
        model: String,
        prompt: String,
    },
    /// Objects stored under a storage profile
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
    /// List registered extraction strategies
    Strategies,
}

#[derive(Args)]
struct ExtractArgs {
    file: PathBuf,
    /// Extraction strategy; defaults to `strategies.default` from the config
    #[arg(short, long)]
    strategy: Option<String>,
    /// Read and write the result cache
    #[arg(long)]
    cache: bool,
    /// Post-processing prompt (requires --model)
    #[arg(long, requires = "model")]
    prompt: Option<String>,
    /// Generation model for post-processing (requires --prompt)
    #[arg(long, requires = "prompt")]
    model: Option<String>,
    /// Storage profile for the result (requires --filename)
    #[arg(long, requires = "filename")]
    profile: Option<String>,
    /// Object name under the storage profile (requires --profile)
    #[arg(long, requires = "profile")]
    filename: Option<String>,
    /// Run inline instead of through the job queue
    #[arg(long)]
    sync: bool,
    /// Print the full output record as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached extraction
    Clear,
}

#[derive(Subcommand)]
enum ModelAction {
    List,
    Pull { name: String },
}

#[derive(Subcommand)]
enum StorageAction {
    List {
        profile: String,
    },
    Load {
        profile: String,
        filename: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    Delete {
        profile: String,
        filename: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init(cli.verbose, format);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error [{}]: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ServiceError> {
    let config = resolve_config(cli.config.as_deref())?;
    let service = ExtractionService::from_config(&config)?;

    match cli.command {
        Command::Extract(args) => {
            let strategy = args
                .strategy
                .clone()
                .unwrap_or_else(|| config.strategies.default.to_string());
            extract(&service, args, strategy)
        }
        Command::Status { job_id } => {
            print_json(&service.status(&job_id)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Jobs { state, limit } => {
            let state = match state.as_deref() {
                Some(s) => Some(JobState::parse(s).ok_or_else(|| {
                    ServiceError::Validation(format!("unknown job state '{}'", s))
                })?),
                None => None,
            };
            let jobs = service.list_jobs(&JobListFilter {
                state,
                limit: Some(limit),
            });
            for job in jobs {
                println!(
                    "{}  {:<10}  {:<12}  {}",
                    job.id,
                    job.state,
                    job.strategy,
                    job.submitted_at.to_rfc3339()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Cache {
            action: CacheAction::Clear,
        } => {
            service.clear_cache()?;
            println!("Cache cleared");
            Ok(ExitCode::SUCCESS)
        }
        Command::Models { action } => {
            match action {
                ModelAction::List => {
                    for model in service.list_models()? {
                        println!("{}", model.name);
                    }
                }
                ModelAction::Pull { name } => {
                    service.pull_model(&name)?;
                    println!("Pulled {}", name);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate { model, prompt } => {
            println!("{}", service.generate(&model, &prompt)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Storage { action } => {
            match action {
                StorageAction::List { profile } => {
                    for name in service.storage_list(&profile)? {
                        println!("{}", name);
                    }
                }
                StorageAction::Load {
                    profile,
                    filename,
                    output,
                } => {
                    let bytes = service.storage_load(&profile, &filename)?;
                    write_output(output, &bytes)?;
                }
                StorageAction::Delete { profile, filename } => {
                    service.storage_delete(&profile, &filename)?;
                    println!("Deleted {}", filename);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Strategies => {
            for id in service.strategies() {
                println!("{}", id);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn extract(
    service: &ExtractionService,
    args: ExtractArgs,
    strategy: String,
) -> Result<ExitCode, ServiceError> {
    let document = std::fs::read(&args.file).map_err(|e| {
        ServiceError::Validation(format!("cannot read {}: {}", args.file.display(), e))
    })?;

    let mut request = ExtractionRequest::new(document, strategy).with_cache(args.cache);
    request.model = args.model;
    request.prompt = args.prompt;
    request.storage_profile = args.profile;
    request.storage_filename = args.filename;

    if args.sync {
        let output = service.submit_sync(request)?;
        print_output(&output, args.json);
        return Ok(ExitCode::SUCCESS);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            log::warn!("Could not install Ctrl-C handler: {}", e);
        }
    }

    let job_id = service.submit(request)?;
    eprintln!("Submitted job {}", job_id);

    let mut last_percent = None;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            eprintln!("Interrupted; job {} abandoned", job_id);
            std::process::exit(130);
        }

        match service.status(&job_id)? {
            JobStatus::Pending { .. } => {}
            JobStatus::InProgress {
                progress,
                elapsed_ms,
            } => {
                if last_percent != Some(progress.percent) {
                    eprintln!(
                        "[{:>3}%] {} ({:.1}s)",
                        progress.percent,
                        progress.message,
                        elapsed_ms as f64 / 1000.0
                    );
                    last_percent = Some(progress.percent);
                }
            }
            JobStatus::Succeeded { result } => {
                print_output(&result, args.json);
                return Ok(ExitCode::SUCCESS);
            }
            JobStatus::Failed { error } => {
                eprintln!("Job {} failed [{}]: {}", job_id, error.kind, error.message);
                return Ok(ExitCode::FAILURE);
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn print_output(output: &JobOutput, json: bool) {
    if json {
        print_json(output);
        return;
    }
    for warning in &output.warnings {
        eprintln!("warning [{}]: {}", warning.kind, warning.message);
    }
    if let Some(ref location) = output.stored_location {
        eprintln!("Stored at {}", location);
    }
    println!("{}", output.text);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("error: cannot serialize output: {}", e),
    }
}

fn write_output(path: Option<PathBuf>, bytes: &[u8]) -> Result<(), ServiceError> {
    let result = match path {
        Some(path) => std::fs::write(&path, bytes),
        None => std::io::stdout().write_all(bytes),
    };
    result.map_err(|e| ServiceError::Validation(format!("cannot write output: {}", e)))
}
