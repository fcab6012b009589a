// Signal ETL - staged audio-to-spectrogram transformation pipeline
// Module declarations and the process entry point

use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

pub mod audio;
pub mod commands;
pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod state;

pub use config::Config;
pub use context::AppContext;
pub use logging::init_logging;

const USAGE: &str = "usage: signal-etl <command> [args]

commands:
  status <job_id>
  transform <job_id>
  check <partial_id>
  step1 <file_path> <filename>
  step2 <audio_path> <array_path> <sampling_rate> <frame_size> <hop_size> <filename>
  artifacts <job_id>
  sweep
  serve";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error("Startup failed: {0}")]
    Context(#[from] context::ContextError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Status(String),
    Transform(String),
    Check(String),
    Step1 { file_path: PathBuf, filename: String },
    Step2(pipeline::Step2Request),
    Artifacts(String),
    Sweep,
    Serve,
}

impl Invocation {
    pub fn parse(args: &[String]) -> Result<Self, AppError> {
        let usage = || AppError::Usage(USAGE.to_string());
        fn number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, AppError> {
            value.parse::<T>().map_err(|_| {
                AppError::Usage(format!("{} must be a non-negative integer, got '{}'", name, value))
            })
        }

        let (command, rest) = args.split_first().ok_or_else(usage)?;
        let invocation = match (command.as_str(), rest) {
            ("status", [job]) => Invocation::Status(job.clone()),
            ("transform", [job]) => Invocation::Transform(job.clone()),
            ("check", [partial]) => Invocation::Check(partial.clone()),
            ("step1", [file_path, filename]) => Invocation::Step1 {
                file_path: PathBuf::from(file_path),
                filename: filename.clone(),
            },
            ("step2", [audio, array, rate, frame, hop, filename]) => {
                Invocation::Step2(pipeline::Step2Request {
                    audio_path: PathBuf::from(audio),
                    array_path: PathBuf::from(array),
                    sampling_rate: number::<u32>(rate, "sampling_rate")?,
                    frame_size: number::<usize>(frame, "frame_size")?,
                    hop_size: number::<usize>(hop, "hop_size")?,
                    filename: filename.clone(),
                })
            }
            ("artifacts", [job]) => Invocation::Artifacts(job.clone()),
            ("sweep", []) => Invocation::Sweep,
            ("serve", []) => Invocation::Serve,
            _ => return Err(usage()),
        };
        Ok(invocation)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn respond<T: Serialize>(result: commands::CommandResult<T>) -> Result<bool, AppError> {
    match result {
        Ok(value) => {
            print_json(&value)?;
            Ok(true)
        }
        Err(error) => {
            print_json(&error)?;
            Ok(false)
        }
    }
}

/// Run one invocation against a built context. Returns whether the command succeeded.
pub fn dispatch(ctx: &AppContext, invocation: Invocation) -> Result<bool, AppError> {
    match invocation {
        Invocation::Status(job) => respond(commands::status(ctx, &job)),
        Invocation::Transform(job) => respond(commands::transform(ctx, &job)),
        Invocation::Check(partial) => respond(commands::check(ctx, &partial)),
        Invocation::Step1 {
            file_path,
            filename,
        } => respond(commands::step_1(ctx, &file_path, &filename)),
        Invocation::Step2(request) => respond(commands::step_2(ctx, &request)),
        Invocation::Artifacts(job) => respond(commands::artifacts(ctx, &job)),
        Invocation::Sweep => {
            print_json(&commands::sweep(ctx))?;
            Ok(true)
        }
        Invocation::Serve => {
            serve(ctx.clone())?;
            Ok(true)
        }
    }
}

/// Keep the sweeper running until Ctrl-C
fn serve(ctx: AppContext) -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let interval = Duration::from_secs(ctx.config.sweep_interval_secs);
        let handle = pipeline::sweeper::spawn(ctx, interval);
        log::info!("Serving; press Ctrl-C to stop");
        let stopped = tokio::signal::ctrl_c().await;
        handle.abort();
        stopped
    })?;

    log::info!("Shut down");
    Ok(())
}

pub fn run() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_filter);

    let result = Invocation::parse(&args).and_then(|invocation| {
        let ctx = AppContext::from_config(config)?;
        log::info!("Artifact root at {}", ctx.store.root().display());
        dispatch(&ctx, invocation)
    });

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
