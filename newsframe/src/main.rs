/*
newsframe - single-run binary.
Fetches one headline, illustrates it, captions it and posts the result. Meant to be
invoked by an OS scheduler; every invocation is an independent run.
*/

use clap::Parser;
use common::{Config, ConfigError, Credentials};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use newsframe::{Pipeline, PipelineError};

#[derive(Parser, Debug)]
#[command(name = "newsframe", about = "Post an AI-generated image for today's top headline")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Secrets may live in a .env next to the binary's working directory
    if let Ok(path) = dotenv::dotenv() {
        info!(path = %path.display(), "loaded environment file");
    }

    let run_id = uuid::Uuid::new_v4();
    let outcome = run(args)
        .instrument(tracing::info_span!("run", %run_id))
        .await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(
                %run_id,
                stage = e.stage(),
                status = ?e.upstream_status(),
                error = %e,
                "run aborted"
            );
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<(), PipelineError> {
    // Credentials first: a missing variable must fail before anything else happens
    let credentials = Credentials::from_env()?;
    let config = load_config(args.config).await?;

    let pipeline = Pipeline::from_config(&config, credentials)?;
    let result = pipeline.run().await?;

    info!(
        post_id = %result.post_id,
        media_id = %result.media_id,
        timestamp = %result.timestamp.to_rfc3339(),
        "run completed"
    );
    Ok(())
}

/// Resolve config paths the same way every time: optional defaults file, then either
/// the `--config` file or `config.toml` in the working directory.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config, ConfigError> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::File(format!("config file not found: {}", p.display())));
            }
            Some(p)
        }
        None => {
            let p = PathBuf::from("config.toml");
            if p.exists() { Some(p) } else { None }
        }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    .map_err(|e| ConfigError::File(format!("{:#}", e)))?;

    info!(default_path = ?default_path, override_path = ?override_path, "configuration loaded");
    Ok(config)
}
