use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use logging::LoggingError;
use relay::{EndpointError, NotificationEndpoint};
use replay::ReplayError;
use statsd::MetricsError;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod logging;
mod replay;
mod statsd;

#[derive(Parser)]
#[command(version, about = "Relays cloud resource notifications to the resource API")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Validate a configuration file and resolve the API host
    CheckConfig(CheckConfigArgs),
    /// Dispatch notifications recorded as JSON lines
    Replay(ReplayArgs),
}

#[derive(Args)]
struct CheckConfigArgs {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Args)]
struct ReplayArgs {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// JSON lines file, stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Overrides logging.debug_level
    #[arg(short, long)]
    debug_level: Option<String>,
    /// Overrides logging.libs_debug_level
    #[arg(short, long)]
    libs_debug_level: Option<String>,
    /// Overrides logging.log_file
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("could not create the endpoint: {0}")]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("could not start the runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::CheckConfig(args) => check_config(args),
        CliCommand::Replay(args) => run_replay(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime)
}

fn check_config(args: CheckConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;
    runtime()?.block_on(NotificationEndpoint::new(&config.relay))?;

    println!("{}: ok", args.config.display());
    Ok(())
}

fn run_replay(args: ReplayArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;

    let mut logging_config = config.logging.clone().unwrap_or_default();
    if let Some(level) = args.debug_level {
        logging_config.debug_level = level;
    }
    if let Some(level) = args.libs_debug_level {
        logging_config.libs_debug_level = level;
    }
    if let Some(path) = args.log_file {
        logging_config.log_file = Some(path);
    }
    logging_config.validate()?;
    let _sentry_guard = logging::init(&logging_config)?;

    if let Some(metrics_config) = &config.metrics {
        statsd::init(metrics_config)?;
    }

    runtime()?.block_on(async {
        let endpoint = NotificationEndpoint::new(&config.relay).await?;
        let mut stdout = std::io::stdout().lock();
        let summary = replay::replay_file(&endpoint, args.input.as_deref(), &mut stdout).await?;
        drop(stdout);

        tracing::info!("replay done, {summary}");
        println!("{summary}");
        Ok::<(), CliError>(())
    })
}
