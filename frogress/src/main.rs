mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use progress::store::ProjectLinks;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "frogress";

#[derive(Parser)]
#[command(name = "frogress", about = "Progress tracking API for decompilation projects")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the progress API and the admin probes.
    Serve(ConfigArgs),
    /// Create a project and print its api key.
    CreateProject(CreateProjectArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Args)]
struct CreateProjectArgs {
    #[command(flatten)]
    config: ConfigArgs,
    slug: String,
    name: String,
    #[arg(long, default_value = "")]
    repository: String,
    #[arg(long, default_value = "")]
    discord: String,
    #[arg(long, default_value = "")]
    website: String,
    /// Generated when omitted.
    #[arg(long)]
    auth_key: Option<String>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
    #[error(transparent)]
    Serve(#[from] progress::ServeError),
    #[error(transparent)]
    Progress(#[from] progress::errors::ProgressError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "frogress failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        CliCommand::Serve(args) => {
            let config = Config::from_file(&args.config)?;
            let _sentry = init_logging(config.logging.as_ref());
            if let Some(metrics) = &config.metrics {
                init_metrics(metrics)?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(progress::run(config.progress))?;
            Ok(())
        }
        CliCommand::CreateProject(args) => {
            let config = Config::from_file(&args.config.config)?;
            let _sentry = init_logging(config.logging.as_ref());

            let tracker = progress::open_tracker(&config.progress)?;
            let links = ProjectLinks {
                repository: args.repository,
                discord: args.discord,
                website: args.website,
            };
            let project =
                tracker.create_project(&args.slug, &args.name, args.auth_key.as_deref(), &links)?;

            println!("{}", project.auth_key);
            Ok(())
        }
    }
}

/// Installs the fmt subscriber, plus the sentry layer when a DSN is
/// configured. The returned guard flushes sentry on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(progress::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
