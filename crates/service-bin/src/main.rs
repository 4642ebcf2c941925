use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use service_core::{Config, Service};

mod demo;

#[derive(Parser, Debug)]
#[command(name = "nativesvc")]
#[command(about = "Register, control and host a program as a native OS service")]
#[command(version)]
struct Cli {
    /// Path to a JSON service config
    #[arg(long, env = "NATIVESVC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Service name (overrides the config file)
    #[arg(long, env = "NATIVESVC_NAME", global = true)]
    name: Option<String>,

    /// Program to register (default: this executable hosting the demo)
    #[arg(long, global = true)]
    program: Option<PathBuf>,

    /// Argument passed to the program at service start (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Working directory for the program
    #[arg(long, global = true)]
    working_directory: Option<PathBuf>,

    /// Register for the current user instead of system-wide
    #[arg(long, global = true)]
    user: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NATIVESVC_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Create or update the service registration
    Install,
    /// Report whether install would change anything
    Check,
    /// Remove the service registration
    Uninstall,
    /// Start the installed service
    Start,
    /// Stop the installed service
    Stop,
    /// Stop, then start the installed service
    Restart,
    /// Run as the managed service, hosting the heartbeat demo
    Run,
    /// Print the service manager this build drives
    Platform,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if cli.command == Commands::Platform {
        println!("{}", service_core::platform());
        return Ok(());
    }

    let config = build_config(&cli)?;
    info!(
        "nativesvc v{} {:?} {} ({})",
        env!("CARGO_PKG_VERSION"),
        cli.command,
        config.name,
        service_core::platform(),
    );

    let service = service_core::new(config).context("failed to set up service")?;
    dispatch(cli.command, service.as_ref())
}

fn dispatch(command: Commands, service: &dyn Service) -> Result<()> {
    match command {
        Commands::Install => {
            if service.install_or_update()? {
                info!("service {} installed or updated", service.name());
            } else {
                info!("service {} already up to date", service.name());
            }
        }
        Commands::Check => {
            let required = service.install_or_update_required()?;
            println!("{}", if required { "install required" } else { "up to date" });
        }
        Commands::Uninstall => service.uninstall()?,
        Commands::Start => service.start()?,
        Commands::Stop => service.stop()?,
        Commands::Restart => service.restart()?,
        Commands::Run => {
            let program = demo::Heartbeat::new(service.name());
            service
                .run(Box::new(program))
                .with_context(|| format!("service {} exited with an error", service.name()))?;
        }
        Commands::Platform => println!("{}", service_core::platform()),
    }
    Ok(())
}

/// Config file first, then command-line overrides. Without an explicit
/// program the service re-runs this executable in `run` mode.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("loading config from {}", path.display());
            Config::load(path)?
        }
        None => Config::default(),
    };

    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    if let Some(program) = &cli.program {
        config.program = program.clone();
    }
    if !cli.args.is_empty() {
        config.arguments = cli.args.clone();
    }
    if let Some(dir) = &cli.working_directory {
        config.working_directory = Some(dir.clone());
    }
    if cli.user {
        config.privileged = false;
    }

    if config.name.is_empty() {
        anyhow::bail!("service name is required (--name or config file)");
    }

    if config.program.as_os_str().is_empty() && config.arguments.is_empty() {
        config.arguments = vec!["run".to_string(), "--name".to_string(), config.name.clone()];
        if !config.privileged {
            config.arguments.push("--user".to_string());
        }
    }
    Ok(config)
}
