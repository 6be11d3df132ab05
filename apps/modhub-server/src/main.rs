use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modhub::{
    shutdown_token, DependencyResolver, HostOptions, HostRuntime, ShutdownOptions, Storage,
    StorageOptions,
};
use modhub_bootstrap::{AppConfig, AppConfigProvider, CliArgs};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod api;
mod registered_modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_MAX_CONNS: u32 = 5;

/// ModHub Server - multi-tenant module host
#[derive(Parser)]
#[command(name = "modhub-server")]
#[command(about = "ModHub Server - multi-tenant module host")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and the module graph, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    modhub_bootstrap::logging::init_logging_unified(
        &logging_config,
        Path::new(&config.server.home_dir),
    );

    tracing::info!("ModHub Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing modules…");

    let registry = registered_modules::build_registry(&config.lifecycle.permission_exceptions)?;

    let storage_opts = match config.database_dsn()? {
        Some(dsn) => StorageOptions::Sqlite {
            dsn,
            max_conns: config
                .database
                .as_ref()
                .and_then(|d| d.max_conns)
                .unwrap_or(DEFAULT_MAX_CONNS),
        },
        None => {
            tracing::warn!("No database section found; module state is kept in memory");
            StorageOptions::InMemory
        }
    };
    let storage = Storage::connect(&storage_opts).await?;

    let overrides = config
        .lifecycle
        .overrides
        .iter()
        .filter_map(|(id, o)| o.enabled.map(|enabled| (id.clone(), enabled)))
        .collect();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address '{}:{}'",
                config.server.host, config.server.port
            )
        })?;

    let opts = HostOptions {
        hook_timeout: config.lifecycle.hook_timeout,
        stats_interval: config.scheduler.stats_interval,
        overrides,
        storage,
        modules_cfg: Arc::new(AppConfigProvider::new(config)),
    };

    let cancel = shutdown_token(ShutdownOptions::Signals);
    let host = HostRuntime::new(registry, opts, cancel);
    let router = api::build_router(api::AppState::new(host.admin()));

    host.run_full_cycle(|cancel| api::serve(addr, router, cancel))
        .await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");

    config.database_dsn()?;
    let registry = registered_modules::build_registry(&config.lifecycle.permission_exceptions)?;
    let order = DependencyResolver::resolve_order(registry.all().map(|m| m.as_ref()))?;

    println!("Configuration is valid");
    println!("Activation order: {}", order.join(" -> "));
    println!("{}", config.to_yaml()?);
    Ok(())
}
