//! module-host: run every module in a modules directory until signalled
//!
//! Usage:
//!   module-host [--config <host.toml>] [--modules-dir <dir>] [--log-filter <filter>]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use module_host::config::HostConfig;
use module_host::module::ModuleManager;
use module_host::utils::{init_logging_from_config, wait_for_shutdown_signal};

#[cfg(all(feature = "mimalloc", not(target_os = "windows")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "module-host", version, about = "Load, start and supervise modules")]
struct Args {
    /// Host configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory scanned for modules (overrides the config file)
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Log filter (overrides the config file; RUST_LOG still wins)
    #[arg(long)]
    log_filter: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => HostConfig::default(),
    };

    if let Some(dir) = &args.modules_dir {
        config.modules.modules_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(filter) = &args.log_filter {
        config.logging.filter = Some(filter.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: HostConfig) -> anyhow::Result<bool> {
    let (manager, backend) = ModuleManager::with_process_backend(&config).await?;

    let startup = manager.startup().await?;
    let mut clean = startup.is_success();
    info!("Modules running: {:?}", manager.list_modules().await);

    let signal = wait_for_shutdown_signal().await;
    info!("Received {}, stopping modules", signal);

    let mut failed: Vec<String> = startup
        .failed_modules()
        .into_iter()
        .map(str::to_string)
        .collect();
    tokio::select! {
        shutdown = manager.shutdown() => {
            clean &= shutdown.is_success();
            failed.extend(shutdown.failed_modules().into_iter().map(str::to_string));
        }
        signal = wait_for_shutdown_signal() => {
            warn!("Received {} during shutdown, releasing module processes", signal);
            clean = false;
        }
    }
    backend.shutdown_all().await;

    for module in failed {
        error!("Module {} did not complete its lifecycle", module);
    }
    Ok(clean)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("module-host: {:#}", e);
            return ExitCode::from(2);
        }
    };
    init_logging_from_config(&config.logging);

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("module-host failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
