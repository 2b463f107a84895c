//! shrinkwrap - Main entry point
//!
//! Parses the command line, sets up logging and signal handling, then hands
//! off to the workflow or one of the standalone maintenance commands.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use shrinkwrap::cli::{Cli, Commands};
use shrinkwrap::config::WorkflowConfig;
use shrinkwrap::error::WorkflowError;
use shrinkwrap::mount::{DriveMounter, UnmountOutcome};
use shrinkwrap::process_guard::{self, ProcessGuard};
use shrinkwrap::report::ReportConverter;
use shrinkwrap::status;
use shrinkwrap::tool_runner::{CommandRunner, SystemRunner};
use shrinkwrap::workflow::Workflow;

/// Initialize the logger. `RUST_LOG` overrides the verbosity flags.
fn init_logger(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shrinkwrap={}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_args();

    init_logger(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }
    info!("shrinkwrap {} starting up", env!("CARGO_PKG_VERSION"));

    let guard = ProcessGuard::new();
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(e) => {
            status::fail(&format!("{:#}", e));
            e.downcast_ref::<WorkflowError>()
                .map_or(1, WorkflowError::exit_code)
        }
    };

    // process::exit skips destructors
    drop(guard);
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        None | Some(Commands::Run) => run_workflow(cli),
        Some(Commands::Validate) => {
            let config = cli.effective_config()?;
            config.validate()?;
            status::ok(&format!(
                "Configuration is valid: {} -> {}",
                config.local_id, config.remote_path
            ));
            Ok(())
        }
        Some(Commands::Convert { csv, workbook }) => {
            let config = cli.effective_config()?;
            let csv = csv.clone().unwrap_or_else(|| config.log_path.clone());
            let workbook = workbook
                .clone()
                .unwrap_or_else(|| config.workbook_path.clone());
            let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.dry_run));

            let report = ReportConverter::from_config(runner, &config)
                .convert_to_workbook(&csv, &workbook)?;
            if report.skipped {
                status::info("Conversion skipped (dry run)");
            } else {
                status::ok(&format!("Workbook written to {}", report.workbook.display()));
            }
            Ok(())
        }
        Some(Commands::Unmount) => {
            let config = cli.effective_config()?;
            let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.dry_run));
            match DriveMounter::from_config(runner, &config).unmount()? {
                UnmountOutcome::NotMounted => {
                    status::info(&format!("{} was not mapped; nothing to unmount", config.local_id))
                }
                _ => status::ok(&format!("Unmounted {}", config.local_id)),
            }
            Ok(())
        }
        Some(Commands::InitConfig { path }) => {
            let config = cli.effective_config()?;
            config
                .save_to_file(path)
                .with_context(|| format!("writing {}", path.display()))?;
            status::ok(&format!("Configuration written to {}", path.display()));
            Ok(())
        }
    }
}

fn run_workflow(cli: &Cli) -> anyhow::Result<()> {
    let config: WorkflowConfig = cli.effective_config()?;
    config.validate()?;
    if config.dry_run {
        status::info("Dry run: mutating commands are printed, not executed");
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.dry_run));
    let summary = Workflow::new(config, runner).run()?;
    debug!("Workflow summary: {:?}", summary);

    status::ok("Workflow complete");
    Ok(())
}
