use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConverterBackend, WorkflowConfig};
use crate::error::Result;

/// shrinkwrap - Shrink the VHD(X) profile disks on a file share
#[derive(Parser)]
#[command(name = "shrinkwrap")]
#[command(
    about = "Mount a profile share, run the shrink-disk script on it and convert its report to a workbook"
)]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Read-only queries (drive and checkout inspection) still run so the
    /// preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored status output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// JSON configuration file; flags and environment override it
    #[arg(short, long, global = true, env = "SHRINKWRAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full workflow (default)
    Run,
    /// Validate the effective configuration and exit
    Validate,
    /// Convert a shrink report to a workbook without mounting anything
    Convert {
        /// CSV report (defaults to the configured log path)
        csv: Option<PathBuf>,
        /// Workbook to write (defaults to the configured workbook path)
        workbook: Option<PathBuf>,
    },
    /// Unmap the configured drive if it is mapped
    Unmount,
    /// Write the effective configuration as JSON
    InitConfig {
        /// Destination file
        path: PathBuf,
    },
}

/// Configuration overrides shared by every command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Drive letter to map the share to (e.g. Z:)
    #[arg(long, global = true, env = "SHRINKWRAP_DRIVE")]
    pub drive: Option<String>,

    /// UNC path of the share holding the profile disks
    #[arg(long, global = true, env = "SHRINKWRAP_SHARE")]
    pub share: Option<String>,

    /// Ask Windows to restore the mapping at next logon
    ///
    /// The environment variable accepts 1/0, yes/no, on/off, true/false.
    #[arg(
        long,
        global = true,
        env = "SHRINKWRAP_PERSISTENT",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub persistent: bool,

    /// Git URL of the shrink script repository
    #[arg(long, global = true, env = "SHRINKWRAP_REPO_URL")]
    pub repo_url: Option<String>,

    /// Directory holding the cached checkout
    #[arg(long, global = true, env = "SHRINKWRAP_CACHE_ROOT")]
    pub cache_root: Option<PathBuf>,

    /// Script file inside the checkout
    #[arg(long, global = true, env = "SHRINKWRAP_SCRIPT")]
    pub script: Option<String>,

    /// Script host executable (powershell.exe or pwsh)
    #[arg(long, global = true, env = "SHRINKWRAP_SHELL")]
    pub shell: Option<String>,

    /// CSV log written by the shrink script
    #[arg(long, global = true, env = "SHRINKWRAP_LOG")]
    pub log: Option<PathBuf>,

    /// Workbook to produce from the log
    #[arg(long, global = true, env = "SHRINKWRAP_WORKBOOK")]
    pub workbook: Option<PathBuf>,

    /// Report conversion backend
    #[arg(long, global = true, value_enum, env = "SHRINKWRAP_CONVERTER")]
    pub converter: Option<ConverterBackend>,

    /// Office suite executable for the external converter
    #[arg(long, global = true, env = "SHRINKWRAP_OFFICE")]
    pub office: Option<String>,

    /// Timeout in seconds for each drive mapping command
    #[arg(long, global = true, value_name = "SECS")]
    pub mount_timeout: Option<u64>,

    /// Timeout in seconds for each git command
    #[arg(long, global = true, value_name = "SECS")]
    pub fetch_timeout: Option<u64>,

    /// Timeout in seconds for the shrink script (unbounded by default)
    #[arg(long, global = true, value_name = "SECS")]
    pub shrink_timeout: Option<u64>,

    /// Timeout in seconds for the external converter
    #[arg(long, global = true, value_name = "SECS")]
    pub convert_timeout: Option<u64>,
}

impl RunArgs {
    /// Overlay every value that was given on top of `config`.
    pub fn apply_to(&self, config: &mut WorkflowConfig) {
        if let Some(drive) = &self.drive {
            config.local_id = drive.to_uppercase();
        }
        if let Some(share) = &self.share {
            config.remote_path = share.clone();
        }
        if self.persistent {
            config.persistent = true;
        }
        if let Some(url) = &self.repo_url {
            config.repo_url = url.clone();
        }
        if let Some(root) = &self.cache_root {
            config.cache_root = root.clone();
        }
        if let Some(script) = &self.script {
            config.script_name = script.clone();
        }
        if let Some(shell) = &self.shell {
            config.shell_program = shell.clone();
        }
        if let Some(log) = &self.log {
            config.log_path = log.clone();
        }
        if let Some(workbook) = &self.workbook {
            config.workbook_path = workbook.clone();
        }
        if let Some(converter) = self.converter {
            config.converter = converter;
        }
        if let Some(office) = &self.office {
            config.office_program = office.clone();
        }
        if let Some(secs) = self.mount_timeout {
            config.timeouts.mount_secs = Some(secs);
        }
        if let Some(secs) = self.fetch_timeout {
            config.timeouts.fetch_secs = Some(secs);
        }
        if let Some(secs) = self.shrink_timeout {
            config.timeouts.shrink_secs = Some(secs);
        }
        if let Some(secs) = self.convert_timeout {
            config.timeouts.convert_secs = Some(secs);
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Defaults, then the config file, then environment and flags.
    pub fn effective_config(&self) -> Result<WorkflowConfig> {
        let mut config = match &self.config {
            Some(path) => WorkflowConfig::load_from_file(path)?,
            None => WorkflowConfig::default(),
        };
        self.overrides.apply_to(&mut config);
        if self.dry_run {
            config.dry_run = true;
        }
        Ok(config)
    }
}
