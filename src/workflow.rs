//! The shrink workflow: mount → fetch → shrink → convert, then unmount.
//!
//! Steps run strictly in order and the first failure aborts the rest. The
//! drive is released through a `MountGuard` created before the first mount
//! attempt, so the unmount runs exactly once whichever step failed, and also
//! from the signal handler if the operator interrupts the run.

use std::sync::Arc;

use tracing::info;

use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::fetch::{FetchOutcome, RepositoryFetcher};
use crate::mount::{DriveMounter, MountGuard, MountStatus, UnmountOutcome};
use crate::report::{ConversionReport, ReportConverter};
use crate::shrink::ShrinkRunner;
use crate::status;
use crate::tool_runner::CommandRunner;

const TOTAL_STEPS: usize = 5;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub mount: MountStatus,
    pub fetch: FetchOutcome,
    pub shrink_exit_code: Option<i32>,
    pub conversion: ConversionReport,
    pub unmount: UnmountOutcome,
}

struct StepResults {
    mount: MountStatus,
    fetch: FetchOutcome,
    shrink_exit_code: Option<i32>,
    conversion: ConversionReport,
}

pub struct Workflow {
    config: WorkflowConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Workflow {
    pub fn new(config: WorkflowConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Run every step, then unmount.
    ///
    /// The unmount happens on success and on failure; its own failure is a
    /// warning and never changes the result.
    pub fn run(&self) -> Result<WorkflowSummary> {
        info!("Starting shrink workflow for {}", self.config.remote_path);
        let mut guard = MountGuard::register(DriveMounter::from_config(
            self.runner.clone(),
            &self.config,
        ));

        let result = self.run_steps(&guard);

        status::step(
            5,
            TOTAL_STEPS,
            &format!("Releasing {}", self.config.local_id),
        );
        let unmount = guard.release();

        let steps = result?;
        info!("Shrink workflow finished");
        Ok(WorkflowSummary {
            mount: steps.mount,
            fetch: steps.fetch,
            shrink_exit_code: steps.shrink_exit_code,
            conversion: steps.conversion,
            unmount,
        })
    }

    fn run_steps(&self, guard: &MountGuard) -> Result<StepResults> {
        let config = &self.config;

        status::step(
            1,
            TOTAL_STEPS,
            &format!("Mapping {} to {}", config.local_id, config.remote_path),
        );
        let mount = guard.ensure_mounted()?;
        status::ok(&format!("{} {}", config.local_id, mount));

        status::step(2, TOTAL_STEPS, &format!("Fetching {}", config.repo_url));
        let fetch = RepositoryFetcher::from_config(self.runner.clone(), config).ensure_repository()?;
        status::ok(&format!("Shrink script {}", fetch));

        status::step(
            3,
            TOTAL_STEPS,
            &format!("Shrinking disks under {}", config.mount_target()),
        );
        let output = ShrinkRunner::from_config(self.runner.clone(), config).run_shrink(
            &config.script_path(),
            &config.mount_target(),
            &config.log_path,
        )?;
        status::ok(&format!("Shrink finished, log at {}", config.log_path.display()));

        status::step(
            4,
            TOTAL_STEPS,
            &format!("Converting report ({} backend)", config.converter),
        );
        let conversion = ReportConverter::from_config(self.runner.clone(), config)
            .convert_to_workbook(&config.log_path, &config.workbook_path)?;
        if conversion.skipped {
            status::info("Conversion skipped (dry run)");
        } else {
            status::ok(&format!("Workbook written to {}", conversion.workbook.display()));
        }

        Ok(StepResults {
            mount,
            fetch,
            shrink_exit_code: output.exit_code,
            conversion,
        })
    }
}
