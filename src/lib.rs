//! shrinkwrap library
//!
//! Maps a network share to a drive letter, keeps a local checkout of the
//! shrink-disk script, runs it against the share and converts the CSV
//! report it writes into a workbook. The drive is unmapped on every exit
//! path.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mount;
pub mod process_guard;
pub mod report;
pub mod shrink;
pub mod status;
pub mod testing;
pub mod tool_runner;
pub mod tool_traits;
pub mod tools;
pub mod workflow;

// Re-export main types for convenience
pub use config::{ConverterBackend, StepTimeouts, WorkflowConfig};
pub use error::{Result, WorkflowError};
pub use fetch::{CheckoutState, FetchOutcome, RepositoryFetcher};
pub use mount::{DriveMounter, MountGuard, MountLease, MountStatus, UnmountOutcome};
pub use process_guard::{
    ChildRegistry, CleanupHook, CleanupHooks, CommandProcessGroup, ProcessGuard,
};
pub use report::{ConversionReport, ReportConverter};
pub use shrink::ShrinkRunner;
pub use tool_runner::{CommandRunner, Invocation, SystemRunner, ToolOutput, run_tool_safe};
pub use tool_traits::ToolArgs;
pub use workflow::{Workflow, WorkflowSummary};
