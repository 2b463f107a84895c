//! Type-safe external tool argument contracts.
//!
//! This module provides the `ToolArgs` trait for ensuring compile-time correctness
//! of the command lines we hand to `net`, `git`, the shrink script host and the
//! spreadsheet engine. Instead of raw string vectors, Rust structs implement
//! this trait to produce the exact argument list each tool expects.
//!
//! # Design Goals
//!
//! 1. **Compile-Time Safety**: Flag mismatches (e.g., `-LogPath` vs `-LogFilePath`)
//!    are fixed in one struct, not scattered through the workflow.
//! 2. **Single Source of Truth**: The struct definition IS the contract.
//! 3. **Dry-Run Awareness**: Every contract declares whether it changes host
//!    state, so dry-run mode can skip it while still running queries.

/// Trait for typed external tool arguments.
///
/// # Contract
///
/// - `program()`: The executable to launch (resolved through `PATH`).
/// - `to_cli_args()`: Arguments exactly as the tool expects them.
/// - `get_env_vars()`: Environment variables the tool requires.
/// - `tool_name()`: Short label used in logs and error messages.
/// - `is_mutating()`: Whether running the tool changes host state.
///
/// # Example
///
/// ```
/// use shrinkwrap::tool_traits::ToolArgs;
/// use shrinkwrap::tools::net_use::NetUseDeleteArgs;
///
/// let args = NetUseDeleteArgs { local_id: "Z:".to_string() };
///
/// assert_eq!(args.program(), "net");
/// assert_eq!(args.to_cli_args(), vec!["use", "Z:", "/delete", "/y"]);
/// assert!(args.is_mutating());
/// ```
pub trait ToolArgs {
    /// Executable name or path.
    fn program(&self) -> String;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Get required environment variables.
    ///
    /// Most tools need none.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Short, stable label (e.g., "net use add").
    fn tool_name(&self) -> &'static str;

    /// Whether this invocation modifies the host (mount table, disk, files).
    ///
    /// Read-only queries return `false` and still execute in dry-run mode.
    fn is_mutating(&self) -> bool {
        true
    }
}
