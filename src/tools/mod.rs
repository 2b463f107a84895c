//! Typed argument contracts for every external tool the workflow drives.

pub mod git;
pub mod net_use;
pub mod shrink;
pub mod spreadsheet;
