//! Report Converter: turn the shrink script's CSV log into an `.xlsx` workbook.
//!
//! Two backends:
//!
//! - **Native** reads the CSV with `csv` and writes the workbook with
//!   `rust_xlsxwriter`. Nothing outlives the call.
//! - **External** drives a headless office suite through the `CommandRunner`,
//!   so the engine runs in its own process group, is bounded by the convert
//!   timeout, and its whole tree is stopped if it hangs.
//!
//! The workbook is rewritten from scratch on every run.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::WINDOWS_1252;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::{debug, info, warn};

use crate::config::{ConverterBackend, WorkflowConfig};
use crate::error::{Result, WorkflowError};
use crate::tool_runner::{CommandRunner, run_tool_safe};
use crate::tools::spreadsheet::OfficeConvertArgs;

/// Worksheet that receives the report rows
pub const SHEET_NAME: &str = "ShrinkReport";

/// Summary of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub workbook: PathBuf,
    /// Rows copied, when the backend can tell
    pub rows: Option<usize>,
    pub skipped: bool,
}

pub struct ReportConverter {
    backend: ConverterBackend,
    runner: Arc<dyn CommandRunner>,
    office_program: String,
    timeout: Option<Duration>,
    dry_run: bool,
}

impl ReportConverter {
    pub fn new(runner: Arc<dyn CommandRunner>, backend: ConverterBackend) -> Self {
        Self {
            backend,
            runner,
            office_program: "soffice".to_string(),
            timeout: None,
            dry_run: false,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &WorkflowConfig) -> Self {
        Self {
            backend: config.converter,
            runner,
            office_program: config.office_program.clone(),
            timeout: config.timeouts.convert(),
            dry_run: config.dry_run,
        }
    }

    /// Convert `csv_path` into a workbook at `workbook_path`.
    pub fn convert_to_workbook(
        &self,
        csv_path: &Path,
        workbook_path: &Path,
    ) -> Result<ConversionReport> {
        if self.dry_run {
            info!(
                "[DRY RUN] Would convert {} to {}",
                csv_path.display(),
                workbook_path.display()
            );
            return Ok(ConversionReport {
                workbook: workbook_path.to_path_buf(),
                rows: None,
                skipped: true,
            });
        }

        if !csv_path.is_file() {
            return Err(WorkflowError::conversion(format!(
                "report not found at {}",
                csv_path.display()
            )));
        }
        if let Some(parent) = workbook_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                WorkflowError::conversion(format!(
                    "could not create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let rows = match self.backend {
            ConverterBackend::Native => Some(write_native(csv_path, workbook_path)?),
            ConverterBackend::External => {
                self.write_external(csv_path, workbook_path)?;
                None
            }
        };

        info!("Wrote workbook {}", workbook_path.display());
        Ok(ConversionReport {
            workbook: workbook_path.to_path_buf(),
            rows,
            skipped: false,
        })
    }

    fn write_external(&self, csv_path: &Path, workbook_path: &Path) -> Result<()> {
        let staging = StagingDir::create(workbook_path)?;
        let args = OfficeConvertArgs {
            program: self.office_program.clone(),
            csv: csv_path.to_path_buf(),
            outdir: staging.path().to_path_buf(),
        };

        let output = run_tool_safe(self.runner.as_ref(), &args, self.timeout)
            .map_err(|e| WorkflowError::conversion(e.to_string()))?;
        output
            .ensure_success("spreadsheet convert")
            .map_err(WorkflowError::conversion)?;

        let produced = args.produced_path();
        if !produced.is_file() {
            return Err(WorkflowError::conversion(format!(
                "{} reported success but wrote no {}",
                self.office_program,
                produced.display()
            )));
        }
        replace_file(&produced, workbook_path).map_err(|e| {
            WorkflowError::conversion(format!(
                "could not move workbook to {}: {}",
                workbook_path.display(),
                e
            ))
        })
    }
}

fn xlsx_error(e: XlsxError) -> WorkflowError {
    WorkflowError::conversion(e.to_string())
}

/// Copy every CSV row into a fresh workbook. Returns the row count.
fn write_native(csv_path: &Path, workbook_path: &Path) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| WorkflowError::conversion(format!("could not open report: {}", e)))?;

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let mut rows: u32 = 0;
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME).map_err(xlsx_error)?;

        for record in reader.byte_records() {
            let record = record.map_err(|e| {
                WorkflowError::conversion(format!("malformed report row {}: {}", rows + 1, e))
            })?;
            let fields: Vec<Cow<'_, str>> = record.iter().map(decode_field).collect();

            // Windows PowerShell prefixes Export-Csv output with a type line
            if rows == 0 && fields.first().is_some_and(|f| f.trim_start_matches('\u{feff}').starts_with("#TYPE")) {
                debug!("Skipping type information line");
                continue;
            }

            for (col, field) in fields.iter().enumerate() {
                let col = u16::try_from(col).map_err(|_| {
                    WorkflowError::conversion("report has more columns than a worksheet allows")
                })?;
                let field: &str = if rows == 0 && col == 0 {
                    field.trim_start_matches('\u{feff}')
                } else {
                    &**field
                };

                if rows == 0 {
                    sheet
                        .write_string_with_format(rows, col, field, &header)
                        .map_err(xlsx_error)?;
                } else if let Some(number) = parse_number(field) {
                    sheet.write_number(rows, col, number).map_err(xlsx_error)?;
                } else {
                    sheet.write_string(rows, col, field).map_err(xlsx_error)?;
                }
            }
            rows += 1;
        }

        if rows == 0 {
            warn!("Report {} is empty", csv_path.display());
        } else {
            sheet.set_freeze_panes(1, 0).map_err(xlsx_error)?;
            sheet.autofit();
        }
    }

    workbook.save(workbook_path).map_err(xlsx_error)?;
    Ok(rows as usize)
}

/// UTF-8 when valid, otherwise Windows-1252 (Windows PowerShell's
/// default `Export-Csv` encoding on Western-locale hosts).
fn decode_field(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Plain decimal literals only: `-12`, `4.25`, `0.5`. Leading zeros,
/// exponents, `inf` and `NaN` stay text so identifiers keep their shape.
fn parse_number(field: &str) -> Option<f64> {
    let trimmed = field.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || (int_part.len() > 1 && int_part.starts_with('0')) {
        return None;
    }
    if frac_part.is_some_and(|f| !all_digits(f)) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Cross-volume moves fall back to copy
        Err(_) => fs::copy(from, to).map(|_| ()),
    }
}

/// Scratch directory next to the workbook, removed on drop.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(workbook_path: &Path) -> Result<Self> {
        let parent = workbook_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let path = parent.join(format!(".shrinkwrap-convert-{}", std::process::id()));
        fs::create_dir_all(&path).map_err(|e| {
            WorkflowError::conversion(format!("could not create {}: {}", path.display(), e))
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}
