//! Type-safe arguments for a headless office suite used as the spreadsheet
//! engine (`soffice --headless --convert-to xlsx`).

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

/// Arguments for converting a CSV file to `.xlsx` in `outdir`.
///
/// The engine names its output after the input stem, so the caller moves
/// `<outdir>/<stem>.xlsx` to the final location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficeConvertArgs {
    pub program: String,
    pub csv: PathBuf,
    pub outdir: PathBuf,
}

impl ToolArgs for OfficeConvertArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--convert-to".to_string(),
            "xlsx".to_string(),
            "--outdir".to_string(),
            self.outdir.display().to_string(),
            self.csv.display().to_string(),
        ]
    }

    fn tool_name(&self) -> &'static str {
        "spreadsheet convert"
    }
}

impl OfficeConvertArgs {
    /// Where the engine writes its output.
    pub fn produced_path(&self) -> PathBuf {
        let stem = self
            .csv
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        self.outdir.join(format!("{stem}.xlsx"))
    }
}
