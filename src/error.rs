use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{source_name}: no header row found, missing columns: {}", .missing.join(", "))]
    Structural {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("Sheet '{sheet}' not found in {}. Available: {}", .path.display(), .available.join(", "))]
    SheetNotFound {
        path: PathBuf,
        sheet: String,
        available: Vec<String>,
    },

    #[error("{role} file not found or unreadable: {} ({reason})", .path.display())]
    MissingInputFile {
        role: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write {}: {reason}", .path.display())]
    IoWrite { path: PathBuf, reason: String },

    #[error("Item {key} appears twice in the master catalog (lines {first_line} and {line})")]
    DuplicateCatalogItem {
        key: String,
        first_line: usize,
        line: usize,
    },

    #[error("Quantity mismatch: input={input}, output={output}")]
    ConservationMismatch { input: f64, output: f64 },
}

impl PipelineError {
    /// Stable name of the failure, for front ends that render errors by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Structural { .. } => "structural",
            PipelineError::SheetNotFound { .. } => "sheet_not_found",
            PipelineError::MissingInputFile { .. } => "missing_input_file",
            PipelineError::IoWrite { .. } => "io_write",
            PipelineError::DuplicateCatalogItem { .. } => "duplicate_catalog_item",
            PipelineError::ConservationMismatch { .. } => "conservation_mismatch",
        }
    }

    pub(crate) fn missing_input(
        role: &str,
        path: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        PipelineError::MissingInputFile {
            role: role.to_string(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_message_names_missing_columns() {
        let err = PipelineError::Structural {
            source_name: "stock.csv".to_string(),
            missing: vec!["item code".to_string(), "quantity".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "stock.csv: no header row found, missing columns: item code, quantity"
        );
        assert_eq!(err.kind(), "structural");
    }

    #[test]
    fn missing_input_names_role_and_path() {
        let err = PipelineError::missing_input("Master catalog", "/tmp/master.xlsx", "No such file");
        let msg = err.to_string();
        assert!(msg.starts_with("Master catalog file not found"));
        assert!(msg.contains("/tmp/master.xlsx"));
        assert_eq!(err.kind(), "missing_input_file");
    }
}
