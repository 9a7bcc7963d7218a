use crate::config::Settings;
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    SkippedRow,
    QuantityCoerced,
    LevelCoerced,
    FilteredRow,
    UnmatchedCatalogItem,
}

impl WarningKind {
    pub fn label(self) -> &'static str {
        match self {
            WarningKind::SkippedRow => "skipped rows",
            WarningKind::QuantityCoerced => "quantities coerced to 0",
            WarningKind::LevelCoerced => "stock levels coerced to 0",
            WarningKind::FilteredRow => "filtered rows",
            WarningKind::UnmatchedCatalogItem => "catalog items without stock data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub source: String,
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} line {}: {}", self.source, line, self.message),
            None => write!(f, "{}: {}", self.source, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    GlobalStock,
    MainStore,
    Reorder,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::GlobalStock => "Global stock lookup",
            JobKind::MainStore => "Main store stock lookup",
            JobKind::Reorder => "Inventory calculation",
        };
        f.write_str(name)
    }
}

type ProgressSink = Box<dyn FnMut(&str) + Send>;

pub struct RunContext {
    pub settings: Settings,
    pub as_of: NaiveDate,
    warnings: Vec<Warning>,
    progress: Option<ProgressSink>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("settings", &self.settings)
            .field("as_of", &self.as_of)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

impl RunContext {
    pub fn new(settings: Settings, as_of: NaiveDate) -> Self {
        RunContext {
            settings,
            as_of,
            warnings: Vec::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn progress(&mut self, message: &str) {
        info!("{}", message);
        if let Some(sink) = self.progress.as_mut() {
            sink(message);
        }
    }

    pub fn warn(
        &mut self,
        kind: WarningKind,
        source: &str,
        line: Option<usize>,
        message: impl Into<String>,
    ) {
        let warning = Warning {
            kind,
            source: source.to_string(),
            line,
            message: message.into(),
        };
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn warning_count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn finish(self, outcome: RunOutcome) -> RunSummary {
        let warning_counts = count_by_kind(&self.warnings);
        RunSummary {
            job: outcome.job,
            output_path: outcome.output_path,
            row_count: outcome.row_count,
            total_quantity: outcome.total_quantity,
            reorder: outcome.reorder,
            warning_counts,
            warnings: self.warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub job: JobKind,
    pub output_path: PathBuf,
    pub row_count: usize,
    pub total_quantity: f64,
    pub reorder: Option<ReorderStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReorderStats {
    pub flagged: usize,
    /// Order quantity times unit cost, over items that have a cost.
    pub order_value: f64,
    pub avg_global_stock_days: f64,
    pub avg_main_store_stock_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub job: JobKind,
    pub output_path: PathBuf,
    pub row_count: usize,
    pub total_quantity: f64,
    pub reorder: Option<ReorderStats>,
    pub warning_counts: BTreeMap<WarningKind, usize>,
    pub warnings: Vec<Warning>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} – complete", self.job)?;
        writeln!(f, "  Rows written       : {}", self.row_count)?;
        writeln!(f, "  Total quantity     : {:.2}", self.total_quantity)?;
        if let Some(stats) = &self.reorder {
            writeln!(f, "  Items to reorder   : {}", stats.flagged)?;
            writeln!(f, "  Est. order value   : {:.2}", stats.order_value)?;
            writeln!(f, "  Avg global days    : {:.1}", stats.avg_global_stock_days)?;
            writeln!(f, "  Avg main store days: {:.1}", stats.avg_main_store_stock_days)?;
        }
        for (kind, count) in &self.warning_counts {
            writeln!(f, "  Warnings ({})  : {}", kind.label(), count)?;
        }
        write!(f, "  Output file        : {}", self.output_path.display())
    }
}

fn count_by_kind(warnings: &[Warning]) -> BTreeMap<WarningKind, usize> {
    let mut counts = BTreeMap::new();
    for warning in warnings {
        *counts.entry(warning.kind).or_insert(0) += 1;
    }
    counts
}
