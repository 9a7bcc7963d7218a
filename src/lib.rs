pub mod aggregate;
pub mod config;
pub mod context;
pub mod error;
pub mod headers;
pub mod normalize;
pub mod reorder;
pub mod report;
pub mod table;
pub mod worker;

pub use config::Settings;
pub use context::{JobKind, ReorderStats, RunContext, RunSummary, Warning, WarningKind};
pub use error::{PipelineError, PipelineResult};
pub use reorder::ReorderInputs;
pub use worker::{Failure, Job, Worker, WorkerEvent};

// Default file names when no path is given
pub mod files {
    pub const GLOBAL_STOCK_REPORT: &str = "Material_Global_Stock_Report.CSV";
    pub const MAIN_STORE_REPORT: &str = "Stock_Report_Material_without_item_category.xlsx";
    pub const MASTER_DATA: &str = "MASTER_DATA_INPUT.xlsx";
    pub const EXPECTED_ITEMS: &str = "Expected_Items_Material.xlsx";
    pub const GLOBAL_STOCK_LOOKUP: &str = "Material_Global_Stock_Lookup.xlsx";
    pub const MAIN_STORE_LOOKUP: &str = "Material_Main_Store_Stock_Lookup.xlsx";
    pub const INVENTORY_CALCULATION: &str = "INVENTORY_CALCULATION.xlsx";
}
