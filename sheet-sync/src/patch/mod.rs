//! Tabular locate-and-patch engine
//!
//! Finds a header row, matches rows by business key and writes typed field
//! values into the matched rows, reporting per record what happened.

pub mod batch;
pub mod editor;
pub mod header;
pub mod matcher;
pub mod patcher;
pub mod plan;
pub mod value;

pub use batch::{BatchOptions, RecordResult, RecordStatus, SheetReport, SheetUpdates, UpdateRecord};
pub use editor::{HeaderColumn, HeaderDescription, SheetEditor};
pub use header::{AliasSet, HeaderLocation, HeaderMap, SearchWindow};
pub use patcher::{KeyColumn, PatchOutcome};
pub use plan::UpdatePlan;
pub use value::{FieldInput, infer_cell_value};
