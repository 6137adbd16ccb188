//! Locate rows by business key in xlsx workbooks, patch them in place and
//! publish the result to a remote store.
//!
//! The engine lives in [`patch`] and works on a [`workbook::Workbook`] opened
//! from bytes; [`sync`] fetches and publishes those bytes.

pub mod cli;
pub mod config;
pub mod error;
pub mod patch;
pub mod sync;
pub mod workbook;

#[cfg(test)]
mod test_support;

pub use error::{SheetError, SyncError};
pub use patch::{SheetEditor, UpdatePlan, UpdateRecord};
pub use workbook::Workbook;
