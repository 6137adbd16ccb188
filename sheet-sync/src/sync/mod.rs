//! Boundary transfers: fetch a workbook before editing, publish it after

pub mod drive;
pub mod local;
pub mod orchestrator;
pub mod retry;
pub mod store;

pub use drive::{DriveEndpoints, DriveStore, HttpStatusError};
pub use local::{LocalStore, write_atomic};
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncTarget};
pub use retry::{RetryConfig, RetryPolicy, RetryableError};
pub use store::RemoteStore;
