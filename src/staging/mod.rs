//! Bounded staging area for exported query results.
//!
//! Each export writes into its own timestamp-named folder under the staging
//! root. Folders are tracked oldest first with their sizes, and the oldest
//! ones are deleted once the folder count or the aggregate size exceeds its
//! budget. The most recent folder always survives.

mod cache;
mod export;
mod ledger;

pub use cache::{dir_size, ExportFolder, StagingCache};
pub use export::{
    column_files, write_stream, DownloadLinks, Exporter, ARCHIVE_NAME, STATIC_PREFIX,
};
pub use ledger::{StagedFolder, StagingLedger};
