//! Remote query service abstraction for querystage.
//!
//! Provides a trait-based interface to the remote query service so the
//! session manager and pipeline work the same against PostgreSQL or the
//! in-memory mock.

mod manager;
mod mock;
mod postgres;

pub use manager::{SessionManager, SessionState};
pub use mock::{MockControl, MockQueryService};
pub use postgres::PostgresService;

use crate::config::SessionConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Substring the query service puts in every error raised by a broken
/// session transport. Reconnect-and-retry is keyed on this text alone.
pub const TRANSPORT_FAILURE_MARKER: &str = "TTransportException";

/// Summary the service returns for statements that produce nothing to show.
pub const NO_DATA_SUMMARY: &str = "No data to print.\n";

/// Name of the implicit key column, never exported to a file.
pub const KEY_COLUMN: &str = "key";

/// Declared shape of a statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultShape {
    /// Row-returning query.
    Query,
    /// Column listing.
    ShowColumns,
    /// Replica count.
    ReplicaNum,
    /// Registered transform tasks.
    RegisterTasks,
    /// Cluster topology, rendered as several titled tables.
    ClusterInfo,
    /// Anything else; rendered from the summary text.
    #[default]
    Other,
}

impl ResultShape {
    /// Returns true for shapes rendered as one table.
    pub fn is_single_table(&self) -> bool {
        matches!(
            self,
            Self::Query | Self::ShowColumns | Self::ReplicaNum | Self::RegisterTasks
        )
    }
}

/// Result of executing one statement on the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    /// Set when the service rejected the statement.
    pub parse_error: Option<String>,
    /// Declared result shape.
    pub shape: ResultShape,
    /// Header row followed by data rows, already rendered as text.
    pub rows: Vec<Vec<String>>,
    /// Text summary for shapes without rows.
    pub summary: String,
}

impl StatementResult {
    /// A tabular result; `rows[0]` is the header.
    pub fn table(shape: ResultShape, rows: Vec<Vec<String>>) -> Self {
        Self {
            shape,
            rows,
            ..Self::default()
        }
    }

    /// A text-only result.
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            summary: text.into(),
            ..Self::default()
        }
    }

    /// A statement the service refused to run.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            parse_error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a CSV load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Columns written to.
    pub columns: Vec<String>,
    /// Number of records written.
    pub records: u64,
}

/// One exported row: one byte value per column.
pub type ByteRow = Vec<Vec<u8>>;

/// Row stream produced by an export statement.
#[async_trait]
pub trait ExportStream: Send {
    /// Directory the service was asked to export into.
    fn dir(&self) -> &Path;

    /// Column names, in row order.
    fn columns(&self) -> &[String];

    /// Returns up to `max_rows` rows; an empty batch means the stream is done.
    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<ByteRow>>;
}

/// Trait defining the interface to the remote query service.
///
/// Failures caused by a broken transport must carry
/// [`TRANSPORT_FAILURE_MARKER`] in their message.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Opens the session.
    async fn open(&mut self) -> Result<()>;

    /// Closes the session.
    async fn close(&mut self) -> Result<()>;

    /// Executes one statement.
    async fn execute(&mut self, statement: &str) -> Result<StatementResult>;

    /// Executes an export statement and returns its row stream.
    async fn export(&mut self, statement: &str) -> Result<Box<dyn ExportStream>>;

    /// Executes a CSV load statement with the file contents as payload.
    async fn load_csv(&mut self, statement: &str, payload: Vec<u8>) -> Result<LoadOutcome>;
}

/// Creates the production query service for the given configuration.
///
/// The returned service is not opened yet.
pub fn service_for(config: &SessionConfig) -> Box<dyn QueryService> {
    Box::new(PostgresService::new(config.clone()))
}

/// Returns true if an error message reports a broken session transport.
pub fn is_transport_failure(message: &str) -> bool {
    message.contains(TRANSPORT_FAILURE_MARKER)
}
