//! Mock query service for testing.
//!
//! Provides a deterministic in-memory service for tests and `--mock` runs.
//! A shared [`MockControl`] lets a test inject failures and read counters
//! after the service has been handed to a session manager.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ByteRow, ExportStream, LoadOutcome, QueryService, ResultShape, StatementResult,
    NO_DATA_SUMMARY, TRANSPORT_FAILURE_MARKER,
};
use crate::error::{Result, StageError};
use crate::script;

#[derive(Default)]
struct MockState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    executions: AtomicUsize,
    open_fails: AtomicBool,
    pending_open_failures: AtomicUsize,
    pending_transport_failures: AtomicUsize,
    delay_ms: AtomicU64,
    executed: Mutex<Vec<String>>,
}

/// Shared handle for steering a [`MockQueryService`] and inspecting its calls.
#[derive(Clone, Default)]
pub struct MockControl {
    state: Arc<MockState>,
}

impl MockControl {
    /// Makes every subsequent `open` fail (or succeed again).
    pub fn set_open_fails(&self, fails: bool) {
        self.state.open_fails.store(fails, Ordering::SeqCst);
    }

    /// Fails only the next `count` `open` calls.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.pending_open_failures.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` statement calls with a transport failure.
    pub fn inject_transport_failures(&self, count: usize) {
        self.state
            .pending_transport_failures
            .store(count, Ordering::SeqCst);
    }

    /// Delays every statement call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful and failed `open` calls.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Number of statements that reached the service.
    pub fn executions(&self) -> usize {
        self.state.executions.load(Ordering::SeqCst)
    }

    /// Statements that reached the service, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state
            .executed
            .lock()
            .map(|stmts| stmts.clone())
            .unwrap_or_default()
    }
}

/// Canned export data.
#[derive(Debug, Clone, Default)]
struct MockExport {
    columns: Vec<String>,
    rows: Vec<ByteRow>,
}

/// A mock query service that returns predefined results.
#[derive(Default)]
pub struct MockQueryService {
    control: MockControl,
    responses: Vec<(String, StatementResult)>,
    rejections: Vec<(String, String)>,
    exports: Vec<(String, MockExport)>,
}

impl MockQueryService {
    /// Creates a new mock service with default responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the control handle shared with this service.
    pub fn control(&self) -> MockControl {
        self.control.clone()
    }

    /// Returns `result` for statements containing `pattern` (case-insensitive).
    pub fn with_response(mut self, pattern: impl Into<String>, result: StatementResult) -> Self {
        self.responses.push((pattern.into().to_lowercase(), result));
        self
    }

    /// Rejects statements containing `pattern` with `message`.
    pub fn with_parse_error(
        mut self,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.rejections
            .push((pattern.into().to_lowercase(), message.into()));
        self
    }

    /// Streams `rows` under `columns` for export statements containing `pattern`.
    pub fn with_export(
        mut self,
        pattern: impl Into<String>,
        columns: &[&str],
        rows: Vec<ByteRow>,
    ) -> Self {
        self.exports.push((
            pattern.into().to_lowercase(),
            MockExport {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        ));
        self
    }

    /// Records the call and applies injected delay and failures.
    async fn enter(&self, statement: &str) -> Result<()> {
        let state = &self.control.state;
        state.executions.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executed) = state.executed.lock() {
            executed.push(statement.to_string());
        }

        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let injected = state
            .pending_transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StageError::transport(format!(
                "{TRANSPORT_FAILURE_MARKER}: java.net.SocketException: Broken pipe"
            )));
        }

        Ok(())
    }

    fn rejection_for(&self, statement: &str) -> Option<&str> {
        let lower = statement.to_lowercase();
        self.rejections
            .iter()
            .find(|(pattern, _)| lower.contains(pattern.as_str()))
            .map(|(_, message)| message.as_str())
    }

    /// Generates a default response based on the statement.
    fn default_response(statement: &str) -> StatementResult {
        let lower = statement.to_lowercase();

        if script::is_explain(&lower) {
            return StatementResult::table(
                ResultShape::Query,
                vec![
                    vec!["Logical Tree".to_string(), "Operator Type".to_string()],
                    vec!["Project".to_string(), "Project".to_string()],
                    vec!["  +--Select".to_string(), "Select".to_string()],
                    vec!["    +--Scan".to_string(), "Scan".to_string()],
                ],
            );
        }

        if lower.starts_with("show cluster info") {
            let rows = [
                vec!["Server infos:"],
                vec!["ID", "IP", "PORT"],
                vec!["0", "127.0.0.1", "6888"],
                vec!["Storage engine infos:"],
                vec!["ID", "IP", "PORT", "TYPE"],
                vec!["0", "127.0.0.1", "5432", "postgresql"],
            ];
            return StatementResult::table(
                ResultShape::ClusterInfo,
                rows.iter()
                    .map(|row| row.iter().map(|v| v.to_string()).collect())
                    .collect(),
            );
        }

        if lower.starts_with("select") || lower.starts_with("show") {
            return StatementResult::table(
                ResultShape::Query,
                vec![
                    vec!["result".to_string()],
                    vec![format!("Mock result for: {statement}")],
                ],
            );
        }

        StatementResult::summary(NO_DATA_SUMMARY)
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn open(&mut self) -> Result<()> {
        let state = &self.control.state;
        state.opens.fetch_add(1, Ordering::SeqCst);
        let injected = state
            .pending_open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || state.open_fails.load(Ordering::SeqCst) {
            return Err(StageError::connection(
                "Mock service refused the session",
            ));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.control.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<StatementResult> {
        self.enter(statement).await?;

        if let Some(message) = self.rejection_for(statement) {
            return Ok(StatementResult::rejected(message));
        }

        let lower = statement.to_lowercase();
        let custom = self
            .responses
            .iter()
            .find(|(pattern, _)| lower.contains(pattern.as_str()))
            .map(|(_, result)| result.clone());

        Ok(custom.unwrap_or_else(|| Self::default_response(statement)))
    }

    async fn export(&mut self, statement: &str) -> Result<Box<dyn ExportStream>> {
        self.enter(statement).await?;

        if let Some(message) = self.rejection_for(statement) {
            return Err(StageError::parse(message));
        }

        let (_, dir) = script::strip_export_clause(statement).ok_or_else(|| {
            StageError::parse(format!("Statement has no export clause: {statement}"))
        })?;

        let lower = statement.to_lowercase();
        let export = self
            .exports
            .iter()
            .find(|(pattern, _)| lower.contains(pattern.as_str()))
            .map(|(_, export)| export.clone())
            .unwrap_or_else(|| MockExport {
                columns: vec!["key".to_string(), "value".to_string()],
                rows: vec![vec![b"1".to_vec(), b"mock".to_vec()]],
            });

        Ok(Box::new(MockExportStream {
            dir: PathBuf::from(dir),
            columns: export.columns,
            rows: export.rows.into(),
        }))
    }

    async fn load_csv(&mut self, statement: &str, payload: Vec<u8>) -> Result<LoadOutcome> {
        self.enter(statement).await?;

        if let Some(message) = self.rejection_for(statement) {
            return Err(StageError::parse(message));
        }

        let text = String::from_utf8_lossy(&payload);
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let target = script::load_target(statement);

        let header = if target.as_ref().is_some_and(|t| t.skip_header) {
            lines.next()
        } else {
            None
        };
        let records = lines.count() as u64;

        let columns = match (target, header) {
            (Some(t), _) if !t.columns.is_empty() => t.columns,
            (_, Some(header)) => header.split(',').map(|c| c.trim().to_string()).collect(),
            _ => Vec::new(),
        };

        Ok(LoadOutcome { columns, records })
    }
}

struct MockExportStream {
    dir: PathBuf,
    columns: Vec<String>,
    rows: VecDeque<ByteRow>,
}

#[async_trait]
impl ExportStream for MockExportStream {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<ByteRow>> {
        let take = max_rows.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }
}
