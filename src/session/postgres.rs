//! PostgreSQL query service implementation.
//!
//! Provides the `PostgresService` struct that implements the `QueryService`
//! trait using sqlx. Database errors are the service's statement rejections;
//! IO, TLS, protocol and closed-pool failures are reported as transport
//! failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolCopyExt, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    ByteRow, ExportStream, LoadOutcome, QueryService, ResultShape, StatementResult,
    NO_DATA_SUMMARY, TRANSPORT_FAILURE_MARKER,
};
use crate::config::{SessionConfig, TimePrecision};
use crate::error::{Result, StageError};
use crate::script;

/// Maximum number of connection attempts per `open`.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between connection attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Rows buffered between the export reader task and the export writer.
const EXPORT_CHANNEL_CAPACITY: usize = 256;

/// PostgreSQL query service.
pub struct PostgresService {
    config: SessionConfig,
    pool: Option<PgPool>,
}

impl PostgresService {
    /// Creates an unopened service for the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            StageError::transport(format!("{TRANSPORT_FAILURE_MARKER}: session is not open"))
        })
    }

    fn precision(&self) -> TimePrecision {
        self.config.time_precision
    }
}

#[async_trait]
impl QueryService for PostgresService {
    async fn open(&mut self) -> Result<()> {
        let conn_str = self.config.to_connection_string();

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            // One connection: the session is a single logical handle
            let result = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    self.pool = Some(pool);
                    return Ok(());
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no connection attempt was made".to_string());
        Err(StageError::connection(format!(
            "Cannot connect to {}: {}",
            self.config.display_string(),
            reason
        )))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<StatementResult> {
        let pool = self.pool()?;
        let query = statement.trim_end().trim_end_matches(';');

        let rows = match sqlx::query(query).fetch_all(pool).await {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(db)) => {
                return Ok(StatementResult::rejected(db.message()));
            }
            Err(e) => return Err(map_sqlx_error(e)),
        };

        let Some(first) = rows.first() else {
            return Ok(StatementResult::summary(NO_DATA_SUMMARY));
        };

        let precision = self.precision();
        let mut table = Vec::with_capacity(rows.len() + 1);
        table.push(
            first
                .columns()
                .iter()
                .map(|col| col.name().to_string())
                .collect(),
        );
        table.extend(rows.iter().map(|row| convert_row(row, precision)));

        Ok(StatementResult::table(ResultShape::Query, table))
    }

    async fn export(&mut self, statement: &str) -> Result<Box<dyn ExportStream>> {
        let pool = self.pool()?.clone();
        let (query, dir) = script::strip_export_clause(statement).ok_or_else(|| {
            StageError::parse(format!("Statement has no export clause: {statement}"))
        })?;

        let (tx, mut rx) = mpsc::channel::<Result<PgRow>>(EXPORT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut rows = sqlx::query(&query).fetch(&pool);
            loop {
                let item = match rows.try_next().await {
                    Ok(Some(row)) => Ok(row),
                    Ok(None) => break,
                    Err(sqlx::Error::Database(db)) => Err(StageError::parse(db.message())),
                    Err(e) => Err(map_sqlx_error(e)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        // Column names come from the first row
        let first = rx.recv().await.transpose()?;
        let columns = first
            .as_ref()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::new(PgExportStream {
            dir: PathBuf::from(dir),
            columns,
            first,
            rx,
            precision: self.precision(),
        }))
    }

    async fn load_csv(&mut self, statement: &str, payload: Vec<u8>) -> Result<LoadOutcome> {
        let pool = self.pool()?;
        let target = script::load_target(statement).ok_or_else(|| {
            StageError::parse("LOAD DATA statement is missing an INTO <table>(<columns>) target")
        })?;

        let copy_statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER {})",
            target.table,
            target.columns.join(", "),
            target.skip_header
        );

        let copy_result = async {
            let mut copy = pool.copy_in_raw(&copy_statement).await?;
            copy.send(payload).await?;
            copy.finish().await
        }
        .await;

        match copy_result {
            Ok(records) => Ok(LoadOutcome {
                columns: target.columns,
                records,
            }),
            Err(sqlx::Error::Database(db)) => Err(StageError::parse(db.message())),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }
}

/// Export stream fed by a background reader task.
struct PgExportStream {
    dir: PathBuf,
    columns: Vec<String>,
    first: Option<PgRow>,
    rx: mpsc::Receiver<Result<PgRow>>,
    precision: TimePrecision,
}

#[async_trait]
impl ExportStream for PgExportStream {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<ByteRow>> {
        let mut batch = Vec::with_capacity(max_rows.min(EXPORT_CHANNEL_CAPACITY));

        if let Some(row) = self.first.take() {
            batch.push(convert_row_bytes(&row, self.precision));
        }

        while batch.len() < max_rows {
            match self.rx.recv().await {
                Some(row) => batch.push(convert_row_bytes(&row?, self.precision)),
                None => break,
            }
        }

        Ok(batch)
    }
}

/// Converts a sqlx PgRow to display strings.
fn convert_row(row: &PgRow, precision: TimePrecision) -> Vec<String> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            convert_value(row, i, col.type_info().name(), precision)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|| "null".to_string())
        })
        .collect()
}

/// Converts a sqlx PgRow to one byte value per column; NULL becomes empty.
fn convert_row_bytes(row: &PgRow, precision: TimePrecision) -> ByteRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name(), precision).unwrap_or_default())
        .collect()
}

/// Converts a single column value to bytes, or `None` for NULL.
fn convert_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
    precision: TimePrecision,
) -> Option<Vec<u8>> {
    fn text<T: ToString>(v: Option<T>) -> Option<Vec<u8>> {
        v.map(|v| v.to_string().into_bytes())
    }

    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => text(row.try_get::<Option<bool>, _>(index).ok().flatten()),
        "INT2" | "SMALLINT" => text(row.try_get::<Option<i16>, _>(index).ok().flatten()),
        "INT4" | "INT" | "INTEGER" => text(row.try_get::<Option<i32>, _>(index).ok().flatten()),
        "INT8" | "BIGINT" => text(row.try_get::<Option<i64>, _>(index).ok().flatten()),
        "FLOAT4" | "REAL" => text(row.try_get::<Option<f32>, _>(index).ok().flatten()),
        "FLOAT8" | "DOUBLE PRECISION" => {
            text(row.try_get::<Option<f64>, _>(index).ok().flatten())
        }
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index).ok().flatten(),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|ts| ts.format(precision.format_str()).to_string().into_bytes()),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|ts| ts.format(precision.format_str()).to_string().into_bytes()),
        "DATE" => text(row.try_get::<Option<NaiveDate>, _>(index).ok().flatten()),
        "TIME" => text(row.try_get::<Option<NaiveTime>, _>(index).ok().flatten()),
        // For all other types, try to get as string
        _ => text(row.try_get::<Option<String>, _>(index).ok().flatten()),
    }
}

/// Maps non-database sqlx errors onto the crate's failure classes.
///
/// A pool timeout only means the connection was busy, not that it broke.
fn map_sqlx_error(error: sqlx::Error) -> StageError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            StageError::transport(format!("{TRANSPORT_FAILURE_MARKER}: {error}"))
        }
        other => StageError::execution(other.to_string()),
    }
}

/// Determines if a connection error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}
