//! Statement execution with transport recovery.

use std::sync::Arc;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::format;
use crate::error::{Result, StageError};
use crate::output::{MessageKind, QueryOutput};
use crate::script::{self, Statement};
use crate::session::{is_transport_failure, SessionManager};
use crate::staging::Exporter;

/// Appended to a transport failure when the session cannot be reopened.
pub const REOPEN_FAILED_MESSAGE: &str =
    "Can not reopen session successfully, please check the query service.";

/// Prefix of outputs for statements that failed outside the service's parser.
pub const EXECUTION_ERROR_PREFIX: &str = "Error executing statement:\n";

/// Runs statements in order against the shared session.
pub struct Pipeline {
    session: Arc<SessionManager>,
    exporter: Arc<Exporter>,
}

impl Pipeline {
    pub fn new(session: Arc<SessionManager>, exporter: Arc<Exporter>) -> Self {
        Self { session, exporter }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Runs every statement and returns the outcome of the last one.
    ///
    /// The token is checked before each statement; once it fires no further
    /// statement is issued. A statement already sent to the service is not
    /// interrupted. An empty script yields an empty successful output.
    pub async fn run(
        &self,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> Result<QueryOutput> {
        let mut last = QueryOutput::success();

        for (i, statement) in statements.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Cancelled before statement {} of {}", i + 1, statements.len());
                return Err(StageError::cancelled(format!(
                    "stopped before statement {} of {}",
                    i + 1,
                    statements.len()
                )));
            }
            last = self.run_statement(statement, cancel).await;
        }

        Ok(last)
    }

    /// Runs one statement, reopening the session and retrying once if the
    /// transport broke.
    ///
    /// Nothing is sent once `cancel` has fired, neither the statement nor
    /// its retry.
    pub async fn run_statement(
        &self,
        statement: &str,
        cancel: &CancellationToken,
    ) -> QueryOutput {
        let mut output = self.attempt(statement, cancel).await;

        if is_transport_output(&output) && !cancel.is_cancelled() {
            warn!(
                "Transport failure on {}, reopening session",
                self.session.endpoint()
            );
            if self.session.reopen().await {
                output = self.attempt(statement, cancel).await;
            } else {
                output.push(MessageKind::Text, REOPEN_FAILED_MESSAGE);
            }
        }

        output
    }

    async fn attempt(&self, statement: &str, cancel: &CancellationToken) -> QueryOutput {
        let result = match script::classify(statement) {
            Statement::Export { inline_images, .. } => {
                self.exporter
                    .export(&self.session, statement, inline_images, cancel)
                    .await
            }
            Statement::CsvLoad { path } => self.load_csv(statement, &path, cancel).await,
            Statement::Plain => self.execute(statement, cancel).await,
        };

        result.unwrap_or_else(|e| {
            debug!("Statement failed: {}", e);
            QueryOutput::error(format!("{EXECUTION_ERROR_PREFIX}{}", e.message()))
        })
    }

    async fn execute(&self, statement: &str, cancel: &CancellationToken) -> Result<QueryOutput> {
        let result = self.session.execute(statement, cancel).await?;

        if let Some(message) = result.parse_error.as_deref().filter(|m| !m.is_empty()) {
            return Ok(QueryOutput::error(message));
        }
        Ok(format::statement_output(statement, &result))
    }

    async fn load_csv(
        &self,
        statement: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryOutput> {
        let meta = fs::metadata(path)
            .await
            .map_err(|_| StageError::invalid_input(format!("{path} does not exist!")))?;
        if !meta.is_file() {
            return Err(StageError::invalid_input(format!("{path} is not a file!")));
        }
        let payload = fs::read(path).await?;

        match self.session.load_csv(statement, payload, cancel).await {
            Ok(outcome) => Ok(QueryOutput::text(format!(
                "Successfully wrote {} record(s) to: [{}]",
                outcome.records,
                outcome.columns.join(", ")
            ))),
            Err(StageError::Parse(message)) => Ok(QueryOutput::error(format!("Error: {message}"))),
            Err(e) => Err(e),
        }
    }
}

fn is_transport_output(output: &QueryOutput) -> bool {
    !output.is_success() && output.messages.iter().any(|m| is_transport_failure(&m.data))
}
