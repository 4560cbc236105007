//! Session manager owning the single handle to the query service.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ByteRow, ExportStream, LoadOutcome, QueryService, StatementResult, TRANSPORT_FAILURE_MARKER,
};
use crate::error::{Result, StageError};

/// Connection state of the session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct SessionHandle {
    service: Box<dyn QueryService>,
    state: SessionState,
}

/// Owns the one logical connection to the query service.
///
/// All statement execution goes through the manager. The handle sits behind
/// an async mutex, so statements from concurrent jobs run one at a time on
/// the shared session. An export keeps the handle locked until its row
/// stream is dropped.
pub struct SessionManager {
    handle: Arc<Mutex<SessionHandle>>,
    /// Display-safe description of the endpoint, for logs.
    endpoint: String,
}

impl SessionManager {
    /// Creates a manager around an unopened service.
    pub fn new(service: Box<dyn QueryService>, endpoint: impl Into<String>) -> Self {
        Self {
            handle: Arc::new(Mutex::new(SessionHandle {
                service,
                state: SessionState::Closed,
            })),
            endpoint: endpoint.into(),
        }
    }

    /// Returns the endpoint description.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> SessionState {
        self.handle.lock().await.state
    }

    /// Opens the session.
    pub async fn open(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        Self::open_locked(&mut handle, &self.endpoint).await
    }

    /// Closes the session. Closing a closed session is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        Self::close_locked(&mut handle, &self.endpoint).await
    }

    /// Closes (ignoring errors) and opens the session again.
    ///
    /// Returns whether the session is open afterwards; never errors.
    pub async fn reopen(&self) -> bool {
        let mut handle = self.handle.lock().await;

        if let Err(e) = Self::close_locked(&mut handle, &self.endpoint).await {
            debug!("Ignoring close failure during reopen: {}", e);
        }

        match Self::open_locked(&mut handle, &self.endpoint).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not reopen session to {}: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Executes one statement on the session.
    ///
    /// Gives up without sending anything if `cancel` fires while waiting
    /// for the session.
    pub async fn execute(
        &self,
        statement: &str,
        cancel: &CancellationToken,
    ) -> Result<StatementResult> {
        let mut handle = self.acquire(cancel).await?;
        Self::ensure_open(&handle)?;
        debug!("Executing: {}", statement);
        handle.service.execute(statement).await
    }

    /// Executes an export statement on the session.
    ///
    /// The returned stream holds the session until it is dropped.
    pub async fn export(
        &self,
        statement: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ExportStream>> {
        let mut handle = self.acquire(cancel).await?;
        Self::ensure_open(&handle)?;
        debug!("Exporting: {}", statement);
        let rows = handle.service.export(statement).await?;
        Ok(Box::new(LockedExport {
            rows,
            _handle: handle,
        }))
    }

    /// Executes a CSV load statement on the session.
    pub async fn load_csv(
        &self,
        statement: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let mut handle = self.acquire(cancel).await?;
        Self::ensure_open(&handle)?;
        debug!("Loading {} bytes: {}", payload.len(), statement);
        handle.service.load_csv(statement, payload).await
    }

    async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<SessionHandle>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(StageError::cancelled("statement was not sent"))
            }
            handle = Arc::clone(&self.handle).lock_owned() => Ok(handle),
        }
    }

    async fn open_locked(handle: &mut SessionHandle, endpoint: &str) -> Result<()> {
        match handle.service.open().await {
            Ok(()) => {
                handle.state = SessionState::Open;
                info!("Session to {} opened", endpoint);
                Ok(())
            }
            Err(e) => {
                handle.state = SessionState::Closed;
                Err(match e {
                    StageError::Connection(_) => e,
                    other => StageError::connection(other.to_string()),
                })
            }
        }
    }

    async fn close_locked(handle: &mut SessionHandle, endpoint: &str) -> Result<()> {
        if handle.state == SessionState::Closed {
            return Ok(());
        }
        // The handle is unusable after a close attempt either way
        handle.state = SessionState::Closed;
        handle.service.close().await?;
        info!("Session to {} closed", endpoint);
        Ok(())
    }

    fn ensure_open(handle: &SessionHandle) -> Result<()> {
        match handle.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(StageError::transport(format!(
                "{TRANSPORT_FAILURE_MARKER}: session is closed"
            ))),
        }
    }
}

/// Export rows read while holding the session.
struct LockedExport {
    rows: Box<dyn ExportStream>,
    _handle: OwnedMutexGuard<SessionHandle>,
}

#[async_trait]
impl ExportStream for LockedExport {
    fn dir(&self) -> &Path {
        self.rows.dir()
    }

    fn columns(&self) -> &[String] {
        self.rows.columns()
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<ByteRow>> {
        self.rows.next_batch(max_rows).await
    }
}
