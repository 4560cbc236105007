//! Interpreter facade for notebook hosts.
//!
//! Wires the session, the staging cache, the pipeline and the job registry
//! together. A host creates one [`Interpreter`] per query service and feeds
//! it scripts keyed by its own job ids (paragraph ids, cell ids).

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::jobs::{JobHandle, JobRegistry};
use crate::output::QueryOutput;
use crate::pipeline::Pipeline;
use crate::script;
use crate::session::{self, QueryService, SessionManager};
use crate::staging::{DownloadLinks, Exporter, StagingCache};

/// Runs scripts against one query service session.
pub struct Interpreter {
    session: Arc<SessionManager>,
    staging: Arc<StagingCache>,
    pipeline: Arc<Pipeline>,
    registry: JobRegistry,
}

impl Interpreter {
    /// Connects to the configured PostgreSQL service.
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(config, session::service_for(&config.session)).await
    }

    /// Opens the session and prepares the staging root.
    ///
    /// Failing to open the session or to create the staging root is fatal;
    /// every later failure is reported through a job's output instead.
    pub async fn open(config: &Config, service: Box<dyn QueryService>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(SessionManager::new(
            service,
            config.session.display_string(),
        ));
        session.open().await?;

        let staging = Arc::new(
            StagingCache::open(
                &config.staging.dir,
                config.staging.max_folders,
                config.staging.max_size_bytes(),
            )
            .await?,
        );

        let links = DownloadLinks::resolve(
            config.staging.advertised_host.as_deref(),
            config.staging.http_port,
        );
        let exporter = Exporter::new(Arc::clone(&staging), config.staging.fetch_size, links);
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&session), Arc::new(exporter)));

        info!("Interpreter ready on {}", session.endpoint());

        Ok(Self {
            session,
            staging,
            pipeline,
            registry: JobRegistry::new(),
        })
    }

    /// Starts running `script` as job `job_id`.
    pub fn submit(&self, job_id: impl Into<String>, script: &str) -> JobHandle {
        let statements = script::split(script);
        let pipeline = Arc::clone(&self.pipeline);

        self.registry.submit(job_id, move |cancel| async move {
            pipeline.run(&statements, &cancel).await
        })
    }

    /// Runs `script` as job `job_id` and waits for its output.
    ///
    /// Cancellation and other failures become an error output.
    pub async fn interpret(&self, job_id: impl Into<String>, script: &str) -> QueryOutput {
        match self.submit(job_id, script).wait().await {
            Ok(output) => output,
            Err(e) => QueryOutput::error(e.to_string()),
        }
    }

    /// Cancels job `job_id`; see [`JobRegistry::cancel`].
    pub async fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id).await
    }

    /// Closes the session.
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn staging(&self) -> &Arc<StagingCache> {
        &self.staging
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }
}
