//! On-disk staging area for export folders.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ledger::{StagedFolder, StagingLedger};
use crate::error::{Result, StageError};

/// Timestamp layout of export folder names.
const FOLDER_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// A freshly created, not yet registered export folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFolder {
    /// Folder name relative to the staging root; used in download links.
    pub name: String,
    /// Absolute path of the folder.
    pub path: PathBuf,
}

/// Bounded cache of export folders under one staging root.
///
/// Every registration appends to the ledger and evicts the oldest folders
/// under one lock, so two exports never interleave their eviction passes.
pub struct StagingCache {
    root: PathBuf,
    ledger: Mutex<StagingLedger>,
}

impl StagingCache {
    /// Creates the staging root if needed and seeds the ledger from it.
    ///
    /// Existing subdirectories are recorded oldest first by modification
    /// time. Nothing is evicted while seeding.
    pub async fn open(root: impl AsRef<Path>, max_count: usize, max_size: u64) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await.map_err(|e| {
            StageError::staging(format!(
                "Cannot create staging root {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(root).await?;

        let mut ledger = StagingLedger::new(max_count, max_size);
        for (path, _) in seed_candidates(&root).await? {
            let size = dir_size(&path).await?;
            debug!("Seeding staged folder {} ({} bytes)", path.display(), size);
            ledger.seed(path, size);
        }

        info!(
            "Staging root {} holds {} folder(s), {} bytes",
            root.display(),
            ledger.len(),
            ledger.total_size()
        );

        Ok(Self {
            root,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new timestamp-named folder under the root.
    ///
    /// Names have millisecond precision; a `-N` suffix is added when the name
    /// is already taken.
    pub async fn create_folder(&self) -> Result<ExportFolder> {
        let base = Local::now().format(FOLDER_FORMAT).to_string();
        let mut suffix = 0u32;

        loop {
            let name = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}-{suffix}")
            };
            let path = self.root.join(&name);

            match fs::create_dir(&path).await {
                Ok(()) => return Ok(ExportFolder { name, path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => {
                    return Err(StageError::staging(format!(
                        "Cannot create export folder {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }

    /// Records a finished folder and evicts the oldest ones while over budget.
    ///
    /// The folder stays pinned until [`release`](Self::release), so
    /// concurrent exports cannot evict it while its output is assembled.
    /// Returns the measured size of the registered folder.
    pub async fn register(&self, folder: &Path) -> Result<u64> {
        let size = dir_size(folder).await?;

        let mut ledger = self.ledger.lock().await;
        ledger.pin(folder);
        let evicted = ledger.push(folder, size);
        remove_evicted(evicted).await;

        debug!(
            "Staging ledger: {} folder(s), {} bytes",
            ledger.len(),
            ledger.total_size()
        );
        Ok(size)
    }

    /// Unpins a registered folder once its export has returned.
    pub async fn release(&self, folder: &Path) {
        let mut ledger = self.ledger.lock().await;
        let evicted = ledger.release(folder);
        remove_evicted(evicted).await;
    }

    /// Number of recorded folders.
    pub async fn len(&self) -> usize {
        self.ledger.lock().await.len()
    }

    /// Recorded aggregate size in bytes.
    pub async fn total_size(&self) -> u64 {
        self.ledger.lock().await.total_size()
    }

    /// Returns true if the folder is recorded in the ledger.
    pub async fn contains(&self, folder: &Path) -> bool {
        self.ledger.lock().await.contains(folder)
    }
}

async fn remove_evicted(evicted: Vec<StagedFolder>) {
    for old in evicted {
        info!(
            "Evicting staged folder {} ({} bytes)",
            old.path.display(),
            old.size
        );
        if let Err(e) = fs::remove_dir_all(&old.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to delete {}: {}", old.path.display(), e);
            }
        }
    }
}

/// Lists the root's subdirectories sorted by modification time, oldest first.
async fn seed_candidates(root: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_dir() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((entry.path(), modified));
        }
    }

    found.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(found)
}

/// Sums the sizes of all regular files below `path`.
pub async fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    Ok(total)
}
