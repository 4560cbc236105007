//! Size-accounted FIFO of staged folders.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// A folder registered in the ledger with its size at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFolder {
    pub path: PathBuf,
    pub size: u64,
}

/// Ordered record of staged folders, oldest first.
///
/// The ledger only does the bookkeeping; deleting evicted folders from disk
/// is up to the caller. Pinned folders belong to exports that have not
/// returned yet and are skipped by eviction.
#[derive(Debug, Clone)]
pub struct StagingLedger {
    folders: VecDeque<StagedFolder>,
    pinned: HashSet<PathBuf>,
    total: u64,
    max_count: usize,
    max_size: u64,
}

impl StagingLedger {
    /// Creates an empty ledger with a folder count and byte budget.
    pub fn new(max_count: usize, max_size: u64) -> Self {
        Self {
            folders: VecDeque::new(),
            pinned: HashSet::new(),
            total: 0,
            max_count,
            max_size,
        }
    }

    /// Records a folder without evicting anything. Used for startup seeding.
    pub fn seed(&mut self, path: impl Into<PathBuf>, size: u64) {
        self.folders.push_back(StagedFolder {
            path: path.into(),
            size,
        });
        self.total += size;
    }

    /// Appends a new folder and evicts the oldest unpinned ones while over
    /// budget.
    ///
    /// The newest folder is never evicted. Returns the evicted folders,
    /// oldest first.
    pub fn push(&mut self, path: impl Into<PathBuf>, size: u64) -> Vec<StagedFolder> {
        self.seed(path, size);
        self.evict(None)
    }

    /// Protects `path` from eviction until [`release`](Self::release).
    pub fn pin(&mut self, path: impl Into<PathBuf>) {
        self.pinned.insert(path.into());
    }

    /// Unpins `path` and evicts other folders that were kept over budget
    /// while pinned. `path` itself survives this pass.
    pub fn release(&mut self, path: &Path) -> Vec<StagedFolder> {
        self.pinned.remove(path);
        self.evict(Some(path))
    }

    fn evict(&mut self, keep: Option<&Path>) -> Vec<StagedFolder> {
        let mut evicted = Vec::new();
        let mut i = 0;

        // The last entry is the newest folder
        while self.over_budget() && i + 1 < self.folders.len() {
            let path = self.folders[i].path.as_path();
            if self.pinned.contains(path) || keep == Some(path) {
                i += 1;
                continue;
            }
            if let Some(old) = self.folders.remove(i) {
                self.total -= old.size;
                evicted.push(old);
            }
        }
        evicted
    }

    fn over_budget(&self) -> bool {
        self.folders.len() > self.max_count || self.total > self.max_size
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Sum of the recorded folder sizes.
    pub fn total_size(&self) -> u64 {
        self.total
    }

    /// Returns true if `path` is currently recorded.
    pub fn contains(&self, path: &Path) -> bool {
        self.folders.iter().any(|f| f.path == path)
    }

    /// Recorded folders, oldest first.
    pub fn folders(&self) -> impl Iterator<Item = &StagedFolder> {
        self.folders.iter()
    }
}
