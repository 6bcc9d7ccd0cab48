use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::Status;

/// Errors from the seen-set store. All variants are I/O failures; malformed
/// state file content is not an error (see [`SeenSet::load`]).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to create state directory {path}: {source}")]
    Init {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Durable record of which pull-request numbers have already triggered a
/// notification for one repository, split by status.
///
/// Backed by two plain-text files under `<state_dir>/<repository>/`, one
/// integer per line, sorted and deduplicated. Both files are rewritten in
/// full on every mark call so the on-disk state always matches memory after
/// a successful mutation.
pub struct SeenSet {
    open_path: PathBuf,
    closed_path: PathBuf,
    open_ids: BTreeSet<u64>,
    closed_ids: BTreeSet<u64>,
}

impl SeenSet {
    /// Open the seen-set for a repository, creating empty state files on
    /// first use. Loading an already-initialized repository never alters
    /// its recorded ids.
    ///
    /// Lines that do not parse as integers are skipped with a warning and
    /// dropped from disk on the next flush; a partially readable state file
    /// is better than refusing to run.
    pub fn load(state_dir: impl AsRef<Path>, repository: &str) -> Result<Self, StateError> {
        let dir = state_dir.as_ref().join(repository);
        fs::create_dir_all(&dir).map_err(|source| StateError::Init {
            path: dir.clone(),
            source,
        })?;

        let open_path = dir.join("open_requests");
        let closed_path = dir.join("closed_requests");
        let newly_created = !open_path.exists() || !closed_path.exists();

        let open_ids = read_ids(&open_path)?;
        let closed_ids = read_ids(&closed_path)?;

        let set = Self {
            open_path,
            closed_path,
            open_ids,
            closed_ids,
        };

        if newly_created {
            set.flush()?;
        }

        info!(
            repository,
            open = set.open_ids.len(),
            closed = set.closed_ids.len(),
            "Loaded seen-set state"
        );

        Ok(set)
    }

    /// Record pull-request numbers as notified-open. Each number is removed
    /// from the closed set if present. Idempotent; persists immediately.
    pub fn mark_open(&mut self, numbers: &[u64]) -> Result<(), StateError> {
        for &number in numbers {
            self.open_ids.insert(number);
            self.closed_ids.remove(&number);
        }
        self.flush()?;

        debug!(count = numbers.len(), "Recorded open pull requests");
        Ok(())
    }

    /// Record pull-request numbers as notified-closed. Symmetric with
    /// [`Self::mark_open`].
    pub fn mark_closed(&mut self, numbers: &[u64]) -> Result<(), StateError> {
        for &number in numbers {
            self.closed_ids.insert(number);
            self.open_ids.remove(&number);
        }
        self.flush()?;

        debug!(count = numbers.len(), "Recorded closed pull requests");
        Ok(())
    }

    /// Record numbers under the given status.
    pub fn mark(&mut self, status: Status, numbers: &[u64]) -> Result<(), StateError> {
        match status {
            Status::Open => self.mark_open(numbers),
            Status::Closed => self.mark_closed(numbers),
        }
    }

    pub fn is_open(&self, number: u64) -> bool {
        self.open_ids.contains(&number)
    }

    pub fn is_closed(&self, number: u64) -> bool {
        self.closed_ids.contains(&number)
    }

    /// Membership query parameterized by status.
    pub fn is_seen(&self, status: Status, number: u64) -> bool {
        match status {
            Status::Open => self.is_open(number),
            Status::Closed => self.is_closed(number),
        }
    }

    fn flush(&self) -> Result<(), StateError> {
        write_ids(&self.open_path, &self.open_ids)?;
        write_ids(&self.closed_path, &self.closed_ids)?;
        Ok(())
    }
}

fn read_ids(path: &Path) -> Result<BTreeSet<u64>, StateError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }

    let content = fs::read_to_string(path).map_err(|source| StateError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut ids = BTreeSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<u64>() {
            Ok(number) => {
                ids.insert(number);
            }
            Err(_) => {
                warn!(path = %path.display(), line, "Skipping unparseable state file line");
            }
        }
    }

    Ok(ids)
}

fn write_ids(path: &Path, ids: &BTreeSet<u64>) -> Result<(), StateError> {
    let mut content = String::new();
    for id in ids {
        content.push_str(&id.to_string());
        content.push('\n');
    }

    fs::write(path, content).map_err(|source| StateError::Write {
        path: path.to_path_buf(),
        source,
    })
}
