//! Checkpoint store — the persisted sync cursor.
//!
//! A single upload timestamp, read once at run start and committed once
//! after a fully successful pass. Commits go through a temp file and an
//! atomic rename so a crash mid-write can never corrupt the previous value.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Sentinel stored when the cursor is explicitly absent.
const NONE_SENTINEL: &str = "none";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint {path} contains unparseable value {value:?}")]
    Parse { path: PathBuf, value: String },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Owns the checkpoint file. The file lives in the state directory,
/// outside the mirror tree.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("checkpoint"),
        }
    }

    /// Load the cursor. A missing file or the `none` sentinel means a full
    /// sync is required.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let value = contents.trim();
        if value.is_empty() || value.eq_ignore_ascii_case(NONE_SENTINEL) {
            return Ok(None);
        }

        DateTime::parse_from_rfc3339(value)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| CheckpointError::Parse {
                path: self.path.clone(),
                value: value.to_string(),
            })
    }

    /// Durably replace the cursor. Only called after a full pass completed
    /// without errors.
    pub fn commit(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        self.write_value(&timestamp.to_rfc3339())
    }

    fn write_value(&self, value: &str) -> Result<(), CheckpointError> {
        let write_err = |source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", value)).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}
