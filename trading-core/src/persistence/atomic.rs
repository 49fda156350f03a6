//! Atomic file writes: write to `*.tmp`, fsync, rename-over, with retry on
//! rename failure (spec §6, §9 "atomic file writes" design note).
//!
//! Not present anywhere in the retrieved pack — the teacher's `config::
//! load()` is a stub and the closest analogue in the pack
//! (`aibysid-HyperLiquidMM`'s `persistence.rs`) does a plain non-atomic
//! `fs::write`. Authored fresh, following ordinary `std::fs` idiom.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::errors::PersistenceError;

const MAX_RENAME_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Writes `contents` to `path` atomically: a sibling `<path>.tmp` file is
/// written and fsynced first, then renamed over `path`. On rename failure
/// (e.g. a platform that disallows overwrite-rename while the target is
/// open), retries up to `MAX_RENAME_ATTEMPTS` times with exponential
/// back-off before giving up.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
    }

    let tmp_path = path.with_extension(tmp_extension(path));
    {
        let mut tmp_file = File::create(&tmp_path).map_err(|source| PersistenceError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        tmp_file
            .write_all(contents)
            .map_err(|source| PersistenceError::Io {
                path: tmp_path.display().to_string(),
                source,
            })?;
        tmp_file.sync_all().map_err(|source| PersistenceError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
    }

    let mut backoff = INITIAL_BACKOFF;
    let mut last_err = None;
    for attempt in 1..=MAX_RENAME_ATTEMPTS {
        match fs::rename(&tmp_path, path) {
            Ok(()) => return Ok(()),
            Err(source) => {
                warn!(
                    path = %path.display(),
                    attempt,
                    error = %source,
                    "atomic rename failed, retrying"
                );
                last_err = Some(source);
                if attempt < MAX_RENAME_ATTEMPTS {
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }

    let _ = fs::remove_file(&tmp_path);
    Err(PersistenceError::RenameRetriesExhausted {
        path: path.display().to_string(),
        attempts: MAX_RENAME_ATTEMPTS,
        source: last_err.expect("loop ran at least once"),
    })
}

fn tmp_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}
