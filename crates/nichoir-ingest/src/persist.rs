//! Image payload persistence.
//!
//! Payloads are written verbatim to `image_YYYYMMDD_HHMMSS_ffffff.<ext>`
//! under the configured directory, so names sort by capture time. Files are
//! opened create-new: a name that already exists gets a `_1`, `_2`, ...
//! suffix and is never overwritten.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use nichoir_core::error::NichoirError;

/// Upper bound on suffixed names tried for one timestamp.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes image payloads to uniquely named files.
#[derive(Debug, Clone)]
pub struct ImagePersister {
    dir: PathBuf,
    extension: String,
}

impl ImagePersister {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Destination directory as configured.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `payload` under a name derived from the current time.
    ///
    /// Returns the absolute, canonical path of the new file.
    pub fn save(&self, payload: &[u8]) -> Result<PathBuf, NichoirError> {
        self.save_at(payload, Utc::now())
    }

    /// Persist `payload` under a name derived from `captured_at`.
    pub fn save_at(
        &self,
        payload: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<PathBuf, NichoirError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            NichoirError::Persist(format!(
                "Failed to create image directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        let dir = self.dir.canonicalize().map_err(|e| {
            NichoirError::Persist(format!(
                "Failed to resolve image directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let stem = format!("image_{}", captured_at.format("%Y%m%d_%H%M%S_%6f"));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.{}", stem, self.extension)
            } else {
                format!("{}_{}.{}", stem, attempt, self.extension)
            };
            let path = dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "Image name taken, trying next suffix");
                    continue;
                }
                Err(e) => {
                    return Err(NichoirError::Persist(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            if let Err(e) = file.write_all(payload).and_then(|_| file.sync_all()) {
                drop(file);
                if let Err(rm) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %rm, "Failed to remove partial image");
                }
                return Err(NichoirError::Persist(format!(
                    "Failed to write {}: {}",
                    path.display(),
                    e
                )));
            }

            debug!(path = %path.display(), bytes = payload.len(), "Image saved");
            return Ok(path);
        }

        Err(NichoirError::Persist(format!(
            "No free file name for {} after {} attempts",
            stem, MAX_NAME_ATTEMPTS
        )))
    }
}
