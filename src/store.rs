use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write snapshot file {path}: {source}")]
    Write { path: String, source: io::Error },
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    version: u32,
    snapshot: Snapshot,
}

/// Holds the single previous-run snapshot. Not safe for concurrent writers;
/// runs are expected to be serialized by the scheduler.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted snapshot, or `None` when there is no usable one.
    /// Missing, unreadable and malformed files are all treated as "no prior run".
    pub fn load(&self) -> Option<Snapshot> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no previous snapshot");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "previous snapshot unreadable, starting without baseline");
                return None;
            }
        };

        match parse_snapshot(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(reason) => {
                warn!(path = %self.path.display(), reason = %reason, "previous snapshot rejected, starting without baseline");
                None
            }
        }
    }

    /// Replaces the persisted snapshot. Writes a temp file and renames it over
    /// the target so an interrupted write never leaves a half-written target.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&EnvelopeRef {
            version: SCHEMA_VERSION,
            snapshot,
        })?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}

fn parse_snapshot(text: &str) -> Result<Snapshot, String> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|err| err.to_string())?;
    if envelope.version != SCHEMA_VERSION {
        return Err(format!(
            "unsupported schema version {} (expected {SCHEMA_VERSION})",
            envelope.version
        ));
    }
    envelope.snapshot.check_invariants()?;
    Ok(envelope.snapshot)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
