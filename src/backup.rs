use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{snapshot::Snapshot, Result};

/// Last-known-good definitions, used when neither bootstrap nor network are available.
///
/// Failures are reported to the caller, who logs them: a broken backup never stops the client.
pub trait BackupStore: Send + Sync {
    /// `Ok(None)` when there is no backup yet.
    fn read(&self) -> Result<Option<Snapshot>>;

    fn write(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Keeps the backup as a feature definitions document on disk.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    path: PathBuf,
}

impl FileBackupStore {
    pub fn new(path: impl Into<PathBuf>) -> FileBackupStore {
        FileBackupStore { path: path.into() }
    }

    /// `<temp_dir>/flagkit-<app_name>-repo.json`, with characters unsafe in file names replaced.
    pub fn default_path(app_name: &str) -> PathBuf {
        let sanitized: String = app_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        std::env::temp_dir().join(format!("flagkit-{sanitized}-repo.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackupStore for FileBackupStore {
    fn read(&self) -> Result<Option<Snapshot>> {
        let payload = match fs::read_to_string(&self.path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!(target: "flagkit", path:display = self.path.display();
                    "no backup file found, expected on the first run in a new environment");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        log::info!(target: "flagkit", path:display = self.path.display();
            "loading feature definitions from backup file");
        Snapshot::from_json(&payload, None).map(Some)
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let payload = snapshot.to_json()?;
        // Staged next to the target, then renamed into place.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}
