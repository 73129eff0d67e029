use std::{fs, path::PathBuf};

use crate::Result;

/// Environment variable read by [`FileBootstrapSource::from_env`].
pub const BOOTSTRAP_FILE_ENV: &str = "FLAGKIT_BOOTSTRAP_FILE";

/// One-time seed of feature definitions, read at startup before any network activity.
pub trait BootstrapSource: Send + Sync {
    /// Raw feature definitions document, or `None` when there is nothing to bootstrap from.
    fn read(&self) -> Result<Option<String>>;
}

impl<T: Fn() -> Result<Option<String>> + Send + Sync> BootstrapSource for T {
    fn read(&self) -> Result<Option<String>> {
        self()
    }
}

/// Reads the bootstrap document from a file.
#[derive(Debug, Clone)]
pub struct FileBootstrapSource {
    path: Option<PathBuf>,
}

impl FileBootstrapSource {
    pub fn new(path: impl Into<PathBuf>) -> FileBootstrapSource {
        FileBootstrapSource {
            path: Some(path.into()),
        }
    }

    /// Path taken from `FLAGKIT_BOOTSTRAP_FILE`. Reads nothing when the variable is unset.
    pub fn from_env() -> FileBootstrapSource {
        FileBootstrapSource {
            path: std::env::var_os(BOOTSTRAP_FILE_ENV).map(PathBuf::from),
        }
    }
}

impl BootstrapSource for FileBootstrapSource {
    fn read(&self) -> Result<Option<String>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        log::info!(target: "flagkit", path:display = path.display();
            "reading feature definitions from bootstrap file");
        Ok(Some(fs::read_to_string(path)?))
    }
}

/// Bootstrap document held in memory, e.g. embedded with `include_str!`.
#[derive(Debug, Clone)]
pub struct StaticBootstrapSource(String);

impl StaticBootstrapSource {
    pub fn new(payload: impl Into<String>) -> StaticBootstrapSource {
        StaticBootstrapSource(payload.into())
    }
}

impl BootstrapSource for StaticBootstrapSource {
    fn read(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}
