// grid-search/src/path_manager.rs
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Failed to create directory: {0}")]
    CreateDirFailed(String),
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
}

/// Resolves every on-disk location used by the service.
///
/// Layout under the base dir (`GS_HOME` or the platform data dir):
/// `db/` for the SQLite file and `logs/` for rolling log files.
#[derive(Debug, Clone)]
pub struct PathManager {
    base_dir: PathBuf,
    db_dir: PathBuf,
    logs_dir: PathBuf,
}

impl PathManager {
    pub fn new() -> Result<Self, PathError> {
        let base_dir = Self::get_base_dir()?;
        Self::with_base_dir(base_dir)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, PathError> {
        let db_dir = base_dir.join("db");
        let logs_dir = base_dir.join("logs");

        Self::ensure_dir(&db_dir)?;
        Self::ensure_dir(&logs_dir)?;

        Ok(Self {
            base_dir,
            db_dir,
            logs_dir,
        })
    }

    fn get_base_dir() -> Result<PathBuf, PathError> {
        match env::var("GS_HOME") {
            Ok(path) => Ok(PathBuf::from(path)),
            Err(_) => dirs::data_local_dir()
                .ok_or_else(|| PathError::EnvVarNotSet("GS_HOME or platform data dir".into()))
                .map(|p| p.join("grid-search")),
        }
    }

    fn ensure_dir(path: &Path) -> Result<(), PathError> {
        if !path.exists() {
            std::fs::create_dir_all(path)
                .map_err(|e| PathError::CreateDirFailed(format!("{}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn db_path(&self, name: &str) -> PathBuf {
        self.db_dir.join(format!("{}.db", name))
    }
}
