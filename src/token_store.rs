use crate::api::Error;
use crate::model::Session;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOKEN_FILE: &str = "/data/token.json";

/// File-backed persistence of the current [`Session`].
///
/// Read once at startup, rewritten after every successful authentication,
/// deleted on logout. One writer per file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted session. A missing, unreadable or corrupt file is
    /// reported as `None`.
    pub fn load(&self) -> Option<Session> {
        if !self.path.exists() {
            log::info!("No saved token at {}", self.path.display());
            return None;
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| log::error!("Failed to load token from {}: {}", self.path.display(), e))
            .ok()?;

        match serde_json::from_str::<Session>(&contents) {
            Ok(session) => {
                log::info!("Loaded saved token from {}", self.path.display());
                Some(session)
            }
            Err(e) => {
                log::error!("Failed to parse token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Replace the persisted session with `session` (temp file + rename).
    pub fn save(&self, session: &Session) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| Error::Storage(format!("Failed to serialize token: {}", e)))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| {
            Error::Storage(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        log::debug!("Saved token to {}", self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        if !self.path.exists() {
            return Ok(());
        }

        fs::remove_file(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to clear {}: {}", self.path.display(), e)))
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_FILE)
    }
}
