//! Local file backend for state storage
//!
//! This backend stores state in a local JSON file (default: kiln.state.json).
//! It uses a .lock file next to it for simple locking.

use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

/// Local file backend
pub struct LocalBackend {
    /// Path to the state file
    state_path: PathBuf,
    /// Path to the lock file
    lock_path: PathBuf,
    /// Write indented JSON
    pretty: bool,
}

impl LocalBackend {
    /// Default state file name
    pub const DEFAULT_STATE_FILE: &'static str = "kiln.state.json";

    /// Create a new LocalBackend with default paths (kiln.state.json in current directory)
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Create a new LocalBackend with a specific state file path
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
            pretty: true,
        }
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STATE_FILE));

        let mut backend = Self::with_path(path);
        backend.pretty = config.get_bool_or("pretty", true);
        Ok(backend)
    }

    /// Get the state file path
    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.lock_path)
            .map_err(|e| BackendError::Io(format!("Failed to read lock file: {}", e)))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }

    fn remove_lock(&self) -> BackendResult<()> {
        std::fs::remove_file(&self.lock_path)
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.state_path)
            .map_err(|e| BackendError::Io(format!("Failed to read state file: {}", e)))?;

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(existing) = self.read_state().await?
            && existing.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: existing.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = if self.pretty {
            serde_json::to_string_pretty(state)
        } else {
            serde_json::to_string(state)
        }
        .map_err(|e| BackendError::Serialization(format!("Failed to serialize state: {}", e)))?;

        // Replace the file in one step so a crash never leaves half a state
        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;
        std::fs::rename(&tmp_path, &self.state_path)
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        // An unreadable lock file is treated like an expired one
        if let Ok(Some(existing_lock)) = self.read_lock()
            && !existing_lock.is_expired()
        {
            return Err(BackendError::locked(&existing_lock));
        }

        let lock = LockInfo::new(operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        std::fs::write(&self.lock_path, content)
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;

        debug!("Acquired lock {} for {}", lock.id, operation);
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing_lock = self
            .read_lock()?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing_lock.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing_lock.id,
            });
        }

        self.remove_lock()
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        if !self.lock_path.exists() {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        }

        if let Ok(Some(existing_lock)) = self.read_lock()
            && existing_lock.id != lock_id
        {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing_lock.id,
            });
        }

        self.remove_lock()
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Io(format!("Failed to create state directory: {}", e))
            })?;
        }
        Ok(())
    }
}
