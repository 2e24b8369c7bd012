//! # store
//!
//! Load/save hooks for the state that must survive a restart: the account,
//! the weekly book and the consistency ledger.
//!
//! [`JsonFileStore`] writes to a sibling temp file and renames it over the
//! target, so a crash mid-write never leaves a truncated state file behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::weekly::WeeklyBook;
use crate::error::StoreError;
use crate::models::AccountState;
use crate::risk::ConsistencyLedger;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version:     u32,
    pub saved_at:    DateTime<Utc>,
    pub account:     AccountState,
    pub weekly:      WeeklyBook,
    pub consistency: ConsistencyLedger,
}

impl PersistedState {
    pub fn new(
        saved_at:    DateTime<Utc>,
        account:     AccountState,
        weekly:      WeeklyBook,
        consistency: ConsistencyLedger,
    ) -> Self {
        Self { version: STATE_VERSION, saved_at, account, weekly, consistency }
    }
}

pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<PersistedState>, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

// ─── JSON file ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_slice(&bytes)?;
        if state.version != STATE_VERSION {
            return Err(StoreError::Version(state.version));
        }
        info!(
            path     = %self.path.display(),
            saved_at = %state.saved_at,
            open     = state.account.open_positions.len(),
            "💾 State loaded"
        );
        Ok(Some(state))
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "💾 State saved");
        Ok(())
    }
}
