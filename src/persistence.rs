//! Persistence layer for runtime state
//!
//! The vehicle polling budget is written to a small JSON file after every
//! confirmed poll so that a restart inside the same 24h window cannot hand
//! out a fresh quota.

use crate::budget::PollingBudget;
use crate::error::Result;
use crate::logging::get_logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent state structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Vehicle polling accounting
    #[serde(default)]
    pub budget: Option<PollingBudget>,

    /// When the state was last written
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: PathBuf,
    state: PersistentState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load state from disk; a missing file leaves the defaults in place
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(&self.file_path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded persistent state from {}",
            self.file_path.display()
        ));
        Ok(())
    }

    /// Save state to disk
    pub fn save(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.state.saved_at = Some(now);
        let contents = serde_json::to_string_pretty(&self.state)?;
        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.file_path)?;
        self.logger.debug("Saved persistent state to disk");
        Ok(())
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn budget(&self) -> Option<&PollingBudget> {
        self.state.budget.as_ref()
    }

    pub fn set_budget(&mut self, budget: PollingBudget) {
        self.state.budget = Some(budget);
    }
}
