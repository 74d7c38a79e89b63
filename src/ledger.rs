//! Per-run persistent record of submissions, handles and outcomes.
//!
//! The ledger is what makes a tracking step resumable: a key that was
//! claimed for submission is never submitted again in the same run, a key
//! with a handle resumes polling, and a key with an outcome is done.
//! A run is one gate output, so every gate step starts a fresh ledger.
//! File-backed ledgers are rewritten atomically after every mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::state_machine::{JobHandle, OutcomeRecord};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to access ledger {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ledger {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    claimed: BTreeSet<String>,
    #[serde(default)]
    handles: BTreeMap<String, JobHandle>,
    #[serde(default)]
    outcomes: BTreeMap<String, OutcomeRecord>,
}

#[derive(Debug)]
pub struct RunLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl RunLedger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Opens the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Ledger of run `run_id` of a spreadsheet, stored at
    /// `<dir>/<spreadsheet>/<run_id>.json`.
    pub fn for_run(dir: &Path, spreadsheet_id: &str, run_id: &str) -> Result<Self, LedgerError> {
        let sheet_dir = dir.join(file_stem(spreadsheet_id));
        std::fs::create_dir_all(&sheet_dir).map_err(|source| LedgerError::Io {
            path: sheet_dir.clone(),
            source,
        })?;
        Self::open(sheet_dir.join(format!("{}.json", file_stem(run_id))))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&self, key: &str) -> Option<JobHandle> {
        self.lock().handles.get(key).cloned()
    }

    pub fn outcome(&self, key: &str) -> Option<OutcomeRecord> {
        self.lock().outcomes.get(key).cloned()
    }

    /// Reserve `key` for its one submission. Returns `false` if it was
    /// already reserved in this run.
    pub fn claim_submission(&self, key: &str) -> Result<bool, LedgerError> {
        let mut state = self.lock();
        if !state.claimed.insert(key.to_string()) {
            return Ok(false);
        }
        self.flush(&state)?;
        Ok(true)
    }

    pub fn put_handle(&self, handle: &JobHandle) -> Result<(), LedgerError> {
        let mut state = self.lock();
        state.claimed.insert(handle.work_item_key.clone());
        state
            .handles
            .insert(handle.work_item_key.clone(), handle.clone());
        self.flush(&state)
    }

    /// Record a terminal outcome. The first outcome for a key wins.
    pub fn put_outcome(&self, record: &OutcomeRecord) -> Result<(), LedgerError> {
        let mut state = self.lock();
        if state.outcomes.contains_key(&record.work_item_key) {
            return Ok(());
        }
        state
            .outcomes
            .insert(record.work_item_key.clone(), record.clone());
        self.flush(&state)
    }

    fn flush(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| LedgerError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        debug!(path = %path.display(), "run ledger flushed");
        Ok(())
    }
}

fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
