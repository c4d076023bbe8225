// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Best-effort JSON snapshot of guardian history for diagnostics consumers.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::GuardError;
use crate::record::GuardState;

/// Filesystem copy of the guardian state. Never authoritative for counters.
pub trait SnapshotStore: Send {
    /// Load the last saved snapshot; `None` when absent or unreadable.
    fn load(&self) -> Option<GuardState>;
    /// Persist a snapshot.
    fn save(&mut self, state: &GuardState) -> Result<(), GuardError>;
}

/// Snapshot stored as a JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    path: PathBuf,
}

impl FsSnapshotStore {
    /// Store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn load(&self) -> Option<GuardState> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("snapshot {} unreadable: {err}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("snapshot {} malformed: {err}", self.path.display());
                None
            }
        }
    }

    fn save(&mut self, state: &GuardState) -> Result<(), GuardError> {
        let text = serde_json::to_string(state)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(crate::error::StorageError::from)?;
        }
        fs::write(&self.path, text).map_err(crate::error::StorageError::from)?;
        Ok(())
    }
}

/// Snapshot kept in memory. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    doc: Arc<Mutex<Option<String>>>,
}

impl MemorySnapshotStore {
    /// Store without a saved document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON text of the last save.
    #[must_use]
    pub fn document(&self) -> Option<String> {
        self.doc.lock().ok().and_then(|doc| doc.clone())
    }

    /// Replace the stored document verbatim.
    pub fn set_document(&self, text: impl Into<String>) {
        if let Ok(mut doc) = self.doc.lock() {
            *doc = Some(text.into());
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Option<GuardState> {
        let text = self.document()?;
        serde_json::from_str(&text)
            .map_err(|err| log::warn!("in-memory snapshot malformed: {err}"))
            .ok()
    }

    fn save(&mut self, state: &GuardState) -> Result<(), GuardError> {
        let text = serde_json::to_string(state)?;
        let mut doc = self.doc.lock().map_err(|_| GuardError::LockPoisoned)?;
        *doc = Some(text);
        Ok(())
    }
}
