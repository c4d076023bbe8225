// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Guardian thresholds and storage locations, loadable from TOML.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::GuardError;

/// Environment variable overriding [`GuardConfig::snapshot_path`].
pub const SNAPSHOT_PATH_ENV: &str = "SLOTGUARD_SNAPSHOT_PATH";

/// Guardian tuning knobs. Defaults match the shipped firmware behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Runs shorter than this count as early crashes.
    pub early_crash_ms: u32,
    /// Uptime after which a run is declared stable and strikes are forgiven.
    pub stable_ms: u32,
    /// Minimum spacing between periodic snapshot writes.
    pub snapshot_period_ms: u32,
    /// Number of finalized runs kept in the history ring.
    pub history_len: usize,
    /// Consecutive early crashes that trigger an automatic switch.
    pub switch_consecutive_early: u32,
    /// Strike score that triggers an automatic switch.
    pub switch_strike: i32,
    /// Boots that must elapse after a switch before another is allowed.
    pub min_boots_between_switches: u32,
    /// Strike reduction applied once per stable run.
    pub stable_forgiveness: i32,
    /// Location of the diagnostic JSON snapshot.
    pub snapshot_path: PathBuf,
    /// Namespace of the durable record.
    pub kv_namespace: String,
    /// Key of the durable record.
    pub kv_key: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            early_crash_ms: 60 * 1000,
            stable_ms: 10 * 60 * 1000,
            snapshot_period_ms: 60 * 1000,
            history_len: 16,
            switch_consecutive_early: 3,
            switch_strike: 10,
            min_boots_between_switches: 2,
            stable_forgiveness: 5,
            snapshot_path: PathBuf::from("/crashguard.json"),
            kv_namespace: "crashguard".to_owned(),
            kv_key: "state".to_owned(),
        }
    }
}

impl GuardConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, GuardError> {
        let cfg: GuardConfig =
            toml::from_str(text).map_err(|err| GuardError::Config(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, GuardError> {
        let text = fs::read_to_string(path)
            .map_err(|err| GuardError::Config(format!("{}: {err}", path.display())))?;
        Ok(Self::from_toml_str(&text)?.with_env_overrides())
    }

    /// Apply `SLOTGUARD_SNAPSHOT_PATH` when set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(SNAPSHOT_PATH_ENV) {
            if !path.trim().is_empty() {
                self.snapshot_path = PathBuf::from(path);
            }
        }
        self
    }

    fn validate(&self) -> Result<(), GuardError> {
        if self.history_len == 0 {
            return Err(GuardError::Config("history_len must be at least 1".into()));
        }
        if self.early_crash_ms == 0 || self.stable_ms == 0 || self.snapshot_period_ms == 0 {
            return Err(GuardError::Config("crash, stability and snapshot windows must be non-zero".into()));
        }
        if self.stable_forgiveness < 0
            || self.switch_strike <= 0
            || self.switch_consecutive_early == 0
        {
            return Err(GuardError::Config("strike thresholds must be positive".into()));
        }
        if self.kv_namespace.is_empty() || self.kv_key.is_empty() {
            return Err(GuardError::Config("durable namespace and key must be set".into()));
        }
        Ok(())
    }
}
