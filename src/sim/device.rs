// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Simulated dual-slot device implementing every platform seam.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GuardError, PlatformError, StorageError};
use crate::platform::{
    BuildDescriptor, Clock, CoreDumpService, PartitionInfo, PartitionService, Platform,
    ResetCauseSource,
};
use crate::types::{slot_code, ImageState, ResetCause, SlotId};

const PROJECT: &str = "slotguard";

/// Application image flashed into one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimImage {
    /// Version string embedded in the image.
    pub version: String,
    /// Build date.
    pub date: String,
    /// Build time.
    pub time: String,
    /// Rollback state code, absent when rollback is unsupported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<i8>,
}

impl SimImage {
    fn new(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            date: "Jan  1 2025".to_owned(),
            time: "00:00:00".to_owned(),
            state: Some(ImageState::Valid.into()),
        }
    }

    fn descriptor(&self) -> BuildDescriptor {
        let mut hasher = Sha256::new();
        hasher.update(PROJECT.as_bytes());
        hasher.update(b":");
        hasher.update(self.version.as_bytes());
        let mut elf_sha256 = [0u8; 32];
        elf_sha256.copy_from_slice(&hasher.finalize());
        BuildDescriptor {
            project: PROJECT.to_owned(),
            version: self.version.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            elf_sha256,
        }
    }
}

/// Persistent part of the simulated hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    /// Slot executing now, `-1` for a factory image.
    #[serde(with = "slot_code")]
    pub running: Option<SlotId>,
    /// Slot the boot loader starts next.
    #[serde(with = "slot_code")]
    pub boot: Option<SlotId>,
    /// Images per slot, `None` when the partition is empty.
    pub images: [Option<SimImage>; 2],
    /// Reset reason latched at the last reset.
    pub reset_cause: ResetCause,
    /// Stored crash dump uid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_dump: Option<String>,
    /// Wall clock at uptime zero.
    pub epoch_base: i64,
    /// Restart requests since the state was created.
    pub restarts: u32,
    /// Reject boot-selection calls.
    pub fail_boot_selection: bool,
    /// Milliseconds since the last reset.
    pub uptime_ms: u64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            running: Some(SlotId::Ota0),
            boot: Some(SlotId::Ota0),
            images: [Some(SimImage::new("1.0.0")), Some(SimImage::new("1.1.0"))],
            reset_cause: ResetCause::PowerOn,
            core_dump: None,
            epoch_base: 0,
            restarts: 0,
            fail_boot_selection: false,
            uptime_ms: 0,
        }
    }
}

/// Handle on a simulated device. Clones share the same hardware, so one
/// handle can be given to the guard and another kept for steering.
#[derive(Debug, Clone, Default)]
pub struct SimDevice {
    inner: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    /// Device running `ota_0` after a power-on reset, both slots holding valid images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device built from saved hardware state.
    #[must_use]
    pub fn from_state(state: DeviceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Load hardware state saved by [`SimDevice::save`]; a missing file yields a fresh device.
    pub fn load(path: &Path) -> Result<Self, GuardError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::from_state(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::new()),
            Err(err) => Err(StorageError::from(err).into()),
        }
    }

    /// Persist the hardware state as JSON.
    pub fn save(&self, path: &Path) -> Result<(), GuardError> {
        let text = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
        fs::write(path, text).map_err(StorageError::from)?;
        Ok(())
    }

    /// Copy of the hardware state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Platform bundle whose seams all drive this device.
    #[must_use]
    pub fn platform(&self) -> Platform {
        Platform {
            partitions: Box::new(self.clone()),
            core_dump: Box::new(self.clone()),
            clock: Box::new(self.clone()),
            reset: Box::new(self.clone()),
        }
    }

    /// Slot executing now.
    #[must_use]
    pub fn running(&self) -> Option<SlotId> {
        self.state().running
    }

    /// Slot selected for the next boot.
    #[must_use]
    pub fn selected_slot(&self) -> Option<SlotId> {
        self.state().boot
    }

    /// Number of restart requests seen.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.state().restarts
    }

    /// Pretend the image executes from `slot`.
    pub fn set_running(&self, slot: Option<SlotId>) {
        self.state().running = slot;
    }

    /// Set the wall clock to `epoch_sec` now.
    pub fn set_epoch(&self, epoch_sec: i64) {
        let mut state = self.state();
        let elapsed = i64::try_from(state.uptime_ms / 1000).unwrap_or(i64::MAX);
        state.epoch_base = epoch_sec.saturating_sub(elapsed);
    }

    /// Let `ms` milliseconds pass.
    pub fn advance(&self, ms: u64) {
        let mut state = self.state();
        state.uptime_ms = state.uptime_ms.saturating_add(ms);
    }

    /// Override the latched reset reason.
    pub fn set_reset_cause(&self, cause: ResetCause) {
        self.state().reset_cause = cause;
    }

    /// Store or erase a crash dump.
    pub fn set_core_dump(&self, uid: Option<&str>) {
        self.state().core_dump = uid.map(str::to_owned);
    }

    /// Override the rollback state of `slot`.
    pub fn set_image_state(&self, slot: SlotId, image_state: Option<ImageState>) {
        if let Some(image) = self.state().images[slot.index()].as_mut() {
            image.state = image_state.map(i8::from);
        }
    }

    /// Make boot-selection calls fail.
    pub fn fail_boot_selection(&self, fail: bool) {
        self.state().fail_boot_selection = fail;
    }

    /// Write a new image into `slot` and select it for the next boot.
    pub fn flash(&self, slot: SlotId, version: &str) {
        let mut state = self.state();
        let mut image = SimImage::new(version);
        image.state = Some(ImageState::New.into());
        state.images[slot.index()] = Some(image);
        state.boot = Some(slot);
    }

    /// Empty `slot`.
    pub fn erase(&self, slot: SlotId) {
        self.state().images[slot.index()] = None;
    }

    /// Reset the device: uptime restarts at zero and the selected slot runs.
    pub fn reboot(&self, cause: ResetCause) {
        let mut state = self.state();
        let elapsed = i64::try_from(state.uptime_ms / 1000).unwrap_or(i64::MAX);
        if crate::platform::epoch_looks_valid(state.epoch_base) {
            state.epoch_base = state.epoch_base.saturating_add(elapsed);
        }
        state.uptime_ms = 0;
        state.reset_cause = cause;
        if state.boot.is_some() {
            state.running = state.boot;
        }
    }
}

impl PartitionService for SimDevice {
    fn running_slot(&self) -> Option<SlotId> {
        self.state().running
    }

    fn boot_slot(&self) -> Option<SlotId> {
        self.state().boot
    }

    fn partition(&self, slot: SlotId) -> Option<PartitionInfo> {
        let state = self.state();
        let image = state.images[slot.index()].as_ref()?;
        Some(PartitionInfo {
            label: slot.to_string(),
            app: Some(image.descriptor()),
        })
    }

    fn image_state(&self, slot: SlotId) -> Option<ImageState> {
        let state = self.state();
        let image = state.images[slot.index()].as_ref()?;
        image.state.map(ImageState::from_code)
    }

    fn sibling_slot(&self, running: SlotId) -> Result<SlotId, PlatformError> {
        let sibling = running.other();
        if self.state().images[sibling.index()].is_some() {
            Ok(sibling)
        } else {
            Err(PlatformError::NoSibling(running))
        }
    }

    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.fail_boot_selection {
            return Err(PlatformError::SetBootFailed {
                slot,
                reason: "boot selection rejected".into(),
            });
        }
        if state.images[slot.index()].is_none() {
            return Err(PlatformError::SetBootFailed {
                slot,
                reason: "partition is empty".into(),
            });
        }
        state.boot = Some(slot);
        Ok(())
    }

    fn restart(&mut self) {
        let mut state = self.state();
        state.restarts = state.restarts.saturating_add(1);
    }
}

impl CoreDumpService for SimDevice {
    fn is_available(&self) -> bool {
        true
    }

    fn uid(&self) -> Option<String> {
        self.state().core_dump.clone()
    }
}

impl Clock for SimDevice {
    fn uptime_ms(&self) -> u64 {
        self.state().uptime_ms
    }

    fn epoch_secs(&self) -> i64 {
        let state = self.state();
        let elapsed = i64::try_from(state.uptime_ms / 1000).unwrap_or(i64::MAX);
        state.epoch_base.saturating_add(elapsed)
    }
}

impl ResetCauseSource for SimDevice {
    fn reset_cause(&self) -> ResetCause {
        self.state().reset_cause
    }
}
