// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Collaborator seams the guardian consumes from the device platform.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Instant;

use serde::Serialize;

use crate::error::PlatformError;
use crate::types::{ImageState, ResetCause, SlotId};

/// Wall-clock timestamps before 2021-01-01 are treated as "clock not set".
pub const EPOCH_PLAUSIBLE_AFTER: i64 = 1_609_459_200;

/// Whether a wall-clock reading looks like a real calendar date.
#[must_use]
pub fn epoch_looks_valid(epoch_sec: i64) -> bool {
    epoch_sec >= EPOCH_PLAUSIBLE_AFTER
}

/// Build metadata embedded in an application image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BuildDescriptor {
    /// Project name.
    #[serde(rename = "proj")]
    pub project: String,
    /// Version string.
    #[serde(rename = "ver")]
    pub version: String,
    /// Build date, for humans only.
    pub date: String,
    /// Build time, for humans only.
    pub time: String,
    /// SHA-256 of the application ELF.
    #[serde(rename = "sha256", serialize_with = "hex_digest")]
    pub elf_sha256: [u8; 32],
}

fn hex_digest<S: serde::Serializer>(digest: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&hex::encode(digest))
}

/// Application partition as reported by the partition table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionInfo {
    /// Partition label.
    pub label: String,
    /// Embedded build metadata, when readable.
    pub app: Option<BuildDescriptor>,
}

/// OTA partition subsystem.
pub trait PartitionService: Send {
    /// Slot the current image runs from, `None` for factory or unknown partitions.
    fn running_slot(&self) -> Option<SlotId>;
    /// Slot the boot loader will start next.
    fn boot_slot(&self) -> Option<SlotId>;
    /// Partition details, `None` when the slot does not exist.
    fn partition(&self, slot: SlotId) -> Option<PartitionInfo>;
    /// Rollback state, `None` when rollback is not supported.
    fn image_state(&self, slot: SlotId) -> Option<ImageState>;
    /// The bootable sibling of `running`.
    fn sibling_slot(&self, running: SlotId) -> Result<SlotId, PlatformError>;
    /// Select the slot for the next boot. Must be idempotent.
    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), PlatformError>;
    /// Restart the device. On hardware this does not return.
    fn restart(&mut self);
}

/// Crash-dump detection.
pub trait CoreDumpService: Send {
    /// Whether a crash dump is stored.
    fn is_available(&self) -> bool;
    /// Stable identifier of the stored dump.
    fn uid(&self) -> Option<String>;
}

/// Monotonic and wall-clock time.
pub trait Clock: Send {
    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u64;
    /// Seconds since the Unix epoch; may be unset (small values).
    fn epoch_secs(&self) -> i64;
}

/// Hardware reset-reason register.
pub trait ResetCauseSource: Send {
    /// Cause of the reset that started this boot.
    fn reset_cause(&self) -> ResetCause;
}

/// Everything the guardian needs from the device.
pub struct Platform {
    /// OTA partition subsystem.
    pub partitions: Box<dyn PartitionService>,
    /// Crash-dump detection.
    pub core_dump: Box<dyn CoreDumpService>,
    /// Time sources.
    pub clock: Box<dyn Clock>,
    /// Reset-reason register.
    pub reset: Box<dyn ResetCauseSource>,
}

impl Platform {
    /// Crash-dump uid when a dump is present.
    #[must_use]
    pub fn core_dump_uid(&self) -> Option<String> {
        if self.core_dump.is_available() {
            self.core_dump.uid().filter(|uid| !uid.is_empty())
        } else {
            None
        }
    }
}

/// Host clock: uptime from process start, wall clock from the system.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    /// Clock whose uptime starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Reset cause fixed at construction, for hosts that learn it out of band.
#[derive(Debug, Clone, Copy)]
pub struct FixedResetCause(pub ResetCause);

impl ResetCauseSource for FixedResetCause {
    fn reset_cause(&self) -> ResetCause {
        self.0
    }
}
