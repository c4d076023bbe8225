// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared slot, checkpoint and reset-cause vocabulary for the boot guardian.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};

/// Raw byte stored in retained memory when the slot is not known.
pub const SLOT_UNKNOWN: u8 = 0xFF;

/// One of the two redundant, independently bootable firmware images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotId {
    /// First OTA application partition (`ota_0`).
    Ota0,
    /// Second OTA application partition (`ota_1`).
    Ota1,
}

impl SlotId {
    /// Both slots in index order.
    pub const ALL: [SlotId; 2] = [SlotId::Ota0, SlotId::Ota1];

    /// Index of the slot (0 or 1).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ota0 => 0,
            Self::Ota1 => 1,
        }
    }

    /// Slot for an index, `None` for anything other than 0 or 1.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Ota0),
            1 => Some(Self::Ota1),
            _ => None,
        }
    }

    /// The sibling image.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Ota0 => Self::Ota1,
            Self::Ota1 => Self::Ota0,
        }
    }

    /// Encode an optional slot as the retained-memory byte.
    #[must_use]
    pub fn to_raw(slot: Option<SlotId>) -> u8 {
        slot.map_or(SLOT_UNKNOWN, |slot| slot.index() as u8)
    }

    /// Decode a retained-memory byte; anything but 0/1 is unknown.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<SlotId> {
        Self::from_index(raw as usize)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ota_{}", self.index())
    }
}

/// Serde helpers encoding `Option<SlotId>` as `0`, `1` or `-1`.
pub(crate) mod slot_code {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SlotId;

    pub fn serialize<S: Serializer>(slot: &Option<SlotId>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i8(code(*slot))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<SlotId>, D::Error> {
        let raw = i64::deserialize(de)?;
        Ok(usize::try_from(raw).ok().and_then(SlotId::from_index))
    }

    /// JSON code for an optional slot.
    pub fn code(slot: Option<SlotId>) -> i8 {
        slot.map_or(-1, |slot| slot.index() as i8)
    }
}

/// Ordered lifecycle marker recording how far a run progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Checkpoint {
    /// Guardian constructed, nothing else initialised.
    #[default]
    Boot = 0,
    /// Initialisation phase 0 finished; filesystem available.
    Init0 = 10,
    /// Application fully initialised.
    Inited = 20,
    /// OTA subsystem ready.
    OtaReady = 30,
    /// Run has been up long enough to be considered healthy.
    Stable = 40,
    /// Graceful shutdown reached.
    Done = 250,
}

impl Checkpoint {
    /// Numeric code stored in the ledger and signatures.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a stored checkpoint code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Boot,
            10 => Self::Init0,
            20 => Self::Inited,
            30 => Self::OtaReady,
            40 => Self::Stable,
            250 => Self::Done,
            _ => return None,
        })
    }

    /// Furthest known checkpoint whose code does not exceed `code`.
    #[must_use]
    pub const fn at_most(code: u64) -> Self {
        match code {
            0..=9 => Self::Boot,
            10..=19 => Self::Init0,
            20..=29 => Self::Inited,
            30..=39 => Self::OtaReady,
            40..=249 => Self::Stable,
            _ => Self::Done,
        }
    }
}

impl From<Checkpoint> for u8 {
    fn from(value: Checkpoint) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for Checkpoint {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_code(value).ok_or_else(|| format!("unknown checkpoint code {value}"))
    }
}

/// Reason the device reported for the most recent reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
#[repr(u8)]
pub enum ResetCause {
    /// Cause could not be determined.
    #[default]
    Unknown = 0,
    /// Power applied.
    PowerOn = 1,
    /// External reset pin.
    External = 2,
    /// Software-requested restart.
    Software = 3,
    /// Exception or panic.
    Panic = 4,
    /// Interrupt watchdog.
    InterruptWatchdog = 5,
    /// Task watchdog.
    TaskWatchdog = 6,
    /// Any other watchdog.
    OtherWatchdog = 7,
    /// Wake from deep sleep.
    DeepSleep = 8,
    /// Supply voltage dropped below the brownout threshold.
    Brownout = 9,
}

impl ResetCause {
    /// Numeric code used in signatures and documents.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Reset caused by the firmware itself misbehaving.
    #[must_use]
    pub const fn is_firmware_like(self) -> bool {
        matches!(
            self,
            Self::Panic | Self::InterruptWatchdog | Self::TaskWatchdog | Self::OtherWatchdog
        )
    }

    /// Reset caused by the power supply rather than the image.
    #[must_use]
    pub const fn is_power_like(self) -> bool {
        matches!(self, Self::Brownout | Self::PowerOn)
    }

    /// Short label used by the CLI and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::PowerOn => "power-on",
            Self::External => "external",
            Self::Software => "software",
            Self::Panic => "panic",
            Self::InterruptWatchdog => "int-wdt",
            Self::TaskWatchdog => "task-wdt",
            Self::OtherWatchdog => "wdt",
            Self::DeepSleep => "deep-sleep",
            Self::Brownout => "brownout",
        }
    }

    /// Parse a label produced by [`ResetCause::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        [
            Self::Unknown,
            Self::PowerOn,
            Self::External,
            Self::Software,
            Self::Panic,
            Self::InterruptWatchdog,
            Self::TaskWatchdog,
            Self::OtherWatchdog,
            Self::DeepSleep,
            Self::Brownout,
        ]
        .into_iter()
        .find(|cause| cause.as_str().eq_ignore_ascii_case(label))
    }
}

impl From<u8> for ResetCause {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::PowerOn,
            2 => Self::External,
            3 => Self::Software,
            4 => Self::Panic,
            5 => Self::InterruptWatchdog,
            6 => Self::TaskWatchdog,
            7 => Self::OtherWatchdog,
            8 => Self::DeepSleep,
            9 => Self::Brownout,
            _ => Self::Unknown,
        }
    }
}

impl From<ResetCause> for u8 {
    fn from(value: ResetCause) -> Self {
        value.code()
    }
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a slot as presented to diagnostics consumers. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum OtaRole {
    /// Healthy and selected for the next boot.
    Preferred,
    /// Healthy but not the intended image, or running only because the sibling failed.
    Fallback,
    /// Rollback state marks the image invalid or aborted.
    Failed,
}

impl From<OtaRole> for u8 {
    fn from(value: OtaRole) -> Self {
        match value {
            OtaRole::Preferred => 0,
            OtaRole::Fallback => 1,
            OtaRole::Failed => 2,
        }
    }
}

/// Rollback state of an application partition as kept by the boot loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i8")]
pub enum ImageState {
    /// Freshly written, never booted.
    New,
    /// Booted once, awaiting confirmation.
    PendingVerify,
    /// Confirmed good.
    Valid,
    /// Marked bad by rollback.
    Invalid,
    /// Confirmation never arrived.
    Aborted,
    /// No rollback information.
    Undefined,
}

impl ImageState {
    /// Whether rollback considers this image unusable.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Invalid | Self::Aborted)
    }

    /// Inverse of the `i8` code; out-of-range codes map to `Undefined`.
    #[must_use]
    pub const fn from_code(code: i8) -> Self {
        match code {
            0 => Self::New,
            1 => Self::PendingVerify,
            2 => Self::Valid,
            3 => Self::Invalid,
            4 => Self::Aborted,
            _ => Self::Undefined,
        }
    }
}

impl From<ImageState> for i8 {
    fn from(value: ImageState) -> Self {
        match value {
            ImageState::New => 0,
            ImageState::PendingVerify => 1,
            ImageState::Valid => 2,
            ImageState::Invalid => 3,
            ImageState::Aborted => 4,
            ImageState::Undefined => -1,
        }
    }
}
