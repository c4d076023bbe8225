// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Warm-reset ledger carrying the current run's progress to the next boot.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The boot ledger lives in memory that survives a watchdog, panic or
//! software reset but not a power cycle. It is written once at boot, mutated
//! in place as the run progresses, and read exactly once by the next boot.
//!
//! The record is encoded explicitly rather than relying on struct layout:
//!
//! ```text
//! 0   magic            u32 le
//! 4   !magic           u32 le
//! 8   boot             u32 le
//! 12  slot             u8   (0xFF unknown)
//! 13  checkpoint       u8
//! 14  in_progress      u8
//! 15  planned_reset    u8
//! 16  last_uptime_ms   u32 le
//! 20  first_epoch_sec  i64 le
//! 28  signature        [u8; 64], NUL padded
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::error::StorageError;
use crate::types::{Checkpoint, SlotId};

/// Validity tag. Bump whenever the layout below changes.
pub const LEDGER_MAGIC: u32 = 0xC0A5_7A9F;
/// Encoded ledger length in bytes.
pub const LEDGER_LEN: usize = 92;
/// Capacity of fixed signature fields, including the terminating NUL.
pub const SIGNATURE_CAPACITY: usize = 64;

/// Errors raised while decoding raw retained memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Region does not hold a record of the expected size.
    #[error("ledger length {actual} does not match expected {expected}")]
    Length {
        /// Required length.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// Checkpoint byte is not a known checkpoint.
    #[error("ledger checkpoint code {0} is unknown")]
    Checkpoint(u8),
}

/// Memory region that survives warm resets.
pub trait RetainedRegion: Send {
    /// Return the raw region contents. Content after a power cycle is arbitrary.
    fn load(&self) -> Vec<u8>;
    /// Overwrite the region.
    fn store(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Per-run record passed from one boot to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLedger {
    magic: u32,
    magic_inv: u32,
    /// Boot number of the run that owns this ledger; 0 means none.
    pub boot: u32,
    /// Slot the run executed from.
    pub slot: Option<SlotId>,
    /// Furthest checkpoint reached.
    pub checkpoint: Checkpoint,
    /// True until the run shuts down cleanly.
    pub in_progress: bool,
    /// True when the firmware itself initiated the coming reset.
    pub planned_reset: bool,
    /// Last observed uptime in milliseconds.
    pub last_uptime_ms: u32,
    /// Earliest plausible wall-clock time seen during the run; 0 when unknown.
    pub first_epoch_sec: i64,
    signature: String,
}

impl Default for BootLedger {
    fn default() -> Self {
        let mut ledger = Self {
            magic: 0,
            magic_inv: 0,
            boot: 0,
            slot: None,
            checkpoint: Checkpoint::Boot,
            in_progress: false,
            planned_reset: false,
            last_uptime_ms: 0,
            first_epoch_sec: 0,
            signature: String::new(),
        };
        ledger.reset();
        ledger
    }
}

impl BootLedger {
    /// Whether the validity pair matches this build's layout.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == LEDGER_MAGIC && self.magic_inv == !LEDGER_MAGIC
    }

    /// Reinitialise every field and stamp the validity pair.
    pub fn reset(&mut self) {
        self.magic = LEDGER_MAGIC;
        self.magic_inv = !LEDGER_MAGIC;
        self.boot = 0;
        self.slot = None;
        self.checkpoint = Checkpoint::Boot;
        self.in_progress = false;
        self.planned_reset = false;
        self.last_uptime_ms = 0;
        self.first_epoch_sec = 0;
        self.signature.clear();
    }

    /// Current crash signature.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Replace the crash signature, truncated to the fixed field capacity.
    pub fn set_signature(&mut self, signature: &str) {
        self.signature.clear();
        self.signature.push_str(truncate_signature(signature));
    }

    /// Encode into the fixed retained-memory layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; LEDGER_LEN] {
        let mut out = [0u8; LEDGER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.magic_inv.to_le_bytes());
        out[8..12].copy_from_slice(&self.boot.to_le_bytes());
        out[12] = SlotId::to_raw(self.slot);
        out[13] = self.checkpoint.code();
        out[14] = u8::from(self.in_progress);
        out[15] = u8::from(self.planned_reset);
        out[16..20].copy_from_slice(&self.last_uptime_ms.to_le_bytes());
        out[20..28].copy_from_slice(&self.first_epoch_sec.to_le_bytes());
        put_signature(&mut out[28..28 + SIGNATURE_CAPACITY], &self.signature);
        out
    }

    /// Decode raw retained memory. The result still has to pass [`Self::is_valid`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        if bytes.len() != LEDGER_LEN {
            return Err(LedgerError::Length {
                expected: LEDGER_LEN,
                actual: bytes.len(),
            });
        }
        let checkpoint =
            Checkpoint::from_code(bytes[13]).ok_or(LedgerError::Checkpoint(bytes[13]))?;
        Ok(Self {
            magic: read_u32(bytes, 0),
            magic_inv: read_u32(bytes, 4),
            boot: read_u32(bytes, 8),
            slot: SlotId::from_raw(bytes[12]),
            checkpoint,
            in_progress: bytes[14] != 0,
            planned_reset: bytes[15] != 0,
            last_uptime_ms: read_u32(bytes, 16),
            first_epoch_sec: i64::from_le_bytes(read_array(bytes, 20)),
            signature: get_signature(&bytes[28..28 + SIGNATURE_CAPACITY]),
        })
    }

    /// Decode a region and keep it only when the validity pair matches.
    #[must_use]
    pub fn recover(bytes: &[u8]) -> Option<Self> {
        match Self::from_bytes(bytes) {
            Ok(ledger) if ledger.is_valid() => Some(ledger),
            Ok(_) => None,
            Err(err) => {
                log::debug!("retained ledger unreadable: {err}");
                None
            }
        }
    }
}

/// Cut a signature to fit a fixed field, respecting UTF-8 boundaries.
pub(crate) fn truncate_signature(signature: &str) -> &str {
    let max = SIGNATURE_CAPACITY - 1;
    if signature.len() <= max {
        return signature;
    }
    let mut end = max;
    while !signature.is_char_boundary(end) {
        end -= 1;
    }
    &signature[..end]
}

pub(crate) fn put_signature(field: &mut [u8], signature: &str) {
    field.fill(0);
    let sig = truncate_signature(signature).as_bytes();
    field[..sig.len()].copy_from_slice(sig);
}

pub(crate) fn get_signature(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_array(bytes, offset))
}

pub(crate) fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Retained memory emulated in RAM. Clones share contents so the region
/// outlives a simulated reboot; [`MemoryRegion::power_cycle`] wipes it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegion {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryRegion {
    /// Region holding no record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lose the contents, as removing power does.
    pub fn power_cycle(&self) {
        if let Ok(mut bytes) = self.bytes.lock() {
            bytes.clear();
        }
    }

    /// Decode the current contents, if they form a valid ledger.
    #[must_use]
    pub fn ledger(&self) -> Option<BootLedger> {
        BootLedger::recover(&self.load())
    }
}

impl RetainedRegion for MemoryRegion {
    fn load(&self) -> Vec<u8> {
        self.bytes.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn store(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut region = self
            .bytes
            .lock()
            .map_err(|_| StorageError::Unavailable("retained region lock poisoned".into()))?;
        region.clear();
        region.extend_from_slice(bytes);
        Ok(())
    }
}

/// Host emulation of retained memory backed by a file.
///
/// Deleting the file is the equivalent of a power cycle.
#[derive(Debug, Clone)]
pub struct FileRegion {
    path: PathBuf,
}

impl FileRegion {
    /// Region stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RetainedRegion for FileRegion {
    fn load(&self) -> Vec<u8> {
        match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                log::warn!("retained region {} unreadable: {err}", self.path.display());
                Vec::new()
            }
        }
    }

    fn store(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ledger_is_valid_and_blank() {
        let ledger = BootLedger::default();
        assert!(ledger.is_valid());
        assert_eq!(ledger.slot, None);
        assert_eq!(ledger.checkpoint, Checkpoint::Boot);
        assert_eq!(ledger.boot, 0);
    }

    #[test]
    fn encoded_ledger_decodes_to_same_fields() {
        let mut ledger = BootLedger::default();
        ledger.boot = 42;
        ledger.slot = Some(SlotId::Ota1);
        ledger.checkpoint = Checkpoint::Inited;
        ledger.in_progress = true;
        ledger.last_uptime_ms = 12_345;
        ledger.first_epoch_sec = 1_700_000_000;
        ledger.set_signature("rr:4:cp:20");
        let decoded = BootLedger::from_bytes(&ledger.to_bytes()).expect("decode");
        assert_eq!(decoded, ledger);
    }

    #[test]
    fn zeroed_memory_is_not_valid() {
        let decoded = BootLedger::from_bytes(&[0u8; LEDGER_LEN]).expect("layout ok");
        assert!(!decoded.is_valid());
        assert!(BootLedger::recover(&[0u8; LEDGER_LEN]).is_none());
    }

    #[test]
    fn stale_magic_is_rejected() {
        let mut bytes = BootLedger::default().to_bytes();
        bytes[0..4].copy_from_slice(&0xC0A5_7A9Eu32.to_le_bytes());
        assert!(BootLedger::recover(&bytes).is_none());
    }

    #[test]
    fn short_region_is_a_length_error() {
        let err = BootLedger::from_bytes(&[0u8; 10]).expect_err("short");
        assert_eq!(
            err,
            LedgerError::Length {
                expected: LEDGER_LEN,
                actual: 10
            }
        );
    }

    #[test]
    fn long_signatures_are_truncated_on_char_boundary() {
        let mut ledger = BootLedger::default();
        let long = "é".repeat(40);
        ledger.set_signature(&long);
        assert!(ledger.signature().len() <= SIGNATURE_CAPACITY - 1);
        assert!(long.starts_with(ledger.signature()));
        let decoded = BootLedger::from_bytes(&ledger.to_bytes()).expect("decode");
        assert_eq!(decoded.signature(), ledger.signature());
    }

    #[test]
    fn memory_region_survives_clone_but_not_power_cycle() {
        let region = MemoryRegion::new();
        let mut writer = region.clone();
        let mut ledger = BootLedger::default();
        ledger.boot = 3;
        writer.store(&ledger.to_bytes()).expect("store");
        assert_eq!(region.ledger().map(|l| l.boot), Some(3));
        region.power_cycle();
        assert!(region.ledger().is_none());
    }

    #[test]
    fn file_region_missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut region = FileRegion::new(dir.path().join("rtc/ledger.bin"));
        assert!(region.load().is_empty());
        region.store(&[1, 2, 3]).expect("store");
        assert_eq!(region.load(), vec![1, 2, 3]);
    }
}
