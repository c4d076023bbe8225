// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Power-loss-safe record of boot counters and per-slot health.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Durable health store.
//!
//! The record is a fixed little-endian blob stored under a single
//! namespace/key pair. A missing record, a size mismatch or a foreign schema
//! version all read as "absent"; the caller then starts from zeroed counters
//! and the next write re-establishes a valid record.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::StorageError;
use crate::ledger::{get_signature, put_signature, read_array, read_u32, SIGNATURE_CAPACITY};
use crate::record::{GuardState, SlotHealth, STATE_VERSION};

const SLOT_RECORD_LEN: usize = 20 + SIGNATURE_CAPACITY;
/// Encoded durable record length in bytes.
pub const DURABLE_LEN: usize = 12 + 2 * SLOT_RECORD_LEN;

/// Non-volatile key-value storage.
pub trait KvStore: Send {
    /// Fetch a blob, `Ok(None)` when the key does not exist.
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Store and commit a blob.
    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Counters held by the durable record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DurableCounters {
    /// Monotonic boot counter.
    pub boot_count: u32,
    /// Boot number of the last automatic slot switch.
    pub last_switch_boot: u32,
    /// Per-slot health.
    pub slots: [SlotHealth; 2],
}

impl DurableCounters {
    /// Copy the durable fields out of the in-memory state.
    #[must_use]
    pub fn from_state(state: &GuardState) -> Self {
        Self {
            boot_count: state.boot_count,
            last_switch_boot: state.last_switch_boot,
            slots: state.slots.clone(),
        }
    }

    /// Install the durable fields into the in-memory state.
    pub fn apply_to(self, state: &mut GuardState) {
        state.version = STATE_VERSION;
        state.boot_count = self.boot_count;
        state.last_switch_boot = self.last_switch_boot;
        state.slots = self.slots;
    }

    /// Encode the fixed record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DURABLE_LEN] {
        let mut out = [0u8; DURABLE_LEN];
        out[0..4].copy_from_slice(&STATE_VERSION.to_le_bytes());
        out[4..8].copy_from_slice(&self.boot_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.last_switch_boot.to_le_bytes());
        for (index, slot) in self.slots.iter().enumerate() {
            let base = 12 + index * SLOT_RECORD_LEN;
            let field = &mut out[base..base + SLOT_RECORD_LEN];
            field[0..4].copy_from_slice(&slot.strike.to_le_bytes());
            field[4..8].copy_from_slice(&slot.crashes.to_le_bytes());
            field[8..12].copy_from_slice(&slot.brownouts.to_le_bytes());
            field[12..16].copy_from_slice(&slot.consecutive_early.to_le_bytes());
            field[16..20].copy_from_slice(&slot.last_good_uptime_ms.to_le_bytes());
            put_signature(&mut field[20..], &slot.last_crash_sig);
        }
        out
    }

    /// Decode a record, `None` on size or version mismatch.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != DURABLE_LEN {
            log::debug!(
                "durable record size {} does not match expected {DURABLE_LEN}",
                bytes.len()
            );
            return None;
        }
        let version = read_u32(bytes, 0);
        if version != STATE_VERSION {
            log::debug!("durable record version {version} is not {STATE_VERSION}");
            return None;
        }
        let mut counters = Self {
            boot_count: read_u32(bytes, 4),
            last_switch_boot: read_u32(bytes, 8),
            slots: Default::default(),
        };
        for (index, slot) in counters.slots.iter_mut().enumerate() {
            let base = 12 + index * SLOT_RECORD_LEN;
            let field = &bytes[base..base + SLOT_RECORD_LEN];
            *slot = SlotHealth {
                strike: i32::from_le_bytes(read_array(field, 0)),
                crashes: read_u32(field, 4),
                brownouts: read_u32(field, 8),
                consecutive_early: read_u32(field, 12),
                last_good_uptime_ms: read_u32(field, 16),
                last_crash_sig: get_signature(&field[20..]),
            };
        }
        Some(counters)
    }
}

/// Durable health store bound to one namespace/key.
pub struct DurableStore {
    kv: Box<dyn KvStore>,
    namespace: String,
    key: String,
}

impl DurableStore {
    /// Store writing to `namespace`/`key` of `kv`.
    pub fn new(kv: Box<dyn KvStore>, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Read the record. Any failure reads as absent.
    #[must_use]
    pub fn read(&self) -> Option<DurableCounters> {
        match self.kv.get_blob(&self.namespace, &self.key) {
            Ok(Some(bytes)) => DurableCounters::from_bytes(&bytes),
            Ok(None) => None,
            Err(err) => {
                log::warn!("durable record {}/{} unreadable: {err}", self.namespace, self.key);
                None
            }
        }
    }

    /// Write and commit the record.
    pub fn write(&mut self, counters: &DurableCounters) -> Result<(), StorageError> {
        self.kv
            .set_blob(&self.namespace, &self.key, &counters.to_bytes())
    }
}

/// In-memory key-value store. Clones share the same contents, so a test can
/// keep a handle across simulated reboots.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryKvInner>>,
}

#[derive(Debug, Default)]
struct MemoryKvInner {
    blobs: HashMap<(String, String), Vec<u8>>,
    fail_writes: bool,
}

impl MemoryKv {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, emulating worn or full flash.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    /// Raw blob for inspection.
    #[must_use]
    pub fn blob(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .ok()?
            .blobs
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Overwrite a raw blob, bypassing failure injection.
    pub fn put_raw(&self, namespace: &str, key: &str, value: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .blobs
                .insert((namespace.to_owned(), key.to_owned()), value.to_vec());
        }
    }
}

impl KvStore for MemoryKv {
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blob(namespace, key))
    }

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory kv lock poisoned".into()))?;
        if inner.fail_writes {
            return Err(StorageError::Unavailable("write rejected".into()));
        }
        inner
            .blobs
            .insert((namespace.to_owned(), key.to_owned()), value.to_vec());
        Ok(())
    }
}

/// Key-value store persisting each key as `<root>/<namespace>/<key>.bin`.
#[derive(Debug, Clone)]
pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{key}.bin"))
    }
}

impl KvStore for FileKv {
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path(namespace, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_blob(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Readers only ever see a complete record.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DurableCounters {
        let mut counters = DurableCounters {
            boot_count: 77,
            last_switch_boot: 70,
            slots: Default::default(),
        };
        counters.slots[0] = SlotHealth {
            strike: 7,
            crashes: 3,
            brownouts: 1,
            consecutive_early: 2,
            last_good_uptime_ms: 601_000,
            last_crash_sig: "rr:4:cp:10".into(),
        };
        counters.slots[1].brownouts = 4;
        counters
    }

    #[test]
    fn record_decodes_to_same_counters() {
        let counters = sample();
        let bytes = counters.to_bytes();
        assert_eq!(bytes.len(), DURABLE_LEN);
        assert_eq!(DurableCounters::from_bytes(&bytes), Some(counters));
    }

    #[test]
    fn version_mismatch_reads_absent() {
        let mut bytes = sample().to_bytes();
        bytes[0..4].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(DurableCounters::from_bytes(&bytes), None);
    }

    #[test]
    fn size_mismatch_reads_absent() {
        let bytes = sample().to_bytes();
        assert_eq!(DurableCounters::from_bytes(&bytes[..DURABLE_LEN - 1]), None);
    }

    #[test]
    fn store_round_trip_through_memory_kv() {
        let kv = MemoryKv::new();
        let mut store = DurableStore::new(Box::new(kv.clone()), "crashguard", "state");
        assert!(store.read().is_none());
        store.write(&sample()).expect("write");
        assert_eq!(store.read(), Some(sample()));
        assert!(kv.blob("crashguard", "state").is_some());
    }

    #[test]
    fn failed_write_is_reported() {
        let kv = MemoryKv::new();
        kv.set_fail_writes(true);
        let mut store = DurableStore::new(Box::new(kv), "crashguard", "state");
        assert!(store.write(&sample()).is_err());
        assert!(store.read().is_none());
    }

    #[test]
    fn file_kv_persists_under_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut kv = FileKv::new(dir.path());
        assert!(kv.get_blob("crashguard", "state").expect("get").is_none());
        kv.set_blob("crashguard", "state", b"abc").expect("set");
        assert!(dir.path().join("crashguard/state.bin").exists());
        assert_eq!(
            kv.get_blob("crashguard", "state").expect("get"),
            Some(b"abc".to_vec())
        );
    }
}
