// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host simulation of the device and its persistence tiers.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Simulation harness.
//!
//! [`SimBench`] owns shared handles on every collaborator so a scenario can
//! boot a guard, drop it to emulate a reset, and boot again against the same
//! retained memory, key-value store and filesystem.

mod device;

pub use device::{DeviceState, SimDevice, SimImage};

use crate::config::GuardConfig;
use crate::durable::MemoryKv;
use crate::guard::{CrashGuard, Stores};
use crate::ledger::MemoryRegion;
use crate::snapshot::MemorySnapshotStore;
use crate::types::ResetCause;

/// Simulated device plus in-memory persistence tiers.
#[derive(Debug, Clone, Default)]
pub struct SimBench {
    /// Hardware.
    pub device: SimDevice,
    /// Retained memory. Survives [`SimBench::reset`], lost on [`SimBench::power_cycle`].
    pub region: MemoryRegion,
    /// Durable key-value storage.
    pub kv: MemoryKv,
    /// Diagnostic snapshot file.
    pub snapshot: MemorySnapshotStore,
}

impl SimBench {
    /// Fresh device with empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage handles sharing this bench's contents.
    #[must_use]
    pub fn stores(&self) -> Stores {
        Stores {
            region: Box::new(self.region.clone()),
            kv: Box::new(self.kv.clone()),
            snapshot: Box::new(self.snapshot.clone()),
        }
    }

    /// Boot a guard with the default configuration.
    #[must_use]
    pub fn boot(&self) -> CrashGuard {
        self.boot_with(GuardConfig::default())
    }

    /// Boot a guard with `config`.
    #[must_use]
    pub fn boot_with(&self, config: GuardConfig) -> CrashGuard {
        CrashGuard::boot(config, self.device.platform(), self.stores())
    }

    /// Warm reset: retained memory survives.
    pub fn reset(&self, cause: ResetCause) {
        self.device.reboot(cause);
    }

    /// Power loss: retained memory is wiped and the device comes back with a power-on reset.
    pub fn power_cycle(&self) {
        self.region.power_cycle();
        self.device.reboot(ResetCause::PowerOn);
    }

    /// Boot, reach filesystem-ready and the initialised checkpoint, then run for `uptime_ms`.
    ///
    /// The returned guard is still mid-run; a following [`SimBench::reset`]
    /// models whatever ended it.
    pub fn run_for(&self, uptime_ms: u64) -> CrashGuard {
        let mut guard = self.boot();
        guard.handle_event(crate::Event::Init(0));
        guard.handle_event(crate::Event::Inited);
        self.device.advance(uptime_ms);
        guard.handle_event(crate::Event::Periodic);
        guard
    }
}
