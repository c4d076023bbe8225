// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Read-only health documents and the manual slot-switch command.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use log::info;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{GuardError, PlatformError};
use crate::events::{DoneReason, Event};
use crate::guard::CrashGuard;
use crate::platform::BuildDescriptor;
use crate::record::{Run, SlotHealth};
use crate::types::{slot_code, Checkpoint, ImageState, OtaRole, SlotId};

/// Request name returning [`GuardInfo`].
pub const REQUEST_INFO: &str = "info";
/// Request name returning [`LiveState`].
pub const REQUEST_STATE: &str = "state";
/// Request name for [`CrashGuard::switch_slot`].
pub const REQUEST_SWITCH: &str = "switchOta";

/// Partition metadata and derived role of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaSlotInfo {
    /// Partition label, absent when the partition does not exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Build metadata, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<BuildDescriptor>,
    /// Rollback state, absent when rollback is unsupported.
    #[serde(rename = "otaState", skip_serializing_if = "Option::is_none")]
    pub ota_state: Option<ImageState>,
    /// Derived role.
    pub role: OtaRole,
}

/// Crash dump identity and the slot it is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreDumpInfo {
    /// Crash-dump identifier.
    pub uid: String,
    /// Slot whose run produced the dump, `-1` when no run matches.
    #[serde(serialize_with = "slot_code::serialize")]
    pub slot: Option<SlotId>,
}

/// Stable-within-a-boot health overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardInfo {
    /// Current boot number.
    pub boot: u32,
    /// Boot number of the last automatic switch.
    #[serde(rename = "lastSwitch")]
    pub last_switch: u32,
    /// Both slots in index order.
    pub ota: Vec<OtaSlotInfo>,
    /// Crash dump, when one is stored.
    #[serde(rename = "coredump", skip_serializing_if = "Option::is_none")]
    pub core_dump: Option<CoreDumpInfo>,
    /// Last finalized run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Run>,
    /// Finalized runs, newest first.
    pub history: Vec<Run>,
}

/// Boot ledger as exposed to diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    /// Validity pair matches.
    pub valid: bool,
    /// Boot number.
    pub boot: u32,
    /// Running slot.
    #[serde(serialize_with = "slot_code::serialize")]
    pub slot: Option<SlotId>,
    /// Current checkpoint.
    #[serde(rename = "cp")]
    pub checkpoint: Checkpoint,
    /// Run has not shut down cleanly yet.
    pub in_progress: bool,
    /// Next reset is planned.
    pub planned: bool,
    /// Last recorded uptime.
    pub uptime: u32,
    /// First plausible wall-clock time.
    pub ts: i64,
    /// Current crash signature.
    #[serde(rename = "sig", skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

/// Live view that changes within a boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveState {
    /// Milliseconds since boot.
    pub uptime: u64,
    /// Running slot.
    #[serde(serialize_with = "slot_code::serialize")]
    pub slot: Option<SlotId>,
    /// Per-slot health counters.
    pub ota: [SlotHealth; 2],
    /// Boot ledger contents.
    pub rtc: LedgerView,
}

/// Role of `slot` given rollback failures, the running slot and the next-boot choice.
#[must_use]
pub fn compute_role(
    slot: SlotId,
    failed_this: bool,
    failed_other: bool,
    running: Option<SlotId>,
    boot_slot: Option<SlotId>,
) -> OtaRole {
    if failed_this {
        OtaRole::Failed
    } else if failed_other && running == Some(slot) {
        OtaRole::Fallback
    } else if boot_slot == Some(slot) {
        OtaRole::Preferred
    } else {
        OtaRole::Fallback
    }
}

impl CrashGuard {
    /// Counters, slot roles, crash-dump attribution and history.
    pub fn info(&self) -> GuardInfo {
        let partitions = &self.platform.partitions;
        let running = partitions.running_slot();
        let boot_slot = partitions.boot_slot().or(running);
        let states = SlotId::ALL.map(|slot| partitions.image_state(slot));
        let failed = states.map(|state| state.is_some_and(ImageState::is_failed));

        let ota = SlotId::ALL
            .iter()
            .map(|&slot| {
                let partition = partitions.partition(slot);
                OtaSlotInfo {
                    label: partition.as_ref().map(|p| p.label.clone()),
                    app: partition.and_then(|p| p.app),
                    ota_state: states[slot.index()],
                    role: compute_role(
                        slot,
                        failed[slot.index()],
                        failed[slot.other().index()],
                        running,
                        boot_slot,
                    ),
                }
            })
            .collect();

        let core_dump = self.platform.core_dump_uid().map(|uid| CoreDumpInfo {
            slot: self.state.core_dump_slot(&uid),
            uid,
        });

        GuardInfo {
            boot: self.state.boot_count,
            last_switch: self.state.last_switch_boot,
            ota,
            core_dump,
            last: self.state.last.clone().filter(|run| run.boot != 0),
            history: self.state.history.clone(),
        }
    }

    /// Uptime, running slot, live counters and the ledger.
    pub fn live_state(&self) -> LiveState {
        LiveState {
            uptime: self.uptime_ms(),
            slot: self.platform.partitions.running_slot(),
            ota: self.state.slots.clone(),
            rtc: LedgerView {
                valid: self.ledger.is_valid(),
                boot: self.ledger.boot,
                slot: self.ledger.slot,
                checkpoint: self.ledger.checkpoint,
                in_progress: self.ledger.in_progress,
                planned: self.ledger.planned_reset,
                uptime: self.ledger.last_uptime_ms,
                ts: self.ledger.first_epoch_sec,
                signature: self.ledger.signature().to_owned(),
            },
        }
    }

    /// Select the sibling slot for the next boot and restart through the
    /// graceful-shutdown path.
    ///
    /// Fails without changing anything when the sibling cannot be resolved or
    /// selected. Does not touch automatic-switch bookkeeping.
    pub fn switch_slot(&mut self) -> Result<SlotId, GuardError> {
        let running = self
            .platform
            .partitions
            .running_slot()
            .ok_or(PlatformError::NotAnOtaSlot)?;
        let target = self.platform.partitions.sibling_slot(running)?;
        self.platform.partitions.set_boot_slot(target)?;
        info!("crash guard: manual switch from {running} to {target}");
        self.handle_event(Event::Done(DoneReason::Restart));
        self.platform.partitions.restart();
        Ok(target)
    }

    /// Dispatch a named request and return its JSON document.
    pub fn handle_request(&mut self, name: &str) -> Result<Value, GuardError> {
        match name {
            REQUEST_INFO => Ok(serde_json::to_value(self.info())?),
            REQUEST_STATE => Ok(serde_json::to_value(self.live_state())?),
            REQUEST_SWITCH => {
                let target = self.switch_slot()?;
                Ok(json!({ "slot": target.index() }))
            }
            other => Err(GuardError::UnknownRequest(other.to_owned())),
        }
    }
}
